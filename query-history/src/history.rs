use crate::bridge;
use crate::provider::{FetchHandler, FetchProviderRef, InputPoint};
use crate::strand::Strand;
use bitcoincore_rpc::bitcoin::block::Header;
use bitcoincore_rpc::bitcoin::hashes::Hash;
use bitcoincore_rpc::bitcoin::{Address, BlockHash, Network, OutPoint, Transaction, Txid};
use query_util::QueryError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::runtime::Handle;

/// One row of an address's transaction history: the owned output point,
/// where it was confirmed, and the payment addresses of the owning
/// transaction's outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub tx_hash: Txid,
    pub is_input: bool,
    pub index: u32,
    pub height: u64,
    pub block_hash: BlockHash,
    pub timestamp: u64,
    pub outputs: Vec<String>,
}

/// Invoked exactly once per lookup with the full ordered history or the
/// first error that aborted it.
pub type HistoryHandler = FetchHandler<Vec<HistoryEntry>>;

enum PipelineEvent {
    Outputs(Result<Vec<OutPoint>, QueryError>),
    TxIndex(Result<crate::provider::TxIndex, QueryError>),
    Header(Result<Header, QueryError>),
    Transaction(Result<Transaction, QueryError>),
    Spend(Result<InputPoint, QueryError>),
}

enum Step {
    Continue,
    Done(Result<Vec<HistoryEntry>, QueryError>),
}

/// Resolves the full history of one address through a strictly sequential
/// chain of fetches: owned output points first, then per point the
/// confirming block and full transaction, then the spend of the point
/// itself. At most one fetch is outstanding at any time and every provider
/// callback is routed through the instance's strand, so the accumulator is
/// mutated without any lock. The driver task owns all state and the
/// completion handler; when it returns, the whole instance is released.
struct HistoryPipeline {
    provider: FetchProviderRef,
    strand: Strand<PipelineEvent>,
    network: Network,

    outpoints: Vec<OutPoint>,
    cursor: usize,
    spends: Vec<Option<InputPoint>>,
    history: Vec<HistoryEntry>,
}

/// Starts one history lookup. `handler` fires exactly once, from a provider
/// worker thread context, with the ordered result.
pub fn start(
    handle: &Handle,
    provider: FetchProviderRef,
    network: Network,
    address: Address,
    handler: HistoryHandler,
) {
    let (strand, mut queue) = Strand::new();
    provider.fetch_outputs(address, Box::new(strand.wrap(PipelineEvent::Outputs)));

    let mut pipeline = HistoryPipeline {
        provider,
        strand,
        network,
        outpoints: Vec::new(),
        cursor: 0,
        spends: Vec::new(),
        history: Vec::new(),
    };

    handle.spawn(async move {
        while let Some(event) = queue.next().await {
            match pipeline.on_event(event) {
                Step::Continue => {}
                Step::Done(result) => {
                    handler(result);
                    return;
                }
            }
        }
    });
}

/// Blocking form of [`start`], built on the sync bridge. With a timeout the
/// whole run is bounded; without one it blocks until the lookup completes.
pub fn fetch_history(
    handle: &Handle,
    provider: FetchProviderRef,
    network: Network,
    address: Address,
    timeout: Option<Duration>,
) -> Result<Vec<HistoryEntry>, QueryError> {
    let run = move |handler: HistoryHandler| start(handle, provider, network, address, handler);
    match timeout {
        Some(timeout) => bridge::fetch_blocking_timeout(run, timeout),
        None => bridge::fetch_blocking(run),
    }
}

impl HistoryPipeline {
    fn on_event(&mut self, event: PipelineEvent) -> Step {
        match event {
            PipelineEvent::Outputs(Err(e)) => {
                error!("Fetch outputs failed: {}", e);
                Step::Done(Err(e))
            }
            PipelineEvent::Outputs(Ok(outpoints)) => {
                self.outpoints = outpoints;
                self.cursor = 0;
                self.next_point()
            }
            PipelineEvent::TxIndex(Ok(index)) => {
                // Offset inside the block is resolved but not recorded in
                // the entry; only the confirming depth is.
                let Some(entry) = self.history.last_mut() else {
                    return Self::out_of_sync();
                };
                entry.height = index.depth;
                self.provider.fetch_block_header_by_depth(
                    index.depth,
                    Box::new(self.strand.wrap(PipelineEvent::Header)),
                );
                Step::Continue
            }
            PipelineEvent::Header(Ok(header)) => {
                let Some(entry) = self.history.last_mut() else {
                    return Self::out_of_sync();
                };
                entry.block_hash = header.block_hash();
                entry.timestamp = u64::from(header.time);
                let tx_hash = entry.tx_hash;
                self.provider
                    .fetch_transaction(tx_hash, Box::new(self.strand.wrap(PipelineEvent::Transaction)));
                Step::Continue
            }
            PipelineEvent::Transaction(Ok(tx)) => {
                let network = self.network;
                let Some(entry) = self.history.last_mut() else {
                    return Self::out_of_sync();
                };
                // Best effort: outputs whose script has no address form are
                // skipped without raising an error.
                for output in &tx.output {
                    if let Ok(addr) = Address::from_script(&output.script_pubkey, network) {
                        entry.outputs.push(addr.to_string());
                    }
                }
                let Some(outpoint) = self.outpoints.get(self.cursor).copied() else {
                    return Self::out_of_sync();
                };
                // The spend lookup is keyed by the loop's own output point,
                // not by anything collected from the transaction.
                self.provider
                    .fetch_spend(outpoint, Box::new(self.strand.wrap(PipelineEvent::Spend)));
                Step::Continue
            }
            PipelineEvent::Spend(result) => {
                match result {
                    Ok(inpoint) => self.spends.push(Some(inpoint)),
                    // An unspent output is a normal outcome, not an abort
                    Err(e) if e.is_not_found() => self.spends.push(None),
                    Err(e) => {
                        error!("Fetch spend failed: {}", e);
                        return Step::Done(Err(e));
                    }
                }
                self.cursor += 1;
                self.next_point()
            }
            PipelineEvent::TxIndex(Err(e))
            | PipelineEvent::Header(Err(e))
            | PipelineEvent::Transaction(Err(e)) => {
                error!("History pipeline aborted: {}", e);
                Step::Done(Err(e))
            }
        }
    }

    fn next_point(&mut self) -> Step {
        if self.cursor >= self.outpoints.len() {
            self.log_summary();
            return Step::Done(Ok(std::mem::take(&mut self.history)));
        }

        let point = self.outpoints[self.cursor];
        self.history.push(HistoryEntry {
            tx_hash: point.txid,
            is_input: false,
            index: point.vout,
            height: 0,
            block_hash: BlockHash::all_zeros(),
            timestamp: 0,
            outputs: Vec::new(),
        });
        self.provider
            .fetch_transaction_index(point.txid, Box::new(self.strand.wrap(PipelineEvent::TxIndex)));
        Step::Continue
    }

    fn log_summary(&self) {
        for entry in &self.history {
            debug!(
                "History entry: tx_hash={}, index={}, height={}, block_hash={}, timestamp={}, outputs={:?}",
                entry.tx_hash, entry.index, entry.height, entry.block_hash, entry.timestamp, entry.outputs
            );
        }
        for spend in &self.spends {
            match spend {
                Some(inpoint) => debug!("Spent by {}:{}", inpoint.txid, inpoint.index),
                None => debug!("Unspent"),
            }
        }
    }

    fn out_of_sync() -> Step {
        // Unreachable while the provider honors the one-completion contract
        Step::Done(Err(QueryError::Provider(
            "history pipeline state out of sync".to_string(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemChain;
    use crate::provider::TxIndex;
    use bitcoincore_rpc::bitcoin::block::Version;
    use bitcoincore_rpc::bitcoin::{
        Amount, CompactTarget, PubkeyHash, ScriptBuf, TxMerkleNode, TxOut, absolute, transaction,
    };
    use std::sync::Arc;

    fn test_address(byte: u8) -> Address {
        Address::p2pkh(PubkeyHash::from_byte_array([byte; 20]), Network::Regtest)
    }

    fn test_header(time: u32, nonce: u32) -> Header {
        Header {
            version: Version::from_consensus(1),
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce,
        }
    }

    fn tx_with_outputs(outputs: Vec<ScriptBuf>, lock_time: u32) -> Transaction {
        Transaction {
            version: transaction::Version::ONE,
            lock_time: absolute::LockTime::from_consensus(lock_time),
            input: vec![],
            output: outputs
                .into_iter()
                .map(|script_pubkey| TxOut {
                    value: Amount::from_sat(50_000),
                    script_pubkey,
                })
                .collect(),
        }
    }

    struct Fixture {
        chain: MemChain,
        address: Address,
        t1: Transaction,
        t2: Transaction,
        h100: Header,
        h101: Header,
    }

    // Two owned points for one address: (T1, 0) confirmed at depth 100 and
    // (T2, 1) at depth 101. T1 pays address "B"; T2's first output script is
    // not address-shaped. (T1, 0) is spent, (T2, 1) is not.
    fn build_fixture() -> Fixture {
        let chain = MemChain::new();
        let address = test_address(0xaa);
        let b = test_address(0xbb);

        let t1 = tx_with_outputs(vec![b.script_pubkey()], 1);
        let t2 = tx_with_outputs(vec![ScriptBuf::new(), b.script_pubkey()], 2);
        let h100 = test_header(1_600_000_000, 100);
        let h101 = test_header(1_600_000_600, 101);

        chain.insert_block(100, h100);
        chain.insert_block(101, h101);
        chain.insert_transaction(&t1, TxIndex { depth: 100, offset: 3 });
        chain.insert_transaction(&t2, TxIndex { depth: 101, offset: 0 });

        let p1 = OutPoint { txid: t1.compute_txid(), vout: 0 };
        let p2 = OutPoint { txid: t2.compute_txid(), vout: 1 };
        chain.insert_outputs(&address, vec![p1, p2]);
        chain.insert_spend(
            p1,
            InputPoint { txid: t2.compute_txid(), index: 0 },
        );

        Fixture { chain, address, t1, t2, h100, h101 }
    }

    fn provider(chain: &MemChain) -> FetchProviderRef {
        Arc::new(chain.clone())
    }

    #[test]
    fn test_two_point_history_scenario() {
        let fixture = build_fixture();
        let rt = tokio::runtime::Runtime::new().unwrap();

        let history = fetch_history(
            rt.handle(),
            provider(&fixture.chain),
            Network::Regtest,
            fixture.address.clone(),
            None,
        )
        .unwrap();

        assert_eq!(history.len(), 2);

        let b = test_address(0xbb).to_string();
        let first = &history[0];
        assert_eq!(first.tx_hash, fixture.t1.compute_txid());
        assert!(!first.is_input);
        assert_eq!(first.index, 0);
        assert_eq!(first.height, 100);
        assert_eq!(first.block_hash, fixture.h100.block_hash());
        assert_eq!(first.timestamp, 1_600_000_000);
        assert_eq!(first.outputs, vec![b.clone()]);

        let second = &history[1];
        assert_eq!(second.tx_hash, fixture.t2.compute_txid());
        assert_eq!(second.index, 1);
        assert_eq!(second.height, 101);
        assert_eq!(second.block_hash, fixture.h101.block_hash());
        assert_eq!(second.timestamp, 1_600_000_600);
        // T2 has two outputs but only one yields an address
        assert_eq!(second.outputs, vec![b]);
        assert!(second.outputs.len() <= fixture.t2.output.len());
    }

    #[test]
    fn test_address_with_no_outputs_completes_empty() {
        let chain = MemChain::new();
        let rt = tokio::runtime::Runtime::new().unwrap();

        let history = fetch_history(
            rt.handle(),
            provider(&chain),
            Network::Regtest,
            test_address(0x01),
            None,
        )
        .unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn test_outputs_error_short_circuits_without_further_fetches() {
        let chain = MemChain::new();
        chain.fail_outputs(QueryError::Provider("backend offline".to_string()));
        let rt = tokio::runtime::Runtime::new().unwrap();

        let err = fetch_history(
            rt.handle(),
            provider(&chain),
            Network::Regtest,
            test_address(0x01),
            None,
        )
        .unwrap_err();
        assert_eq!(err, QueryError::Provider("backend offline".to_string()));

        assert_eq!(chain.outputs_calls(), 1);
        assert_eq!(chain.transaction_index_calls(), 0);
        assert_eq!(chain.header_calls(), 0);
        assert_eq!(chain.transaction_calls(), 0);
        assert_eq!(chain.spend_calls(), 0);
    }

    #[test]
    fn test_reruns_are_deterministic_and_visit_each_point_once() {
        let fixture = build_fixture();
        let rt = tokio::runtime::Runtime::new().unwrap();

        let first = fetch_history(
            rt.handle(),
            provider(&fixture.chain),
            Network::Regtest,
            fixture.address.clone(),
            None,
        )
        .unwrap();
        let calls_after_first = fixture.chain.transaction_index_calls();

        let second = fetch_history(
            rt.handle(),
            provider(&fixture.chain),
            Network::Regtest,
            fixture.address.clone(),
            None,
        )
        .unwrap();

        assert_eq!(first, second);
        // One tx-index fetch per owned point per run
        assert_eq!(calls_after_first, 2);
        assert_eq!(fixture.chain.transaction_index_calls(), 4);
    }

    #[test]
    fn test_later_stage_error_aborts_pipeline() {
        let fixture = build_fixture();
        // Losing a confirmed block header is a hard provider fault
        fixture.chain.remove_block(100);
        let rt = tokio::runtime::Runtime::new().unwrap();

        let err = fetch_history(
            rt.handle(),
            provider(&fixture.chain),
            Network::Regtest,
            fixture.address.clone(),
            None,
        )
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_concurrent_pipelines_do_not_interfere() {
        let fixture = build_fixture();
        let rt = tokio::runtime::Runtime::new().unwrap();

        let mut joins = Vec::new();
        for _ in 0..4 {
            let handle = rt.handle().clone();
            let provider = provider(&fixture.chain);
            let address = fixture.address.clone();
            joins.push(std::thread::spawn(move || {
                fetch_history(&handle, provider, Network::Regtest, address, None)
            }));
        }

        let mut results: Vec<_> = joins
            .into_iter()
            .map(|j| j.join().unwrap().unwrap())
            .collect();
        let first = results.pop().unwrap();
        for result in results {
            assert_eq!(result, first);
        }
        assert_eq!(first.len(), 2);
    }
}
