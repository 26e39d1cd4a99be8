use bitcoincore_rpc::bitcoin::block::Header;
use bitcoincore_rpc::bitcoin::{Address, BlockHash, OutPoint, Transaction, Txid};
use query_util::QueryError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Completion callback for one fetch operation. The provider contract is
/// that every handler passed to a fetch is invoked exactly once, possibly
/// from any worker thread the provider owns. The `FnOnce` bound makes a
/// second invocation unrepresentable; dropping a handler without invoking
/// it is a provider bug that the sync bridge surfaces as an error.
pub type FetchHandler<T> = Box<dyn FnOnce(Result<T, QueryError>) + Send + 'static>;

/// Confirmed location of a transaction: owning block depth plus the
/// position of the transaction inside that block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIndex {
    pub depth: u64,
    pub offset: u32,
}

/// The input that spends a given output point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPoint {
    pub txid: Txid,
    pub index: u32,
}

/// Asynchronous chain query backend. Each operation takes one key and a
/// completion handler; results are reported only through the handler.
/// `NotFound` is reserved for a missing entity, every other backend failure
/// is reported as `Provider` with the backend message verbatim.
pub trait FetchProvider: Send + Sync {
    fn fetch_block_header_by_depth(&self, depth: u64, handler: FetchHandler<Header>);
    fn fetch_block_header_by_hash(&self, hash: BlockHash, handler: FetchHandler<Header>);

    fn fetch_block_transaction_hashes_by_depth(&self, depth: u64, handler: FetchHandler<Vec<Txid>>);
    fn fetch_block_transaction_hashes_by_hash(
        &self,
        hash: BlockHash,
        handler: FetchHandler<Vec<Txid>>,
    );

    fn fetch_block_depth(&self, hash: BlockHash, handler: FetchHandler<u64>);
    fn fetch_last_depth(&self, handler: FetchHandler<u64>);

    fn fetch_transaction(&self, hash: Txid, handler: FetchHandler<Transaction>);
    fn fetch_transaction_index(&self, hash: Txid, handler: FetchHandler<TxIndex>);

    fn fetch_spend(&self, outpoint: OutPoint, handler: FetchHandler<InputPoint>);
    fn fetch_outputs(&self, address: Address, handler: FetchHandler<Vec<OutPoint>>);
}

pub type FetchProviderRef = Arc<dyn FetchProvider>;
