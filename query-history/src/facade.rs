use crate::bridge;
use crate::provider::{FetchHandler, FetchProviderRef, InputPoint, TxIndex};
use bitcoincore_rpc::bitcoin::block::Header;
use bitcoincore_rpc::bitcoin::{Address, BlockHash, OutPoint, Transaction, Txid};
use query_util::QueryError;
use std::sync::Arc;
use std::time::Duration;

/// Blocking view over a fetch provider: every non-chained operation as a
/// plain call returning `Result`. Holds only a shared reference to the
/// provider; any number of facades may front the same backend. Each call
/// blocks its calling thread for the duration of one fetch.
pub struct SyncChain {
    provider: FetchProviderRef,
    timeout: Option<Duration>,
}

impl SyncChain {
    pub fn new(provider: FetchProviderRef) -> Self {
        Self {
            provider,
            timeout: None,
        }
    }

    /// Bounds every call made through this facade. Without it, a fetch that
    /// never completes blocks the caller indefinitely.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn call<T, F>(&self, fetch: F) -> Result<T, QueryError>
    where
        T: Send + 'static,
        F: FnOnce(FetchHandler<T>),
    {
        match self.timeout {
            Some(timeout) => bridge::fetch_blocking_timeout(fetch, timeout),
            None => bridge::fetch_blocking(fetch),
        }
    }

    pub fn block_header_by_depth(&self, depth: u64) -> Result<Header, QueryError> {
        self.call(|handler| self.provider.fetch_block_header_by_depth(depth, handler))
    }

    pub fn block_header_by_hash(&self, hash: BlockHash) -> Result<Header, QueryError> {
        self.call(|handler| self.provider.fetch_block_header_by_hash(hash, handler))
    }

    pub fn block_transaction_hashes_by_depth(&self, depth: u64) -> Result<Vec<Txid>, QueryError> {
        self.call(|handler| {
            self.provider
                .fetch_block_transaction_hashes_by_depth(depth, handler)
        })
    }

    pub fn block_transaction_hashes_by_hash(
        &self,
        hash: BlockHash,
    ) -> Result<Vec<Txid>, QueryError> {
        self.call(|handler| {
            self.provider
                .fetch_block_transaction_hashes_by_hash(hash, handler)
        })
    }

    pub fn block_depth(&self, hash: BlockHash) -> Result<u64, QueryError> {
        self.call(|handler| self.provider.fetch_block_depth(hash, handler))
    }

    pub fn last_depth(&self) -> Result<u64, QueryError> {
        self.call(|handler| self.provider.fetch_last_depth(handler))
    }

    pub fn transaction(&self, hash: Txid) -> Result<Transaction, QueryError> {
        self.call(|handler| self.provider.fetch_transaction(hash, handler))
    }

    pub fn transaction_index(&self, hash: Txid) -> Result<TxIndex, QueryError> {
        self.call(|handler| self.provider.fetch_transaction_index(hash, handler))
    }

    pub fn spend(&self, outpoint: OutPoint) -> Result<InputPoint, QueryError> {
        self.call(|handler| self.provider.fetch_spend(outpoint, handler))
    }

    pub fn outputs(&self, address: Address) -> Result<Vec<OutPoint>, QueryError> {
        self.call(|handler| self.provider.fetch_outputs(address, handler))
    }
}

pub type SyncChainRef = Arc<SyncChain>;

/// Drops a query error and falls back to the default value, logging what
/// was dropped. Callers who use this cannot tell "empty" from "failed", so
/// discarding has to be spelled out at the call site instead of hiding
/// behind an overload.
pub fn discard<T: Default>(result: Result<T, QueryError>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            debug!("Discarding query error: {}", e);
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemChain;
    use bitcoincore_rpc::bitcoin::block::Version;
    use bitcoincore_rpc::bitcoin::hashes::Hash;
    use bitcoincore_rpc::bitcoin::{CompactTarget, TxMerkleNode};

    fn test_header(nonce: u32) -> Header {
        Header {
            version: Version::from_consensus(1),
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_600_000_000,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce,
        }
    }

    #[test]
    fn test_facade_blocking_lookups() {
        let chain = MemChain::new();
        let header = test_header(7);
        chain.insert_block(42, header);

        let facade = SyncChain::new(Arc::new(chain));
        assert_eq!(facade.last_depth().unwrap(), 42);
        assert_eq!(facade.block_header_by_depth(42).unwrap(), header);
        assert_eq!(
            facade.block_header_by_hash(header.block_hash()).unwrap(),
            header
        );
        assert_eq!(facade.block_depth(header.block_hash()).unwrap(), 42);
        assert!(
            facade
                .block_transaction_hashes_by_depth(42)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_facade_surfaces_not_found() {
        let facade = SyncChain::new(Arc::new(MemChain::new()));
        let err = facade.block_header_by_depth(9).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_discard_falls_back_to_default() {
        let facade = SyncChain::new(Arc::new(MemChain::new()))
            .with_timeout(Duration::from_secs(5));
        let depth = discard(facade.block_depth(BlockHash::all_zeros()));
        assert_eq!(depth, 0);

        let hashes = discard(facade.block_transaction_hashes_by_depth(9));
        assert!(hashes.is_empty());
    }
}
