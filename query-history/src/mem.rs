use crate::provider::{FetchHandler, FetchProvider, InputPoint, TxIndex};
use bitcoincore_rpc::bitcoin::block::Header;
use bitcoincore_rpc::bitcoin::{Address, BlockHash, OutPoint, ScriptBuf, Transaction, Txid};
use query_util::QueryError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct MemChainData {
    headers: HashMap<u64, Header>,
    depths: HashMap<BlockHash, u64>,
    tx_hashes: HashMap<u64, Vec<Txid>>,
    txs: HashMap<Txid, Transaction>,
    tx_indexes: HashMap<Txid, TxIndex>,
    spends: HashMap<OutPoint, InputPoint>,
    outputs: HashMap<ScriptBuf, Vec<OutPoint>>,
    last_depth: u64,
    outputs_error: Option<QueryError>,
}

#[derive(Default)]
struct FetchCounters {
    header: AtomicUsize,
    tx_hashes: AtomicUsize,
    depth: AtomicUsize,
    last_depth: AtomicUsize,
    transaction: AtomicUsize,
    transaction_index: AtomicUsize,
    spend: AtomicUsize,
    outputs: AtomicUsize,
}

/// In-memory fetch provider for tests and offline use. Every completion is
/// dispatched on a fresh OS thread, so callbacks genuinely arrive from a
/// thread the caller does not control, and every operation counts its
/// invocations so callers can assert which stages actually ran.
#[derive(Clone, Default)]
pub struct MemChain {
    data: Arc<RwLock<MemChainData>>,
    counters: Arc<FetchCounters>,
}

impl MemChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_block(&self, depth: u64, header: Header) {
        let mut data = self.data.write().unwrap();
        data.depths.insert(header.block_hash(), depth);
        data.headers.insert(depth, header);
        data.tx_hashes.entry(depth).or_default();
        if depth > data.last_depth {
            data.last_depth = depth;
        }
    }

    pub fn remove_block(&self, depth: u64) {
        let mut data = self.data.write().unwrap();
        if let Some(header) = data.headers.remove(&depth) {
            data.depths.remove(&header.block_hash());
        }
    }

    pub fn insert_transaction(&self, tx: &Transaction, index: TxIndex) {
        let txid = tx.compute_txid();
        let mut data = self.data.write().unwrap();
        data.txs.insert(txid, tx.clone());
        data.tx_indexes.insert(txid, index);
        data.tx_hashes.entry(index.depth).or_default().push(txid);
    }

    pub fn insert_spend(&self, outpoint: OutPoint, inpoint: InputPoint) {
        self.data.write().unwrap().spends.insert(outpoint, inpoint);
    }

    pub fn insert_outputs(&self, address: &Address, points: Vec<OutPoint>) {
        self.data
            .write()
            .unwrap()
            .outputs
            .insert(address.script_pubkey(), points);
    }

    /// Makes every subsequent outputs fetch fail with `error`.
    pub fn fail_outputs(&self, error: QueryError) {
        self.data.write().unwrap().outputs_error = Some(error);
    }

    pub fn header_calls(&self) -> usize {
        self.counters.header.load(Ordering::SeqCst)
    }

    pub fn transaction_calls(&self) -> usize {
        self.counters.transaction.load(Ordering::SeqCst)
    }

    pub fn transaction_index_calls(&self) -> usize {
        self.counters.transaction_index.load(Ordering::SeqCst)
    }

    pub fn spend_calls(&self) -> usize {
        self.counters.spend.load(Ordering::SeqCst)
    }

    pub fn outputs_calls(&self) -> usize {
        self.counters.outputs.load(Ordering::SeqCst)
    }

    fn depth_of(data: &MemChainData, hash: &BlockHash) -> Result<u64, QueryError> {
        data.depths
            .get(hash)
            .copied()
            .ok_or_else(|| QueryError::NotFound(format!("block {}", hash)))
    }

    fn header_at(data: &MemChainData, depth: u64) -> Result<Header, QueryError> {
        data.headers
            .get(&depth)
            .copied()
            .ok_or_else(|| QueryError::NotFound(format!("block at depth {}", depth)))
    }

    fn tx_hashes_at(data: &MemChainData, depth: u64) -> Result<Vec<Txid>, QueryError> {
        data.tx_hashes
            .get(&depth)
            .cloned()
            .ok_or_else(|| QueryError::NotFound(format!("block at depth {}", depth)))
    }
}

fn dispatch<T: Send + 'static>(result: Result<T, QueryError>, handler: FetchHandler<T>) {
    std::thread::spawn(move || handler(result));
}

impl FetchProvider for MemChain {
    fn fetch_block_header_by_depth(&self, depth: u64, handler: FetchHandler<Header>) {
        self.counters.header.fetch_add(1, Ordering::SeqCst);
        let result = Self::header_at(&self.data.read().unwrap(), depth);
        dispatch(result, handler);
    }

    fn fetch_block_header_by_hash(&self, hash: BlockHash, handler: FetchHandler<Header>) {
        self.counters.header.fetch_add(1, Ordering::SeqCst);
        let data = self.data.read().unwrap();
        let result = Self::depth_of(&data, &hash).and_then(|depth| Self::header_at(&data, depth));
        dispatch(result, handler);
    }

    fn fetch_block_transaction_hashes_by_depth(
        &self,
        depth: u64,
        handler: FetchHandler<Vec<Txid>>,
    ) {
        self.counters.tx_hashes.fetch_add(1, Ordering::SeqCst);
        let result = Self::tx_hashes_at(&self.data.read().unwrap(), depth);
        dispatch(result, handler);
    }

    fn fetch_block_transaction_hashes_by_hash(
        &self,
        hash: BlockHash,
        handler: FetchHandler<Vec<Txid>>,
    ) {
        self.counters.tx_hashes.fetch_add(1, Ordering::SeqCst);
        let data = self.data.read().unwrap();
        let result = Self::depth_of(&data, &hash).and_then(|depth| Self::tx_hashes_at(&data, depth));
        dispatch(result, handler);
    }

    fn fetch_block_depth(&self, hash: BlockHash, handler: FetchHandler<u64>) {
        self.counters.depth.fetch_add(1, Ordering::SeqCst);
        let result = Self::depth_of(&self.data.read().unwrap(), &hash);
        dispatch(result, handler);
    }

    fn fetch_last_depth(&self, handler: FetchHandler<u64>) {
        self.counters.last_depth.fetch_add(1, Ordering::SeqCst);
        let result = Ok(self.data.read().unwrap().last_depth);
        dispatch(result, handler);
    }

    fn fetch_transaction(&self, hash: Txid, handler: FetchHandler<Transaction>) {
        self.counters.transaction.fetch_add(1, Ordering::SeqCst);
        let result = self
            .data
            .read()
            .unwrap()
            .txs
            .get(&hash)
            .cloned()
            .ok_or_else(|| QueryError::NotFound(format!("transaction {}", hash)));
        dispatch(result, handler);
    }

    fn fetch_transaction_index(&self, hash: Txid, handler: FetchHandler<TxIndex>) {
        self.counters.transaction_index.fetch_add(1, Ordering::SeqCst);
        let result = self
            .data
            .read()
            .unwrap()
            .tx_indexes
            .get(&hash)
            .copied()
            .ok_or_else(|| QueryError::NotFound(format!("transaction {}", hash)));
        dispatch(result, handler);
    }

    fn fetch_spend(&self, outpoint: OutPoint, handler: FetchHandler<InputPoint>) {
        self.counters.spend.fetch_add(1, Ordering::SeqCst);
        let result = self
            .data
            .read()
            .unwrap()
            .spends
            .get(&outpoint)
            .copied()
            .ok_or_else(|| QueryError::NotFound(format!("spend of {}", outpoint)));
        dispatch(result, handler);
    }

    fn fetch_outputs(&self, address: Address, handler: FetchHandler<Vec<OutPoint>>) {
        self.counters.outputs.fetch_add(1, Ordering::SeqCst);
        let data = self.data.read().unwrap();
        let result = match &data.outputs_error {
            Some(error) => Err(error.clone()),
            None => Ok(data
                .outputs
                .get(&address.script_pubkey())
                .cloned()
                .unwrap_or_default()),
        };
        dispatch(result, handler);
    }
}
