use crate::provider::{FetchHandler, FetchProvider, InputPoint, TxIndex};
use bitcoincore_rpc::bitcoin::block::Header;
use bitcoincore_rpc::bitcoin::{Address, BlockHash, OutPoint, Transaction, Txid};
use bitcoincore_rpc::{Auth, Client, RpcApi};
use query_util::QueryError;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tokio::runtime::Handle;

// bitcoind error code for a missing block/transaction/key
const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;

struct RpcInner {
    rpc_url: String,
    auth: Auth,
    client: RwLock<Option<Arc<Client>>>,
}

/// Fetch provider backed by a bitcoind JSON-RPC endpoint.
///
/// The underlying client is created on demand and rebuilt when a transport
/// error occurs under cookie auth, since a restarted node rewrites its auth
/// cookie. Every fetch runs its blocking RPC call on one of the runtime's
/// blocking worker threads and invokes the completion handler from there,
/// exactly once.
pub struct ChainRpcProvider {
    inner: Arc<RpcInner>,
    handle: Handle,
}

impl ChainRpcProvider {
    pub fn new(rpc_url: String, auth: Auth, handle: Handle) -> Self {
        // The client itself is not created here: under cookie auth the
        // cookie file may not exist until bitcoind is up.
        Self {
            inner: Arc::new(RpcInner {
                rpc_url,
                auth,
                client: RwLock::new(None),
            }),
            handle,
        }
    }

    fn dispatch<T, F>(&self, handler: FetchHandler<T>, work: F)
    where
        T: Send + 'static,
        F: FnOnce(&RpcInner) -> Result<T, QueryError> + Send + 'static,
    {
        let inner = self.inner.clone();
        self.handle.spawn_blocking(move || handler(work(&inner)));
    }
}

impl RpcInner {
    fn update_client(&self) -> Result<(), QueryError> {
        let new_client = Client::new(&self.rpc_url, self.auth.clone()).map_err(|e| {
            let msg = format!("Failed to create RPC client: {}", e);
            error!("{}", msg);
            QueryError::Provider(msg)
        })?;

        let mut write_guard = self.client.write().unwrap();
        *write_guard = Some(Arc::new(new_client));

        info!("RPC client updated successfully.");
        Ok(())
    }

    fn client(&self) -> Result<Arc<Client>, QueryError> {
        {
            let read_guard = self.client.read().unwrap();
            if let Some(client) = &*read_guard {
                return Ok(client.clone());
            }
        }

        // Racing creations are harmless, the last one wins
        self.update_client()?;

        let read_guard = self.client.read().unwrap();
        if let Some(client) = &*read_guard {
            return Ok(client.clone());
        }

        Err(QueryError::Provider(
            "Failed to initialize RPC client.".to_string(),
        ))
    }

    fn is_auth_cookie(&self) -> bool {
        matches!(self.auth, Auth::CookieFile(_))
    }

    fn on_error(&self, error: &bitcoincore_rpc::Error) {
        if let bitcoincore_rpc::Error::JsonRpc(bitcoincore_rpc::jsonrpc::Error::Transport(_)) =
            error
        {
            // The node may have restarted with a fresh auth cookie
            if self.is_auth_cookie() {
                let _ = self.update_client();
            }
        }
    }

    fn map_error(&self, op: &'static str, error: bitcoincore_rpc::Error) -> QueryError {
        self.on_error(&error);

        if let bitcoincore_rpc::Error::JsonRpc(bitcoincore_rpc::jsonrpc::Error::Rpc(ref rpc)) =
            error
        {
            if rpc.code == RPC_INVALID_ADDRESS_OR_KEY {
                return QueryError::NotFound(format!("{}: {}", op, rpc.message));
            }
        }

        let msg = format!("{} failed: {}", op, error);
        error!("{}", msg);
        QueryError::Provider(msg)
    }

    fn get_header_by_depth(&self, depth: u64) -> Result<Header, QueryError> {
        let hash = self
            .client()?
            .get_block_hash(depth)
            .map_err(|e| self.map_error("get_block_hash", e))?;
        self.get_header_by_hash(hash)
    }

    fn get_header_by_hash(&self, hash: BlockHash) -> Result<Header, QueryError> {
        self.client()?
            .get_block_header(&hash)
            .map_err(|e| self.map_error("get_block_header", e))
    }

    fn get_tx_hashes_by_depth(&self, depth: u64) -> Result<Vec<Txid>, QueryError> {
        let hash = self
            .client()?
            .get_block_hash(depth)
            .map_err(|e| self.map_error("get_block_hash", e))?;
        self.get_tx_hashes_by_hash(hash)
    }

    fn get_tx_hashes_by_hash(&self, hash: BlockHash) -> Result<Vec<Txid>, QueryError> {
        let info = self
            .client()?
            .get_block_info(&hash)
            .map_err(|e| self.map_error("get_block_info", e))?;
        Ok(info.tx)
    }

    fn get_block_depth(&self, hash: BlockHash) -> Result<u64, QueryError> {
        let info = self
            .client()?
            .get_block_header_info(&hash)
            .map_err(|e| self.map_error("get_block_header_info", e))?;
        Ok(info.height as u64)
    }

    fn get_last_depth(&self) -> Result<u64, QueryError> {
        self.client()?
            .get_block_count()
            .map_err(|e| self.map_error("get_block_count", e))
    }

    fn get_transaction(&self, hash: Txid) -> Result<Transaction, QueryError> {
        self.client()?
            .get_raw_transaction(&hash, None)
            .map_err(|e| self.map_error("get_raw_transaction", e))
    }

    fn get_transaction_index(&self, hash: Txid) -> Result<TxIndex, QueryError> {
        let info = self
            .client()?
            .get_raw_transaction_info(&hash, None)
            .map_err(|e| self.map_error("get_raw_transaction_info", e))?;
        let block_hash = info.blockhash.ok_or_else(|| {
            QueryError::NotFound(format!("transaction {} is not confirmed", hash))
        })?;

        let block = self
            .client()?
            .get_block_info(&block_hash)
            .map_err(|e| self.map_error("get_block_info", e))?;
        let offset = block
            .tx
            .iter()
            .position(|txid| *txid == hash)
            .ok_or_else(|| {
                QueryError::NotFound(format!(
                    "transaction {} missing from block {}",
                    hash, block_hash
                ))
            })?;

        Ok(TxIndex {
            depth: block.height as u64,
            offset: offset as u32,
        })
    }

    fn get_spend(&self, outpoint: OutPoint) -> Result<InputPoint, QueryError> {
        let args = [serde_json::json!([{
            "txid": outpoint.txid.to_string(),
            "vout": outpoint.vout,
        }])];
        let result: serde_json::Value = self
            .client()?
            .call("gettxspendingprevout", &args)
            .map_err(|e| self.map_error("gettxspendingprevout", e))?;
        parse_spending_prevout(&outpoint, &result)
    }

    fn get_outputs(&self, address: Address) -> Result<Vec<OutPoint>, QueryError> {
        // bitcoind has no address index; scantxoutset covers the unspent
        // output points only.
        let args = [
            serde_json::json!("start"),
            serde_json::json!([format!("addr({})", address)]),
        ];
        let result: serde_json::Value = self
            .client()?
            .call("scantxoutset", &args)
            .map_err(|e| self.map_error("scantxoutset", e))?;
        parse_scan_unspents(&result)
    }
}

fn parse_spending_prevout(
    outpoint: &OutPoint,
    result: &serde_json::Value,
) -> Result<InputPoint, QueryError> {
    let entry = result
        .as_array()
        .and_then(|entries| entries.first())
        .ok_or_else(|| {
            QueryError::Provider("gettxspendingprevout returned no entries".to_string())
        })?;

    let Some(spending_txid) = entry.get("spendingtxid").and_then(|v| v.as_str()) else {
        return Err(QueryError::NotFound(format!("spend of {}", outpoint)));
    };
    let txid = Txid::from_str(spending_txid).map_err(|e| {
        QueryError::Provider(format!("bad spendingtxid {}: {}", spending_txid, e))
    })?;

    // bitcoind does not report which input of the spender consumed the point
    let index = entry
        .get("spendingvin")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;

    Ok(InputPoint { txid, index })
}

fn parse_scan_unspents(result: &serde_json::Value) -> Result<Vec<OutPoint>, QueryError> {
    let unspents = result
        .get("unspents")
        .and_then(|v| v.as_array())
        .ok_or_else(|| QueryError::Provider("scantxoutset returned no unspents".to_string()))?;

    let mut outpoints = Vec::with_capacity(unspents.len());
    for unspent in unspents {
        let txid = unspent
            .get("txid")
            .and_then(|v| v.as_str())
            .and_then(|s| Txid::from_str(s).ok())
            .ok_or_else(|| QueryError::Provider("scantxoutset entry missing txid".to_string()))?;
        let vout = unspent
            .get("vout")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| QueryError::Provider("scantxoutset entry missing vout".to_string()))?;
        outpoints.push(OutPoint {
            txid,
            vout: vout as u32,
        });
    }
    Ok(outpoints)
}

impl FetchProvider for ChainRpcProvider {
    fn fetch_block_header_by_depth(&self, depth: u64, handler: FetchHandler<Header>) {
        self.dispatch(handler, move |inner| inner.get_header_by_depth(depth));
    }

    fn fetch_block_header_by_hash(&self, hash: BlockHash, handler: FetchHandler<Header>) {
        self.dispatch(handler, move |inner| inner.get_header_by_hash(hash));
    }

    fn fetch_block_transaction_hashes_by_depth(
        &self,
        depth: u64,
        handler: FetchHandler<Vec<Txid>>,
    ) {
        self.dispatch(handler, move |inner| inner.get_tx_hashes_by_depth(depth));
    }

    fn fetch_block_transaction_hashes_by_hash(
        &self,
        hash: BlockHash,
        handler: FetchHandler<Vec<Txid>>,
    ) {
        self.dispatch(handler, move |inner| inner.get_tx_hashes_by_hash(hash));
    }

    fn fetch_block_depth(&self, hash: BlockHash, handler: FetchHandler<u64>) {
        self.dispatch(handler, move |inner| inner.get_block_depth(hash));
    }

    fn fetch_last_depth(&self, handler: FetchHandler<u64>) {
        self.dispatch(handler, move |inner| inner.get_last_depth());
    }

    fn fetch_transaction(&self, hash: Txid, handler: FetchHandler<Transaction>) {
        self.dispatch(handler, move |inner| inner.get_transaction(hash));
    }

    fn fetch_transaction_index(&self, hash: Txid, handler: FetchHandler<TxIndex>) {
        self.dispatch(handler, move |inner| inner.get_transaction_index(hash));
    }

    fn fetch_spend(&self, outpoint: OutPoint, handler: FetchHandler<InputPoint>) {
        self.dispatch(handler, move |inner| inner.get_spend(outpoint));
    }

    fn fetch_outputs(&self, address: Address, handler: FetchHandler<Vec<OutPoint>>) {
        self.dispatch(handler, move |inner| inner.get_outputs(address));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoincore_rpc::bitcoin::hashes::Hash;

    #[test]
    fn test_parse_spending_prevout() {
        let outpoint = OutPoint {
            txid: Txid::all_zeros(),
            vout: 1,
        };

        let unspent = serde_json::json!([{ "txid": outpoint.txid.to_string(), "vout": 1 }]);
        let err = parse_spending_prevout(&outpoint, &unspent).unwrap_err();
        assert!(err.is_not_found());

        let spent = serde_json::json!([{
            "txid": outpoint.txid.to_string(),
            "vout": 1,
            "spendingtxid": "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
        }]);
        let inpoint = parse_spending_prevout(&outpoint, &spent).unwrap();
        assert_eq!(
            inpoint.txid.to_string(),
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
        );
        assert_eq!(inpoint.index, 0);
    }

    #[test]
    fn test_parse_scan_unspents() {
        let result = serde_json::json!({
            "success": true,
            "unspents": [
                {
                    "txid": "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
                    "vout": 0,
                    "amount": 50.0,
                },
            ],
        });
        let outpoints = parse_scan_unspents(&result).unwrap();
        assert_eq!(outpoints.len(), 1);
        assert_eq!(outpoints[0].vout, 0);
    }
}
