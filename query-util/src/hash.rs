use crate::error::QueryError;
use bitcoincore_rpc::bitcoin::{Address, BlockHash, Network, Txid};
use std::str::FromStr;

/// Key validation for caller-supplied lookup keys. Anything malformed is
/// rejected here as `InvalidInput` before it reaches the fetch provider.
pub fn parse_txid(s: &str) -> Result<Txid, QueryError> {
    Txid::from_str(s).map_err(|e| QueryError::invalid("transaction hash", format!("{}: {}", s, e)))
}

pub fn parse_block_hash(s: &str) -> Result<BlockHash, QueryError> {
    BlockHash::from_str(s).map_err(|e| QueryError::invalid("block hash", format!("{}: {}", s, e)))
}

pub fn parse_address(s: &str, network: Network) -> Result<Address, QueryError> {
    let addr = Address::from_str(s)
        .map_err(|e| QueryError::invalid("address", format!("{}: {}", s, e)))?;
    addr.require_network(network)
        .map_err(|e| QueryError::invalid("address", format!("network mismatch for {}: {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_txid_rejects_wrong_length() {
        let err = parse_txid("deadbeef").unwrap_err();
        assert!(matches!(err, QueryError::InvalidInput { what, .. } if what == "transaction hash"));

        let txid =
            parse_txid("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b").unwrap();
        assert_eq!(
            txid.to_string(),
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
        );
    }

    #[test]
    fn test_parse_address_network_mismatch() {
        // Genesis coinbase address is mainnet; asking for regtest must fail
        let err = parse_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", Network::Regtest)
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidInput { .. }));

        let addr = parse_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", Network::Bitcoin).unwrap();
        assert_eq!(addr.to_string(), "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa");
    }
}
