pub const QUERY_HISTORY_SERVICE_NAME: &str = "query-history";

// Default upper bound for one blocking fetch against the chain backend
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
