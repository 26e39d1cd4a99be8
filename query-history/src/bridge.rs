use crate::provider::FetchHandler;
use query_util::QueryError;
use std::sync::mpsc;
use std::time::Duration;

/// Turns one callback-based fetch into a blocking call.
///
/// The completion slot is a bounded(1) channel: the handler moves the sender
/// into itself and fires at most once, the calling thread blocks on the
/// receiving side until the result is observable. There is no retry; without
/// a timeout the call blocks for as long as the provider takes. The caller
/// thread is consumed for the full duration of the fetch, so high fan-out
/// synchronous use needs a matching caller-side thread pool.
pub fn fetch_blocking<T, F>(fetch: F) -> Result<T, QueryError>
where
    T: Send + 'static,
    F: FnOnce(FetchHandler<T>),
{
    fetch_blocking_opt(fetch, None)
}

/// Same as [`fetch_blocking`], but gives up after `timeout` and reports
/// `QueryError::Timeout`. A completion that arrives after expiry is dropped.
pub fn fetch_blocking_timeout<T, F>(fetch: F, timeout: Duration) -> Result<T, QueryError>
where
    T: Send + 'static,
    F: FnOnce(FetchHandler<T>),
{
    fetch_blocking_opt(fetch, Some(timeout))
}

fn fetch_blocking_opt<T, F>(fetch: F, timeout: Option<Duration>) -> Result<T, QueryError>
where
    T: Send + 'static,
    F: FnOnce(FetchHandler<T>),
{
    let (slot, completion) = mpsc::sync_channel::<Result<T, QueryError>>(1);

    let handler: FetchHandler<T> = Box::new(move |result| {
        // A send only fails when the bridge already gave up (timeout path);
        // the result is dropped in that case.
        let _ = slot.try_send(result);
    });
    fetch(handler);

    match timeout {
        None => completion.recv().map_err(|_| {
            QueryError::Provider("fetch completion dropped without firing".to_string())
        })?,
        Some(timeout) => completion.recv_timeout(timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => QueryError::Timeout(timeout),
            mpsc::RecvTimeoutError::Disconnected => {
                QueryError::Provider("fetch completion dropped without firing".to_string())
            }
        })?,
    }
}
