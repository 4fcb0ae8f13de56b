use std::time::Duration;

use tokio::net::TcpStream;
use tracing::trace;

use crate::error::Error;

/// TCP-connect to `host:port` and hang up. Success only means something is
/// listening; it says nothing about credentials.
pub async fn probe(host: &str, port: u16, timeout: Duration) -> Result<(), Error> {
    let addr = format!("{host}:{port}");
    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(_stream)) => {
            trace!(host, port, "probe accepted");
            Ok(())
        }
        Ok(Err(source)) => Err(Error::Connect {
            host: host.to_owned(),
            source,
        }),
        Err(_) => Err(Error::Timeout {
            host: host.to_owned(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}
