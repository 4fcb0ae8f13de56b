// Live RouterOS API session
//
// One authenticated TCP session per client. Commands are strictly
// sequential: the framed stream sits behind an async mutex and each
// command reads replies until its `!done`.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::command::{Command, Record, Response};
use crate::connection::ConnectionInfo;
use crate::error::Error;
use crate::protocol::{ApiCodec, Reply};

/// Authenticated RouterOS API session.
pub struct RouterOsClient {
    host: String,
    timeout: Duration,
    framed: Mutex<Framed<TcpStream, ApiCodec>>,
}

impl std::fmt::Debug for RouterOsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterOsClient")
            .field("host", &self.host)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RouterOsClient {
    /// Open a TCP session and log in with `/login =name= =password=`.
    pub async fn connect(info: &ConnectionInfo, timeout: Duration) -> Result<Self, Error> {
        let addr = format!("{}:{}", info.host, info.port);
        debug!(host = %info.host, port = info.port, "connecting to device");

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout {
                host: info.host.clone(),
                timeout_ms: duration_ms(timeout),
            })?
            .map_err(|source| Error::Connect {
                host: info.host.clone(),
                source,
            })?;

        let client = Self {
            host: info.host.clone(),
            timeout,
            framed: Mutex::new(Framed::new(stream, ApiCodec)),
        };
        client.login(&info.username, info.password.expose_secret()).await?;
        debug!(host = %info.host, user = %info.username, "device session established");
        Ok(client)
    }

    async fn login(&self, username: &str, password: &str) -> Result<(), Error> {
        let cmd = Command::new("/login")
            .arg("name", username)
            .arg("password", password);
        match self.run(&cmd).await {
            Ok(resp) if resp.ret.is_some() => Err(Error::Authentication {
                message: "device requested legacy challenge login (pre-6.43 firmware)".into(),
            }),
            Ok(_) => Ok(()),
            Err(Error::Trap { message, .. }) => Err(Error::Authentication { message }),
            Err(e) => Err(e),
        }
    }

    /// The device address this session talks to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Send one command and collect its reply.
    ///
    /// A `!trap` is surfaced as [`Error::Trap`] after the trailing `!done`
    /// has been consumed, so the session stays usable.
    pub async fn run(&self, cmd: &Command) -> Result<Response, Error> {
        let mut framed = self.framed.lock().await;
        trace!(host = %self.host, path = cmd.path(), "sending command");
        framed.send(cmd.to_sentence()).await?;

        let mut records = Vec::new();
        let mut trap: Option<Error> = None;
        loop {
            let next = tokio::time::timeout(self.timeout, framed.next())
                .await
                .map_err(|_| Error::Timeout {
                    host: self.host.clone(),
                    timeout_ms: duration_ms(self.timeout),
                })?;
            let Some(sentence) = next else {
                return Err(Error::Protocol(format!(
                    "connection to {} closed mid-reply",
                    self.host
                )));
            };
            match Reply::parse(sentence?)? {
                Reply::Row(attrs) => records.push(Record::from(attrs)),
                Reply::Trap { category, message } => {
                    debug!(host = %self.host, path = cmd.path(), %message, "device trap");
                    trap.get_or_insert_with(|| Error::trap(cmd.path(), category, message));
                }
                Reply::Done(attrs) => {
                    if let Some(err) = trap {
                        return Err(err);
                    }
                    return Ok(Response {
                        records,
                        ret: attrs.get("ret").cloned(),
                    });
                }
                Reply::Fatal(message) => return Err(Error::Fatal(message)),
            }
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
