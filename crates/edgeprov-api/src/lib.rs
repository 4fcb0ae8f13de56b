// edgeprov-api: RouterOS API client, stand-in devices, and the directory JSON-RPC client

pub mod client;
pub mod command;
pub mod connection;
pub mod directory;
pub mod dry_run;
pub mod error;
pub mod probe;
pub mod protocol;
pub mod sim;
pub mod transport;

pub use client::RouterOsClient;
pub use command::{Command, Record, Response};
pub use connection::{ConnectionInfo, DEFAULT_API_PORT, DeviceConnection};
pub use directory::DirectoryClient;
pub use dry_run::DryRunDevice;
pub use error::{Error, TrapKind};
pub use probe::probe;
pub use sim::SimulatedDevice;
pub use transport::{TlsMode, TransportConfig};
