// ── Management subnet discovery ──

use std::net::Ipv4Addr;

use tracing::{debug, trace};

use crate::connector::DeviceConnector;
use crate::error::CoreError;

/// Largest subnet a scan will walk.
const MIN_PREFIX: u8 = 16;

/// Usable host addresses of an IPv4 CIDR, in ascending order.
///
/// Network and broadcast addresses are excluded except for `/31` and `/32`,
/// where every address is a host.
pub fn hosts(cidr: &str) -> Result<Vec<Ipv4Addr>, CoreError> {
    let invalid = |why: &str| CoreError::config(format!("invalid mgmt_subnet '{cidr}': {why}"));

    let (addr, prefix) = cidr.trim().split_once('/').ok_or_else(|| invalid("expected a.b.c.d/len"))?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid("bad address"))?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid("bad prefix length"))?;
    if prefix > 32 {
        return Err(invalid("prefix length above 32"));
    }
    if prefix < MIN_PREFIX {
        return Err(invalid("subnet too large to scan"));
    }

    let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
    let network = u32::from(addr) & mask;
    let broadcast = network | !mask;

    let (first, last) = if prefix >= 31 {
        (network, broadcast)
    } else {
        (network + 1, broadcast - 1)
    };
    Ok((first..=last).map(Ipv4Addr::from).collect())
}

/// Probe every host of `cidr` on `port`, one at a time, and return the
/// ones that accepted a TCP connection.
pub async fn scan(
    connector: &dyn DeviceConnector,
    cidr: &str,
    port: u16,
    mut on_probe: impl FnMut(Ipv4Addr, bool),
) -> Result<Vec<Ipv4Addr>, CoreError> {
    let mut candidates = Vec::new();
    for ip in hosts(cidr)? {
        let host = ip.to_string();
        let open = match connector.probe(&host, port).await {
            Ok(()) => true,
            Err(err) => {
                trace!(host, error = %err, "probe failed");
                false
            }
        };
        if open {
            debug!(host, port, "candidate found");
            candidates.push(ip);
        }
        on_probe(ip, open);
    }
    Ok(candidates)
}
