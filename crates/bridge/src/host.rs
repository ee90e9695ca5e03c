//! Container host address discovery.
//!
//! The relay runs on the container host, which is the gateway of the
//! default route. It is read from `/proc/net/route` once at startup.

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use thiserror::Error;

/// Kernel routing table.
pub const ROUTE_TABLE_PATH: &str = "/proc/net/route";

const RTF_UP: u32 = 0x0001;
const RTF_GATEWAY: u32 = 0x0002;

/// Errors raised while discovering the host address.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("failed to read routing table: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed routing table line: {0}")]
    Malformed(String),

    #[error("no default route with a gateway")]
    NoDefaultRoute,
}

/// Returns the gateway of the default route from the routing table at `path`.
pub fn default_gateway(path: impl AsRef<Path>) -> Result<Ipv4Addr, HostError> {
    let table = fs::read_to_string(path)?;
    parse_default_gateway(&table)
}

/// Finds the default route's gateway in `/proc/net/route` contents.
///
/// Columns are whitespace separated; destination, gateway and flags are
/// hex, with addresses in host (little-endian) byte order.
pub fn parse_default_gateway(table: &str) -> Result<Ipv4Addr, HostError> {
    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < 4 {
            return Err(HostError::Malformed(line.to_string()));
        }

        let destination = parse_hex(fields[1], line)?;
        let gateway = parse_hex(fields[2], line)?;
        let flags = parse_hex(fields[3], line)?;

        if destination == 0 && flags & (RTF_UP | RTF_GATEWAY) == RTF_UP | RTF_GATEWAY {
            let addr = Ipv4Addr::from(gateway.to_le_bytes());
            tracing::debug!(interface = fields[0], gateway = %addr, "Found default route");
            return Ok(addr);
        }
    }

    Err(HostError::NoDefaultRoute)
}

fn parse_hex(field: &str, line: &str) -> Result<u32, HostError> {
    u32::from_str_radix(field, 16).map_err(|_| HostError::Malformed(line.to_string()))
}
