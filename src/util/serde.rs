use std::net::{SocketAddr, ToSocketAddrs};

use serde::de::{Error, Unexpected};
use serde::{Deserialize, Deserializer};

/// Deserialize a list of `host:port` strings into socket addresses.
///
/// Host names are resolved, the first resolved address wins.
pub fn to_socket_addrs_vec<'de, D>(d: D) -> Result<Vec<SocketAddr>, D::Error>
where
    D: Deserializer<'de>,
{
    let addrs = Vec::<String>::deserialize(d)?;
    addrs.iter().map(|addr| resolve::<D>(addr)).collect()
}

fn resolve<'de, D>(addr: &str) -> Result<SocketAddr, D::Error>
where
    D: Deserializer<'de>,
{
    // Try to resolve as host and port
    if let Ok(mut resolved) = addr.to_socket_addrs() {
        if let Some(addr) = resolved.next() {
            return Ok(addr);
        }
    }

    // Parse raw IP address
    addr.parse().map_err(|_| {
        Error::invalid_value(Unexpected::Str(addr), &"IP or resolvable host and port")
    })
}
