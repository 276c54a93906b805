//! Small helpers for pulling the network location out of configured party
//! addresses, which may or may not carry a scheme.

use crate::errors::*;

use url::Url;

/// `host:port` (or bare host when no explicit port) of an address.
/// Addresses without a scheme are treated as `http://`.
pub fn netloc(address: &str) -> Result<String> {
    let parsed = parse(address)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| error::validation(format!("address {} has no host", address)))?;
    Ok(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_owned(),
    })
}

/// Just the host of an address, with any port stripped.
pub fn host(address: &str) -> Result<String> {
    let parsed = parse(address)?;
    parsed
        .host_str()
        .map(str::to_owned)
        .ok_or_else(|| error::validation(format!("address {} has no host", address)))
}

//
// Private functions
//

fn parse(address: &str) -> Result<Url> {
    let with_scheme = if address.contains("://") {
        address.to_owned()
    } else {
        format!("http://{}", address)
    };
    Url::parse(&with_scheme).chain_err(|| format!("Error parsing address {}", address))
}

//
// Tests
//
