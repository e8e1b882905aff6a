//! Host/port matching for service-to-service credential lookup.

use std::net::IpAddr;

use crate::error::AuthError;
use crate::snapshot::Node;

/// Credentials granting admin access to a service on some node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceCredentials {
    /// Admin user of the node's memcached-protocol services.
    pub memcached_user: String,
    /// Special user for HTTP services.
    pub http_user: String,
    /// Password shared by both users.
    pub password: String,
}

impl ServiceCredentials {
    /// Returns `true` when the host:port did not match any node.
    pub fn is_empty(&self) -> bool {
        self.memcached_user.is_empty()
    }
}

fn parse_ip(host: &str) -> Option<IpAddr> {
    host.parse::<IpAddr>().ok().map(|ip| ip.to_canonical())
}

/// Whether `host` refers to `node`.
///
/// Matches when the node's host is loopback, when the queried host is
/// loopback and the node is local, when both are equal IP addresses, or when
/// the names are textually equal.
pub fn match_host(node: &Node, host: &str) -> bool {
    let node_ip = parse_ip(&node.host);
    let host_ip = parse_ip(host);

    if node_ip.is_some_and(|ip| ip.is_loopback()) {
        return true;
    }
    if host_ip.is_some_and(|ip| ip.is_loopback()) && node.local {
        return true;
    }

    match (node_ip, host_ip) {
        (Some(node_ip), Some(host_ip)) => node_ip == host_ip,
        _ => host == node.host,
    }
}

/// Returns the node's `(user, password)` if it serves `host:port`. Nodes
/// without a user yield nothing.
pub fn node_credentials<'a>(node: &'a Node, host: &str, port: u16) -> Option<(&'a str, &'a str)> {
    if node.user.is_empty() || !match_host(node, host) || !node.ports.contains(&port) {
        return None;
    }
    Some((node.user.as_str(), node.password.as_str()))
}

/// Finds the credentials for `host:port` among `nodes`, first match wins.
pub fn find_credentials<'a>(nodes: &'a [Node], host: &str, port: u16) -> Option<(&'a str, &'a str)> {
    nodes
        .iter()
        .find_map(|node| node_credentials(node, host, port))
}

/// Splits `host:port`, accepting bracketed IPv6 hosts (`[::1]:9000`).
///
/// # Errors
///
/// Returns `AuthError::InvalidHostPort` if the port is missing or not a
/// valid number, or the host is empty.
pub fn split_host_port(host_port: &str) -> Result<(&str, u16), AuthError> {
    let invalid = || AuthError::invalid_host_port(host_port);

    let (host, port) = if let Some(rest) = host_port.strip_prefix('[') {
        let (host, rest) = rest.split_once(']').ok_or_else(invalid)?;
        let port = rest.strip_prefix(':').ok_or_else(invalid)?;
        (host, port)
    } else {
        let (host, port) = host_port.rsplit_once(':').ok_or_else(invalid)?;
        if host.contains(':') {
            // Unbracketed IPv6 literal
            return Err(invalid());
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host, port))
}
