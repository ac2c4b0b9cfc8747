//! Address Resolution
//!
//! Turns host and service strings into ordered socket address candidates.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use anyhow::{anyhow, bail, Context};
use tokio::net::lookup_host;
use tracing::debug;

use crate::Result;

const SERVICES_FILE: &str = "/etc/services";

/// Resolve a service name or numeric port to a TCP port
pub fn resolve_service(service: &str) -> Result<u16> {
    if let Ok(port) = service.parse::<u16>() {
        return Ok(port);
    }

    lookup_service_in(Path::new(SERVICES_FILE), service)?
        .ok_or_else(|| anyhow!("Unknown service: {}", service))
}

/// Find a tcp entry for `service` in a services(5) style file
pub fn lookup_service_in(path: &Path, service: &str) -> Result<Option<u16>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    Ok(parse_services(&content, service))
}

fn parse_services(content: &str, service: &str) -> Option<u16> {
    content.lines().find_map(|line| {
        let line = line.split('#').next().unwrap_or_default();
        let mut fields = line.split_whitespace();
        let name = fields.next()?;
        let (port, protocol) = fields.next()?.split_once('/')?;
        if protocol != "tcp" {
            return None;
        }

        let mut names = std::iter::once(name).chain(fields);
        if names.any(|alias| alias == service) {
            port.parse().ok()
        } else {
            None
        }
    })
}

/// Resolve the listening side.
///
/// Without a host both wildcard addresses are candidates. Without a service
/// the port is 0 and the system picks one.
pub async fn resolve_bind(host: Option<&str>, service: Option<&str>) -> Result<Vec<SocketAddr>> {
    let port = match service {
        Some(service) => resolve_service(service)?,
        None => 0,
    };

    match host {
        None => Ok(vec![
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
        ]),
        Some(host) => resolve_host(host, port).await,
    }
}

/// Resolve the forward target
pub async fn resolve_connect(host: &str, service: &str) -> Result<Vec<SocketAddr>> {
    let port = resolve_service(service)?;
    resolve_host(host, port).await
}

async fn resolve_host(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    // Bracketed IPv6 literals are accepted as well as bare ones
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .with_context(|| format!("Failed to resolve {} port {}", host, port))?
        .collect();

    if addrs.is_empty() {
        bail!("Resolution of {} port {} returned no addresses", host, port);
    }

    debug!("Resolved {}:{} to {:?}", host, port, addrs);
    Ok(addrs)
}
