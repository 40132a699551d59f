//! Where providers should dial.
//!
//! After binding, the gatherer writes two files into its data directory:
//! `portnum` with the bound port, so a restart configured with port 0 comes
//! back on the same port, and `gatherer.addr` with a comma-separated
//! `host:port` list (local address first, then loopback) that a provider can
//! pass straight to `--gatherer`.

use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use tracing::{info, warn};

pub const PORTNUM_FILE: &str = "portnum";
pub const ADDR_FILE: &str = "gatherer.addr";

/// Pick the address to bind: the configured one, or with port 0 the port
/// remembered from a previous run.
pub fn resolve_listen_addr(data_dir: &Path, configured: SocketAddr) -> SocketAddr {
    if configured.port() != 0 {
        return configured;
    }

    let path = data_dir.join(PORTNUM_FILE);
    match fs::read_to_string(&path) {
        Ok(contents) => match contents.trim().parse::<u16>() {
            Ok(port) if port != 0 => SocketAddr::new(configured.ip(), port),
            _ => {
                warn!(path = %path.display(), "ignoring unreadable port file");
                configured
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => configured,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read port file");
            configured
        }
    }
}

/// Comma-separated dial list for a gatherer bound to `bound`.
///
/// A wildcard bind advertises `local_ip` (when known) followed by loopback;
/// a specific bind advertises only itself.
#[must_use]
pub fn location_for(bound: SocketAddr, local_ip: Option<IpAddr>) -> String {
    let port = bound.port();
    if !bound.ip().is_unspecified() {
        return SocketAddr::new(bound.ip(), port).to_string();
    }

    let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let mut hosts = Vec::with_capacity(2);
    if let Some(ip) = local_ip.filter(|ip| *ip != loopback) {
        hosts.push(ip);
    }
    hosts.push(loopback);
    hosts
        .into_iter()
        .map(|ip| SocketAddr::new(ip, port).to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Write the port and address files for a gatherer bound to `bound` and
/// return the published location.
pub fn publish_address(data_dir: &Path, bound: SocketAddr) -> io::Result<String> {
    fs::create_dir_all(data_dir)?;

    let local_ip = match local_ip_address::local_ip() {
        Ok(ip) => Some(ip),
        Err(e) => {
            warn!(error = %e, "no local address found, advertising loopback only");
            None
        }
    };
    let location = location_for(bound, local_ip);

    fs::write(data_dir.join(PORTNUM_FILE), format!("{}\n", bound.port()))?;
    fs::write(data_dir.join(ADDR_FILE), format!("{location}\n"))?;
    info!(%location, "gatherer address published");
    Ok(location)
}
