//! Gateway identity - device id and reported IP address

use std::fs;
use std::net::{IpAddr, UdpSocket};
use std::path::Path;
use tracing::{debug, warn};

pub const FALLBACK_DEVICE_ID: &str = "AA:BB:CC:DD:EE:FF";

const NET_CLASS_ROOT: &str = "/sys/class/net";

/// Resolve the gateway id: configured value, else first MAC address, else fallback
pub fn resolve_device_id(configured: Option<&str>) -> String {
    if let Some(id) = configured {
        return id.to_string();
    }

    match mac_address(Path::new(NET_CLASS_ROOT)) {
        Some(mac) => mac,
        None => {
            warn!(fallback = %FALLBACK_DEVICE_ID, "mac_address_not_found");
            FALLBACK_DEVICE_ID.to_string()
        }
    }
}

/// First non-loopback, non-zero MAC address under a sysfs net root,
/// interfaces taken in name order
pub fn mac_address(net_root: &Path) -> Option<String> {
    let mut interfaces: Vec<_> = fs::read_dir(net_root)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    interfaces.sort();

    interfaces.into_iter().find_map(|dir| {
        let name = dir.file_name()?.to_str()?;
        if name == "lo" {
            return None;
        }
        let raw = fs::read_to_string(dir.join("address")).ok()?;
        let mac = raw.trim().to_ascii_uppercase();
        if mac.is_empty() || mac == "00:00:00:00:00:00" {
            return None;
        }
        debug!(interface = %name, mac = %mac, "mac_address_found");
        Some(mac)
    })
}

/// Local address of the interface that routes to the internet
///
/// Connecting a UDP socket sends nothing; it only selects a route.
pub fn local_ip_address() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// IP address as reported in status messages
pub fn reported_ip_address() -> String {
    local_ip_address().map(|ip| ip.to_string()).unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn add_interface(root: &Path, name: &str, mac: &str) {
        let dir = root.join(name);
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("address"), format!("{}\n", mac)).unwrap();
    }

    #[test]
    fn test_configured_id_wins() {
        assert_eq!(resolve_device_id(Some("greenhouse-7")), "greenhouse-7");
    }

    #[test]
    fn test_mac_skips_loopback_and_zero() {
        let root = tempdir().unwrap();
        add_interface(root.path(), "lo", "00:00:00:00:00:00");
        add_interface(root.path(), "dummy0", "00:00:00:00:00:00");
        add_interface(root.path(), "eth0", "dc:a6:32:01:02:03");
        add_interface(root.path(), "wlan0", "dc:a6:32:0a:0b:0c");

        assert_eq!(mac_address(root.path()).as_deref(), Some("DC:A6:32:01:02:03"));
    }

    #[test]
    fn test_mac_missing_root() {
        assert_eq!(mac_address(Path::new("/nonexistent/net")), None);
    }
}
