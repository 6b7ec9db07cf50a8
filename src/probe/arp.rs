//! ARP table lookups for MAC presence and MAC-to-IP discovery.
//!
//! Reads the kernel neighbour table from `/proc/net/arp` and falls back to
//! `arp -an` where that file does not exist.

use std::net::IpAddr;
use std::process::Stdio;
use std::sync::OnceLock;

use regex::Regex;
use tokio::process::Command;

use super::ProbeError;

/// One complete entry of the neighbour table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpEntry {
    pub ip: IpAddr,
    /// Lower-case, colon separated.
    pub mac: String,
}

fn mac_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})$").unwrap())
}

/// True if `s` is a MAC address in `aa:bb:cc:dd:ee:ff` or `aa-bb-...` form.
pub fn is_mac_address(s: &str) -> bool {
    mac_regex().is_match(s)
}

/// Normalise a MAC for comparison, or `None` if it is malformed or all zero.
pub fn normalize_mac(s: &str) -> Option<String> {
    if !is_mac_address(s) {
        return None;
    }
    let mac = s.to_ascii_lowercase().replace('-', ":");
    if mac == "00:00:00:00:00:00" {
        return None;
    }
    Some(mac)
}

/// Parse the Linux `/proc/net/arp` format.
///
/// ```text
/// IP address       HW type     Flags       HW address            Mask     Device
/// 192.168.1.20     0x1         0x2         a4:83:e7:12:34:56     *        eth0
/// ```
///
/// Incomplete entries (flags `0x0`) are dropped.
pub fn parse_proc_arp(contents: &str) -> Vec<ArpEntry> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 || cols[2] == "0x0" {
                return None;
            }
            Some(ArpEntry {
                ip: cols[0].parse().ok()?,
                mac: normalize_mac(cols[3])?,
            })
        })
        .collect()
}

/// Parse BSD-style `arp -an` output: `? (192.168.1.20) at a4:83:e7:12:34:56 on en0 ...`
pub fn parse_arp_command(output: &str) -> Vec<ArpEntry> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\((?P<ip>[0-9a-fA-F.:]+)\)\s+at\s+(?P<mac>[0-9A-Fa-f:-]+)").unwrap()
    });

    re.captures_iter(output)
        .filter_map(|caps| {
            let ip = caps.name("ip")?.as_str().parse().ok()?;
            // BSD prints single-digit octets without padding
            let mac: Vec<String> = caps
                .name("mac")?
                .as_str()
                .split([':', '-'])
                .map(|octet| format!("{:0>2}", octet))
                .collect();
            Some(ArpEntry {
                ip,
                mac: normalize_mac(&mac.join(":"))?,
            })
        })
        .collect()
}

/// Read the current neighbour table.
pub async fn arp_table() -> Result<Vec<ArpEntry>, ProbeError> {
    match tokio::fs::read_to_string("/proc/net/arp").await {
        Ok(contents) => return Ok(parse_proc_arp(&contents)),
        Err(e) => tracing::debug!("/proc/net/arp unavailable ({}), using arp command", e),
    }

    let output = Command::new("arp")
        .arg("-an")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute arp: {}", e)))?;

    if !output.status.success() {
        return Err(ProbeError::Command("arp exited with failure".to_string()));
    }

    Ok(parse_arp_command(&String::from_utf8_lossy(&output.stdout)))
}

/// Look up the MAC currently recorded for `ip`.
pub async fn lookup_mac(ip: IpAddr) -> Result<Option<String>, ProbeError> {
    Ok(arp_table()
        .await?
        .into_iter()
        .find(|entry| entry.ip == ip)
        .map(|entry| entry.mac))
}

/// Look up the IP currently leased to `mac`.
pub async fn lookup_ip(mac: &str) -> Result<Option<IpAddr>, ProbeError> {
    let wanted = normalize_mac(mac)
        .ok_or_else(|| ProbeError::Config(format!("invalid MAC address: {}", mac)))?;
    Ok(arp_table()
        .await?
        .into_iter()
        .find(|entry| entry.mac == wanted)
        .map(|entry| entry.ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_ARP: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.20     0x1         0x2         a4:83:e7:12:34:56     *        eth0
192.168.1.21     0x1         0x0         00:00:00:00:00:00     *        eth0
192.168.1.22     0x1         0x2         B8-27-EB-AA-BB-CC     *        wlan0
";

    #[test]
    fn test_mac_validation() {
        assert!(is_mac_address("a4:83:e7:12:34:56"));
        assert!(is_mac_address("A4-83-E7-12-34-56"));
        assert!(!is_mac_address("192.168.1.20"));
        assert!(!is_mac_address("a4:83:e7:12:34"));
        assert_eq!(normalize_mac("00:00:00:00:00:00"), None);
        assert_eq!(
            normalize_mac("A4-83-E7-12-34-56").as_deref(),
            Some("a4:83:e7:12:34:56")
        );
    }

    #[test]
    fn test_parse_proc_arp_drops_incomplete() {
        let entries = parse_proc_arp(PROC_ARP);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].ip, "192.168.1.20".parse::<IpAddr>().unwrap());
        assert_eq!(entries[0].mac, "a4:83:e7:12:34:56");
        assert_eq!(entries[1].mac, "b8:27:eb:aa:bb:cc");
    }

    #[test]
    fn test_parse_arp_command_bsd() {
        let output = "\
? (192.168.1.1) at 0:1a:2b:3c:4d:5e on en0 ifscope [ethernet]
? (192.168.1.9) at (incomplete) on en0 ifscope [ethernet]
";
        let entries = parse_arp_command(output);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mac, "00:1a:2b:3c:4d:5e");
    }
}
