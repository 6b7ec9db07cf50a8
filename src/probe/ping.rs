//! ICMP echo reachability with native sockets and a `ping` command fallback.
//!
//! Native sockets are driven from `spawn_blocking` so the read timeout is the
//! probe deadline.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::ProbeError;

#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Native;
    }

    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Native;
    }

    tracing::info!("Ping probe: native ICMP unavailable, using command fallback");
    IcmpCapability::CommandOnly
}

/// Send one echo request and wait for the matching reply.
///
/// Returns the round-trip time on success.
pub async fn ping(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);

    if capability == IcmpCapability::Native {
        let ip = resolve_address(address).await?;

        let result = tokio::task::spawn_blocking(move || blocking_echo(ip, timeout))
            .await
            .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))?;

        return match result {
            Err(ProbeError::PermissionDenied(msg)) => {
                tracing::warn!(
                    "Native ping to {} not permitted, falling back to command: {}",
                    address,
                    msg
                );
                ping_command(address, timeout).await
            }
            other => other,
        };
    }

    ping_command(address, timeout).await
}

async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| ProbeError::Resolution(format!("{}: {}", address, e)))?
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Resolution(format!("no addresses found for {}", address)))
}

fn io_error(context: &str, e: std::io::Error) -> ProbeError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        ProbeError::PermissionDenied(format!("{}: {}", context, e))
    } else {
        ProbeError::Network(format!("{}: {}", context, e))
    }
}

fn blocking_echo(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let (domain, protocol) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };

    let socket = Socket::new(domain, Type::RAW, Some(protocol))
        .or_else(|_| Socket::new(domain, Type::DGRAM, Some(protocol)))
        .map_err(|e| io_error("failed to create ICMP socket", e))?;

    socket
        .set_read_timeout(Some(timeout))
        .map_err(|e| io_error("failed to set timeout", e))?;
    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| io_error("failed to set timeout", e))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| io_error("failed to connect", e))?;

    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let packet = echo_request(ip.is_ipv6(), identifier, sequence);

    let start = Instant::now();
    socket
        .send(&packet)
        .map_err(|e| io_error("failed to send", e))?;

    loop {
        let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
        let len = socket.recv(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                ProbeError::Timeout(timeout)
            }
            _ => io_error("failed to receive", e),
        })?;
        // SAFETY: recv initialized the first `len` bytes
        let buf: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }

        if is_echo_reply(buf, ip.is_ipv6(), identifier, sequence) {
            return Ok(elapsed);
        }
    }
}

/// Check whether `buf` is the reply to our request.
///
/// RAW IPv4 sockets deliver the IP header in front of the ICMP message.
fn is_echo_reply(buf: &[u8], v6: bool, identifier: u16, sequence: u16) -> bool {
    let (offset, reply_type) = if v6 {
        (0, 129)
    } else if !buf.is_empty() && buf[0] >> 4 == 4 {
        (((buf[0] & 0x0F) as usize) * 4, 0)
    } else {
        (0, 0)
    };

    if buf.len() < offset + 8 {
        return false;
    }

    let icmp = &buf[offset..];
    // DGRAM sockets may rewrite the identifier, so only the sequence is checked there
    let id_matches = u16::from_be_bytes([icmp[4], icmp[5]]) == identifier || offset == 0;
    icmp[0] == reply_type && id_matches && u16::from_be_bytes([icmp[6], icmp[7]]) == sequence
}

/// Build an echo request (ICMPv4 type 8, ICMPv6 type 128).
///
/// The kernel fills in the ICMPv6 checksum.
fn echo_request(v6: bool, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = if v6 { 128 } else { 8 };
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    packet[8..16].copy_from_slice(b"presence");

    if !v6 {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// RFC 1071 checksum.
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
            [hi] => (*hi as u32) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Run the system `ping` once; exit status 0 means a reply arrived.
async fn ping_command(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1);
    let start = Instant::now();

    let output = Command::new("ping")
        .args(["-c", "1", "-W", &timeout_secs.to_string(), address])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    if output.status.success() {
        Ok(start.elapsed())
    } else {
        Err(ProbeError::Timeout(timeout))
    }
}
