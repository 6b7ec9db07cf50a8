//! Hostname resolution against custom DNS servers using raw UDP packets.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::UdpSocket;

use super::ProbeError;

/// Resolve `name` to its first A record, asking `servers` in order.
pub async fn resolve_a(
    name: &str,
    servers: &[String],
    timeout: Duration,
) -> Result<Ipv4Addr, ProbeError> {
    let mut last_err = ProbeError::Resolution(format!("no DNS servers configured for {}", name));

    for server in servers {
        match query_server(name, server, timeout).await {
            Ok(ip) => return Ok(ip),
            Err(e) => {
                tracing::debug!("DNS lookup of {} via {} failed: {}", name, server, e);
                last_err = e;
            }
        }
    }

    Err(last_err)
}

async fn query_server(name: &str, server: &str, timeout: Duration) -> Result<Ipv4Addr, ProbeError> {
    let server_addr = if server.contains(':') {
        server.to_string()
    } else {
        format!("{}:53", server)
    };

    let tx_id: u16 = rand::random();
    let packet = build_query(tx_id, name)?;

    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| ProbeError::Network(format!("failed to bind socket: {}", e)))?;
    socket
        .connect(&server_addr)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to connect: {}", e)))?;
    socket
        .send(&packet)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to send: {}", e)))?;

    let mut response = [0u8; 512];
    let n = tokio::time::timeout(timeout, socket.recv(&mut response))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Network(format!("failed to recv: {}", e)))?;

    parse_a_response(&response[..n], tx_id)?
        .into_iter()
        .next()
        .ok_or_else(|| ProbeError::Resolution(format!("no A record for {}", name)))
}

/// Build a recursive query for the A record of `name`.
fn build_query(tx_id: u16, name: &str) -> Result<Vec<u8>, ProbeError> {
    let mut packet = Vec::with_capacity(64);
    packet.extend_from_slice(&tx_id.to_be_bytes());
    packet.extend_from_slice(&0x0100u16.to_be_bytes()); // standard query, recursion desired
    packet.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    packet.extend_from_slice(&[0; 6]); // AN, NS, AR counts

    for label in name.trim_end_matches('.').split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(ProbeError::Config(format!("invalid hostname: {}", name)));
        }
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);

    packet.extend_from_slice(&1u16.to_be_bytes()); // QTYPE A
    packet.extend_from_slice(&1u16.to_be_bytes()); // QCLASS IN

    Ok(packet)
}

/// Skip a possibly compressed name starting at `pos`, returning the offset after it.
fn skip_name(buf: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let len = *buf.get(pos)?;
        if len & 0xC0 == 0xC0 {
            return Some(pos + 2);
        }
        if len == 0 {
            return Some(pos + 1);
        }
        pos += 1 + len as usize;
    }
}

fn read_u16(buf: &[u8], pos: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*buf.get(pos)?, *buf.get(pos + 1)?]))
}

/// Extract the A records from a response to query `tx_id`.
fn parse_a_response(buf: &[u8], tx_id: u16) -> Result<Vec<Ipv4Addr>, ProbeError> {
    let malformed = || ProbeError::Network("malformed DNS response".to_string());

    if buf.len() < 12 {
        return Err(ProbeError::Network(format!(
            "response too short: {} bytes",
            buf.len()
        )));
    }

    let resp_tx_id = u16::from_be_bytes([buf[0], buf[1]]);
    if resp_tx_id != tx_id {
        return Err(ProbeError::Network(format!(
            "transaction ID mismatch: got {}, expected {}",
            resp_tx_id, tx_id
        )));
    }

    let rcode = buf[3] & 0x0F;
    if rcode != 0 {
        return Err(ProbeError::Resolution(format!("DNS error RCODE: {}", rcode)));
    }

    let qd_count = read_u16(buf, 4).ok_or_else(malformed)?;
    let an_count = read_u16(buf, 6).ok_or_else(malformed)?;

    let mut pos = 12;
    for _ in 0..qd_count {
        pos = skip_name(buf, pos).ok_or_else(malformed)? + 4;
    }

    let mut records = Vec::new();
    for _ in 0..an_count {
        pos = skip_name(buf, pos).ok_or_else(malformed)?;
        let rtype = read_u16(buf, pos).ok_or_else(malformed)?;
        let rdlength = read_u16(buf, pos + 8).ok_or_else(malformed)? as usize;
        let rdata = buf.get(pos + 10..pos + 10 + rdlength).ok_or_else(malformed)?;

        if rtype == 1 && rdlength == 4 {
            records.push(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]));
        }
        pos += 10 + rdlength;
    }

    Ok(records)
}
