//! One-shot UDP queries against a user-supplied resolver pool (§4.5),
//! grounded directly on the recursive resolver's own wire I/O
//! (`resolver::back_end::requests::{send_query, send_udp_packet,
//! build_dns_request}`) but simplified: we are a stub resolver, not an
//! authoritative-chasing one, so there's no delegation/alias walk here —
//! just "ask a resolver, get an answer or move to the next one".

use std::net::{IpAddr, UdpSocket};
use std::time::Duration;

use crate::dns;
use crate::dns::Name;

#[derive(Debug)]
pub enum ResolveErr {
    Io(String),
    Decode(String),
    MismatchedId,
    NoAnswer,
}

/// Round-robins over a fixed resolver list. Cheap to clone (just an index
/// and a shared address list), so each resolving thread can hold its own.
#[derive(Clone)]
pub struct ResolverPool {
    resolvers: std::sync::Arc<Vec<IpAddr>>,
    next: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    retries: usize,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl ResolverPool {
    pub fn new(resolvers: Vec<IpAddr>, retries: usize, read_timeout: Duration, write_timeout: Duration) -> Self {
        ResolverPool {
            resolvers: std::sync::Arc::new(resolvers),
            next: std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            retries,
            read_timeout,
            write_timeout,
        }
    }

    fn pick(&self) -> IpAddr {
        let i = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % self.resolvers.len();
        self.resolvers[i]
    }

    /// Query `node` for `record_type`, retrying against the next resolver
    /// in the pool on network failure. A valid response (even `NXDOMAIN` or
    /// an empty answer section) is returned as-is; retries are reserved for
    /// transport failures, not negative answers (§4.5 errors policy).
    pub fn query(&self, node: &Name, record_type: dns::RecordType) -> Result<dns::Message, ResolveErr> {
        let mut last_err = ResolveErr::NoAnswer;
        for _ in 0..self.retries.max(1) {
            let resolver = self.pick();
            match self.send_query(resolver, node, record_type) {
                Ok(msg) => return Ok(msg),
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    fn send_query(&self, resolver: IpAddr, node: &Name, record_type: dns::RecordType) -> Result<dns::Message, ResolveErr> {
        let request = build_request(node, record_type);
        let request_bytes = request.encode_to_bytes().map_err(|e| ResolveErr::Decode(format!("{:?}", e)))?;

        let (response_bytes, n_recv) = send_udp_packet(resolver, &request_bytes, self.read_timeout, self.write_timeout)
            .map_err(|e| ResolveErr::Io(e.to_string()))?;

        let response = dns::Message::decode_from_bytes(&response_bytes[..n_recv]).map_err(|e| ResolveErr::Decode(format!("{:?}", e)))?;

        if response.header.id != request.header.id {
            return Err(ResolveErr::MismatchedId);
        }
        Ok(response)
    }
}

fn build_request(node: &Name, record_type: dns::RecordType) -> dns::Message {
    let mut header = dns::Header::default();
    header.questions_count = 1;
    header.recursion_desired = true;
    let question = dns::Question { node: node.clone(), record_type, class: dns::Class::IN };
    dns::Message { header, questions: vec![question], answers: vec![], authorities: vec![], additionals: vec![] }
}

fn send_udp_packet(addr: IpAddr, bytes: &[u8], read_timeout: Duration, write_timeout: Duration) -> std::io::Result<([u8; 512], usize)> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_write_timeout(Some(write_timeout))?;
    socket.set_read_timeout(Some(read_timeout))?;
    socket.send_to(bytes, (addr, 53))?;
    let mut buffer = [0_u8; 512];
    let (n_recv, _) = socket.recv_from(&mut buffer)?;
    Ok((buffer, n_recv))
}

/// The record types always attempted for a new name (§4.5 `InitialQueryTypes`).
pub const INITIAL_QUERY_TYPES: &[dns::RecordType] = &[
    dns::RecordType::A,
    dns::RecordType::AAAA,
    dns::RecordType::CNAME,
    dns::RecordType::NS,
    dns::RecordType::MX,
    dns::RecordType::SRV,
    dns::RecordType::TXT,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_round_robins_across_resolvers() {
        let pool = ResolverPool::new(vec!["1.1.1.1".parse().unwrap(), "8.8.8.8".parse().unwrap()], 2, Duration::from_millis(1), Duration::from_millis(1));
        let first = pool.pick();
        let second = pool.pick();
        assert_ne!(first, second);
    }
}
