//! Active-cert Service (§4.5.active, 4.6): connects to a live address on
//! the configured ports and extracts subject/SAN names from its TLS
//! certificate, publishing each as a new trusted name. Grounded on the
//! TLS-handshake-then-inspect pattern other DoH/DNS-over-TLS clients in
//! the broader corpus use around `native_tls::TlsConnector`.

use std::net::{IpAddr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use native_tls::TlsConnector;

use crate::bus::{Event, EventBus, Topic};
use crate::model::{DnsRequest, Tag};
use crate::service::{ControlHandle, ServiceBase};
use crate::shared::thread_pool::ThreadPool;

pub struct ActiveCertService {
    base: ServiceBase,
    bus: Arc<EventBus>,
    ports: Vec<u16>,
    workers: ThreadPool,
}

impl ActiveCertService {
    pub fn new(bus: Arc<EventBus>, ports: Vec<u16>, worker_threads: usize) -> (Arc<Self>, ControlHandle) {
        let (handle, control) = crate::service::new_control();
        let svc = Arc::new(ActiveCertService { base: ServiceBase::new("active_cert_service", control), bus, ports, workers: ThreadPool::new(worker_threads, "cert") });
        (svc, handle)
    }

    pub fn start(self: &Arc<Self>) {
        let svc = Arc::clone(self);
        self.bus.subscribe_sync(Topic::ActiveCert, move |event| {
            if let Event::ActiveCert { address } = event {
                let svc = Arc::clone(&svc);
                svc.workers.execute(move || svc.probe(address));
            }
        });
    }

    fn probe(&self, address: IpAddr) {
        self.base.active_flag().set_active();
        for &port in &self.ports {
            if let Some(names) = fetch_cert_names(address, port) {
                for name in names {
                    self.bus.publish(
                        Topic::NewName,
                        Event::NewName(DnsRequest { name, domain: String::new(), tag: Tag::Cert, source: "active_cert".to_string(), records: None }),
                    );
                }
            }
        }
    }
}

/// Connect to `(address, port)` over TLS and return the certificate's
/// subject + SAN dNSNames. Returns `None` on any connection, handshake,
/// or parsing failure — active-cert collection is best-effort (§7).
fn fetch_cert_names(address: IpAddr, port: u16) -> Option<Vec<String>> {
    let connector = TlsConnector::builder().danger_accept_invalid_certs(true).danger_accept_invalid_hostnames(true).build().ok()?;
    let socket_addr = SocketAddr::new(address, port);
    let stream = TcpStream::connect_timeout(&socket_addr, Duration::from_secs(5)).ok()?;
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok()?;

    let tls_stream = connector.connect(&address.to_string(), stream).ok()?;
    let cert = tls_stream.peer_certificate().ok()??;
    let der = cert.to_der().ok()?;
    Some(parse_dns_names_from_der(&der))
}

/// Minimal scan for ASCII-looking dotted hostnames embedded in the DER
/// bytes of a certificate. A full X.509 SAN parser is out of scope here;
/// this mirrors the "scan text for subdomain-like strings" approach the
/// Data Manager already applies to TXT records (§4.6).
fn parse_dns_names_from_der(der: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(der);
    let re = regex::Regex::new(r"(?i)\b(?:[a-z0-9_-]+\.)+[a-z]{2,}\b").unwrap();
    re.find_iter(&text).map(|m| m.as_str().to_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hostnames_from_der_like_text() {
        let der = b"\x30\x82garbage www.example.com more garbage api.example.com\x00\x01";
        let names = parse_dns_names_from_der(der);
        assert!(names.contains(&"www.example.com".to_string()));
        assert!(names.contains(&"api.example.com".to_string()));
    }
}
