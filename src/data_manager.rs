//! Data Manager (§4.6): ingests resolved records into the [`Graph`] and
//! re-fans-out discovered names/addresses. The per-record-type dispatch
//! here mirrors the resolver handler's per-response-shape dispatch
//! (`resolver::handler::handle_query`'s match over `NsResponse`), just
//! keyed on record type instead of response shape.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::bus::{Event, EventBus, Topic};
use crate::config::DomainRegex;
use crate::graph::{classify, EdgeLabel, Graph, NodeKind};
use crate::model::{AddrRequest, AsnRequest, DnsRequest, Output, OutputAddress, RecordKind, Tag};
use crate::record_log::{LogEntry, RecordLog};
use crate::service::{ControlHandle, ServiceBase};

const IP_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct DataManager {
    base: ServiceBase,
    bus: Arc<EventBus>,
    scope: Arc<DomainRegex>,
    graph: Arc<Graph>,
    active_mode: bool,
    record_log: Option<Arc<RecordLog>>,
}

impl DataManager {
    pub fn new(bus: Arc<EventBus>, scope: Arc<DomainRegex>, graph: Arc<Graph>, active_mode: bool, record_log: Option<Arc<RecordLog>>) -> (Arc<Self>, ControlHandle) {
        let (handle, control) = crate::service::new_control();
        let svc = Arc::new(DataManager { base: ServiceBase::new("data_manager", control), bus, scope, graph, active_mode, record_log });
        (svc, handle)
    }

    fn log(&self, build: impl FnOnce(uuid::Uuid, String) -> LogEntry) {
        if let Some(log) = &self.record_log {
            let entry = build(log.run_id(), chrono::Utc::now().to_rfc3339());
            log.append(&entry);
        }
    }

    /// Link `name` to its root Domain node via `ROOT_OF` (invariant 3 in
    /// §3: every Subdomain has exactly one `ROOT_OF` parent). A no-op for
    /// names outside every configured domain's scope.
    fn link_root(&self, name: &str) {
        if let Some(domain) = self.scope.which_domain(name) {
            self.graph.insert_node(&domain, NodeKind::Domain);
            self.graph.insert_edge(&domain, EdgeLabel::RootOf, name);
        }
    }

    pub fn is_active_for_poll(&self) -> bool {
        self.base.is_active()
    }

    pub fn start(self: &Arc<Self>) {
        let svc = Arc::clone(self);
        self.bus.subscribe_sync(Topic::NameResolved, move |event| {
            if let Event::NameResolved(req) = event {
                svc.on_name_resolved(req);
            }
        });
    }

    /// First insertion of a root Domain node publishes `NewName` for the
    /// root itself; subsequent calls are no-ops (idempotent per §4.6).
    pub fn insert_domain(&self, domain: &str) {
        if self.graph.has_node(domain) {
            return;
        }
        self.graph.insert_node(domain, NodeKind::Domain);
        self.graph.insert_node(domain, NodeKind::Subdomain);
        self.log(|uuid, ts| LogEntry::Domain { uuid, ts, name: domain.to_string() });
        self.bus.publish(
            Topic::NewName,
            Event::NewName(DnsRequest { name: domain.to_string(), domain: domain.to_string(), tag: Tag::External, source: "config".to_string(), records: None }),
        );
    }

    fn on_name_resolved(&self, req: DnsRequest) {
        self.base.active_flag().set_active();
        let name = req.name.clone();
        self.graph.insert_node(&name, NodeKind::Subdomain);
        self.link_root(&name);

        let records = match &req.records {
            Some(r) => r,
            None => return,
        };

        for rec in records {
            let data = rec.data.to_lowercase();
            match rec.kind {
                RecordKind::A | RecordKind::AAAA => {
                    self.handle_address(&name, &req, &data, rec.kind == RecordKind::AAAA);
                }
                RecordKind::CNAME => self.handle_cname(&name, &data),
                RecordKind::PTR => self.handle_ptr(&name, &data),
                RecordKind::NS => self.handle_ns_or_mx(&name, &data, NodeKind::Ns, EdgeLabel::NsTo),
                RecordKind::MX => self.handle_ns_or_mx(&name, &data, NodeKind::Mx, EdgeLabel::MxTo),
                RecordKind::SRV => self.handle_srv(&name, &data),
                RecordKind::TXT | RecordKind::SPF => self.handle_text(&name, &data),
            }
        }

        self.maybe_emit_output(&name, &req);
    }

    /// Graph sweep counterpart to the incremental derivation above (§4.7):
    /// walk every Domain's `ROOT_OF` children and retry emission for each.
    /// Needed because a CNAME chain can finish resolving out of order, e.g.
    /// `www` CNAMEs to `cdn` but `cdn`'s own `A` record resolves afterward,
    /// so `www`'s address isn't reachable yet at `www`'s own resolution time.
    /// The driver runs this periodically and once more before termination.
    pub fn sweep_outputs(&self) {
        for domain in self.graph.domain_nodes() {
            for name in self.graph.subdomains_of(&domain) {
                let req = DnsRequest { name: name.clone(), domain: domain.clone(), tag: Tag::Dns, source: "graph_sweep".to_string(), records: None };
                self.maybe_emit_output(&name, &req);
            }
        }
    }

    /// Output derivation (§4.7): once `name` has a reachable address (direct
    /// or via its CNAME chain), enrich each with netblock/ASN/description and
    /// publish it, guarded so a Subdomain is emitted at most once.
    fn maybe_emit_output(&self, name: &str, req: &DnsRequest) {
        let domain = match self.scope.which_domain(name) {
            Some(d) => d,
            None => return,
        };

        let addrs = self.graph.addresses_of(name);
        if addrs.is_empty() {
            return;
        }
        if !self.graph.mark_sent_if_unsent(name) {
            return;
        }

        let kinds = self.graph.node_kinds(name);
        let classification = classify(name, &kinds);
        let addresses = addrs
            .iter()
            .filter_map(|a| a.parse::<IpAddr>().ok())
            .map(|ip| self.output_address(ip))
            .collect();

        self.bus.publish(
            Topic::Output,
            Event::Output(Output { name: name.to_string(), domain, addresses, tag: req.tag, source: req.source.clone(), classification }),
        );
    }

    fn output_address(&self, ip: IpAddr) -> OutputAddress {
        let info = self.lookup_ip_info(ip);
        let netblock = info.as_ref().and_then(|rec| rec.netblocks.iter().filter(|net| net.contains(&ip)).max_by_key(|net| net.prefix_len())).copied();
        let asn = info.as_ref().filter(|rec| rec.asn != 0).map(|rec| rec.asn);
        let description = info.and_then(|rec| rec.description);
        OutputAddress { ip, netblock, asn, description }
    }

    /// One-shot RPC over the bus (§9 design note): subscribe to `IPInfo`,
    /// publish `IPRequest`, and return the first reply for `address` within
    /// `IP_REQUEST_TIMEOUT`, or `None` on timeout.
    fn lookup_ip_info(&self, address: IpAddr) -> Option<AsnRequest> {
        let (_id, rx) = self.bus.subscribe_async(Topic::IPInfo);
        self.bus.publish(
            Topic::IPRequest,
            Event::IPRequest(AddrRequest { address, domain: String::new(), tag: Tag::External, source: "output_derivation".to_string() }),
        );

        let deadline = std::time::Instant::now() + IP_REQUEST_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match rx.recv_timeout(remaining) {
                Ok(Event::IPInfo(rec)) if rec.address == Some(address) => return Some(rec),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    fn handle_address(&self, name: &str, req: &DnsRequest, addr_str: &str, is_v6: bool) {
        let addr: IpAddr = match addr_str.parse() {
            Ok(a) => a,
            Err(_) => return,
        };
        self.graph.insert_node(addr_str, NodeKind::IpAddress);
        let label = if is_v6 { EdgeLabel::AaaaTo } else { EdgeLabel::ATo };
        self.graph.insert_edge(name, label, addr_str);
        if is_v6 {
            self.log(|uuid, ts| LogEntry::Aaaa { uuid, ts, from: name.to_string(), addr: addr_str.to_string() });
        } else {
            self.log(|uuid, ts| LogEntry::A { uuid, ts, from: name.to_string(), addr: addr_str.to_string() });
        }

        if self.active_mode && self.scope.is_in_scope(name) {
            self.bus.publish(Topic::ActiveCert, Event::ActiveCert { address: addr });
        }

        self.bus.publish(
            Topic::NewAddr,
            Event::NewAddr(AddrRequest { address: addr, domain: req.domain.clone(), tag: req.tag, source: req.source.clone() }),
        );
    }

    fn handle_cname(&self, name: &str, target: &str) {
        self.graph.insert_node(target, NodeKind::Subdomain);
        self.link_root(target);
        self.graph.insert_edge(name, EdgeLabel::CnameTo, target);
        self.log(|uuid, ts| LogEntry::Cname { uuid, ts, from: name.to_string(), to: target.to_string() });
        let target_domain = subdomain_to_domain(target, &self.scope);
        self.bus.publish(
            Topic::NewName,
            Event::NewName(DnsRequest { name: target.to_string(), domain: target_domain, tag: Tag::Dns, source: "dns".to_string(), records: None }),
        );
    }

    fn handle_ptr(&self, name: &str, target: &str) {
        if !self.scope.is_in_scope(target) {
            return;
        }
        self.graph.insert_node(target, NodeKind::Subdomain);
        self.link_root(target);
        self.graph.insert_edge(name, EdgeLabel::PtrTo, target);
        self.log(|uuid, ts| LogEntry::Ptr { uuid, ts, from: name.to_string(), to: target.to_string() });
        self.bus.publish(
            Topic::NewName,
            Event::NewName(DnsRequest { name: target.to_string(), domain: subdomain_to_domain(target, &self.scope), tag: Tag::Dns, source: "dns".to_string(), records: None }),
        );
    }

    fn handle_ns_or_mx(&self, name: &str, target: &str, kind: NodeKind, label: EdgeLabel) {
        self.graph.insert_node(target, kind.clone());
        self.graph.insert_node(target, NodeKind::Subdomain);
        self.link_root(target);
        self.graph.insert_edge(name, label.clone(), target);
        match kind {
            NodeKind::Ns => self.log(|uuid, ts| LogEntry::Ns { uuid, ts, from: name.to_string(), to: target.to_string() }),
            NodeKind::Mx => self.log(|uuid, ts| LogEntry::Mx { uuid, ts, from: name.to_string(), to: target.to_string() }),
            _ => {}
        }

        let name_domain = self.scope.which_domain(name);
        let target_domain = self.scope.which_domain(target);
        if name_domain != target_domain {
            self.bus.publish(
                Topic::NewName,
                Event::NewName(DnsRequest { name: target.to_string(), domain: target_domain.unwrap_or_default(), tag: Tag::Dns, source: "dns".to_string(), records: None }),
            );
        }
    }

    fn handle_srv(&self, name: &str, target: &str) {
        self.graph.insert_node(target, NodeKind::Subdomain);
        self.link_root(target);
        self.graph.insert_edge(name, EdgeLabel::ServiceFor, target);
        self.graph.insert_edge(name, EdgeLabel::SrvTo, target);
        self.log(|uuid, ts| LogEntry::Srv { uuid, ts, from: name.to_string(), to: target.to_string() });
        if self.scope.is_in_scope(target) {
            self.bus.publish(
                Topic::NewName,
                Event::NewName(DnsRequest { name: target.to_string(), domain: subdomain_to_domain(target, &self.scope), tag: Tag::Dns, source: "dns".to_string(), records: None }),
            );
        }
    }

    fn handle_text(&self, name: &str, text: &str) {
        if let Some(re) = ipv4_literal_regex() {
            for m in re.find_iter(text) {
                if let Ok(addr) = m.as_str().parse::<IpAddr>() {
                    self.bus.publish(
                        Topic::NewAddr,
                        Event::NewAddr(AddrRequest { address: addr, domain: self.scope.which_domain(name).unwrap_or_default(), tag: Tag::Dns, source: "txt".to_string() }),
                    );
                }
            }
        }
        if let Some(re) = subdomain_like_regex() {
            for m in re.find_iter(text) {
                let candidate = m.as_str().to_string();
                if self.scope.is_in_scope(&candidate) {
                    self.bus.publish(
                        Topic::NewName,
                        Event::NewName(DnsRequest { name: candidate.clone(), domain: subdomain_to_domain(&candidate, &self.scope), tag: Tag::Dns, source: "txt".to_string(), records: None }),
                    );
                }
            }
        }
    }
}

fn subdomain_to_domain(name: &str, scope: &DomainRegex) -> String {
    scope.which_domain(name).unwrap_or_else(|| name.to_string())
}

fn ipv4_literal_regex() -> Option<Regex> {
    Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").ok()
}

fn subdomain_like_regex() -> Option<Regex> {
    Regex::new(r"(?i)\b(?:[a-z0-9_-]+\.)+[a-z]{2,}\b").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    #[test]
    fn subdomain_to_domain_falls_back_to_name() {
        let scope = DomainRegex::new(&["example.com".to_string()]);
        assert_eq!(subdomain_to_domain("other.test", &scope), "other.test");
        assert_eq!(subdomain_to_domain("a.example.com", &scope), "example.com");
    }

    #[test]
    fn insert_domain_appends_to_record_log_when_configured() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("subsonar-data-manager-test-{}.jsonl", uuid::Uuid::new_v4()));
        let log = Arc::new(RecordLog::create(path.to_str().unwrap()).unwrap());

        let bus = Arc::new(EventBus::new());
        let scope = Arc::new(DomainRegex::new(&["example.com".to_string()]));
        let graph = Arc::new(Graph::new());
        let (dm, _ctrl) = DataManager::new(bus, scope, graph, false, Some(Arc::clone(&log)));

        dm.insert_domain("example.com");
        dm.insert_domain("example.com");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("\"domain\""));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn resolved_names_are_linked_to_their_root_domain() {
        let bus = Arc::new(EventBus::new());
        let scope = Arc::new(DomainRegex::new(&["example.com".to_string()]));
        let graph = Arc::new(Graph::new());
        let (dm, _ctrl) = DataManager::new(Arc::clone(&bus), scope, Arc::clone(&graph), false, None);

        dm.on_name_resolved(DnsRequest {
            name: "www.example.com".to_string(),
            domain: "example.com".to_string(),
            tag: Tag::External,
            source: "test".to_string(),
            records: None,
        });

        assert_eq!(graph.subdomains_of("example.com"), vec!["www.example.com".to_string()]);
    }

    #[test]
    fn cname_targets_are_linked_to_their_root_domain() {
        let bus = Arc::new(EventBus::new());
        let scope = Arc::new(DomainRegex::new(&["example.com".to_string()]));
        let graph = Arc::new(Graph::new());
        let (dm, _ctrl) = DataManager::new(bus, scope, Arc::clone(&graph), false, None);

        dm.handle_cname("alias.example.com", "target.example.com");

        assert_eq!(graph.subdomains_of("example.com"), vec!["target.example.com".to_string()]);
    }

    #[test]
    fn resolving_a_name_with_an_address_publishes_output_exactly_once() {
        let bus = Arc::new(EventBus::new());
        let scope = Arc::new(DomainRegex::new(&["example.com".to_string()]));
        let graph = Arc::new(Graph::new());
        let (dm, _ctrl) = DataManager::new(Arc::clone(&bus), scope, Arc::clone(&graph), false, None);

        bus.subscribe_sync(Topic::IPRequest, move |event| {
            if let Event::IPRequest(req) = event {
                let mut rec = AsnRequest::empty(64500);
                rec.address = Some(req.address);
                rec.description = Some("Example Org".to_string());
                rec.netblocks.push("93.184.0.0/24".parse().unwrap());
                bus.publish(Topic::IPInfo, Event::IPInfo(rec));
            }
        });

        let (_id, output_rx) = bus.subscribe_async(Topic::Output);

        let req = DnsRequest {
            name: "www.example.com".to_string(),
            domain: "example.com".to_string(),
            tag: Tag::External,
            source: "test".to_string(),
            records: Some(vec![crate::model::Record { kind: RecordKind::A, name: "www.example.com".to_string(), data: "93.184.0.1".to_string() }]),
        };
        dm.on_name_resolved(req.clone());

        let output = match output_rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Event::Output(out) => out,
            other => panic!("unexpected event: {:?}", other),
        };
        assert_eq!(output.name, "www.example.com");
        assert_eq!(output.domain, "example.com");
        assert_eq!(output.addresses.len(), 1);
        assert_eq!(output.addresses[0].ip, "93.184.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(output.addresses[0].asn, Some(64500));
        assert_eq!(output.addresses[0].description, Some("Example Org".to_string()));

        dm.on_name_resolved(req);
        assert!(output_rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
