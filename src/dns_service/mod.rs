//! DNS Service (§4.5): resolves names against a user-supplied resolver
//! pool, filters untrusted wildcard matches, and drives reverse sweeps.

pub mod asn_lookup;
pub mod resolver;
pub mod reverse_sweep;
pub mod wildcard;

use std::net::IpAddr;
use std::sync::Arc;

use crate::bus::{Event, EventBus, Topic};
use crate::config::DomainRegex;
use crate::dns;
use crate::dns::Name;
use crate::model::{DnsRequest, Record, RecordKind, Tag};
use crate::service::{ControlHandle, ServiceBase};
use crate::shared::thread_pool::ThreadPool;

pub use resolver::ResolverPool;
pub use wildcard::WildcardCache;

pub struct DnsService {
    base: ServiceBase,
    bus: Arc<EventBus>,
    scope: Arc<DomainRegex>,
    pool: ResolverPool,
    wildcards: WildcardCache,
    workers: ThreadPool,
    reverse_sweep_window: usize,
}

impl DnsService {
    pub fn new(bus: Arc<EventBus>, scope: Arc<DomainRegex>, pool: ResolverPool, worker_threads: usize, reverse_sweep_window: usize) -> (Arc<Self>, ControlHandle) {
        let (handle, control) = crate::service::new_control();
        let svc = Arc::new(DnsService {
            base: ServiceBase::new("dns_service", control),
            bus,
            scope,
            pool,
            wildcards: WildcardCache::new(),
            workers: ThreadPool::new(worker_threads, "dns"),
            reverse_sweep_window,
        });
        (svc, handle)
    }

    pub fn is_active_for_poll(&self) -> bool {
        self.base.is_active()
    }

    pub fn start(self: &Arc<Self>) {
        let svc = Arc::clone(self);
        self.bus.subscribe_sync(Topic::ResolveName, move |event| {
            if let Event::ResolveName(req) = event {
                let svc = Arc::clone(&svc);
                svc.workers.execute(move || svc.resolve(req));
            }
        });

        let svc = Arc::clone(self);
        self.bus.subscribe_sync(Topic::ReverseSweep, move |event| {
            if let Event::ReverseSweep { address, cidr } = event {
                let svc = Arc::clone(&svc);
                svc.workers.execute(move || svc.sweep(address, cidr));
            }
        });

        let svc = Arc::clone(self);
        self.bus.subscribe_sync(Topic::IPToASN, move |event| {
            if let Event::IPToASN(req) = event {
                let svc = Arc::clone(&svc);
                svc.workers.execute(move || svc.resolve_asn(req.address));
            }
        });
    }

    fn resolve_asn(&self, address: IpAddr) {
        self.base.active_flag().set_active();
        if let Some(rec) = asn_lookup::lookup(address, &self.pool) {
            self.bus.publish(Topic::NewASN, Event::NewASN(rec));
        }
    }

    fn resolve(&self, mut req: DnsRequest) {
        self.base.active_flag().set_active();

        let node = match Name::from_string(&req.name) {
            Ok(n) => n,
            Err(_) => return,
        };

        if let Some(domain) = self.scope.which_domain(&req.name) {
            self.wildcards.sample_if_needed(&domain, &self.pool);
        }

        let mut records = Vec::new();
        let mut addresses = Vec::new();
        for rtype in resolver::INITIAL_QUERY_TYPES {
            let resp = match self.pool.query(&node, *rtype) {
                Ok(resp) if resp.header.resp_code == dns::RespCode::NoError => resp,
                _ => continue,
            };
            for rec in &resp.answers {
                if let Some(parsed) = to_model_record(rec) {
                    if let dns::Record::A { .. } = rec {
                        addresses.push(IpAddr::from(*rec.a_data()));
                    }
                    if let dns::Record::AAAA { address, .. } = rec {
                        addresses.push(IpAddr::from(*address));
                    }
                    records.push(parsed);
                }
            }
        }

        if records.is_empty() {
            return;
        }

        if !req.tag.is_trusted() {
            if let Some(domain) = self.scope.which_domain(&req.name) {
                if self.wildcards.is_wildcard_match(&domain, &addresses) {
                    return;
                }
            }
        }

        req.records = Some(records);
        self.bus.publish(Topic::NameResolved, Event::NameResolved(req));
    }

    fn sweep(&self, seed: IpAddr, cidr: ipnet::IpNet) {
        self.base.active_flag().set_active();
        for target in reverse_sweep::sweep_targets(seed, cidr, self.reverse_sweep_window) {
            if let Some(name) = reverse_sweep::reverse_lookup(target, &self.pool) {
                self.bus.publish(
                    Topic::NewName,
                    Event::NewName(DnsRequest {
                        name: name.as_ref().to_string(),
                        domain: String::new(),
                        tag: Tag::Dns,
                        source: "reverse_sweep".to_string(),
                        records: None,
                    }),
                );
            }
        }
    }
}

fn to_model_record(rec: &dns::Record) -> Option<Record> {
    let kind = match rec.record_type() {
        dns::RecordType::A => RecordKind::A,
        dns::RecordType::AAAA => RecordKind::AAAA,
        dns::RecordType::CNAME => RecordKind::CNAME,
        dns::RecordType::PTR => RecordKind::PTR,
        dns::RecordType::NS => RecordKind::NS,
        dns::RecordType::MX => RecordKind::MX,
        dns::RecordType::SRV => RecordKind::SRV,
        dns::RecordType::TXT => RecordKind::TXT,
        _ => return None,
    };
    let name = rec.node().as_ref().to_lowercase();
    let data = match rec {
        dns::Record::A { .. } => IpAddr::from(*rec.a_data()).to_string(),
        dns::Record::AAAA { address, .. } => IpAddr::from(*address).to_string(),
        dns::Record::CNAME { .. } => rec.cname_data().as_ref().to_lowercase(),
        dns::Record::PTR { .. } => rec.ptr_data().as_ref().to_lowercase(),
        dns::Record::NS { .. } => rec.ns_data().as_ref().to_lowercase(),
        dns::Record::MX { .. } => rec.mx_data().1.as_ref().to_lowercase(),
        dns::Record::SRV { .. } => rec.srv_data().3.as_ref().to_lowercase(),
        dns::Record::TXT { .. } => rec.txt_data().join(""),
        _ => return None,
    };
    let kind = if kind == RecordKind::TXT && data.starts_with("v=spf1") { RecordKind::SPF } else { kind };
    Some(Record { kind, name, data })
}
