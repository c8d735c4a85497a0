//! Address Service (§4.8): an ASN/CIDR cache plus the private-range
//! short-circuit. The cache itself is the same coarse-mutex-over-HashMap
//! idiom as [`crate::graph::Graph`] and the resolver's own
//! `resolver::back_end::cache::Cache`, without a TTL — ASN ownership data
//! doesn't expire meaningfully within a single run.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ipnet::IpNet;

use crate::bus::{Event, EventBus, Topic};
use crate::model::{AddrRequest, AsnRequest};
use crate::record_log::{LogEntry, RecordLog};
use crate::service::{ControlHandle, ServiceBase};

fn is_private(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(_) => false,
    }
}

#[derive(Default)]
struct AsnCache {
    by_asn: HashMap<u32, AsnRequest>,
}

impl AsnCache {
    /// The cached record whose netblock contains `addr` with the largest
    /// prefix length (smallest CIDR, §4.8 tie-break).
    fn lookup(&self, addr: IpAddr) -> Option<&AsnRequest> {
        self.by_asn
            .values()
            .filter(|rec| rec.netblocks.iter().any(|net| net.contains(&addr)))
            .max_by_key(|rec| rec.netblocks.iter().filter(|net| net.contains(&addr)).map(|net| net.prefix_len()).max().unwrap_or(0))
    }

    /// Merge `incoming` into the cache entry for its ASN: fill empty fields,
    /// union netblocks.
    fn merge(&mut self, incoming: AsnRequest) {
        let entry = self.by_asn.entry(incoming.asn).or_insert_with(|| AsnRequest::empty(incoming.asn));
        if entry.cc.is_none() {
            entry.cc = incoming.cc;
        }
        if entry.registry.is_none() {
            entry.registry = incoming.registry;
        }
        if entry.allocation_date.is_none() {
            entry.allocation_date = incoming.allocation_date;
        }
        if entry.description.is_none() {
            entry.description = incoming.description;
        }
        for net in incoming.netblocks {
            if !entry.netblocks.contains(&net) {
                entry.netblocks.push(net);
            }
        }
    }
}

pub struct AddressService {
    base: ServiceBase,
    bus: Arc<EventBus>,
    cache: Mutex<AsnCache>,
    seen_addrs: Mutex<HashSet<IpAddr>>,
    target_asns: Mutex<HashSet<u32>>,
    discovered_cidrs: Mutex<Vec<IpNet>>,
    record_log: Option<Arc<RecordLog>>,
}

impl AddressService {
    pub fn new(bus: Arc<EventBus>, target_asns: HashSet<u32>, record_log: Option<Arc<RecordLog>>) -> (Arc<Self>, ControlHandle) {
        let (handle, control) = crate::service::new_control();
        let svc = Arc::new(AddressService {
            base: ServiceBase::new("address_service", control),
            bus,
            cache: Mutex::new(AsnCache::default()),
            seen_addrs: Mutex::new(HashSet::new()),
            target_asns: Mutex::new(target_asns),
            discovered_cidrs: Mutex::new(Vec::new()),
            record_log,
        });
        (svc, handle)
    }

    pub fn is_active_for_poll(&self) -> bool {
        self.base.is_active()
    }

    pub fn start(self: &Arc<Self>) {
        let svc = Arc::clone(self);
        self.bus.subscribe_sync(Topic::NewAddr, move |event| {
            if let Event::NewAddr(req) = event {
                svc.on_new_addr(req);
            }
        });

        let svc = Arc::clone(self);
        self.bus.subscribe_sync(Topic::NewASN, move |event| {
            if let Event::NewASN(req) = event {
                svc.on_new_asn(req);
            }
        });

        let svc = Arc::clone(self);
        self.bus.subscribe_sync(Topic::IPRequest, move |event| {
            if let Event::IPRequest(req) = event {
                svc.on_ip_request(req);
            }
        });
    }

    fn on_new_addr(&self, req: AddrRequest) {
        self.base.active_flag().set_active();
        if !self.seen_addrs.lock().unwrap().insert(req.address) {
            return;
        }

        self.bus.publish(Topic::ActiveCert, Event::ActiveCert { address: req.address });

        if is_private(req.address) {
            return;
        }

        let cached = self.cache.lock().unwrap().lookup(req.address).cloned();
        match cached {
            Some(rec) => {
                if let Some(net) = smallest_containing(&rec.netblocks, req.address) {
                    self.bus.publish(Topic::ReverseSweep, Event::ReverseSweep { address: req.address, cidr: net });
                }
            }
            None => {
                self.bus.publish(Topic::IPToASN, Event::IPToASN(req));
            }
        }
    }

    fn on_new_asn(&self, req: AsnRequest) {
        self.base.active_flag().set_active();
        let asn = req.asn;
        let netblocks = req.netblocks.clone();
        if let Some(log) = &self.record_log {
            for net in &netblocks {
                log.append(&LogEntry::Infrastructure { uuid: log.run_id(), ts: chrono::Utc::now().to_rfc3339(), netblock: net.to_string(), asn });
            }
        }
        self.cache.lock().unwrap().merge(req);
        if self.target_asns.lock().unwrap().contains(&asn) {
            let mut discovered = self.discovered_cidrs.lock().unwrap();
            for net in netblocks {
                if !discovered.contains(&net) {
                    discovered.push(net);
                }
            }
        }
    }

    /// One-shot RPC per §4.8: synthesize a private-range answer directly,
    /// otherwise poll the cache for up to 10 seconds before publishing
    /// `IPInfo`, or time out silently.
    fn on_ip_request(&self, req: AddrRequest) {
        self.base.active_flag().set_active();

        if is_private(req.address) {
            let mut rec = AsnRequest::empty(0);
            rec.address = Some(req.address);
            rec.description = Some("Private Networks".to_string());
            self.bus.publish(Topic::IPInfo, Event::IPInfo(rec));
            return;
        }

        if let Some(rec) = self.cache.lock().unwrap().lookup(req.address).cloned() {
            self.bus.publish(Topic::IPInfo, Event::IPInfo(rec));
            return;
        }

        self.bus.publish(Topic::IPToASN, Event::IPToASN(req.clone()));
        for _ in 0..10 {
            std::thread::sleep(Duration::from_secs(1));
            if let Some(rec) = self.cache.lock().unwrap().lookup(req.address).cloned() {
                self.bus.publish(Topic::IPInfo, Event::IPInfo(rec));
                return;
            }
        }
    }

    pub fn discovered_cidrs(&self) -> Vec<IpNet> {
        self.discovered_cidrs.lock().unwrap().clone()
    }
}

fn smallest_containing(netblocks: &[IpNet], addr: IpAddr) -> Option<IpNet> {
    netblocks.iter().filter(|net| net.contains(&addr)).max_by_key(|net| net.prefix_len()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ranges_are_detected() {
        assert!(is_private("10.0.0.1".parse().unwrap()));
        assert!(is_private("172.16.5.5".parse().unwrap()));
        assert!(is_private("192.168.1.1".parse().unwrap()));
        assert!(!is_private("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn smallest_containing_prefers_narrowest_prefix() {
        let wide: IpNet = "10.0.0.0/8".parse().unwrap();
        let narrow: IpNet = "10.0.0.0/24".parse().unwrap();
        let addr: IpAddr = "10.0.0.5".parse().unwrap();
        let chosen = smallest_containing(&[wide, narrow], addr).unwrap();
        assert_eq!(chosen, narrow);
    }

    #[test]
    fn ip_request_for_private_address_synthesizes_reply_without_network() {
        let bus = Arc::new(EventBus::new());
        let (svc, _ctrl) = AddressService::new(Arc::clone(&bus), HashSet::new(), None);
        svc.start();

        let (_id, rx) = bus.subscribe_async(Topic::IPInfo);
        bus.publish(
            Topic::IPRequest,
            Event::IPRequest(AddrRequest { address: "10.0.0.1".parse().unwrap(), domain: String::new(), tag: crate::model::Tag::External, source: "test".to_string() }),
        );

        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Event::IPInfo(rec) => assert_eq!(rec.description, Some("Private Networks".to_string())),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn cache_merge_unions_netblocks_and_fills_empty_fields() {
        let mut cache = AsnCache::default();
        let mut first = AsnRequest::empty(64500);
        first.netblocks.push("10.0.0.0/8".parse().unwrap());
        cache.merge(first);

        let mut second = AsnRequest::empty(64500);
        second.description = Some("Example Org".to_string());
        second.netblocks.push("10.0.0.0/8".parse().unwrap());
        second.netblocks.push("172.16.0.0/12".parse().unwrap());
        cache.merge(second);

        let merged = cache.by_asn.get(&64500).unwrap();
        assert_eq!(merged.description, Some("Example Org".to_string()));
        assert_eq!(merged.netblocks.len(), 2);
    }
}
