//! Name Service (§4.4): the single choke point every discovered name passes
//! through before resolution. Dedup here is what keeps publish/subscribe
//! loops (DNS -> Data Manager -> DNS) from running forever (§4.1).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::bus::{Event, EventBus, Topic};
use crate::config::DomainRegex;
use crate::graph::Graph;
use crate::model::{DnsRequest, Tag};
use crate::service::{ControlHandle, ServiceBase};

const SERVICE_LABELS: [&str; 3] = ["_tcp", "_udp", "_tls"];

/// Two independent dedup filters, partitioned by trust (§3, §9): trusted
/// names bypass wildcard filtering downstream but still dedup here so a
/// name seen via `dns` and again via `cert` doesn't double-resolve.
struct Filters {
    trusted_seen: HashSet<String>,
    untrusted_seen: HashSet<String>,
    /// distinct resolved names observed under each subdomain, for the
    /// monotonically non-decreasing `count` carried on `NewSubdomain`.
    subdomain_counts: std::collections::HashMap<String, HashSet<String>>,
}

impl Filters {
    fn new() -> Self {
        Filters { trusted_seen: HashSet::new(), untrusted_seen: HashSet::new(), subdomain_counts: std::collections::HashMap::new() }
    }
}

pub struct NameService {
    base: ServiceBase,
    bus: Arc<EventBus>,
    scope: Arc<DomainRegex>,
    graph: Arc<Graph>,
    passive: bool,
    filters: Mutex<Filters>,
}

impl NameService {
    /// Builds the service along with the [`ControlHandle`] the driver uses
    /// to quit/pause/resume it.
    pub fn new(bus: Arc<EventBus>, scope: Arc<DomainRegex>, graph: Arc<Graph>, passive: bool) -> (Arc<Self>, ControlHandle) {
        let (handle, control) = crate::service::new_control();
        let svc = Arc::new(NameService {
            base: ServiceBase::new("name_service", control),
            bus,
            scope,
            graph,
            passive,
            filters: Mutex::new(Filters::new()),
        });
        (svc, handle)
    }

    /// Read-and-clear activity flag for the driver's termination poll
    /// (§4.2, §4.11).
    pub fn is_active_for_poll(&self) -> bool {
        self.base.is_active()
    }

    /// `OnStart` (§4.2): subscribe to the topics this service reacts to.
    /// Both handlers are cheap (no network I/O), so they run inline on the
    /// publisher's thread as synchronous subscribers rather than behind
    /// their own worker loop.
    pub fn start(self: &Arc<Self>) {
        let svc = Arc::clone(self);
        self.bus.subscribe_sync(Topic::NewName, move |event| {
            if let Event::NewName(req) = event {
                svc.on_new_name(req);
            }
        });
        let svc = Arc::clone(self);
        self.bus.subscribe_sync(Topic::NameResolved, move |event| {
            if let Event::NameResolved(req) = event {
                svc.on_name_resolved(req);
            }
        });
    }

    /// Normalize a raw discovered name: lowercase, strip a leading `*.`
    /// wildcard label, strip the trailing dot. Idempotent.
    pub fn normalize(name: &str) -> String {
        let lower = name.to_lowercase();
        let stripped = lower.strip_prefix("*.").unwrap_or(&lower);
        stripped.trim_end_matches('.').to_string()
    }

    /// Entry point for `NewName` events: dedup by trust partition, then
    /// hand off to resolution (or, in passive mode, straight to output).
    pub fn on_new_name(&self, mut req: DnsRequest) {
        req.name = Self::normalize(&req.name);
        req.domain = Self::normalize(&req.domain);

        {
            let mut filters = self.filters.lock().unwrap();
            let seen = if req.tag.is_trusted() { &mut filters.trusted_seen } else { &mut filters.untrusted_seen };
            if !seen.insert(req.name.clone()) {
                return;
            }
        }
        self.base.active_flag().set_active();

        if self.passive {
            self.bus.publish(
                Topic::Output,
                Event::Output(crate::model::Output {
                    name: req.name.clone(),
                    domain: req.domain.clone(),
                    addresses: vec![],
                    tag: req.tag,
                    source: req.source.clone(),
                    classification: crate::model::Classification::Normal,
                }),
            );
            return;
        }

        self.bus.publish(Topic::ResolveName, Event::ResolveName(req));
    }

    /// Entry point for `NameResolved`: classify and, when warranted,
    /// publish `NewSubdomain`.
    pub fn on_name_resolved(&self, req: DnsRequest) {
        self.base.active_flag().set_active();

        let domain = match self.scope.which_domain(&req.name) {
            Some(d) => d,
            None => return,
        };

        if let Some(sub) = classify_subdomain(&req.name, &domain) {
            if self.graph.has_cname_edge(&req.name) {
                return;
            }
            let count = {
                let mut filters = self.filters.lock().unwrap();
                let set = filters.subdomain_counts.entry(sub.clone()).or_insert_with(HashSet::new);
                set.insert(req.name.clone());
                set.len()
            };
            self.bus.publish(Topic::NewSubdomain, Event::NewSubdomain { name: sub, count });
        }
    }
}

/// Classification per §4.4: require at least two labels, at least as many
/// labels as the root domain, reject a leading service label (`_tcp` etc.),
/// and return the parent subdomain (`labels[1:]`) when all that holds.
fn classify_subdomain(name: &str, root_domain: &str) -> Option<String> {
    let labels: Vec<&str> = name.split('.').collect();
    let root_labels: Vec<&str> = root_domain.split('.').collect();
    if labels.len() < 2 || labels.len() < root_labels.len() {
        return None;
    }
    if SERVICE_LABELS.contains(&labels[0]) {
        return None;
    }
    Some(labels[1..].join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_wildcard_and_trailing_dot() {
        assert_eq!(NameService::normalize("*.Example.COM."), "example.com");
        assert_eq!(NameService::normalize("www.example.com"), "www.example.com");
    }

    #[test]
    fn service_label_rejected() {
        assert_eq!(classify_subdomain("_tcp.example.com", "example.com"), None);
    }

    #[test]
    fn classify_subdomain_returns_parent() {
        assert_eq!(classify_subdomain("a.sub.example.com", "example.com"), Some("sub.example.com".to_string()));
    }

    #[test]
    fn classify_subdomain_rejects_root_itself() {
        assert_eq!(classify_subdomain("example.com", "example.com"), None);
    }
}
