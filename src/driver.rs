//! Enumeration driver (§4.11): wires every service to the bus, seeds
//! initial names, and owns termination detection plus output pacing.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use crate::active_cert_service::ActiveCertService;
use crate::address_service::AddressService;
use crate::alteration_service::AlterationService;
use crate::brute_service::BruteForceService;
use crate::bus::{Event, EventBus, Topic};
use crate::config::{Config, DomainRegex};
use crate::data_manager::DataManager;
use crate::dns_service::{DnsService, ResolverPool};
use crate::errors::StartError;
use crate::graph::Graph;
use crate::model::{AddrRequest, AsnRequest, DnsRequest, Output, Tag};
use crate::name_service::NameService;
use crate::record_log::RecordLog;
use crate::service::ControlHandle;
use crate::shared::logs;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MIN_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_MS: u64 = 2000;
const FINAL_FLUSH: Duration = Duration::from_millis(500);
const IP_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Enumeration {
    config: Config,
    bus: Arc<EventBus>,
    scope: Arc<DomainRegex>,
    graph: Arc<Graph>,

    name_service: Arc<NameService>,
    dns_service: Arc<DnsService>,
    data_manager: Arc<DataManager>,
    address_service: Arc<AddressService>,
    alteration_service: Option<Arc<AlterationService>>,
    active_cert_service: Option<Arc<ActiveCertService>>,
    brute_service: Option<Arc<BruteForceService>>,

    controls: Vec<ControlHandle>,
    output_rx: Receiver<Event>,
}

impl Enumeration {
    pub fn new(config: Config) -> Result<Self, StartError> {
        logs::init_log(config.log_level);

        let bus = Arc::new(EventBus::new());
        let scope = Arc::new(DomainRegex::new(&config.domains));
        let graph = Arc::new(Graph::new());

        let resolvers = config.resolvers.iter().filter_map(|r| r.parse().ok()).collect::<Vec<IpAddr>>();
        let pool = ResolverPool::new(resolvers, config.dns.max_ns_retries, Duration::from_secs(config.dns.read_timeout), Duration::from_secs(config.dns.write_timeout));

        let record_log = match &config.record_log_path {
            Some(path) => {
                if std::path::Path::new(path).exists() {
                    if let Err(err) = crate::record_log::replay(std::path::Path::new(path), &graph) {
                        log::warn!("replaying record log {:?}: {}", path, err);
                    }
                }
                Some(Arc::new(RecordLog::create(path).map_err(|e| StartError::RecordLogSetup(e.to_string()))?))
            }
            None => None,
        };

        let (name_service, name_ctrl) = NameService::new(Arc::clone(&bus), Arc::clone(&scope), Arc::clone(&graph), config.passive);
        let (dns_service, dns_ctrl) = DnsService::new(Arc::clone(&bus), Arc::clone(&scope), pool, 8, config.dns.reverse_sweep_window as usize);
        let (data_manager, data_ctrl) = DataManager::new(Arc::clone(&bus), Arc::clone(&scope), Arc::clone(&graph), config.active_cert.enabled, record_log.clone());
        let target_asns: HashSet<u32> = config.asns.iter().copied().collect();
        let (address_service, addr_ctrl) = AddressService::new(Arc::clone(&bus), target_asns, record_log.clone());

        let mut controls = vec![name_ctrl, dns_ctrl, data_ctrl, addr_ctrl];

        let alteration_service = if config.alterations.enabled {
            let (svc, ctrl) = AlterationService::new(Arc::clone(&bus), Arc::clone(&scope));
            controls.push(ctrl);
            Some(svc)
        } else {
            None
        };

        let active_cert_service = if config.active_cert.enabled {
            let (svc, ctrl) = ActiveCertService::new(Arc::clone(&bus), config.active_cert.ports.clone(), 4);
            controls.push(ctrl);
            Some(svc)
        } else {
            None
        };

        let brute_service = if config.brute.enabled {
            let (svc, ctrl) = BruteForceService::new(Arc::clone(&bus), &config.brute.wordlist_path, config.brute.threads, true, config.brute.min_for_recursive)
                .map_err(StartError::BruteForceSetup)?;
            controls.push(ctrl);
            Some(svc)
        } else {
            None
        };

        let (_output_id, output_rx) = bus.subscribe_async(Topic::Output);

        Ok(Enumeration {
            config,
            bus,
            scope,
            graph,
            name_service,
            dns_service,
            data_manager,
            address_service,
            alteration_service,
            active_cert_service,
            brute_service,
            controls,
            output_rx,
        })
    }

    /// Startup sequence (§4.11): subscribe every service, seed names from
    /// previously-known graph entries and user-provided domains, then
    /// release root domains one at a time.
    pub fn start(&self, seed_names: Vec<String>) {
        self.name_service.start();
        self.dns_service.start();
        self.data_manager.start();
        self.address_service.start();
        if let Some(svc) = &self.alteration_service {
            svc.start();
        }
        if let Some(svc) = &self.active_cert_service {
            svc.start();
        }

        for name in self.graph.domain_nodes() {
            if self.scope.is_in_scope(&name) {
                self.seed_name(&name, Tag::External, "graph");
            }
        }

        for name in seed_names {
            self.seed_name(&name, Tag::External, "user");
        }

        for domain in self.config.domains.clone() {
            self.data_manager.insert_domain(&domain);
        }

        if let Some(svc) = &self.brute_service {
            svc.start(self.config.domains.clone());
        }
    }

    /// The event bus backing this enumeration, exposed so a caller can run
    /// its own [`crate::adapters::SourceAdapter`] against it alongside the
    /// built-in services.
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// One-shot RPC over the bus (§9 design note): subscribe to `IPInfo`,
    /// publish `IPRequest`, and return the first reply for `address` within
    /// `IP_REQUEST_TIMEOUT`, or `None` on timeout.
    pub fn lookup_ip_info(&self, address: IpAddr) -> Option<AsnRequest> {
        let (_id, rx) = self.bus.subscribe_async(Topic::IPInfo);
        self.bus.publish(
            Topic::IPRequest,
            Event::IPRequest(AddrRequest { address, domain: String::new(), tag: Tag::External, source: "ip_request".to_string() }),
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

    fn seed_name(&self, name: &str, tag: Tag, source: &str) {
        self.bus.publish(
            Topic::NewName,
            Event::NewName(DnsRequest { name: name.to_string(), domain: String::new(), tag, source: source.to_string(), records: None }),
        );
    }

    /// Drain the next queued `Output`, pacing emission with the
    /// exponential backoff described in §4.11: resets to `MIN_BACKOFF_MS`
    /// whenever an element is actually drained, grows toward
    /// `MAX_BACKOFF_MS` while the queue is empty.
    pub fn run_to_completion<F: FnMut(Output)>(&self, mut on_output: F) {
        let mut backoff_ms = MIN_BACKOFF_MS;
        let mut idle_polls = 0;

        loop {
            self.data_manager.sweep_outputs();

            match self.output_rx.recv_timeout(Duration::from_millis(backoff_ms)) {
                Ok(Event::Output(out)) => {
                    on_output(out);
                    backoff_ms = MIN_BACKOFF_MS;
                    continue;
                }
                Ok(_) => continue,
                Err(_) => {
                    backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                }
            }

            if self.is_idle() {
                idle_polls += 1;
                if idle_polls >= 2 {
                    break;
                }
            } else {
                idle_polls = 0;
            }

            std::thread::sleep(POLL_INTERVAL.saturating_sub(Duration::from_millis(backoff_ms)));
        }

        std::thread::sleep(FINAL_FLUSH);
        self.data_manager.sweep_outputs();
        while let Ok(Event::Output(out)) = self.output_rx.try_recv() {
            on_output(out);
        }

        for ctrl in &self.controls {
            let _ = ctrl.quit.send(());
        }
    }

    /// Every service idle since its last poll (§4.2, §4.11 termination).
    fn is_idle(&self) -> bool {
        !self.name_service.is_active_for_poll() && !self.dns_service.is_active_for_poll() && !self.data_manager.is_active_for_poll() && !self.address_service.is_active_for_poll()
    }
}
