//! Brute-force Service (§4.9): wordlist expansion fanned out over the
//! shared [`ThreadPool`], the same worker-pool idiom the UDP/TCP servers
//! use to hand off each accepted connection.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::bus::{Event, EventBus, Topic};
use crate::model::{DnsRequest, Tag};
use crate::service::{ControlHandle, ServiceBase};
use crate::shared::thread_pool::ThreadPool;

pub struct BruteForceService {
    base: ServiceBase,
    bus: Arc<EventBus>,
    wordlist: Arc<Vec<String>>,
    workers: ThreadPool,
    recursive: bool,
    min_for_recursive: usize,
    expanded: Arc<std::sync::Mutex<std::collections::HashSet<String>>>,
}

impl BruteForceService {
    pub fn new(bus: Arc<EventBus>, wordlist_path: &str, threads: usize, recursive: bool, min_for_recursive: usize) -> Result<(Arc<Self>, ControlHandle), String> {
        let words = fs::read_to_string(wordlist_path).map_err(|e| e.to_string())?;
        let wordlist: Vec<String> = words.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect();

        let (handle, control) = crate::service::new_control();
        let svc = Arc::new(BruteForceService {
            base: ServiceBase::new("brute_service", control),
            bus,
            wordlist: Arc::new(wordlist),
            workers: ThreadPool::new(threads, "brute"),
            recursive,
            min_for_recursive,
            expanded: Arc::new(std::sync::Mutex::new(std::collections::HashSet::new())),
        });
        Ok((svc, handle))
    }

    /// Expand the wordlist under `domain`, publishing `NewName` for every
    /// `word.domain` at the configured worker concurrency.
    pub fn expand_domain(self: &Arc<Self>, domain: &str) {
        if !self.expanded.lock().unwrap().insert(domain.to_string()) {
            return;
        }
        let domain = domain.to_string();
        let svc = Arc::clone(self);
        let wordlist = Arc::clone(&self.wordlist);
        self.workers.execute(move || {
            svc.base.active_flag().set_active();
            for word in wordlist.iter() {
                svc.bus.publish(
                    Topic::NewName,
                    Event::NewName(DnsRequest {
                        name: format!("{}.{}", word, domain),
                        domain: domain.clone(),
                        tag: Tag::Brute,
                        source: "brute".to_string(),
                        records: None,
                    }),
                );
            }
        });
    }

    pub fn start(self: &Arc<Self>, root_domains: Vec<String>) {
        for domain in root_domains {
            self.expand_domain(&domain);
        }

        if self.recursive {
            let svc = Arc::clone(self);
            let counts: Arc<std::sync::Mutex<std::collections::HashMap<String, AtomicUsize>>> = Arc::new(std::sync::Mutex::new(std::collections::HashMap::new()));
            self.bus.subscribe_sync(Topic::NewSubdomain, move |event| {
                if let Event::NewSubdomain { name, count } = event {
                    if count >= svc.min_for_recursive {
                        let mut counts = counts.lock().unwrap();
                        let triggered = counts.entry(name.clone()).or_insert_with(|| AtomicUsize::new(0));
                        if triggered.fetch_add(1, Ordering::SeqCst) == 0 {
                            svc.expand_domain(&name);
                        }
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn wordlist_is_trimmed_and_empty_lines_dropped() {
        let input = "admin\n\n  api  \nwww\n";
        let words: Vec<String> = input.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect();
        assert_eq!(words, vec!["admin", "api", "www"]);
    }
}
