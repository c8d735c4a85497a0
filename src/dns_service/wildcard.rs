//! Wildcard detection (§4.5): before trusting an untrusted resolution under
//! a root domain, sample the domain's synthetic wildcard answer set once
//! and cache it for the run.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Mutex;

use rand::Rng;

use crate::dns;
use crate::dns::Name;
use crate::dns_service::resolver::ResolverPool;

const SAMPLE_COUNT: usize = 3;

/// Per-domain cache of wildcard answer sets, guarded by one mutex (same
/// coarse-lock idiom as [`crate::graph::Graph`]).
#[derive(Default)]
pub struct WildcardCache {
    sets: Mutex<HashMap<String, HashSet<IpAddr>>>,
}

impl WildcardCache {
    pub fn new() -> Self {
        WildcardCache::default()
    }

    /// Sample `domain` with `SAMPLE_COUNT` random subdomains, if not already
    /// sampled, recording the union of their A/AAAA answers as the domain's
    /// wildcard set.
    pub fn sample_if_needed(&self, domain: &str, pool: &ResolverPool) {
        {
            let sets = self.sets.lock().unwrap();
            if sets.contains_key(domain) {
                return;
            }
        }

        let mut answers = HashSet::new();
        for _ in 0..SAMPLE_COUNT {
            let probe = format!("{}.{}", random_label(), domain.trim_end_matches('.'));
            if let Ok(name) = Name::from_string(&probe) {
                for rtype in [dns::RecordType::A, dns::RecordType::AAAA] {
                    if let Ok(resp) = pool.query(&name, rtype) {
                        collect_addresses(&resp, &mut answers);
                    }
                }
            }
        }

        self.sets.lock().unwrap().insert(domain.to_string(), answers);
    }

    /// `true` if `addresses` is a non-empty subset of the cached wildcard
    /// set for `domain`. An untrusted resolution matching this is assumed
    /// synthetic and should be dropped (§4.5).
    pub fn is_wildcard_match(&self, domain: &str, addresses: &[IpAddr]) -> bool {
        if addresses.is_empty() {
            return false;
        }
        let sets = self.sets.lock().unwrap();
        match sets.get(domain) {
            Some(wildcard_set) if !wildcard_set.is_empty() => addresses.iter().all(|a| wildcard_set.contains(a)),
            _ => false,
        }
    }
}

fn collect_addresses(msg: &dns::Message, out: &mut HashSet<IpAddr>) {
    for rec in &msg.answers {
        match rec {
            dns::Record::A { .. } => {
                out.insert(IpAddr::from(*rec.a_data()));
            }
            dns::Record::AAAA { address, .. } => {
                out.insert(IpAddr::from(*address));
            }
            _ => {}
        }
    }
}

fn random_label() -> String {
    let mut rng = rand::thread_rng();
    (0..12).map(|_| (rng.gen_range(b'a'..=b'z')) as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_addresses_never_match() {
        let cache = WildcardCache::new();
        assert!(!cache.is_wildcard_match("example.com", &[]));
    }

    #[test]
    fn subset_of_cached_set_matches() {
        let cache = WildcardCache::new();
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        cache.sets.lock().unwrap().insert("example.com".to_string(), HashSet::from([ip]));
        assert!(cache.is_wildcard_match("example.com", &[ip]));
        let other: IpAddr = "9.9.9.9".parse().unwrap();
        assert!(!cache.is_wildcard_match("example.com", &[other]));
    }
}
