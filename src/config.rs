//! Engine configuration (§4.3, §6). JSON-encoded, loaded with [`Config::from_file`]
//! and validated against the invariants every service relies on, mirroring the
//! resolver's own `Conf::from_file`/`validate` pair.

use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub log_level: log::Level,
    pub domains: Vec<String>,
    pub resolvers: Vec<String>,
    #[serde(default)]
    pub asns: Vec<u32>,
    /// Skip active resolution entirely: names reaching the Name Service are
    /// published straight to `Output` without ever touching the DNS Service.
    #[serde(default)]
    pub passive: bool,
    pub dns: DnsConf,
    pub brute: BruteConf,
    pub alterations: AlterationConf,
    pub active_cert: ActiveCertConf,
    pub api_keys: HashMap<String, String>,
    pub record_log_path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DnsConf {
    pub max_ns_retries: usize,
    pub read_timeout: u64,
    pub write_timeout: u64,
    pub wildcard_samples: usize,
    pub reverse_sweep_window: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BruteConf {
    pub enabled: bool,
    pub wordlist_path: String,
    pub threads: usize,
    pub min_for_recursive: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AlterationConf {
    pub enabled: bool,
    pub max_edit_distance: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ActiveCertConf {
    pub enabled: bool,
    pub ports: Vec<u16>,
}

impl Config {
    /// Read and parse the configuration values from a file. The file must
    /// be JSON-encoded and follow the organization of the [`Config`] struct.
    pub fn from_file(path: &str) -> Result<Self, String> {
        let file_bytes = match fs::read_to_string(path) {
            Err(err) => return Err(err.to_string()),
            Ok(v) => v,
        };
        let conf = match serde_json::from_str::<Config>(&file_bytes) {
            Err(err) => return Err(err.to_string()),
            Ok(conf) => conf,
        };
        match conf.validate() {
            Ok(_) => Ok(conf),
            Err(err) => Err(err),
        }
    }

    /// Validate a configuration struct against some common errors.
    fn validate(&self) -> Result<(), String> {
        if self.domains.is_empty() {
            return Err("invalid 'domains': at least one root domain is required".to_string());
        }
        for domain in &self.domains {
            if !domain.ends_with('.') && domain.is_empty() {
                return Err(format!("invalid domain: {:?}", domain));
            }
        }
        if self.resolvers.is_empty() {
            return Err("invalid 'resolvers': at least one resolver address is required".to_string());
        }

        if self.dns.max_ns_retries == 0 {
            return Err("invalid 'max_ns_retries' dns param: cannot be 0".to_string());
        }
        if self.dns.read_timeout == 0 || self.dns.write_timeout == 0 {
            return Err("invalid dns write/read timeouts: cannot be 0".to_string());
        }
        if self.dns.wildcard_samples == 0 {
            return Err("invalid 'wildcard_samples' dns param: cannot be 0".to_string());
        }

        if self.brute.enabled && self.brute.threads == 0 {
            return Err("invalid 'threads' brute param: cannot be 0".to_string());
        }
        if self.brute.enabled && self.brute.wordlist_path.is_empty() {
            return Err("invalid 'wordlist_path' brute param: empty".to_string());
        }

        if self.alterations.enabled && self.alterations.max_edit_distance == 0 {
            return Err("invalid 'max_edit_distance' alterations param: cannot be 0".to_string());
        }

        Ok(())
    }
}

/// Thread-safe registry of compiled per-domain scope patterns (§4.2). Each
/// root domain gets a regex matching itself and any of its subdomains;
/// `is_in_scope` and `which_domain` are the two checks every service needs
/// before accepting a name.
pub struct DomainRegex {
    patterns: Mutex<HashMap<String, Regex>>,
}

impl DomainRegex {
    pub fn new(domains: &[String]) -> Self {
        let mut patterns = HashMap::new();
        for domain in domains {
            if let Some(re) = build_domain_regex(domain) {
                patterns.insert(domain.clone(), re);
            }
        }
        DomainRegex { patterns: Mutex::new(patterns) }
    }

    /// Register a new root domain at runtime, e.g. discovered via a CNAME or
    /// NS delegation outside the initial scope. Safe to call concurrently
    /// from multiple service threads.
    pub fn add_domain(&self, domain: &str) {
        if let Some(re) = build_domain_regex(domain) {
            self.patterns.lock().unwrap().insert(domain.to_string(), re);
        }
    }

    pub fn is_in_scope(&self, name: &str) -> bool {
        self.which_domain(name).is_some()
    }

    /// The registered root domain `name` belongs to, if any. When a name
    /// matches more than one registered domain the longest (most specific)
    /// match wins.
    pub fn which_domain(&self, name: &str) -> Option<String> {
        let patterns = self.patterns.lock().unwrap();
        patterns
            .iter()
            .filter(|(_, re)| re.is_match(name))
            .map(|(domain, _)| domain.clone())
            .max_by_key(|domain| domain.len())
    }
}

fn build_domain_regex(domain: &str) -> Option<Regex> {
    let trimmed = domain.trim_end_matches('.');
    let escaped = regex::escape(trimmed);
    Regex::new(&format!(r"(?i)^([a-z0-9_-]+\.)*{}\.?$", escaped)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_regex_matches_subdomains_not_siblings() {
        let reg = DomainRegex::new(&["example.com".to_string()]);
        assert!(reg.is_in_scope("example.com"));
        assert!(reg.is_in_scope("www.example.com"));
        assert!(reg.is_in_scope("a.b.example.com"));
        assert!(!reg.is_in_scope("notexample.com"));
        assert!(!reg.is_in_scope("example.com.evil.com"));
    }

    #[test]
    fn which_domain_prefers_most_specific_match() {
        let reg = DomainRegex::new(&["example.com".to_string(), "sub.example.com".to_string()]);
        assert_eq!(reg.which_domain("a.sub.example.com"), Some("sub.example.com".to_string()));
    }

    #[test]
    fn add_domain_extends_scope_at_runtime() {
        let reg = DomainRegex::new(&["example.com".to_string()]);
        assert!(!reg.is_in_scope("foo.net"));
        reg.add_domain("foo.net");
        assert!(reg.is_in_scope("foo.net"));
    }
}
