//! The enumeration graph (§4.7): a typed node/edge store behind a single
//! coarse mutex, in the same spirit as the resolver's
//! [`crate::dns::buffer::BitsBuffer`]-adjacent cache
//! (`resolver::back_end::cache::Cache`) — one lock guarding a `HashMap`,
//! entries addressed by a borrowed key, no per-entry locking. Graph reads
//! that don't need a consistent multi-node view (e.g. "does this node
//! exist") take the lock only for the lookup itself.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::model::Classification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Domain,
    Subdomain,
    IpAddress,
    Ptr,
    Ns,
    Mx,
    Netblock,
    As,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeLabel {
    RootOf,
    CnameTo,
    ATo,
    AaaaTo,
    PtrTo,
    NsTo,
    MxTo,
    SrvTo,
    ServiceFor,
    Contains,
    HasPrefix,
}

#[derive(Debug, Default)]
struct NodeEntry {
    kinds: Vec<NodeKind>,
    sent: bool,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<String, NodeEntry>,
    // Adjacency keyed by (from, label) -> targets; queried both ways via
    // `edges_out`/`edges_in` helpers below.
    out_edges: HashMap<(String, EdgeLabel), Vec<String>>,
    in_edges: HashMap<(String, EdgeLabel), Vec<String>>,
}

/// The shared graph. Every method takes `&self`; interior mutability is the
/// single `Mutex<Inner>`, matching the teacher's coarse-lock cache idiom
/// rather than per-node locks, since node/edge operations here are cheap and
/// contention is expected to be low relative to DNS/network I/O.
#[derive(Default)]
pub struct Graph {
    inner: Mutex<Inner>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    /// Insert a node of the given kind if absent; idempotent. A name can
    /// carry more than one kind (a Domain node is simultaneously a
    /// Subdomain, per invariant 3 in §3).
    pub fn insert_node(&self, name: &str, kind: NodeKind) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.nodes.entry(name.to_string()).or_insert_with(NodeEntry::default);
        if !entry.kinds.contains(&kind) {
            entry.kinds.push(kind);
        }
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.inner.lock().unwrap().nodes.contains_key(name)
    }

    pub fn node_kinds(&self, name: &str) -> Vec<NodeKind> {
        self.inner.lock().unwrap().nodes.get(name).map(|e| e.kinds.clone()).unwrap_or_default()
    }

    /// Insert `(from, label, to)` if not already present (invariant 2: no
    /// duplicate edges). Both endpoints must already exist as nodes;
    /// callers insert nodes first.
    pub fn insert_edge(&self, from: &str, label: EdgeLabel, to: &str) {
        let mut inner = self.inner.lock().unwrap();
        let out = inner.out_edges.entry((from.to_string(), label)).or_insert_with(Vec::new);
        if !out.iter().any(|t| t == to) {
            out.push(to.to_string());
        }
        let inn = inner.in_edges.entry((to.to_string(), label)).or_insert_with(Vec::new);
        if !inn.iter().any(|f| f == from) {
            inn.push(from.to_string());
        }
    }

    pub fn has_edge(&self, from: &str, label: EdgeLabel, to: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .out_edges
            .get(&(from.to_string(), label))
            .map(|targets| targets.iter().any(|t| t == to))
            .unwrap_or(false)
    }

    pub fn out_neighbors(&self, from: &str, label: EdgeLabel) -> Vec<String> {
        self.inner.lock().unwrap().out_edges.get(&(from.to_string(), label)).cloned().unwrap_or_default()
    }

    /// Does `name` have an outgoing `CNAME_TO` edge? Used by the Name
    /// Service to suppress CNAME targets from subdomain promotion (§9).
    pub fn has_cname_edge(&self, name: &str) -> bool {
        !self.out_neighbors(name, EdgeLabel::CnameTo).is_empty()
    }

    /// Follow the CNAME chain starting at `name` to its terminal node.
    /// Detects cycles via the self-fixed-point rule from §9: stop as soon
    /// as the next hop equals the current node, rather than recursing
    /// without bound.
    pub fn resolve_cname_chain(&self, name: &str) -> String {
        let mut cur = name.to_string();
        loop {
            let targets = self.out_neighbors(&cur, EdgeLabel::CnameTo);
            let next = match targets.first() {
                Some(t) => t.clone(),
                None => break,
            };
            if next == cur {
                break;
            }
            cur = next;
        }
        cur
    }

    /// Mark a Subdomain node as sent if it wasn't already; returns `true`
    /// if this call performed the marking (i.e. the caller should emit).
    /// Guards invariant 4: a node is emitted to Output at most once.
    pub fn mark_sent_if_unsent(&self, name: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.nodes.get_mut(name) {
            Some(entry) if !entry.sent => {
                entry.sent = true;
                true
            }
            _ => false,
        }
    }

    /// All Domain node names currently in the graph, for output derivation
    /// and for seeding previously-known-in-scope entries at startup (§4.11).
    pub fn domain_nodes(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .nodes
            .iter()
            .filter(|(_, e)| e.kinds.contains(&NodeKind::Domain))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// `ROOT_OF` children of a Domain node.
    pub fn subdomains_of(&self, domain: &str) -> Vec<String> {
        self.out_neighbors(domain, EdgeLabel::RootOf)
    }

    /// Addresses reachable from `name` via direct or CNAME-chained
    /// `A_TO`/`AAAA_TO` edges.
    pub fn addresses_of(&self, name: &str) -> Vec<String> {
        let terminal = self.resolve_cname_chain(name);
        let mut addrs = self.out_neighbors(&terminal, EdgeLabel::ATo);
        addrs.extend(self.out_neighbors(&terminal, EdgeLabel::AaaaTo));
        addrs
    }
}

/// Classify a Subdomain node's first label per §4.7: `www`/`web` prefix is
/// `web`; a node that is itself typed `NS`/`MX` takes that classification;
/// everything else is `normal`.
pub fn classify(name: &str, kinds: &[NodeKind]) -> Classification {
    if kinds.contains(&NodeKind::Ns) {
        return Classification::Ns;
    }
    if kinds.contains(&NodeKind::Mx) {
        return Classification::Mx;
    }
    let first_label = name.split('.').next().unwrap_or("");
    if first_label.starts_with("www") || first_label.starts_with("web") {
        return Classification::Web;
    }
    Classification::Normal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_edges_are_not_stored_twice() {
        let g = Graph::new();
        g.insert_node("a.com.", NodeKind::Subdomain);
        g.insert_node("1.2.3.4", NodeKind::IpAddress);
        g.insert_edge("a.com.", EdgeLabel::ATo, "1.2.3.4");
        g.insert_edge("a.com.", EdgeLabel::ATo, "1.2.3.4");
        assert_eq!(g.out_neighbors("a.com.", EdgeLabel::ATo), vec!["1.2.3.4".to_string()]);
    }

    #[test]
    fn cname_chain_detects_self_cycle() {
        let g = Graph::new();
        g.insert_node("a.com.", NodeKind::Subdomain);
        g.insert_edge("a.com.", EdgeLabel::CnameTo, "a.com.");
        assert_eq!(g.resolve_cname_chain("a.com."), "a.com.");
    }

    #[test]
    fn cname_chain_follows_to_terminal() {
        let g = Graph::new();
        for n in ["a.com.", "b.com.", "c.com."] {
            g.insert_node(n, NodeKind::Subdomain);
        }
        g.insert_edge("a.com.", EdgeLabel::CnameTo, "b.com.");
        g.insert_edge("b.com.", EdgeLabel::CnameTo, "c.com.");
        g.insert_node("9.9.9.9", NodeKind::IpAddress);
        g.insert_edge("c.com.", EdgeLabel::ATo, "9.9.9.9");
        assert_eq!(g.resolve_cname_chain("a.com."), "c.com.");
        assert_eq!(g.addresses_of("a.com."), vec!["9.9.9.9".to_string()]);
    }

    #[test]
    fn mark_sent_is_at_most_once() {
        let g = Graph::new();
        g.insert_node("a.com.", NodeKind::Subdomain);
        assert!(g.mark_sent_if_unsent("a.com."));
        assert!(!g.mark_sent_if_unsent("a.com."));
    }

    #[test]
    fn classification_prefers_ns_mx_then_web_prefix() {
        assert_eq!(classify("ns1.example.com", &[NodeKind::Ns]), Classification::Ns);
        assert_eq!(classify("www.example.com", &[]), Classification::Web);
        assert_eq!(classify("api.example.com", &[]), Classification::Normal);
    }
}
