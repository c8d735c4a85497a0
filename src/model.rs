//! Payload types carried over the [`crate::bus::EventBus`]. These are the engine's
//! own data model (§3 of the design), distinct from the wire-level [`crate::dns::Record`]
//! the DNS Service uses to actually talk to resolvers.

use std::net::IpAddr;

/// Provenance of a discovered name. Tags partition into a *trusted* class
/// (`Dns`, `Cert`, `External`) exempt from wildcard suppression, and an
/// *untrusted* class subject to it. This is a first-class enum rather than a
/// string compared ad-hoc at each call site, so the two places that branch on
/// trust (wildcard bypass, dedup-filter partitioning) stay centralized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Tag {
    Dns,
    Cert,
    Archive,
    Api,
    Scrape,
    Brute,
    Alt,
    External,
}

impl Tag {
    /// Trusted tags were discovered via authoritative means or direct user
    /// input and bypass wildcard filtering (§3, §4.5).
    pub fn is_trusted(&self) -> bool {
        matches!(self, Tag::Dns | Tag::Cert | Tag::External)
    }
}

/// A simplified, type-classified resource record, decoupled from the DNS
/// wire format. The Data Manager and Graph operate on these; the DNS Service
/// is responsible for translating resolved [`crate::dns::Record`]s into them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    A,
    AAAA,
    CNAME,
    PTR,
    NS,
    MX,
    SRV,
    TXT,
    SPF,
}

#[derive(Debug, Clone)]
pub struct Record {
    pub kind: RecordKind,
    pub name: String,
    pub data: String,
}

/// A request to resolve `name` (within `domain`), carrying the discovery
/// provenance (`tag`/`source`) and, once resolved, the answer records.
#[derive(Debug, Clone)]
pub struct DnsRequest {
    pub name: String,
    pub domain: String,
    pub tag: Tag,
    pub source: String,
    pub records: Option<Vec<Record>>,
}

#[derive(Debug, Clone)]
pub struct AddrRequest {
    pub address: IpAddr,
    pub domain: String,
    pub tag: Tag,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct AsnRequest {
    pub asn: u32,
    pub address: Option<IpAddr>,
    pub prefix: Option<ipnet::IpNet>,
    pub cc: Option<String>,
    pub registry: Option<String>,
    pub allocation_date: Option<String>,
    pub description: Option<String>,
    pub netblocks: Vec<ipnet::IpNet>,
}

impl AsnRequest {
    pub fn empty(asn: u32) -> Self {
        AsnRequest {
            asn,
            address: None,
            prefix: None,
            cc: None,
            registry: None,
            allocation_date: None,
            description: None,
            netblocks: vec![],
        }
    }
}

/// Classification of a Subdomain node at output-derivation time (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Normal,
    Ns,
    Mx,
    Web,
}

#[derive(Debug, Clone)]
pub struct OutputAddress {
    pub ip: IpAddr,
    pub netblock: Option<ipnet::IpNet>,
    pub asn: Option<u32>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Output {
    pub name: String,
    pub domain: String,
    pub addresses: Vec<OutputAddress>,
    pub tag: Tag,
    pub source: String,
    pub classification: Classification,
}
