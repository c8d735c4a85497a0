//! IP-to-ASN resolution over Team Cymru's DNS-based whois (§6 "External
//! interfaces"): `origin.asn.cymru.com` TXT records answer with a
//! pipe-delimited `ASN | prefix | country | registry | allocation date`
//! line. This is "just another DNS query" per the spec, so it is resolved
//! through the same [`ResolverPool`] the rest of the DNS Service uses
//! rather than a dedicated client.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::dns;
use crate::dns::Name;
use crate::dns_service::resolver::ResolverPool;
use crate::model::AsnRequest;

/// Query Team Cymru's origin lookup for `addr`'s announcing ASN and the
/// announced prefix. Only IPv4 is supported: Cymru's IPv6 zone
/// (`origin6.asn.cymru.com`) uses a different nibble-reversed name shape
/// that query types beyond this engine's needs.
pub fn lookup(addr: IpAddr, pool: &ResolverPool) -> Option<AsnRequest> {
    let query_name = Name::from_string(&to_origin_query(addr)?).ok()?;
    let resp = pool.query(&query_name, dns::RecordType::TXT).ok()?;
    let txt = resp.answers.iter().find_map(|rec| match rec {
        dns::Record::TXT { .. } => Some(rec.txt_data().join("")),
        _ => None,
    })?;
    parse_origin_txt(&txt, addr)
}

fn to_origin_query(addr: IpAddr) -> Option<String> {
    match addr {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            Some(format!("{}.{}.{}.{}.origin.asn.cymru.com.", o[3], o[2], o[1], o[0]))
        }
        IpAddr::V6(_) => None,
    }
}

/// Parse a line shaped like `"15169 | 8.8.8.0/24 | US | arin | 2023-01-01"`.
fn parse_origin_txt(txt: &str, addr: IpAddr) -> Option<AsnRequest> {
    let fields: Vec<&str> = txt.split('|').map(|f| f.trim()).collect();
    if fields.len() < 2 {
        return None;
    }
    let asn: u32 = fields[0].split(' ').next()?.parse().ok()?;
    let prefix: IpNet = fields[1].parse().ok()?;

    let mut rec = AsnRequest::empty(asn);
    rec.address = Some(addr);
    rec.prefix = Some(prefix);
    rec.cc = fields.get(2).filter(|s| !s.is_empty()).map(|s| s.to_string());
    rec.registry = fields.get(3).filter(|s| !s.is_empty()).map(|s| s.to_string());
    rec.allocation_date = fields.get(4).filter(|s| !s.is_empty()).map(|s| s.to_string());
    rec.netblocks = vec![prefix];
    Some(rec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_query_reverses_ipv4_octets() {
        let addr: IpAddr = "8.8.8.8".parse().unwrap();
        assert_eq!(to_origin_query(addr), Some("8.8.8.8.origin.asn.cymru.com.".to_string()));
    }

    #[test]
    fn ipv6_has_no_origin_query() {
        let addr: IpAddr = "::1".parse().unwrap();
        assert_eq!(to_origin_query(addr), None);
    }

    #[test]
    fn parses_pipe_delimited_origin_response() {
        let addr: IpAddr = "8.8.8.8".parse().unwrap();
        let rec = parse_origin_txt("15169 | 8.8.8.0/24 | US | arin | 1992-12-01", addr).unwrap();
        assert_eq!(rec.asn, 15169);
        assert_eq!(rec.cc, Some("US".to_string()));
        assert_eq!(rec.registry, Some("arin".to_string()));
        assert_eq!(rec.netblocks, vec!["8.8.8.0/24".parse::<IpNet>().unwrap()]);
    }

    #[test]
    fn malformed_response_yields_none() {
        assert!(parse_origin_txt("not a valid response", "8.8.8.8".parse().unwrap()).is_none());
    }
}
