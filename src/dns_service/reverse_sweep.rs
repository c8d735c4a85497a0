//! Reverse DNS sweeps (§4.5): given a seed address and its containing
//! CIDR, probe a bounded window of neighboring hosts with PTR queries.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::dns;
use crate::dns::Name;
use crate::dns_service::resolver::ResolverPool;

const DEFAULT_WINDOW: usize = 50;

/// Up to `window` hosts centered on `seed` (±window/2), clamped to the
/// edges of `cidr`. Only IPv4 is swept; IPv6 CIDRs are returned empty
/// since a /64+ neighborhood is not a meaningful "nearby hosts" window.
pub fn sweep_targets(seed: IpAddr, cidr: IpNet, window: usize) -> Vec<IpAddr> {
    let (seed_v4, net_v4) = match (seed, cidr) {
        (IpAddr::V4(s), IpNet::V4(n)) => (s, n),
        _ => return vec![],
    };

    let network_u32 = u32::from(net_v4.network());
    let broadcast_u32 = u32::from(net_v4.broadcast());
    let seed_u32 = u32::from(seed_v4);

    let half = (window / 2) as u32;
    let lo = seed_u32.saturating_sub(half).max(network_u32);
    let hi = seed_u32.saturating_add(half).min(broadcast_u32);

    (lo..=hi).map(|addr| IpAddr::V4(std::net::Ipv4Addr::from(addr))).take(window.max(1)).collect()
}

/// Issue a PTR query for `addr`; returns the PTR target name on a
/// successful answer.
pub fn reverse_lookup(addr: IpAddr, pool: &ResolverPool) -> Option<Name> {
    let arpa_name = Name::from_string(&to_in_addr_arpa(addr)).ok()?;
    let resp = pool.query(&arpa_name, dns::RecordType::PTR).ok()?;
    resp.answers.iter().find_map(|rec| match rec {
        dns::Record::PTR { .. } => Some(rec.ptr_data().clone()),
        _ => None,
    })
}

fn to_in_addr_arpa(addr: IpAddr) -> String {
    match addr {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.{}.in-addr.arpa.", o[3], o[2], o[1], o[0])
        }
        IpAddr::V6(v6) => {
            let nibbles: Vec<String> = v6.octets().iter().rev().flat_map(|b| vec![format!("{:x}", b & 0xf), format!("{:x}", b >> 4)]).collect();
            format!("{}.ip6.arpa.", nibbles.join("."))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_is_bounded_by_cidr_edges() {
        let seed: IpAddr = "10.0.0.1".parse().unwrap();
        let cidr: IpNet = "10.0.0.0/30".parse().unwrap();
        let targets = sweep_targets(seed, cidr, DEFAULT_WINDOW);
        assert!(targets.iter().all(|t| cidr.contains(t)));
        assert!(targets.len() <= 4);
    }

    #[test]
    fn arpa_name_is_reversed_octets() {
        let addr: IpAddr = "192.168.1.2".parse().unwrap();
        assert_eq!(to_in_addr_arpa(addr), "2.1.168.192.in-addr.arpa.");
    }
}
