//! Alteration Service (§4.10): digit-flip/delete and label-suffix mutations
//! of a resolved, in-scope name.

use std::sync::Arc;

use crate::bus::{Event, EventBus, Topic};
use crate::config::DomainRegex;
use crate::model::{DnsRequest, RecordKind, Tag};
use crate::service::{ControlHandle, ServiceBase};

pub struct AlterationService {
    base: ServiceBase,
    bus: Arc<EventBus>,
    scope: Arc<DomainRegex>,
}

impl AlterationService {
    pub fn new(bus: Arc<EventBus>, scope: Arc<DomainRegex>) -> (Arc<Self>, ControlHandle) {
        let (handle, control) = crate::service::new_control();
        let svc = Arc::new(AlterationService { base: ServiceBase::new("alteration_service", control), bus, scope });
        (svc, handle)
    }

    pub fn start(self: &Arc<Self>) {
        let svc = Arc::clone(self);
        self.bus.subscribe_sync(Topic::NameResolved, move |event| {
            if let Event::NameResolved(req) = event {
                svc.on_name_resolved(req);
            }
        });
    }

    fn on_name_resolved(&self, req: DnsRequest) {
        let has_relevant_record = req.records.as_ref().map(|recs| {
            recs.iter().any(|r| matches!(r.kind, RecordKind::A | RecordKind::AAAA | RecordKind::CNAME | RecordKind::TXT))
        }).unwrap_or(false);

        if !has_relevant_record || !self.scope.is_in_scope(&req.name) {
            return;
        }
        self.base.active_flag().set_active();

        for mutated in mutate(&req.name) {
            if self.scope.is_in_scope(&mutated) {
                self.bus.publish(
                    Topic::NewName,
                    Event::NewName(DnsRequest { name: mutated.clone(), domain: req.domain.clone(), tag: Tag::Alt, source: "alteration".to_string(), records: None }),
                );
            }
        }
    }
}

/// Generate all mutation variants for the first label of `name` (§4.10).
fn mutate(name: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut parts = name.splitn(2, '.');
    let first = match parts.next() {
        Some(f) => f,
        None => return out,
    };
    let rest = parts.next().unwrap_or("");

    let digit_positions: Vec<usize> = first.char_indices().filter(|(_, c)| c.is_ascii_digit()).map(|(i, _)| i).collect();

    if let Some(&first_digit_pos) = digit_positions.first() {
        for d in b'0'..=b'9' {
            out.push(join(&replace_at(first, first_digit_pos, d as char), rest));
        }
        out.push(join(&delete_at(first, first_digit_pos), rest));

        if let Some(&last_digit_pos) = digit_positions.iter().rev().find(|&&p| p > first_digit_pos) {
            for d in b'0'..=b'9' {
                out.push(join(&replace_at(first, last_digit_pos, d as char), rest));
            }
        }
    }

    for d in b'0'..=b'9' {
        let digit = (d as char).to_string();
        out.push(join(&format!("{}-{}", first, digit), rest));
        out.push(join(&format!("{}{}", first, digit), rest));
    }

    out
}

fn replace_at(s: &str, idx: usize, replacement: char) -> String {
    let mut chars: Vec<char> = s.chars().collect();
    if idx < chars.len() {
        chars[idx] = replacement;
    }
    chars.into_iter().collect()
}

fn delete_at(s: &str, idx: usize) -> String {
    s.chars().enumerate().filter(|(i, _)| *i != idx).map(|(_, c)| c).collect()
}

fn join(first: &str, rest: &str) -> String {
    if rest.is_empty() {
        first.to_string()
    } else {
        format!("{}.{}", first, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutate_without_digits_only_appends() {
        let variants = mutate("web.example.com");
        assert!(variants.contains(&"web-0.example.com".to_string()));
        assert!(variants.contains(&"web0.example.com".to_string()));
        assert_eq!(variants.len(), 20);
    }

    #[test]
    fn mutate_with_digit_flips_and_deletes() {
        let variants = mutate("web1.example.com");
        assert!(variants.contains(&"web0.example.com".to_string()));
        assert!(variants.contains(&"web.example.com".to_string()));
    }
}
