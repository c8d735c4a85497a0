//! The simplest possible adapter: publish a fixed, caller-supplied list of
//! names, tagged `external` (user-provided names are trusted per §3).

use std::sync::Arc;

use crate::adapters::SourceAdapter;
use crate::bus::{Event, EventBus, Topic};
use crate::model::{DnsRequest, Tag};

pub struct StaticListAdapter {
    names: Vec<String>,
}

impl StaticListAdapter {
    pub fn new(names: Vec<String>) -> Self {
        StaticListAdapter { names }
    }
}

impl SourceAdapter for StaticListAdapter {
    fn name(&self) -> &'static str {
        "static_list"
    }

    fn run(&self, bus: Arc<EventBus>, domain: &str) {
        for name in &self.names {
            bus.publish(
                Topic::NewName,
                Event::NewName(DnsRequest { name: name.clone(), domain: domain.to_string(), tag: Tag::External, source: self.name().to_string(), records: None }),
            );
        }
    }
}
