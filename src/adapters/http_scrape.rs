//! An HTTP scraper adapter (§4, "Source adapters"): fetches a page and
//! scans the body for subdomain-like strings in scope. Grounded on the
//! corpus's `reqwest::blocking::Client` request pattern.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::adapters::SourceAdapter;
use crate::bus::{Event, EventBus, Topic};
use crate::model::{DnsRequest, Tag};

pub struct HttpScrapeAdapter {
    url_template: String,
    api_key: Option<String>,
}

impl HttpScrapeAdapter {
    /// `url_template` may contain a `{domain}` placeholder substituted at
    /// request time.
    pub fn new(url_template: String, api_key: Option<String>) -> Self {
        HttpScrapeAdapter { url_template, api_key }
    }
}

impl SourceAdapter for HttpScrapeAdapter {
    fn name(&self) -> &'static str {
        "http_scrape"
    }

    fn run(&self, bus: Arc<EventBus>, domain: &str) {
        let url = self.url_template.replace("{domain}", domain);
        let client = match reqwest::blocking::Client::builder().timeout(Duration::from_secs(15)).build() {
            Ok(c) => c,
            Err(err) => {
                log::warn!("[{}] building http client: {}", self.name(), err);
                return;
            }
        };

        let mut request = client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let body = match request.send().and_then(|resp| resp.error_for_status()).and_then(|resp| resp.text()) {
            Ok(body) => body,
            Err(err) => {
                log::warn!("[{}] request to '{}' failed: {}", self.name(), url, err);
                return;
            }
        };

        let pattern = format!(r"(?i)\b(?:[a-z0-9_-]+\.)*{}\b", regex::escape(domain));
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(_) => return,
        };

        for m in re.find_iter(&body) {
            bus.publish(
                Topic::NewName,
                Event::NewName(DnsRequest {
                    name: m.as_str().to_lowercase(),
                    domain: domain.to_string(),
                    tag: Tag::Scrape,
                    source: self.name().to_string(),
                    records: None,
                }),
            );
        }
    }
}
