//! Append-only record log (§6 "Persisted state"): one JSON-line entry per
//! graph insertion, replayable to reconstruct the graph. Follows the same
//! `from_file`/serde round-trip idiom as [`crate::config::Config`], applied
//! to a stream of records instead of a single document.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::{EdgeLabel, Graph, NodeKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogEntry {
    Domain { uuid: Uuid, ts: String, name: String },
    Cname { uuid: Uuid, ts: String, from: String, to: String },
    A { uuid: Uuid, ts: String, from: String, addr: String },
    Aaaa { uuid: Uuid, ts: String, from: String, addr: String },
    Ptr { uuid: Uuid, ts: String, from: String, to: String },
    Srv { uuid: Uuid, ts: String, from: String, to: String },
    Ns { uuid: Uuid, ts: String, from: String, to: String },
    Mx { uuid: Uuid, ts: String, from: String, to: String },
    Infrastructure { uuid: Uuid, ts: String, netblock: String, asn: u32 },
}

/// Appends one JSON line per insertion. The `uuid` namespaces a single run
/// (every entry written by one `RecordLog` instance shares it).
pub struct RecordLog {
    writer: Mutex<BufWriter<File>>,
    run_id: Uuid,
}

impl RecordLog {
    pub fn create(path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(RecordLog { writer: Mutex::new(BufWriter::new(file)), run_id: Uuid::new_v4() })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn append(&self, entry: &LogEntry) {
        let mut writer = self.writer.lock().unwrap();
        if let Ok(line) = serde_json::to_string(entry) {
            let _ = writeln!(writer, "{}", line);
            let _ = writer.flush();
        }
    }
}

/// Reconstruct a [`Graph`] by replaying a log file in order. Malformed
/// lines are skipped (§7: malformed input is dropped, not fatal).
pub fn replay(path: &Path, graph: &Graph) -> std::io::Result<()> {
    let file = File::open(path)?;
    for line in BufReader::new(file).lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };
        let entry: LogEntry = match serde_json::from_str(&line) {
            Ok(e) => e,
            Err(_) => continue,
        };
        apply(graph, entry);
    }
    Ok(())
}

fn apply(graph: &Graph, entry: LogEntry) {
    match entry {
        LogEntry::Domain { name, .. } => {
            graph.insert_node(&name, NodeKind::Domain);
            graph.insert_node(&name, NodeKind::Subdomain);
        }
        LogEntry::Cname { from, to, .. } => {
            graph.insert_node(&from, NodeKind::Subdomain);
            graph.insert_node(&to, NodeKind::Subdomain);
            graph.insert_edge(&from, EdgeLabel::CnameTo, &to);
        }
        LogEntry::A { from, addr, .. } => {
            graph.insert_node(&from, NodeKind::Subdomain);
            graph.insert_node(&addr, NodeKind::IpAddress);
            graph.insert_edge(&from, EdgeLabel::ATo, &addr);
        }
        LogEntry::Aaaa { from, addr, .. } => {
            graph.insert_node(&from, NodeKind::Subdomain);
            graph.insert_node(&addr, NodeKind::IpAddress);
            graph.insert_edge(&from, EdgeLabel::AaaaTo, &addr);
        }
        LogEntry::Ptr { from, to, .. } => {
            graph.insert_node(&from, NodeKind::Subdomain);
            graph.insert_node(&to, NodeKind::Subdomain);
            graph.insert_edge(&from, EdgeLabel::PtrTo, &to);
        }
        LogEntry::Srv { from, to, .. } => {
            graph.insert_node(&from, NodeKind::Subdomain);
            graph.insert_node(&to, NodeKind::Subdomain);
            graph.insert_edge(&from, EdgeLabel::ServiceFor, &to);
            graph.insert_edge(&from, EdgeLabel::SrvTo, &to);
        }
        LogEntry::Ns { from, to, .. } => {
            graph.insert_node(&from, NodeKind::Subdomain);
            graph.insert_node(&to, NodeKind::Ns);
            graph.insert_node(&to, NodeKind::Subdomain);
            graph.insert_edge(&from, EdgeLabel::NsTo, &to);
        }
        LogEntry::Mx { from, to, .. } => {
            graph.insert_node(&from, NodeKind::Subdomain);
            graph.insert_node(&to, NodeKind::Mx);
            graph.insert_node(&to, NodeKind::Subdomain);
            graph.insert_edge(&from, EdgeLabel::MxTo, &to);
        }
        LogEntry::Infrastructure { netblock, .. } => {
            graph.insert_node(&netblock, NodeKind::Netblock);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn append_then_replay_reconstructs_cname_chain() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("subsonar-record-log-test-{}.jsonl", Uuid::new_v4()));
        let log = RecordLog::create(path.to_str().unwrap()).unwrap();

        log.append(&LogEntry::Domain { uuid: log.run_id(), ts: "0".to_string(), name: "example.com".to_string() });
        log.append(&LogEntry::Cname { uuid: log.run_id(), ts: "1".to_string(), from: "a.example.com".to_string(), to: "b.example.com".to_string() });
        log.append(&LogEntry::A { uuid: log.run_id(), ts: "2".to_string(), from: "b.example.com".to_string(), addr: "1.2.3.4".to_string() });
        drop(log);

        let graph = Graph::new();
        replay(&path, &graph).unwrap();
        assert_eq!(graph.addresses_of("a.example.com"), vec!["1.2.3.4".to_string()]);

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents.lines().count(), 3);

        let _ = std::fs::remove_file(&path);
    }
}
