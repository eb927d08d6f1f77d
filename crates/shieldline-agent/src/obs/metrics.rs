//! Counter registry for the agent.
//!
//! Counters carry dynamic labels backed by `DashMap`; label sets are sorted
//! into key vectors so rendering order per series is deterministic.

use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn label_key(labels: &[(&str, &str)]) -> Vec<(String, String)> {
    let mut key: Vec<(String, String)> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<Vec<(String, String)>, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: u64) {
        let counter = self
            .map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(v, Ordering::Relaxed);
    }

    /// Current value of one series; 0 if never incremented.
    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} counter", name);
        let mut rows: Vec<(String, u64)> = self
            .map
            .iter()
            .map(|r| {
                let labels = r
                    .key()
                    .iter()
                    .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
                    .collect::<Vec<_>>()
                    .join(",");
                (labels, r.value().load(Ordering::Relaxed))
            })
            .collect();
        rows.sort();
        for (labels, val) in rows {
            let _ = writeln!(out, "{}{{{}}} {}", name, labels, val);
        }
    }
}

#[derive(Default)]
pub struct AgentMetrics {
    /// Requests handled, by `kind` and `tier`.
    pub messages: CounterVec,
    /// Tier-2 requests refused because of the sender origin.
    pub untrusted_rejections: CounterVec,
    /// Tier-2 requests that replied with an error, by `kind` and `code`.
    pub request_errors: CounterVec,
    /// Permission events, by `event` and `outcome`.
    pub grant_events: CounterVec,
    /// Boot attempts, by `outcome`.
    pub boots: CounterVec,
    /// Keyboard commands, by `command` and `outcome`.
    pub commands: CounterVec,
}

impl AgentMetrics {
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.messages.render("shieldline_messages_total", &mut out);
        self.untrusted_rejections
            .render("shieldline_untrusted_rejections_total", &mut out);
        self.request_errors
            .render("shieldline_request_errors_total", &mut out);
        self.grant_events.render("shieldline_grant_events_total", &mut out);
        self.boots.render("shieldline_boots_total", &mut out);
        self.commands.render("shieldline_commands_total", &mut out);
        out
    }
}
