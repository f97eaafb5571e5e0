use std::collections::HashMap;

/// Namespaced in-memory metrics sink. Callers publish into it at their own
/// cadence; nothing in the crate exports it anywhere.
#[derive(Debug)]
pub struct MetricsRegistry {
    namespace: String,
    counters: HashMap<String, u64>,
    gauges: HashMap<String, u64>,
}

impl MetricsRegistry {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            counters: HashMap::new(),
            gauges: HashMap::new(),
        }
    }

    pub fn inc_counter(&mut self, name: impl Into<String>, delta: u64) -> u64 {
        let key = self.qualify(name.into());
        let counter = self.counters.entry(key).or_insert(0);
        *counter = counter.saturating_add(delta);
        *counter
    }

    pub fn set_gauge(&mut self, name: impl Into<String>, value: u64) {
        let key = self.qualify(name.into());
        self.gauges.insert(key, value);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.clone(),
            gauges: self.gauges.clone(),
        }
    }

    fn qualify(&self, name: String) -> String {
        let namespace = if self.namespace.ends_with('.') {
            self.namespace.clone()
        } else {
            format!("{}.", self.namespace)
        };
        if name.starts_with(&namespace) {
            name
        } else {
            format!("{}{}", namespace, name)
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, u64>,
}

/// Event counts accumulated by the subscriber between metric publications.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscriberCounters {
    pub fragments_delivered: u64,
    pub stale_fragments_skipped: u64,
    pub foreign_stream_skipped: u64,
    pub term_switches: u64,
    pub future_acks_deferred: u64,
    pub resends_applied: u64,
    pub archive_reads: u64,
}

impl SubscriberCounters {
    pub fn record_delivered(&mut self) {
        self.fragments_delivered = self.fragments_delivered.saturating_add(1);
    }

    pub fn record_stale_skipped(&mut self) {
        self.stale_fragments_skipped = self.stale_fragments_skipped.saturating_add(1);
    }

    pub fn record_foreign_skipped(&mut self) {
        self.foreign_stream_skipped = self.foreign_stream_skipped.saturating_add(1);
    }

    pub fn record_term_switch(&mut self) {
        self.term_switches = self.term_switches.saturating_add(1);
    }

    pub fn record_future_ack_deferred(&mut self) {
        self.future_acks_deferred = self.future_acks_deferred.saturating_add(1);
    }

    pub fn record_resend_applied(&mut self) {
        self.resends_applied = self.resends_applied.saturating_add(1);
    }

    pub fn record_archive_read(&mut self) {
        self.archive_reads = self.archive_reads.saturating_add(1);
    }
}
