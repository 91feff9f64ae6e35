use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use crate::dispatch::{Handled, HandlerEvent};
use crate::gate::Rejected;
use crate::session::SessionFlag;

type LabelKey = Vec<(String, String)>;

fn label_key(labels: &[(&str, &str)]) -> LabelKey {
    let mut key: LabelKey = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn label_str(key: &LabelKey) -> String {
    key.iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect::<Vec<_>>()
        .join(",")
}

/// `name{labels}` or bare `name` when there are no labels.
fn series(name: &str, key: &LabelKey) -> String {
    if key.is_empty() {
        name.to_string()
    } else {
        format!("{}{{{}}}", name, label_str(key))
    }
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<LabelKey, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: u64) {
        let counter = self.map.entry(label_key(labels)).or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(v, Ordering::Relaxed);
    }

    /// Current value, 0 when never touched.
    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} counter", name);
        for r in self.map.iter() {
            let _ = writeln!(out, "{} {}", series(name, r.key()), r.value().load(Ordering::Relaxed));
        }
    }
}

#[derive(Default)]
pub struct GaugeVec {
    map: DashMap<LabelKey, AtomicI64>,
}

impl GaugeVec {
    pub fn set(&self, labels: &[(&str, &str)], v: i64) {
        let gauge = self.map.entry(label_key(labels)).or_insert_with(|| AtomicI64::new(0));
        gauge.store(v, Ordering::Relaxed);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: i64) {
        let gauge = self.map.entry(label_key(labels)).or_insert_with(|| AtomicI64::new(0));
        gauge.fetch_add(v, Ordering::Relaxed);
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} gauge", name);
        for r in self.map.iter() {
            let _ = writeln!(out, "{} {}", series(name, r.key()), r.value().load(Ordering::Relaxed));
        }
    }
}

// 50us .. 1s. A session update should sit well under the 100ms budget.
const BUCKETS_MICROS: [u64; 10] = [
    50, 100, 250, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 1_000_000,
];

#[derive(Default)]
struct AtomicHistogram {
    count: AtomicU64,
    sum: AtomicU64,
    buckets: [AtomicU64; BUCKETS_MICROS.len()],
}

#[derive(Default)]
pub struct HistogramVec {
    map: DashMap<LabelKey, AtomicHistogram>,
}

impl HistogramVec {
    /// Observe a duration in microseconds; buckets are cumulative.
    pub fn observe(&self, labels: &[(&str, &str)], duration: Duration) {
        let hist = self.map.entry(label_key(labels)).or_default();
        let micros = duration.as_micros() as u64;

        hist.count.fetch_add(1, Ordering::Relaxed);
        hist.sum.fetch_add(micros, Ordering::Relaxed);
        for (bucket, &le) in hist.buckets.iter().zip(BUCKETS_MICROS.iter()) {
            if micros <= le {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for r in self.map.iter() {
            let labels = label_str(r.key());
            let hist = r.value();
            let prefix = if labels.is_empty() {
                String::new()
            } else {
                format!("{},", labels)
            };

            for (bucket, &le) in hist.buckets.iter().zip(BUCKETS_MICROS.iter()) {
                let _ = writeln!(
                    out,
                    "{}_bucket{{{}le=\"{}\"}} {}",
                    name,
                    prefix,
                    le,
                    bucket.load(Ordering::Relaxed)
                );
            }
            let count = hist.count.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{{}le=\"+Inf\"}} {}", name, prefix, count);
            let _ = writeln!(out, "{} {}", series(&format!("{name}_sum"), r.key()), hist.sum.load(Ordering::Relaxed));
            let _ = writeln!(out, "{} {}", series(&format!("{name}_count"), r.key()), count);
        }
    }
}

#[derive(Default)]
pub struct BackendMetrics {
    pub packets: CounterVec,
    pub rejections: CounterVec,
    pub handler_events: CounterVec,
    pub session_flags: CounterVec,
    pub session_update_duration: HistogramVec,
    pub long_session_updates: CounterVec,
    pub topology_relays: GaugeVec,
    draining: AtomicBool,
}

impl BackendMetrics {
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::Relaxed);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Relaxed)
    }

    pub fn record_rejected(&self, rejected: &Rejected) {
        self.rejections.inc(&[("reason", rejected.as_str())]);
    }

    pub fn record_handled(&self, handled: &Handled) {
        self.packets.inc(&[("type", handled.packet_type.as_str())]);
        for event in &handled.events {
            self.handler_events.inc(&[("event", event.as_str())]);
            if *event == HandlerEvent::LongSessionUpdate {
                self.long_session_updates.inc(&[]);
            }
        }
        if let Some(session) = &handled.session {
            for flag in &session.flags {
                self.session_flags.inc(&[("flag", flag.as_str())]);
            }
            self.session_update_duration.observe(&[], session.elapsed);
        }
    }

    pub fn session_flag_count(&self, flag: SessionFlag) -> u64 {
        self.session_flags.get(&[("flag", flag.as_str())])
    }

    /// Render every metric plus caller-provided `(series, value)` lines.
    pub fn render(&self, extra: &[(String, u64)]) -> String {
        let mut out = String::new();
        self.packets.render("nextroute_packets_total", &mut out);
        self.rejections.render("nextroute_rejections_total", &mut out);
        self.handler_events.render("nextroute_handler_events_total", &mut out);
        self.session_flags.render("nextroute_session_flags_total", &mut out);
        self.session_update_duration
            .render("nextroute_session_update_duration_micros", &mut out);
        self.long_session_updates
            .render("nextroute_long_session_updates_total", &mut out);
        self.topology_relays.render("nextroute_topology_relays", &mut out);

        let _ = writeln!(
            out,
            "# TYPE nextroute_draining gauge\nnextroute_draining {}",
            u8::from(self.is_draining())
        );
        for (k, v) in extra {
            let _ = writeln!(out, "{} {}", k, v);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_labels_are_order_independent() {
        let c = CounterVec::default();
        c.inc(&[("a", "1"), ("b", "2")]);
        c.inc(&[("b", "2"), ("a", "1")]);
        assert_eq!(c.get(&[("a", "1"), ("b", "2")]), 2);

        let mut out = String::new();
        c.render("x_total", &mut out);
        assert!(out.contains("x_total{a=\"1\",b=\"2\"} 2"));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let h = HistogramVec::default();
        h.observe(&[], Duration::from_micros(200));
        let mut out = String::new();
        h.render("d", &mut out);
        assert!(out.contains("d_bucket{le=\"100\"} 0"));
        assert!(out.contains("d_bucket{le=\"250\"} 1"));
        assert!(out.contains("d_bucket{le=\"+Inf\"} 1"));
        assert!(out.contains("d_sum 200"));
    }

    #[test]
    fn render_reports_draining_and_extra_lines() {
        let m = BackendMetrics::default();
        m.set_draining();
        let out = m.render(&[("nextroute_sink_drops_total{message=\"x\"}".into(), 3)]);
        assert!(out.contains("nextroute_draining 1"));
        assert!(out.contains("nextroute_sink_drops_total{message=\"x\"} 3"));
    }
}
