use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// A process-wide Prometheus-compatible metrics registry.
///
/// Counters are keyed by `(name, sorted label pairs)`. Histograms record a
/// fixed set of buckets per metric name/label combination, matching the
/// exposition format Prometheus expects (`_bucket`, `_sum`, `_count`).
///
/// All counters use relaxed atomic ordering for throughput; the registry
/// itself is guarded by a `Mutex` only for the rare path of registering a
/// brand-new label combination.
#[derive(Default)]
pub struct MetricsRegistry {
    counters: Mutex<BTreeMap<String, AtomicU64>>,
    gauges: Mutex<BTreeMap<String, AtomicU64>>,
    histograms: Mutex<BTreeMap<String, Histogram>>,
}

#[derive(Default)]
struct Histogram {
    buckets: Vec<(f64, AtomicU64)>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

const DEFAULT_BUCKETS_SECONDS: &[f64] = &[0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0];

fn render_key(name: &str, labels: &[(&str, &str)]) -> String {
    let mut sorted: Vec<_> = labels.to_vec();
    sorted.sort_unstable();
    let label_str = sorted
        .iter()
        .map(|(k, v)| format!(r#"{k}="{v}""#))
        .collect::<Vec<_>>()
        .join(",");
    if label_str.is_empty() {
        name.to_owned()
    } else {
        format!("{name}{{{label_str}}}")
    }
}

impl MetricsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_counter(&self, name: &str, labels: &[(&str, &str)]) {
        self.incr_counter_by(name, labels, 1);
    }

    pub fn incr_counter_by(&self, name: &str, labels: &[(&str, &str)], delta: u64) {
        let key = render_key(name, labels);
        let counters = self.counters.lock().expect("metrics mutex poisoned");
        if let Some(counter) = counters.get(&key) {
            counter.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        drop(counters);
        let mut counters = self.counters.lock().expect("metrics mutex poisoned");
        counters
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: i64) {
        let key = render_key(name, labels);
        let mut gauges = self.gauges.lock().expect("metrics mutex poisoned");
        gauges
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .store(value as u64, Ordering::Relaxed);
    }

    pub fn observe_seconds(&self, name: &str, labels: &[(&str, &str)], value_seconds: f64) {
        let key = render_key(name, labels);
        let mut histograms = self.histograms.lock().expect("metrics mutex poisoned");
        let histogram = histograms.entry(key).or_insert_with(|| Histogram {
            buckets: DEFAULT_BUCKETS_SECONDS
                .iter()
                .map(|b| (*b, AtomicU64::new(0)))
                .collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        });
        for (bound, counter) in &histogram.buckets {
            if value_seconds <= *bound {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
        histogram
            .sum_micros
            .fetch_add((value_seconds * 1_000_000.0) as u64, Ordering::Relaxed);
        histogram.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Render every metric in Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        {
            let counters = self.counters.lock().expect("metrics mutex poisoned");
            for (key, value) in counters.iter() {
                out.push_str(&format!("{key} {}\n", value.load(Ordering::Relaxed)));
            }
        }
        {
            let gauges = self.gauges.lock().expect("metrics mutex poisoned");
            for (key, value) in gauges.iter() {
                out.push_str(&format!("{key} {}\n", value.load(Ordering::Relaxed) as i64));
            }
        }
        {
            let histograms = self.histograms.lock().expect("metrics mutex poisoned");
            for (key, histogram) in histograms.iter() {
                let base = key.split('{').next().unwrap_or(key);
                for (bound, counter) in &histogram.buckets {
                    out.push_str(&format!(
                        "{base}_bucket{{le=\"{bound}\"}} {}\n",
                        counter.load(Ordering::Relaxed)
                    ));
                }
                let sum = histogram.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
                out.push_str(&format!("{base}_sum {sum}\n"));
                out.push_str(&format!(
                    "{base}_count {}\n",
                    histogram.count.load(Ordering::Relaxed)
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates_per_label_set() {
        let registry = MetricsRegistry::new();
        registry.incr_counter("ingest_messages_total", &[("tenant", "t1"), ("result", "ok")]);
        registry.incr_counter("ingest_messages_total", &[("tenant", "t1"), ("result", "ok")]);
        registry.incr_counter("ingest_messages_total", &[("tenant", "t2"), ("result", "ok")]);

        let rendered = registry.render();
        assert!(rendered.contains(r#"ingest_messages_total{result="ok",tenant="t1"} 2"#));
        assert!(rendered.contains(r#"ingest_messages_total{result="ok",tenant="t2"} 1"#));
    }

    #[test]
    fn gauge_overwrites() {
        let registry = MetricsRegistry::new();
        registry.set_gauge("ingest_queue_depth", &[], 5);
        registry.set_gauge("ingest_queue_depth", &[], 9);
        assert!(registry.render().contains("ingest_queue_depth 9"));
    }

    #[test]
    fn histogram_tracks_count_and_sum() {
        let registry = MetricsRegistry::new();
        registry.observe_seconds("ingest_batch_write_seconds", &[], 0.02);
        registry.observe_seconds("ingest_batch_write_seconds", &[], 0.2);
        let rendered = registry.render();
        assert!(rendered.contains("ingest_batch_write_seconds_count 2"));
        assert!(rendered.contains("ingest_batch_write_seconds_bucket"));
    }
}
