//! Prometheus-compatible metrics collection.
//!
//! Counters only increase, gauges are set, histograms accumulate raw
//! observations and are summarized at render time. Rendering supports the
//! Prometheus text exposition format and a JSON snapshot for the control
//! socket's `metrics` command.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Histogram bucket boundaries in seconds.
const BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Requested output format for a metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsFormat {
    #[default]
    Json,
    Prometheus,
}

#[derive(Default)]
struct Inner {
    meta: BTreeMap<String, (&'static str, &'static str)>,
    counters: BTreeMap<String, f64>,
    gauges: BTreeMap<String, f64>,
    histograms: BTreeMap<String, Vec<f64>>,
}

/// Thread-safe metrics collector for one agent process.
#[derive(Default)]
pub struct Metrics {
    inner: Mutex<Inner>,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register metadata emitted as `# HELP` / `# TYPE` lines.
    pub fn register(&self, name: &str, kind: &'static str, help: &'static str) {
        self.inner.lock().meta.insert(name.to_owned(), (kind, help));
    }

    /// Increment a counter by 1.
    pub fn inc_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let key = series_key(name, labels);
        *self.inner.lock().counters.entry(key).or_insert(0.0) += 1.0;
    }

    /// Set a gauge to an absolute value.
    pub fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = series_key(name, labels);
        self.inner.lock().gauges.insert(key, value);
    }

    /// Record a histogram observation (seconds).
    pub fn observe(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = series_key(name, labels);
        self.inner.lock().histograms.entry(key).or_default().push(value);
    }

    /// Current value of a counter series, 0 if never incremented.
    #[must_use]
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        let key = series_key(name, labels);
        self.inner.lock().counters.get(&key).copied().unwrap_or(0.0)
    }

    /// JSON snapshot of every series.
    #[must_use]
    pub fn snapshot_json(&self) -> Value {
        let inner = self.inner.lock();

        let counters: BTreeMap<_, _> = inner
            .counters
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        let gauges: BTreeMap<_, _> = inner
            .gauges
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        let histograms: BTreeMap<_, _> = inner
            .histograms
            .iter()
            .filter(|(_, obs)| !obs.is_empty())
            .map(|(k, obs)| (k.clone(), summarize(obs)))
            .collect();

        json!({
            "counters": counters,
            "gauges": gauges,
            "histograms": histograms,
        })
    }

    /// Prometheus text exposition of every series.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let inner = self.inner.lock();
        let mut out = String::new();

        for (name, (kind, help)) in &inner.meta {
            out.push_str(&format!("# HELP {name} {help}\n# TYPE {name} {kind}\n"));

            match *kind {
                "counter" => {
                    for (key, value) in inner.counters.range(name.clone()..) {
                        if !key.starts_with(name.as_str()) {
                            break;
                        }
                        out.push_str(&format!("{key} {value}\n"));
                    }
                }
                "gauge" => {
                    for (key, value) in inner.gauges.range(name.clone()..) {
                        if !key.starts_with(name.as_str()) {
                            break;
                        }
                        out.push_str(&format!("{key} {value}\n"));
                    }
                }
                "histogram" => {
                    for (key, obs) in inner.histograms.range(name.clone()..) {
                        if !key.starts_with(name.as_str()) {
                            break;
                        }
                        render_histogram(&mut out, name, key, obs);
                    }
                }
                _ => {}
            }
            out.push('\n');
        }
        out
    }
}

fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_owned();
    }
    let rendered: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect();
    format!("{name}{{{}}}", rendered.join(","))
}

fn summarize(obs: &[f64]) -> Value {
    let mut sorted = obs.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let count = sorted.len();
    let sum: f64 = sorted.iter().sum();
    let quantile = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

    json!({
        "count": count,
        "sum": sum,
        "min": sorted[0],
        "max": sorted[count - 1],
        "avg": sum / count as f64,
        "p50": quantile(0.50),
        "p95": quantile(0.95),
        "p99": quantile(0.99),
    })
}

fn render_histogram(out: &mut String, name: &str, key: &str, obs: &[f64]) {
    // Labels of this series, re-attached to the bucket suffix.
    let labels = &key[name.len()..];
    let labels_inner = labels
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or("");

    for bound in BUCKETS {
        let cumulative = obs.iter().filter(|v| **v <= *bound).count();
        let le = if labels_inner.is_empty() {
            format!("le=\"{bound}\"")
        } else {
            format!("{labels_inner},le=\"{bound}\"")
        };
        out.push_str(&format!("{name}_bucket{{{le}}} {cumulative}\n"));
    }
    let le = if labels_inner.is_empty() {
        "le=\"+Inf\"".to_owned()
    } else {
        format!("{labels_inner},le=\"+Inf\"")
    };
    out.push_str(&format!("{name}_bucket{{{le}}} {}\n", obs.len()));
    out.push_str(&format!(
        "{name}_sum{labels} {}\n",
        obs.iter().sum::<f64>()
    ));
    out.push_str(&format!("{name}_count{labels} {}\n", obs.len()));
}
