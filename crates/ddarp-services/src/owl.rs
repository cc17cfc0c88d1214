//! One-way-latency measurement state: per-pair sample windows and the
//! metrics derived from them.
//!
//! One window exists per ordered pair (probe source, receiver). The inbound
//! receive task is the only writer of any given window; readers take
//! snapshots of the derived metrics. Loss is sequence-gap based, so a
//! "lost" probe is never inserted — it shows up as a hole in the range of
//! sequence numbers present.

use std::collections::VecDeque;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

/// Samples retained per ordered pair.
pub const WINDOW_CAPACITY: usize = 100;

/// Below this many samples the pair has no edge at all.
pub const MIN_SAMPLES: usize = 3;

/// One received, authenticated probe.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSample {
    pub seq: u32,
    /// Receiver wall clock minus sender wall clock. Negative under clock
    /// skew; skew is surfaced through [`SampleWindow::skew_ms`].
    pub latency_ms: f64,
    pub received_at: Instant,
}

/// Metrics derived from a full window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EdgeMetrics {
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub loss_ratio: f64,
}

/// Insertion-ordered ring of the most recent [`WINDOW_CAPACITY`] samples.
#[derive(Debug, Default)]
pub struct SampleWindow {
    samples: VecDeque<ProbeSample>,
}

impl SampleWindow {
    pub fn insert(&mut self, sample: ProbeSample) {
        if self.samples.len() == WINDOW_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last_received(&self) -> Option<Instant> {
        self.samples.iter().map(|s| s.received_at).max()
    }

    /// Magnitude of the most negative latency sample, in milliseconds.
    /// Zero when every sample is non-negative. A persistent non-zero value
    /// means the clocks of the pair are skewed.
    pub fn skew_ms(&self) -> f64 {
        self.samples
            .iter()
            .map(|s| s.latency_ms)
            .fold(0.0f64, f64::min)
            .abs()
    }

    /// Derive metrics over the window, or None below [`MIN_SAMPLES`].
    pub fn derive(&self) -> Option<EdgeMetrics> {
        let n = self.samples.len();
        if n < MIN_SAMPLES {
            return None;
        }

        let mean = self.samples.iter().map(|s| s.latency_ms).sum::<f64>() / n as f64;

        // corrected sample standard deviation
        let variance = self
            .samples
            .iter()
            .map(|s| {
                let d = s.latency_ms - mean;
                d * d
            })
            .sum::<f64>()
            / (n - 1) as f64;

        // expected count spans the sequence range present in the window;
        // out-of-order arrivals are already inside, duplicates clamp to 0
        let min_seq = self.samples.iter().map(|s| s.seq).min().unwrap_or(0);
        let max_seq = self.samples.iter().map(|s| s.seq).max().unwrap_or(0);
        let expected = (max_seq as u64 - min_seq as u64) + 1;
        let loss_ratio = (1.0 - n as f64 / expected as f64).clamp(0.0, 1.0);

        Some(EdgeMetrics {
            latency_ms: mean,
            jitter_ms: variance.sqrt(),
            loss_ratio,
        })
    }
}

/// A locally measured edge, ready for gossip or topology insertion.
#[derive(Debug, Clone)]
pub struct LocalEdge {
    pub src: String,
    pub dst: String,
    pub metrics: EdgeMetrics,
    pub last_received: Instant,
}

/// All sample windows of this node, keyed by ordered pair.
#[derive(Default)]
pub struct OwlStore {
    windows: DashMap<(String, String), SampleWindow>,
}

impl OwlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a sample for (src → dst) and return the freshly derived
    /// metrics, if the window is deep enough to have any.
    pub fn record(&self, src: &str, dst: &str, sample: ProbeSample) -> Option<EdgeMetrics> {
        let mut window = self
            .windows
            .entry((src.to_string(), dst.to_string()))
            .or_default();
        window.insert(sample);
        window.derive()
    }

    pub fn window_len(&self, src: &str, dst: &str) -> usize {
        self.windows
            .get(&(src.to_string(), dst.to_string()))
            .map(|w| w.len())
            .unwrap_or(0)
    }

    /// Drop every window involving `node_id`, in either position.
    pub fn drop_peer(&self, node_id: &str) {
        self.windows
            .retain(|(src, dst), _| src != node_id && dst != node_id);
    }

    /// Every pair that currently derives metrics. These are the edges this
    /// node measured itself and is entitled to gossip.
    pub fn local_edges(&self) -> Vec<LocalEdge> {
        self.windows
            .iter()
            .filter_map(|entry| {
                let (src, dst) = entry.key();
                let window = entry.value();
                let metrics = window.derive()?;
                Some(LocalEdge {
                    src: src.clone(),
                    dst: dst.clone(),
                    metrics,
                    last_received: window.last_received()?,
                })
            })
            .collect()
    }

    /// Clock-skew observable per pair, for the metrics exporter.
    pub fn skews(&self) -> Vec<(String, String, f64)> {
        self.windows
            .iter()
            .map(|entry| {
                let (src, dst) = entry.key();
                (src.clone(), dst.clone(), entry.value().skew_ms())
            })
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
