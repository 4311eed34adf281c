//! Process metrics registry with Prometheus text exposition
//!
//! The registry is an explicit handle threaded through constructors so tests
//! can run against isolated instances.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// A fixed-bucket histogram rendered in Prometheus cumulative form
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<f64>,
    inner: Mutex<HistogramInner>,
}

#[derive(Debug)]
struct HistogramInner {
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Histogram {
    pub fn new(buckets: &[f64]) -> Self {
        Self {
            buckets: buckets.to_vec(),
            inner: Mutex::new(HistogramInner {
                counts: vec![0; buckets.len()],
                sum: 0.0,
                count: 0,
            }),
        }
    }

    pub fn observe(&self, value: f64) {
        let mut inner = self.inner.lock();
        for (i, bound) in self.buckets.iter().enumerate() {
            if value <= *bound {
                inner.counts[i] += 1;
            }
        }
        inner.sum += value;
        inner.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().count
    }

    fn render_into(&self, output: &mut String, name: &str, help: &str) {
        let inner = self.inner.lock();
        output.push_str(&format!("# HELP {} {}\n# TYPE {} histogram\n", name, help, name));
        for (bound, count) in self.buckets.iter().zip(&inner.counts) {
            output.push_str(&format!("{}_bucket{{le=\"{}\"}} {}\n", name, bound, count));
        }
        output.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", name, inner.count));
        output.push_str(&format!("{}_sum {}\n", name, inner.sum));
        output.push_str(&format!("{}_count {}\n", name, inner.count));
    }
}

/// Metrics registry for the arena server
#[derive(Debug)]
pub struct Metrics {
    /// Sessions currently online
    pub online_sessions: AtomicU64,
    /// Players waiting in the match queue
    pub match_queue: AtomicU64,
    /// Total outbound bytes accepted into send queues
    pub send_bytes: AtomicU64,
    /// Total inbound frame bytes
    pub recv_bytes: AtomicU64,
    /// Outbound messages dropped due to backpressure
    pub dropped_messages: AtomicU64,
    /// Queue-to-match latency in milliseconds
    pub match_duration_ms: Histogram,
    /// Per-tick room loop delay in milliseconds
    pub room_tick_delay_ms: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            online_sessions: AtomicU64::new(0),
            match_queue: AtomicU64::new(0),
            send_bytes: AtomicU64::new(0),
            recv_bytes: AtomicU64::new(0),
            dropped_messages: AtomicU64::new(0),
            match_duration_ms: Histogram::new(&[50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0]),
            room_tick_delay_ms: Histogram::new(&[1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0]),
        }
    }

    /// Generate Prometheus-format metrics output
    pub fn render(&self) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $kind:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $kind, $name, $value
                ));
            };
        }

        metric!(
            "arena_sessions_online_total",
            "Online sessions",
            "gauge",
            self.online_sessions.load(Ordering::Relaxed)
        );
        metric!(
            "arena_match_queue_total",
            "Players waiting in match queue",
            "gauge",
            self.match_queue.load(Ordering::Relaxed)
        );
        metric!(
            "arena_net_send_bytes_total",
            "Total outbound bytes",
            "counter",
            self.send_bytes.load(Ordering::Relaxed)
        );
        metric!(
            "arena_net_recv_bytes_total",
            "Total inbound bytes",
            "counter",
            self.recv_bytes.load(Ordering::Relaxed)
        );
        metric!(
            "arena_net_dropped_messages_total",
            "Dropped outbound messages due to backpressure",
            "counter",
            self.dropped_messages.load(Ordering::Relaxed)
        );

        self.match_duration_ms.render_into(
            &mut output,
            "arena_match_duration_ms",
            "Matchmaking duration in ms",
        );
        self.room_tick_delay_ms.render_into(
            &mut output,
            "arena_room_tick_delay_ms",
            "Room tick delay in ms",
        );

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
