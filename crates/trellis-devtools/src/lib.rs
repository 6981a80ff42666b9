//! Perf tracing and layout inspection for Trellis trees.

use std::collections::HashMap;
use std::fmt::Write as _;

use parking_lot::Mutex;
use web_time::Duration;

use trellis_core::layout::{LayoutKind, NodeLayout};
use trellis_core::{GlobalKey, LayoutState, PerfEvent, PerfLogger, PerfMarker, TreeId};

/// One finished phase.
#[derive(Clone, Debug)]
pub struct TraceRecord {
    pub event: PerfEvent,
    pub tree_id: TreeId,
    pub duration: Duration,
    /// Annotations made while the phase was open.
    pub annotations: Vec<(String, String)>,
}

/// Per-event running numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PhaseStats {
    pub count: u64,
    pub total_ms: f32,
    /// Exponential moving average of the phase duration.
    pub smoothed_ms: f32,
}

impl PhaseStats {
    fn record(&mut self, ms: f32) {
        // simple EMA
        let a = 0.2;
        self.smoothed_ms = if self.count == 0 {
            ms
        } else {
            (1.0 - a) * self.smoothed_ms + a * ms
        };
        self.count += 1;
        self.total_ms += ms;
    }
}

#[derive(Default)]
struct Inner {
    records: Vec<TraceRecord>,
    pending: Vec<(String, String)>,
    stats: HashMap<PerfEvent, PhaseStats>,
}

/// [`PerfLogger`] that keeps the most recent phases in memory.
pub struct TraceRecorder {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl TraceRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.inner.lock().records.clone()
    }

    pub fn count(&self, event: PerfEvent) -> u64 {
        self.stats(event).count
    }

    pub fn stats(&self, event: PerfEvent) -> PhaseStats {
        self.inner.lock().stats.get(&event).copied().unwrap_or_default()
    }

    pub fn clear(&self) {
        *self.inner.lock() = Inner::default();
    }

    /// One line per event kind seen so far, in a stable order.
    pub fn summary(&self) -> String {
        let inner = self.inner.lock();
        let mut events: Vec<_> = inner.stats.iter().collect();
        events.sort_by_key(|(e, _)| e.to_string());
        let mut out = String::new();
        for (event, s) in events {
            let _ = writeln!(
                out,
                "{event}: n={} total={:.2}ms avg~{:.2}ms",
                s.count, s.total_ms, s.smoothed_ms
            );
        }
        out
    }
}

impl PerfLogger for TraceRecorder {
    fn end(&self, marker: PerfMarker) {
        let duration = marker.elapsed();
        let mut inner = self.inner.lock();
        let annotations = std::mem::take(&mut inner.pending);
        inner
            .stats
            .entry(marker.event)
            .or_default()
            .record(duration.as_secs_f32() * 1000.0);
        if inner.records.len() == self.capacity {
            inner.records.remove(0);
        }
        inner.records.push(TraceRecord {
            event: marker.event,
            tree_id: marker.tree_id,
            duration,
            annotations,
        });
    }

    fn annotate(&self, name: &str, value: &str) {
        self.inner
            .lock()
            .pending
            .push((name.to_owned(), value.to_owned()));
    }
}

/// Indented outline of a committed layout, one node per line.
pub fn dump_layout(layout: &LayoutState) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "layout v{} (resolve v{}) {}x{}",
        layout.version(),
        layout.resolve_version(),
        layout.width(),
        layout.height()
    );
    if let Some(root) = layout.root_key() {
        dump_node(layout, root, 1, &mut out);
    }
    out
}

fn dump_node(layout: &LayoutState, key: &GlobalKey, depth: usize, out: &mut String) {
    let Some(node) = layout.layout(key) else {
        let _ = writeln!(out, "{:indent$}{key} <missing>", "", indent = depth * 2);
        return;
    };
    let _ = writeln!(
        out,
        "{:indent$}{}{} [{} {} {}x{}]{}",
        "",
        node.key,
        tag(node),
        node.x,
        node.y,
        node.width,
        node.height,
        node.measure_source
            .map(|s| format!(" {s:?}"))
            .unwrap_or_default(),
        indent = depth * 2
    );
    for child in node.child_keys() {
        dump_node(layout, child, depth + 1, out);
    }
}

fn tag(node: &NodeLayout) -> &'static str {
    match node.kind {
        LayoutKind::Deferred => " (deferred)",
        LayoutKind::Standard => "",
    }
}
