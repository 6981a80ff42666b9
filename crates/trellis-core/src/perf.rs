use std::fmt;
use std::sync::Arc;

use web_time::{Duration, Instant};

use crate::error::TreeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PerfEvent {
    Resolve,
    Layout,
    Measure,
    NestedResolve,
    Commit,
}

impl fmt::Display for PerfEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PerfEvent::Resolve => "resolve",
            PerfEvent::Layout => "layout",
            PerfEvent::Measure => "measure",
            PerfEvent::NestedResolve => "nested-resolve",
            PerfEvent::Commit => "commit",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug)]
pub struct PerfMarker {
    pub event: PerfEvent,
    pub tree_id: TreeId,
    pub started: Instant,
}

impl PerfMarker {
    pub fn new(event: PerfEvent, tree_id: TreeId) -> Self {
        Self {
            event,
            tree_id,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Receives begin/end markers for pipeline phases. Every method may be a
/// no-op; the pipeline behaves the same with or without a logger.
pub trait PerfLogger: Send + Sync {
    fn begin(&self, event: PerfEvent, tree_id: TreeId) -> PerfMarker {
        PerfMarker::new(event, tree_id)
    }

    fn end(&self, marker: PerfMarker);

    fn annotate(&self, _name: &str, _value: &str) {}
}

/// Ends its marker when dropped, including on early returns.
pub(crate) struct PerfSpan<'a> {
    logger: Option<&'a dyn PerfLogger>,
    marker: Option<PerfMarker>,
}

impl<'a> PerfSpan<'a> {
    pub fn begin(logger: Option<&'a Arc<dyn PerfLogger>>, event: PerfEvent, tree_id: TreeId) -> Self {
        let logger = logger.map(|l| &**l);
        Self {
            marker: logger.map(|l| l.begin(event, tree_id)),
            logger,
        }
    }

    pub fn annotate(&self, name: &str, value: impl fmt::Display) {
        if let Some(l) = self.logger {
            l.annotate(name, &value.to_string());
        }
    }
}

impl Drop for PerfSpan<'_> {
    fn drop(&mut self) {
        if let (Some(l), Some(m)) = (self.logger, self.marker.take()) {
            l.end(m);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(PerfEvent, String)>>);

    impl PerfLogger for Recorder {
        fn end(&self, marker: PerfMarker) {
            self.0.lock().push((marker.event, "end".into()));
        }

        fn annotate(&self, name: &str, value: &str) {
            self.0.lock().push((PerfEvent::Commit, format!("{name}={value}")));
        }
    }

    #[test]
    fn span_ends_on_drop() {
        let rec = Arc::new(Recorder::default());
        let logger: Arc<dyn PerfLogger> = rec.clone();
        {
            let span = PerfSpan::begin(Some(&logger), PerfEvent::Layout, 7);
            span.annotate("nodes", 3);
        }
        let events = rec.0.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1, "nodes=3");
        assert_eq!(events[1], (PerfEvent::Layout, "end".to_string()));
    }

    #[test]
    fn missing_logger_is_a_no_op() {
        let span = PerfSpan::begin(None, PerfEvent::Resolve, 1);
        span.annotate("ignored", true);
    }
}
