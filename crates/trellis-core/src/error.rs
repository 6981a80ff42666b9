use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::component::Element;
use crate::key::GlobalKey;

pub type TreeId = u64;

/// Failure raised by user code: a render or measure function.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct ComponentError {
    message: Arc<str>,
    panicked: bool,
}

impl ComponentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into().into(),
            panicked: false,
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else {
            "Unknown panic".to_string()
        };
        Self {
            message: message.into(),
            panicked: true,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// True when the error came from a panic rather than a returned `Err`.
    pub fn panicked(&self) -> bool {
        self.panicked
    }
}

/// Runs user code, turning a panic into a `ComponentError`.
pub(crate) fn catch_component<R>(
    f: impl FnOnce() -> Result<R, ComponentError>,
) -> Result<R, ComponentError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(r) => r,
        Err(payload) => Err(ComponentError::from_panic(payload)),
    }
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("duplicate global key `{key}` within one resolve pass")]
    DuplicateGlobalKey { key: GlobalKey },

    #[error("child index {index} is out of range for `{key}`")]
    InvalidChildIndex { key: GlobalKey, index: usize },

    #[error("missing required context: {0}")]
    MissingContext(&'static str),

    #[error("render of `{key}` failed: {source}")]
    Render {
        key: GlobalKey,
        #[source]
        source: ComponentError,
    },

    #[error("measure of `{key}` failed: {source}")]
    Measure {
        key: GlobalKey,
        #[source]
        source: ComponentError,
    },

    #[error("layout engine: {0}")]
    Engine(String),

    #[error("measured-result cache was already consumed")]
    CacheConsumed,

    #[error("tree {0} has been released")]
    TreeReleased(TreeId),

    #[error("failed to schedule work: {0}")]
    Schedule(String),

    #[error("tree work panicked: {0}")]
    Panicked(String),
}

impl From<taffy::TaffyError> for PipelineError {
    fn from(e: taffy::TaffyError) -> Self {
        PipelineError::Engine(e.to_string())
    }
}

/// Where a failure happened and which boundary is being asked to handle it.
#[derive(Clone, Debug)]
pub struct ErrorContext {
    pub failed_key: GlobalKey,
    pub boundary_key: GlobalKey,
}

/// Persistent chain of error boundaries from the current position up to the
/// root; children extend their parent's chain without copying it.
#[derive(Clone, Default)]
pub(crate) struct BoundaryChain(Option<Arc<BoundaryLink>>);

struct BoundaryLink {
    key: GlobalKey,
    element: Element,
    parent: BoundaryChain,
}

impl BoundaryChain {
    pub fn push(&self, key: GlobalKey, element: Element) -> Self {
        Self(Some(Arc::new(BoundaryLink {
            key,
            element,
            parent: self.clone(),
        })))
    }

    /// Offers `error` to each boundary, nearest first. On success returns the
    /// fallback and the chain above the boundary that produced it.
    pub fn handle(
        &self,
        failed_key: &GlobalKey,
        error: &ComponentError,
    ) -> Option<(Element, BoundaryChain)> {
        let mut cur = self.0.as_ref();
        while let Some(link) = cur {
            let cx = ErrorContext {
                failed_key: failed_key.clone(),
                boundary_key: link.key.clone(),
            };
            if let Some(fallback) = link.element.component().on_error(&cx, error) {
                log::debug!("`{}` handled error from `{}`: {}", link.key, failed_key, error);
                return Some((fallback, link.parent.clone()));
            }
            cur = link.parent.0.as_ref();
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Keeps the nearest boundaries for which `inside` holds and stacks them
    /// on `base` in place of the rest of the chain.
    pub fn rebase(&self, base: &BoundaryChain, inside: impl Fn(&GlobalKey) -> bool) -> Self {
        let mut kept = Vec::new();
        let mut cur = self.0.as_ref();
        while let Some(link) = cur
            && inside(&link.key)
        {
            kept.push(link);
            cur = link.parent.0.as_ref();
        }
        kept.into_iter()
            .rev()
            .fold(base.clone(), |chain, link| chain.push(link.key.clone(), link.element.clone()))
    }

    #[cfg(test)]
    fn keys(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut cur = self.0.as_ref();
        while let Some(link) = cur {
            out.push(link.key.as_str().to_owned());
            cur = link.parent.0.as_ref();
        }
        out
    }
}
