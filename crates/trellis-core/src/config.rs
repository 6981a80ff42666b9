/// Settings of one [`RenderTree`](crate::RenderTree).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TreeConfig {
    /// Run resolve and layout on the executor instead of the calling thread.
    pub background: bool,
    pub accessibility_enabled: bool,
    /// Copy unchanged pure subtrees from the previous resolve.
    pub reuse_pure_subtrees: bool,
    /// Re-render when a non-lazy state update is enqueued.
    pub render_on_state_update: bool,
    pub worker_thread_name: String,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            background: false,
            accessibility_enabled: false,
            reuse_pure_subtrees: true,
            render_on_state_update: true,
            worker_thread_name: "trellis-worker".into(),
        }
    }
}

impl TreeConfig {
    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn accessibility_enabled(mut self, enabled: bool) -> Self {
        self.accessibility_enabled = enabled;
        self
    }

    pub fn reuse_pure_subtrees(mut self, reuse: bool) -> Self {
        self.reuse_pure_subtrees = reuse;
        self
    }

    pub fn render_on_state_update(mut self, render: bool) -> Self {
        self.render_on_state_update = render;
        self
    }

    pub fn worker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.worker_thread_name = name.into();
        self
    }
}
