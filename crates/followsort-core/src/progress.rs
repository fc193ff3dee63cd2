use std::sync::Arc;

/// Progress callback: `(stage, current, total)`.
pub type ProgressFn = dyn Fn(&str, usize, usize) + Send + Sync;

/// Optional progress sink shared by every stage.
#[derive(Clone, Default)]
pub struct Progress {
    callback: Option<Arc<ProgressFn>>,
}

impl Progress {
    pub fn new(callback: impl Fn(&str, usize, usize) + Send + Sync + 'static) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn report(&self, stage: &str, current: usize, total: usize) {
        if let Some(cb) = &self.callback {
            cb(stage, current, total);
        }
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("enabled", &self.callback.is_some())
            .finish()
    }
}

pub mod stage {
    pub const FETCH: &str = "fetch";
    pub const CLASSIFY: &str = "classify";
    pub const RESOLVE: &str = "resolve";
    pub const ASSIGN: &str = "assign";
}
