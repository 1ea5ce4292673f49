use indexmap::IndexMap;

/// Breakpoints requested before the debuggee connected.
///
/// One entry per path; staging a path again replaces its lines but keeps the
/// path's first position, so the flush order is the order paths were first
/// staged.
#[derive(Debug, Default, Clone)]
pub struct BreakpointStaging {
    by_path: IndexMap<String, Vec<i64>>,
}

impl BreakpointStaging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `lines` for `path`. Returns the lines previously staged there.
    pub fn stage(&mut self, path: impl Into<String>, lines: Vec<i64>) -> Option<Vec<i64>> {
        self.by_path.insert(path.into(), lines)
    }

    /// Take every staged entry in insertion order, leaving the store empty.
    pub fn drain(&mut self) -> impl Iterator<Item = (String, Vec<i64>)> + '_ {
        self.by_path.drain(..)
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}
