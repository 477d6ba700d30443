use crate::remote_state::RemoteBucketState;

/// Storage slot a command runs against.
///
/// Commands read through [`get`](Self::get), work on a copy and write back with
/// [`set`](Self::set) only when they commit a change.
pub trait MutableBucketEntry {
    fn exists(&self) -> bool;

    fn get(&self) -> Option<&RemoteBucketState>;

    fn set(&mut self, state: RemoteBucketState);
}

/// In-memory entry used by every executor: wraps the decoded state and records writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketEntry {
    state: Option<RemoteBucketState>,
    modified: bool,
}

impl BucketEntry {
    pub fn new(state: Option<RemoteBucketState>) -> Self {
        Self { state, modified: false }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether `set` was called.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn into_state(self) -> Option<RemoteBucketState> {
        self.state
    }
}

impl MutableBucketEntry for BucketEntry {
    fn exists(&self) -> bool {
        self.state.is_some()
    }

    fn get(&self) -> Option<&RemoteBucketState> {
        self.state.as_ref()
    }

    fn set(&mut self, state: RemoteBucketState) {
        self.state = Some(state);
        self.modified = true;
    }
}
