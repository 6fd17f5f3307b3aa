use super::types::MediaFile;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::{debug, warn};

/// An opaque reference to a live preview of a pending file.
///
/// Not `Clone`: releasing consumes the handle, so each one is released at
/// most once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct PreviewHandle(String);

impl PreviewHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Hands out and revokes preview handles.
pub trait PreviewRegistry: Send + Sync {
    fn create(&self, file: &MediaFile) -> PreviewHandle;
    fn revoke(&self, handle: PreviewHandle);
}

/// Tracks live handles in memory.
#[derive(Default)]
pub struct PreviewTracker {
    live: Mutex<HashSet<String>>,
}

impl PreviewTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_live(&self, handle: &PreviewHandle) -> bool {
        self.live.lock().contains(handle.as_str())
    }
}

impl PreviewRegistry for PreviewTracker {
    fn create(&self, file: &MediaFile) -> PreviewHandle {
        let id = format!("blob:kleo/{}", uuid::Uuid::new_v4());
        debug!("Created preview {} for {}", id, file.filename);
        self.live.lock().insert(id.clone());
        PreviewHandle(id)
    }

    fn revoke(&self, handle: PreviewHandle) {
        if !self.live.lock().remove(&handle.0) {
            warn!("Preview {} was not live", handle.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_revoke() {
        let tracker = PreviewTracker::new();
        let file = MediaFile::new("a.png", "image/png", vec![1]);

        let first = tracker.create(&file);
        let second = tracker.create(&file);
        assert_ne!(first, second);
        assert_eq!(tracker.live_count(), 2);
        assert!(first.as_str().starts_with("blob:kleo/"));

        tracker.revoke(first);
        assert_eq!(tracker.live_count(), 1);
        assert!(tracker.is_live(&second));
    }
}
