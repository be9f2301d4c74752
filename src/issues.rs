use std::sync::{Arc, Mutex};
use tracing::warn;

/// A non-blocking problem report. Detection failures land here instead of
/// aborting anything; the list is what an IDE frontend would render in its
/// issues pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub message: String,
}

/// Shared sink for device issues, mirrored to the log.
#[derive(Clone, Default)]
pub struct IssueLog {
    inner: Arc<Mutex<Vec<Issue>>>,
}

impl IssueLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.inner
            .lock()
            .expect("issue list poisoned")
            .push(Issue { message });
    }

    pub fn issues(&self) -> Vec<Issue> {
        self.inner.lock().expect("issue list poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("issue list poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn warnings_accumulate_in_order() {
        let log = IssueLog::new();
        assert!(log.is_empty());

        log.warn("first");
        log.warn(format!("second for {}", "ivi"));

        let issues = log.issues();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].message, "first");
        assert_eq!(issues[1].message, "second for ivi");
    }
}
