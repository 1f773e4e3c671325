//! The record produced for every unit of work

use std::time::Duration;

/// Result of running one unit of work, with timing and retry accounting
///
/// Immutable once built; exactly one is produced per submitted task.
#[derive(Debug, Clone)]
pub struct TaskOutcome<T, E> {
    /// Human-readable name of the work (item or source identifier)
    pub label: String,
    /// Produced value or the last error
    pub result: Result<T, E>,
    /// Wall time from first admission attempt to completion
    pub elapsed: Duration,
    /// Attempts actually made (0 when the work never ran)
    pub attempts: u32,
}

impl<T, E> TaskOutcome<T, E> {
    /// Build an outcome
    pub fn new(
        label: impl Into<String>,
        result: Result<T, E>,
        elapsed: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            label: label.into(),
            result,
            elapsed,
            attempts,
        }
    }

    /// Build a failed outcome for work that never got to run
    pub fn not_run(label: impl Into<String>, error: E) -> Self {
        Self::new(label, Err(error), Duration::ZERO, 0)
    }

    /// Whether the work produced a value
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    /// Retries used beyond the first attempt
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// The produced value, if any
    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    /// The error, if any
    pub fn error(&self) -> Option<&E> {
        self.result.as_ref().err()
    }

    /// Transform the produced value, keeping the accounting
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TaskOutcome<U, E> {
        TaskOutcome {
            label: self.label,
            result: self.result.map(f),
            elapsed: self.elapsed,
            attempts: self.attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accounting() {
        let ok: TaskOutcome<u32, String> =
            TaskOutcome::new("item-1", Ok(7), Duration::from_millis(5), 3);
        assert!(ok.succeeded());
        assert_eq!(ok.retries(), 2);
        assert_eq!(ok.value(), Some(&7));
        assert!(ok.error().is_none());

        let skipped: TaskOutcome<u32, String> = TaskOutcome::not_run("item-2", "cancelled".into());
        assert!(!skipped.succeeded());
        assert_eq!(skipped.retries(), 0);
        assert_eq!(skipped.attempts, 0);
        assert_eq!(skipped.map(|v| v * 2).error().map(String::as_str), Some("cancelled"));
    }
}
