use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::RwLock;

/// Point-in-time copy of the poller's health.
///
/// A failure only touches `last_error`, so the last good reading stays
/// visible while the device is unreachable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct PollerStatus {
    pub running: bool,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_value: Option<i32>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct StatusReporter {
    inner: RwLock<PollerStatus>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> PollerStatus {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn record_success(&self, value: i32, at: DateTime<Utc>) {
        self.update(|status| {
            status.last_success_at = Some(at);
            status.last_value = Some(value);
            status.last_error = None;
        });
    }

    pub fn record_failure(&self, error: impl Into<String>) {
        let error = error.into();
        self.update(|status| status.last_error = Some(error));
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.update(|status| status.running = running);
    }

    fn update(&self, apply: impl FnOnce(&mut PollerStatus)) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        apply(&mut guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    #[test]
    fn starts_empty() {
        assert_eq!(StatusReporter::new().get(), PollerStatus::default());
    }

    #[test]
    fn failure_keeps_last_good_reading() {
        let reporter = StatusReporter::new();
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap();
        reporter.record_success(1200, at);
        reporter.record_failure("connection error: scale:502: refused");

        let status = reporter.get();
        assert_eq!(status.last_value, Some(1200));
        assert_eq!(status.last_success_at, Some(at));
        assert_eq!(
            status.last_error.as_deref(),
            Some("connection error: scale:502: refused")
        );
    }

    #[test]
    fn success_clears_error() {
        let reporter = StatusReporter::new();
        reporter.record_failure("read error: timed out");
        reporter.record_success(7, Utc::now());
        assert_eq!(reporter.get().last_error, None);
        assert_eq!(reporter.get().last_value, Some(7));
    }

    #[test]
    fn concurrent_readers_never_see_partial_updates() {
        let reporter = Arc::new(StatusReporter::new());
        let base = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();

        let writer = {
            let reporter = reporter.clone();
            std::thread::spawn(move || {
                for value in 0..2_000 {
                    reporter.record_success(value, base + chrono::Duration::seconds(value.into()));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let reporter = reporter.clone();
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        let status = reporter.get();
                        if let (Some(value), Some(at)) = (status.last_value, status.last_success_at)
                        {
                            assert_eq!(at, base + chrono::Duration::seconds(value.into()));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
