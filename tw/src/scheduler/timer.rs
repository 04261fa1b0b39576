//! Delayed and recurring task timers

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::error::SchedulerError;

/// When a scheduled task fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleSpec {
    /// Fire once after `delay`
    Once { delay: Duration },
    /// Fire every `every`, re-arming after each run
    Interval { every: Duration },
    /// Cron expressions are not supported
    Cron { expression: String },
}

impl ScheduleSpec {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        match self {
            Self::Once { .. } => Ok(()),
            Self::Interval { every } if every.is_zero() => {
                Err(SchedulerError::InvalidInterval("interval must be greater than zero".to_string()))
            }
            Self::Interval { .. } => Ok(()),
            Self::Cron { expression } => Err(SchedulerError::UnsupportedSchedule(format!(
                "cron schedules are not supported ({})",
                expression
            ))),
        }
    }
}

struct TimerEntry {
    generation: u64,
    cancel: CancellationToken,
}

/// Registry of armed timers keyed by name
#[derive(Clone, Default)]
pub struct TimerRegistry {
    timers: Arc<Mutex<HashMap<String, TimerEntry>>>,
    generation: Arc<AtomicU64>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer that runs `job` per `spec`
    ///
    /// An existing timer under the same key is cancelled first. Invalid specs
    /// are logged as configuration errors and never run.
    pub async fn schedule<F, Fut>(&self, key: &str, spec: ScheduleSpec, job: F) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        debug!(%key, ?spec, "TimerRegistry::schedule: called");
        if let Err(e) = spec.validate() {
            error!(%key, error = %e, "Rejected schedule configuration");
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut timers = self.timers.lock().await;
            if let Some(previous) = timers.insert(
                key.to_string(),
                TimerEntry {
                    generation,
                    cancel: cancel.clone(),
                },
            ) {
                debug!(%key, "TimerRegistry::schedule: replacing existing timer");
                previous.cancel.cancel();
            }
        }

        let registry = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            match spec {
                ScheduleSpec::Once { delay } => {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(%key, "TimerRegistry: one-shot cancelled");
                        }
                        _ = tokio::time::sleep(delay) => {
                            info!(%key, "Timer fired");
                            job().await;
                        }
                    }
                }
                ScheduleSpec::Interval { every } => loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(%key, "TimerRegistry: interval cancelled");
                            break;
                        }
                        _ = tokio::time::sleep(every) => {
                            info!(%key, "Interval timer fired");
                            job().await;
                        }
                    }
                },
                ScheduleSpec::Cron { .. } => {}
            }
            registry.forget(&key, generation).await;
        });

        Ok(())
    }

    /// Drop the entry only if it still belongs to this timer
    async fn forget(&self, key: &str, generation: u64) {
        let mut timers = self.timers.lock().await;
        if timers.get(key).is_some_and(|t| t.generation == generation) {
            timers.remove(key);
        }
    }

    /// Cancel the timer for `key`
    pub async fn cancel(&self, key: &str) -> bool {
        debug!(%key, "TimerRegistry::cancel: called");
        match self.timers.lock().await.remove(key) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn cancel_all(&self) {
        debug!("TimerRegistry::cancel_all: called");
        for (_, entry) in self.timers.lock().await.drain() {
            entry.cancel.cancel();
        }
    }

    pub async fn is_armed(&self, key: &str) -> bool {
        self.timers.lock().await.contains_key(key)
    }

    pub async fn armed(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.timers.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_job(counter: &Arc<AtomicUsize>) -> impl Fn() -> std::future::Ready<()> + Send + Sync + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[test]
    fn test_validate_specs() {
        assert!(ScheduleSpec::Once { delay: Duration::ZERO }.validate().is_ok());
        assert!(matches!(
            ScheduleSpec::Interval { every: Duration::ZERO }.validate(),
            Err(SchedulerError::InvalidInterval(_))
        ));
        assert!(matches!(
            ScheduleSpec::Cron {
                expression: "0 * * * *".into()
            }
            .validate(),
            Err(SchedulerError::UnsupportedSchedule(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_fires_once() {
        let registry = TimerRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        registry
            .schedule("t", ScheduleSpec::Once { delay: Duration::from_secs(5) }, counter_job(&counter))
            .await
            .unwrap();
        assert!(registry.is_armed("t").await);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!registry.is_armed("t").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_rearms_until_cancelled() {
        let registry = TimerRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        registry
            .schedule(
                "tick",
                ScheduleSpec::Interval {
                    every: Duration::from_secs(10),
                },
                counter_job(&counter),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        assert!(registry.cancel("tick").await);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cron_is_rejected_and_not_armed() {
        let registry = TimerRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let result = registry
            .schedule(
                "cron",
                ScheduleSpec::Cron {
                    expression: "*/5 * * * *".into(),
                },
                counter_job(&counter),
            )
            .await;
        assert!(result.is_err());
        assert!(registry.armed().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_replaces_timer() {
        let registry = TimerRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        registry
            .schedule("t", ScheduleSpec::Once { delay: Duration::from_secs(5) }, counter_job(&counter))
            .await
            .unwrap();
        registry
            .schedule("t", ScheduleSpec::Once { delay: Duration::from_secs(20) }, counter_job(&counter))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(registry.is_armed("t").await);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
