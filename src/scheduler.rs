//! Cron-driven job scheduler.
//!
//! Each registered job gets its own timer task that sleeps until the next
//! cron fire and then runs the job body on a blocking thread. A per-job
//! in-progress flag makes overlapping fires skip instead of stack; the flag
//! survives `reschedule`, so a rebuild cannot double-run a job that is still
//! finishing under the old timers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{ConfigSource, global_jobs_enabled, job_settings};
use crate::error::{GarageLogError, Result};
use crate::model::ObligationKind;
use crate::retention::RetentionSweeper;
use crate::schedule::CronSchedule;
use crate::store::SqliteStore;
use crate::trigger::TriggerEngine;

pub const JOB_REMINDER_TRIGGER: &str = "reminder_trigger";
pub const JOB_INSURANCE_TRIGGER: &str = "insurance_trigger";
pub const JOB_POLLUTION_TRIGGER: &str = "pollution_trigger";
pub const JOB_NOTIFICATION_CLEANUP: &str = "notification_cleanup";

type JobBody = Arc<dyn Fn() -> Result<()> + Send + Sync>;

struct JobSpec {
    name: &'static str,
    default_schedule: &'static str,
    body: JobBody,
}

struct RunningJob {
    name: &'static str,
    schedule: String,
    handle: JoinHandle<()>,
}

/// Owns the job registry, the per-job guards, and the live timer tasks.
pub struct JobScheduler {
    config: Arc<dyn ConfigSource>,
    specs: Vec<JobSpec>,
    running: Arc<Mutex<Vec<RunningJob>>>,
    guards: Mutex<HashMap<&'static str, Arc<AtomicBool>>>,
}

impl JobScheduler {
    /// Empty scheduler; jobs are added with [`register`](Self::register).
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self {
            config,
            specs: Vec::new(),
            running: Arc::new(Mutex::new(Vec::new())),
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// Scheduler wired with the standard four jobs against one store.
    pub fn standard(
        store: Arc<SqliteStore>,
        config: Arc<dyn ConfigSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut scheduler = Self::new(config);
        let trigger = Arc::new(TriggerEngine::new(store.clone(), store.clone(), clock.clone()));
        let sweeper = Arc::new(RetentionSweeper::new(store, clock));

        let t = trigger.clone();
        scheduler.register(JOB_REMINDER_TRIGGER, "0 * * * *", move || {
            t.process(ObligationKind::Reminder).map(|_| ())
        });
        let t = trigger.clone();
        scheduler.register(JOB_INSURANCE_TRIGGER, "0 8 * * *", move || {
            t.process(ObligationKind::Insurance).map(|_| ())
        });
        let t = trigger;
        scheduler.register(JOB_POLLUTION_TRIGGER, "30 8 * * *", move || {
            t.process(ObligationKind::PollutionCertificate).map(|_| ())
        });
        scheduler.register(JOB_NOTIFICATION_CLEANUP, "0 2 * * *", move || {
            sweeper.sweep().map(|_| ())
        });
        scheduler
    }

    /// Add a named job with its default cron schedule.
    pub fn register<F>(&mut self, name: &'static str, default_schedule: &'static str, body: F)
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.specs.push(JobSpec {
            name,
            default_schedule,
            body: Arc::new(body),
        });
    }

    /// Start timer tasks for every enabled job.
    ///
    /// Safe to call again: existing timers are stopped first and config is
    /// re-read, so this doubles as the reschedule path.
    pub fn initialize(&self) -> Result<()> {
        self.stop_all()?;

        if !global_jobs_enabled(self.config.as_ref()) {
            info!("scheduled jobs globally disabled");
            return Ok(());
        }

        let mut running = lock(&self.running)?;
        for spec in &self.specs {
            let settings = job_settings(self.config.as_ref(), spec.name, spec.default_schedule);
            if !settings.enabled {
                info!(job = spec.name, "job disabled");
                continue;
            }

            let schedule = match CronSchedule::parse(&settings.schedule) {
                Ok(schedule) => schedule,
                Err(e) => {
                    warn!(
                        job = spec.name,
                        schedule = %settings.schedule,
                        "invalid schedule, job left unscheduled: {e}"
                    );
                    continue;
                }
            };

            // Parseable but never-matching expressions (e.g. Feb 30) would
            // give the registry a timer that does nothing.
            if schedule.next_after(Utc::now()).is_none() {
                warn!(
                    job = spec.name,
                    schedule = schedule.expression(),
                    "schedule never fires, job left unscheduled"
                );
                continue;
            }

            let guard = self.guard(spec.name)?;
            info!(job = spec.name, schedule = schedule.expression(), "job scheduled");
            running.push(RunningJob {
                name: spec.name,
                schedule: schedule.expression().to_owned(),
                handle: spawn_timer(
                    spec.name,
                    schedule,
                    guard,
                    spec.body.clone(),
                    self.running.clone(),
                ),
            });
        }
        Ok(())
    }

    /// Stop all timers and restart from current config.
    pub fn reschedule(&self) -> Result<()> {
        info!("rescheduling jobs from current config");
        self.initialize()
    }

    /// Abort every timer task. Job bodies already running on blocking
    /// threads finish on their own and release their guards.
    pub fn stop_all(&self) -> Result<()> {
        let mut running = lock(&self.running)?;
        for job in running.drain(..) {
            job.handle.abort();
        }
        Ok(())
    }

    /// Names and schedules of the currently running timers.
    pub fn running_jobs(&self) -> Result<Vec<(&'static str, String)>> {
        let running = lock(&self.running)?;
        Ok(running
            .iter()
            .map(|job| (job.name, job.schedule.clone()))
            .collect())
    }

    fn guard(&self, name: &'static str) -> Result<Arc<AtomicBool>> {
        let mut guards = lock(&self.guards)?;
        Ok(guards.entry(name).or_default().clone())
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> Result<std::sync::MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|e| GarageLogError::Schedule(format!("scheduler mutex poisoned: {e}")))
}

fn spawn_timer(
    name: &'static str,
    schedule: CronSchedule,
    guard: Arc<AtomicBool>,
    body: JobBody,
    registry: Arc<Mutex<Vec<RunningJob>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = schedule.next_after(now) else {
                // Rare mid-life case (e.g. a leap-day schedule whose next
                // fire moved out of scan range): drop our registry entry so
                // running_jobs() does not report a dead timer.
                warn!(job = name, schedule = schedule.expression(), "no further fire found, timer stopped");
                if let Ok(mut running) = registry.lock() {
                    running.retain(|job| job.name != name);
                }
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            run_guarded(name, guard.clone(), body.clone()).await;
        }
    })
}

/// Run one job fire unless the previous fire is still in progress.
async fn run_guarded(name: &'static str, guard: Arc<AtomicBool>, body: JobBody) {
    if guard.swap(true, Ordering::SeqCst) {
        warn!(job = name, "previous run still in progress, skipping this fire");
        return;
    }

    // The guard is released inside the blocking closure (via Drop), so an
    // aborted timer task cannot leave the job permanently locked.
    let result = tokio::task::spawn_blocking(move || {
        let _release = ReleaseGuard(guard);
        body()
    })
    .await;

    match result {
        Ok(Ok(())) => debug!(job = name, "job run complete"),
        Ok(Err(e)) => warn!(job = name, "job run failed: {e}"),
        Err(e) => warn!(job = name, "job task aborted: {e}"),
    }
}

struct ReleaseGuard(Arc<AtomicBool>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::{KEY_JOBS_ENABLED, StaticConfig, job_enabled_key, job_schedule_key};
    use std::sync::atomic::AtomicUsize;

    fn standard_with(config: StaticConfig) -> JobScheduler {
        let store = Arc::new(SqliteStore::open_in_memory().expect("open"));
        JobScheduler::standard(store, Arc::new(config), Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn standard_jobs_all_start_by_default() {
        let scheduler = standard_with(StaticConfig::new());
        scheduler.initialize().expect("initialize");

        let running = scheduler.running_jobs().expect("running");
        let names: Vec<&str> = running.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            vec![
                JOB_REMINDER_TRIGGER,
                JOB_INSURANCE_TRIGGER,
                JOB_POLLUTION_TRIGGER,
                JOB_NOTIFICATION_CLEANUP,
            ]
        );

        scheduler.stop_all().expect("stop");
        assert!(scheduler.running_jobs().expect("running").is_empty());
    }

    #[tokio::test]
    async fn global_kill_switch_starts_nothing() {
        let scheduler = standard_with(StaticConfig::new().with(KEY_JOBS_ENABLED, "false"));
        scheduler.initialize().expect("initialize");
        assert!(scheduler.running_jobs().expect("running").is_empty());
    }

    #[tokio::test]
    async fn per_job_disable_skips_only_that_job() {
        let scheduler = standard_with(
            StaticConfig::new().with(job_enabled_key(JOB_POLLUTION_TRIGGER), "false"),
        );
        scheduler.initialize().expect("initialize");

        let running = scheduler.running_jobs().expect("running");
        assert_eq!(running.len(), 3);
        assert!(running.iter().all(|(name, _)| *name != JOB_POLLUTION_TRIGGER));
        scheduler.stop_all().expect("stop");
    }

    #[tokio::test]
    async fn configured_schedule_overrides_default() {
        let scheduler = standard_with(
            StaticConfig::new().with(job_schedule_key(JOB_REMINDER_TRIGGER), "*/5 * * * *"),
        );
        scheduler.initialize().expect("initialize");

        let running = scheduler.running_jobs().expect("running");
        let (_, schedule) = running
            .iter()
            .find(|(name, _)| *name == JOB_REMINDER_TRIGGER)
            .expect("job present");
        assert_eq!(schedule, "*/5 * * * *");
        scheduler.stop_all().expect("stop");
    }

    #[tokio::test]
    async fn invalid_schedule_leaves_job_unscheduled() {
        let scheduler = standard_with(
            StaticConfig::new().with(job_schedule_key(JOB_NOTIFICATION_CLEANUP), "not a cron"),
        );
        scheduler.initialize().expect("initialize");

        let running = scheduler.running_jobs().expect("running");
        assert_eq!(running.len(), 3);
        assert!(running.iter().all(|(name, _)| *name != JOB_NOTIFICATION_CLEANUP));
        scheduler.stop_all().expect("stop");
    }

    #[tokio::test]
    async fn never_firing_schedule_is_not_registered() {
        // Parses fine but February 30th never exists.
        let scheduler = standard_with(
            StaticConfig::new().with(job_schedule_key(JOB_INSURANCE_TRIGGER), "0 0 30 2 *"),
        );
        scheduler.initialize().expect("initialize");

        let running = scheduler.running_jobs().expect("running");
        assert_eq!(running.len(), 3);
        assert!(running.iter().all(|(name, _)| *name != JOB_INSURANCE_TRIGGER));
        scheduler.stop_all().expect("stop");
    }

    #[tokio::test]
    async fn reschedule_rebuilds_timers() {
        let scheduler = standard_with(StaticConfig::new());
        scheduler.initialize().expect("initialize");
        scheduler.reschedule().expect("reschedule");
        assert_eq!(scheduler.running_jobs().expect("running").len(), 4);
        scheduler.stop_all().expect("stop");
    }

    #[tokio::test]
    async fn guarded_run_executes_and_releases() {
        let counter = Arc::new(AtomicUsize::new(0));
        let guard = Arc::new(AtomicBool::new(false));
        let c = counter.clone();
        let body: JobBody = Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        run_guarded("test_job", guard.clone(), body.clone()).await;
        run_guarded("test_job", guard.clone(), body).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(!guard.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn guarded_run_skips_while_in_progress() {
        let counter = Arc::new(AtomicUsize::new(0));
        let guard = Arc::new(AtomicBool::new(true));
        let c = counter.clone();
        let body: JobBody = Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        run_guarded("test_job", guard.clone(), body).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        // The skipped fire does not touch the flag the running fire owns.
        assert!(guard.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn guard_releases_even_when_body_fails() {
        let guard = Arc::new(AtomicBool::new(false));
        let body: JobBody =
            Arc::new(|| Err(GarageLogError::Store("disk full".to_owned())));

        run_guarded("test_job", guard.clone(), body).await;
        assert!(!guard.load(Ordering::SeqCst));
    }
}
