use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{Result, SchedulerError};
use crate::types::{CronJob, JobAction, JobType, WeeklySchedule};

/// Receives fired jobs. The daemon routes bash actions to a detached
/// process and prompt actions into the orchestrator. Implementations must
/// return quickly; long work belongs on their own tasks.
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn fire(&self, job: CronJob);
}

/// Shared handle for job management while the engine loop runs.
pub struct CronStore {
    conn: Arc<Mutex<Connection>>,
}

impl CronStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn open(path: &std::path::Path) -> Result<Self> {
        Ok(Self::new(crate::db::open(path)?))
    }

    pub fn add_job(&self, job: &CronJob) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cron_jobs
             (id, job_type, action, time, interval_ms, schedule, disabled, last_fired, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                job.id,
                job.job_type.to_string(),
                serde_json::to_string(&job.action)?,
                job.time.map(|t| t.to_rfc3339()),
                job.interval_ms,
                job.schedule
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                job.disabled,
                job.last_fired.map(|t| t.to_rfc3339()),
                job.created_at.to_rfc3339(),
            ],
        )?;
        info!(job_id = %job.id, job_type = %job.job_type, "cron job added");
        Ok(())
    }

    pub fn remove_job(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM cron_jobs WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        info!(job_id = %id, "cron job removed");
        Ok(())
    }

    pub fn set_disabled(&self, id: &str, disabled: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE cron_jobs SET disabled = ?1 WHERE id = ?2",
            rusqlite::params![disabled, id],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn list_jobs(&self) -> Result<Vec<CronJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_type, action, time, interval_ms, schedule, disabled,
                    last_fired, created_at
             FROM cron_jobs ORDER BY created_at",
        )?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .filter_map(|r| match r {
                Ok(Some(job)) => Some(job),
                Ok(None) => None,
                Err(e) => {
                    warn!("skipping unreadable cron row: {e}");
                    None
                }
            })
            .collect();
        Ok(jobs)
    }

    /// All enabled jobs, for the tick.
    fn enabled_jobs(&self) -> Result<Vec<CronJob>> {
        Ok(self
            .list_jobs()?
            .into_iter()
            .filter(|j| !j.disabled)
            .collect())
    }

    fn mark_fired(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE cron_jobs SET last_fired = ?1 WHERE id = ?2",
            rusqlite::params![at.to_rfc3339(), id],
        )?;
        Ok(())
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<CronJob>> {
    let id: String = row.get(0)?;
    let type_str: String = row.get(1)?;
    let action_json: String = row.get(2)?;
    let time: Option<String> = row.get(3)?;
    let interval_ms: Option<u64> = row.get(4)?;
    let schedule_json: Option<String> = row.get(5)?;
    let disabled: bool = row.get(6)?;
    let last_fired: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;

    let Ok(job_type) = type_str.parse::<JobType>() else {
        return Ok(None);
    };
    let Ok(action) = serde_json::from_str::<JobAction>(&action_json) else {
        return Ok(None);
    };
    let schedule = schedule_json
        .as_deref()
        .and_then(|s| serde_json::from_str::<WeeklySchedule>(s).ok());

    Ok(Some(CronJob {
        id,
        job_type,
        action,
        time: parse_ts(time),
        interval_ms,
        schedule,
        disabled,
        last_fired: parse_ts(last_fired),
        created_at: parse_ts(Some(created_at)).unwrap_or_else(Utc::now),
    }))
}

fn parse_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Drives the minute tick. Fired jobs are handed to the [`JobSink`] on their
/// own tasks; the tick never waits for job completion.
pub struct SchedulerEngine {
    store: Arc<CronStore>,
    sink: Arc<dyn JobSink>,
}

impl SchedulerEngine {
    pub fn new(store: Arc<CronStore>, sink: Arc<dyn JobSink>) -> Self {
        Self { store, sink }
    }

    /// Main loop. Ticks once per minute until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("cron scheduler started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()) {
                        error!("scheduler tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cron scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Evaluate every enabled job against `now` and dispatch the due ones.
    /// `one_time` jobs are deleted on fire; the rest update `last_fired`.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        for job in self.store.enabled_jobs()? {
            if !job.is_due(now) {
                continue;
            }
            info!(job_id = %job.id, job_type = %job.job_type, "cron job due");

            match job.job_type {
                JobType::OneTime => {
                    if let Err(e) = self.store.remove_job(&job.id) {
                        warn!(job_id = %job.id, "one_time cleanup failed: {e}");
                    }
                }
                _ => {
                    if let Err(e) = self.store.mark_fired(&job.id, now) {
                        warn!(job_id = %job.id, "last_fired update failed: {e}");
                    }
                }
            }

            let sink = Arc::clone(&self.sink);
            tokio::spawn(async move {
                sink.fire(job).await;
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink(AtomicUsize);

    #[async_trait]
    impl JobSink for CountingSink {
        async fn fire(&self, _job: CronJob) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn store() -> Arc<CronStore> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        Arc::new(CronStore::new(conn))
    }

    fn one_time_job(at: DateTime<Utc>) -> CronJob {
        CronJob {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: JobType::OneTime,
            action: JobAction::Bash { command: "true".into() },
            time: Some(at),
            interval_ms: None,
            schedule: None,
            disabled: false,
            last_fired: None,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn one_time_jobs_are_deleted_on_fire() {
        let store = store();
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        store.add_job(&one_time_job(t)).unwrap();

        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let engine = SchedulerEngine::new(Arc::clone(&store), sink.clone());

        engine.tick(t - chrono::Duration::minutes(1)).unwrap();
        assert_eq!(store.list_jobs().unwrap().len(), 1, "not yet due");

        engine.tick(t).unwrap();
        assert!(store.list_jobs().unwrap().is_empty(), "deleted after fire");

        tokio::task::yield_now().await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn schedule_job_fires_once_per_matching_minute() {
        let store = store();
        // 2026-03-02 is a Monday (day 1 with 0=Sunday).
        let t1 = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 5).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 50).unwrap();
        let job = CronJob {
            id: "weekly".into(),
            job_type: JobType::Schedule,
            action: JobAction::Prompt { text: "standup".into() },
            time: None,
            interval_ms: None,
            schedule: Some(WeeklySchedule { days: vec![1], hour: 9, minute: 0 }),
            disabled: false,
            last_fired: None,
            created_at: t1,
        };
        store.add_job(&job).unwrap();

        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let engine = SchedulerEngine::new(Arc::clone(&store), sink.clone());

        engine.tick(t1).unwrap();
        engine.tick(t2).unwrap(); // same minute, jittered tick
        tokio::task::yield_now().await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);

        let persisted = &store.list_jobs().unwrap()[0];
        assert!(persisted.last_fired.is_some());
    }

    #[tokio::test]
    async fn disabled_jobs_are_skipped_until_enabled() {
        let store = store();
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let mut job = one_time_job(t);
        job.disabled = true;
        store.add_job(&job).unwrap();

        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let engine = SchedulerEngine::new(Arc::clone(&store), sink.clone());
        engine.tick(t).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);

        store.set_disabled(&job.id, false).unwrap();
        engine.tick(t).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }
}
