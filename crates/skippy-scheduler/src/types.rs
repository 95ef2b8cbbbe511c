use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// What a job does when it fires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobAction {
    Bash { command: String },
    Prompt { text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    OneTime,
    Interval,
    Schedule,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobType::OneTime => "one_time",
            JobType::Interval => "interval",
            JobType::Schedule => "schedule",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "one_time" => Ok(JobType::OneTime),
            "interval" => Ok(JobType::Interval),
            "schedule" => Ok(JobType::Schedule),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

/// Weekly firing slot. Days use 0=Sunday … 6=Saturday.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeeklySchedule {
    pub days: Vec<u8>,
    pub hour: u8,
    pub minute: u8,
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub action: JobAction,
    /// `one_time` only: the UTC instant to fire at.
    pub time: Option<DateTime<Utc>>,
    /// `interval` only.
    pub interval_ms: Option<u64>,
    /// `schedule` only.
    pub schedule: Option<WeeklySchedule>,
    pub disabled: bool,
    pub last_fired: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CronJob {
    /// Evaluate this job's type-specific predicate against `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.disabled {
            return false;
        }
        match self.job_type {
            JobType::OneTime => self.time.is_some_and(|t| now >= t),
            JobType::Interval => match self.interval_ms {
                Some(ms) => self
                    .last_fired
                    .map(|last| now - last >= Duration::milliseconds(ms as i64))
                    .unwrap_or(true),
                None => false,
            },
            JobType::Schedule => {
                let Some(sched) = &self.schedule else {
                    return false;
                };
                use chrono::{Datelike, Timelike};
                let dow = now.weekday().num_days_from_sunday() as u8;
                if !sched.days.contains(&dow)
                    || now.hour() != sched.hour as u32
                    || now.minute() != sched.minute as u32
                {
                    return false;
                }
                // Exactly once per matching minute, regardless of tick jitter.
                match self.last_fired {
                    Some(last) => !same_minute(last, now),
                    None => true,
                }
            }
        }
    }
}

fn same_minute(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.timestamp() / 60 == b.timestamp() / 60
}

/// Normalize a raw job spec as the LLM (or IPC) supplies it.
///
/// Accepted loosenesses: `delay` in seconds becomes a future `time`;
/// a bare `message` (or `prompt`) field becomes a prompt action;
/// `command` becomes a bash action. Required fields are validated per type.
pub fn normalize_spec(spec: &serde_json::Value) -> Result<CronJob> {
    let job_type: JobType = spec
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| SchedulerError::InvalidJob("missing 'type'".into()))?
        .parse()
        .map_err(SchedulerError::InvalidJob)?;

    let action = parse_action(spec)?;
    let now = Utc::now();

    let mut time = spec
        .get("time")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));
    if time.is_none() {
        if let Some(delay) = spec.get("delay").and_then(|v| v.as_u64()) {
            time = Some(now + Duration::seconds(delay as i64));
        }
    }

    let interval_ms = spec.get("interval_ms").and_then(|v| v.as_u64());
    let schedule = spec
        .get("schedule")
        .map(|v| serde_json::from_value::<WeeklySchedule>(v.clone()))
        .transpose()
        .map_err(|e| SchedulerError::InvalidJob(format!("bad schedule: {e}")))?;

    match job_type {
        JobType::OneTime if time.is_none() => {
            return Err(SchedulerError::InvalidJob(
                "one_time job needs 'time' (RFC 3339) or 'delay' (seconds)".into(),
            ));
        }
        JobType::Interval if interval_ms.is_none() => {
            return Err(SchedulerError::InvalidJob(
                "interval job needs 'interval_ms'".into(),
            ));
        }
        JobType::Schedule => {
            let Some(s) = &schedule else {
                return Err(SchedulerError::InvalidJob(
                    "schedule job needs 'schedule' with days/hour/minute".into(),
                ));
            };
            if s.days.iter().any(|d| *d > 6) || s.hour > 23 || s.minute > 59 {
                return Err(SchedulerError::InvalidJob(
                    "schedule out of range: days 0-6, hour 0-23, minute 0-59".into(),
                ));
            }
        }
        _ => {}
    }

    Ok(CronJob {
        id: uuid::Uuid::new_v4().to_string(),
        job_type,
        action,
        time,
        interval_ms,
        schedule,
        disabled: false,
        last_fired: None,
        created_at: now,
    })
}

fn parse_action(spec: &serde_json::Value) -> Result<JobAction> {
    if let Some(action) = spec.get("action") {
        if let Ok(parsed) = serde_json::from_value::<JobAction>(action.clone()) {
            return Ok(parsed);
        }
        // Tolerate {action: {prompt: "..."}} and {action: {command: "..."}}.
        if let Some(text) = action.get("prompt").and_then(|v| v.as_str()) {
            return Ok(JobAction::Prompt { text: text.into() });
        }
        if let Some(cmd) = action.get("command").and_then(|v| v.as_str()) {
            return Ok(JobAction::Bash { command: cmd.into() });
        }
    }
    if let Some(cmd) = spec.get("command").and_then(|v| v.as_str()) {
        return Ok(JobAction::Bash { command: cmd.into() });
    }
    for key in ["message", "prompt"] {
        if let Some(text) = spec.get(key).and_then(|v| v.as_str()) {
            return Ok(JobAction::Prompt { text: text.into() });
        }
    }
    Err(SchedulerError::InvalidJob(
        "job needs an action: 'command' for bash, 'message' for a prompt".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn one_time_due_when_time_reached() {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let job = CronJob {
            id: "j".into(),
            job_type: JobType::OneTime,
            action: JobAction::Bash { command: "true".into() },
            time: Some(t),
            interval_ms: None,
            schedule: None,
            disabled: false,
            last_fired: None,
            created_at: t,
        };
        assert!(!job.is_due(t - Duration::seconds(1)));
        assert!(job.is_due(t));
        assert!(job.is_due(t + Duration::hours(5)));
    }

    #[test]
    fn interval_due_on_elapsed() {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut job = CronJob {
            id: "j".into(),
            job_type: JobType::Interval,
            action: JobAction::Prompt { text: "check".into() },
            time: None,
            interval_ms: Some(60_000),
            schedule: None,
            disabled: false,
            last_fired: None,
            created_at: t,
        };
        assert!(job.is_due(t), "never-fired interval is due");
        job.last_fired = Some(t);
        assert!(!job.is_due(t + Duration::seconds(59)));
        assert!(job.is_due(t + Duration::seconds(60)));
    }

    #[test]
    fn weekly_schedule_fires_once_per_matching_minute() {
        // 2026-03-02 is a Monday; days use 0=Sunday so Monday is 1.
        let monday_9 = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 10).unwrap();
        let mut job = CronJob {
            id: "j".into(),
            job_type: JobType::Schedule,
            action: JobAction::Prompt { text: "standup".into() },
            time: None,
            interval_ms: None,
            schedule: Some(WeeklySchedule {
                days: vec![1],
                hour: 9,
                minute: 0,
            }),
            disabled: false,
            last_fired: None,
            created_at: monday_9,
        };
        assert!(job.is_due(monday_9));
        job.last_fired = Some(monday_9);
        // Later tick in the same minute must not fire again.
        assert!(!job.is_due(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 55).unwrap()));
        // Next Monday fires again.
        assert!(job.is_due(Utc.with_ymd_and_hms(2026, 3, 9, 9, 0, 30).unwrap()));
        // Tuesday does not.
        assert!(!job.is_due(Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 30).unwrap()));
    }

    #[test]
    fn disabled_jobs_never_fire() {
        let t = Utc::now();
        let job = CronJob {
            id: "j".into(),
            job_type: JobType::Interval,
            action: JobAction::Bash { command: "true".into() },
            time: None,
            interval_ms: Some(1),
            schedule: None,
            disabled: true,
            last_fired: None,
            created_at: t,
        };
        assert!(!job.is_due(t));
    }

    #[test]
    fn normalize_promotes_delay_and_message() {
        let job = normalize_spec(&serde_json::json!({
            "type": "one_time",
            "delay": 120,
            "message": "remind me"
        }))
        .unwrap();
        assert_eq!(job.job_type, JobType::OneTime);
        assert_eq!(job.action, JobAction::Prompt { text: "remind me".into() });
        let t = job.time.unwrap();
        assert!(t > Utc::now() + Duration::seconds(100));
        assert!(t < Utc::now() + Duration::seconds(140));
    }

    #[test]
    fn normalize_validates_required_fields() {
        assert!(normalize_spec(&serde_json::json!({
            "type": "interval", "command": "ls"
        }))
        .is_err());
        assert!(normalize_spec(&serde_json::json!({
            "type": "schedule", "command": "ls",
            "schedule": {"days": [9], "hour": 1, "minute": 0}
        }))
        .is_err());
        assert!(normalize_spec(&serde_json::json!({
            "type": "one_time", "delay": 5
        }))
        .is_err(), "action is required");
    }
}
