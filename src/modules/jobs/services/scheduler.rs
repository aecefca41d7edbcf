// Cron-style scheduled tasks (`minute hour dom mon dow`, UTC).
//
// The runner guarantees at-least-once firing and coalesces overlapping
// ticks: a task that missed several matches while the runner was down fires
// once for the whole gap.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use tokio::sync::watch;
use tracing::{error, info};

use crate::core::{AppError, Clock, Result};

/// One parsed cron field as a minute/hour/day set
#[derive(Debug, Clone)]
struct CronField {
    allowed: Vec<u32>,
}

impl CronField {
    fn parse(spec: &str, min: u32, max: u32) -> Result<Self> {
        let mut allowed = Vec::new();
        for part in spec.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((r, s)) => {
                    let step: u32 = s.parse().map_err(|_| {
                        AppError::invalid("bad_cron", format!("bad step in '{part}'"))
                    })?;
                    if step == 0 {
                        return Err(AppError::invalid("bad_cron", "step of 0"));
                    }
                    (r, step)
                }
                None => (part, 1),
            };
            let (lo, hi) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                let lo = a.parse().map_err(|_| {
                    AppError::invalid("bad_cron", format!("bad range start '{a}'"))
                })?;
                let hi = b.parse().map_err(|_| {
                    AppError::invalid("bad_cron", format!("bad range end '{b}'"))
                })?;
                (lo, hi)
            } else {
                let v: u32 = range.parse().map_err(|_| {
                    AppError::invalid("bad_cron", format!("bad value '{range}'"))
                })?;
                (v, v)
            };
            if lo < min || hi > max || lo > hi {
                return Err(AppError::invalid(
                    "bad_cron",
                    format!("value out of range in '{part}' (allowed {min}-{max})"),
                ));
            }
            allowed.extend((lo..=hi).step_by(step as usize));
        }
        allowed.sort_unstable();
        allowed.dedup();
        Ok(Self { allowed })
    }

    fn contains(&self, v: u32) -> bool {
        self.allowed.binary_search(&v).is_ok()
    }
}

/// Five-field cron expression evaluated in UTC
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minute: CronField,
    hour: CronField,
    dom: CronField,
    month: CronField,
    dow: CronField,
    expr: String,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(AppError::invalid(
                "bad_cron",
                format!("expected 5 fields, got {} in '{expr}'", fields.len()),
            ));
        }
        Ok(Self {
            minute: CronField::parse(fields[0], 0, 59)?,
            hour: CronField::parse(fields[1], 0, 23)?,
            dom: CronField::parse(fields[2], 1, 31)?,
            month: CronField::parse(fields[3], 1, 12)?,
            dow: CronField::parse(fields[4], 0, 6)?,
            expr: expr.to_string(),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    fn matches(&self, t: DateTime<Utc>) -> bool {
        self.minute.contains(t.minute())
            && self.hour.contains(t.hour())
            && self.dom.contains(t.day())
            && self.month.contains(t.month())
            && self.dow.contains(t.weekday().num_days_from_sunday())
    }

    /// First matching minute strictly after `after`, bounded to 366 days
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = Utc
            .with_ymd_and_hms(
                after.year(),
                after.month(),
                after.day(),
                after.hour(),
                after.minute(),
                0,
            )
            .single()?
            + ChronoDuration::minutes(1);
        let horizon = after + ChronoDuration::days(366);
        while t <= horizon {
            if self.matches(t) {
                return Some(t);
            }
            t += ChronoDuration::minutes(1);
        }
        None
    }
}

/// A named task on a cron schedule
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<()>;
}

struct ScheduleEntry {
    schedule: CronSchedule,
    task: Arc<dyn ScheduledTask>,
    next_fire: std::sync::Mutex<Option<DateTime<Utc>>>,
}

/// Fires registered tasks on their schedules.
///
/// `tick` is separated from the run loop so tests can drive the scheduler
/// with a manual clock.
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    entries: Vec<ScheduleEntry>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, expr: &str, task: Arc<dyn ScheduledTask>) -> Result<()> {
        let schedule = CronSchedule::parse(expr)?;
        info!(task = task.name(), schedule = expr, "Scheduled task registered");
        self.entries.push(ScheduleEntry {
            schedule,
            task,
            next_fire: std::sync::Mutex::new(None),
        });
        Ok(())
    }

    /// Fire every task whose next match has passed. Overlapping missed
    /// ticks coalesce into a single run.
    pub async fn tick(&self) -> usize {
        let now = self.clock.now();
        let mut fired = 0;
        for entry in &self.entries {
            let due = {
                let mut next = entry.next_fire.lock().unwrap();
                match *next {
                    None => {
                        *next = entry.schedule.next_after(now);
                        false
                    }
                    Some(at) if at <= now => {
                        *next = entry.schedule.next_after(now);
                        true
                    }
                    Some(_) => false,
                }
            };
            if due {
                fired += 1;
                if let Err(e) = entry.task.run().await {
                    error!(task = entry.task.name(), error = %e, "Scheduled task failed");
                }
            }
        }
        fired
    }

    /// Run loop for production; checks every 30 seconds
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(tasks = self.entries.len(), "Starting scheduler");
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler stopped");
                        return;
                    }
                }
            }
        }
    }
}
