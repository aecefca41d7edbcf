// Cron schedule parsing, next-fire computation, and tick coalescing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use apflow::core::ManualClock;
use apflow::jobs::services::{CronSchedule, ScheduledTask, Scheduler};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> chrono::DateTime<chrono::Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

#[test]
fn test_required_task_schedules_parse() {
    for expr in ["0 * * * *", "5 1 * * *", "0 9 * * 1", "*/5 * * * *"] {
        assert!(CronSchedule::parse(expr).is_ok(), "{expr}");
    }
}

#[test]
fn test_field_lists_and_ranges() {
    let cron = CronSchedule::parse("0 9-11,14 * * 1-5").unwrap();
    // 2025-06-06 is a Friday
    assert_eq!(
        cron.next_after(at(2025, 6, 6, 9, 0)),
        Some(at(2025, 6, 6, 10, 0))
    );
    assert_eq!(
        cron.next_after(at(2025, 6, 6, 11, 30)),
        Some(at(2025, 6, 6, 14, 0))
    );
    // Friday 14:00 fired; next is Monday 09:00
    assert_eq!(
        cron.next_after(at(2025, 6, 6, 14, 0)),
        Some(at(2025, 6, 9, 9, 0))
    );
}

#[test]
fn test_month_boundary() {
    let cron = CronSchedule::parse("0 0 1 * *").unwrap();
    assert_eq!(
        cron.next_after(at(2025, 6, 15, 12, 0)),
        Some(at(2025, 7, 1, 0, 0))
    );
}

#[test]
fn test_next_after_is_strictly_later() {
    let cron = CronSchedule::parse("*/5 * * * *").unwrap();
    let t = at(2025, 6, 2, 8, 5);
    assert_eq!(cron.next_after(t), Some(at(2025, 6, 2, 8, 10)));
}

struct CountingTask(AtomicUsize);

#[async_trait]
impl ScheduledTask for CountingTask {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn run(&self) -> apflow::core::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_scheduler_fires_when_due() {
    let clock = Arc::new(ManualClock::new());
    let task = Arc::new(CountingTask(AtomicUsize::new(0)));
    let mut scheduler = Scheduler::new(clock.clone());
    scheduler.register("*/5 * * * *", task.clone()).unwrap();

    // first tick arms the schedule, nothing fires
    scheduler.tick().await;
    assert_eq!(task.0.load(Ordering::SeqCst), 0);

    clock.advance(Duration::from_secs(6 * 60));
    scheduler.tick().await;
    assert_eq!(task.0.load(Ordering::SeqCst), 1);

    // no extra fire while nothing new is due
    scheduler.tick().await;
    assert_eq!(task.0.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missed_ticks_coalesce_into_one_run() {
    let clock = Arc::new(ManualClock::new());
    let task = Arc::new(CountingTask(AtomicUsize::new(0)));
    let mut scheduler = Scheduler::new(clock.clone());
    scheduler.register("*/5 * * * *", task.clone()).unwrap();
    scheduler.tick().await;

    // three matches pass while the runner is away; one coalesced firing
    clock.advance(Duration::from_secs(16 * 60));
    scheduler.tick().await;
    assert_eq!(task.0.load(Ordering::SeqCst), 1);
}
