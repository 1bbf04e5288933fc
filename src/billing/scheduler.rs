use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{error, info, warn};

use super::cycles::CycleScheduler;
use super::reminders::ReminderEngine;

pub const OPEN_NEXT_CYCLE_JOB: &str = "open_next_billing_cycle";
pub const ESCALATE_PENDING_JOB: &str = "escalate_pending_reminders";

/// Starts both daily billing jobs on their cron schedules in the billing zone.
pub fn spawn(
    cycles: Arc<CycleScheduler>,
    reminders: Arc<ReminderEngine>,
    timezone: Tz,
    cycle_expression: &str,
    reminder_expression: &str,
) -> Result<Vec<JoinHandle<()>>> {
    let cycle_schedule = parse_schedule(cycle_expression)?;
    let reminder_schedule = parse_schedule(reminder_expression)?;

    let cycle_job = spawn_daily(OPEN_NEXT_CYCLE_JOB, cycle_schedule, timezone, move |now| {
        let cycles = Arc::clone(&cycles);
        async move {
            match cycles.open_next_cycle(now).await {
                Ok(summary) => info!(job = OPEN_NEXT_CYCLE_JOB, ?summary, "billing job finished"),
                Err(err) => warn!(?err, job = OPEN_NEXT_CYCLE_JOB, "billing job failed"),
            }
        }
    });
    let reminder_job = spawn_daily(
        ESCALATE_PENDING_JOB,
        reminder_schedule,
        timezone,
        move |now| {
            let reminders = Arc::clone(&reminders);
            async move {
                match reminders.escalate_pending(now).await {
                    Ok(summary) => {
                        info!(job = ESCALATE_PENDING_JOB, ?summary, "billing job finished")
                    }
                    Err(err) => warn!(?err, job = ESCALATE_PENDING_JOB, "billing job failed"),
                }
            }
        },
    );

    Ok(vec![cycle_job, reminder_job])
}

pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    Schedule::from_str(expression)
        .with_context(|| format!("invalid cron expression '{expression}'"))
}

/// key: billing-scheduler -> next fire time strictly after `now`, evaluated in `timezone`
pub fn next_fire(schedule: &Schedule, timezone: Tz, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&now.with_timezone(&timezone))
        .next()
        .map(|fire| fire.with_timezone(&Utc))
}

fn spawn_daily<F, Fut>(name: &'static str, schedule: Schedule, timezone: Tz, job: F) -> JoinHandle<()>
where
    F: Fn(DateTime<Utc>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(fire_at) = next_fire(&schedule, timezone, now) else {
                warn!(job = name, "schedule has no upcoming runs; stopping");
                break;
            };
            info!(job = name, %fire_at, "next billing job run scheduled");
            let wait = (fire_at - now).to_std().unwrap_or_default();
            time::sleep(wait).await;
            run_isolated(name, job(Utc::now())).await;
        }
    })
}

/// Runs one job invocation on its own task so a panic ends that run, not the schedule.
/// Returns whether the run completed.
async fn run_isolated<Fut>(name: &'static str, run: Fut) -> bool
where
    Fut: Future<Output = ()> + Send + 'static,
{
    match tokio::spawn(run).await {
        Ok(()) => true,
        Err(err) => {
            error!(?err, job = name, "billing job run aborted");
            false
        }
    }
}
