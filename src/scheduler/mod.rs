// backuptool/src/scheduler/mod.rs
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use crate::config::JobDefinition;
use crate::runner::{self, RunContext, RunStatus};

/// Due-time bookkeeping for one scheduler-managed job. Mutated only by the
/// dispatcher loop.
#[derive(Debug)]
pub struct ScheduleEntry {
    pub job_name: String,
    pub interval: Duration,
    pub next_due: Instant,
}

/// The schedule table. Pure due-time arithmetic lives here, away from the
/// ticking loop, so it can be driven with fabricated instants in tests.
#[derive(Debug, Default)]
pub struct ScheduleTable {
    entries: Vec<ScheduleEntry>,
}

impl ScheduleTable {
    /// Every entry starts due at `now`: scheduler startup fires each job
    /// once immediately, then at its interval.
    pub fn new(jobs: impl IntoIterator<Item = (String, Duration)>, now: Instant) -> Self {
        Self {
            entries: jobs
                .into_iter()
                .map(|(job_name, interval)| ScheduleEntry {
                    job_name,
                    interval,
                    next_due: now,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the jobs due at `now` and advances each one's `next_due` by
    /// its interval, anchored to the previous due time — not to now, and
    /// never to completion time. A run skipped over a busy lock is
    /// rescheduled exactly as if it had run.
    pub fn due(&mut self, now: Instant) -> Vec<String> {
        let mut due = Vec::new();
        for entry in &mut self.entries {
            if entry.next_due <= now {
                due.push(entry.job_name.clone());
                entry.next_due += entry.interval;
            }
        }
        due
    }
}

/// The dispatcher loop: every `tick`, fire each due job on its own task.
/// Jobs run in parallel with each other but never with themselves (the
/// runner's lock table enforces that), and a slow job never delays the
/// due-time check for the others.
///
/// `stop` is observed between ticks; once set, no new dispatches happen and
/// in-flight runs are awaited — never killed.
pub async fn run_scheduler(
    jobs: Vec<JobDefinition>,
    ctx: RunContext,
    tick: Duration,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    let mut by_name: HashMap<String, JobDefinition> = HashMap::new();
    let mut intervals = Vec::new();
    for job in jobs {
        if let Some(interval) = job.every {
            intervals.push((job.name.clone(), interval));
            by_name.insert(job.name.clone(), job);
        }
    }

    let mut table = ScheduleTable::new(intervals, Instant::now());
    if table.is_empty() {
        println!("No jobs with 'every' configured. Exiting schedule mode.");
        return Ok(());
    }
    println!(
        "🚀 Scheduler started with {} job(s). Tick={}s",
        table.len(),
        tick.as_secs_f64()
    );

    let mut in_flight = JoinSet::new();
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        for job_name in table.due(now) {
            let Some(job) = by_name.get(&job_name) else {
                continue;
            };
            let job = job.clone();
            let ctx = ctx.clone();
            in_flight.spawn(async move {
                let result = runner::run_job(&job, &ctx).await;
                match result.status {
                    RunStatus::Completed => println!(
                        "✅ Scheduled job '{}' completed: {} uploaded, {} deleted",
                        result.job_name, result.artifacts_uploaded, result.objects_deleted
                    ),
                    RunStatus::Failed => eprintln!(
                        "❌ Scheduled job '{}' failed: {} error(s)",
                        result.job_name,
                        result.errors.len()
                    ),
                    RunStatus::SkippedBusy => {}
                }
            });
        }

        // Reap finished runs so the set does not grow over a long daemon life.
        while in_flight.try_join_next().is_some() {}

        tokio::time::sleep(tick).await;
    }

    if !in_flight.is_empty() {
        println!("Stop requested; waiting for in-flight job run(s) to finish...");
    }
    while in_flight.join_next().await.is_some() {}
    println!("Scheduler stopped.");
    Ok(())
}
