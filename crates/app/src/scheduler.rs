//! Clock scheduler: cron, absolute-instant and recurrence triggers.
//!
//! Each job owns one task that sleeps until the trigger's next instant,
//! waits the optional jitter, then runs the job in its owner's failure
//! domain. Triggers are evaluated in local time. Jitter is drawn per
//! firing and never shifts the following nominal instant.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use busscripts_domain::trigger::Trigger;
use chrono::{DateTime, Local, TimeZone};
use tokio::time::Instant;

use crate::supervisor::{FailureDomain, Fault};

/// How far the wall clock may run ahead of the chained deadline before a
/// job resynchronises to it.
const RESYNC_SLACK: Duration = Duration::from_secs(1);

/// A scheduled callback.
pub type Job = Arc<dyn Fn() -> Result<(), Fault> + Send + Sync>;

/// Options of a scheduled job.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScheduleOptions {
    /// Offset in seconds from the nominal instant. Only solar events use it.
    pub shift: f64,
    /// Upper bound in seconds of a random delay added to every firing.
    pub jitter: f64,
}

/// Arms clock-triggered jobs.
#[derive(Debug, Default)]
pub struct Scheduler {
    armed: AtomicUsize,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `job` on `trigger`. Returns `false` when the trigger will never
    /// fire again (an instant in the past), in which case nothing is armed.
    pub fn schedule(
        &self,
        trigger: Trigger,
        options: ScheduleOptions,
        job: Job,
        owner: &FailureDomain,
    ) -> bool {
        let now = Local::now();
        let Some(first) = trigger.next_after(&now) else {
            tracing::debug!(unit = %owner.unit(), %trigger, "trigger never fires, ignored");
            return false;
        };
        tracing::debug!(unit = %owner.unit(), %trigger, next = %first, "job scheduled");
        self.armed.fetch_add(1, Ordering::Relaxed);

        let owner = owner.clone();
        tokio::spawn(async move {
            let mut next = first;
            let mut deadline = Instant::now() + until(&first, &now);
            loop {
                let jitter = jitter_delay(options.jitter, rand::random());
                tokio::time::sleep_until(deadline + jitter).await;
                owner.run("job", job.as_ref());

                let cursor = next.max(Local::now());
                match trigger.next_after(&cursor) {
                    Some(following) => {
                        // Chain on the previous deadline; resync to the wall
                        // clock only when it ran well ahead (e.g. after suspend).
                        let chained = deadline + until(&following, &next);
                        let wall = Instant::now() + until(&following, &Local::now());
                        deadline = if wall + RESYNC_SLACK < chained { wall } else { chained };
                        next = following;
                    }
                    None => {
                        tracing::debug!(unit = %owner.unit(), %trigger, "trigger exhausted");
                        break;
                    }
                }
            }
        });
        true
    }

    /// Number of jobs armed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.armed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Time left until `at`, zero if it already passed.
pub(crate) fn until<Tz: TimeZone>(at: &DateTime<Tz>, now: &DateTime<Tz>) -> Duration {
    (at.clone() - now.clone()).to_std().unwrap_or(Duration::ZERO)
}

/// `jitter * sample` seconds, `sample` drawn from `[0, 1)`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn jitter_delay(jitter: f64, sample: f64) -> Duration {
    let millis = (jitter * 1000.0 * sample).floor();
    if millis.is_finite() && millis > 0.0 {
        Duration::from_millis(millis as u64)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use busscripts_domain::id::UnitId;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    fn counting_job() -> (Arc<AtomicU32>, Job) {
        let count = Arc::new(AtomicU32::new(0));
        let inner = Arc::clone(&count);
        let job: Job = Arc::new(move || -> Result<(), Fault> {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (count, job)
    }

    #[test]
    fn should_compute_jitter_within_bound() {
        assert_eq!(jitter_delay(0.0, 0.7), Duration::ZERO);
        assert_eq!(jitter_delay(10.0, 0.5), Duration::from_secs(5));
        assert!(jitter_delay(1.0, 0.999_9) < Duration::from_secs(1));
        assert_eq!(jitter_delay(-5.0, 0.5), Duration::ZERO);
    }

    #[test]
    fn should_clamp_elapsed_wait_to_zero() {
        let now = Local::now();
        let past = now - chrono::Duration::seconds(5);
        assert_eq!(until(&past, &now), Duration::ZERO);
        let future = now + chrono::Duration::milliseconds(1_500);
        assert_eq!(until(&future, &now), Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn should_ignore_instant_in_the_past() {
        let scheduler = Scheduler::new();
        let (_, job) = counting_job();
        let trigger = Trigger::At(chrono::Utc::now() - chrono::Duration::hours(1));
        let armed = scheduler.schedule(
            trigger,
            ScheduleOptions::default(),
            job,
            &FailureDomain::new(UnitId::new("a")),
        );
        assert!(!armed);
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_fire_absolute_instant_once() {
        let scheduler = Scheduler::new();
        let (count, job) = counting_job();
        let trigger = Trigger::At(chrono::Utc::now() + chrono::Duration::milliseconds(300));
        assert!(scheduler.schedule(
            trigger,
            ScheduleOptions::default(),
            job,
            &FailureDomain::new(UnitId::new("a")),
        ));
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    fn recording_job() -> (Arc<Mutex<Vec<Instant>>>, Job) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let inner = Arc::clone(&fired);
        let job: Job = Arc::new(move || -> Result<(), Fault> {
            inner.lock().unwrap().push(Instant::now());
            Ok(())
        });
        (fired, job)
    }

    fn gaps(fired: &[Instant]) -> Vec<Duration> {
        fired.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn should_fire_cron_job_every_second() {
        let scheduler = Scheduler::new();
        let (fired, job) = recording_job();
        let trigger = Trigger::parse("* * * * * *").unwrap();
        scheduler.schedule(
            trigger,
            ScheduleOptions::default(),
            job,
            &FailureDomain::new(UnitId::new("a")),
        );

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        let fired = fired.lock().unwrap().clone();
        assert!((9..=11).contains(&fired.len()), "fired {} times", fired.len());
        assert!(gaps(&fired).iter().all(|gap| *gap == Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn should_fire_recurrence_on_each_matching_second() {
        let scheduler = Scheduler::new();
        let (fired, job) = recording_job();
        let trigger = Trigger::recurrence(&serde_json::json!({"second": [0, 30]})).unwrap();
        scheduler.schedule(
            trigger,
            ScheduleOptions::default(),
            job,
            &FailureDomain::new(UnitId::new("a")),
        );

        tokio::time::sleep(Duration::from_secs(125)).await;
        let fired = fired.lock().unwrap().clone();
        assert!(fired.len() >= 4, "fired {} times", fired.len());
        assert!(gaps(&fired).iter().all(|gap| *gap == Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn should_jitter_each_firing_without_drift() {
        let scheduler = Scheduler::new();
        let (fired, job) = recording_job();
        let trigger = Trigger::parse("* * * * * *").unwrap();
        let options = ScheduleOptions {
            shift: 0.0,
            jitter: 0.4,
        };
        scheduler.schedule(trigger, options, job, &FailureDomain::new(UnitId::new("a")));

        tokio::time::sleep(Duration::from_millis(20_500)).await;
        let fired = fired.lock().unwrap().clone();
        assert!(fired.len() >= 18, "fired {} times", fired.len());
        // Nominal instants are one second apart; each firing lands within
        // the jitter bound after its own instant.
        let first = fired[0];
        for (index, at) in fired.iter().enumerate() {
            let nominal = first + Duration::from_secs(u64::try_from(index).unwrap());
            let lateness = at.saturating_duration_since(nominal);
            let earliness = nominal.saturating_duration_since(*at);
            assert!(lateness < Duration::from_millis(400), "firing {index} late by {lateness:?}");
            assert!(earliness < Duration::from_millis(400), "firing {index} early by {earliness:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn should_contain_faulting_job() {
        let scheduler = Scheduler::new();
        let owner = FailureDomain::new(UnitId::new("a"));
        let job: Job = Arc::new(|| -> Result<(), Fault> { Err(Fault::new("job failed")) });
        let trigger = Trigger::At(chrono::Utc::now() + chrono::Duration::milliseconds(50));
        scheduler.schedule(trigger, ScheduleOptions::default(), job, &owner);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(owner.fault_count(), 1);
    }
}
