//! Sun scheduler: jobs bound to named solar events.
//!
//! Event tables for yesterday, today and tomorrow are computed at local
//! noon of each date and recomputed at every local midnight, at which point
//! every registered job is armed again for the new day.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use busscripts_domain::error::ConfigurationError;
use busscripts_domain::solar::{Location, SolarEvent, SunTimes};
use busscripts_domain::time::{Timestamp, now};
use chrono::{Days, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use tokio::task::JoinHandle;

use crate::scheduler::{Job, ScheduleOptions, jitter_delay};
use crate::supervisor::FailureDomain;

/// Largest accepted shift, in seconds, either direction.
pub const MAX_SHIFT_SECONDS: f64 = 86_400.0;

/// Reject shifts outside ±[`MAX_SHIFT_SECONDS`].
///
/// # Errors
///
/// Returns [`ConfigurationError::ShiftOutOfRange`].
pub fn check_shift(shift: f64) -> Result<(), ConfigurationError> {
    if shift.is_finite() && shift.abs() <= MAX_SHIFT_SECONDS {
        Ok(())
    } else {
        Err(ConfigurationError::ShiftOutOfRange(shift))
    }
}

/// Events of three consecutive days around `date`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SunTables {
    pub date: NaiveDate,
    pub yesterday: SunTimes,
    pub today: SunTimes,
    pub tomorrow: SunTimes,
}

impl SunTables {
    #[must_use]
    pub fn compute<Tz: TimeZone>(date: NaiveDate, tz: &Tz, location: Location) -> Self {
        let at = |day: NaiveDate| SunTimes::compute(local_noon(day, tz), location);
        Self {
            date,
            yesterday: at(date.checked_sub_days(Days::new(1)).unwrap_or(date)),
            today: at(date),
            tomorrow: at(date.checked_add_days(Days::new(1)).unwrap_or(date)),
        }
    }
}

fn local_noon<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> Timestamp {
    let noon = date.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN));
    tz.from_local_datetime(&noon)
        .earliest()
        .map_or_else(|| Utc.from_utc_datetime(&noon), |local| local.to_utc())
}

/// Why a job does not fire today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The event does not occur (polar day or night).
    NoEvent,
    /// The instant is more than a second in the past.
    Missed,
    /// Even after one retry the shifted instant is not today.
    OtherDay,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoEvent => "event does not occur today",
            Self::Missed => "event already passed",
            Self::OtherDay => "shifted event is not today",
        })
    }
}

/// Outcome of evaluating one job for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firing {
    Skip(SkipReason),
    /// Within a second of now: run without a timer.
    Now,
    At(Timestamp),
}

/// Decide when `event`, shifted by `shift` seconds and delayed by
/// `jitter_ms`, fires on `tables.date`.
///
/// If the shifted instant falls on another calendar date the neighbouring
/// table is tried once: a later date retries yesterday's event, an earlier
/// date retries tomorrow's.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn plan_firing<Tz: TimeZone>(
    tables: &SunTables,
    tz: &Tz,
    event: SolarEvent,
    shift: f64,
    jitter_ms: i64,
    now: Timestamp,
) -> Firing {
    let offset = chrono::Duration::milliseconds((shift * 1000.0) as i64);
    let resolve = |times: &SunTimes| times.get(event).map(|instant| instant + offset);
    let date_of = |instant: Timestamp| instant.with_timezone(tz).date_naive();

    let Some(mut instant) = resolve(&tables.today) else {
        return Firing::Skip(SkipReason::NoEvent);
    };
    if date_of(instant) != tables.date {
        let retry = if date_of(instant) > tables.date {
            &tables.yesterday
        } else {
            &tables.tomorrow
        };
        match resolve(retry) {
            Some(retried) if date_of(retried) == tables.date => instant = retried,
            Some(_) => return Firing::Skip(SkipReason::OtherDay),
            None => return Firing::Skip(SkipReason::NoEvent),
        }
    }

    let instant = instant + chrono::Duration::milliseconds(jitter_ms.max(0));
    let margin = chrono::Duration::seconds(1);
    if instant < now - margin {
        Firing::Skip(SkipReason::Missed)
    } else if instant <= now + margin {
        Firing::Now
    } else {
        Firing::At(instant)
    }
}

struct SolarJob {
    event: SolarEvent,
    options: ScheduleOptions,
    job: Job,
    owner: FailureDomain,
}

/// Holds solar jobs and re-arms them every day.
pub struct SunScheduler {
    location: Location,
    tables: RwLock<SunTables>,
    jobs: Mutex<Vec<Arc<SolarJob>>>,
}

impl SunScheduler {
    #[must_use]
    pub fn new(location: Location) -> Self {
        let today = Local::now().date_naive();
        Self {
            location,
            tables: RwLock::new(SunTables::compute(today, &Local, location)),
            jobs: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn location(&self) -> Location {
        self.location
    }

    /// Register a job and arm it for today. The job stays registered for
    /// the life of the process.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::ShiftOutOfRange`] when the shift is not
    /// within ±86400 seconds.
    pub fn register(
        &self,
        event: SolarEvent,
        options: ScheduleOptions,
        job: Job,
        owner: &FailureDomain,
    ) -> Result<Firing, ConfigurationError> {
        check_shift(options.shift)?;
        let solar = Arc::new(SolarJob {
            event,
            options,
            job,
            owner: owner.clone(),
        });
        let firing = self.arm(&solar);
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(solar);
        Ok(firing)
    }

    /// Number of registered jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the tables with those of `date` and arm every job again.
    pub fn recompute(&self, date: NaiveDate) {
        let tables = SunTables::compute(date, &Local, self.location);
        *self.tables.write().unwrap_or_else(PoisonError::into_inner) = tables;
        let jobs = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        tracing::debug!(%date, jobs = jobs.len(), "solar tables recomputed");
        for job in &jobs {
            self.arm(job);
        }
    }

    /// Spawn the daily recompute loop.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let current = this
                    .tables
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .date;
                let Some(next) = current.checked_add_days(Days::new(1)) else {
                    break;
                };
                let midnight = Local
                    .from_local_datetime(&next.and_time(NaiveTime::MIN))
                    .earliest()
                    .map_or_else(|| local_noon(next, &Local), |local| local.to_utc());
                let wait = (midnight - now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;
                this.recompute(next);
            }
        })
    }

    fn arm(&self, solar: &Arc<SolarJob>) -> Firing {
        let tables = self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let jitter = jitter_delay(solar.options.jitter, rand::random());
        let jitter_ms = i64::try_from(jitter.as_millis()).unwrap_or(i64::MAX);
        let at = now();
        let firing = plan_firing(
            &tables,
            &Local,
            solar.event,
            solar.options.shift,
            jitter_ms,
            at,
        );

        let delay = match firing {
            Firing::Skip(reason) => {
                tracing::debug!(
                    unit = %solar.owner.unit(),
                    event = %solar.event,
                    %reason,
                    "solar job skipped today"
                );
                return firing;
            }
            Firing::Now => Duration::ZERO,
            Firing::At(instant) => (instant - at).to_std().unwrap_or(Duration::ZERO),
        };
        tracing::debug!(unit = %solar.owner.unit(), event = %solar.event, ?delay, "solar job armed");
        let job = Arc::clone(&solar.job);
        solar
            .owner
            .spawn_after("solar job", delay, move || job());
        firing
    }
}
