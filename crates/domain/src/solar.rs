//! Solar events (sunrise, sunset and the twilight variants) for a date and place.
//!
//! Uses the common low-precision solar position algorithm (mean anomaly,
//! ecliptic longitude, declination, transit, hour angle). Accuracy is in the
//! order of a minute, which is plenty for home automation.
//!
//! An event that does not happen on a given day (the sun never sinks below
//! the event's altitude, or never rises above it) has no instant.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::time::{Timestamp, from_millis, to_millis};

const RAD: f64 = PI / 180.0;
const DAY_MS: f64 = 1000.0 * 60.0 * 60.0 * 24.0;
const J1970: f64 = 2_440_588.0;
const J2000: f64 = 2_451_545.0;
const J0: f64 = 0.0009;
const OBLIQUITY: f64 = RAD * 23.4397;

/// Geographic position of the installation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// A named solar event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolarEvent {
    Sunrise,
    SunriseEnd,
    GoldenHourEnd,
    SolarNoon,
    GoldenHour,
    SunsetStart,
    Sunset,
    Dusk,
    NauticalDusk,
    Night,
    Nadir,
    NightEnd,
    NauticalDawn,
    Dawn,
}

impl SolarEvent {
    pub const ALL: [Self; 14] = [
        Self::Sunrise,
        Self::SunriseEnd,
        Self::GoldenHourEnd,
        Self::SolarNoon,
        Self::GoldenHour,
        Self::SunsetStart,
        Self::Sunset,
        Self::Dusk,
        Self::NauticalDusk,
        Self::Night,
        Self::Nadir,
        Self::NightEnd,
        Self::NauticalDawn,
        Self::Dawn,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sunrise => "sunrise",
            Self::SunriseEnd => "sunriseEnd",
            Self::GoldenHourEnd => "goldenHourEnd",
            Self::SolarNoon => "solarNoon",
            Self::GoldenHour => "goldenHour",
            Self::SunsetStart => "sunsetStart",
            Self::Sunset => "sunset",
            Self::Dusk => "dusk",
            Self::NauticalDusk => "nauticalDusk",
            Self::Night => "night",
            Self::Nadir => "nadir",
            Self::NightEnd => "nightEnd",
            Self::NauticalDawn => "nauticalDawn",
            Self::Dawn => "dawn",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|e| *e == self).unwrap_or(0)
    }
}

impl FromStr for SolarEvent {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.name() == s)
            .ok_or_else(|| ConfigurationError::UnknownSolarEvent(s.to_string()))
    }
}

impl fmt::Display for SolarEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sun altitudes (degrees) and the morning/evening events they define.
const ALTITUDES: [(f64, SolarEvent, SolarEvent); 6] = [
    (-0.833, SolarEvent::Sunrise, SolarEvent::Sunset),
    (-0.3, SolarEvent::SunriseEnd, SolarEvent::SunsetStart),
    (-6.0, SolarEvent::Dawn, SolarEvent::Dusk),
    (-12.0, SolarEvent::NauticalDawn, SolarEvent::NauticalDusk),
    (-18.0, SolarEvent::NightEnd, SolarEvent::Night),
    (6.0, SolarEvent::GoldenHourEnd, SolarEvent::GoldenHour),
];

/// All solar event instants of one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SunTimes {
    instants: [Option<Timestamp>; 14],
}

impl SunTimes {
    /// Compute the events of the solar day containing `at`.
    ///
    /// Callers should pass local noon of the wanted date so that the result
    /// belongs to that calendar day regardless of time zone.
    #[must_use]
    pub fn compute(at: Timestamp, location: Location) -> Self {
        let lw = RAD * -location.longitude;
        let phi = RAD * location.latitude;
        let d = to_days(at);

        let n = julian_cycle(d, lw);
        let ds = approx_transit(0.0, lw, n);
        let m = solar_mean_anomaly(ds);
        let l = ecliptic_longitude(m);
        let dec = declination(l);
        let noon = solar_transit(ds, m, l);

        let mut instants = [None; 14];
        instants[SolarEvent::SolarNoon.index()] = from_julian(noon);
        instants[SolarEvent::Nadir.index()] = from_julian(noon - 0.5);

        for (altitude, morning, evening) in ALTITUDES {
            let w = hour_angle(altitude * RAD, phi, dec);
            if w.is_nan() {
                continue;
            }
            let set = solar_transit(approx_transit(w, lw, n), m, l);
            let rise = noon - (set - noon);
            instants[morning.index()] = from_julian(rise);
            instants[evening.index()] = from_julian(set);
        }
        Self { instants }
    }

    /// The event's instant, or `None` if it does not occur that day.
    #[must_use]
    pub fn get(&self, event: SolarEvent) -> Option<Timestamp> {
        self.instants[event.index()]
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_days(at: Timestamp) -> f64 {
    to_millis(at) as f64 / DAY_MS - 0.5 + J1970 - J2000
}

#[allow(clippy::cast_possible_truncation)]
fn from_julian(j: f64) -> Option<Timestamp> {
    let ms = (j + 0.5 - J1970) * DAY_MS;
    if ms.is_finite() {
        from_millis(ms.round() as i64)
    } else {
        None
    }
}

fn julian_cycle(d: f64, lw: f64) -> f64 {
    (d - J0 - lw / (2.0 * PI)).round()
}

fn approx_transit(ht: f64, lw: f64, n: f64) -> f64 {
    J0 + (ht + lw) / (2.0 * PI) + n
}

fn solar_transit(ds: f64, m: f64, l: f64) -> f64 {
    J2000 + ds + 0.0053 * m.sin() - 0.0069 * (2.0 * l).sin()
}

fn solar_mean_anomaly(d: f64) -> f64 {
    RAD * (357.5291 + 0.985_600_28 * d)
}

fn ecliptic_longitude(m: f64) -> f64 {
    let center = RAD * (1.9148 * m.sin() + 0.02 * (2.0 * m).sin() + 0.0003 * (3.0 * m).sin());
    let perihelion = RAD * 102.9372;
    m + center + perihelion + PI
}

fn declination(l: f64) -> f64 {
    (l.sin() * OBLIQUITY.sin()).asin()
}

fn hour_angle(h: f64, phi: f64, dec: f64) -> f64 {
    ((h.sin() - phi.sin() * dec.sin()) / (phi.cos() * dec.cos())).acos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    const STUTTGART: Location = Location {
        latitude: 48.7408,
        longitude: 9.1778,
    };
    const TROMSO: Location = Location {
        latitude: 69.6492,
        longitude: 18.9553,
    };

    fn utc(s: &str) -> Timestamp {
        DateTime::parse_from_rfc3339(s).unwrap().to_utc()
    }

    fn assert_near(actual: Option<Timestamp>, expected: &str, minutes: i64) {
        let actual = actual.expect("event should occur");
        let diff = (actual - utc(expected)).num_minutes().abs();
        assert!(diff <= minutes, "{actual} is {diff} min away from {expected}");
    }

    #[test]
    fn should_parse_every_event_name() {
        for event in SolarEvent::ALL {
            assert_eq!(event.name().parse::<SolarEvent>().unwrap(), event);
        }
    }

    #[test]
    fn should_reject_unknown_event_name() {
        let err = "moonrise".parse::<SolarEvent>().unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownSolarEvent("moonrise".to_string())
        );
    }

    #[test]
    fn should_compute_midsummer_times_for_stuttgart() {
        let times = SunTimes::compute(utc("2024-06-21T10:00:00Z"), STUTTGART);
        assert_near(times.get(SolarEvent::Sunrise), "2024-06-21T03:20:00Z", 10);
        assert_near(times.get(SolarEvent::Sunset), "2024-06-21T19:32:00Z", 10);
        assert_near(times.get(SolarEvent::SolarNoon), "2024-06-21T11:25:00Z", 5);
    }

    #[test]
    fn should_order_twilight_events() {
        let times = SunTimes::compute(utc("2024-03-20T11:00:00Z"), STUTTGART);
        let dawn = times.get(SolarEvent::Dawn).unwrap();
        let sunrise = times.get(SolarEvent::Sunrise).unwrap();
        let noon = times.get(SolarEvent::SolarNoon).unwrap();
        let sunset = times.get(SolarEvent::Sunset).unwrap();
        let dusk = times.get(SolarEvent::Dusk).unwrap();
        assert!(dawn < sunrise && sunrise < noon && noon < sunset && sunset < dusk);
        let nadir = times.get(SolarEvent::Nadir).unwrap();
        let half_day = (noon - nadir).num_seconds();
        assert!((43_199..=43_201).contains(&half_day));
    }

    #[test]
    fn should_have_no_sunset_during_polar_day() {
        let times = SunTimes::compute(utc("2024-06-21T10:00:00Z"), TROMSO);
        assert_eq!(times.get(SolarEvent::Sunset), None);
        assert_eq!(times.get(SolarEvent::Sunrise), None);
        assert!(times.get(SolarEvent::SolarNoon).is_some());
    }

    #[test]
    fn should_have_no_sunrise_during_polar_night() {
        let times = SunTimes::compute(utc("2024-12-21T10:00:00Z"), TROMSO);
        assert_eq!(times.get(SolarEvent::Sunrise), None);
        assert!(times.get(SolarEvent::Dawn).is_some());
    }
}
