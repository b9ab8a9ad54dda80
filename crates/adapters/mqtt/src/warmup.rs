//! Warm-up gate: holds back unit loading until retained messages settle.
//!
//! Armed by the first successful connection. Every retained message
//! received while armed pushes the deadline out by the quiet period. Once
//! the deadline passes the gate opens for good; later reconnects never arm
//! it again.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct WarmupGate {
    quiet: Duration,
    deadline: Option<Instant>,
    opened: bool,
}

impl WarmupGate {
    #[must_use]
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            deadline: None,
            opened: false,
        }
    }

    /// Start the quiet period, unless the gate already opened or is armed.
    pub fn arm(&mut self, now: Instant) {
        if !self.opened && self.deadline.is_none() {
            self.deadline = Some(now + self.quiet);
        }
    }

    /// A retained message arrived: extend the quiet period if armed.
    pub fn on_retained(&mut self, now: Instant) {
        if self.deadline.is_some() {
            self.deadline = Some(now + self.quiet);
        }
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Open the gate if its deadline has passed. Returns `true` exactly once.
    pub fn try_open(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.opened = true;
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.opened
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_millis(500);

    #[test]
    fn should_stay_closed_until_armed() {
        let mut gate = WarmupGate::new(QUIET);
        let now = Instant::now();
        assert!(gate.deadline().is_none());
        assert!(!gate.try_open(now + Duration::from_secs(10)));
    }

    #[test]
    fn should_open_after_quiet_period() {
        let mut gate = WarmupGate::new(QUIET);
        let start = Instant::now();
        gate.arm(start);
        assert!(!gate.try_open(start + Duration::from_millis(499)));
        assert!(gate.try_open(start + QUIET));
        assert!(gate.is_open());
        assert!(!gate.try_open(start + Duration::from_secs(5)));
    }

    #[test]
    fn should_extend_deadline_on_retained_message() {
        let mut gate = WarmupGate::new(QUIET);
        let start = Instant::now();
        gate.arm(start);
        gate.on_retained(start + Duration::from_millis(400));
        assert!(!gate.try_open(start + Duration::from_millis(600)));
        assert!(gate.try_open(start + Duration::from_millis(900)));
    }

    #[test]
    fn should_not_rearm_after_opening() {
        let mut gate = WarmupGate::new(QUIET);
        let start = Instant::now();
        gate.arm(start);
        assert!(gate.try_open(start + QUIET));
        gate.arm(start + Duration::from_secs(10));
        gate.on_retained(start + Duration::from_secs(10));
        assert!(gate.deadline().is_none());
    }

    #[test]
    fn should_ignore_retained_messages_before_arming() {
        let mut gate = WarmupGate::new(QUIET);
        gate.on_retained(Instant::now());
        assert!(gate.deadline().is_none());
    }
}
