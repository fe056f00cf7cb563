// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Duty-cycle rate limiter.
//!
//! The gateway throttles its traffic on a fixed schedule: after `interval`
//! seconds of normal operation a delay period of `duration` seconds starts,
//! during which the connection handler sleeps a fixed amount once per
//! forwarded request. The limiter only keeps the schedule; it never sleeps
//! itself.

use std::time::{Duration, Instant};

/// Alternating active/idle gate, a pure function of time since creation.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    duration: Duration,
    last_delay_end: Instant,
    delay_start: Option<Instant>,
    active: bool,
}

impl RateLimiter {
    /// A fresh limiter starts idle; the first delay period begins
    /// `interval` after construction.
    #[must_use]
    pub fn new(interval: Duration, duration: Duration) -> Self {
        Self {
            interval,
            duration,
            last_delay_end: Instant::now(),
            delay_start: None,
            active: false,
        }
    }

    /// Perform the phase-transition check and report whether the delay
    /// period is active.
    pub fn check_in_delay_period(&mut self) -> bool {
        self.check_at(Instant::now())
    }

    fn check_at(&mut self, now: Instant) -> bool {
        if !self.active && now.duration_since(self.last_delay_end) >= self.interval {
            log::info!("entering delay period");
            self.active = true;
            self.delay_start = Some(now);
        } else if self.active {
            // delay_start is always set while active
            let started = self.delay_start.unwrap_or(now);
            if now.duration_since(started) >= self.duration {
                log::info!("exiting delay period");
                self.active = false;
                self.last_delay_end = now;
            }
        }
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(30);
    const DURATION: Duration = Duration::from_secs(10);

    #[test]
    fn starts_idle() {
        let mut limiter = RateLimiter::new(INTERVAL, DURATION);
        let t0 = limiter.last_delay_end;
        assert!(!limiter.check_at(t0));
        assert!(!limiter.check_at(t0 + Duration::from_secs(29)));
    }

    #[test]
    fn full_duty_cycle() {
        let mut limiter = RateLimiter::new(INTERVAL, DURATION);
        let t0 = limiter.last_delay_end;

        // Idle until the interval elapses.
        assert!(!limiter.check_at(t0 + Duration::from_secs(29)));
        // Active for the delay duration.
        assert!(limiter.check_at(t0 + Duration::from_secs(30)));
        assert!(limiter.check_at(t0 + Duration::from_secs(39)));
        // Back to idle, restarting the interval from the moment of exit.
        assert!(!limiter.check_at(t0 + Duration::from_secs(40)));
        assert!(!limiter.check_at(t0 + Duration::from_secs(69)));
        // And the cycle repeats.
        assert!(limiter.check_at(t0 + Duration::from_secs(70)));
    }

    #[test]
    fn phases_alternate_strictly() {
        let mut limiter = RateLimiter::new(INTERVAL, DURATION);
        let t0 = limiter.last_delay_end;
        let mut previous = false;
        let mut transitions = 0;
        for second in 0..200 {
            let active = limiter.check_at(t0 + Duration::from_secs(second));
            if active != previous {
                transitions += 1;
                previous = active;
            }
        }
        // 30 idle / 10 active: phase changes at 30, 40, 70, 80, ... 190.
        assert_eq!(transitions, 9);
    }
}
