use std::fmt;
use std::time::{Duration, Instant};

/// Resumable stopwatch. `stop` freezes the elapsed time, `resume` keeps
/// accumulating on top of it, `start` resets it.
#[derive(Debug, Clone, Default)]
pub struct Timer {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A timer that is already running.
    pub fn started() -> Self {
        let mut timer = Self::new();
        timer.start();
        timer
    }

    pub fn start(&mut self) {
        self.accumulated = Duration::ZERO;
        self.running_since = Some(Instant::now());
    }

    pub fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.accumulated
            + self
                .running_since
                .map(|since| since.elapsed())
                .unwrap_or_default()
    }

    pub fn nanoseconds(&self) -> u64 {
        saturating_u64(self.elapsed().as_nanos())
    }

    pub fn microseconds(&self) -> u64 {
        saturating_u64(self.elapsed().as_micros())
    }

    pub fn milliseconds(&self) -> u64 {
        saturating_u64(self.elapsed().as_millis())
    }

    pub fn seconds(&self) -> u64 {
        self.elapsed().as_secs()
    }
}

fn saturating_u64(v: u128) -> u64 {
    u64::try_from(v).unwrap_or(u64::MAX)
}

/// Human readable rendering of a duration, picking the unit by magnitude.
pub fn format_duration(d: Duration) -> String {
    let ns = d.as_nanos();
    if ns <= 1_000 {
        return format!("{ns} nanosecs");
    }
    if ns <= 1_000_000 {
        let us = ns / 1_000;
        return if us >= 3 {
            format!("{us} microsecs")
        } else {
            format!("{us}.{:03} microsecs", ns % 1_000)
        };
    }
    if ns <= 1_000_000_000 {
        let us = ns / 1_000;
        let ms = us / 1_000;
        return if ms >= 3 {
            format!("{ms} milliseconds")
        } else {
            format!("{ms}.{:03} milliseconds", us % 1_000)
        };
    }
    let total_ms = d.as_millis();
    let total_s = d.as_secs();
    if total_s < 60 {
        return if total_s >= 10 {
            format!("{total_s} seconds")
        } else {
            format!("{total_s}.{:03} seconds", total_ms % 1_000)
        };
    }
    if total_s < 3_600 {
        return format!("{}:{:02} minutes", total_s / 60, total_s % 60);
    }
    format!(
        "{}:{:02}:{:02} hours",
        total_s / 3_600,
        (total_s / 60) % 60,
        total_s % 60
    )
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_duration(self.elapsed()))
    }
}
