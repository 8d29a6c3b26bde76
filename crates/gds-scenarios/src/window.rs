//! Simulation window selection inside the historical profile range.

use chrono::{DateTime, Duration, TimeZone, Utc};
use gds_core::{ExperimentConfig, GdsError, GdsResult, ProfileData, TimeWindow, WindowPolicy};
use rand::Rng;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
enum Source {
    /// Configured explicitly, used as-is
    Fixed(TimeWindow),
    /// No length configured: the whole profile range
    FullRange(TimeWindow),
    /// Random midnight-aligned window of fixed length
    Random { length: Duration },
}

/// Picks the simulation window of each trial.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSelector {
    t0: DateTime<Utc>,
    t1: DateTime<Utc>,
    source: Source,
    policy: WindowPolicy,
}

impl WindowSelector {
    /// Random windows of `length_days` within `[t0, t1]`; the full range if `None`.
    pub fn new(
        bounds: (DateTime<Utc>, DateTime<Utc>),
        length_days: Option<u32>,
        policy: WindowPolicy,
    ) -> GdsResult<Self> {
        let (t0, t1) = bounds;
        let range = TimeWindow::new(t0, t1)?;
        let source = match length_days {
            None => Source::FullRange(range),
            Some(days) => {
                let length = Duration::days(i64::from(days));
                if days == 0 {
                    return Err(GdsError::Window("window length must be at least one day".into()));
                }
                if length > range.duration() {
                    return Err(GdsError::Window(format!(
                        "window of {days} days does not fit profile range {range}"
                    )));
                }
                Source::Random { length }
            }
        };
        Ok(Self {
            t0,
            t1,
            source,
            policy,
        })
    }

    /// Always return `window`.
    pub fn fixed(window: TimeWindow) -> Self {
        Self {
            t0: window.start(),
            t1: window.end(),
            source: Source::Fixed(window),
            policy: WindowPolicy::Abort,
        }
    }

    pub fn from_config(config: &ExperimentConfig, profiles: &ProfileData) -> GdsResult<Self> {
        match config.fixed_window()? {
            Some(window) => Ok(Self::fixed(window)),
            None => Self::new(
                profiles.bounds(),
                config.window.length_days,
                config.window.policy,
            ),
        }
    }

    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    /// One candidate draw. `None` when the candidate leaves the profile range.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<TimeWindow> {
        let length = match &self.source {
            Source::Fixed(window) | Source::FullRange(window) => return Some(*window),
            Source::Random { length } => *length,
        };
        let range_secs = (self.t1 - self.t0).num_seconds();
        let offset = rng.gen_range(0..range_secs);
        let start = midnight(self.t0 + Duration::seconds(offset));
        let end = start + length;
        if start < self.t0 || end > self.t1 {
            return None;
        }
        TimeWindow::new(start, end).ok()
    }

    /// Window for the next trial, applying the rejection policy.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> GdsResult<TimeWindow> {
        match self.policy {
            WindowPolicy::Retry { max_draws } => {
                for attempt in 1..=max_draws.max(1) {
                    if let Some(window) = self.draw(rng) {
                        return Ok(window);
                    }
                    debug!(attempt, "window candidate rejected");
                }
                Err(GdsError::Window(format!(
                    "no valid window within [{}, {}] after {max_draws} draws",
                    self.t0, self.t1
                )))
            }
            WindowPolicy::Clamp => match self.draw(rng) {
                Some(window) => Ok(window),
                None => self.latest(),
            },
            WindowPolicy::Abort => self.draw(rng).ok_or_else(|| {
                GdsError::Window(format!(
                    "window candidate left profile range [{}, {}]",
                    self.t0, self.t1
                ))
            }),
        }
    }

    /// Latest valid window `[t1 - length, t1]`.
    fn latest(&self) -> GdsResult<TimeWindow> {
        match &self.source {
            Source::Fixed(window) | Source::FullRange(window) => Ok(*window),
            Source::Random { length } => TimeWindow::new(self.t1 - *length, self.t1),
        }
    }
}

fn midnight(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&at.date_naive().and_time(chrono::NaiveTime::MIN))
}
