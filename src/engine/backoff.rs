//! Scheduling between empty polls.
//!
//! The engine calls [`Backoff::idle`] every time it finds no new block and
//! [`Backoff::reset`] after progress. Which policy is right depends on the platform's
//! real-time margin: the ring must never wrap onto undrained data while the consumer is
//! asleep, so the longest idle interval has to stay well below
//! `ring_blocks * producer_period`.
//!
//! - **Spin**: no syscalls, lowest latency, one core pegged.
//! - **Sleep**: fixed sleep between polls.
//! - **Adaptive**: starts at `min`, doubles on every empty poll up to `max`, drops back to
//!   `min` as soon as a block arrives.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, IngestError};

/// Idle policy between polls of the block counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PollBackoff {
    /// Busy-wait with a CPU spin hint.
    Spin,
    /// Sleep a fixed interval.
    Sleep {
        /// Sleep between polls.
        #[serde(with = "humantime_serde")]
        interval: Duration,
    },
    /// Exponential sleep between `min` and `max`.
    Adaptive {
        /// First wait after progress.
        #[serde(with = "humantime_serde")]
        min: Duration,
        /// Longest wait.
        #[serde(with = "humantime_serde")]
        max: Duration,
    },
}

impl Default for PollBackoff {
    fn default() -> Self {
        PollBackoff::Adaptive {
            min: Duration::from_micros(10),
            max: Duration::from_millis(1),
        }
    }
}

impl PollBackoff {
    /// Reject policies that could never make progress or are internally inconsistent.
    pub fn validate(&self) -> AppResult<()> {
        match *self {
            PollBackoff::Spin | PollBackoff::Sleep { .. } => Ok(()),
            PollBackoff::Adaptive { min, max } => {
                if min.is_zero() {
                    return Err(IngestError::Configuration(
                        "adaptive backoff min must be greater than 0".into(),
                    ));
                }
                if min > max {
                    return Err(IngestError::Configuration(format!(
                        "adaptive backoff min {:?} exceeds max {:?}",
                        min, max
                    )));
                }
                Ok(())
            }
        }
    }

    /// Longest single idle period this policy can produce.
    pub fn max_idle(&self) -> Duration {
        match *self {
            PollBackoff::Spin => Duration::ZERO,
            PollBackoff::Sleep { interval } => interval,
            PollBackoff::Adaptive { max, .. } => max,
        }
    }
}

/// Running state of a [`PollBackoff`] policy.
#[derive(Debug)]
pub struct Backoff {
    policy: PollBackoff,
    current: Duration,
    idle_polls: u64,
}

impl Backoff {
    /// Start at the policy's shortest wait.
    pub fn new(policy: PollBackoff) -> Self {
        let current = match policy {
            PollBackoff::Adaptive { min, .. } => min,
            _ => Duration::ZERO,
        };
        Self {
            policy,
            current,
            idle_polls: 0,
        }
    }

    /// Wait after a poll that found nothing.
    pub fn idle(&mut self) {
        self.idle_polls += 1;
        match self.policy {
            PollBackoff::Spin => std::hint::spin_loop(),
            PollBackoff::Sleep { interval } => std::thread::sleep(interval),
            PollBackoff::Adaptive { max, .. } => {
                std::thread::sleep(self.current);
                self.current = self.current.saturating_mul(2).min(max);
            }
        }
    }

    /// Progress was made; return to the shortest wait.
    pub fn reset(&mut self) {
        if let PollBackoff::Adaptive { min, .. } = self.policy {
            self.current = min;
        }
    }

    /// Wait the next idle call would sleep for.
    pub fn current(&self) -> Duration {
        match self.policy {
            PollBackoff::Spin => Duration::ZERO,
            PollBackoff::Sleep { interval } => interval,
            PollBackoff::Adaptive { .. } => self.current,
        }
    }

    /// Total empty polls seen so far.
    pub fn idle_polls(&self) -> u64 {
        self.idle_polls
    }
}
