//! Adaptive Bitrate (ABR) controller
//!
//! Throughput-based selection with a conservative dual-EWMA estimator:
//! - Fast and slow EWMAs weighted by download time, the lower one wins
//! - Safety factor on the estimate before comparing against bitrates
//! - Up-switches gated by buffer level and hysteresis, down-switches immediate

use crate::config::AbrConfig;
use crate::types::Quality;
use std::time::Duration;
use tracing::{debug, instrument};

/// Throughput estimation strategy
pub trait Estimator: Send {
    /// Estimated throughput in bits per second
    fn estimate_bps(&self) -> Option<u64>;

    /// Feed one completed download
    fn push_sample(&mut self, sample: ThroughputSample);

    /// Forget everything learned so far
    fn reset(&mut self);
}

/// One completed segment download
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputSample {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl ThroughputSample {
    pub fn new(bytes: u64, elapsed: Duration) -> Self {
        Self { bytes, elapsed }
    }
}

/// Dual-EWMA throughput estimator
#[derive(Debug, Clone)]
pub struct ThroughputEstimator {
    fast: Ewma,
    slow: Ewma,
    min_sample_bytes: u64,
    initial_bps: Option<u64>,
}

impl ThroughputEstimator {
    const MIN_ELAPSED_MS: f64 = 0.5;

    pub fn new(config: &AbrConfig) -> Self {
        Self {
            fast: Ewma::new(config.fast_half_life),
            slow: Ewma::new(config.slow_half_life),
            min_sample_bytes: config.min_sample_bytes,
            initial_bps: config.initial_bitrate_estimate,
        }
    }
}

impl Estimator for ThroughputEstimator {
    fn estimate_bps(&self) -> Option<u64> {
        let estimate = self.fast.estimate().min(self.slow.estimate());
        if estimate > 0.0 {
            Some(estimate.round() as u64)
        } else {
            self.initial_bps
        }
    }

    fn push_sample(&mut self, sample: ThroughputSample) {
        if sample.bytes < self.min_sample_bytes {
            return;
        }

        let elapsed_ms = (sample.elapsed.as_secs_f64() * 1000.0).max(Self::MIN_ELAPSED_MS);
        let bps = sample.bytes as f64 * 8000.0 / elapsed_ms;
        let weight = elapsed_ms / 1000.0;

        self.fast.add(weight, bps);
        self.slow.add(weight, bps);
    }

    fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
    }
}

#[derive(Debug, Clone)]
struct Ewma {
    alpha: f64,
    last: f64,
    total_weight: f64,
}

impl Ewma {
    fn new(half_life: f64) -> Self {
        Self {
            alpha: (0.5_f64.ln() / half_life.max(0.001)).exp(),
            last: 0.0,
            total_weight: 0.0,
        }
    }

    fn add(&mut self, weight: f64, value: f64) {
        let weight = weight.max(0.0);
        let alpha = self.alpha.powf(weight);
        self.last = value * (1.0 - alpha) + alpha * self.last;
        self.total_weight += weight;
    }

    /// Zero-bias corrected estimate
    fn estimate(&self) -> f64 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }
        let zero_factor = 1.0 - self.alpha.powf(self.total_weight);
        self.last / zero_factor.max(1e-6)
    }

    fn reset(&mut self) {
        self.last = 0.0;
        self.total_weight = 0.0;
    }
}

/// Why the controller chose what it chose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbrReason {
    /// First selection of a session
    Initial,
    UpSwitch,
    DownSwitch,
    /// The previous selection no longer fits the ceilings
    Ceiling,
    /// A pin overrides ABR
    Manual,
    NoEstimate,
    BufferTooLowForUpSwitch,
    AlreadyOptimal,
}

/// Outcome of one ABR evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct AbrDecision {
    pub quality: Quality,
    pub reason: AbrReason,
    pub changed: bool,
}

/// Signals the controller decides on
#[derive(Debug, Clone, Copy, Default)]
pub struct AbrContext<'a> {
    /// Quality currently selected, `None` before the first decision
    pub current: Option<&'a Quality>,
    /// Playable media ahead of the playhead (seconds)
    pub buffer_ahead: f64,
}

/// Throughput-driven quality selection
pub struct AbrController<E: Estimator = ThroughputEstimator> {
    config: AbrConfig,
    estimator: E,
}

impl AbrController<ThroughputEstimator> {
    pub fn new(config: AbrConfig) -> Self {
        let estimator = ThroughputEstimator::new(&config);
        Self::with_estimator(config, estimator)
    }
}

impl<E: Estimator> AbrController<E> {
    pub fn with_estimator(config: AbrConfig, estimator: E) -> Self {
        Self { config, estimator }
    }

    /// Record a completed segment download
    pub fn record(&mut self, bytes: u64, elapsed: Duration) {
        self.estimator.push_sample(ThroughputSample::new(bytes, elapsed));
        debug!(
            bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            estimate_bps = ?self.estimator.estimate_bps(),
            "Throughput sample recorded"
        );
    }

    pub fn estimate_bps(&self) -> Option<u64> {
        self.estimator.estimate_bps()
    }

    /// Estimate after the safety factor, in bits per second
    pub fn budget_bps(&self) -> Option<f64> {
        self.estimator
            .estimate_bps()
            .map(|e| e as f64 * self.config.safety_factor)
    }

    pub fn reset(&mut self) {
        self.estimator.reset();
    }

    /// Choose a quality among `candidates` (bitrate ascending).
    ///
    /// Returns `None` only when there are no candidates.
    #[instrument(skip(self, candidates), fields(candidates = candidates.len()))]
    pub fn decide(&self, candidates: &[&Quality], context: AbrContext<'_>) -> Option<AbrDecision> {
        let lowest = *candidates.first()?;
        let budget = self.budget_bps();

        let Some(current) = context.current else {
            let quality = match budget {
                Some(budget) => best_under(candidates, budget, None).unwrap_or(lowest),
                None => lowest,
            };
            return Some(self.log(AbrDecision {
                quality: quality.clone(),
                reason: AbrReason::Initial,
                changed: true,
            }));
        };

        if !candidates.contains(&current) {
            // Ceiling moved under the current selection; stay as close as allowed
            let quality = match budget {
                Some(budget) => best_under(candidates, budget, Some(current)),
                None => best_under(candidates, current.bitrate as f64, Some(current)),
            }
            .unwrap_or(lowest);
            return Some(self.log(AbrDecision {
                quality: quality.clone(),
                reason: AbrReason::Ceiling,
                changed: quality != current,
            }));
        }

        let Some(budget) = budget else {
            return Some(self.log(keep(current, AbrReason::NoEstimate)));
        };

        let target = best_under(candidates, budget, Some(current)).unwrap_or(lowest);
        if target == current {
            return Some(self.log(keep(current, AbrReason::AlreadyOptimal)));
        }

        if target.bitrate < current.bitrate {
            return Some(self.log(AbrDecision {
                quality: target.clone(),
                reason: AbrReason::DownSwitch,
                changed: true,
            }));
        }

        if context.buffer_ahead < self.config.min_buffer_for_up_switch {
            return Some(self.log(keep(current, AbrReason::BufferTooLowForUpSwitch)));
        }

        let hysteresis_budget = budget / self.config.up_hysteresis;
        match best_under(candidates, hysteresis_budget, Some(current)) {
            Some(up) if up.bitrate > current.bitrate => Some(self.log(AbrDecision {
                quality: up.clone(),
                reason: AbrReason::UpSwitch,
                changed: true,
            })),
            _ => Some(self.log(keep(current, AbrReason::AlreadyOptimal))),
        }
    }

    fn log(&self, decision: AbrDecision) -> AbrDecision {
        debug!(
            quality = %decision.quality,
            reason = ?decision.reason,
            changed = decision.changed,
            estimate_bps = ?self.estimator.estimate_bps(),
            safety_factor = self.config.safety_factor,
            "ABR decision"
        );
        decision
    }
}

fn keep(current: &Quality, reason: AbrReason) -> AbrDecision {
    AbrDecision {
        quality: current.clone(),
        reason,
        changed: false,
    }
}

/// Highest-bitrate candidate within `budget`. Among equal bitrates the one
/// closest in resolution to `previous` wins.
fn best_under<'a>(
    candidates: &[&'a Quality],
    budget: f64,
    previous: Option<&Quality>,
) -> Option<&'a Quality> {
    let bitrate = candidates
        .iter()
        .filter(|q| q.bitrate as f64 <= budget)
        .map(|q| q.bitrate)
        .max()?;

    candidates
        .iter()
        .copied()
        .filter(|q| q.bitrate == bitrate)
        .min_by_key(|q| match previous {
            Some(p) if *q == p => (0, 0),
            Some(p) => (
                1 + q.height.abs_diff(p.height) as u64,
                q.width.abs_diff(p.width) as u64,
            ),
            None => (0, 0),
        })
}
