use crate::config::BalancerConfig;
use std::collections::VecDeque;

/// Risk accrued per second of overcurrent.
///
/// Steps follow the trip curve of a C-characteristic breaker loosely: mild
/// overload is tolerated for about a minute, a doubling of the limit trips
/// within a second.
pub fn trip_risk_rate(threshold: f64, overcurrent_fraction: f64) -> f64 {
    if overcurrent_fraction <= 0.13 {
        threshold / 60.0
    } else if overcurrent_fraction <= 0.40 {
        threshold / 30.0
    } else if overcurrent_fraction <= 1.0 {
        threshold / 10.0
    } else {
        threshold
    }
}

/// Decision taken by a monitor for one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseAction {
    /// Keep the previously settled value
    Hold,
    /// Overcurrent persisted long enough; shed this (negative) amount
    Cut(i32),
    /// Headroom was stable over the hold-off period; offer this much
    Restore(i32),
}

/// Trip-risk state machine for one phase
#[derive(Debug, Clone)]
pub struct PhaseRiskMonitor {
    max_limit: i32,
    trip_risk_threshold: f64,
    risk_decay_per_second: f64,
    recovery_risk_threshold: f64,
    recovery_std: f64,
    hold_off_period_s: f64,
    history_capacity: usize,

    cumulative_risk: f64,
    samples: VecDeque<i32>,
    risk_deltas: VecDeque<f64>,
    last_compute: Option<f64>,
    last_adjustment: Option<f64>,
    settled: i32,
}

impl PhaseRiskMonitor {
    pub fn new(config: &BalancerConfig, max_limit: i32) -> Self {
        Self {
            max_limit,
            trip_risk_threshold: config.trip_risk_threshold,
            risk_decay_per_second: config.risk_decay_per_second,
            recovery_risk_threshold: config.recovery_risk_threshold,
            recovery_std: config.recovery_std,
            hold_off_period_s: config.hold_off_period_s,
            history_capacity: config.history_capacity.max(1),
            cumulative_risk: 0.0,
            samples: VecDeque::new(),
            risk_deltas: VecDeque::new(),
            last_compute: None,
            last_adjustment: None,
            settled: 0,
        }
    }

    /// Process one headroom sample taken at `now` (seconds)
    pub fn update(&mut self, available: i32, now: f64) -> PhaseAction {
        let elapsed = self.last_compute.map_or(0.0, |last| (now - last).max(0.0));
        self.last_compute = Some(now);
        let last_adjustment = *self.last_adjustment.get_or_insert(now);

        if available < 0 {
            let rate = self.overcurrent_rate(available);
            let increase = rate * elapsed;
            self.cumulative_risk += increase;
            self.push_risk_delta(increase);

            if self.cumulative_risk >= self.trip_risk_threshold {
                self.reset(now);
                self.settled = available;
                return PhaseAction::Cut(available);
            }
            return PhaseAction::Hold;
        }

        let decay = self.risk_decay_per_second * elapsed;
        self.cumulative_risk = (self.cumulative_risk - decay).max(0.0);
        self.push_sample(available);
        self.push_risk_delta(-decay);

        if now - last_adjustment >= self.hold_off_period_s && self.is_stable_recovery() {
            let restored = super::floored_median(&self.samples)
                .unwrap_or(available)
                .min(self.max_limit);
            self.reset(now);
            self.settled = restored;
            return PhaseAction::Restore(restored);
        }
        PhaseAction::Hold
    }

    fn overcurrent_rate(&self, available: i32) -> f64 {
        if self.max_limit <= 0 {
            return self.trip_risk_threshold;
        }
        let fraction = f64::from(available.unsigned_abs()) / f64::from(self.max_limit);
        trip_risk_rate(self.trip_risk_threshold, fraction)
    }

    /// Buffered headroom is present, risk has not built up over the window and
    /// the samples do not swing more than the configured deviation.
    fn is_stable_recovery(&self) -> bool {
        if self.samples.is_empty() {
            return false;
        }
        let risk_sum: f64 = self.risk_deltas.iter().sum();
        risk_sum <= self.recovery_risk_threshold && self.sample_std_dev() < self.recovery_std
    }

    fn sample_std_dev(&self) -> f64 {
        let n = self.samples.len() as f64;
        let mean = self.samples.iter().map(|s| f64::from(*s)).sum::<f64>() / n;
        let variance = self
            .samples
            .iter()
            .map(|s| (f64::from(*s) - mean).powi(2))
            .sum::<f64>()
            / n;
        variance.sqrt()
    }

    fn push_sample(&mut self, sample: i32) {
        if self.samples.len() == self.history_capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn push_risk_delta(&mut self, delta: f64) {
        if self.risk_deltas.len() == self.history_capacity {
            self.risk_deltas.pop_front();
        }
        self.risk_deltas.push_back(delta);
    }

    fn reset(&mut self, now: f64) {
        self.cumulative_risk = 0.0;
        self.samples.clear();
        self.risk_deltas.clear();
        self.last_adjustment = Some(now);
    }

    pub fn cumulative_risk(&self) -> f64 {
        self.cumulative_risk
    }

    /// Value handed out for this phase until the next cut or restore
    pub fn settled(&self) -> i32 {
        self.settled
    }

    pub fn max_limit(&self) -> i32 {
        self.max_limit
    }

    pub fn history_len(&self) -> usize {
        self.samples.len()
    }

    pub fn last_adjustment(&self) -> Option<f64> {
        self.last_adjustment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(max_limit: i32) -> PhaseRiskMonitor {
        PhaseRiskMonitor::new(&BalancerConfig::default(), max_limit)
    }

    #[test]
    fn rate_steps_with_overcurrent() {
        assert_eq!(trip_risk_rate(60.0, 0.10), 1.0);
        assert_eq!(trip_risk_rate(60.0, 0.13), 1.0);
        assert_eq!(trip_risk_rate(60.0, 0.30), 2.0);
        assert_eq!(trip_risk_rate(60.0, 0.90), 6.0);
        assert_eq!(trip_risk_rate(60.0, 1.50), 60.0);
    }

    #[test]
    fn first_sample_accrues_nothing() {
        let mut m = monitor(32);
        assert_eq!(m.update(-5, 1000.0), PhaseAction::Hold);
        assert_eq!(m.cumulative_risk(), 0.0);
        assert_eq!(m.last_adjustment(), Some(1000.0));
    }

    #[test]
    fn sustained_overcurrent_cuts_and_resets() {
        let mut m = monitor(32);
        m.update(-5, 0.0);
        // 5/32 sits in the second step: 2 per second, 30 s to trip
        assert_eq!(m.update(-5, 10.0), PhaseAction::Hold);
        assert_eq!(m.cumulative_risk(), 20.0);
        assert_eq!(m.update(-5, 30.0), PhaseAction::Cut(-5));
        assert_eq!(m.cumulative_risk(), 0.0);
        assert_eq!(m.settled(), -5);
        assert_eq!(m.history_len(), 0);
    }

    #[test]
    fn zero_max_limit_uses_full_rate() {
        let mut m = monitor(0);
        m.update(-1, 0.0);
        assert_eq!(m.update(-1, 1.0), PhaseAction::Cut(-1));
    }

    #[test]
    fn decay_floors_at_zero() {
        let mut m = monitor(32);
        m.update(-5, 0.0);
        m.update(-5, 5.0);
        assert_eq!(m.cumulative_risk(), 10.0);
        m.update(3, 500.0);
        assert_eq!(m.cumulative_risk(), 0.0);
    }

    #[test]
    fn restore_uses_median_capped_at_max() {
        let mut m = monitor(10);
        for t in 0..=900 {
            let action = m.update(14, f64::from(t));
            if t < 900 {
                assert_eq!(action, PhaseAction::Hold);
            } else {
                assert_eq!(action, PhaseAction::Restore(10));
            }
        }
        assert_eq!(m.settled(), 10);
        assert_eq!(m.history_len(), 0);
    }

    #[test]
    fn unstable_headroom_defers_restore() {
        let mut m = monitor(32);
        for t in 0..=900 {
            let sample = if t % 2 == 0 { 2 } else { 12 };
            assert_eq!(m.update(sample, f64::from(t)), PhaseAction::Hold);
        }
    }
}
