use super::{Balancer, floored_median};
use crate::config::BalancerConfig;
use crate::error::{BalancerError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::phase::{Phase, PhaseValues};
use std::collections::VecDeque;

#[derive(Debug, Clone, Default)]
struct PhaseBuffer {
    max_limit: i32,
    samples: VecDeque<i32>,
    last_adjustment: Option<f64>,
    settled: i32,
}

/// Cuts immediately on overcurrent; releases headroom as the median of the
/// samples buffered over the hold-off period.
pub struct HysteresisBalancer {
    hold_off_period_s: f64,
    history_capacity: usize,
    phases: PhaseValues<PhaseBuffer>,
    adjustments: u64,
    adjusted: Vec<Phase>,
    logger: StructuredLogger,
}

impl HysteresisBalancer {
    pub fn new(config: &BalancerConfig, max_limits: PhaseValues<i32>) -> Result<Self> {
        if !config.hold_off_period_s.is_finite() || config.hold_off_period_s < 0.0 {
            return Err(BalancerError::validation(
                "balancer.hold_off_period_s",
                "Must be zero or positive",
            ));
        }
        if config.history_capacity == 0 {
            return Err(BalancerError::validation(
                "balancer.history_capacity",
                "Must be greater than 0",
            ));
        }

        let phases = max_limits
            .iter()
            .map(|(phase, max)| {
                (
                    phase,
                    PhaseBuffer {
                        max_limit: *max,
                        ..PhaseBuffer::default()
                    },
                )
            })
            .collect();

        Ok(Self {
            hold_off_period_s: config.hold_off_period_s,
            history_capacity: config.history_capacity,
            phases,
            adjustments: 0,
            adjusted: Vec::new(),
            logger: get_logger_with_context(
                LogContext::new("balancer").with_field("kind", "hysteresis".to_string()),
            ),
        })
    }

    fn update_phase(&mut self, phase: Phase, available: i32, now: f64) -> Option<i32> {
        let hold_off = self.hold_off_period_s;
        let capacity = self.history_capacity;
        let buffer = self.phases.get_mut(phase)?;
        let last_adjustment = *buffer.last_adjustment.get_or_insert(now);

        if available < 0 {
            buffer.samples.clear();
            buffer.last_adjustment = Some(now);
            buffer.settled = available;
            self.adjustments += 1;
            self.adjusted.push(phase);
            self.logger
                .for_phase(phase)
                .info(&format!("Overcurrent, cutting {} A", -available));
            return Some(buffer.settled);
        }

        if buffer.samples.len() == capacity {
            buffer.samples.pop_front();
        }
        buffer.samples.push_back(available);

        if now - last_adjustment >= hold_off
            && let Some(median) = floored_median(&buffer.samples)
        {
            buffer.settled = median.min(buffer.max_limit);
            buffer.samples.clear();
            buffer.last_adjustment = Some(now);
            self.adjustments += 1;
            self.adjusted.push(phase);
            self.logger.for_phase(phase).info(&format!(
                "Hysteresis period passed, offering {} A",
                buffer.settled
            ));
        }
        Some(buffer.settled)
    }
}

impl Balancer for HysteresisBalancer {
    fn compute_availability(
        &mut self,
        available_currents: &PhaseValues<i32>,
        now: f64,
    ) -> PhaseValues<i32> {
        let mut out = PhaseValues::new();
        self.adjusted.clear();
        for (phase, available) in available_currents.iter() {
            if let Some(value) = self.update_phase(phase, *available, now) {
                out.set(phase, value);
            }
        }
        out
    }

    fn adjustment_count(&self) -> u64 {
        self.adjustments
    }

    fn adjusted_phases(&self) -> &[Phase] {
        &self.adjusted
    }

    fn name(&self) -> &'static str {
        "hysteresis"
    }
}
