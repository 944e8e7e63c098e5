use super::risk::{PhaseAction, PhaseRiskMonitor};
use super::Balancer;
use crate::config::BalancerConfig;
use crate::error::Result;
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::phase::{Phase, PhaseValues};

/// Risk-accumulating balancer with one `PhaseRiskMonitor` per phase.
///
/// Short overcurrent spikes are tolerated until the accumulated trip risk
/// crosses the threshold; headroom is only handed back after a quiet hold-off
/// period with stable samples.
pub struct LoadBalancingController {
    monitors: PhaseValues<PhaseRiskMonitor>,
    adjustments: u64,
    adjusted: Vec<Phase>,
    logger: StructuredLogger,
}

impl LoadBalancingController {
    /// Create a controller monitoring every phase present in `max_limits`
    pub fn new(config: &BalancerConfig, max_limits: PhaseValues<i32>) -> Result<Self> {
        config.validate()?;
        let monitors = max_limits
            .iter()
            .map(|(phase, max)| (phase, PhaseRiskMonitor::new(config, *max)))
            .collect();
        Ok(Self {
            monitors,
            adjustments: 0,
            adjusted: Vec::new(),
            logger: get_logger_with_context(
                LogContext::new("balancer").with_field("kind", "optimised".to_string()),
            ),
        })
    }

    pub fn monitor(&self, phase: Phase) -> Option<&PhaseRiskMonitor> {
        self.monitors.get(phase)
    }
}

impl Balancer for LoadBalancingController {
    fn compute_availability(
        &mut self,
        available_currents: &PhaseValues<i32>,
        now: f64,
    ) -> PhaseValues<i32> {
        let mut out = PhaseValues::new();
        self.adjusted.clear();
        for (phase, available) in available_currents.iter() {
            let Some(monitor) = self.monitors.get_mut(phase) else {
                continue;
            };
            match monitor.update(*available, now) {
                PhaseAction::Cut(amps) => {
                    self.adjustments += 1;
                    self.adjusted.push(phase);
                    self.logger.for_phase(phase).info(&format!(
                        "Trip risk threshold reached, cutting {} A",
                        -amps
                    ));
                }
                PhaseAction::Restore(amps) => {
                    self.adjustments += 1;
                    self.adjusted.push(phase);
                    self.logger
                        .for_phase(phase)
                        .info(&format!("Stable headroom, offering {} A", amps));
                }
                PhaseAction::Hold => {
                    if *available < 0 {
                        self.logger.for_phase(phase).debug(&format!(
                            "Overcurrent of {} A, risk {:.1}",
                            -available,
                            monitor.cumulative_risk()
                        ));
                    }
                }
            }
            out.set(phase, monitor.settled());
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
        "optimised"
    }
}
