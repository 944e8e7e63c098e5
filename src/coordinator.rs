//! Control cycle orchestration
//!
//! The coordinator owns every collaborator of one installation: the meter,
//! the registered chargers (through the allocator), the balancer and the
//! write throttle. Each cycle reads the meter, derives the headroom under the
//! fuse, lets the balancer decide and, when it acted, lets the allocator turn
//! the decision into setpoints. Hardware writes happen in a separate async
//! step so planning stays synchronous.
//!
//! A restore hands the allocator a one-shot headroom grant for its phase. The
//! grant survives until a command spends it or the phase goes over the fuse
//! again, so chargers with synced phases can climb once every phase they draw
//! on has been released.

use crate::allocator::{AllocationResult, PowerAllocator};
use crate::balancer::{Balancer, build_balancer};
use crate::charger::Charger;
use crate::config::Config;
use crate::error::{BalancerError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger, get_logger_with_context};
use crate::meter::{Meter, available_current};
use crate::phase::{Phase, PhaseValues};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Duration, interval};

/// Event action emitted after a charger received new limits
pub const EVENT_ACTION_NEW_CHARGER_LIMITS: &str = "new_charger_limits";

/// What the coordinator is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingState {
    /// No registered charger can take charge
    AwaitingCharger,
    /// At least one charger is charging or ready to
    MonitoringLoad,
}

impl fmt::Display for LoadBalancingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadBalancingState::AwaitingCharger => write!(f, "awaiting_charger"),
            LoadBalancingState::MonitoringLoad => write!(f, "monitoring_loads"),
        }
    }
}

/// Result of planning one cycle
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    /// Headroom per phase, `None` when the meter could not be read
    pub available: Option<PhaseValues<i32>>,
    /// Balancer signal, `None` when the balancer did not run
    pub signal: Option<PhaseValues<i32>>,
    /// Whether the balancer issued a cut or restore this cycle
    pub adjusted: bool,
    /// Setpoints released for writing now
    pub commands: AllocationResult,
}

/// Owner of the control cycle for one fuse
pub struct Coordinator {
    config: Config,
    phases: Vec<Phase>,
    meter: Arc<dyn Meter>,
    balancer: Box<dyn Balancer>,
    allocator: PowerAllocator,
    pending: AllocationResult,
    headroom_grants: PhaseValues<i32>,
    last_charger_update: Option<f64>,
    last_check: Option<DateTime<Utc>>,
    events_tx: broadcast::Sender<String>,
    logger: StructuredLogger,
}

impl Coordinator {
    pub fn new(config: Config, meter: Arc<dyn Meter>) -> Result<Self> {
        config.validate()?;
        let phases = config.fuse.phases();
        let ceiling = config.fuse.ceiling().floor() as i32;
        let balancer = build_balancer(
            &config.balancer,
            PhaseValues::uniform(phases.iter().copied(), ceiling),
        )?;
        let logger = get_logger("coordinator");
        logger.info(&format!(
            "Coordinator ready: {} balancer, {} phase(s), ceiling {} A",
            balancer.name(),
            phases.len(),
            config.fuse.ceiling()
        ));

        let (events_tx, _) = broadcast::channel::<String>(100);
        Ok(Self {
            config,
            phases,
            meter,
            balancer,
            allocator: PowerAllocator::new(),
            pending: AllocationResult::new(),
            headroom_grants: PhaseValues::new(),
            last_charger_update: None,
            last_check: None,
            events_tx,
            logger,
        })
    }

    /// Register a charger under its own id
    pub fn add_charger(&mut self, charger: Arc<dyn Charger>) -> Result<()> {
        let id = charger.id().to_string();
        if self.allocator.add_charger(&id, charger) {
            Ok(())
        } else {
            Err(BalancerError::charger(format!(
                "Charger {} could not be registered",
                id
            )))
        }
    }

    pub fn remove_charger(&mut self, id: &str) -> bool {
        self.pending.remove(id);
        self.allocator.remove_charger(id)
    }

    pub fn allocator(&self) -> &PowerAllocator {
        &self.allocator
    }

    pub fn balancer(&self) -> &dyn Balancer {
        self.balancer.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> LoadBalancingState {
        if self.allocator.should_monitor() {
            LoadBalancingState::MonitoringLoad
        } else {
            LoadBalancingState::AwaitingCharger
        }
    }

    /// Wall-clock time of the last planned cycle
    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        self.last_check
    }

    /// Setpoints waiting for the write throttle
    pub fn pending_commands(&self) -> &AllocationResult {
        &self.pending
    }

    /// Restored headroom not yet spent by a command
    pub fn headroom_grants(&self) -> &PhaseValues<i32> {
        &self.headroom_grants
    }

    /// Receive a JSON line per charger write
    pub fn subscribe_events(&self) -> broadcast::Receiver<String> {
        self.events_tx.subscribe()
    }

    /// Headroom on a single phase
    pub fn available_current_for_phase(&self, phase: Phase) -> Option<i32> {
        self.meter
            .active_phase_current(phase)
            .map(|active| available_current(self.config.fuse.ceiling(), active))
    }

    /// Headroom on every configured phase; `None` if any reading is missing
    pub fn available_currents(&self) -> Option<PhaseValues<i32>> {
        let mut out = PhaseValues::new();
        for phase in &self.phases {
            out.set(*phase, self.available_current_for_phase(*phase)?);
        }
        Some(out)
    }

    fn may_update_chargers(&self, now: f64) -> bool {
        match self.last_charger_update {
            None => true,
            Some(last) => now - last >= self.config.coordinator.min_charger_update_delay_s,
        }
    }

    /// Decide what to write this cycle without touching the chargers
    pub fn plan_cycle(&mut self, now: f64) -> CycleOutcome {
        self.last_check = Some(Utc::now());
        let mut outcome = CycleOutcome::default();

        let Some(available) = self.available_currents() else {
            self.logger
                .warn("Available current unknown, cannot adjust limits");
            return outcome;
        };
        outcome.available = Some(available);

        if !self.allocator.should_monitor() {
            return outcome;
        }

        // A user's own limit wins over anything still waiting for the throttle
        for id in self.allocator.detect_manual_overrides() {
            if let Some(dropped) = self.pending.remove(&id) {
                get_logger_with_context(LogContext::new("coordinator").with_charger_id(id))
                    .info(&format!("Manual override, dropping held limits {}", dropped));
            }
        }

        let signal = self.balancer.compute_availability(&available, now);
        outcome.signal = Some(signal);

        let adjusted = self.balancer.adjusted_phases().to_vec();
        self.update_grants(&available, &signal, &adjusted);
        if !adjusted.is_empty() {
            outcome.adjusted = true;
            let input = self.allocator_input(&signal, &adjusted);
            let result = self.allocator.update_allocation(&input, now);
            if !result.is_empty() {
                self.headroom_grants = PhaseValues::new();
            }
            self.pending.extend(result);
        }

        if self.pending.is_empty() {
            return outcome;
        }
        if self.may_update_chargers(now) {
            outcome.commands = std::mem::take(&mut self.pending);
        } else {
            self.logger.debug(&format!(
                "Charger settings updated too recently, holding {} command(s)",
                self.pending.len()
            ));
        }
        outcome
    }

    fn update_grants(
        &mut self,
        available: &PhaseValues<i32>,
        signal: &PhaseValues<i32>,
        adjusted: &[Phase],
    ) {
        for (phase, amps) in available.iter() {
            if *amps < 0 && self.headroom_grants.remove(phase).is_some() {
                self.logger
                    .for_phase(phase)
                    .debug("Overcurrent, restored headroom revoked");
            }
        }
        for phase in adjusted {
            match signal.value(*phase) {
                Some(amps) if amps > 0 => {
                    self.headroom_grants.set(*phase, amps);
                }
                _ => {
                    self.headroom_grants.remove(*phase);
                }
            }
        }
    }

    /// Cuts only for phases cut this cycle, increases only from unspent grants
    fn allocator_input(&self, signal: &PhaseValues<i32>, adjusted: &[Phase]) -> PhaseValues<i32> {
        signal
            .iter()
            .map(|(phase, value)| {
                let amps = if *value < 0 && adjusted.contains(&phase) {
                    *value
                } else {
                    self.headroom_grants.value(phase).unwrap_or(0)
                };
                (phase, amps)
            })
            .collect()
    }

    /// Write setpoints to the chargers and confirm them with the allocator.
    ///
    /// Returns the number of successful writes. Failed writes are queued for
    /// the next permitted update unless a newer setpoint replaced them.
    pub async fn apply_commands(&mut self, commands: AllocationResult, now: f64) -> usize {
        let mut applied = 0;
        for (id, limits) in commands {
            let Some(charger) = self
                .allocator
                .charger_state(&id)
                .map(|state| Arc::clone(state.charger()))
            else {
                continue;
            };
            let logger = get_logger_with_context(
                LogContext::new("coordinator").with_charger_id(id.clone()),
            );

            match charger.set_current_limit(limits).await {
                Ok(()) => {
                    self.allocator.update_applied_current(&id, limits, now);
                    self.last_charger_update = Some(now);
                    self.emit_charger_event(&id, &limits);
                    logger.info(&format!("Applied new limits {}", limits));
                    applied += 1;
                }
                Err(e) => {
                    logger.error(&format!("Failed to apply limits {}: {}", limits, e));
                    self.pending.entry(id).or_insert(limits);
                }
            }
        }
        applied
    }

    fn emit_charger_event(&self, id: &str, limits: &PhaseValues<i32>) {
        let event = serde_json::json!({
            "action": EVENT_ACTION_NEW_CHARGER_LIMITS,
            "charger_id": id,
            "new_limits": limits,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let _ = self.events_tx.send(event.to_string());
    }

    /// Plan and apply one cycle
    pub async fn run_cycle(&mut self, now: f64) -> Result<CycleOutcome> {
        let outcome = self.plan_cycle(now);
        if !outcome.commands.is_empty() {
            self.apply_commands(outcome.commands.clone(), now).await;
        }
        Ok(outcome)
    }

    /// Drive cycles on the configured interval until a shutdown signal arrives
    pub async fn run(&mut self, mut shutdown_rx: mpsc::UnboundedReceiver<()>) -> Result<()> {
        self.logger.info("Starting load balancing loop");
        let mut cycle_interval =
            interval(Duration::from_millis(self.config.coordinator.cycle_interval_ms));

        loop {
            tokio::select! {
                _ = cycle_interval.tick() => {
                    if let Err(e) = self.run_cycle(unix_now()).await {
                        self.logger.error(&format!("Control cycle failed: {}", e));
                    }
                }
                _ = shutdown_rx.recv() => {
                    self.logger.info("Shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Seconds since the Unix epoch with millisecond resolution
pub fn unix_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
