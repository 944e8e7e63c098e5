//! Power allocation across chargers
//!
//! The allocator maps the per-phase signal of a balancer onto concrete
//! per-charger setpoints. Cuts and increases are shared in proportion to what
//! each charger draws or still wants. Nothing here talks to hardware: the
//! result is a set of commands the coordinator applies.

use crate::charger::Charger;
use crate::logging::{StructuredLogger, get_logger};
use crate::phase::{Phase, PhaseValues};
use std::collections::BTreeMap;
use std::sync::Arc;

mod state;

pub use state::ChargerAllocationState;
use state::limits_match;

/// New setpoints keyed by charger id
pub type AllocationResult = BTreeMap<String, PhaseValues<i32>>;

/// Distributes headroom and cuts over the registered chargers
pub struct PowerAllocator {
    chargers: BTreeMap<String, ChargerAllocationState>,
    logger: StructuredLogger,
}

impl Default for PowerAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerAllocator {
    pub fn new() -> Self {
        Self {
            chargers: BTreeMap::new(),
            logger: get_logger("allocator"),
        }
    }

    /// Register a charger. Refused for a duplicate id or when the charger
    /// cannot report its current limit.
    pub fn add_charger(&mut self, id: &str, charger: Arc<dyn Charger>) -> bool {
        if self.chargers.contains_key(id) {
            self.logger
                .warn(&format!("Charger {} already exists in allocator", id));
            return false;
        }
        let Some(state) = ChargerAllocationState::initialize(charger) else {
            return false;
        };
        self.chargers.insert(id.to_string(), state);
        self.logger.info(&format!("Added charger {}", id));
        true
    }

    pub fn remove_charger(&mut self, id: &str) -> bool {
        if self.chargers.remove(id).is_some() {
            self.logger.info(&format!("Removed charger {}", id));
            true
        } else {
            false
        }
    }

    /// At least one registered charger can take charge
    pub fn should_monitor(&self) -> bool {
        self.chargers.values().any(|s| s.charger().can_charge())
    }

    pub fn charger_state(&self, id: &str) -> Option<&ChargerAllocationState> {
        self.chargers.get(id)
    }

    pub fn len(&self) -> usize {
        self.chargers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chargers.is_empty()
    }

    /// Compare every active charger's reported limit with what was last
    /// commanded; returns the ids whose limit was changed by someone else.
    pub fn detect_manual_overrides(&mut self) -> Vec<String> {
        let mut overridden = Vec::new();
        for (id, state) in self.chargers.iter_mut() {
            if !state.charger().can_charge() {
                continue;
            }
            let Some(limits) = state.charger().get_current_limit() else {
                continue;
            };
            if state.detect_manual_override(&limits) {
                overridden.push(id.clone());
            }
        }
        overridden
    }

    /// Record that a setpoint was written to the charger
    pub fn update_applied_current(&mut self, id: &str, limits: PhaseValues<i32>, now: f64) -> bool {
        match self.chargers.get_mut(id) {
            Some(state) => {
                state.record_applied(limits, now);
                true
            }
            None => false,
        }
    }

    /// Compute setpoints for every active charger; only real changes are returned
    pub fn update_allocation(
        &mut self,
        available_currents: &PhaseValues<i32>,
        now: f64,
    ) -> AllocationResult {
        let mut reported: BTreeMap<String, PhaseValues<i32>> = BTreeMap::new();
        for (id, state) in self.chargers.iter_mut() {
            if !state.charger().can_charge() {
                continue;
            }
            let Some(limits) = state.charger().get_current_limit() else {
                self.logger
                    .debug(&format!("Charger {} reported no current limit, skipping", id));
                continue;
            };
            state.detect_manual_override(&limits);
            reported.insert(id.clone(), limits);
        }
        if reported.is_empty() {
            return AllocationResult::new();
        }

        let mut proposals: AllocationResult = BTreeMap::new();
        for (phase, available) in available_currents.iter() {
            if *available < 0 {
                self.distribute_cuts(phase, *available, &reported, &mut proposals);
            } else if *available > 0 {
                self.distribute_increases(phase, *available, &reported, &mut proposals);
            }
        }

        let mut result = AllocationResult::new();
        for (id, proposal) in proposals {
            let (Some(state), Some(current)) = (self.chargers.get_mut(&id), reported.get(&id)) else {
                continue;
            };
            let synced = state.charger().has_synced_phase_limits();
            if limits_match(synced, &proposal, current) {
                continue;
            }
            if state.has_pending_command() && limits_match(synced, &proposal, &state.last_set_current()) {
                self.logger
                    .debug(&format!("Charger {} already commanded to {}", id, proposal));
                continue;
            }
            state.record_command(proposal, now);
            self.logger
                .debug(&format!("New allocation for charger {}: {}", id, proposal));
            result.insert(id, proposal);
        }
        result
    }

    /// Share a deficit over the chargers drawing on `phase`.
    ///
    /// Shares are proportional to each charger's current; whole-amp cuts are
    /// handed out by largest remainder so they add up to the deficit exactly.
    fn distribute_cuts(
        &self,
        phase: Phase,
        deficit: i32,
        reported: &BTreeMap<String, PhaseValues<i32>>,
        proposals: &mut AllocationResult,
    ) {
        let drawing: Vec<(&String, i64)> = reported
            .iter()
            .filter_map(|(id, limits)| limits.value(phase).map(|c| (id, i64::from(c.max(0)))))
            .collect();
        let total: i64 = drawing.iter().map(|(_, c)| c).sum();
        if total == 0 {
            return;
        }

        let magnitude = i64::from(deficit.unsigned_abs());
        let mut shares: Vec<(&String, i64, i64)> = drawing
            .iter()
            .map(|(id, current)| {
                let exact = magnitude * current;
                (*id, exact / total, exact % total)
            })
            .collect();

        let distributed: i64 = shares.iter().map(|(_, cut, _)| cut).sum();
        let mut residual = magnitude - distributed;
        let mut order: Vec<usize> = (0..shares.len()).collect();
        order.sort_by(|a, b| shares[*b].2.cmp(&shares[*a].2));
        for idx in order {
            if residual == 0 {
                break;
            }
            if shares[idx].2 > 0 {
                shares[idx].1 += 1;
                residual -= 1;
            }
        }

        for (id, cut, _) in shares {
            let current = reported[id].value(phase).unwrap_or(0);
            let new_value = (i64::from(current) - cut).max(0) as i32;
            proposals
                .entry(id.clone())
                .or_insert(reported[id])
                .set(phase, new_value);
        }
    }

    /// Share a surplus over the chargers that want more on `phase`, never
    /// beyond a charger's requested current.
    fn distribute_increases(
        &self,
        phase: Phase,
        surplus: i32,
        reported: &BTreeMap<String, PhaseValues<i32>>,
        proposals: &mut AllocationResult,
    ) {
        let wanting: Vec<(&String, i32, i64)> = reported
            .iter()
            .filter_map(|(id, limits)| {
                let current = limits.value(phase)?;
                let requested = self.chargers.get(id)?.requested_current().value(phase)?;
                (requested > current).then(|| (id, current, i64::from(requested - current)))
            })
            .collect();
        let total_potential: i64 = wanting.iter().map(|(_, _, p)| p).sum();
        if total_potential == 0 {
            return;
        }

        let surplus = i64::from(surplus);
        for (id, current, potential) in wanting {
            let increase = (surplus * potential / total_potential).min(potential);
            proposals
                .entry(id.clone())
                .or_insert(reported[id])
                .set(phase, current + increase as i32);
        }
    }
}
