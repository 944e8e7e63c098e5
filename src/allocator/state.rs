use crate::charger::Charger;
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::phase::PhaseValues;
use std::sync::Arc;

/// Compare two limits the way the charger applies them: synced chargers only
/// honour the lowest phase, so only that value matters.
pub(crate) fn limits_match(synced: bool, a: &PhaseValues<i32>, b: &PhaseValues<i32>) -> bool {
    if synced {
        a.min_value() == b.min_value()
    } else {
        a == b
    }
}

/// Allocation bookkeeping for one registered charger
pub struct ChargerAllocationState {
    charger: Arc<dyn Charger>,
    requested_current: PhaseValues<i32>,
    last_set_current: PhaseValues<i32>,
    last_applied_current: PhaseValues<i32>,
    last_update_time: f64,
    manual_override_detected: bool,
    logger: StructuredLogger,
}

impl ChargerAllocationState {
    /// Seed the state from the charger's reported limit; `None` when the
    /// charger cannot report one.
    pub fn initialize(charger: Arc<dyn Charger>) -> Option<Self> {
        let logger =
            get_logger_with_context(LogContext::new("allocator").with_charger_id(charger.id().to_string()));
        let Some(limits) = charger.get_current_limit() else {
            logger.warn("Could not initialize charger, no current limit available");
            return None;
        };
        logger.info(&format!("Charger initialized with limits: {}", limits));
        Some(Self {
            charger,
            requested_current: limits,
            last_set_current: limits,
            last_applied_current: limits,
            last_update_time: 0.0,
            manual_override_detected: false,
            logger,
        })
    }

    pub fn charger(&self) -> &Arc<dyn Charger> {
        &self.charger
    }

    /// Ceiling used when handing headroom back
    pub fn requested_current(&self) -> PhaseValues<i32> {
        self.requested_current
    }

    /// Last limit commanded by the allocator
    pub fn last_set_current(&self) -> PhaseValues<i32> {
        self.last_set_current
    }

    /// Last limit confirmed on the hardware
    pub fn last_applied_current(&self) -> PhaseValues<i32> {
        self.last_applied_current
    }

    pub fn last_update_time(&self) -> f64 {
        self.last_update_time
    }

    pub fn manual_override_detected(&self) -> bool {
        self.manual_override_detected
    }

    /// A command that has not been confirmed yet
    pub(crate) fn has_pending_command(&self) -> bool {
        self.last_set_current != self.last_applied_current
    }

    /// Check the reported limit against what the allocator knows about.
    ///
    /// A reported value equal to the last command means the command landed.
    /// Anything else was set out-of-band and becomes the new requested ceiling.
    pub(crate) fn detect_manual_override(&mut self, reported: &PhaseValues<i32>) -> bool {
        let synced = self.charger.has_synced_phase_limits();
        if limits_match(synced, reported, &self.last_applied_current) {
            return false;
        }
        if limits_match(synced, reported, &self.last_set_current) {
            self.last_applied_current = *reported;
            return false;
        }

        self.requested_current = *reported;
        self.last_set_current = *reported;
        self.last_applied_current = *reported;
        self.manual_override_detected = true;
        self.logger.info(&format!(
            "Manual override detected. New requested current: {}",
            reported
        ));
        true
    }

    pub(crate) fn record_command(&mut self, limits: PhaseValues<i32>, now: f64) {
        self.last_set_current = limits;
        self.last_update_time = now;
        self.manual_override_detected = false;
    }

    pub(crate) fn record_applied(&mut self, limits: PhaseValues<i32>, now: f64) {
        self.last_applied_current = limits;
        self.last_set_current = limits;
        self.last_update_time = now;
    }
}

impl std::fmt::Debug for ChargerAllocationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChargerAllocationState")
            .field("charger", &self.charger.id())
            .field("requested_current", &self.requested_current)
            .field("last_set_current", &self.last_set_current)
            .field("last_applied_current", &self.last_applied_current)
            .field("last_update_time", &self.last_update_time)
            .field("manual_override_detected", &self.manual_override_detected)
            .finish()
    }
}
