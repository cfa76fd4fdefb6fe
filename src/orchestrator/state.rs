//! Build progress state machine.
//!
//! Tracks the current phase and percentage of one build and decides which
//! proposed transitions are reported:
//! - main phases only move forward by stage; package phases share a stage
//!   and may alternate while packages resolve
//! - compiling may repeat whenever its percentage rises
//! - succeeded/failed are reachable from anywhere and idempotent
//! - device phases are advisory and never move the main progression
//! - the reported percentage never decreases

use crate::models::BuildPhase;

/// Lower and upper bounds of the compile percentage band.
pub const COMPILE_FLOOR: u8 = 35;
pub const COMPILE_CEILING: u8 = 85;
/// Reported while compiling when the total unit count is unknown.
pub const COMPILE_MIDPOINT: u8 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTracker {
    phase: BuildPhase,
    percent: u8,
    last_device_phase: Option<BuildPhase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        PhaseTracker {
            phase: BuildPhase::Preparing,
            percent: BuildPhase::Preparing.base_percent(),
            last_device_phase: None,
        }
    }
}

impl PhaseTracker {
    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Propose a transition. Returns the phase and percentage to report,
    /// or `None` when the proposal is not a reportable change.
    pub fn advance(&mut self, next: BuildPhase, percent: u8) -> Option<(BuildPhase, u8)> {
        if next.is_terminal() {
            if self.phase == next {
                return None;
            }
            self.phase = next;
            self.percent = 100;
            self.last_device_phase = None;
            return Some((next, 100));
        }

        if self.phase.is_terminal() {
            return None;
        }

        if next.is_device_phase() {
            if self.last_device_phase == Some(next) {
                return None;
            }
            self.last_device_phase = Some(next);
            return Some((next, self.percent));
        }

        let (current_stage, next_stage) = match (self.phase.stage(), next.stage()) {
            (Some(current), Some(proposed)) => (current, proposed),
            _ => return None,
        };
        let percent = percent.min(99).max(self.percent);

        let reportable = if next_stage > current_stage {
            true
        } else if next_stage == current_stage {
            match next {
                BuildPhase::Compiling => percent > self.percent,
                _ if next_stage == 1 => next != self.phase,
                _ => false,
            }
        } else {
            false
        };
        if !reportable {
            return None;
        }

        self.phase = next;
        self.percent = percent;
        self.last_device_phase = None;
        Some((next, percent))
    }
}

/// Percentage for `compiled` of `total` units within the compile band.
pub fn compile_percent(compiled: usize, total: Option<usize>) -> u8 {
    match total {
        Some(total) if total > 0 => {
            let ratio = (compiled.min(total) as f64) / (total as f64);
            let span = f64::from(COMPILE_CEILING - COMPILE_FLOOR);
            COMPILE_FLOOR + (ratio * span).round() as u8
        }
        _ => COMPILE_MIDPOINT,
    }
}
