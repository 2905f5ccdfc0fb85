//! Operating mode of the bench and its transition table.
//!
//! ```text
//!            start_direct_power_setting          start_pid_controller
//!   Idle ───────────────────────────▶ ManualOff ◀──────────▶ PidOff ◀──── Idle
//!                                      │    ▲                 │   ▲
//!                        enable_output │    │ disable_output  │   │
//!                                      ▼    │                 ▼   │
//!                                     ManualOn               PidOn
//! ```
//!
//! Both `*Off` states return to `Idle`. No transition reaches an `*On`
//! state without passing through its `*Off` state.
use std::fmt;

use crate::error::{BenchError, BenchResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    #[default]
    Idle,
    ManualOff,
    ManualOn,
    PidOff,
    PidOn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    StartDirectPowerSetting,
    StartPidController,
    EnableOutput,
    DisableOutput,
    ReturnToIdle,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::ManualOff => "manual (output off)",
            Self::ManualOn => "manual (output on)",
            Self::PidOff => "pid (output off)",
            Self::PidOn => "pid (output on)",
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StartDirectPowerSetting => "start_direct_power_setting",
            Self::StartPidController => "start_pid_controller",
            Self::EnableOutput => "enable_output",
            Self::DisableOutput => "disable_output",
            Self::ReturnToIdle => "return_to_idle",
        })
    }
}

impl Mode {
    /// Next mode for `action`, or `InvalidTransition` leaving `self` as is.
    pub fn apply(self, action: Action) -> BenchResult<Mode> {
        use Action::*;
        use Mode::*;
        let next = match (self, action) {
            (Idle | PidOff, StartDirectPowerSetting) => ManualOff,
            (Idle | ManualOff, StartPidController) => PidOff,
            (ManualOff, EnableOutput) => ManualOn,
            (PidOff, EnableOutput) => PidOn,
            (ManualOn, DisableOutput) => ManualOff,
            (PidOn, DisableOutput) => PidOff,
            (ManualOff | PidOff, ReturnToIdle) => Idle,
            (from, action) => return Err(BenchError::InvalidTransition { from, action }),
        };
        Ok(next)
    }

    /// Same selection with the output disabled; used when the loop stops.
    pub fn with_output_disabled(self) -> Mode {
        match self {
            Mode::ManualOn => Mode::ManualOff,
            Mode::PidOn => Mode::PidOff,
            other => other,
        }
    }

    pub fn output_enabled(self) -> bool {
        matches!(self, Mode::ManualOn | Mode::PidOn)
    }

    pub fn is_pid(self) -> bool {
        matches!(self, Mode::PidOff | Mode::PidOn)
    }

    pub fn is_manual(self) -> bool {
        matches!(self, Mode::ManualOff | Mode::ManualOn)
    }
}
