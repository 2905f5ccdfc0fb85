//! Reachability probe for the serial devices of the bench.
//!
//! USB identification and the wire protocols are handled outside this
//! workspace; the probe only answers "is the port there" per device so the
//! core can decide on simulation mode at setup time.
use std::path::PathBuf;

use bench_traits::{DeviceHandles, DeviceProvider, DeviceResult};

use crate::error::HwError;

/// Device names used in reachability reports.
pub const THERMO_HYGROMETER: &str = "thermo-hygrometer";
pub const FLOW_CONTROLLER: &str = "flow-controller";
pub const HEATER: &str = "heater";

#[derive(Debug, Clone, Default)]
pub struct PortProbe {
    pub thermo_port: Option<PathBuf>,
    pub flow_port: Option<PathBuf>,
    pub heater_port: Option<PathBuf>,
}

/// Per-device reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reachability {
    pub thermo: bool,
    pub flow: bool,
    pub heater: bool,
}

impl Reachability {
    pub fn all(&self) -> bool {
        self.thermo && self.flow && self.heater
    }

    pub fn missing(&self) -> Vec<String> {
        [
            (self.thermo, THERMO_HYGROMETER),
            (self.flow, FLOW_CONTROLLER),
            (self.heater, HEATER),
        ]
        .into_iter()
        .filter(|(ok, _)| !ok)
        .map(|(_, name)| name.to_string())
        .collect()
    }
}

impl PortProbe {
    pub fn reachability(&self) -> Reachability {
        let present = |p: &Option<PathBuf>| p.as_ref().is_some_and(|p| p.exists());
        Reachability {
            thermo: present(&self.thermo_port),
            flow: present(&self.flow_port),
            heater: present(&self.heater_port),
        }
    }
}

impl DeviceProvider for PortProbe {
    fn open_devices(&mut self) -> DeviceResult<DeviceHandles> {
        let reach = self.reachability();
        tracing::debug!(
            thermo = reach.thermo,
            flow = reach.flow,
            heater = reach.heater,
            "device probe"
        );
        if !reach.all() {
            return Err(Box::new(HwError::Unavailable {
                missing: reach.missing(),
            }));
        }
        Err(Box::new(HwError::DriverMissing(format!(
            "{THERMO_HYGROMETER}, {FLOW_CONTROLLER}, {HEATER}"
        ))))
    }
}
