//! Collaborator interfaces consumed by the bench control core.
//!
//! Drivers (serial transceive, flow-controller commands, PWM I/O box) live
//! outside the core and are reached only through these traits. Errors cross
//! the boundary as `Box<dyn Error + Send + Sync>`; the core maps them to its
//! own typed errors.
pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

use std::time::Duration;

/// Boxed error used at every device trait boundary.
pub type DeviceError = Box<dyn std::error::Error + Send + Sync>;
pub type DeviceResult<T> = Result<T, DeviceError>;

/// One transaction with the dual temperature/humidity bridge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DualReading {
    /// °C, upstream sensor
    pub temperature_1: f64,
    /// % RH, upstream sensor
    pub humidity_1: f64,
    /// °C, downstream sensor
    pub temperature_2: f64,
    /// % RH, downstream sensor
    pub humidity_2: f64,
}

/// Two temperature/humidity sensors behind one bridge.
pub trait ThermoHygrometer {
    /// Blocking read of both channels; implementations must give up after `timeout`.
    fn read_dual(&mut self, timeout: Duration) -> DeviceResult<DualReading>;
}

/// Mass-flow controller: reports measured flow and accepts a flow setpoint.
pub trait FlowController {
    /// Measured flow in standard liters per minute.
    fn read_flow(&mut self, timeout: Duration) -> DeviceResult<f64>;
    /// Command a new flow setpoint in standard liters per minute.
    fn set_flow(&mut self, slm: f64, timeout: Duration) -> DeviceResult<()>;
}

/// PWM heater output.
///
/// `raw` is already scaled to the device's native duty register; the core
/// converts its normalized 0..1 duty before calling.
pub trait Heater {
    fn write_duty(&mut self, raw: u32, timeout: Duration) -> DeviceResult<()>;
}

/// Everything the control core needs from the hardware side.
pub struct DeviceHandles {
    pub thermo: Box<dyn ThermoHygrometer + Send>,
    pub flow: Box<dyn FlowController + Send>,
    pub heater: Box<dyn Heater + Send>,
}

impl core::fmt::Debug for DeviceHandles {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceHandles").finish_non_exhaustive()
    }
}

/// Opens the bench devices. A failure naming unreachable devices is the
/// trigger for setup-time simulation mode.
pub trait DeviceProvider {
    fn open_devices(&mut self) -> DeviceResult<DeviceHandles>;
}
