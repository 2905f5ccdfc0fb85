#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Bench control core (hardware-agnostic).
//!
//! All hardware interactions go through the `bench_traits` device traits.
//!
//! ## Architecture
//!
//! - **Buffer**: bounded per-signal measurement history (`buffer`)
//! - **PID**: IIR-form PID with filtered derivative and clamping (`pid`)
//! - **Estimator**: mass flow from the heater energy balance (`flow`)
//! - **Interlocks**: low-flow / over-temperature heater cut-off (`safety`)
//! - **Mode**: five-state manual/PID selection and output enable (`mode`)
//! - **Scheduler**: fixed-period loop thread with overrun skipping (`scheduler`)
//! - **Acquisition**: sensor worker with bounded waits (`acquisition`)
//! - **Setup**: the orchestrator tying it together each cycle (`setup`)
//!
//! ```no_run
//! use bench_core::{BenchCfg, Setup};
//! use bench_hardware::SimulatedBench;
//!
//! # fn main() -> eyre::Result<()> {
//! let setup = Setup::builder()
//!     .with_config(BenchCfg { simulate: true, ..BenchCfg::default() })
//!     .with_fallback(SimulatedBench::default())
//!     .build()?;
//! setup.set_nominal_flow()?;
//! setup.start_pid_controller()?;
//! setup.set_setpoint(10.0)?;
//! setup.enable_output()?;
//! setup.start_measurement_loop()?;
//! // ...
//! setup.stop_measurement_loop()?;
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod buffer;
pub mod config;
pub mod conversions;
pub mod error;
pub mod flow;
pub mod frame;
pub mod hw_error;
pub mod mocks;
pub mod mode;
pub mod observer;
pub mod pid;
pub mod safety;
pub mod scheduler;
pub mod setup;
pub mod status;
pub mod util;

pub use buffer::MeasurementBuffer;
pub use config::BenchCfg;
pub use error::{BenchError, BenchResult, BuildError, ConfigError};
pub use frame::{SIGNALS, SensorFrame};
pub use mode::{Action, Mode};
pub use observer::{NoopObserver, Observer, TracingObserver};
pub use pid::{Discretization, Gains, PidController, PidOutput, PidSettings};
pub use safety::{Interlock, SafetyFault, SafetyLimits};
pub use setup::{Setup, SetupBuilder};
pub use status::{BenchStatus, CycleOutcome, Fault, FaultCounters};
