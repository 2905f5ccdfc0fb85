//! CLI argument definitions and shared statics.

use clap::{ArgAction, ArgGroup, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "flowbench", version, about = "Heated-flow bench controller")]
pub struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", default_value = "etc/flowbench.toml")]
    pub config: PathBuf,

    /// JSON lines on stdout (frames, summaries) and JSON logs on stderr
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Run on the simulated bench regardless of attached devices
    #[arg(long, action = ArgAction::SetTrue)]
    pub simulate: bool,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    #[inline]
    pub fn os_default() -> Self {
        if cfg!(target_os = "linux") {
            RtLock::Current
        } else {
            RtLock::None
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Heat the flow with a fixed duty or under PID control
    #[command(group(ArgGroup::new("control").required(true).args(["duty", "pid"])))]
    Run {
        /// Manual heater duty (0..=1)
        #[arg(long, value_name = "FRACTION")]
        duty: Option<f64>,
        /// Closed-loop control on the temperature difference
        #[arg(long, action = ArgAction::SetTrue, requires = "setpoint")]
        pid: bool,
        /// Target temperature difference for --pid (°C)
        #[arg(long, value_name = "DEG_C", requires = "pid")]
        setpoint: Option<f64>,
        /// Flow setpoint (SLM); defaults to flow.nominal_slm
        #[arg(long, value_name = "SLM")]
        flow: Option<f64>,
        /// Stop after this many seconds (default: run until Ctrl-C)
        #[arg(long = "duration-s", value_name = "SECONDS")]
        duration_s: Option<f64>,
        /// Write the measurement history to this CSV file on exit
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
        /// Enable real-time mode (SCHED_FIFO, affinity, mlockall)
        #[arg(
            long,
            action = ArgAction::SetTrue,
            long_help = "Enable real-time mode on Linux: SCHED_FIFO priority for the process (inherited by the control and acquisition threads), pinning to one CPU and mlockall. Needs CAP_SYS_NICE / CAP_IPC_LOCK or root; failures are reported as warnings and the run continues."
        )]
        rt: bool,
        /// Real-time priority for SCHED_FIFO (1..=max)
        #[arg(long, value_name = "PRIO")]
        rt_prio: Option<i32>,
        /// Memory locking mode for --rt: none, current, or all
        #[arg(long, value_enum, value_name = "MODE")]
        rt_lock: Option<RtLock>,
        /// CPU index to pin the process to with --rt (default 0)
        #[arg(long, value_name = "CPU")]
        rt_cpu: Option<usize>,
    },
    /// Probe the devices and run one control cycle
    SelfCheck,
    /// Print the effective configuration
    PrintConfig,
}
