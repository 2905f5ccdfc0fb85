//! Human-readable error descriptions and structured JSON error formatting.

use bench_core::error::{BenchError, BuildError, ConfigError};

/// Exit codes; clap itself exits with 2 on usage errors.
pub mod exit {
    pub const FAILURE: i32 = 1;
    pub const CONFIG: i32 = 3;
    pub const DEVICE_UNAVAILABLE: i32 = 4;
    pub const DEVICE: i32 = 5;
    pub const REJECTED: i32 = 6;
}

fn is_config_load_error(lower: &str) -> bool {
    lower.contains("read config")
        || lower.contains("parse config")
        || lower.contains("invalid configuration")
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingProvider => {
                "What happened: No device provider was given to the bench setup.\nLikely causes: The CLI was built without a probe or the builder was misused.\nHow to fix: Report this as a bug.".to_string()
            }
            BuildError::MissingFallback => {
                "What happened: Simulation was requested but no simulated bench is available.\nLikely causes: hardware.simulate = true without a fallback provider.\nHow to fix: Report this as a bug.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun (`flowbench print-config` shows the effective values)."
            ),
        };
    }

    if let Some(de) = err.downcast_ref::<BenchError>() {
        return match de {
            BenchError::DeviceUnavailable(why) => format!(
                "What happened: Bench devices are unavailable ({why}).\nLikely causes: USB cables unplugged, wrong [hardware] ports, or missing permissions on the serial devices.\nHow to fix: Check the ports with `flowbench self-check`, or pass --simulate to run without hardware."
            ),
            BenchError::Timeout => {
                "What happened: A device did not answer in time.\nLikely causes: Serial link stalled or sampling.sensor_timeout_ms too low.\nHow to fix: Check the cabling, or raise sampling.sensor_timeout_ms (it must stay below sampling.period_ms).".to_string()
            }
            BenchError::Config(ConfigError::InvalidSetpoint { value, max }) => format!(
                "What happened: Setpoint {value} °C rejected.\nLikely causes: Outside [0, {max}] °C.\nHow to fix: Pick a smaller --setpoint or raise controller.max_target_delta_t_c."
            ),
            BenchError::Config(ConfigError::InvalidFlow { value, max }) => format!(
                "What happened: Flow setpoint {value} SLM rejected.\nLikely causes: Outside [0, {max}] SLM.\nHow to fix: Pick a smaller --flow or raise flow.max_slm."
            ),
            BenchError::Config(ConfigError::InvalidDuty(d)) => format!(
                "What happened: Duty {d} rejected.\nLikely causes: --duty is a fraction, not a percentage.\nHow to fix: Pass a value within 0..=1 (e.g. 0.25 for 25 %)."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // Config loading errors are plain eyre chains naming the offending key.
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();
    if lower.contains("read config") {
        return format!(
            "What happened: Could not read the config file.\nLikely causes: Wrong --config path.\nHow to fix: Point --config at an existing TOML file (default etc/flowbench.toml). Original: {msg}"
        );
    }
    if is_config_load_error(&lower) {
        return format!(
            "What happened: Configuration is invalid.\nLikely causes: {msg}\nHow to fix: Edit the TOML config and try again."
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error class.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<BuildError>().is_some() {
        return exit::CONFIG;
    }
    if let Some(de) = err.downcast_ref::<BenchError>() {
        return match de {
            BenchError::DeviceUnavailable(_) => exit::DEVICE_UNAVAILABLE,
            BenchError::Device(_) | BenchError::Timeout => exit::DEVICE,
            BenchError::Config(_) | BenchError::InvalidTransition { .. } => exit::REJECTED,
            _ => exit::FAILURE,
        };
    }
    if is_config_load_error(&format!("{err:#}").to_ascii_lowercase()) {
        return exit::CONFIG;
    }
    exit::FAILURE
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingProvider => "MissingProvider",
            BuildError::MissingFallback => "MissingFallback",
            BuildError::InvalidConfig(_) => "InvalidConfig",
        };
    }
    match err.downcast_ref::<BenchError>() {
        Some(BenchError::Config(c)) => match c {
            ConfigError::InvalidGain { .. } => "InvalidGain",
            ConfigError::InvalidControllerParameter { .. } => "InvalidControllerParameter",
            ConfigError::InvalidSetpoint { .. } => "InvalidSetpoint",
            ConfigError::InvalidDuty(_) => "InvalidDuty",
            ConfigError::InvalidFlow { .. } => "InvalidFlow",
            ConfigError::CalibrationRejected { .. } => "CalibrationRejected",
        },
        Some(BenchError::DeviceUnavailable(_)) => "DeviceUnavailable",
        Some(BenchError::Device(_)) => "Device",
        Some(BenchError::Timeout) => "Timeout",
        Some(BenchError::InvalidTransition { .. }) => "InvalidTransition",
        Some(_) => "Error",
        None if exit_code_for_error(err) == exit::CONFIG => "InvalidConfig",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;
    json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(eyre::Report::new(BuildError::InvalidConfig("x")), exit::CONFIG)]
    #[case(eyre::Report::new(BenchError::DeviceUnavailable("heater".into())), exit::DEVICE_UNAVAILABLE)]
    #[case(eyre::Report::new(BenchError::Timeout), exit::DEVICE)]
    #[case(eyre::Report::new(BenchError::from(ConfigError::InvalidDuty(2.0))), exit::REJECTED)]
    #[case(eyre::eyre!("sampling.period_ms must be > 0").wrap_err("invalid configuration in a.toml"), exit::CONFIG)]
    #[case(eyre::eyre!("boom"), exit::FAILURE)]
    fn exit_codes(#[case] err: eyre::Report, #[case] code: i32) {
        assert_eq!(exit_code_for_error(&err), code);
    }

    #[test]
    fn wrapped_errors_keep_their_type() {
        let err = eyre::Report::new(BenchError::Device("crc".into())).wrap_err("open devices");
        assert_eq!(exit_code_for_error(&err), exit::DEVICE);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "Device");
        assert_eq!(v["exit_code"], exit::DEVICE);
    }

    #[test]
    fn setpoint_message_names_the_range() {
        let err = eyre::Report::new(BenchError::from(ConfigError::InvalidSetpoint {
            value: 45.0,
            max: 30.0,
        }));
        let text = humanize(&err);
        assert!(text.contains("45"));
        assert!(text.contains("[0, 30]"));
    }
}
