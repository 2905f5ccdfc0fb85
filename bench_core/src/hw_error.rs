//! Maps `Box<dyn Error>` from trait boundaries to typed `BenchError`.
//!
//! The traits in `bench_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed error enum, with an optional
//! feature-gated path for `bench_hardware::HwError` downcasting.

use std::io::ErrorKind;

use crate::error::BenchError;

/// Map a trait-boundary error to a typed `BenchError`.
///
/// Attempts to downcast known error types first, then falls back to
/// string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> BenchError {
    #[cfg(feature = "hardware-errors")]
    {
        use bench_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Timeout => BenchError::Timeout,
                HwError::Unavailable { .. } | HwError::DriverMissing(_) => {
                    BenchError::DeviceUnavailable(hw.to_string())
                }
                HwError::Io(io) => map_io(io),
                HwError::Protocol(_) => BenchError::Device(hw.to_string()),
            };
        }
    }

    if let Some(io) = e.downcast_ref::<std::io::Error>() {
        return map_io(io);
    }

    // Fallback: string-based detection
    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        BenchError::Timeout
    } else if lower.contains("unavailable") || lower.contains("not found") {
        BenchError::DeviceUnavailable(s)
    } else {
        BenchError::Device(s)
    }
}

fn map_io(io: &std::io::Error) -> BenchError {
    match io.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => BenchError::Timeout,
        ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::ConnectionRefused => {
            BenchError::DeviceUnavailable(io.to_string())
        }
        _ => BenchError::Device(io.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(e: impl std::error::Error + Send + Sync + 'static) -> bench_traits::DeviceError {
        Box::new(e)
    }

    #[test]
    fn io_kinds_map_to_taxonomy() {
        let e = boxed(std::io::Error::new(ErrorKind::TimedOut, "slow"));
        assert_eq!(map_hw_error(&*e), BenchError::Timeout);
        let e = boxed(std::io::Error::new(ErrorKind::NotFound, "/dev/ttyUSB0"));
        assert!(matches!(map_hw_error(&*e), BenchError::DeviceUnavailable(_)));
        let e = boxed(std::io::Error::other("framing"));
        assert!(matches!(map_hw_error(&*e), BenchError::Device(_)));
    }

    #[test]
    fn string_fallback_detects_timeouts() {
        let e: bench_traits::DeviceError = "bridge read timeout".into();
        assert_eq!(map_hw_error(&*e), BenchError::Timeout);
        let e: bench_traits::DeviceError = "checksum mismatch".into();
        assert_eq!(
            map_hw_error(&*e),
            BenchError::Device("checksum mismatch".into())
        );
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn hw_errors_downcast() {
        use bench_hardware::error::HwError;
        let e = boxed(HwError::Unavailable {
            missing: vec!["heater".into()],
        });
        assert_eq!(
            map_hw_error(&*e),
            BenchError::DeviceUnavailable("devices unavailable: heater".into())
        );
        let e = boxed(HwError::Timeout);
        assert_eq!(map_hw_error(&*e), BenchError::Timeout);
        let e = boxed(HwError::Protocol("bad frame".into()));
        assert!(matches!(map_hw_error(&*e), BenchError::Device(_)));
    }
}
