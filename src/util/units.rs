//! Units formatting and conversion utilities
//!
//! Provides functions for human-readable formatting of sizes and for the
//! derived rates (MB/s, ops/s) reported by benchmark results.

use std::time::Duration;

pub const MIB: u64 = 1_048_576;

/// Megabytes (MiB) to bytes, saturating
pub fn mib_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(MIB)
}

/// Format bytes into human-readable size with appropriate units
///
/// # Examples
/// ```
/// use srvbench::util::units::format_bytes;
///
/// assert_eq!(format_bytes(1024), "1.0 KiB");
/// assert_eq!(format_bytes(1048576), "1.0 MiB");
/// assert_eq!(format_bytes(1073741824), "1.0 GiB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Calculate throughput in MB/s from bytes and duration
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use srvbench::util::units::calculate_throughput_mbps;
///
/// let throughput = calculate_throughput_mbps(1048576, Duration::from_secs(1));
/// assert!((throughput - 1.0).abs() < 0.01);
/// ```
pub fn calculate_throughput_mbps(bytes: u64, duration: Duration) -> f64 {
    if duration.is_zero() {
        return 0.0;
    }

    let megabytes = bytes as f64 / MIB as f64;
    megabytes / duration.as_secs_f64()
}

/// Operations per second over `duration`
pub fn calculate_rate(operations: u64, duration: Duration) -> f64 {
    if duration.is_zero() {
        return 0.0;
    }

    operations as f64 / duration.as_secs_f64()
}

/// Share of `total` covered by `elapsed`, as a percentage in [0, 100]
pub fn percent_of(elapsed: Duration, total: Duration) -> f64 {
    if total.is_zero() {
        return 100.0;
    }
    (elapsed.as_secs_f64() / total.as_secs_f64() * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(1099511627776), "1.0 TiB");
    }

    #[test]
    fn test_calculate_throughput_mbps() {
        let throughput = calculate_throughput_mbps(2097152, Duration::from_secs(2));
        assert!((throughput - 1.0).abs() < 0.01);

        assert_eq!(calculate_throughput_mbps(1000, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_calculate_rate() {
        let rate = calculate_rate(500, Duration::from_millis(500));
        assert!((rate - 1000.0).abs() < 0.01);

        assert_eq!(calculate_rate(1000, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(Duration::from_secs(1), Duration::from_secs(4)), 25.0);
        assert_eq!(percent_of(Duration::from_secs(9), Duration::from_secs(4)), 100.0);
        assert_eq!(percent_of(Duration::from_secs(1), Duration::ZERO), 100.0);
    }

    #[test]
    fn test_mib_to_bytes() {
        assert_eq!(mib_to_bytes(4), 4 * 1_048_576);
        assert_eq!(mib_to_bytes(u64::MAX), u64::MAX);
    }
}
