//! Utility functions module
//!
//! Contains helpers for unit formatting, derived rates, and host
//! introspection.

pub mod host;
pub mod units;

// Re-export commonly used functions
pub use host::logical_cores;
pub use units::{
    calculate_rate, calculate_throughput_mbps, format_bytes, mib_to_bytes,
    percent_of, MIB,
};
