//! Benchmark result data models
//!
//! Contains the final measurement payloads for each workload kind and the
//! intermediate metrics snapshot runners publish while a job is running.

use serde::{Deserialize, Serialize};

/// Final measurement payload, tagged by workload kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BenchmarkResult {
    Cpu(CpuResult),
    Disk(DiskResult),
    Memory(MemoryResult),
    Gpu(GpuResult),
}

/// SHA-256 hashing throughput across all workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuResult {
    /// Number of hashing workers
    pub threads: usize,
    /// Requested duration in seconds
    pub duration_secs: u64,
    /// Measured wall-clock time in seconds
    pub elapsed_secs: f64,
    /// Total digests computed by all workers
    pub sha256_ops: u64,
    /// Digests per second
    pub ops_per_sec: f64,
}

/// Sequential write then read throughput of a scratch file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskResult {
    pub size_mb: u64,
    /// Time spent writing and syncing, in seconds
    pub write_secs: f64,
    /// Time spent reading back, in seconds
    pub read_secs: f64,
    pub write_mb_s: f64,
    pub read_mb_s: f64,
}

/// In-memory block copy throughput
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryResult {
    /// Size of the destination buffer
    pub size_mb: u64,
    pub duration_secs: u64,
    pub elapsed_secs: f64,
    /// Total megabytes copied
    pub copied_mb: f64,
    pub mem_copy_mb_s: f64,
}

/// Outcome of an external GPU stress tool run
///
/// A host without any stress tool still yields a result: `tool` is `None`,
/// `available` is false and `message` explains what was probed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuResult {
    pub tool: Option<String>,
    pub available: bool,
    /// Whether a GPU driver utility (nvidia-smi) answered
    pub driver_detected: bool,
    /// GPUs reported by the driver utility
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpus: Vec<String>,
    pub message: String,
    pub exit_code: Option<i32>,
    pub elapsed_secs: f64,
}

impl BenchmarkResult {
    /// Get a human-readable summary of the result
    pub fn summary(&self) -> String {
        match self {
            BenchmarkResult::Cpu(r) => format!(
                "cpu - {} threads - {} sha256 ops - {:.0} ops/s",
                r.threads, r.sha256_ops, r.ops_per_sec
            ),
            BenchmarkResult::Disk(r) => format!(
                "disk - {} MB - write {:.2} MB/s - read {:.2} MB/s",
                r.size_mb, r.write_mb_s, r.read_mb_s
            ),
            BenchmarkResult::Memory(r) => format!(
                "memory - {} MB buffer - {:.2} MB/s",
                r.size_mb, r.mem_copy_mb_s
            ),
            BenchmarkResult::Gpu(r) => match &r.tool {
                Some(tool) => format!("gpu - {} - exit code {:?}", tool, r.exit_code),
                None => format!("gpu - unavailable - {}", r.message),
            },
        }
    }
}

/// Intermediate measurements, overwritten in place while a job runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_secs: Option<f64>,
    /// Current phase for multi-phase workloads (disk: write, read)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_processed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput_mb_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ops_per_sec: Option<f64>,
    /// Most recent lines of external tool output
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log_tail: Vec<String>,
}

impl JobMetrics {
    pub fn with_elapsed(elapsed_secs: f64) -> Self {
        Self {
            elapsed_secs: Some(elapsed_secs),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_cpu_result() -> BenchmarkResult {
        BenchmarkResult::Cpu(CpuResult {
            threads: 4,
            duration_secs: 2,
            elapsed_secs: 2.0,
            sha256_ops: 10_000,
            ops_per_sec: 5_000.0,
        })
    }

    #[test]
    fn test_result_is_tagged_by_type() {
        let json = serde_json::to_value(create_test_cpu_result()).unwrap();
        assert_eq!(json["type"], "cpu");
        assert_eq!(json["sha256_ops"], 10_000);

        let memory = BenchmarkResult::Memory(MemoryResult {
            size_mb: 64,
            duration_secs: 2,
            elapsed_secs: 2.01,
            copied_mb: 4096.0,
            mem_copy_mb_s: 2037.8,
        });
        let json = serde_json::to_value(&memory).unwrap();
        assert_eq!(json["type"], "memory");
        assert!(json["mem_copy_mb_s"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_unavailable_gpu_serializes_null_tool() {
        let result = BenchmarkResult::Gpu(GpuResult {
            tool: None,
            available: false,
            driver_detected: false,
            gpus: Vec::new(),
            message: "no GPU stress tool installed".to_string(),
            exit_code: None,
            elapsed_secs: 0.0,
        });
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["tool"].is_null());
        assert_eq!(json["available"], false);
        assert!(json.get("gpus").is_none());
        assert!(result.summary().contains("unavailable"));
    }

    #[test]
    fn test_result_summary() {
        assert!(create_test_cpu_result().summary().starts_with("cpu"));
    }

    #[test]
    fn test_empty_metrics_serialize_as_empty_object() {
        let json = serde_json::to_string(&JobMetrics::default()).unwrap();
        assert_eq!(json, "{}");

        let metrics = JobMetrics::with_elapsed(1.5);
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["elapsed_secs"], 1.5);
    }
}
