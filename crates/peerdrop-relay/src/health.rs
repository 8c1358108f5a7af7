//! 健康检查
//!
//! `/health` 与 `/hello` 返回同一份 JSON 状态，`message` 字段为进程常驻内存。

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    /// 常驻内存，例如 `"12.34 MB"`
    pub message: String,
    pub rooms: usize,
    pub connections: usize,
    pub uptime_secs: u64,
}

impl HealthStatus {
    pub async fn collect(rooms: usize, connections: usize, uptime: Duration) -> Self {
        let message = match resident_memory_bytes().await {
            Some(bytes) => format_memory(bytes),
            None => "unavailable".to_string(),
        };

        Self {
            status: "ok".to_string(),
            message,
            rooms,
            connections,
            uptime_secs: uptime.as_secs(),
        }
    }
}

fn format_memory(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}

/// 读取 `/proc/self/status` 中的 `VmRSS`，非 Linux 平台返回 `None`
async fn resident_memory_bytes() -> Option<u64> {
    let status = tokio::fs::read_to_string("/proc/self/status").await.ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kib: u64 = line
        .trim_start_matches("VmRSS:")
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some(kib * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\tpeerdrop-relay\nVmPeak:\t   20000 kB\nVmRSS:\t    5120 kB\nThreads:\t4\n";
        assert_eq!(parse_vm_rss(status), Some(5120 * 1024));
        assert_eq!(parse_vm_rss("Name:\tx\n"), None);
        assert_eq!(parse_vm_rss("VmRSS:\tlots kB\n"), None);
    }

    #[test]
    fn test_format_memory() {
        assert_eq!(format_memory(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_memory(1536 * 1024), "1.50 MB");
    }
}
