//! Server-wide counters and the read-only status document.

use std::fs;
use std::path::Path;

use log::warn;
use serde::Serialize;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub devices: usize,
    pub slow_polls: u64,
    pub warnings: u64,
    pub last_warning: String,
}

impl ServerStats {
    /// Records `msg` as the last warning, stamped with `now_ms`. Counting
    /// is left to the caller.
    pub fn warn(&mut self, msg: &str, now_ms: u64) {
        warn!("{msg}");
        self.last_warning = format!("{msg} {now_ms}");
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub version: &'static str,
    pub mac: String,
    pub ssid: String,
    pub ip: String,
    pub rssi: String,
    pub memory: i64,
    pub devices: usize,
    pub devices_slow_process: u64,
    pub warnings: u64,
    pub last_warn: String,
    pub now: u64,
}

/// `MemAvailable` from `/proc/meminfo` in bytes, `-1` when unknown.
pub fn memory_free() -> i64 {
    fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|info| parse_mem_available(&info))
        .unwrap_or(-1)
}

fn parse_mem_available(info: &str) -> Option<i64> {
    info.lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))
        .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse::<i64>().ok())
        .map(|kb| kb * 1024)
}

/// MAC address of `iface` as reported by sysfs, empty when unavailable.
pub fn interface_mac(iface: &str) -> String {
    let path = Path::new("/sys/class/net").join(iface).join("address");
    fs::read_to_string(path)
        .map(|s| s.trim().to_uppercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_meminfo() {
        let info = "MemTotal:       16314424 kB\nMemFree:         1234 kB\nMemAvailable:    2048 kB\n";
        assert_eq!(parse_mem_available(info), Some(2048 * 1024));
        assert_eq!(parse_mem_available("MemTotal: 1 kB"), None);
    }

    #[test]
    fn warning_text_is_stamped() {
        let mut stats = ServerStats::default();
        stats.warn("Reading DHT22 TEMP failed!", 1500);
        assert_eq!(stats.last_warning, "Reading DHT22 TEMP failed! 1500");
        assert_eq!(stats.warnings, 0);
    }

    #[test]
    fn status_serializes_with_wire_names() {
        let report = StatusReport {
            version: VERSION,
            mac: "AA:BB".into(),
            ssid: "home".into(),
            ip: "10.0.0.2".into(),
            rssi: "0".into(),
            memory: 10,
            devices: 2,
            devices_slow_process: 1,
            warnings: 3,
            last_warn: "x".into(),
            now: 99,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["devices_slow_process"], 1);
        assert_eq!(json["last_warn"], "x");
        assert_eq!(json["version"], VERSION);
    }
}
