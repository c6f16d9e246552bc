//! CPU and memory usage gauges for the selected VM.
//!
//! Usage values reach us from the backend in whatever shape the hypervisor
//! produced: numbers, numeric strings, null, or nothing. The policy is that
//! anything that is not a finite number counts as zero usage.

use serde_json::Value;

use crate::api::VmSummary;

pub const SEGMENT_LABELS: [&str; 2] = ["Used", "Available"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaugeKind {
    Cpu,
    Memory,
}

impl GaugeKind {
    pub fn title(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Memory => "RAM",
        }
    }

    /// ANSI colour of the used segment; the available segment is always dim.
    pub fn used_color(self) -> &'static str {
        match self {
            Self::Cpu => "1;34",
            Self::Memory => "1;32",
        }
    }
}

pub const AVAILABLE_COLOR: &str = "2;37";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageGauge {
    pub kind: GaugeKind,
    pub used: f64,
    pub show_legend: bool,
}

impl UsageGauge {
    pub fn new(kind: GaugeKind, used: Option<f64>) -> Self {
        Self {
            kind,
            used: usage_or_zero(used),
            show_legend: false,
        }
    }

    pub fn available(&self) -> f64 {
        100.0 - self.used
    }

    /// `[used, available]`, in the order of [`SEGMENT_LABELS`].
    pub fn segments(&self) -> [f64; 2] {
        [self.used, self.available()]
    }

    /// Renders the gauge as a `width` cell bar: used cells first, then
    /// available cells.
    pub fn cells(&self, width: usize) -> (usize, usize) {
        let filled = ((self.used / 100.0) * width as f64).round() as usize;
        let filled = filled.min(width);
        (filled, width - filled)
    }
}

/// Reads a loosely typed JSON number. Strings are trimmed and parsed; every
/// other shape, and any non-finite result, yields `None`.
pub fn parse_number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Missing or unusable usage counts as 0; values are clamped to a percentage.
pub fn usage_or_zero(value: Option<f64>) -> f64 {
    match value {
        Some(value) if value.is_finite() => value.clamp(0.0, 100.0),
        _ => 0.0,
    }
}

pub fn cpu_percent(vm: &VmSummary) -> Option<f64> {
    vm.cpu.map(|fraction| fraction * 100.0)
}

pub fn memory_percent(vm: &VmSummary) -> Option<f64> {
    let used = vm.mem?;
    match vm.maxmem {
        Some(max) if max > 0.0 => Some(used / max * 100.0),
        _ => Some(0.0),
    }
}

/// Memory percent from a resources reading, which reports MiB, against the
/// listing's `maxmem` in bytes. Without a usable capacity there is no percent.
pub fn resident_memory_percent(memory_mib: Option<f64>, maxmem: Option<f64>) -> Option<f64> {
    let used = memory_mib? * 1024.0 * 1024.0;
    match maxmem {
        Some(max) if max > 0.0 => Some(used / max * 100.0),
        _ => None,
    }
}
