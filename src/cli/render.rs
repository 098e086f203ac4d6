//! Text rendering for the CLI

use crate::core::service::{DeviceInfo, DeviceState, TestRecord, TestResult, TestSummary};
use crate::core::session::DeviceSession;
use std::fmt::Write;

fn value(v: Option<f64>, decimals: usize, unit: &str) -> String {
    match v {
        Some(v) => format!("{v:.decimals$} {unit}"),
        None => "-".to_string(),
    }
}

fn device_state(state: DeviceState) -> &'static str {
    match state {
        DeviceState::Idle => "IDLE",
        DeviceState::Running => "RUNNING",
        DeviceState::Offline => "OFFLINE",
        DeviceState::Unknown => "UNKNOWN",
    }
}

/// One-line session status
pub fn session_line(session: &DeviceSession) -> String {
    let mut line = format!("{} {}", session.device_id, session.status);
    if let Some(serial) = session.tested_serial {
        let _ = write!(line, "  serial {serial}");
    }
    if let Some(test_id) = &session.test_id {
        let _ = write!(line, "  test {test_id}");
    }
    if session.status.is_busy() || session.elapsed_secs > 0 {
        let _ = write!(line, "  {}", session.elapsed_display());
    }
    if let Some(error) = &session.error {
        let _ = write!(line, "  error: {error}");
    }
    line
}

/// Measurement summary lines
pub fn result_block(result: &TestResult) -> String {
    let cycles = result
        .total_cycles
        .map_or_else(|| "-".to_string(), |c| c.to_string());

    format!(
        "  Total cycles:     {}\n  Avg voltage:      {}\n  Avg current:      {}\n  Avg charge time:  {}\n",
        cycles,
        value(result.avg_voltage, 3, "V"),
        value(result.avg_current, 3, "A"),
        value(result.avg_charge_time, 0, "ms"),
    )
}

/// Outcome of a finished run with the serial to use next
pub fn finished_block(session: &DeviceSession) -> String {
    let mut out = format!(
        "Result: {}  (test {}, serial {})\n",
        session.status.to_string().to_uppercase(),
        session.test_id.as_deref().unwrap_or("-"),
        session
            .tested_serial
            .map_or_else(|| "-".to_string(), |s| s.to_string()),
    );
    if let Some(result) = &session.result {
        out.push_str(&result_block(result));
    }
    if let Some(next) = session.next_serial {
        let _ = writeln!(out, "Next serial: {next}");
    }
    if let Some(error) = &session.error {
        let _ = writeln!(out, "Warning: {error}");
    }
    out
}

/// Recent tests table
pub fn recent_table(tests: &[TestSummary]) -> String {
    if tests.is_empty() {
        return "No recent tests.\n".to_string();
    }

    let mut out = format!("{:<12} {:<12} {:<12} {}\n", "Test", "Serial", "Status", "Created");
    let _ = writeln!(out, "{:-<60}", "");
    for test in tests {
        let _ = writeln!(
            out,
            "{:<12} {:<12} {:<12} {}",
            test.id,
            test.serial_no,
            test.status.to_string(),
            test.created_at.as_deref().unwrap_or("-")
        );
    }
    out
}

/// Device list table
pub fn devices_table(devices: &[DeviceInfo]) -> String {
    if devices.is_empty() {
        return "No devices found.\n".to_string();
    }

    let mut out = format!("{:<12} {:<28} {}\n", "Device", "Name", "Status");
    let _ = writeln!(out, "{:-<60}", "");
    for device in devices {
        let _ = writeln!(
            out,
            "{:<12} {:<28} {}",
            device.device_id,
            device.display_name(),
            device_state(device.status)
        );
    }
    out
}

/// Detail view of a run with its measurements in cycle order
pub fn record_block(test_id: &str, record: &TestRecord) -> String {
    let mut out = format!(
        "Test {}  serial {}  {}\n",
        test_id, record.serial_no, record.status
    );
    if let Some(cycles) = record.total_cycles {
        let _ = writeln!(out, "Total cycles: {cycles}");
    }

    let measurements = record.sorted_measurements();
    if measurements.is_empty() {
        out.push_str("No measurements.\n");
        return out;
    }

    let _ = writeln!(
        out,
        "{:>6} {:>10} {:>10} {:>12} {:>10}",
        "Cycle", "Voltage", "Current", "Charge", "Peak"
    );
    for m in measurements {
        let _ = writeln!(
            out,
            "{:>6} {:>10} {:>10} {:>12} {:>10}",
            m.cycle_no,
            value(m.voltage, 3, "V"),
            value(m.current, 3, "A"),
            value(m.charge_time, 0, "ms"),
            value(m.peak_voltage, 3, "V"),
        );
    }
    out
}
