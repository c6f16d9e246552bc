//! Terminal styling helpers shared by list output and the dashboard.

use std::io::{self, IsTerminal};
use std::sync::OnceLock;

use crate::board::{AlertLevel, Badge, BadgeTone};

fn colors_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        if std::env::var_os("NO_COLOR").is_some() {
            return false;
        }

        if std::env::var("TERM")
            .map(|term| term.eq_ignore_ascii_case("dumb"))
            .unwrap_or(false)
        {
            return false;
        }

        io::stdout().is_terminal()
    })
}

fn paint(value: &str, code: &str) -> String {
    if colors_enabled() {
        format!("\x1b[{code}m{value}\x1b[0m")
    } else {
        value.to_string()
    }
}

/// Styles a table header cell.
fn table_header(value: &str) -> String {
    paint(value, "1;36")
}

/// Styles a table border or separator fragment.
fn table_border(value: &str) -> String {
    paint(value, "2;34")
}

pub fn badge_code(tone: BadgeTone) -> &'static str {
    match tone {
        BadgeTone::Success => "1;32",
        BadgeTone::Danger => "1;31",
    }
}

/// Applies badge colouring to a pre-padded table cell.
fn style_badge_cell(padded: &str, tone: BadgeTone) -> String {
    paint(padded, badge_code(tone))
}

/// Fading alerts are drawn dim so the transition is visible for its short life.
pub fn alert_code(level: AlertLevel, fading: bool) -> &'static str {
    match (level, fading) {
        (AlertLevel::Success, false) => "1;30;42",
        (AlertLevel::Danger, false) => "1;37;41",
        (AlertLevel::Success, true) => "2;32",
        (AlertLevel::Danger, true) => "2;31",
    }
}

/// Prints a bordered table. The cell in `status_column`, if any, is coloured
/// like a status badge.
pub fn print_table(headers: &[&str], rows: &[Vec<String>], status_column: Option<usize>) {
    let mut widths: Vec<usize> = headers.iter().map(|header| header.chars().count()).collect();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(cell.chars().count());
        }
    }

    let mut border = String::from("+");
    for width in &widths {
        border.push_str(&format!("-{}-+", "-".repeat(*width)));
    }

    println!("{}", table_border(&border));
    let mut line = String::from("|");
    for (idx, header) in headers.iter().enumerate() {
        line.push_str(&format!(" {} |", table_header(&pad_cell(header, widths[idx]))));
    }
    println!("{line}");
    println!("{}", table_border(&border));
    for row in rows {
        let mut line = String::from("|");
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            let padded = pad_cell(cell, widths[idx]);
            if Some(idx) == status_column {
                line.push_str(&format!(
                    " {} |",
                    style_badge_cell(&padded, Badge::for_status(cell).tone)
                ));
            } else {
                line.push_str(&format!(" {padded} |"));
            }
        }
        println!("{line}");
    }
    println!("{}", table_border(&border));
}

fn pad_cell(value: &str, width: usize) -> String {
    let pad = width.saturating_sub(value.chars().count());
    format!("{value}{}", " ".repeat(pad))
}

pub fn format_percent(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |value| format!("{value:.1}"))
}

/// Compact uptime such as `3d 4h`, `2h 05m` or `42s`.
pub fn format_uptime(seconds: Option<f64>) -> String {
    let Some(seconds) = seconds.filter(|value| *value >= 0.0) else {
        return "-".to_string();
    };
    let total = seconds as u64;
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {:02}s", total % 60)
    } else {
        format!("{total}s")
    }
}

pub fn format_megabytes(bytes: Option<f64>) -> String {
    bytes.map_or_else(
        || "-".to_string(),
        |bytes| format!("{:.0}", bytes / (1024.0 * 1024.0)),
    )
}
