//! Formatting helpers shared across console views.

use chrono::{DateTime, Local, TimeZone, Utc};

/// Format a byte count with decimal units; `None` renders as a dash.
pub fn format_size(bytes: Option<u64>) -> String {
    let Some(bytes) = bytes else {
        return "-".to_string();
    };
    if bytes == 0 {
        return "0 B".to_string();
    }
    const UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];
    let exp = ((bytes as f64).log10() / 3.0).floor() as usize;
    let exp = exp.min(UNITS.len() - 1);
    let value = bytes as f64 / 1000f64.powi(exp as i32);
    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{} {}", rounded as u64, UNITS[exp])
    } else {
        format!("{:.1} {}", rounded, UNITS[exp])
    }
}

/// Break a long path into lines, preferring `/` boundaries.
pub fn split_line(text: &str, max_length: usize) -> String {
    if max_length == 0 || text.len() <= max_length {
        return text.to_string();
    }
    let mut end = max_length;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let split_at = match text[..end].rfind('/') {
        Some(p) if p > 0 => p,
        _ => end,
    };
    if split_at == 0 {
        return text.to_string();
    }
    format!(
        "{}\r\n{}",
        &text[..split_at],
        split_line(&text[split_at..], max_length)
    )
}

/// Speed bucket of a trace, by duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Fast,
    Slow,
    Slower,
}

impl Speed {
    /// Under 250 ms is fast, under a second slow, beyond that slower.
    pub fn from_duration_ms(duration: u64) -> Self {
        if duration < 250 {
            Speed::Fast
        } else if duration < 1000 {
            Speed::Slow
        } else {
            Speed::Slower
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Speed::Fast => "fast",
            Speed::Slow => "slow",
            Speed::Slower => "slower",
        }
    }
}

/// Format an epoch-milliseconds timestamp as local wall clock with millis,
/// `HH:MM:SS.mmm`.
pub fn format_time_with_millis(epoch_ms: i64) -> String {
    match Utc.timestamp_millis_opt(epoch_ms).single() {
        Some(ts) => ts
            .with_timezone(&Local)
            .format("%H:%M:%S%.3f")
            .to_string(),
        None => "-".to_string(),
    }
}

/// Format a UTC timestamp as local wall clock with millis.
pub fn format_datetime_with_millis(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%H:%M:%S%.3f").to_string()
}

/// Pick a wording by quantity: zero, one, or more.
pub fn quantity_word<'a>(value: usize, zero: &'a str, one: &'a str, more: &'a str) -> &'a str {
    match value {
        0 => zero,
        1 => one,
        _ => more,
    }
}
