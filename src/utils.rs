use chrono::{DateTime, Utc};

pub fn format_bytes(size: u64) -> String {
    const LABELS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = size as f64;
    let mut power = 0;

    while value > 1024.0 && power < LABELS.len() - 1 {
        value /= 1024.0;
        power += 1;
    }

    format!("{:.2} {}", value, LABELS[power])
}

pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Cut `text` to at most `max` characters, marking the cut with "...".
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut cut: String = text.chars().take(keep).collect();
    cut.push_str(&"..."[..max.min(3)]);
    cut
}
