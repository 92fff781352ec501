//! Small text-formatting helpers shared by the renderers.

use chrono::{DateTime, Utc};

/// Group digits with commas: 1234567 -> "1,234,567".
pub fn number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }

    out
}

/// Coarse human-readable distance between `now` and `then`.
pub fn relative_time(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    if then.timestamp() == 0 {
        return "never".to_string();
    }

    let secs = (now - then).num_seconds();
    if secs < 0 {
        return "in future".to_string();
    }

    const MINUTE: i64 = 60;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;
    const WEEK: i64 = 7 * DAY;
    const MONTH: i64 = 30 * DAY;
    const YEAR: i64 = 365 * DAY;

    if secs < MINUTE {
        "now".to_string()
    } else if secs < HOUR {
        format!("{} min. ago", secs / MINUTE)
    } else if secs < DAY {
        format!("{} hr. ago", secs / HOUR)
    } else if secs < WEEK {
        format!("{} day{} ago", secs / DAY, plural(secs / DAY))
    } else if secs < MONTH {
        format!("{} wk. ago", secs / WEEK)
    } else if secs < YEAR {
        format!("{} mo. ago", secs / MONTH)
    } else {
        format!("{} yr. ago", secs / YEAR)
    }
}

fn plural(n: i64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Truncate to `max` characters, ellipsizing when something was cut.
pub fn abbrev(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        return s.to_string();
    }

    let keep: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{keep}...")
}

/// An email address the way git renders it.
pub fn email(address: &str) -> String {
    format!("<{address}>")
}

/// Quote a CSV field if it needs it.
pub fn csv_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
