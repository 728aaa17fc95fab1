use std::sync::LazyLock;

use regex::Regex;

static FULL_RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2}\.\d{2}\.\d{2}\.)\s*~\s*(\d{2}\.\d{2}\.\d{2}\.)").unwrap());
static SHORT_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2}\.\d{2}\.\d{2}\.)\s*~\s*(\d{2}\.\d{2}\.)").unwrap());
static LONE_START_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{2}\.\d{2}\.\d{2}\.)").unwrap());

pub const DESCRIPTION_MAX: usize = 500;

/// Parse a free-text exhibition period into (start, end).
///
/// Patterns tried in priority order:
/// 1. `24.03.01. ~ 24.03.15.`: both dates fully specified
/// 2. `24.03.01. ~ 03.15.`: end omits the year, inherited from start
/// 3. `24.03.01.`: start only; end stays undetermined (`None`)
pub fn parse_period(raw: &str) -> (Option<String>, Option<String>) {
    if let Some(caps) = FULL_RANGE_RE.captures(raw) {
        return (Some(caps[1].to_string()), Some(caps[2].to_string()));
    }
    if let Some(caps) = SHORT_END_RE.captures(raw) {
        let start = caps[1].to_string();
        // "24." prefix of the start carries the year for the short end form.
        let end = format!("{}{}", &start[..3], &caps[2]);
        return (Some(start), Some(end));
    }
    if let Some(caps) = LONE_START_RE.captures(raw) {
        return (Some(caps[1].to_string()), None);
    }
    (None, None)
}

/// Hard cap on detail-view descriptions, counted in chars.
pub fn truncate_description(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= DESCRIPTION_MAX {
        return trimmed.to_string();
    }
    let truncated: String = trimmed.chars().take(DESCRIPTION_MAX).collect();
    format!("{}...", truncated)
}

// ── Tests ──
