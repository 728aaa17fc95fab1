use chrono::NaiveDate;
use sha2::{Digest, Sha256};

/// Canonicalize a scraped date to the fixed `YY.MM.DD.` form used for
/// fingerprinting. Absent or unparseable input canonicalizes to "".
pub fn canonical_date(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    NaiveDate::parse_from_str(trimmed, "%y.%m.%d.")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y.%m.%d."))
        .map(|d| d.format("%y.%m.%d.").to_string())
        .unwrap_or_default()
}

/// Content fingerprint over the identity-bearing fields of a listing.
/// Stable across restarts: same name/address/dates always hash the same.
pub fn fingerprint(
    name: &str,
    address: &str,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> String {
    let input = [
        name,
        address,
        &canonical_date(start_date),
        &canonical_date(end_date),
    ]
    .join("|");

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

// ── Tests ──
