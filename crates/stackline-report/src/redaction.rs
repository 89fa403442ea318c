use std::collections::BTreeSet;

pub const REDACTED: &str = "[REDACTED]";

/// Mask every sensitive value in `text`, longest first so overlapping
/// secrets are fully hidden. Values shorter than three bytes are left alone.
#[must_use]
pub fn redact_sensitive(text: &str, sensitive_values: &BTreeSet<String>) -> String {
    let mut values: Vec<&str> = sensitive_values
        .iter()
        .map(String::as_str)
        .filter(|value| value.len() >= 3)
        .collect();
    values.sort_by_key(|value| std::cmp::Reverse(value.len()));

    values
        .into_iter()
        .fold(text.to_string(), |redacted, value| redacted.replace(value, REDACTED))
}
