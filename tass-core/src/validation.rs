//! Payload checks run before a request is sent.

use crate::error::{TassError, TassResult};
use crate::json::Map;

/// Join items Oxford-comma style: `a`, `a and b`, `a, b, and c`.
pub fn oxford_join<S: AsRef<str>>(joiner: &str, items: &[S]) -> String {
    let items: Vec<&str> = items.iter().map(AsRef::as_ref).collect();
    match items.as_slice() {
        [] => String::new(),
        [only] => (*only).to_string(),
        [first, second] => format!("{first} {joiner} {second}"),
        [init @ .., last] => format!("{}, {joiner} {last}", init.join(", ")),
    }
}

/// Fail with a validation error naming every key of `required` absent from `payload`.
pub fn raise_for_required_keys<S: AsRef<str>>(
    payload: &Map,
    required: &[S],
    param_name: Option<&str>,
) -> TassResult<()> {
    let missing: Vec<&str> = required
        .iter()
        .map(AsRef::as_ref)
        .filter(|key| !payload.contains_key(*key))
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    let quoted: Vec<String> = missing.iter().map(|key| format!("'{key}'")).collect();
    let plural = if missing.len() > 1 { "s" } else { "" };
    let subject = param_name.map(|name| format!("'{name}' ")).unwrap_or_default();
    Err(TassError::Validation(format!(
        "{subject}is missing required attribute{plural}: {}",
        oxford_join("and", &quoted)
    )))
}
