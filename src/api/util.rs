/// Longest reason string surfaced to a UI.
pub const MAX_REASON_LEN: usize = 200;

/// Formats the whole error chain on one line.
pub fn map_any_err(e: &anyhow::Error) -> String {
    format!("{:#}", e)
}

/// Cuts `reason` to at most `max` characters, marking the cut with `…`.
pub fn truncate_reason(reason: &str, max: usize) -> String {
    match reason.char_indices().nth(max) {
        None => reason.to_string(),
        Some((idx, _)) => format!("{}…", &reason[..idx]),
    }
}
