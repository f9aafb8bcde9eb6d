//! Final stats report emission.
//!
//! Every simulator exposes a serde-serializable stats snapshot; the driver
//! renders it either as an aligned text block or as JSON.

use serde::Serialize;
use std::fmt::Display;

/// Render a stats snapshot to stdout.
///
/// `json = false` prints the snapshot's `Display` form under a banner;
/// `json = true` prints one pretty-printed JSON object.
pub fn emit<S: Serialize + Display>(title: &str, stats: &S, json: bool) {
    if json {
        match serde_json::to_string_pretty(stats) {
            Ok(body) => println!("{body}"),
            Err(err) => eprintln!("failed to serialize {title} stats: {err}"),
        }
    } else {
        println!("=== {title} ===");
        println!("{stats}");
    }
}

/// Format one `label: value` counter line with the alignment used by all
/// simulator reports.
pub fn line(label: &str, value: u64) -> String {
    format!("  {label:<28} {value}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_is_aligned() {
        assert_eq!(line("tasks_completed", 7), "  tasks_completed              7");
    }
}
