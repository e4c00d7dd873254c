//! Rendering of recent query history for the refine prompt.

use crate::ai::prompt::NO_HISTORY;
use crate::store::models::HistoryEntry;
use std::fmt::Write as _;

/// Number of recent entries included in a refine prompt.
pub const REFINE_HISTORY_LIMIT: usize = 5;

fn seconds(v: Option<f64>) -> String {
    match v {
        Some(s) => format!("{s} s"),
        None => "N/A".to_string(),
    }
}

pub fn format_history(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return NO_HISTORY.to_string();
    }
    let mut out = String::new();
    for (i, entry) in entries.iter().enumerate() {
        let r = &entry.record;
        let _ = writeln!(out, "--- History Entry {} ---", i + 1);
        let _ = writeln!(out, "Query: {}", r.query);
        let _ = writeln!(out, "Status: {}", r.status.as_str());
        let _ = writeln!(out, "CPU Time: {}", seconds(r.timings.cpu_time));
        let _ = writeln!(out, "Elapsed Time: {}", seconds(r.timings.elapsed_time));
        let _ = writeln!(out, "Wall Time: {}", seconds(r.timings.wall_time));
        let _ = writeln!(out, "Queued Time: {}", seconds(r.timings.queued_time));
        if entry.feedbacks.is_empty() {
            out.push_str("No Feedback.\n");
        } else {
            out.push_str("Feedback:\n");
            for f in &entry.feedbacks {
                let text = f.text.as_deref().filter(|t| !t.is_empty()).unwrap_or("No comment");
                let _ = writeln!(out, "  - Feedback (Rating: {}): {text}", f.rating);
            }
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}
