//! Final run summary.

use crate::orchestrator::OrchestrationState;
use crate::phase::PhaseKind;
use crate::util::clip_chars;

/// Issues listed in the summary; the rest are only counted.
pub const ISSUE_PREVIEW_LIMIT: usize = 10;
/// Maximum characters shown per issue line.
pub const ISSUE_CHAR_LIMIT: usize = 100;

const RULE_WIDTH: usize = 60;

/// Render the summary for `state` as log-ready lines.
pub fn render(state: &OrchestrationState, location: &str) -> Vec<String> {
    let rule = "=".repeat(RULE_WIDTH);
    let mut lines = vec![
        rule.clone(),
        "Test orchestration finished".to_string(),
        rule,
        format!("Started at: {}", state.started_at.to_rfc3339()),
    ];

    for kind in [PhaseKind::Quality, PhaseKind::E2e] {
        let status = if state.is_complete(kind) {
            "complete"
        } else {
            "not complete"
        };
        lines.push(format!("{}: {}", kind.label(), status));
    }
    lines.push(format!("Phases complete: {}/2", state.completed_phase_count()));

    let total = state.issues_found.len();
    if total == 0 {
        lines.push("Issues found: none".to_string());
    } else {
        lines.push(format!("Issues found: {}", total));
        for issue in state.issues_found.iter().take(ISSUE_PREVIEW_LIMIT) {
            lines.push(format!("  - {}", clip_chars(issue, ISSUE_CHAR_LIMIT)));
        }
        if total > ISSUE_PREVIEW_LIMIT {
            lines.push(format!("  ... and {} more", total - ISSUE_PREVIEW_LIMIT));
        }
    }

    if !state.fixes_applied.is_empty() {
        lines.push(format!("Fixes applied: {}", state.fixes_applied.len()));
    }

    lines.push(format!("State saved: {}", location));
    lines
}
