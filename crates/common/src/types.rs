// Domain types shared by the client and the relay.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Cursor location in editor coordinates (both 1-based).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CursorPosition {
    pub line: u32,
    pub column: u32,
}

/// Presence of one participant in a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AwarenessRecord {
    /// Stable across reconnects and across tabs of the same user.
    pub participant_id: String,
    pub display_name: String,
    /// CSS color string, e.g. `#E06C75`.
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    #[serde(default)]
    pub is_agent: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    #[default]
    Info,
}

/// One finding from the analysis service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Suggestion {
    /// Category reported by the service (`error`, `warning`, `style`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    /// 1-based line the finding refers to.
    #[serde(default)]
    pub line: Option<usize>,
    #[serde(default)]
    pub severity: Severity,
    /// Replacement text for `line`, when the service proposes one.
    #[serde(default)]
    pub fix: Option<String>,
}

impl Suggestion {
    /// The suggestion as a line fix, if it carries both a line and a fix.
    pub fn as_fix(&self) -> Option<LineFix> {
        match (self.line, &self.fix) {
            (Some(line), Some(text)) => Some(LineFix { line, text: text.clone() }),
            _ => None,
        }
    }
}

/// Result of one analysis request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisReport {
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
    /// Free-form statistics (`lines`, `functions`, `complexity_score`, ...).
    #[serde(default, rename = "analysis")]
    pub stats: BTreeMap<String, Value>,
}

impl AnalysisReport {
    pub fn fixes(&self) -> Vec<LineFix> {
        self.suggestions.iter().filter_map(Suggestion::as_fix).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptimizationChange {
    pub description: String,
    #[serde(default)]
    pub impact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptimizationResult {
    #[serde(rename = "optimized_code")]
    pub optimized_text: String,
    #[serde(default)]
    pub changes: Vec<OptimizationChange>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub performance_improvement: String,
}

/// Replace the 1-based `line` with `text`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineFix {
    pub line: usize,
    pub text: String,
}

impl LineFix {
    pub fn new(line: usize, text: impl Into<String>) -> Self {
        Self { line, text: text.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_payload_parses_with_sparse_suggestions() {
        let json = r#"{
            "suggestions": [
                {"type": "error", "message": "missing colon", "line": 3, "severity": "error", "fix": "def foo():"},
                {"type": "info", "message": "consider docstring"}
            ],
            "analysis": {"lines": 10, "functions": 2, "complexity_score": 75}
        }"#;

        let report: AnalysisReport = serde_json::from_str(json).expect("report should parse");
        assert_eq!(report.suggestions.len(), 2);
        assert_eq!(report.suggestions[1].severity, Severity::Info);
        assert_eq!(report.stats["functions"], 2);
        assert_eq!(report.fixes(), vec![LineFix::new(3, "def foo():")]);
    }

    #[test]
    fn awareness_record_defaults_optional_fields() {
        let record: AwarenessRecord = serde_json::from_str(
            r##"{"participant_id":"p1","display_name":"Ada","color":"#E06C75"}"##,
        )
        .expect("record should parse");
        assert!(record.cursor.is_none());
        assert!(!record.is_agent);
    }

    #[test]
    fn optimization_uses_backend_field_names() {
        let json = r#"{"optimized_code":"x = 1\n","changes":[{"description":"inline","impact":"readability"}],"summary":"tidy"}"#;
        let result: OptimizationResult = serde_json::from_str(json).expect("result should parse");
        assert_eq!(result.optimized_text, "x = 1\n");
        assert_eq!(result.changes[0].impact, "readability");
        assert!(result.performance_improvement.is_empty());
    }
}
