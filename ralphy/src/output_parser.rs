//! Agent output parser module
//!
//! Turns an agent's newline-delimited JSON stream into an [`ExecutionResult`],
//! detects error records, and classifies single lines into a live [`Step`]
//! for progress display. Lines that are not JSON are skipped silently.

use serde_json::Value as JsonValue;

use crate::types::{DecoderProfile, ExecutionResult, Step};

/// Text an agent emits when it considers every task finished.
pub const COMPLETION_MARKER: &str = "<promise>COMPLETE</promise>";

/// Response text used when the agent produced records but no narrative.
pub const NO_TEXT_SENTINEL: &str = "Task completed";

const INPUT_COST_PER_MILLION: f64 = 3.0;
const OUTPUT_COST_PER_MILLION: f64 = 15.0;

/// Parse raw agent output accepting every known record family.
pub fn parse_result(raw: &str) -> ExecutionResult {
    DecoderProfile::Auto.decode(raw)
}

/// `true` if `text` carries the completion marker.
pub fn has_completion_marker(text: &str) -> bool {
    text.contains(COMPLETION_MARKER)
}

/// Estimate cost in USD when the agent reports tokens but no price.
pub fn estimate_cost(input_tokens: u64, output_tokens: u64) -> f64 {
    (input_tokens as f64 / 1_000_000.0) * INPUT_COST_PER_MILLION
        + (output_tokens as f64 / 1_000_000.0) * OUTPUT_COST_PER_MILLION
}

/// Accumulated state while walking the record stream
#[derive(Default)]
struct Decoded {
    result_text: Option<String>,
    fragments: String,
    input_tokens: u64,
    output_tokens: u64,
    cost: Option<f64>,
}

impl Decoded {
    fn add_cost(&mut self, cost: f64) {
        *self.cost.get_or_insert(0.0) += cost;
    }

    /// Terminal `result` record: final text plus cumulative usage.
    fn apply_result(&mut self, record: &JsonValue) {
        if let Some(text) = record.get("result").and_then(|v| v.as_str()) {
            self.result_text = Some(text.to_string());
        }
        if let Some(usage) = record.get("usage") {
            self.input_tokens = u64_field(usage, &["input_tokens", "inputTokens"]);
            self.output_tokens = u64_field(usage, &["output_tokens", "outputTokens"]);
        }
        if let Some(cost) = record
            .get("total_cost_usd")
            .or_else(|| record.get("cost_usd"))
            .and_then(|v| v.as_f64())
        {
            self.cost = Some(cost);
        }
    }

    fn apply_text(&mut self, record: &JsonValue) {
        if let Some(text) = record
            .get("part")
            .and_then(|p| p.get("text"))
            .and_then(|v| v.as_str())
        {
            self.fragments.push_str(text);
        }
    }

    /// `step_finish` records report per-step usage; sum them.
    fn apply_step_finish(&mut self, record: &JsonValue) {
        let Some(part) = record.get("part") else {
            return;
        };
        if let Some(tokens) = part.get("tokens") {
            self.input_tokens += u64_field(tokens, &["input"]);
            self.output_tokens += u64_field(tokens, &["output"]);
        }
        if let Some(cost) = part.get("cost").and_then(|v| v.as_f64()) {
            self.add_cost(cost);
        }
    }

    fn finish(self) -> ExecutionResult {
        let text = match self.result_text {
            Some(text) if !text.trim().is_empty() => text,
            _ if !self.fragments.trim().is_empty() => self.fragments,
            _ => NO_TEXT_SENTINEL.to_string(),
        };
        let cost = match self.cost {
            Some(cost) => cost,
            None => estimate_cost(self.input_tokens, self.output_tokens),
        };
        ExecutionResult {
            success: true,
            response_text: text,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cost,
            error_message: None,
        }
    }
}

fn u64_field(value: &JsonValue, keys: &[&str]) -> u64 {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_u64()))
        .unwrap_or(0)
}

fn records(raw: &str) -> impl Iterator<Item = JsonValue> + '_ {
    raw.lines().filter_map(|line| {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        serde_json::from_str::<JsonValue>(trimmed).ok()
    })
}

fn record_type(record: &JsonValue) -> Option<&str> {
    record.get("type").and_then(|v| v.as_str())
}

impl DecoderProfile {
    fn accepts_result(&self) -> bool {
        matches!(self, DecoderProfile::StreamJson | DecoderProfile::Auto)
    }

    fn accepts_text_parts(&self) -> bool {
        matches!(self, DecoderProfile::TextParts | DecoderProfile::Auto)
    }

    /// Decode a complete raw output buffer.
    ///
    /// Empty output and error records produce `success = false`; everything
    /// else is a success, possibly with the [`NO_TEXT_SENTINEL`] text.
    pub fn decode(&self, raw: &str) -> ExecutionResult {
        if raw.trim().is_empty() {
            return ExecutionResult::failure("empty output");
        }
        if let Some(message) = detect_error(raw) {
            return ExecutionResult::failure(message);
        }

        let mut decoded = Decoded::default();
        for record in records(raw) {
            match record_type(&record) {
                Some("result") if self.accepts_result() => decoded.apply_result(&record),
                Some("text") if self.accepts_text_parts() => decoded.apply_text(&record),
                Some("step_finish") if self.accepts_text_parts() => {
                    decoded.apply_step_finish(&record)
                }
                _ => {}
            }
        }
        decoded.finish()
    }
}

/// First error record's message, if any.
pub fn detect_error(raw: &str) -> Option<String> {
    records(raw).find_map(|record| {
        if record_type(&record) != Some("error") {
            return None;
        }
        let message = match record.get("error") {
            Some(JsonValue::String(s)) => Some(s.clone()),
            Some(err) => err
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            None => None,
        }
        .or_else(|| {
            record
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "Unknown agent error".to_string());
        Some(message)
    })
}

const TRACKER_FILES: &[&str] = &["prd.md", "tasks.yaml", "progress.txt"];
const LINT_KEYWORDS: &[&str] = &["lint", "eslint", "clippy", "biome", "ruff"];
const TEST_RUNNERS: &[&str] = &[
    "cargo test",
    "npm test",
    "pytest",
    "jest",
    "vitest",
    "bun test",
    "go test",
];
const TEST_PATHS: &[&str] = &[".test.", ".spec.", "_test.", "/tests/", "__tests__"];
const WRITE_TOOLS: &[&str] = &["write", "edit"];
const READ_TOOLS: &[&str] = &["read", "glob", "grep"];

/// Tool name from a streamed record: `tool`, `name`, `part.tool`, or a
/// `tool_use` block inside `message.content`.
fn tool_name(record: &JsonValue) -> Option<String> {
    let direct = record
        .get("tool")
        .or_else(|| record.get("name"))
        .or_else(|| record.get("part").and_then(|p| p.get("tool")))
        .and_then(|v| v.as_str());
    if let Some(name) = direct {
        return Some(name.to_lowercase());
    }
    record
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())
        .and_then(|blocks| {
            blocks.iter().find_map(|block| {
                if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                    block.get("name").and_then(|n| n.as_str())
                } else {
                    None
                }
            })
        })
        .map(str::to_lowercase)
}

/// Classify one output line. `None` means the displayed step should not change.
pub fn detect_step(line: &str) -> Option<Step> {
    let lower = line.to_lowercase();
    let contains_any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if lower.contains("git commit") {
        return Some(Step::Committing);
    }
    if lower.contains("git add") {
        return Some(Step::Staging);
    }
    if contains_any(TRACKER_FILES) {
        return Some(Step::UpdatingTracker);
    }
    if contains_any(LINT_KEYWORDS) {
        return Some(Step::Linting);
    }
    if contains_any(TEST_RUNNERS) {
        return Some(Step::Testing);
    }
    if contains_any(TEST_PATHS) {
        return Some(Step::WritingTests);
    }

    let record: JsonValue = serde_json::from_str(line.trim()).ok()?;
    let tool = tool_name(&record)?;
    if WRITE_TOOLS.contains(&tool.as_str()) {
        Some(Step::Implementing)
    } else if READ_TOOLS.contains(&tool.as_str()) {
        Some(Step::ReadingCode)
    } else {
        None
    }
}

/// Next displayed step after seeing `line`.
pub fn next_step(current: Step, line: &str) -> Step {
    detect_step(line).unwrap_or(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_result_record() {
        let raw = r#"{"type":"result","result":"X","usage":{"input_tokens":5,"output_tokens":7}}"#;
        let result = parse_result(raw);
        assert!(result.success);
        assert_eq!(result.response_text, "X");
        assert_eq!(result.input_tokens, 5);
        assert_eq!(result.output_tokens, 7);
        assert!(result.error_message.is_none());
    }

    #[test]
    fn test_parse_reported_cost_wins() {
        let raw = r#"{"type":"result","result":"done","usage":{"input_tokens":1000,"output_tokens":10},"total_cost_usd":0.42}"#;
        let result = parse_result(raw);
        assert!((result.cost - 0.42).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_estimates_cost_without_report() {
        let raw = r#"{"type":"result","result":"done","usage":{"input_tokens":1000000,"output_tokens":1000000}}"#;
        let result = parse_result(raw);
        assert!((result.cost - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_text_parts_protocol() {
        let raw = [
            r#"{"type":"step_start","part":{}}"#,
            r#"{"type":"text","part":{"text":"Hello "}}"#,
            "not json at all",
            r#"{"type":"text","part":{"text":"world"}}"#,
            r#"{"type":"step_finish","part":{"tokens":{"input":11,"output":22},"cost":0.01}}"#,
        ]
        .join("\n");
        let result = parse_result(&raw);
        assert!(result.success);
        assert_eq!(result.response_text, "Hello world");
        assert_eq!(result.input_tokens, 11);
        assert_eq!(result.output_tokens, 22);
        assert!((result.cost - 0.01).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_no_text_uses_sentinel() {
        let raw = r#"{"type":"system","subtype":"init"}"#;
        let result = parse_result(raw);
        assert!(result.success);
        assert_eq!(result.response_text, NO_TEXT_SENTINEL);
    }

    #[test]
    fn test_parse_non_json_only_is_textless_success() {
        let result = parse_result("warming up...\nstill going\n");
        assert!(result.success);
        assert_eq!(result.response_text, NO_TEXT_SENTINEL);
    }

    #[test]
    fn test_parse_empty_output_fails() {
        let result = parse_result("  \n\n");
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("empty output"));
    }

    #[test]
    fn test_parse_error_record_fails() {
        let raw = [
            r#"{"type":"text","part":{"text":"partial"}}"#,
            r#"{"type":"error","error":{"message":"rate limited"}}"#,
        ]
        .join("\n");
        let result = parse_result(&raw);
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_stream_json_profile_ignores_text_parts() {
        let raw = r#"{"type":"text","part":{"text":"ignored"}}"#;
        let result = DecoderProfile::StreamJson.decode(raw);
        assert_eq!(result.response_text, NO_TEXT_SENTINEL);
    }

    #[test]
    fn test_text_parts_profile_ignores_result() {
        let raw = r#"{"type":"result","result":"ignored","usage":{"input_tokens":5,"output_tokens":7}}"#;
        let result = DecoderProfile::TextParts.decode(raw);
        assert_eq!(result.response_text, NO_TEXT_SENTINEL);
        assert_eq!(result.input_tokens, 0);
    }

    #[test]
    fn test_detect_error_variants() {
        assert_eq!(
            detect_error(r#"{"type":"error","message":"boom"}"#).as_deref(),
            Some("boom")
        );
        assert_eq!(
            detect_error(r#"{"type":"error","error":"plain"}"#).as_deref(),
            Some("plain")
        );
        assert_eq!(
            detect_error(r#"{"type":"error"}"#).as_deref(),
            Some("Unknown agent error")
        );
        assert!(detect_error(r#"{"type":"result","result":"ok"}"#).is_none());
    }

    #[test]
    fn test_detect_error_returns_first() {
        let raw = "{\"type\":\"error\",\"message\":\"first\"}\n{\"type\":\"error\",\"message\":\"second\"}";
        assert_eq!(detect_error(raw).as_deref(), Some("first"));
    }

    #[test]
    fn test_detect_step_tool_names() {
        assert_eq!(detect_step(r#"{"tool":"write"}"#), Some(Step::Implementing));
        assert_eq!(detect_step(r#"{"name":"Edit"}"#), Some(Step::Implementing));
        assert_eq!(detect_step(r#"{"tool":"read"}"#), Some(Step::ReadingCode));
        assert_eq!(
            detect_step(r#"{"part":{"tool":"glob"}}"#),
            Some(Step::ReadingCode)
        );
        assert_eq!(detect_step(r#"{"tool":"GREP"}"#), Some(Step::ReadingCode));
    }

    #[test]
    fn test_detect_step_claude_tool_use_block() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Read","input":{"file_path":"src/main.rs"}}]}}"#;
        assert_eq!(detect_step(line), Some(Step::ReadingCode));
    }

    #[test]
    fn test_detect_step_precedence() {
        assert_eq!(
            detect_step(r#"{"tool":"bash","command":"git add -A && git commit -m wip"}"#),
            Some(Step::Committing)
        );
        assert_eq!(
            detect_step(r#"{"tool":"bash","command":"git add PRD.md"}"#),
            Some(Step::Staging)
        );
        assert_eq!(
            detect_step(r#"{"tool":"edit","path":"progress.txt"}"#),
            Some(Step::UpdatingTracker)
        );
        assert_eq!(
            detect_step(r#"{"tool":"bash","command":"cargo clippy && cargo test"}"#),
            Some(Step::Linting)
        );
        assert_eq!(
            detect_step(r#"{"tool":"bash","command":"npm test"}"#),
            Some(Step::Testing)
        );
        assert_eq!(
            detect_step(r#"{"tool":"write","path":"src/app.test.ts"}"#),
            Some(Step::WritingTests)
        );
    }

    #[test]
    fn test_detect_step_no_match() {
        assert_eq!(detect_step(r#"{"tool":"bash","command":"ls"}"#), None);
        assert_eq!(detect_step("plain text"), None);
        assert_eq!(detect_step(""), None);
    }

    #[test]
    fn test_next_step_keeps_previous_on_no_match() {
        let step = next_step(Step::Implementing, "nothing interesting");
        assert_eq!(step, Step::Implementing);
        let step = next_step(step, r#"{"tool":"read"}"#);
        assert_eq!(step, Step::ReadingCode);
    }

    #[test]
    fn test_completion_marker() {
        assert!(has_completion_marker("All done <promise>COMPLETE</promise>"));
        assert!(!has_completion_marker("<promise>INCOMPLETE</promise>"));
    }

    #[test]
    fn test_estimate_cost() {
        assert_eq!(estimate_cost(0, 0), 0.0);
        assert!((estimate_cost(2_000_000, 0) - 6.0).abs() < 1e-9);
        assert!((estimate_cost(0, 100_000) - 1.5).abs() < 1e-9);
    }
}
