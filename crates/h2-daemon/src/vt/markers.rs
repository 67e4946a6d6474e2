/// Harness-specific "working" marker table (§4.1: "table of markers
/// configured per harness"). The spec leaves the exact set an open
/// question (§9); this is a small built-in table covering the harnesses
/// named in §1, with `generic` carrying none so idle classification
/// degrades to quiescence + cursor stillness alone.
pub fn markers_for_harness(harness: &str) -> Vec<&'static str> {
    match harness {
        "claude-code" => vec!["esc to interrupt", "Thinking…"],
        "codex" => vec!["Esc to interrupt", "Working"],
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claude_code_markers() {
        assert!(markers_for_harness("claude-code").contains(&"esc to interrupt"));
    }

    #[test]
    fn test_unknown_harness_has_no_markers() {
        assert!(markers_for_harness("generic").is_empty());
        assert!(markers_for_harness("some-future-cli").is_empty());
    }
}
