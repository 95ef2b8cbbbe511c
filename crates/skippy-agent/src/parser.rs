//! Dual-channel response parsing.
//!
//! The raw model output is split at the first out-of-band block marker; the
//! prefix is the JSON envelope candidate, the suffix carries file/patch
//! payloads that would otherwise need JSON escaping. The JSON side goes
//! through layered recovery: direct parse, fence/wrapper stripping, candidate
//! scanning with a string-aware brace matcher, structural repair, and a
//! field-by-field regex fallback.

use std::sync::OnceLock;

use regex::Regex;

use crate::envelope::{normalize_envelope, ControlEnvelope};

pub const FILE_START: &str = "===SKIPPY_FILE_START:";
pub const FILE_END: &str = "===SKIPPY_FILE_END===";
pub const PATCH_START: &str = "===SKIPPY_PATCH_START:";
pub const PATCH_END: &str = "===SKIPPY_PATCH_END===";
const FIND_MARK: &str = "===FIND===";
const REPLACE_MARK: &str = "===REPLACE===";

#[derive(Debug, Clone, PartialEq)]
pub struct FileBlock {
    pub path: String,
    /// Verbatim: everything between the start-marker line and the end
    /// marker, trailing newline included.
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchChange {
    pub find: String,
    pub replace: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchBlock {
    pub path: String,
    pub changes: Vec<PatchChange>,
}

#[derive(Debug, Default, Clone)]
pub struct OutOfBand {
    pub file_blocks: Vec<FileBlock>,
    pub patch_blocks: Vec<PatchBlock>,
}

#[derive(Debug)]
pub enum ParseOutcome {
    Parsed {
        envelope: ControlEnvelope,
        blocks: OutOfBand,
        /// True when anything past the direct parse was needed. Surfaced to
        /// the model as a `_system` warning so it learns to emit clean JSON.
        repaired: bool,
    },
    /// JSON parsed but carried none of actions/final_answer/continue.
    MissingControlFields { blocks: OutOfBand },
    /// Nothing extractable by any strategy.
    NoJson,
}

pub fn parse_response(raw: &str) -> ParseOutcome {
    let (json_part, blocks) = split_blocks(raw);
    match extract_json(json_part) {
        Some((value, repaired)) => match normalize_envelope(value) {
            Some(envelope) => ParseOutcome::Parsed {
                envelope,
                blocks,
                repaired,
            },
            None => ParseOutcome::MissingControlFields { blocks },
        },
        None => ParseOutcome::NoJson,
    }
}

// --- out-of-band blocks ----------------------------------------------------

/// Split the raw buffer at the first block delimiter and parse the suffix.
pub fn split_blocks(raw: &str) -> (&str, OutOfBand) {
    let first = [raw.find(FILE_START), raw.find(PATCH_START)]
        .into_iter()
        .flatten()
        .min();
    let Some(cut) = first else {
        return (raw, OutOfBand::default());
    };
    let (prefix, suffix) = raw.split_at(cut);
    (prefix, parse_blocks(suffix))
}

fn parse_blocks(mut rest: &str) -> OutOfBand {
    let mut out = OutOfBand::default();
    loop {
        let next_file = rest.find(FILE_START);
        let next_patch = rest.find(PATCH_START);
        match (next_file, next_patch) {
            (Some(f), p) if p.is_none_or(|p| f < p) => {
                let Some((block, remainder)) = parse_file_block(&rest[f..]) else {
                    break;
                };
                out.file_blocks.push(block);
                rest = remainder;
            }
            (_, Some(p)) => {
                let Some((block, remainder)) = parse_patch_block(&rest[p..]) else {
                    break;
                };
                out.patch_blocks.push(block);
                rest = remainder;
            }
            _ => break,
        }
    }
    out
}

/// `===SKIPPY_FILE_START:<path>===\n<content>===SKIPPY_FILE_END===`
fn parse_file_block(s: &str) -> Option<(FileBlock, &str)> {
    let after_start = &s[FILE_START.len()..];
    let path_end = after_start.find("===")?;
    let path = after_start[..path_end].trim().to_string();
    let mut body = &after_start[path_end + 3..];
    body = body.strip_prefix('\n').unwrap_or(body);
    let end = body.find(FILE_END)?;
    let content = body[..end].to_string();
    Some((FileBlock { path, content }, &body[end + FILE_END.len()..]))
}

/// `===SKIPPY_PATCH_START:<path>===` followed by one or more
/// `===FIND===` / `===REPLACE===` pairs, closed by `===SKIPPY_PATCH_END===`.
fn parse_patch_block(s: &str) -> Option<(PatchBlock, &str)> {
    let after_start = &s[PATCH_START.len()..];
    let path_end = after_start.find("===")?;
    let path = after_start[..path_end].trim().to_string();
    let body_start = &after_start[path_end + 3..];
    let end = body_start.find(PATCH_END)?;
    let body = &body_start[..end];
    let remainder = &body_start[end + PATCH_END.len()..];

    let mut changes = Vec::new();
    for pair in body.split(FIND_MARK).skip(1) {
        let Some((find_part, replace_part)) = pair.split_once(REPLACE_MARK) else {
            continue;
        };
        changes.push(PatchChange {
            find: strip_edge_newlines(find_part),
            replace: strip_edge_newlines(replace_part),
        });
    }
    if changes.is_empty() {
        return None;
    }
    Some((PatchBlock { path, changes }, remainder))
}

/// Markers are line-oriented: drop the newline that follows the marker and
/// the one that precedes the next.
fn strip_edge_newlines(s: &str) -> String {
    let s = s.strip_prefix('\n').unwrap_or(s);
    let s = s.strip_suffix('\n').unwrap_or(s);
    s.to_string()
}

// --- layered JSON extraction ----------------------------------------------

/// Returns the parsed value and whether recovery beyond the direct parse
/// was needed.
fn extract_json(candidate: &str) -> Option<(serde_json::Value, bool)> {
    let trimmed = candidate.trim();
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some((v, false));
    }
    if let Some(v) = parse_unwrapped(trimmed) {
        return Some((v, true));
    }
    if let Some(v) = scan_candidates(trimmed) {
        return Some((v, true));
    }
    if let Some(v) = repair_and_parse(trimmed) {
        return Some((v, true));
    }
    regex_fallback(trimmed).map(|v| (v, true))
}

/// Strip code fences and XML-ish wrappers, then retry the direct parse.
fn parse_unwrapped(s: &str) -> Option<serde_json::Value> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    static XML: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("fence regex")
    });
    let xml = XML.get_or_init(|| {
        Regex::new(r"(?s)<([a-zA-Z_][a-zA-Z0-9_]*)>\s*(.*?)\s*</([a-zA-Z_][a-zA-Z0-9_]*)>")
            .expect("xml regex")
    });

    if let Some(caps) = fence.captures(s) {
        if let Ok(v) = serde_json::from_str(caps.get(1)?.as_str()) {
            return Some(v);
        }
    }
    if let Some(caps) = xml.captures(s) {
        if let Ok(v) = serde_json::from_str(caps.get(2)?.as_str()) {
            return Some(v);
        }
    }
    None
}

/// Try every `{` / `[` start position, extracting a balanced slice with a
/// matcher that respects string literals and escapes. A candidate that
/// normalizes into an envelope wins immediately; otherwise the first parse
/// is kept as a fallback.
fn scan_candidates(s: &str) -> Option<serde_json::Value> {
    let mut fallback: Option<serde_json::Value> = None;
    for (idx, ch) in s.char_indices() {
        if ch != '{' && ch != '[' {
            continue;
        }
        let Some(slice) = balanced_slice(&s[idx..]) else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(slice) else {
            continue;
        };
        if looks_like_envelope(&value) {
            return Some(value);
        }
        // An empty container is never the envelope; don't let a stray `[]`
        // or `{}` in prose shadow a repairable response.
        let trivial = matches!(&value, serde_json::Value::Array(a) if a.is_empty())
            || matches!(&value, serde_json::Value::Object(o) if o.is_empty());
        if !trivial {
            fallback.get_or_insert(value);
        }
    }
    fallback
}

fn looks_like_envelope(v: &serde_json::Value) -> bool {
    match v {
        serde_json::Value::Object(map) => {
            map.contains_key("actions")
                || map.contains_key("final_answer")
                || map.contains_key("continue")
                || map.contains_key("tool")
        }
        serde_json::Value::Array(items) => items.iter().any(looks_like_envelope),
        _ => false,
    }
}

/// The shortest balanced prefix starting at a `{` or `[`, or `None` if the
/// brackets never close.
fn balanced_slice(s: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&s[..idx + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Structural repair: quote unquoted keys, drop trailing commas, close an
/// unterminated string, and close unmatched brackets from a stack.
fn repair_and_parse(s: &str) -> Option<serde_json::Value> {
    let start = s.find(['{', '['])?;
    let repaired = repair_json(&s[start..]);
    serde_json::from_str(&repaired).ok()
}

fn repair_json(s: &str) -> String {
    static UNQUOTED_KEY: OnceLock<Regex> = OnceLock::new();
    static TRAILING_COMMA: OnceLock<Regex> = OnceLock::new();
    let unquoted = UNQUOTED_KEY.get_or_init(|| {
        Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)(\s*:)"#).expect("key regex")
    });
    let trailing = TRAILING_COMMA
        .get_or_init(|| Regex::new(r",\s*([}\]])").expect("comma regex"));

    let mut out = unquoted.replace_all(s, "$1\"$2\"$3").into_owned();
    out = trailing.replace_all(&out, "$1").into_owned();

    // Balance pass over the key-quoted text.
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in out.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }
    if in_string {
        out.push('"');
    }
    // A dangling comma left right before the closers we are about to add.
    while out.trim_end().ends_with(',') {
        out = out.trim_end().trim_end_matches(',').to_string();
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// Last resort: pull individual fields out by regex. Actions are not
/// recoverable this way; a final answer or continue flag usually is.
fn regex_fallback(s: &str) -> Option<serde_json::Value> {
    static FINAL: OnceLock<Regex> = OnceLock::new();
    static CONT: OnceLock<Regex> = OnceLock::new();
    static REASON: OnceLock<Regex> = OnceLock::new();
    let final_re = FINAL.get_or_init(|| {
        Regex::new(r#""final_answer"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("final regex")
    });
    let cont_re = CONT
        .get_or_init(|| Regex::new(r#""continue"\s*:\s*(true|false)"#).expect("cont regex"));
    let reason_re = REASON.get_or_init(|| {
        Regex::new(r#""reasoning"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("reason regex")
    });

    let final_answer = final_re.captures(s).map(|c| unescape(&c[1]));
    let continue_ = cont_re.captures(s).map(|c| &c[1] == "true");
    let reasoning = reason_re.captures(s).map(|c| unescape(&c[1]));

    if final_answer.is_none() && continue_.is_none() {
        return None;
    }
    Some(serde_json::json!({
        "reasoning": reasoning.unwrap_or_default(),
        "actions": [],
        "final_answer": final_answer.unwrap_or_default(),
        "continue": continue_.unwrap_or(false),
    }))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{"reasoning": "r", "actions": [], "final_answer": "4", "continue": false}"#;

    fn parsed(raw: &str) -> (ControlEnvelope, OutOfBand, bool) {
        match parse_response(raw) {
            ParseOutcome::Parsed {
                envelope,
                blocks,
                repaired,
            } => (envelope, blocks, repaired),
            other => panic!("expected Parsed, got {other:?}"),
        }
    }

    #[test]
    fn direct_parse_is_not_flagged_as_repaired() {
        let (env, _, repaired) = parsed(VALID);
        assert_eq!(env.final_answer, "4");
        assert!(!repaired);
    }

    #[test]
    fn fenced_json_parses_with_repair_flag() {
        let raw = format!("Here you go:\n```json\n{VALID}\n```\n");
        let (env, _, repaired) = parsed(&raw);
        assert_eq!(env.final_answer, "4");
        assert!(repaired);
    }

    #[test]
    fn trailing_prose_after_envelope_is_tolerated() {
        let raw = format!("{VALID}\nHope that helps!");
        let (env, _, _) = parsed(&raw);
        assert_eq!(env.final_answer, "4");
    }

    #[test]
    fn leading_prose_before_envelope_is_tolerated() {
        let raw = format!("Sure, here's my response: {VALID}");
        let (env, _, _) = parsed(&raw);
        assert_eq!(env.final_answer, "4");
    }

    #[test]
    fn brace_matching_ignores_braces_inside_strings() {
        let raw = r#"{"actions": [], "final_answer": "use {curly} braces", "continue": false}"#;
        let (env, _, _) = parsed(raw);
        assert_eq!(env.final_answer, "use {curly} braces");
    }

    #[test]
    fn trailing_comma_is_repaired() {
        let raw = r#"{"actions": [], "final_answer": "ok", "continue": false,}"#;
        let (env, _, repaired) = parsed(raw);
        assert_eq!(env.final_answer, "ok");
        assert!(repaired);
    }

    #[test]
    fn unquoted_keys_are_repaired() {
        let raw = r#"{actions: [], final_answer: "ok", continue: false}"#;
        let (env, _, _) = parsed(raw);
        assert_eq!(env.final_answer, "ok");
    }

    #[test]
    fn truncated_envelope_is_closed_from_the_stack() {
        let raw = r#"{"actions": [{"tool": "bash", "arguments": {"command": "ls""#;
        let (env, _, repaired) = parsed(raw);
        assert!(repaired);
        assert_eq!(env.actions.len(), 1);
        assert_eq!(env.actions[0].tool, "bash");
    }

    #[test]
    fn regex_fallback_recovers_final_answer() {
        // Broken beyond structural repair: quote chaos around the fields.
        let raw = r#"reasoning garbage " } ] {{{ "final_answer": "rescued", "continue": false"#;
        let (env, _, repaired) = parsed(raw);
        assert_eq!(env.final_answer, "rescued");
        assert!(repaired);
    }

    #[test]
    fn bare_action_array_and_envelope_normalize_identically() {
        let env_raw = r#"{"actions": [{"type": "tool_call", "tool": "file",
            "arguments": {"filepath": "/a"}, "reasoning": ""}],
            "final_answer": "", "continue": true}"#;
        let arr_raw = r#"[{"tool": "file", "arguments": {"filepath": "/a"}}]"#;
        let obj_raw = r#"{"tool": "file", "arguments": {"filepath": "/a"}}"#;
        let (a, _, _) = parsed(env_raw);
        let (b, _, _) = parsed(arr_raw);
        let (c, _, _) = parsed(obj_raw);
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn no_json_at_all() {
        assert!(matches!(
            parse_response("I cannot do that, sorry."),
            ParseOutcome::NoJson
        ));
    }

    #[test]
    fn object_without_control_fields_requests_retry() {
        assert!(matches!(
            parse_response(r#"{"thoughts": "hmm"}"#),
            ParseOutcome::MissingControlFields { .. }
        ));
    }

    #[test]
    fn file_block_content_is_verbatim_with_trailing_newline() {
        let raw = format!(
            "{}\n===SKIPPY_FILE_START:/tmp/x.py===\ndef f():\n  return 1\n===SKIPPY_FILE_END===",
            r#"{"actions": [{"tool": "file", "arguments": {"op": "write", "filepath": "/tmp/x.py"}}], "continue": true}"#
        );
        let (_, blocks, _) = parsed(&raw);
        assert_eq!(blocks.file_blocks.len(), 1);
        assert_eq!(blocks.file_blocks[0].path, "/tmp/x.py");
        assert_eq!(blocks.file_blocks[0].content, "def f():\n  return 1\n");
    }

    #[test]
    fn patch_block_pairs_parse() {
        let raw = format!(
            "{VALID}\n===SKIPPY_PATCH_START:/tmp/a.txt===\n===FIND===\nold text\n===REPLACE===\nnew text\n===FIND===\nsecond\n===REPLACE===\n2nd\n===SKIPPY_PATCH_END===",
        );
        let (_, blocks, _) = parsed(&raw);
        let patch = &blocks.patch_blocks[0];
        assert_eq!(patch.path, "/tmp/a.txt");
        assert_eq!(patch.changes.len(), 2);
        assert_eq!(patch.changes[0].find, "old text");
        assert_eq!(patch.changes[0].replace, "new text");
        assert_eq!(patch.changes[1].find, "second");
        assert_eq!(patch.changes[1].replace, "2nd");
    }

    #[test]
    fn multiple_blocks_of_mixed_kinds() {
        let raw = format!(
            "{VALID}\n===SKIPPY_FILE_START:/a===\nA\n===SKIPPY_FILE_END===\n===SKIPPY_PATCH_START:/b===\n===FIND===\nx\n===REPLACE===\ny\n===SKIPPY_PATCH_END===\n===SKIPPY_FILE_START:/c===\nC\n===SKIPPY_FILE_END==="
        );
        let (_, blocks, _) = parsed(&raw);
        assert_eq!(blocks.file_blocks.len(), 2);
        assert_eq!(blocks.patch_blocks.len(), 1);
        assert_eq!(blocks.file_blocks[1].path, "/c");
    }
}
