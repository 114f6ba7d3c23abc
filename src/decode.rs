//! Turns one raw model answer into a canonical [`ActionRecord`].
//!
//! Providers wrap the JSON payload in all sorts of clothing: reasoning
//! blocks, `<answer>` tags, GLM box markers, markdown fences, or plain
//! prose. The decoder peels all of that off, extracts the first balanced
//! JSON object, and validates it against the action contract.

use thiserror::Error;

use crate::action::{ActionKind, ActionRecord};

const REQUIRED_KEYS: [&str; 4] = ["plan", "next_action", "args", "done"];

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("No JSON object found in model output")]
    NoJson { cleaned: String },

    #[error("Invalid JSON from model: {message}")]
    Json {
        message: String,
        raw: String,
        cleaned: String,
    },

    #[error("Expected a JSON object at the top level")]
    NotAnObject,

    #[error("Missing keys: {keys}")]
    MissingKeys { keys: String },

    #[error("Invalid next_action: {kind}")]
    UnknownKind { kind: String },

    #[error("args must be an object")]
    ArgsNotObject,

    #[error("done must be a boolean")]
    DoneNotBool,

    #[error("When done:true, next_action must be NONE (got {kind})")]
    DoneRequiresNoOp { kind: &'static str },

    #[error("{kind} not allowed when {backend} targeting is disabled")]
    KindDisabled {
        kind: &'static str,
        backend: &'static str,
    },
}

/// Gates for action kinds that need an optional targeting backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderOptions {
    pub allow_click_text: bool,
    pub allow_control_tree: bool,
}

#[derive(Debug, Default)]
pub struct ResponseDecoder {
    opts: DecoderOptions,
}

impl ResponseDecoder {
    pub fn new(opts: DecoderOptions) -> Self {
        Self { opts }
    }

    /// Decode one raw answer. Never touches the OS, screen, or disk.
    pub fn decode(&self, raw: &str) -> Result<ActionRecord, DecodeError> {
        let cleaned = clean_model_text(raw);

        // Fast path: the answer may already be clean structured data.
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&cleaned) {
            return self.validate(value);
        }

        let json_text = extract_json_object(&cleaned).ok_or_else(|| DecodeError::NoJson {
            cleaned: cleaned.clone(),
        })?;
        let value: serde_json::Value =
            serde_json::from_str(json_text).map_err(|e| DecodeError::Json {
                message: e.to_string(),
                raw: raw.to_string(),
                cleaned: cleaned.clone(),
            })?;
        self.validate(value)
    }

    fn validate(&self, value: serde_json::Value) -> Result<ActionRecord, DecodeError> {
        let obj = match value {
            serde_json::Value::Object(map) => map,
            _ => return Err(DecodeError::NotAnObject),
        };

        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|k| !obj.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            return Err(DecodeError::MissingKeys {
                keys: missing.join(", "),
            });
        }

        let kind = match &obj["next_action"] {
            serde_json::Value::String(s) => {
                ActionKind::from_wire(s).ok_or_else(|| DecodeError::UnknownKind {
                    kind: s.clone(),
                })?
            }
            other => {
                return Err(DecodeError::UnknownKind {
                    kind: other.to_string(),
                })
            }
        };

        let args = match &obj["args"] {
            serde_json::Value::Object(map) => map.clone(),
            _ => return Err(DecodeError::ArgsNotObject),
        };

        let done = obj["done"].as_bool().ok_or(DecodeError::DoneNotBool)?;

        // A finishing step must not carry a side effect.
        if done && kind != ActionKind::NoOp {
            return Err(DecodeError::DoneRequiresNoOp {
                kind: kind.wire_name(),
            });
        }

        if kind == ActionKind::ClickText && !self.opts.allow_click_text {
            return Err(DecodeError::KindDisabled {
                kind: kind.wire_name(),
                backend: "text",
            });
        }
        if matches!(kind, ActionKind::UiaInvoke | ActionKind::UiaSetValue)
            && !self.opts.allow_control_tree
        {
            return Err(DecodeError::KindDisabled {
                kind: kind.wire_name(),
                backend: "control-tree",
            });
        }

        // `plan` is advisory; tolerate non-string values by rendering them.
        let plan = match &obj["plan"] {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let say = obj.get("say").and_then(|v| v.as_str()).map(str::to_owned);

        Ok(ActionRecord {
            plan,
            say,
            kind,
            args,
            done,
        })
    }
}

// ── Text cleanup ─────────────────────────────────────────────────────────────

/// Strip provider wrappers down to the text that should contain the JSON
/// object. Absence of any wrapper is not an error.
fn clean_model_text(raw: &str) -> String {
    let mut text = raw.trim().to_string();

    // Keep only the innermost <answer> region when the tags are present;
    // otherwise drop <think> reasoning blocks wholesale.
    if let Some(open) = text.rfind("<answer>") {
        let after = &text[open + "<answer>".len()..];
        text = match after.find("</answer>") {
            Some(close) => after[..close].trim().to_string(),
            // Truncated answer: take what is there.
            None => after.trim().to_string(),
        };
    } else {
        text = strip_tag_blocks(&text, "<think>", "</think>");
    }

    text = text
        .replace("<|begin_of_box|>", "")
        .replace("<|end_of_box|>", "");

    if let Some(inner) = strip_code_fence(&text) {
        text = inner;
    }

    text.trim().to_string()
}

/// Remove every `open…close` span; an unterminated block swallows the tail.
fn strip_tag_blocks(text: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(open) {
        out.push_str(&rest[..start]);
        match rest[start + open.len()..].find(close) {
            Some(end) => rest = &rest[start + open.len() + end + close.len()..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Return the content of the first fenced block, minus a `json` language tag.
///
/// A fence opening after the first `{` is assumed to sit inside the payload
/// (e.g. backticks in a string value) and is left for the brace scan to
/// ignore.
fn strip_code_fence(text: &str) -> Option<String> {
    let start = text.find("```")?;
    if text.find('{').is_some_and(|brace| brace < start) {
        return None;
    }
    let body = &text[start + 3..];
    let end = body.find("```")?;
    let mut inner = body[..end].trim();
    if let Some(tagged) = inner.strip_prefix("json") {
        inner = tagged.trim_start();
    }
    Some(inner.to_string())
}

// ── JSON extraction ──────────────────────────────────────────────────────────

/// Locate the first syntactically complete JSON object via a string-aware,
/// nesting-aware brace scan. Braces inside string literals do not count,
/// and an opening brace that never balances is skipped in favor of the
/// next candidate.
fn extract_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut from = 0usize;
    while let Some(rel) = text[from..].find('{') {
        let start = from + rel;
        if let Some(end) = balanced_object_end(bytes, start) {
            return Some(&text[start..=end]);
        }
        from = start + 1;
    }
    None
}

/// Index of the `}` closing the object opened at `start`, or `None` if the
/// object never balances before the end of input.
fn balanced_object_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0u32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
