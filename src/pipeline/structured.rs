//! Structured record extraction: merged text + field table → cleaned
//! [`StructuredRecord`]s.
//!
//! The model is asked for JSON but rarely returns only JSON, so parsing is a
//! ladder of recovery strategies (direct parse, fenced block, outermost
//! brace/bracket span). Whatever survives goes through a deterministic
//! cleaner:
//!
//! - values are trimmed and empty ones dropped
//! - numeric-looking values become canonical digits (`"1.570.000"` → `"1570000"`)
//! - localised enumerations become canonical tokens (`"Trả trước"` → `"prepaid"`)
//! - records without the key field are dropped
//! - a key seen twice keeps its first record
//!
//! Nothing here is fatal. An unusable response yields zero records and a
//! [`StageWarning`].

use crate::error::{Stage, StageWarning};
use crate::prompts::{extraction_system_prompt, extraction_user_prompt};
use crate::schema::{FieldKind, FieldTable, StructuredRecord};
use crate::services::llm::LanguageModel;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one extraction call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub records: Vec<StructuredRecord>,
    pub warnings: Vec<StageWarning>,
    pub dropped_missing_key: usize,
    pub dropped_duplicates: usize,
}

pub struct StructuredExtractor {
    model: Arc<dyn LanguageModel>,
}

impl StructuredExtractor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Extract records from `text` according to `table`.
    pub async fn extract(&self, text: &str, table: &FieldTable) -> ExtractionOutcome {
        if text.trim().is_empty() {
            debug!("extract: empty text, skipping model call");
            return ExtractionOutcome::default();
        }

        let raw = match self
            .model
            .complete(
                &extraction_system_prompt(table),
                &extraction_user_prompt(text),
                0.0,
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!("extract: model call failed: {}", e);
                return ExtractionOutcome {
                    warnings: vec![StageWarning::new(
                        Stage::Extract,
                        format!("model call failed: {e}"),
                    )],
                    ..Default::default()
                };
            }
        };

        let Some(candidates) = parse_candidates(&raw) else {
            warn!("extract: response is not JSON ({} chars)", raw.len());
            return ExtractionOutcome {
                warnings: vec![StageWarning::new(
                    Stage::Extract,
                    format!("unparsable model response: {}", preview(&raw)),
                )],
                ..Default::default()
            };
        };

        let outcome = clean_records(candidates, table);
        info!(
            "extract: {} records ({} without key, {} duplicates dropped)",
            outcome.records.len(),
            outcome.dropped_missing_key,
            outcome.dropped_duplicates
        );
        outcome
    }
}

fn preview(raw: &str) -> String {
    let one_line = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    match one_line.char_indices().nth(80) {
        Some((i, _)) => format!("{}…", &one_line[..i]),
        None => one_line,
    }
}

// ── JSON recovery ────────────────────────────────────────────────────────────

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").expect("valid regex"));

/// Recover a JSON value from a model response.
pub fn recover_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }
    if let Some(caps) = RE_FENCED.captures(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(caps[1].trim()) {
            return Some(v);
        }
    }

    let span = |open: char, close: char| -> Option<(usize, &str)> {
        let start = trimmed.find(open)?;
        let end = trimmed.rfind(close)?;
        (end > start).then(|| (start, &trimmed[start..=end]))
    };
    let mut spans: Vec<(usize, &str)> = [span('{', '}'), span('[', ']')]
        .into_iter()
        .flatten()
        .collect();
    spans.sort_by_key(|(start, _)| *start);
    spans
        .into_iter()
        .find_map(|(_, s)| serde_json::from_str::<Value>(s).ok())
}

/// Candidate record objects in a model response, or `None` when the
/// response holds no usable JSON.
pub fn parse_candidates(raw: &str) -> Option<Vec<Map<String, Value>>> {
    let value = recover_json(raw)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => {
            let listed = ["packages", "records", "items"]
                .iter()
                .find_map(|k| match obj.remove(*k) {
                    Some(Value::Array(a)) => Some(a),
                    _ => None,
                });
            match listed {
                Some(items) => items,
                None => vec![Value::Object(obj)],
            }
        }
        _ => return None,
    };
    Some(
        items
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(m) => Some(m),
                _ => None,
            })
            .collect(),
    )
}

// ── Cleaning ─────────────────────────────────────────────────────────────────

/// Clean candidate objects into records.
pub fn clean_records(candidates: Vec<Map<String, Value>>, table: &FieldTable) -> ExtractionOutcome {
    let key_name = table.key().name.clone();
    let mut seen = HashSet::new();
    let mut outcome = ExtractionOutcome::default();

    for candidate in candidates {
        let flat = flatten(candidate);
        let mut name: Option<String> = None;
        let mut record = StructuredRecord::new(String::new());

        for (raw_field, raw_value) in flat {
            let Some(text) = value_to_text(&raw_value) else {
                continue;
            };
            match table.lookup(&raw_field) {
                Some(spec) if spec.name == key_name => {
                    let key = text.trim();
                    if !key.is_empty() && name.is_none() {
                        name = Some(key.to_string());
                    }
                }
                Some(spec) => {
                    if let Some(v) = normalise_value(spec.kind, &text) {
                        record.fields.entry(spec.name.clone()).or_insert(v);
                    }
                }
                None => {
                    let field = raw_field.trim();
                    if field.is_empty() {
                        continue;
                    }
                    if let Some(v) = normalise_value(FieldKind::Text, &text) {
                        record.extra.entry(field.to_string()).or_insert(v);
                    }
                }
            }
        }

        let Some(name) = name else {
            outcome.dropped_missing_key += 1;
            continue;
        };
        if !seen.insert(name.clone()) {
            debug!("extract: duplicate key '{}' discarded", name);
            outcome.dropped_duplicates += 1;
            continue;
        }
        record.name = name;
        if record.has_unknown_fields() {
            debug!(
                "extract: '{}' has fields outside the table: {:?}",
                record.name,
                record.extra.keys().collect::<Vec<_>>()
            );
        }
        outcome.records.push(record);
    }

    outcome
}

/// Top-level entries first, then entries of nested `attributes` / `metadata`
/// objects, preserving order.
fn flatten(obj: Map<String, Value>) -> Vec<(String, Value)> {
    let mut top = Vec::new();
    let mut nested = Vec::new();
    for (k, v) in obj {
        match (k.as_str(), v) {
            ("attributes" | "metadata", Value::Object(inner)) => nested.extend(inner),
            (_, v) => top.push((k, v)),
        }
    }
    top.extend(nested);
    top
}

fn value_to_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("yes".into()),
        Value::Bool(false) => Some("no".into()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_to_text).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Object(_) => Some(v.to_string()),
    }
}

static RE_NUMERIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+(?:[.,]\d+)*)\s*(?:đ|đồng|vnđ|vnd|₫)?$").expect("valid regex")
});
static RE_THOUSANDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(?:([.,])\d{3})(?:[.,]\d{3})*$").expect("valid regex"));
static RE_DECIMAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+[.,]\d+$").expect("valid regex"));
static RE_LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:[.,]\d+)*)\b").expect("valid regex"));

/// Canonical digits for a numeric-looking string, or `None`.
pub fn canonical_number(raw: &str) -> Option<String> {
    let caps = RE_NUMERIC.captures(raw.trim())?;
    canonical_digits(&caps[1])
}

fn canonical_digits(number: &str) -> Option<String> {
    if RE_THOUSANDS.is_match(number) {
        let digits: String = number.chars().filter(char::is_ascii_digit).collect();
        return digits.parse::<u128>().ok().map(|n| n.to_string());
    }
    if RE_DECIMAL.is_match(number) {
        return Some(number.replace(',', "."));
    }
    number.parse::<u128>().ok().map(|n| n.to_string())
}

fn canonical_enum(raw: &str) -> Option<&'static str> {
    let lowered = raw.trim().to_lowercase();
    let token = match lowered.as_str() {
        "không giới hạn" | "khong gioi han" | "unlimited" => "unlimited",
        "có" | "co" | "yes" => "yes",
        "không" | "khong" | "no" => "no",
        "trả trước" | "tra truoc" | "prepaid" => "prepaid",
        "trả sau" | "tra sau" | "postpaid" => "postpaid",
        _ => return None,
    };
    Some(token)
}

/// Normalise one value; `None` when nothing is left.
pub fn normalise_value(kind: FieldKind, raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(token) = canonical_enum(trimmed) {
        return Some(token.to_string());
    }
    if let Some(n) = canonical_number(trimmed) {
        return Some(n);
    }
    if kind == FieldKind::Integer {
        if let Some(n) = RE_LEADING_NUMBER
            .captures(trimmed)
            .and_then(|c| canonical_digits(&c[1]))
        {
            return Some(n);
        }
    }
    Some(trimmed.to_string())
}
