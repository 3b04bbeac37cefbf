use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use adprompt_products::{GenerationResult, PART1_KEY, PART2_KEY};

/// Why one model response was not accepted. Each rejection consumes one
/// attempt of the retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The raw text contains a fragment of the instruction template.
    #[error("response echoed the instruction template")]
    EchoedInstructions,

    /// The cleaned text is not a JSON object.
    #[error("response is not a JSON object: {0}")]
    MalformedJson(String),

    /// The object lacks one or both prompt fields.
    #[error("response JSON is missing field(s): {}", .missing.join(", "))]
    MissingFields {
        missing: Vec<&'static str>,
        found: Vec<String>,
    },
}

impl Rejection {
    /// Short machine-friendly label for structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::EchoedInstructions => "echoed_instructions",
            Rejection::MalformedJson(_) => "malformed_json",
            Rejection::MissingFields { .. } => "missing_fields",
        }
    }
}

/// An accepted response.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedOutput {
    /// The cleaned JSON text exactly as validated; this is what gets persisted.
    pub payload: String,
    /// The parsed object.
    pub object: Map<String, JsonValue>,
}

impl ValidatedOutput {
    /// Typed view of the two parts, when both are strings.
    pub fn result(&self) -> Option<GenerationResult> {
        let part1 = self.object.get(PART1_KEY)?.as_str()?;
        let part2 = self.object.get(PART2_KEY)?.as_str()?;
        Some(GenerationResult {
            part1: part1.to_string(),
            part2: part2.to_string(),
        })
    }
}

/// Strip markdown fences and cut the text down to its outermost JSON object.
///
/// Trims, drops a leading "```json" then a leading "```", drops a trailing
/// "```", then keeps the span from the first `{` to the last `}` when both
/// exist in that order. Otherwise the (trimmed, unfenced) text is returned.
pub fn clean_response(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    }
    if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            text = &text[start..=end];
        }
    }

    text.trim().to_string()
}

/// Structural and anti-echo checks on model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseValidator {
    echo_marker: String,
}

impl ResponseValidator {
    pub fn new(echo_marker: impl Into<String>) -> Self {
        Self {
            echo_marker: echo_marker.into(),
        }
    }

    /// Check a cleaned response, in order: echoed instructions (on the raw
    /// text), JSON object shape, required fields.
    pub fn validate(
        &self,
        cleaned: &str,
        original_raw: &str,
    ) -> Result<Map<String, JsonValue>, Rejection> {
        if original_raw.contains(&self.echo_marker) {
            return Err(Rejection::EchoedInstructions);
        }

        let object = match serde_json::from_str::<JsonValue>(cleaned) {
            Ok(JsonValue::Object(map)) => map,
            Ok(other) => {
                return Err(Rejection::MalformedJson(format!(
                    "expected an object, found {}",
                    json_type_name(&other)
                )));
            }
            Err(e) => return Err(Rejection::MalformedJson(e.to_string())),
        };

        let missing: Vec<&'static str> = [PART1_KEY, PART2_KEY]
            .into_iter()
            .filter(|key| !object.contains_key(*key))
            .collect();

        if !missing.is_empty() {
            return Err(Rejection::MissingFields {
                missing,
                found: object.keys().cloned().collect(),
            });
        }

        Ok(object)
    }

    /// Clean then validate one raw response.
    pub fn accept(&self, raw: &str) -> Result<ValidatedOutput, Rejection> {
        let payload = clean_response(raw);
        let object = self.validate(&payload, raw)?;
        Ok(ValidatedOutput { payload, object })
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
