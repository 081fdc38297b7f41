//! Extraction of `[{table_name, score}]` arrays from free-form LLM output

use serde_json::Value;

/// One judgment returned by the model
#[derive(Debug, Clone, PartialEq)]
pub struct LlmScore {
    pub id: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedScores {
    /// A JSON array was found; entries that were not usable are already dropped
    Parsed(Vec<LlmScore>),
    /// No JSON array could be recovered from the response
    Unparseable(String),
}

const ID_KEYS: [&str; 3] = ["table_name", "identifier", "id"];

/// Find the score array in `response` and read scores from it.
///
/// Models like to wrap the array in prose or a markdown fence and sometimes
/// add bracketed asides like `[0, 1]` around it. Every `[` is tried as the
/// start of a JSON array, reading only as far as that array ends. The first
/// array holding objects wins; failing that, the first array that parses.
pub fn parse_scores(response: &str) -> ParsedScores {
    let mut fallback = None;
    let mut first_error = None;

    for (offset, _) in response.match_indices('[') {
        let mut stream =
            serde_json::Deserializer::from_str(&response[offset..]).into_iter::<Vec<Value>>();
        match stream.next() {
            Some(Ok(entries)) if entries.iter().any(Value::is_object) => {
                return ParsedScores::Parsed(entries.iter().filter_map(read_entry).collect());
            }
            Some(Ok(entries)) => {
                fallback.get_or_insert(entries);
            }
            Some(Err(e)) => {
                first_error.get_or_insert(e);
            }
            None => {}
        }
    }

    if let Some(entries) = fallback {
        return ParsedScores::Parsed(entries.iter().filter_map(read_entry).collect());
    }
    let reason = first_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no JSON array in response".to_string());
    ParsedScores::Unparseable(reason)
}

fn read_entry(entry: &Value) -> Option<LlmScore> {
    let object = entry.as_object()?;

    let id = ID_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))?
        .trim();
    if id.is_empty() {
        return None;
    }

    let score = match object.get("score")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !score.is_finite() {
        return None;
    }

    Some(LlmScore {
        id: id.to_string(),
        score: score.clamp(0.0, 1.0) as f32,
    })
}
