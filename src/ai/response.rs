//! The only place model output is interpreted. Every stage decodes its reply
//! through [`decode_model_json`] into a strict schema; anything that does not
//! fit becomes an empty result, logged with the raw text.

use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Removes surrounding backtick fences and a leading `json` language tag.
pub fn strip_code_fences(raw: &str) -> &str {
    let text = raw.trim().trim_matches('`').trim();
    match text.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => {
            let rest = &text[4..];
            if rest.starts_with(char::is_whitespace) || rest.starts_with(['{', '[']) {
                rest.trim()
            } else {
                text
            }
        }
        _ => text,
    }
}

pub fn decode_model_json<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let cleaned = strip_code_fences(raw);
    match serde_json::from_str::<T>(cleaned) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, raw = %raw, "Could not decode model response");
            None
        }
    }
}

/// Article id as echoed back by the model: ids are links, but models
/// occasionally emit bare numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "RawId")]
pub struct ArticleId(pub String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawId> for ArticleId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(text) => ArticleId(text.trim().to_string()),
            RawId::Number(number) => ArticleId(number.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payload {
        groups: Vec<u32>,
    }

    #[test]
    fn strips_fences_and_language_tag() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("JSON {\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
        assert_eq!(strip_code_fences("jsonish"), "jsonish");
    }

    #[test]
    fn decodes_fenced_and_raw_payloads() {
        let fenced: Option<Payload> = decode_model_json("```json\n{\"groups\": [1, 2]}\n```");
        let raw: Option<Payload> = decode_model_json("{\"groups\": [1, 2]}");
        assert_eq!(fenced, raw);
        assert_eq!(raw, Some(Payload { groups: vec![1, 2] }));
    }

    #[test]
    fn mismatched_shape_is_none() {
        assert_eq!(decode_model_json::<Payload>("{\"assignments\": []}"), None);
        assert_eq!(decode_model_json::<Payload>("Sorry, I cannot help."), None);
        assert_eq!(decode_model_json::<Payload>(""), None);
    }

    #[test]
    fn ids_accept_strings_and_numbers() {
        let ids: Vec<ArticleId> = serde_json::from_str(r#"["http://x/1", 42, " b "]"#).unwrap();
        assert_eq!(
            ids,
            vec![
                ArticleId("http://x/1".to_string()),
                ArticleId("42".to_string()),
                ArticleId("b".to_string())
            ]
        );
    }
}
