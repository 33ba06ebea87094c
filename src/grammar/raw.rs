//! Serde model of a JSON TextMate grammar.
//!
//! Only the keys the tokenizer understands are modelled; everything else in
//! the document (`fileTypes`, `uuid`, `injections`, ...) is ignored.

use std::collections::HashMap;

use serde::Deserialize;

/// Top-level grammar document (`*.tmLanguage.json`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGrammar {
    pub scope_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub patterns: Vec<RawRule>,
    #[serde(default)]
    pub repository: HashMap<String, RawRule>,
}

/// A single rule. TextMate overloads one shape for match rules, begin/end
/// rules, begin/while rules, include references and pattern groups; the
/// compiler decides which kind it is from the keys that are present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRule {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content_name: Option<String>,
    #[serde(default, rename = "match")]
    pub match_: Option<String>,
    #[serde(default)]
    pub begin: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default, rename = "while")]
    pub while_: Option<String>,
    #[serde(default)]
    pub include: Option<String>,
    #[serde(default)]
    pub captures: Option<RawCaptures>,
    #[serde(default)]
    pub begin_captures: Option<RawCaptures>,
    #[serde(default)]
    pub end_captures: Option<RawCaptures>,
    #[serde(default)]
    pub while_captures: Option<RawCaptures>,
    #[serde(default)]
    pub patterns: Option<Vec<RawRule>>,
    #[serde(default)]
    pub repository: Option<HashMap<String, RawRule>>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub apply_end_pattern_last: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub disabled: bool,
}

/// Capture table keyed by group number (`"0"`, `"1"`, ...).
pub type RawCaptures = HashMap<String, RawRule>;

impl RawGrammar {
    /// Parses a grammar from its JSON text.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Grammars in the wild spell booleans as `true`, `1` or `"1"`.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_i64().map(|n| n != 0).unwrap_or(false),
        serde_json::Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_grammar() {
        let grammar = RawGrammar::from_json(
            r##"{
                "scopeName": "text.test",
                "patterns": [{ "include": "#word" }],
                "repository": {
                    "word": { "match": "\\w+", "name": "word.test" }
                }
            }"##,
        )
        .unwrap();

        assert_eq!(grammar.scope_name, "text.test");
        assert_eq!(grammar.patterns.len(), 1);
        assert_eq!(grammar.patterns[0].include.as_deref(), Some("#word"));
        assert_eq!(grammar.repository["word"].match_.as_deref(), Some("\\w+"));
    }

    #[test]
    fn test_parse_lenient_booleans() {
        let rule: RawRule = serde_json::from_str(
            r#"{ "begin": "a", "end": "b", "applyEndPatternLast": 1 }"#,
        )
        .unwrap();
        assert!(rule.apply_end_pattern_last);

        let rule: RawRule = serde_json::from_str(r#"{ "match": "a", "disabled": "1" }"#).unwrap();
        assert!(rule.disabled);
    }

    #[test]
    fn test_missing_scope_name_is_rejected() {
        assert!(RawGrammar::from_json(r#"{ "patterns": [] }"#).is_err());
    }
}
