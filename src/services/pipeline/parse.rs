//! Lenient decoding of JSON answers from local models.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

/// The JSON object in a model reply: a fenced ```json block first, else the
/// outermost `{...}` span. Trailing commas are tolerated.
pub(crate) fn json_object(text: &str) -> Option<Map<String, Value>> {
    static FENCE_RE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE_RE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("valid regex"));

    let fenced = fence
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str());
    let candidate = fenced.or_else(|| outermost_braces(text))?;
    parse_object(candidate).or_else(|| parse_object(&strip_trailing_commas(candidate)))
}

fn outermost_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn strip_trailing_commas(json: &str) -> String {
    static TRAILING_RE: OnceLock<Regex> = OnceLock::new();
    let re = TRAILING_RE.get_or_init(|| Regex::new(r",\s*([}\]])").expect("valid regex"));
    re.replace_all(json, "$1").into_owned()
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn get_bool(map: &Map<String, Value>, key: &str) -> Option<bool> {
    match map.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "はい" => Some(true),
            "false" | "no" | "いいえ" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// A 0.0-1.0 score given as a number or a numeric string.
fn get_score(map: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = match map.get(key)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then(|| value.clamp(0.0, 1.0))
}

fn get_text(map: &Map<String, Value>, key: &str) -> Option<String> {
    let text = match map.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => return None,
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MatchVerdict {
    pub is_match: bool,
    pub confidence: f64,
    pub reason: Option<String>,
}

/// Decodes a match-check reply. Unparseable replies fall back to a keyword
/// test with confidence 0.5.
pub(crate) fn parse_match(text: &str) -> MatchVerdict {
    if let Some(map) = json_object(text) {
        return MatchVerdict {
            is_match: get_bool(&map, "is_match")
                .or_else(|| get_bool(&map, "is_relevant"))
                .unwrap_or(false),
            confidence: get_score(&map, "confidence").unwrap_or(0.0),
            reason: get_text(&map, "reason"),
        };
    }
    let lower = text.to_lowercase();
    MatchVerdict {
        is_match: lower.contains("is_match") && lower.contains("true"),
        confidence: 0.5,
        reason: Some("JSON parsing failed".to_string()),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Extraction {
    pub name: Option<String>,
    pub organization_type: Option<String>,
    pub contact_info: Option<String>,
    pub activities: Option<String>,
    pub disease_specificity: Option<f64>,
    pub confidence: Option<f64>,
}

impl Extraction {
    /// Contact details and activities as one free-text block.
    pub fn additional_info(&self) -> Option<String> {
        let parts: Vec<String> = [
            self.contact_info.as_ref().map(|c| format!("連絡先: {c}")),
            self.activities.as_ref().map(|a| format!("活動内容: {a}")),
        ]
        .into_iter()
        .flatten()
        .collect();
        (!parts.is_empty()).then(|| parts.join("\n"))
    }
}

pub(crate) fn parse_extraction(text: &str) -> Option<Extraction> {
    let map = json_object(text)?;
    Some(Extraction {
        name: get_text(&map, "name").or_else(|| get_text(&map, "organization_name")),
        organization_type: get_text(&map, "organization_type"),
        contact_info: get_text(&map, "contact_info"),
        activities: get_text(&map, "activities"),
        disease_specificity: get_score(&map, "disease_specificity"),
        confidence: get_score(&map, "extraction_confidence"),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Verification {
    pub confirmed: bool,
    pub score: f64,
    pub notes: Option<String>,
    pub corrections: Extraction,
}

impl Verification {
    /// Overwrites extracted fields with the verifier's corrections when it
    /// did not confirm the extraction.
    pub fn apply_to(&self, extraction: &mut Extraction) {
        if self.confirmed {
            return;
        }
        let c = &self.corrections;
        if c.name.is_some() {
            extraction.name.clone_from(&c.name);
        }
        if c.organization_type.is_some() {
            extraction.organization_type.clone_from(&c.organization_type);
        }
        if c.contact_info.is_some() {
            extraction.contact_info.clone_from(&c.contact_info);
        }
        if c.activities.is_some() {
            extraction.activities.clone_from(&c.activities);
        }
    }
}

pub(crate) fn parse_verification(text: &str) -> Option<Verification> {
    let map = json_object(text)?;
    Some(Verification {
        confirmed: get_bool(&map, "verification_result").unwrap_or(true),
        score: get_score(&map, "verification_score").unwrap_or(0.5),
        notes: get_text(&map, "verification_notes"),
        corrections: Extraction {
            name: get_text(&map, "corrected_name"),
            organization_type: get_text(&map, "corrected_organization_type"),
            contact_info: get_text(&map, "corrected_contact_info"),
            activities: get_text(&map, "corrected_activities"),
            disease_specificity: None,
            confidence: None,
        },
    })
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Classification {
    pub is_relevant: bool,
    pub confidence: f64,
    pub reason: Option<String>,
    pub extraction: Extraction,
}

/// Single-call classification used when two-step validation is off.
pub(crate) fn parse_classification(text: &str) -> Option<Classification> {
    let map = json_object(text)?;
    Some(Classification {
        is_relevant: get_bool(&map, "is_relevant").unwrap_or(false),
        confidence: get_score(&map, "confidence").unwrap_or(0.0),
        reason: get_text(&map, "reason"),
        extraction: Extraction {
            name: get_text(&map, "organization_name").or_else(|| get_text(&map, "name")),
            organization_type: get_text(&map, "organization_type"),
            contact_info: get_text(&map, "contact_info"),
            activities: get_text(&map, "activities"),
            disease_specificity: get_score(&map, "disease_specificity"),
            confidence: get_score(&map, "confidence"),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_fenced_block() {
        let reply = "前置き {\"noise\": 1}\n```json\n{\"is_match\": true, \"confidence\": 0.9}\n```\n後書き";
        let verdict = parse_match(reply);
        assert!(verdict.is_match);
        assert_eq!(verdict.confidence, 0.9);
    }

    #[test]
    fn falls_back_to_outermost_braces_and_tolerates_trailing_commas() {
        let reply = "回答: {\"is_match\": true, \"confidence\": \"0.7\", \"matched_terms\": [\"a\",],}";
        let verdict = parse_match(reply);
        assert!(verdict.is_match);
        assert_eq!(verdict.confidence, 0.7);
    }

    #[test]
    fn keyword_heuristic_when_no_json() {
        let verdict = parse_match("is_match: true (confidence high)");
        assert!(verdict.is_match);
        assert_eq!(verdict.confidence, 0.5);

        let verdict = parse_match("関連なし");
        assert!(!verdict.is_match);
        assert_eq!(verdict.confidence, 0.5);
    }

    #[test]
    fn scores_are_clamped() {
        let verdict = parse_match("{\"is_match\": true, \"confidence\": 7}");
        assert_eq!(verdict.confidence, 1.0);
    }

    #[test]
    fn extraction_fields_and_additional_info() {
        let reply = r#"{"name": "ファブリー病患者会", "organization_type": "患者会",
            "contact_info": "info@example.jp", "activities": ["交流会", "勉強会"],
            "disease_specificity": 0.9, "extraction_confidence": 0.8}"#;
        let extraction = parse_extraction(reply).expect("extraction");
        assert_eq!(extraction.name.as_deref(), Some("ファブリー病患者会"));
        assert_eq!(extraction.activities.as_deref(), Some("交流会, 勉強会"));
        assert_eq!(
            extraction.additional_info().as_deref(),
            Some("連絡先: info@example.jp\n活動内容: 交流会, 勉強会")
        );
        assert!(parse_extraction("no json here").is_none());
    }

    #[test]
    fn verification_corrections_apply_only_when_not_confirmed() {
        let mut extraction = Extraction {
            name: Some("旧名".into()),
            organization_type: Some("支援団体".into()),
            ..Extraction::default()
        };
        let confirmed = parse_verification(r#"{"verification_result": true, "corrected_name": "X"}"#)
            .expect("verification");
        confirmed.apply_to(&mut extraction);
        assert_eq!(extraction.name.as_deref(), Some("旧名"));
        assert_eq!(confirmed.score, 0.5);

        let corrected = parse_verification(
            r#"{"verification_result": false, "verification_score": 0.2,
                "corrected_name": "新名", "corrected_organization_type": "", "verification_notes": "名称修正"}"#,
        )
        .expect("verification");
        corrected.apply_to(&mut extraction);
        assert_eq!(extraction.name.as_deref(), Some("新名"));
        assert_eq!(extraction.organization_type.as_deref(), Some("支援団体"));
        assert_eq!(corrected.notes.as_deref(), Some("名称修正"));
    }

    #[test]
    fn classification_reads_relevance_and_name() {
        let c = parse_classification(
            r#"{"is_relevant": "true", "confidence": 0.8, "organization_name": "家族の会", "organization_type": "家族会"}"#,
        )
        .expect("classification");
        assert!(c.is_relevant);
        assert_eq!(c.extraction.name.as_deref(), Some("家族の会"));
        assert_eq!(c.extraction.organization_type.as_deref(), Some("家族会"));
    }
}
