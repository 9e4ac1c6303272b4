use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use wizardlab_core::{ReplyCategory, ReplyPriority, RiskFlags};

use crate::AiError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyDecision {
    pub should_reply: bool,
    pub reason: String,
    pub post_summary: String,
    pub category: ReplyCategory,
    pub priority: ReplyPriority,
    /// Always empty when `should_reply` is false.
    pub reply_draft: String,
    pub risk_flags: RiskFlags,
}

fn invalid(message: impl Into<String>) -> AiError {
    AiError::InvalidDecision(message.into())
}

/// Whole text as JSON, else the outermost `{...}` span.
fn parse_json_object(raw: &str) -> Option<Map<String, JsonValue>> {
    let trimmed = raw.trim();
    if let Ok(JsonValue::Object(map)) = serde_json::from_str(trimmed) {
        return Some(map);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&trimmed[start..=end]) {
        Ok(JsonValue::Object(map)) => Some(map),
        _ => None,
    }
}

fn required_str<'a>(obj: &'a Map<String, JsonValue>, key: &str) -> Result<&'a str, AiError> {
    obj.get(key)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| invalid(format!("missing string {key}")))
}

fn parse_risk_flags(value: Option<&JsonValue>) -> Result<RiskFlags, AiError> {
    let obj = value
        .and_then(JsonValue::as_object)
        .ok_or_else(|| invalid("missing risk_flags object"))?;
    let flag = |key: &str| {
        obj.get(key)
            .and_then(JsonValue::as_bool)
            .ok_or_else(|| invalid(format!("missing boolean risk_flags.{key}")))
    };
    Ok(RiskFlags {
        is_personal_advice: flag("is_personal_advice")?,
        mentions_leverage: flag("mentions_leverage")?,
        mentions_options: flag("mentions_options")?,
        mentions_crypto: flag("mentions_crypto")?,
    })
}

impl ReplyDecision {
    /// Lenient about prose around the object, strict about every field's type.
    pub fn parse(raw: &str) -> Result<Self, AiError> {
        let obj = parse_json_object(raw).ok_or_else(|| invalid("failed to parse JSON from model response"))?;

        let should_reply = obj
            .get("should_reply")
            .and_then(JsonValue::as_bool)
            .ok_or_else(|| invalid("missing boolean should_reply"))?;
        let reason = required_str(&obj, "reason")?.to_string();
        let post_summary = required_str(&obj, "post_summary")?.to_string();

        let category_raw = obj.get("category").and_then(JsonValue::as_str).unwrap_or_default();
        let category = ReplyCategory::parse(category_raw)
            .ok_or_else(|| invalid(format!("invalid category value: {category_raw}")))?;
        let priority_raw = obj.get("priority").and_then(JsonValue::as_str).unwrap_or_default();
        let priority = ReplyPriority::parse(priority_raw)
            .ok_or_else(|| invalid(format!("invalid priority value: {priority_raw}")))?;

        let reply_draft = required_str(&obj, "reply_draft")?;
        let risk_flags = parse_risk_flags(obj.get("risk_flags"))?;

        Ok(Self {
            should_reply,
            reason,
            post_summary,
            category,
            priority,
            reply_draft: if should_reply { reply_draft.trim().to_string() } else { String::new() },
            risk_flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "should_reply": true,
        "reason": "Asks for feedback on a three fund mix",
        "post_summary": "User holds VTI, VXUS and BND",
        "category": "  Portfolio_Construction ",
        "priority": "HIGH",
        "reply_draft": " Nice split! ",
        "risk_flags": {"is_personal_advice": false, "mentions_leverage": false, "mentions_options": true, "mentions_crypto": false}
    }"#;

    #[test]
    fn normalizes_category_and_priority() {
        let decision = ReplyDecision::parse(VALID).unwrap();
        assert!(decision.should_reply);
        assert_eq!(decision.category, ReplyCategory::PortfolioConstruction);
        assert_eq!(decision.priority, ReplyPriority::High);
        assert_eq!(decision.reply_draft, "Nice split!");
        assert!(decision.risk_flags.mentions_options);
    }

    #[test]
    fn tolerates_prose_around_the_object() {
        let wrapped = format!("Sure, here you go:\n```json\n{VALID}\n```\nThanks");
        assert!(ReplyDecision::parse(&wrapped).is_ok());
    }

    #[test]
    fn draft_is_dropped_when_not_replying() {
        let raw = VALID.replace(r#""should_reply": true"#, r#""should_reply": false"#);
        let decision = ReplyDecision::parse(&raw).unwrap();
        assert!(!decision.should_reply);
        assert!(decision.reply_draft.is_empty());
    }

    #[test]
    fn rejects_wrong_types_and_unknown_enums() {
        let cases = [
            VALID.replace(r#""should_reply": true"#, r#""should_reply": "yes""#),
            VALID.replace(r#""priority": "HIGH""#, r#""priority": "urgent""#),
            VALID.replace(r#""category": "  Portfolio_Construction ""#, r#""category": 3"#),
            VALID.replace(r#""mentions_crypto": false"#, r#""mentions_crypto": "no""#),
            VALID.replace(r#""reply_draft": " Nice split! ","#, ""),
            "no json here".to_string(),
            "[1, 2]".to_string(),
        ];
        for raw in cases {
            assert!(
                matches!(ReplyDecision::parse(&raw), Err(AiError::InvalidDecision(_))),
                "accepted: {raw}"
            );
        }
    }
}
