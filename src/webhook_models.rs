use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::lead_processor::IntakeReport;
use crate::models::{LeadMetadata, LeadSubmission};

/// Typebot "send results" webhook body.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypebotWebhookPayload {
    pub typebot_id: String,
    pub session_id: String,
    #[serde(default)]
    pub answers: Vec<TypebotAnswer>,
}

/// One collected answer. `value` is whatever the block produced.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypebotAnswer {
    pub block_id: String,
    #[serde(default)]
    pub variable_name: Option<String>,
    #[serde(default)]
    pub value: Value,
}

/// Lead field a Typebot variable feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadField {
    Name,
    Phone,
    Email,
    Age,
    Symptoms,
    Urgency,
    PreferredDate,
    PreferredTime,
    ServiceType,
}

impl LeadField {
    /// Case-insensitive variable name lookup, including the Korean aliases used in the flows.
    pub fn from_variable(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "name" | "이름" => Some(LeadField::Name),
            "phone" | "phonenumber" | "전화번호" => Some(LeadField::Phone),
            "email" | "이메일" => Some(LeadField::Email),
            "age" | "나이" => Some(LeadField::Age),
            "symptoms" | "증상" => Some(LeadField::Symptoms),
            "urgency" | "긴급도" => Some(LeadField::Urgency),
            "preferreddate" | "희망날짜" => Some(LeadField::PreferredDate),
            "preferredtime" | "희망시간" => Some(LeadField::PreferredTime),
            "servicetype" | "서비스타입" => Some(LeadField::ServiceType),
            _ => None,
        }
    }
}

/// Text form of an answer value; empty, null and structured values yield `None`.
fn answer_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Leading digits of an age answer ("42세" -> 42).
fn parse_age(text: &str) -> Option<u32> {
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

impl TypebotWebhookPayload {
    /// Map answers onto a lead submission with `typebot` as source.
    pub fn to_submission(&self) -> LeadSubmission {
        let mut submission = LeadSubmission {
            source: Some("typebot".to_string()),
            urgency: Some("medium".to_string()),
            metadata: LeadMetadata {
                session_id: Some(self.session_id.clone()),
                ..LeadMetadata::default()
            },
            ..LeadSubmission::default()
        };

        for answer in &self.answers {
            let Some(field) = answer.variable_name.as_deref().and_then(LeadField::from_variable) else {
                continue;
            };
            let Some(text) = answer_text(&answer.value) else {
                continue;
            };

            match field {
                LeadField::Name => submission.name = Some(text),
                LeadField::Phone => submission.phone = Some(text),
                LeadField::Email => submission.email = Some(text),
                LeadField::Age => {
                    submission.age = parse_age(&text);
                    if submission.age.is_none() {
                        tracing::debug!(block_id = %answer.block_id, "Ignoring non-numeric age answer");
                    }
                }
                LeadField::Symptoms => submission.symptoms = Some(text),
                LeadField::Urgency => submission.urgency = Some(text),
                LeadField::PreferredDate => submission.preferred_date = Some(text),
                LeadField::PreferredTime => submission.preferred_time = Some(text),
                LeadField::ServiceType => submission.service_type = Some(text),
            }
        }

        submission
    }
}

/// Response sent back to Typebot.
#[derive(Debug, Serialize)]
pub struct TypebotWebhookResponse {
    pub success: bool,
    pub message: String,
    pub results: IntakeReport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(answers: Value) -> TypebotWebhookPayload {
        serde_json::from_value(json!({
            "typebotId": "tb_1",
            "sessionId": "sess_9",
            "answers": answers,
        }))
        .unwrap()
    }

    #[test]
    fn maps_english_and_korean_variables() {
        let submission = payload(json!([
            {"blockId": "b1", "variableName": "이름", "value": "김환자"},
            {"blockId": "b2", "variableName": "phoneNumber", "value": "010-1234-5678"},
            {"blockId": "b3", "variableName": "Age", "value": 42},
            {"blockId": "b4", "variableName": "증상", "value": "눈이 흐려요"},
            {"blockId": "b5", "variableName": "preferredDate", "value": "2026-05-10"},
            {"blockId": "b6", "variableName": "긴급도", "value": "high"},
        ]))
        .to_submission();

        assert_eq!(submission.name.as_deref(), Some("김환자"));
        assert_eq!(submission.phone.as_deref(), Some("010-1234-5678"));
        assert_eq!(submission.age, Some(42));
        assert_eq!(submission.symptoms.as_deref(), Some("눈이 흐려요"));
        assert_eq!(submission.preferred_date.as_deref(), Some("2026-05-10"));
        assert_eq!(submission.urgency.as_deref(), Some("high"));
        assert_eq!(submission.source.as_deref(), Some("typebot"));
        assert_eq!(submission.metadata.session_id.as_deref(), Some("sess_9"));
    }

    #[test]
    fn skips_unknown_and_empty_answers() {
        let submission = payload(json!([
            {"blockId": "b1", "variableName": "favouriteColour", "value": "blue"},
            {"blockId": "b2", "variableName": "name", "value": ""},
            {"blockId": "b3", "value": "no variable"},
            {"blockId": "b4", "variableName": "email", "value": null},
        ]))
        .to_submission();

        assert_eq!(submission.name, None);
        assert_eq!(submission.email, None);
        assert_eq!(submission.urgency.as_deref(), Some("medium"));
    }

    #[test]
    fn age_takes_leading_digits() {
        assert_eq!(parse_age("42세"), Some(42));
        assert_eq!(parse_age("마흔"), None);
    }
}
