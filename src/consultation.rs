//! Chatbot consultation summaries: request validation and keyword extraction.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::models::Urgency;
use crate::validation::digits_only;

const MAX_SYMPTOMS: usize = 5;
const MAX_RECOMMENDATIONS: usize = 3;

pub const NO_SYMPTOMS_FOUND: &str = "일반적인 안과 상담 문의";
pub const DEFAULT_RECOMMENDATION: &str =
    "AI 상담을 통해 기본적인 안과 정보를 제공받았습니다. 정확한 진단을 위해 내원 검사를 권장합니다.";

static SYMPTOM_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"아프|아픔|통증|따가|쓰라|화끈",
        r"흐리|뿌옇|안 보|잘 안",
        r"건조|마르|껄끄",
        r"충혈|빨갛|빨간",
        r"눈부|밝은|빛",
        r"가려|긁고|문지",
        r"분비물|눈곱|끈적",
        r"깜빡|떨림|경련",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("symptom pattern is valid"))
    .collect()
});

static RECOMMENDATION_SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"권장|추천|제안|검사|내원|상담").expect("recommendation pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Speaker,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationSummaryRequest {
    pub patient_name: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationMessage>,
    /// Overrides the extracted symptom summary.
    pub symptoms: Option<String>,
    /// Overrides the extracted recommendations.
    pub recommendations: Option<String>,
    pub urgency: Option<Urgency>,
    pub consultation_date: Option<String>,
    #[serde(default)]
    pub follow_up_needed: bool,
    #[serde(default)]
    pub appointment_suggested: bool,
}

/// A validated summary request with symptoms and recommendations resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsultationSummary {
    pub patient_name: String,
    /// Digits only.
    pub phone_number: String,
    pub email: Option<String>,
    pub conversation: Vec<ConversationMessage>,
    pub symptoms: String,
    pub recommendations: String,
    pub urgency: Urgency,
    pub consultation_date: Option<String>,
    pub follow_up_needed: bool,
    pub appointment_suggested: bool,
}

impl ConsultationSummaryRequest {
    pub fn validate(self) -> Result<ConsultationSummary, String> {
        let name = self.patient_name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let phone = self.phone_number.filter(|p| !p.trim().is_empty());

        let (Some(patient_name), Some(phone)) = (name, phone) else {
            return Err("patientName, phoneNumber, conversationHistory는 필수 항목입니다".to_string());
        };
        if self.conversation_history.is_empty() {
            return Err("상담 내용이 비어있습니다".to_string());
        }

        let phone_number = digits_only(&phone);
        if phone_number.len() < 10 {
            return Err("올바른 전화번호 형식이 아닙니다".to_string());
        }

        let symptoms = self
            .symptoms
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| extract_symptoms(&self.conversation_history));
        let recommendations = self
            .recommendations
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| extract_recommendations(&self.conversation_history));

        Ok(ConsultationSummary {
            patient_name,
            phone_number,
            email: self.email.filter(|e| !e.trim().is_empty()),
            conversation: self.conversation_history,
            symptoms,
            recommendations,
            urgency: self.urgency.unwrap_or_default(),
            consultation_date: self.consultation_date.filter(|d| !d.is_empty()),
            follow_up_needed: self.follow_up_needed,
            appointment_suggested: self.appointment_suggested,
        })
    }
}

fn joined(conversation: &[ConversationMessage], speaker: Speaker) -> String {
    conversation
        .iter()
        .filter(|m| m.role == speaker)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Symptom keywords found in the patient's messages, at most five.
pub fn extract_symptoms(conversation: &[ConversationMessage]) -> String {
    let text = joined(conversation, Speaker::User);

    let found: Vec<&str> = SYMPTOM_PATTERNS
        .iter()
        .flat_map(|pattern| pattern.find_iter(&text).map(|m| m.as_str()))
        .take(MAX_SYMPTOMS)
        .collect();

    if found.is_empty() {
        NO_SYMPTOMS_FOUND.to_string()
    } else {
        format!("환자가 호소한 주요 증상: {}", found.join(", "))
    }
}

/// Up to three assistant sentences that carry advice.
pub fn extract_recommendations(conversation: &[ConversationMessage]) -> String {
    let text = joined(conversation, Speaker::Assistant);

    let sentences: Vec<&str> = text
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| s.chars().count() > 10)
        .filter(|s| RECOMMENDATION_SENTENCE.is_match(s))
        .take(MAX_RECOMMENDATIONS)
        .collect();

    if sentences.is_empty() {
        DEFAULT_RECOMMENDATION.to_string()
    } else {
        format!("{}.", sentences.join(". "))
    }
}

/// Stored urgency level, 2 (low) to 5 (urgent).
pub fn urgency_level(urgency: Urgency) -> i32 {
    match urgency {
        Urgency::Urgent => 5,
        Urgency::High => 4,
        Urgency::Medium => 3,
        Urgency::Low => 2,
    }
}
