//! Weighted point-sum scoring of incoming leads.
//!
//! The score is the sum of five independent factors: urgency, symptom severity,
//! contact channels, field completeness and acquisition source. Priority is derived
//! from the total, except that an `urgent` lead is always handled as urgent.

use serde::Serialize;

use crate::models::{Lead, LeadSource, Priority, Urgency};

const CRITICAL_SYMPTOMS: [&str; 10] = [
    "갑작스러운",
    "급성",
    "심한 통증",
    "시야 손실",
    "복시",
    "눈부심",
    "빛 번짐",
    "출혈",
    "외상",
    "화학물질",
];

const MODERATE_SYMPTOMS: [&str; 8] = [
    "흐림", "건조", "피로", "충혈", "가려움", "이물감", "눈물", "부종",
];

pub const RECOMMEND_IMMEDIATE_CONTACT: &str = "즉시 연락 필요";
pub const RECOMMEND_EMERGENCY_CARE: &str = "응급 진료 고려";
pub const RECOMMEND_PROMPT_VISIT: &str = "빠른 진료 권장";
pub const RECOMMEND_COLLECT_SYMPTOMS: &str = "증상 정보 추가 수집 필요";

/// Points per factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ScoreFactors {
    pub urgency: u32,
    pub symptoms: u32,
    pub contact: u32,
    pub completeness: u32,
    pub source: u32,
}

impl ScoreFactors {
    pub fn total(&self) -> u32 {
        self.urgency + self.symptoms + self.contact + self.completeness + self.source
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadScore {
    pub score: u32,
    pub factors: ScoreFactors,
    pub priority: Priority,
    pub recommendations: Vec<String>,
}

pub struct LeadScorer;

impl LeadScorer {
    /// Score a validated lead. Pure and deterministic.
    pub fn score(lead: &Lead) -> LeadScore {
        let mut recommendations = Vec::new();

        let factors = ScoreFactors {
            urgency: urgency_points(lead.urgency, &mut recommendations),
            symptoms: symptom_points(lead.symptoms.as_deref(), &mut recommendations),
            contact: contact_points(lead),
            completeness: completeness_points(lead),
            source: source_points(&lead.source),
        };
        let score = factors.total();

        let (priority, response_time) = if score >= 80 || lead.urgency == Urgency::Urgent {
            (Priority::Urgent, "30분 내 연락")
        } else if score >= 60 {
            (Priority::High, "2시간 내 연락")
        } else if score >= 40 {
            (Priority::Medium, "당일 연락")
        } else {
            (Priority::Low, "48시간 내 연락")
        };
        recommendations.push(response_time.to_string());

        LeadScore {
            score,
            factors,
            priority,
            recommendations: dedup_preserving_order(recommendations),
        }
    }
}

fn urgency_points(urgency: Urgency, recommendations: &mut Vec<String>) -> u32 {
    match urgency {
        Urgency::Urgent => {
            recommendations.push(RECOMMEND_IMMEDIATE_CONTACT.to_string());
            40
        }
        Urgency::High => 30,
        Urgency::Medium => 20,
        Urgency::Low => 10,
    }
}

fn symptom_points(symptoms: Option<&str>, recommendations: &mut Vec<String>) -> u32 {
    let Some(text) = symptoms.filter(|s| !s.is_empty()) else {
        recommendations.push(RECOMMEND_COLLECT_SYMPTOMS.to_string());
        return 5;
    };

    let text = text.to_lowercase();
    if CRITICAL_SYMPTOMS.iter().any(|k| text.contains(k)) {
        recommendations.push(RECOMMEND_EMERGENCY_CARE.to_string());
        25
    } else if MODERATE_SYMPTOMS.iter().any(|k| text.contains(k)) {
        recommendations.push(RECOMMEND_PROMPT_VISIT.to_string());
        15
    } else {
        10
    }
}

fn contact_points(lead: &Lead) -> u32 {
    let mut points = 0;
    if !lead.phone.is_empty() {
        points += 10;
    }
    if lead.email.is_some() {
        points += 7;
    }
    if lead.preferred_time.is_some() {
        points += 3;
    }
    points
}

fn completeness_points(lead: &Lead) -> u32 {
    let filled = [
        !lead.name.is_empty(),
        !lead.phone.is_empty(),
        lead.email.is_some(),
        lead.symptoms.is_some(),
        lead.preferred_date.is_some(),
        lead.age.is_some(),
    ]
    .iter()
    .filter(|present| **present)
    .count();

    (filled as f64 / 6.0 * 10.0).round() as u32
}

fn source_points(source: &LeadSource) -> u32 {
    match source {
        LeadSource::Referral | LeadSource::WalkIn => 5,
        LeadSource::PhoneCall | LeadSource::WebsiteForm => 4,
        LeadSource::Chatbot | LeadSource::Typebot => 3,
        LeadSource::Search | LeadSource::Advertisement => 2,
        LeadSource::SocialMedia => 1,
        LeadSource::Other(_) => 2,
    }
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
