use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::validation::{is_valid_email, is_valid_kr_phone};

// ============ Clinic ============

pub const CLINIC_NAME: &str = "연수김안과의원";
pub const CLINIC_ADDRESS: &str = "인천광역시 연수구 컨벤시아대로 165 포스코타워-연수 B동 17층";
pub const CLINIC_PHONE: &str = "032-716-7582";

/// Korea Standard Time. No daylight saving, so a fixed offset is exact.
const KST_OFFSET_SECS: i32 = 9 * 3600;

pub fn clinic_offset() -> FixedOffset {
    FixedOffset::east_opt(KST_OFFSET_SECS).expect("KST offset is within bounds")
}

/// Current wall-clock time at the clinic.
pub fn clinic_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&clinic_offset())
}

/// Today's date at the clinic.
pub fn clinic_today() -> NaiveDate {
    clinic_now().date_naive()
}

// ============ Lead ============

/// How quickly the visitor says they need care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Urgent => "urgent",
        }
    }
}

impl FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Urgency::Low),
            "medium" => Ok(Urgency::Medium),
            "high" => Ok(Urgency::High),
            "urgent" => Ok(Urgency::Urgent),
            other => Err(format!("urgency must be one of low, medium, high, urgent (got '{}')", other)),
        }
    }
}

/// Follow-up priority assigned to a lead or attached to an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" | "남" | "남성" => Ok(Gender::Male),
            "female" | "여" | "여성" => Ok(Gender::Female),
            "other" | "기타" => Ok(Gender::Other),
            other => Err(format!("gender must be male, female or other (got '{}')", other)),
        }
    }
}

/// Where the lead came from. Unrecognised channels are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LeadSource {
    #[default]
    WebsiteForm,
    Chatbot,
    Typebot,
    PhoneCall,
    WalkIn,
    Referral,
    Advertisement,
    Search,
    SocialMedia,
    Other(String),
}

impl LeadSource {
    pub fn as_str(&self) -> &str {
        match self {
            LeadSource::WebsiteForm => "website_form",
            LeadSource::Chatbot => "chatbot",
            LeadSource::Typebot => "typebot",
            LeadSource::PhoneCall => "phone_call",
            LeadSource::WalkIn => "walk_in",
            LeadSource::Referral => "referral",
            LeadSource::Advertisement => "advertisement",
            LeadSource::Search => "search",
            LeadSource::SocialMedia => "social_media",
            LeadSource::Other(s) => s,
        }
    }
}

impl From<String> for LeadSource {
    fn from(value: String) -> Self {
        match value.as_str() {
            "website_form" => LeadSource::WebsiteForm,
            "chatbot" => LeadSource::Chatbot,
            "typebot" => LeadSource::Typebot,
            "phone_call" => LeadSource::PhoneCall,
            "walk_in" => LeadSource::WalkIn,
            "referral" => LeadSource::Referral,
            "advertisement" => LeadSource::Advertisement,
            "search" => LeadSource::Search,
            "social_media" => LeadSource::SocialMedia,
            _ => LeadSource::Other(value),
        }
    }
}

impl From<LeadSource> for String {
    fn from(value: LeadSource) -> Self {
        value.as_str().to_string()
    }
}

/// Request context captured alongside a lead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadMetadata {
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub ip_address: Option<String>,
    pub session_id: Option<String>,
    pub campaign: Option<String>,
    #[serde(rename = "utm_source")]
    pub utm_source: Option<String>,
    #[serde(rename = "utm_medium")]
    pub utm_medium: Option<String>,
    #[serde(rename = "utm_campaign")]
    pub utm_campaign: Option<String>,
}

/// Raw lead as submitted by a form or assembled from webhook answers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSubmission {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub symptoms: Option<String>,
    pub previous_treatment: Option<String>,
    pub urgency: Option<String>,
    pub preferred_date: Option<String>,
    pub preferred_time: Option<String>,
    pub service_type: Option<String>,
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: LeadMetadata,
}

/// A validated lead.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub age: Option<u8>,
    pub gender: Option<Gender>,
    pub symptoms: Option<String>,
    pub previous_treatment: Option<String>,
    pub urgency: Urgency,
    pub preferred_date: Option<String>,
    pub preferred_time: Option<String>,
    pub service_type: String,
    pub source: LeadSource,
    pub metadata: LeadMetadata,
}

impl Lead {
    /// Minimal lead for the given contact, everything else defaulted.
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            email: None,
            age: None,
            gender: None,
            symptoms: None,
            previous_treatment: None,
            urgency: Urgency::default(),
            preferred_date: None,
            preferred_time: None,
            service_type: "consultation".to_string(),
            source: LeadSource::default(),
            metadata: LeadMetadata::default(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl LeadSubmission {
    /// Validate every field and return all failures at once.
    pub fn validate(self) -> Result<Lead, Vec<String>> {
        let mut errors = Vec::new();

        let name = non_empty(self.name.map(|n| n.trim().to_string()));
        if name.is_none() {
            errors.push("name: 이름을 입력해주세요".to_string());
        }

        let phone = non_empty(self.phone.map(|p| p.trim().to_string()));
        match &phone {
            None => errors.push("phone: 연락처를 입력해주세요".to_string()),
            Some(p) if !is_valid_kr_phone(p) => {
                errors.push("phone: 올바른 전화번호 형식이 아닙니다".to_string())
            }
            _ => {}
        }

        let email = non_empty(self.email.map(|e| e.trim().to_string()));
        if let Some(e) = &email {
            if !is_valid_email(e) {
                errors.push("email: 올바른 이메일 형식이 아닙니다".to_string());
            }
        }

        let age = match self.age {
            Some(a @ 1..=120) => Some(a as u8),
            Some(_) => {
                errors.push("age: 나이는 1세에서 120세 사이여야 합니다".to_string());
                None
            }
            None => None,
        };

        let gender = match non_empty(self.gender) {
            Some(g) => match g.parse::<Gender>() {
                Ok(g) => Some(g),
                Err(e) => {
                    errors.push(format!("gender: {}", e));
                    None
                }
            },
            None => None,
        };

        let urgency = match non_empty(self.urgency) {
            Some(u) => u.parse::<Urgency>().unwrap_or_else(|e| {
                errors.push(format!("urgency: {}", e));
                Urgency::default()
            }),
            None => Urgency::default(),
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Lead {
            name: name.unwrap_or_default(),
            phone: phone.unwrap_or_default(),
            email,
            age,
            gender,
            symptoms: non_empty(self.symptoms),
            previous_treatment: non_empty(self.previous_treatment),
            urgency,
            preferred_date: non_empty(self.preferred_date),
            preferred_time: non_empty(self.preferred_time),
            service_type: non_empty(self.service_type).unwrap_or_else(|| "consultation".to_string()),
            source: non_empty(self.source).map(LeadSource::from).unwrap_or_default(),
            metadata: self.metadata,
        })
    }
}

// ============ Reservations ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
            ReservationStatus::NoShow => "no_show",
        }
    }

    /// Reservations still expecting the patient.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            "completed" => Ok(ReservationStatus::Completed),
            "no_show" => Ok(ReservationStatus::NoShow),
            other => Err(format!("unknown reservation status '{}'", other)),
        }
    }
}

/// Which reminder a batch job sends; each has its own idempotence flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    DayBefore,
    SameDay,
    FollowUp,
}

impl ReminderKind {
    /// Flag column on `reservations`.
    pub fn flag_column(&self) -> &'static str {
        match self {
            ReminderKind::DayBefore => "reminder_sent",
            ReminderKind::SameDay => "today_reminder_sent",
            ReminderKind::FollowUp => "followup_sent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientContact {
    pub id: Uuid,
    pub full_name: String,
    pub phone_number: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Uuid,
    pub reservation_date: NaiveDate,
    /// `HH:MM`
    pub reservation_time: String,
    pub service_type: String,
    pub status: ReservationStatus,
    pub reminder_sent: bool,
    pub today_reminder_sent: bool,
    pub followup_sent: bool,
    pub patient: Option<PatientContact>,
}

impl Reservation {
    pub fn flag(&self, kind: ReminderKind) -> bool {
        match kind {
            ReminderKind::DayBefore => self.reminder_sent,
            ReminderKind::SameDay => self.today_reminder_sent,
            ReminderKind::FollowUp => self.followup_sent,
        }
    }

    pub fn set_flag(&mut self, kind: ReminderKind) {
        match kind {
            ReminderKind::DayBefore => self.reminder_sent = true,
            ReminderKind::SameDay => self.today_reminder_sent = true,
            ReminderKind::FollowUp => self.followup_sent = true,
        }
    }
}

/// Display name for a reservation service code.
pub fn service_type_name(code: &str) -> &str {
    match code {
        "consultation" => "일반 상담",
        "exam" => "정밀 검사",
        "lasik" => "라식/라섹 상담",
        "cataract" => "백내장 상담",
        "presbyopia" => "노안 상담",
        "dry-eye" => "안구건조증 상담",
        "pediatric" => "소아 안과",
        "retina" => "망막 질환",
        "glaucoma" => "녹내장",
        other => other,
    }
}

/// Reservation code for a service label chosen in the booking funnel.
/// Codes pass through unchanged; anything unknown books a general consultation.
pub fn reservation_service_code(label: &str) -> &'static str {
    match label.trim() {
        "일반 상담" | "consultation" => "consultation",
        "정밀 검사" | "exam" | "examination" => "exam",
        "라식/라섹 상담" | "lasik" => "lasik",
        "백내장 상담" | "cataract" => "cataract",
        "노안 상담" | "presbyopia" => "presbyopia",
        "안구건조증 상담" | "dry-eye" => "dry-eye",
        "소아 안과" | "pediatric" => "pediatric",
        "망막 질환" | "retina" => "retina",
        "녹내장" | "glaucoma" => "glaucoma",
        _ => "consultation",
    }
}

/// Concrete reservation time for a preferred slot.
pub fn reservation_time_for(slot: &str) -> String {
    let slot = slot.trim();
    let is_clock = slot.len() == 5
        && slot.as_bytes()[2] == b':'
        && chrono::NaiveTime::parse_from_str(slot, "%H:%M").is_ok();
    if is_clock {
        return slot.to_string();
    }

    let lower = slot.to_lowercase();
    if lower.contains("오전") || lower.contains("morning") {
        "10:00".to_string()
    } else if lower.contains("오후") || lower.contains("afternoon") {
        "15:00".to_string()
    } else if lower.contains("저녁") || lower.contains("evening") {
        "17:30".to_string()
    } else {
        "10:00".to_string()
    }
}

// ============ FAQ ============

pub const FAQ_CATEGORIES: [&str; 4] = ["general", "surgery", "checkup", "insurance"];

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Faq {
    pub id: Uuid,
    pub category: String,
    pub question: String,
    pub answer: String,
    pub order_index: i32,
    pub is_published: bool,
    pub view_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaqInput {
    pub category: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub order_index: i32,
    #[serde(default = "default_published")]
    pub is_published: bool,
}

fn default_published() -> bool {
    true
}

impl FaqInput {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if !FAQ_CATEGORIES.contains(&self.category.as_str()) {
            errors.push(format!(
                "category: must be one of {}",
                FAQ_CATEGORIES.join(", ")
            ));
        }
        if self.question.trim().chars().count() < 5 {
            errors.push("question: 질문은 최소 5자 이상이어야 합니다".to_string());
        }
        if self.answer.trim().chars().count() < 10 {
            errors.push("answer: 답변은 최소 10자 이상이어야 합니다".to_string());
        }
        if self.order_index < 0 {
            errors.push("orderIndex: 순서는 0 이상이어야 합니다".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
