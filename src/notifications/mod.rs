//! Notification fan-out to email, Slack and KakaoTalk.
//!
//! Each delivery capability sits behind a trait so the manager can be driven by the
//! real HTTP clients in production and by in-process fakes in tests.

pub mod email;
pub mod kakao;
pub mod manager;
pub mod slack;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::models::{Priority, Urgency};

pub use manager::NotificationManager;

/// Failure of a single channel delivery. Never escapes the manager.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("missing recipient: {0}")]
    MissingRecipient(&'static str),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider rejected message: {0}")]
    Rejected(String),
    #[error("circuit open, delivery skipped")]
    CircuitOpen,
}

// ============ Channel capabilities ============

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub id: String,
}

#[async_trait]
pub trait EmailChannel: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<DeliveryReceipt, ChannelError>;
}

/// Slack destination; resolved to a concrete channel by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlackRoute {
    Alerts,
    Reservations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatOpsPost {
    pub route: SlackRoute,
    /// Plain-text summary, also used by the webhook fallback.
    pub text: String,
    pub blocks: Vec<Value>,
}

#[async_trait]
pub trait ChatOpsChannel: Send + Sync {
    async fn post(&self, post: &ChatOpsPost) -> Result<(), ChannelError>;
}

/// Pre-approved AlimTalk templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KakaoTemplate {
    Appointment,
    Reminder,
    Cancellation,
    Consultation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KakaoButton {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url_mobile: String,
    pub url_pc: String,
}

impl KakaoButton {
    /// Web-link button opening the same URL on mobile and PC.
    pub fn web_link(name: &str, url: String) -> Self {
        Self {
            name: name.to_string(),
            kind: "WL".to_string(),
            url_mobile: url.clone(),
            url_pc: url,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlimtalkMessage {
    pub template: KakaoTemplate,
    pub phone_number: String,
    pub message: String,
    pub buttons: Vec<KakaoButton>,
}

#[async_trait]
pub trait MessagingChannel: Send + Sync {
    /// Returns the provider's message id.
    async fn send(&self, message: &AlimtalkMessage) -> Result<String, ChannelError>;
}

// ============ Events ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentNotification {
    pub patient_name: String,
    #[serde(default)]
    pub phone_number: String,
    pub email: Option<String>,
    pub appointment_date: String,
    pub appointment_time: String,
    pub service_type: Option<String>,
    pub doctor_name: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationNotification {
    pub patient_name: String,
    pub phone_number: String,
    pub email: Option<String>,
    pub consultation_date: Option<String>,
    pub symptoms: String,
    pub recommendations: String,
    pub urgency: Option<Urgency>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadNotification {
    pub patient_name: String,
    pub phone_number: String,
    pub service_type: String,
    #[serde(default)]
    pub priority: Priority,
    pub source: Option<String>,
    pub symptoms: Option<String>,
    pub preferred_date: Option<String>,
    pub preferred_time: Option<String>,
    pub score: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyNotification {
    pub patient_name: String,
    pub phone_number: String,
    pub message: String,
}

/// One business event to fan out.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    AppointmentConfirmation(AppointmentNotification),
    AppointmentReminder(AppointmentNotification),
    AppointmentCancellation(AppointmentNotification),
    ConsultationSummary(ConsultationNotification),
    LeadSubmission(LeadNotification),
    Emergency(EmergencyNotification),
    SystemAlert { message: String, priority: Priority },
}

impl NotificationEvent {
    /// Wire name used by the dispatch endpoint.
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::AppointmentConfirmation(_) => "appointment_confirmation",
            NotificationEvent::AppointmentReminder(_) => "appointment_reminder",
            NotificationEvent::AppointmentCancellation(_) => "appointment_cancellation",
            NotificationEvent::ConsultationSummary(_) => "consultation_summary",
            NotificationEvent::LeadSubmission(_) => "lead_notification",
            NotificationEvent::Emergency(_) => "emergency",
            NotificationEvent::SystemAlert { .. } => "system_alert",
        }
    }
}

// ============ Results ============

/// Which channels a fan-out may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub email: bool,
    pub slack: bool,
    pub kakao: bool,
}

impl NotificationConfig {
    pub const fn all() -> Self {
        Self {
            email: true,
            slack: true,
            kakao: true,
        }
    }

    pub const fn kakao_only() -> Self {
        Self {
            email: false,
            slack: false,
            kakao: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Email,
    Slack,
    Kakao,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Channel::Email => "email",
            Channel::Slack => "slack",
            Channel::Kakao => "kakao",
        })
    }
}

/// Per-channel outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotificationResult {
    pub email: bool,
    pub slack: bool,
    pub kakao: bool,
    pub errors: Vec<String>,
}

impl NotificationResult {
    pub fn any_success(&self) -> bool {
        self.email || self.slack || self.kakao
    }

    pub(crate) fn mark_sent(&mut self, channel: Channel) {
        match channel {
            Channel::Email => self.email = true,
            Channel::Slack => self.slack = true,
            Channel::Kakao => self.kakao = true,
        }
    }
}
