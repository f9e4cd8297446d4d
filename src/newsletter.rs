//! Newsletter sign-up with double opt-in.
//!
//! A subscription starts as `pending_confirmation` and becomes `confirmed` once the
//! visitor follows the link mailed to them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::AppError;
use crate::notifications::NotificationManager;
use crate::validation::is_valid_email;

/// Disposable-mail domains refused at sign-up.
pub const SPAM_DOMAINS: [&str; 5] = [
    "tempmail.org",
    "10minutemail.com",
    "guerrillamail.com",
    "mailinator.com",
    "throwaway.email",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionSource {
    #[default]
    Website,
    Typebot,
    Chatbot,
    Manual,
}

impl SubscriptionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionSource::Website => "website",
            SubscriptionSource::Typebot => "typebot",
            SubscriptionSource::Chatbot => "chatbot",
            SubscriptionSource::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    PendingConfirmation,
    Confirmed,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::PendingConfirmation => "pending_confirmation",
            SubscriptionStatus::Confirmed => "confirmed",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_confirmation" => Ok(SubscriptionStatus::PendingConfirmation),
            "confirmed" => Ok(SubscriptionStatus::Confirmed),
            other => Err(AppError::InternalError(format!(
                "Unknown subscription status: {}",
                other
            ))),
        }
    }
}

/// Topics the subscriber wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewsletterPreferences {
    pub eye_health: bool,
    pub treatments: bool,
    pub promotions: bool,
    pub appointments: bool,
}

impl Default for NewsletterPreferences {
    fn default() -> Self {
        Self {
            eye_health: true,
            treatments: true,
            promotions: false,
            appointments: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberMetadata {
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub ip_address: Option<String>,
    pub lead_id: Option<String>,
}

/// Body of `POST /api/newsletter/subscribe`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub email: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub source: SubscriptionSource,
    pub tags: Option<Vec<String>>,
    pub preferences: Option<NewsletterPreferences>,
    #[serde(default)]
    pub metadata: SubscriberMetadata,
}

/// Validated sign-up, ready to store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubscriber {
    /// Trimmed and lowercased.
    pub email: String,
    pub name: Option<String>,
    pub source: SubscriptionSource,
    pub tags: Vec<String>,
    pub preferences: NewsletterPreferences,
    pub metadata: SubscriberMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    #[serde(rename = "subscriberId")]
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub source: String,
    pub status: SubscriptionStatus,
    #[serde(skip_serializing)]
    pub confirmation_token: Uuid,
    pub subscribed_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

pub fn is_spam_email(email: &str) -> bool {
    email
        .rsplit_once('@')
        .is_some_and(|(_, domain)| SPAM_DOMAINS.contains(&domain.to_lowercase().as_str()))
}

impl SubscribeRequest {
    pub fn validate(self) -> Result<NewSubscriber, AppError> {
        let mut errors = Vec::new();

        let email = self
            .email
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_lowercase();
        if !is_valid_email(&email) {
            errors.push("email: 유효한 이메일 주소를 입력하세요");
        }

        let name = match self.name {
            Some(name) if name.trim().is_empty() => {
                errors.push("name: 이름을 입력하세요");
                None
            }
            name => name.map(|n| n.trim().to_string()),
        };

        if !errors.is_empty() {
            return Err(AppError::BadRequest(format!(
                "입력 데이터가 유효하지 않습니다: {}",
                errors.join(", ")
            )));
        }
        if is_spam_email(&email) {
            return Err(AppError::BadRequest(
                "임시 이메일 주소는 사용할 수 없습니다".to_string(),
            ));
        }

        let mut tags: Vec<String> = Vec::new();
        for tag in self.tags.unwrap_or_default() {
            let tag = tag.trim().to_string();
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        if tags.is_empty() {
            tags.push("general".to_string());
        }

        Ok(NewSubscriber {
            email,
            name,
            source: self.source,
            tags,
            preferences: self.preferences.unwrap_or_default(),
            metadata: self.metadata,
        })
    }
}

/// Subscriber persistence.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    /// Insert or refresh the subscriber with this email. A confirmed subscriber stays
    /// confirmed and keeps its token.
    async fn upsert_subscriber(&self, subscriber: &NewSubscriber) -> Result<Subscriber, AppError>;

    /// Confirm the subscriber holding `token`; `None` when no one holds it.
    async fn confirm_subscriber(&self, token: Uuid) -> Result<Option<Subscriber>, AppError>;
}

pub struct NewsletterService {
    store: Arc<dyn SubscriberStore>,
    notifier: Arc<NotificationManager>,
}

impl NewsletterService {
    pub fn new(store: Arc<dyn SubscriberStore>, notifier: Arc<NotificationManager>) -> Self {
        Self { store, notifier }
    }

    /// Store the sign-up and mail the confirmation link. Already confirmed addresses
    /// get no second email.
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<Subscriber, AppError> {
        let new_subscriber = request.validate()?;
        let subscriber = self.store.upsert_subscriber(&new_subscriber).await?;

        if subscriber.status == SubscriptionStatus::Confirmed {
            tracing::info!(subscriber_id = %subscriber.id, "Newsletter address already confirmed");
            return Ok(subscriber);
        }

        let result = self
            .notifier
            .send_newsletter_confirmation(
                &subscriber.email,
                subscriber.name.as_deref(),
                subscriber.confirmation_token,
            )
            .await;
        if !result.email {
            return Err(AppError::ExternalApiError(format!(
                "Newsletter confirmation email failed: {}",
                result.errors.join("; ")
            )));
        }

        tracing::info!(
            subscriber_id = %subscriber.id,
            source = new_subscriber.source.as_str(),
            "✓ Newsletter subscription pending confirmation"
        );
        Ok(subscriber)
    }

    pub async fn confirm(&self, token: Uuid) -> Result<Subscriber, AppError> {
        self.store
            .confirm_subscriber(token)
            .await?
            .ok_or_else(|| AppError::NotFound("구독 확인 링크가 유효하지 않습니다".to_string()))
    }
}
