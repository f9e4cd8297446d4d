/// Newsletter double opt-in over an in-memory subscriber table.
mod common;

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use common::Channels;
use ysk_clinic_api::errors::AppError;
use ysk_clinic_api::newsletter::{
    NewSubscriber, NewsletterService, SubscribeRequest, Subscriber, SubscriberStore,
    SubscriptionSource, SubscriptionStatus,
};

#[derive(Default)]
struct MemorySubscribers {
    rows: Mutex<Vec<Subscriber>>,
}

#[async_trait]
impl SubscriberStore for MemorySubscribers {
    async fn upsert_subscriber(&self, subscriber: &NewSubscriber) -> Result<Subscriber, AppError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows.iter_mut().find(|r| r.email == subscriber.email) {
            if subscriber.name.is_some() {
                existing.name = subscriber.name.clone();
            }
            return Ok(existing.clone());
        }
        let row = Subscriber {
            id: Uuid::new_v4(),
            email: subscriber.email.clone(),
            name: subscriber.name.clone(),
            source: subscriber.source.as_str().to_string(),
            status: SubscriptionStatus::PendingConfirmation,
            confirmation_token: Uuid::new_v4(),
            subscribed_at: Utc::now(),
            confirmed_at: None,
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn confirm_subscriber(&self, token: Uuid) -> Result<Option<Subscriber>, AppError> {
        let mut rows = self.rows.lock().unwrap();
        Ok(rows.iter_mut().find(|r| r.confirmation_token == token).map(|row| {
            row.status = SubscriptionStatus::Confirmed;
            row.confirmed_at.get_or_insert_with(Utc::now);
            row.clone()
        }))
    }
}

fn service(store: &Arc<MemorySubscribers>, channels: &Channels) -> NewsletterService {
    NewsletterService::new(store.clone(), channels.manager())
}

fn sign_up(email: &str) -> SubscribeRequest {
    SubscribeRequest {
        email: Some(email.to_string()),
        name: Some("김환자".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn sign_up_mails_the_confirmation_link() {
    let store = Arc::new(MemorySubscribers::default());
    let channels = Channels::new();

    let subscriber = service(&store, &channels)
        .subscribe(sign_up("Patient@Example.com"))
        .await
        .unwrap();

    assert_eq!(subscriber.email, "patient@example.com");
    assert_eq!(subscriber.status, SubscriptionStatus::PendingConfirmation);

    let sent = channels.email.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "patient@example.com");
    let link = format!(
        "https://ysk-eye.ai/api/newsletter/confirm?token={}",
        subscriber.confirmation_token
    );
    assert!(sent[0].html.contains(&link));
}

#[tokio::test]
async fn confirmed_address_is_not_mailed_again() {
    let store = Arc::new(MemorySubscribers::default());
    let channels = Channels::new();
    let newsletter = service(&store, &channels);

    let pending = newsletter.subscribe(sign_up("p@example.com")).await.unwrap();
    let confirmed = newsletter.confirm(pending.confirmation_token).await.unwrap();
    assert_eq!(confirmed.status, SubscriptionStatus::Confirmed);
    assert!(confirmed.confirmed_at.is_some());

    let again = newsletter
        .subscribe(SubscribeRequest {
            source: SubscriptionSource::Typebot,
            ..sign_up("p@example.com")
        })
        .await
        .unwrap();
    assert_eq!(again.status, SubscriptionStatus::Confirmed);
    assert_eq!(again.id, pending.id);
    assert_eq!(channels.emails(), 1);
}

#[tokio::test]
async fn pending_address_gets_the_link_again() {
    let store = Arc::new(MemorySubscribers::default());
    let channels = Channels::new();
    let newsletter = service(&store, &channels);

    let first = newsletter.subscribe(sign_up("p@example.com")).await.unwrap();
    let second = newsletter.subscribe(sign_up("p@example.com")).await.unwrap();

    assert_eq!(first.confirmation_token, second.confirmation_token);
    assert_eq!(channels.emails(), 2);
}

#[tokio::test]
async fn email_outage_fails_the_sign_up() {
    let store = Arc::new(MemorySubscribers::default());
    let channels = Channels::new();
    channels.email.fail.store(true, Ordering::SeqCst);

    let result = service(&store, &channels).subscribe(sign_up("p@example.com")).await;

    assert!(matches!(result, Err(AppError::ExternalApiError(_))));
}

#[tokio::test]
async fn unknown_token_is_not_found() {
    let store = Arc::new(MemorySubscribers::default());
    let channels = Channels::new();

    let result = service(&store, &channels).confirm(Uuid::new_v4()).await;

    assert!(matches!(
        result,
        Err(AppError::NotFound(m)) if m == "구독 확인 링크가 유효하지 않습니다"
    ));
}

#[tokio::test]
async fn invalid_sign_up_is_rejected_before_storing() {
    let store = Arc::new(MemorySubscribers::default());
    let channels = Channels::new();

    let result = service(&store, &channels)
        .subscribe(sign_up("someone@guerrillamail.com"))
        .await;

    assert!(matches!(result, Err(AppError::BadRequest(_))));
    assert!(store.rows.lock().unwrap().is_empty());
    assert_eq!(channels.emails(), 0);
}
