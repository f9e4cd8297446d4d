/// Lead intake against an in-memory store: booking de-duplication and
/// notification delivery when persistence is down.
mod common;

use async_trait::async_trait;
use chrono::Duration as Days;
use moka::future::Cache;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use common::Channels;
use ysk_clinic_api::db_storage::NewReservation;
use ysk_clinic_api::errors::AppError;
use ysk_clinic_api::lead_processor::{LeadProcessor, LeadStore};
use ysk_clinic_api::lead_scoring::LeadScore;
use ysk_clinic_api::models::{clinic_today, Lead, LeadSubmission};

#[derive(Default)]
struct MemoryLeadStore {
    patients: Mutex<Vec<String>>,
    reservations: Mutex<Vec<Uuid>>,
    leads: Mutex<Vec<Uuid>>,
    down: AtomicBool,
}

impl MemoryLeadStore {
    fn check(&self) -> Result<(), AppError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn reservation_count(&self) -> usize {
        self.reservations.lock().unwrap().len()
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn upsert_patient(
        &self,
        _full_name: &str,
        phone_number: &str,
        _email: Option<&str>,
    ) -> Result<Uuid, AppError> {
        self.check()?;
        self.patients.lock().unwrap().push(phone_number.to_string());
        Ok(Uuid::new_v4())
    }

    async fn create_reservation(&self, _reservation: &NewReservation<'_>) -> Result<Uuid, AppError> {
        self.check()?;
        let id = Uuid::new_v4();
        self.reservations.lock().unwrap().push(id);
        Ok(id)
    }

    async fn record_lead(
        &self,
        _patient_id: Option<Uuid>,
        _reservation_id: Option<Uuid>,
        _lead: &Lead,
        _score: &LeadScore,
    ) -> Result<Uuid, AppError> {
        self.check()?;
        let id = Uuid::new_v4();
        self.leads.lock().unwrap().push(id);
        Ok(id)
    }
}

fn processor(store: &Arc<MemoryLeadStore>, channels: &Channels) -> LeadProcessor {
    let recent_bookings = Cache::builder()
        .time_to_live(Duration::from_secs(300))
        .build();
    LeadProcessor::new(store.clone(), channels.manager(), recent_bookings)
}

fn booking(phone: &str) -> LeadSubmission {
    LeadSubmission {
        name: Some("김환자".into()),
        phone: Some(phone.into()),
        service_type: Some("lasik".into()),
        preferred_date: Some((clinic_today() + Days::days(30)).format("%Y-%m-%d").to_string()),
        preferred_time: Some("14:00".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn repeated_booking_returns_the_existing_reservation() {
    let store = Arc::new(MemoryLeadStore::default());
    let channels = Channels::new();
    let leads = processor(&store, &channels);

    let first = leads.book(booking("010-1234-5678")).await.unwrap();
    let second = leads.book(booking("01012345678")).await.unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(second.receipt.reservation_id, first.receipt.reservation_id);
    assert_eq!(store.reservation_count(), 1);

    // Different phone on the same date is a separate booking
    let other = leads.book(booking("010-9999-8888")).await.unwrap();
    assert!(!other.duplicate);
    assert_eq!(store.reservation_count(), 2);
}

#[tokio::test]
async fn concurrent_bookings_create_one_reservation() {
    let store = Arc::new(MemoryLeadStore::default());
    let channels = Channels::new();
    let leads = processor(&store, &channels);

    let (a, b) = tokio::join!(
        leads.book(booking("010-1234-5678")),
        leads.book(booking("010-1234-5678"))
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(store.reservation_count(), 1);
    assert_eq!(a.receipt.reservation_id, b.receipt.reservation_id);
    assert!(a.duplicate != b.duplicate);
}

#[tokio::test]
async fn failed_booking_is_not_remembered() {
    let store = Arc::new(MemoryLeadStore::default());
    let channels = Channels::new();
    let leads = processor(&store, &channels);

    store.down.store(true, Ordering::SeqCst);
    assert!(matches!(
        leads.book(booking("010-1234-5678")).await,
        Err(AppError::DatabaseError(_))
    ));

    store.down.store(false, Ordering::SeqCst);
    let retry = leads.book(booking("010-1234-5678")).await.unwrap();
    assert!(!retry.duplicate);
    assert_eq!(store.reservation_count(), 1);
}

#[tokio::test]
async fn intake_notifies_staff_when_the_store_is_down() {
    let store = Arc::new(MemoryLeadStore::default());
    store.down.store(true, Ordering::SeqCst);
    let channels = Channels::new();
    let leads = processor(&store, &channels);

    let report = leads
        .intake(LeadSubmission {
            name: Some("김환자".into()),
            phone: Some("010-1234-5678".into()),
            symptoms: Some("눈이 침침해요".into()),
            source: Some("typebot".into()),
            ..Default::default()
        })
        .await;

    assert!(!report.lead_saved);
    assert!(report.slack_notified);
    assert!(report.score.is_some());
    assert_eq!(report.errors, vec!["리드 저장 실패"]);
    assert_eq!(channels.posts().len(), 1);
}

#[tokio::test]
async fn intake_reports_a_slack_outage() {
    let store = Arc::new(MemoryLeadStore::default());
    let channels = Channels::new();
    channels.chat_ops.fail.store(true, Ordering::SeqCst);
    let leads = processor(&store, &channels);

    let report = leads
        .intake(LeadSubmission {
            name: Some("김환자".into()),
            phone: Some("010-1234-5678".into()),
            ..Default::default()
        })
        .await;

    assert!(report.lead_saved);
    assert!(!report.slack_notified);
    assert_eq!(report.errors, vec!["Slack 알림 발송 실패"]);
}
