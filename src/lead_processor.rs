//! Lead intake shared by the booking form and the Typebot webhook.

use async_trait::async_trait;
use chrono::NaiveDate;
use moka::future::Cache;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db_storage::NewReservation;
use crate::errors::AppError;
use crate::lead_scoring::{LeadScore, LeadScorer};
use crate::models::{
    clinic_today, reservation_service_code, reservation_time_for, Lead, LeadSubmission, Priority,
};
use crate::notifications::{
    AppointmentNotification, LeadNotification, NotificationConfig, NotificationManager,
};
use crate::validation::digits_only;

/// Writes lead intake depends on.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Insert the patient or refresh the one with this phone number. Returns its id.
    async fn upsert_patient(
        &self,
        full_name: &str,
        phone_number: &str,
        email: Option<&str>,
    ) -> Result<Uuid, AppError>;

    async fn create_reservation(&self, reservation: &NewReservation<'_>) -> Result<Uuid, AppError>;

    async fn record_lead(
        &self,
        patient_id: Option<Uuid>,
        reservation_id: Option<Uuid>,
        lead: &Lead,
        score: &LeadScore,
    ) -> Result<Uuid, AppError>;
}

/// Compact view of a [`LeadScore`] returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub score: u32,
    pub priority: Priority,
    pub recommendations: Vec<String>,
}

impl From<&LeadScore> for ScoreSummary {
    fn from(score: &LeadScore) -> Self {
        Self {
            score: score.score,
            priority: score.priority,
            recommendations: score.recommendations.clone(),
        }
    }
}

/// What a successful booking created.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingReceipt {
    pub patient_id: Uuid,
    pub reservation_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub preferred_date: NaiveDate,
    pub preferred_time: String,
    pub service_type: String,
    pub score: ScoreSummary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingOutcome {
    pub receipt: BookingReceipt,
    /// Same phone and date were booked within the de-duplication window.
    pub duplicate: bool,
}

/// Result of a best-effort webhook intake.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeReport {
    pub lead_saved: bool,
    pub newsletter_subscribed: bool,
    pub slack_notified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreSummary>,
    pub errors: Vec<String>,
}

/// Fields the booking form must fill in.
pub fn missing_booking_fields(submission: &LeadSubmission) -> Vec<&'static str> {
    let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
    [
        ("name", &submission.name),
        ("phone", &submission.phone),
        ("serviceType", &submission.service_type),
        ("preferredDate", &submission.preferred_date),
        ("preferredTime", &submission.preferred_time),
    ]
    .into_iter()
    .filter(|(_, value)| blank(value))
    .map(|(field, _)| field)
    .collect()
}

/// Parse a `YYYY-MM-DD` preferred date that must not lie before `today`.
pub fn parse_preferred_date(raw: &str, today: NaiveDate) -> Result<NaiveDate, AppError> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        AppError::BadRequest("preferredDate: 날짜 형식이 올바르지 않습니다 (YYYY-MM-DD)".to_string())
    })?;
    if date < today {
        return Err(AppError::BadRequest(
            "preferredDate: 희망 날짜는 오늘 이후여야 합니다".to_string(),
        ));
    }
    Ok(date)
}

/// Reservation notes kept for front-desk staff.
pub fn reservation_notes(lead: &Lead) -> String {
    match &lead.symptoms {
        Some(symptoms) => format!("증상/요청사항: {}\n출처: {}", symptoms, lead.source.as_str()),
        None => format!("출처: {}", lead.source.as_str()),
    }
}

pub fn booking_key(phone_digits: &str, date: NaiveDate) -> String {
    format!("lead:{}:{}", phone_digits, date)
}

fn lead_notification(lead: &Lead, phone: &str, score: &LeadScore) -> LeadNotification {
    LeadNotification {
        patient_name: lead.name.clone(),
        phone_number: phone.to_string(),
        service_type: lead.service_type.clone(),
        priority: score.priority,
        source: Some(lead.source.as_str().to_string()),
        symptoms: lead.symptoms.clone(),
        preferred_date: lead.preferred_date.clone(),
        preferred_time: lead.preferred_time.clone(),
        score: Some(score.score),
    }
}

pub struct LeadProcessor {
    storage: Arc<dyn LeadStore>,
    notifier: Arc<NotificationManager>,
    recent_bookings: Cache<String, BookingReceipt>,
}

impl LeadProcessor {
    pub fn new(
        storage: Arc<dyn LeadStore>,
        notifier: Arc<NotificationManager>,
        recent_bookings: Cache<String, BookingReceipt>,
    ) -> Self {
        Self {
            storage,
            notifier,
            recent_bookings,
        }
    }

    /// Book a reservation for a form lead.
    ///
    /// A resubmission of the same phone and date inside the cache window returns the
    /// earlier receipt instead of booking twice. Notifications run in the background.
    pub async fn book(&self, submission: LeadSubmission) -> Result<BookingOutcome, AppError> {
        let missing = missing_booking_fields(&submission);
        if !missing.is_empty() {
            return Err(AppError::BadRequest(format!(
                "필수 필드가 누락되었습니다: {}",
                missing.join(", ")
            )));
        }

        let lead = submission
            .validate()
            .map_err(|errors| AppError::BadRequest(errors.join(", ")))?;
        let date = parse_preferred_date(lead.preferred_date.as_deref().unwrap_or_default(), clinic_today())?;
        let score = LeadScorer::score(&lead);
        let phone = digits_only(&lead.phone);
        let key = booking_key(&phone, date);

        let entry = self
            .recent_bookings
            .entry(key)
            .or_try_insert_with(self.create_booking(&lead, &phone, date, &score))
            .await
            .map_err(|e| {
                Arc::try_unwrap(e).unwrap_or_else(|shared| AppError::InternalError(shared.to_string()))
            })?;

        let duplicate = !entry.is_fresh();
        let receipt = entry.into_value();

        if duplicate {
            tracing::info!(
                reservation_id = %receipt.reservation_id,
                "Duplicate lead submission, returning existing booking"
            );
        } else {
            self.spawn_booking_notifications(&lead, &phone, &receipt, &score);
        }

        Ok(BookingOutcome { receipt, duplicate })
    }

    async fn create_booking(
        &self,
        lead: &Lead,
        phone: &str,
        date: NaiveDate,
        score: &LeadScore,
    ) -> Result<BookingReceipt, AppError> {
        let patient_id = self
            .storage
            .upsert_patient(&lead.name, phone, lead.email.as_deref())
            .await?;

        let service_code = reservation_service_code(&lead.service_type);
        let time = reservation_time_for(lead.preferred_time.as_deref().unwrap_or_default());
        let reservation_id = self
            .storage
            .create_reservation(&NewReservation {
                patient_id,
                date,
                time: &time,
                service_code,
                notes: reservation_notes(lead),
            })
            .await?;

        let lead_id = match self
            .storage
            .record_lead(Some(patient_id), Some(reservation_id), lead, score)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(reservation_id = %reservation_id, "Lead tracking insert failed (ignored): {}", e);
                None
            }
        };

        tracing::info!(
            patient_id = %patient_id,
            reservation_id = %reservation_id,
            score = score.score,
            priority = %score.priority,
            "✓ Lead booked"
        );

        Ok(BookingReceipt {
            patient_id,
            reservation_id,
            lead_id,
            preferred_date: date,
            preferred_time: time,
            service_type: service_code.to_string(),
            score: ScoreSummary::from(score),
        })
    }

    fn spawn_booking_notifications(
        &self,
        lead: &Lead,
        phone: &str,
        receipt: &BookingReceipt,
        score: &LeadScore,
    ) {
        let notifier = Arc::clone(&self.notifier);
        let staff = lead_notification(lead, phone, score);
        let patient = AppointmentNotification {
            patient_name: lead.name.clone(),
            phone_number: phone.to_string(),
            email: lead.email.clone(),
            appointment_date: receipt.preferred_date.format("%Y-%m-%d").to_string(),
            appointment_time: receipt.preferred_time.clone(),
            service_type: Some(lead.service_type.clone()),
            doctor_name: None,
            notes: None,
            priority: score.priority,
        };
        let reservation_id = receipt.reservation_id;

        tokio::spawn(async move {
            let (slack, confirmation) = tokio::join!(
                notifier.send_lead_notification(&staff),
                notifier.send_appointment_confirmation(&patient, Some(NotificationConfig::kakao_only())),
            );
            tracing::info!(
                reservation_id = %reservation_id,
                slack,
                kakao = confirmation.kakao,
                "Lead notifications finished"
            );
        });
    }

    /// Score and record a chatbot lead, then alert staff. Never fails; problems are
    /// collected in the report.
    pub async fn intake(&self, submission: LeadSubmission) -> IntakeReport {
        let mut report = IntakeReport::default();

        let lead = match submission.validate() {
            Ok(lead) => lead,
            Err(errors) => {
                tracing::warn!(?errors, "Webhook lead failed validation");
                report.errors.extend(errors);
                return report;
            }
        };
        let score = LeadScorer::score(&lead);
        report.score = Some(ScoreSummary::from(&score));
        let phone = digits_only(&lead.phone);

        match self.save_lead(&lead, &phone, &score).await {
            Ok(lead_id) => {
                tracing::info!(lead_id = %lead_id, score = score.score, "✓ Webhook lead saved");
                report.lead_saved = true;
            }
            Err(e) => {
                tracing::error!("Failed to save webhook lead: {}", e);
                report.errors.push("리드 저장 실패".to_string());
            }
        }

        report.slack_notified = self
            .notifier
            .send_lead_notification(&lead_notification(&lead, &phone, &score))
            .await;
        if !report.slack_notified {
            report.errors.push("Slack 알림 발송 실패".to_string());
        }

        report
    }

    async fn save_lead(&self, lead: &Lead, phone: &str, score: &LeadScore) -> Result<Uuid, AppError> {
        let patient_id = self
            .storage
            .upsert_patient(&lead.name, phone, lead.email.as_deref())
            .await?;
        self.storage.record_lead(Some(patient_id), None, lead, score).await
    }
}
