use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{AppError, ResultExt};
use crate::lead_processor::LeadStore;
use crate::lead_scoring::LeadScore;
use crate::newsletter::{NewSubscriber, Subscriber, SubscriberStore};
use crate::models::{
    Faq, FaqInput, Lead, PatientContact, ReminderKind, Reservation, ReservationStatus,
};
use crate::reminder_scheduler::ReservationStore;

/// New pending reservation.
#[derive(Debug, Clone)]
pub struct NewReservation<'a> {
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub time: &'a str,
    pub service_code: &'a str,
    pub notes: String,
}

/// Consultation history row.
#[derive(Debug, Clone)]
pub struct NewConsultation<'a> {
    pub patient_id: Uuid,
    pub symptoms: &'a str,
    pub recommendations: &'a str,
    pub urgency_level: i32,
    pub conversation: Value,
    pub follow_up_needed: bool,
    pub appointment_suggested: bool,
}

/// Lead as listed for staff.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadListing {
    pub id: Uuid,
    pub patient_id: Option<Uuid>,
    pub reservation_id: Option<Uuid>,
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub source: String,
    pub service_type: String,
    pub score: i32,
    pub priority: String,
    pub reservation_date: Option<NaiveDate>,
    pub reservation_time: Option<String>,
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct FaqFilter {
    pub published: Option<bool>,
    pub category: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    reservation_date: NaiveDate,
    reservation_time: String,
    service_type: String,
    status: String,
    reminder_sent: Option<bool>,
    today_reminder_sent: Option<bool>,
    followup_sent: Option<bool>,
    patient_id: Option<Uuid>,
    full_name: Option<String>,
    phone_number: Option<String>,
    email: Option<String>,
}

impl From<ReservationRow> for Reservation {
    fn from(row: ReservationRow) -> Self {
        let patient = match (row.patient_id, row.full_name) {
            (Some(id), Some(full_name)) => Some(PatientContact {
                id,
                full_name,
                phone_number: row.phone_number.unwrap_or_default(),
                email: row.email.filter(|e| !e.is_empty()),
            }),
            _ => None,
        };

        Reservation {
            id: row.id,
            reservation_date: row.reservation_date,
            reservation_time: row.reservation_time,
            service_type: row.service_type,
            status: row.status.parse().unwrap_or(ReservationStatus::Pending),
            reminder_sent: row.reminder_sent.unwrap_or(false),
            today_reminder_sent: row.today_reminder_sent.unwrap_or(false),
            followup_sent: row.followup_sent.unwrap_or(false),
            patient,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SubscriberRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    source: String,
    status: String,
    confirmation_token: Uuid,
    subscribed_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
}

impl TryFrom<SubscriberRow> for Subscriber {
    type Error = AppError;

    fn try_from(row: SubscriberRow) -> Result<Self, Self::Error> {
        Ok(Subscriber {
            id: row.id,
            email: row.email,
            name: row.name,
            source: row.source,
            status: row.status.parse()?,
            confirmation_token: row.confirmation_token,
            subscribed_at: row.subscribed_at,
            confirmed_at: row.confirmed_at,
        })
    }
}

const SUBSCRIBER_COLUMNS: &str =
    "id, email, name, source, status, confirmation_token, subscribed_at, confirmed_at";

/// Postgres access for patients, reservations, leads, consultations and FAQs.
#[derive(Clone)]
pub struct ClinicStorage {
    pool: PgPool,
}

impl ClinicStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the patient or refresh name and email of the one with this phone number.
    pub async fn upsert_patient(
        &self,
        full_name: &str,
        phone_number: &str,
        email: Option<&str>,
    ) -> Result<Uuid, AppError> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO patients (full_name, phone_number, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (phone_number) DO UPDATE
                SET full_name = EXCLUDED.full_name,
                    email = COALESCE(EXCLUDED.email, patients.email),
                    updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(full_name)
        .bind(phone_number)
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .context("Failed to upsert patient")
    }

    pub async fn create_reservation(&self, reservation: &NewReservation<'_>) -> Result<Uuid, AppError> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO reservations (patient_id, reservation_date, reservation_time, type, status, notes)
            VALUES ($1, $2, $3, $4, 'pending', $5)
            RETURNING id
            "#,
        )
        .bind(reservation.patient_id)
        .bind(reservation.date)
        .bind(reservation.time)
        .bind(reservation.service_code)
        .bind(&reservation.notes)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create reservation")
    }

    /// Store a scored lead for follow-up tracking.
    pub async fn record_lead(
        &self,
        patient_id: Option<Uuid>,
        reservation_id: Option<Uuid>,
        lead: &Lead,
        score: &LeadScore,
    ) -> Result<Uuid, AppError> {
        let lead_data = json!({ "lead": lead, "score": score });

        sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO lead_tracking (patient_id, reservation_id, source, service_type, score, priority, lead_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(patient_id)
        .bind(reservation_id)
        .bind(lead.source.as_str())
        .bind(&lead.service_type)
        .bind(score.score as i32)
        .bind(score.priority.as_str())
        .bind(lead_data)
        .fetch_one(&self.pool)
        .await
        .context("Failed to record lead")
    }

    /// Newest leads first, with the total count for pagination.
    pub async fn list_leads(
        &self,
        limit: i64,
        offset: i64,
        source: Option<&str>,
    ) -> Result<(Vec<LeadListing>, i64), AppError> {
        let rows = sqlx::query_as::<_, LeadListing>(
            r#"
            SELECT l.id, l.patient_id, l.reservation_id,
                   p.full_name, p.phone_number, p.email,
                   l.source, l.service_type, l.score, l.priority,
                   r.reservation_date, r.reservation_time::text AS reservation_time, r.status,
                   l.created_at
            FROM lead_tracking l
            LEFT JOIN patients p ON p.id = l.patient_id
            LEFT JOIN reservations r ON r.id = l.reservation_id
            WHERE ($1::text IS NULL OR l.source = $1)
            ORDER BY l.created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(source)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list leads")?;

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM lead_tracking WHERE ($1::text IS NULL OR source = $1)",
        )
        .bind(source)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count leads")?;

        Ok((rows, total))
    }

    pub async fn record_consultation(&self, consultation: &NewConsultation<'_>) -> Result<Uuid, AppError> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO consultations
                (patient_id, conversation_history, symptoms, recommendations, urgency_level,
                 follow_up_needed, appointment_suggested)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(consultation.patient_id)
        .bind(&consultation.conversation)
        .bind(consultation.symptoms)
        .bind(consultation.recommendations)
        .bind(consultation.urgency_level)
        .bind(consultation.follow_up_needed)
        .bind(consultation.appointment_suggested)
        .fetch_one(&self.pool)
        .await
        .context("Failed to record consultation")
    }

    // ============ FAQ ============

    /// FAQs in display order: `order_index` ascending, newest first within a slot.
    pub async fn list_faqs(&self, filter: &FaqFilter) -> Result<Vec<Faq>, AppError> {
        sqlx::query_as::<_, Faq>(
            r#"
            SELECT id, category, question, answer, order_index, is_published, view_count, created_at, updated_at
            FROM faqs
            WHERE ($1::bool IS NULL OR is_published = $1)
              AND ($2::text IS NULL OR category = $2)
            ORDER BY order_index ASC, created_at DESC
            "#,
        )
        .bind(filter.published)
        .bind(filter.category.as_deref())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list FAQs")
    }

    pub async fn get_faq(&self, id: Uuid) -> Result<Option<Faq>, AppError> {
        sqlx::query_as::<_, Faq>(
            r#"
            SELECT id, category, question, answer, order_index, is_published, view_count, created_at, updated_at
            FROM faqs WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load FAQ")
    }

    pub async fn create_faq(&self, input: &FaqInput) -> Result<Faq, AppError> {
        sqlx::query_as::<_, Faq>(
            r#"
            INSERT INTO faqs (category, question, answer, order_index, is_published)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, category, question, answer, order_index, is_published, view_count, created_at, updated_at
            "#,
        )
        .bind(&input.category)
        .bind(input.question.trim())
        .bind(input.answer.trim())
        .bind(input.order_index)
        .bind(input.is_published)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create FAQ")
    }

    pub async fn update_faq(&self, id: Uuid, input: &FaqInput) -> Result<Option<Faq>, AppError> {
        sqlx::query_as::<_, Faq>(
            r#"
            UPDATE faqs
            SET category = $2, question = $3, answer = $4, order_index = $5, is_published = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, category, question, answer, order_index, is_published, view_count, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&input.category)
        .bind(input.question.trim())
        .bind(input.answer.trim())
        .bind(input.order_index)
        .bind(input.is_published)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update FAQ")
    }

    /// Returns whether a row was deleted.
    pub async fn delete_faq(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM faqs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete FAQ")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn toggle_faq_published(&self, id: Uuid) -> Result<Option<Faq>, AppError> {
        sqlx::query_as::<_, Faq>(
            r#"
            UPDATE faqs
            SET is_published = NOT is_published, updated_at = NOW()
            WHERE id = $1
            RETURNING id, category, question, answer, order_index, is_published, view_count, created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to toggle FAQ publication")
    }
}

#[async_trait]
impl LeadStore for ClinicStorage {
    async fn upsert_patient(
        &self,
        full_name: &str,
        phone_number: &str,
        email: Option<&str>,
    ) -> Result<Uuid, AppError> {
        ClinicStorage::upsert_patient(self, full_name, phone_number, email).await
    }

    async fn create_reservation(&self, reservation: &NewReservation<'_>) -> Result<Uuid, AppError> {
        ClinicStorage::create_reservation(self, reservation).await
    }

    async fn record_lead(
        &self,
        patient_id: Option<Uuid>,
        reservation_id: Option<Uuid>,
        lead: &Lead,
        score: &LeadScore,
    ) -> Result<Uuid, AppError> {
        ClinicStorage::record_lead(self, patient_id, reservation_id, lead, score).await
    }
}

#[async_trait]
impl SubscriberStore for ClinicStorage {
    async fn upsert_subscriber(&self, subscriber: &NewSubscriber) -> Result<Subscriber, AppError> {
        let sql = format!(
            r#"
            INSERT INTO newsletter_subscribers (email, name, source, tags, preferences, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (email) DO UPDATE
                SET name = COALESCE(EXCLUDED.name, newsletter_subscribers.name),
                    tags = ARRAY(SELECT DISTINCT unnest(newsletter_subscribers.tags || EXCLUDED.tags)),
                    preferences = EXCLUDED.preferences,
                    updated_at = NOW()
            RETURNING {columns}
            "#,
            columns = SUBSCRIBER_COLUMNS
        );

        let row = sqlx::query_as::<_, SubscriberRow>(&sql)
            .bind(&subscriber.email)
            .bind(subscriber.name.as_deref())
            .bind(subscriber.source.as_str())
            .bind(&subscriber.tags)
            .bind(json!(subscriber.preferences))
            .bind(json!(subscriber.metadata))
            .fetch_one(&self.pool)
            .await
            .context("Failed to upsert newsletter subscriber")?;

        Subscriber::try_from(row)
    }

    async fn confirm_subscriber(&self, token: Uuid) -> Result<Option<Subscriber>, AppError> {
        let sql = format!(
            r#"
            UPDATE newsletter_subscribers
            SET status = 'confirmed', confirmed_at = COALESCE(confirmed_at, NOW()), updated_at = NOW()
            WHERE confirmation_token = $1
            RETURNING {columns}
            "#,
            columns = SUBSCRIBER_COLUMNS
        );

        sqlx::query_as::<_, SubscriberRow>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to confirm newsletter subscriber")?
            .map(Subscriber::try_from)
            .transpose()
    }
}

#[async_trait]
impl ReservationStore for ClinicStorage {
    async fn due_reservations(
        &self,
        date: NaiveDate,
        kind: ReminderKind,
    ) -> Result<Vec<Reservation>, AppError> {
        // Column name comes from a fixed match, never from input
        let sql = format!(
            r#"
            SELECT r.id, r.reservation_date, r.reservation_time::text AS reservation_time,
                   r.type AS service_type, r.status,
                   r.reminder_sent, r.today_reminder_sent, r.followup_sent,
                   p.id AS patient_id, p.full_name, p.phone_number, p.email
            FROM reservations r
            LEFT JOIN patients p ON p.id = r.patient_id
            WHERE r.reservation_date = $1
              AND r.status IN ('pending', 'confirmed')
              AND r.{flag} IS NOT TRUE
            ORDER BY r.reservation_time ASC
            "#,
            flag = kind.flag_column()
        );

        let rows = sqlx::query_as::<_, ReservationRow>(&sql)
            .bind(date)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to load reservations for {}", date))?;

        Ok(rows.into_iter().map(Reservation::from).collect())
    }

    async fn mark_reminder_sent(&self, reservation_id: Uuid, kind: ReminderKind) -> Result<(), AppError> {
        let sql = format!(
            "UPDATE reservations SET {flag} = TRUE, updated_at = NOW() WHERE id = $1",
            flag = kind.flag_column()
        );

        let result = sqlx::query(&sql)
            .bind(reservation_id)
            .execute(&self.pool)
            .await
            .context("Failed to set reminder flag")?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("reservation {}", reservation_id)));
        }
        Ok(())
    }
}
