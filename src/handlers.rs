use crate::config::Config;
use crate::consultation::{urgency_level, ConsultationSummaryRequest};
use crate::db_storage::{ClinicStorage, FaqFilter, NewConsultation};
use crate::errors::{AppError, AppJson};
use crate::lead_processor::{BookingReceipt, LeadProcessor};
use crate::models::{clinic_today, FaqInput, LeadSubmission, Priority};
use crate::newsletter::{NewsletterService, SubscribeRequest, SubscriptionStatus};
use crate::notifications::{
    AppointmentNotification, ConsultationNotification, EmergencyNotification, LeadNotification,
    NotificationConfig, NotificationEvent, NotificationManager,
};
use crate::rate_limiter::{resolve_client, RateLimiter};
use crate::reminder_scheduler::{ReminderJob, ReminderScheduler};
use crate::webhook_handler::constant_time_compare;
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use moka::future::Cache;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Postgres access for every table.
    pub storage: ClinicStorage,
    /// Booking and webhook lead intake.
    pub leads: Arc<LeadProcessor>,
    pub notifications: Arc<NotificationManager>,
    /// Newsletter sign-up and confirmation.
    pub newsletter: Arc<NewsletterService>,
    /// Daily reminder jobs; started at boot only when configured.
    pub scheduler: Arc<ReminderScheduler>,
    /// Per-route request quotas.
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Wire storage, lead intake, scheduler and an in-memory rate limiter around `pool`.
    pub fn new(config: Config, pool: PgPool, notifications: Arc<NotificationManager>) -> Self {
        // Same phone and date within 5 minutes is treated as a double submission
        let recent_bookings: Cache<String, BookingReceipt> = Cache::builder()
            .time_to_live(Duration::from_secs(300))
            .max_capacity(10_000)
            .build();

        let storage = ClinicStorage::new(pool);
        let leads = Arc::new(LeadProcessor::new(
            Arc::new(storage.clone()),
            Arc::clone(&notifications),
            recent_bookings,
        ));
        let newsletter = Arc::new(NewsletterService::new(
            Arc::new(storage.clone()),
            Arc::clone(&notifications),
        ));
        let scheduler = Arc::new(ReminderScheduler::new(
            Arc::new(storage.clone()),
            Arc::clone(&notifications),
        ));

        Self {
            config,
            storage,
            leads,
            notifications,
            newsletter,
            scheduler,
            rate_limiter: Arc::new(RateLimiter::in_memory()),
        }
    }
}

/// Bearer-token check for admin routes. Open when `ADMIN_API_TOKEN` is unset.
pub fn require_admin(config: &Config, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = config.admin_token.as_deref() else {
        return Ok(());
    };

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

    if !constant_time_compare(token.trim(), expected) {
        tracing::warn!("Invalid admin token received");
        return Err(AppError::Unauthorized("Invalid admin token".to_string()));
    }

    Ok(())
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

// ============ Leads ============

/// POST /api/leads
///
/// Books a pending reservation for a website lead. Responds 201 with the new ids, or
/// 200 with the earlier receipt when the same phone and date were just submitted.
pub async fn create_lead(
    State(state): State<Arc<AppState>>,
    AppJson(submission): AppJson<LeadSubmission>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let outcome = state.leads.book(submission).await?;

    let (status, message) = if outcome.duplicate {
        (StatusCode::OK, "이미 접수된 예약입니다.")
    } else {
        (StatusCode::CREATED, "리드가 성공적으로 등록되었습니다.")
    };

    Ok((
        status,
        Json(json!({
            "success": true,
            "message": message,
            "duplicate": outcome.duplicate,
            "data": outcome.receipt,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct LeadListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub source: Option<String>,
}

/// GET /api/leads
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<LeadListQuery>,
) -> Result<Json<Value>, AppError> {
    require_admin(&state.config, &headers)?;

    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let offset = params.offset.unwrap_or(0).max(0);
    let source = params.source.as_deref().filter(|s| !s.is_empty());

    let (rows, total) = state.storage.list_leads(limit, offset, source).await?;

    Ok(Json(json!({
        "success": true,
        "data": rows,
        "pagination": {
            "limit": limit,
            "offset": offset,
            "total": total
        }
    })))
}

// ============ Notifications ============

pub const NOTIFICATION_TYPES: [&str; 7] = [
    "appointment_confirmation",
    "appointment_reminder",
    "appointment_cancellation",
    "consultation_summary",
    "lead_notification",
    "emergency",
    "system_alert",
];

#[derive(Debug, Deserialize)]
pub struct NotificationRequest {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub data: Option<Value>,
    pub channels: Option<NotificationConfig>,
}

fn required_fields(kind: &str) -> Option<&'static [&'static str]> {
    let fields: &'static [&'static str] = match kind {
        "appointment_confirmation" | "appointment_reminder" => {
            &["patientName", "phoneNumber", "appointmentDate", "appointmentTime"]
        }
        "appointment_cancellation" => &["patientName", "appointmentDate", "appointmentTime"],
        "consultation_summary" => &["patientName", "phoneNumber", "symptoms", "recommendations"],
        "lead_notification" => &["patientName", "phoneNumber", "serviceType"],
        "emergency" => &["patientName", "phoneNumber", "message"],
        "system_alert" => &["message"],
        _ => return None,
    };
    Some(fields)
}

fn is_present(data: &Value, field: &str) -> bool {
    match data.get(field) {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

fn decode<T: serde::de::DeserializeOwned>(kind: &str, data: Value) -> Result<T, AppError> {
    serde_json::from_value(data)
        .map_err(|e| AppError::BadRequest(format!("{} 데이터 형식이 올바르지 않습니다: {}", kind, e)))
}

/// Validate the per-type required fields and build the event.
pub fn parse_notification(kind: &str, data: Value) -> Result<NotificationEvent, AppError> {
    let required = required_fields(kind)
        .ok_or_else(|| AppError::BadRequest(format!("지원되지 않는 알림 타입: {}", kind)))?;

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|field| !is_present(&data, field))
        .collect();
    if !missing.is_empty() {
        return Err(AppError::BadRequest(format!(
            "{} 알림에는 {}이(가) 필요합니다",
            kind,
            missing.join(", ")
        )));
    }

    let event = match kind {
        "appointment_confirmation" => {
            NotificationEvent::AppointmentConfirmation(decode::<AppointmentNotification>(kind, data)?)
        }
        "appointment_reminder" => {
            NotificationEvent::AppointmentReminder(decode::<AppointmentNotification>(kind, data)?)
        }
        "appointment_cancellation" => {
            NotificationEvent::AppointmentCancellation(decode::<AppointmentNotification>(kind, data)?)
        }
        "consultation_summary" => {
            NotificationEvent::ConsultationSummary(decode::<ConsultationNotification>(kind, data)?)
        }
        "lead_notification" => NotificationEvent::LeadSubmission(decode::<LeadNotification>(kind, data)?),
        "emergency" => NotificationEvent::Emergency(decode::<EmergencyNotification>(kind, data)?),
        _ => {
            #[derive(Deserialize)]
            struct Alert {
                message: String,
                #[serde(default)]
                priority: Priority,
            }
            let alert = decode::<Alert>(kind, data)?;
            NotificationEvent::SystemAlert {
                message: alert.message,
                priority: alert.priority,
            }
        }
    };

    Ok(event)
}

/// POST /api/notifications/send
pub async fn send_notification(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AppJson(request): AppJson<NotificationRequest>,
) -> Result<Json<Value>, AppError> {
    require_admin(&state.config, &headers)?;

    let (Some(kind), Some(data)) = (request.kind, request.data) else {
        return Err(AppError::BadRequest("type과 data는 필수 항목입니다".to_string()));
    };

    let event = parse_notification(&kind, data)?;
    let channels = request.channels.unwrap_or(NotificationConfig::all());

    tracing::info!(kind = %kind, ?channels, "Manual notification dispatch");
    let result = state.notifications.dispatch(&event, Some(channels)).await;

    let success = result.any_success();
    let message = match (success, result.errors.is_empty()) {
        (true, true) => "모든 알림이 성공적으로 발송되었습니다",
        (true, false) => "일부 알림이 발송되었습니다",
        (false, _) => "알림 발송에 실패했습니다",
    };

    Ok(Json(json!({
        "success": success,
        "result": result,
        "message": message,
    })))
}

/// GET /api/notifications/send
pub async fn notification_types() -> Json<Value> {
    Json(json!({
        "message": "연수김안과의원 통합 알림 시스템",
        "types": NOTIFICATION_TYPES,
        "channels": ["email", "slack", "kakao"],
        "timestamp": timestamp(),
    }))
}

// ============ Scheduler ============

#[derive(Debug, Deserialize)]
pub struct SchedulerRequest {
    pub action: Option<String>,
}

const SCHEDULER_ACTIONS: [&str; 6] = ["start", "stop", "send_tomorrow", "send_today", "send_followup", "status"];

/// GET /api/scheduler/reminder
pub async fn scheduler_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": state.scheduler.status(),
        "availableActions": SCHEDULER_ACTIONS,
        "timestamp": timestamp(),
    }))
}

/// POST /api/scheduler/reminder
pub async fn scheduler_action(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AppJson(request): AppJson<SchedulerRequest>,
) -> Result<Json<Value>, AppError> {
    require_admin(&state.config, &headers)?;

    let action = request
        .action
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("action은 필수 항목입니다".to_string()))?;

    let scheduler = &state.scheduler;
    let data = match action.as_str() {
        "start" => {
            let started = scheduler.start();
            json!({
                "action": action,
                "success": started,
                "message": if started { "리마인더 스케줄러가 시작되었습니다" } else { "리마인더 스케줄러가 이미 실행 중입니다" },
                "status": scheduler.status(),
            })
        }
        "stop" => {
            let stopped = scheduler.stop();
            json!({
                "action": action,
                "success": stopped,
                "message": if stopped { "리마인더 스케줄러가 중지되었습니다" } else { "리마인더 스케줄러가 실행 중이 아닙니다" },
            })
        }
        "status" => json!({
            "action": action,
            "success": true,
            "scheduler": scheduler.status(),
        }),
        "send_tomorrow" | "send_today" | "send_followup" => {
            let job = match action.as_str() {
                "send_tomorrow" => ReminderJob::Tomorrow,
                "send_today" => ReminderJob::Today,
                _ => ReminderJob::Followup,
            };
            match scheduler.trigger(job, clinic_today()).await {
                Ok(run) => json!({
                    "action": action,
                    "success": true,
                    "run": run,
                    "executedAt": timestamp(),
                }),
                Err(e) => json!({
                    "action": action,
                    "success": false,
                    "error": e.to_string(),
                }),
            }
        }
        other => {
            return Err(AppError::BadRequest(format!(
                "지원되지 않는 액션: {} (가능: {})",
                other,
                SCHEDULER_ACTIONS.join(", ")
            )))
        }
    };

    Ok(Json(json!({
        "success": data["success"].as_bool().unwrap_or(false),
        "data": data,
        "timestamp": timestamp(),
    })))
}

/// DELETE /api/scheduler/reminder
pub async fn scheduler_shutdown(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    require_admin(&state.config, &headers)?;

    let stopped = state.scheduler.stop();
    Ok(Json(json!({
        "success": true,
        "stopped": stopped,
        "message": "리마인더 스케줄러가 정지되었습니다",
        "timestamp": timestamp(),
    })))
}

// ============ Consultation ============

/// POST /api/consultation/summary
///
/// Stores a chatbot consultation and sends the patient its summary by email (when an
/// address is known) and KakaoTalk.
pub async fn consultation_summary(
    State(state): State<Arc<AppState>>,
    AppJson(request): AppJson<ConsultationSummaryRequest>,
) -> Result<Json<Value>, AppError> {
    let summary = request.validate().map_err(AppError::BadRequest)?;

    let patient_id = state
        .storage
        .upsert_patient(&summary.patient_name, &summary.phone_number, summary.email.as_deref())
        .await?;

    let conversation = serde_json::to_value(&summary.conversation)
        .map_err(|e| AppError::InternalError(format!("Failed to serialize conversation: {}", e)))?;

    let consultation_id = match state
        .storage
        .record_consultation(&NewConsultation {
            patient_id,
            symptoms: &summary.symptoms,
            recommendations: &summary.recommendations,
            urgency_level: urgency_level(summary.urgency),
            conversation,
            follow_up_needed: summary.follow_up_needed,
            appointment_suggested: summary.appointment_suggested,
        })
        .await
    {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::error!(patient_id = %patient_id, "Failed to store consultation (continuing): {}", e);
            None
        }
    };

    let notification = ConsultationNotification {
        patient_name: summary.patient_name.clone(),
        phone_number: summary.phone_number.clone(),
        email: summary.email.clone(),
        consultation_date: Some(
            summary
                .consultation_date
                .clone()
                .unwrap_or_else(|| clinic_today().format("%Y-%m-%d").to_string()),
        ),
        symptoms: summary.symptoms.clone(),
        recommendations: summary.recommendations.clone(),
        urgency: Some(summary.urgency),
    };
    let channels = NotificationConfig {
        email: summary.email.is_some(),
        slack: false,
        kakao: true,
    };
    let notification_result = state
        .notifications
        .send_consultation_summary(&notification, Some(channels))
        .await;

    Ok(Json(json!({
        "success": true,
        "message": "상담 요약이 성공적으로 발송되었습니다",
        "data": {
            "patientId": patient_id,
            "consultationId": consultation_id,
            "notificationResult": notification_result,
            "summary": {
                "symptoms": summary.symptoms,
                "recommendations": summary.recommendations,
                "urgency": summary.urgency,
                "followUpNeeded": summary.follow_up_needed,
                "appointmentSuggested": summary.appointment_suggested,
            }
        }
    })))
}

// ============ Newsletter ============

fn header_text(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// POST /api/newsletter/subscribe
///
/// Records a pending subscription and mails the confirmation link. Request metadata
/// not supplied by the client is filled in from the request itself.
pub async fn newsletter_subscribe(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    AppJson(mut request): AppJson<SubscribeRequest>,
) -> Result<Json<Value>, AppError> {
    let metadata = &mut request.metadata;
    if metadata.ip_address.is_none() {
        let peer = peer.map(|ConnectInfo(addr)| addr.ip());
        metadata.ip_address = Some(resolve_client(&headers, peer).ip);
    }
    if metadata.user_agent.is_none() {
        metadata.user_agent = header_text(&headers, header::USER_AGENT);
    }
    if metadata.referer.is_none() {
        metadata.referer = header_text(&headers, header::REFERER);
    }

    let subscriber = state.newsletter.subscribe(request).await?;
    let message = match subscriber.status {
        SubscriptionStatus::Confirmed => "이미 구독 중인 이메일입니다.",
        SubscriptionStatus::PendingConfirmation => {
            "뉴스레터 구독이 요청되었습니다. 이메일을 확인하여 구독을 완료해주세요."
        }
    };

    Ok(Json(json!({
        "success": true,
        "message": message,
        "data": subscriber,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    pub token: Option<String>,
}

/// GET /api/newsletter/confirm?token=
pub async fn newsletter_confirm(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConfirmQuery>,
) -> Result<Json<Value>, AppError> {
    let token = params
        .token
        .as_deref()
        .and_then(|t| Uuid::parse_str(t.trim()).ok())
        .ok_or_else(|| AppError::BadRequest("token: 구독 확인 토큰이 올바르지 않습니다".to_string()))?;

    let subscriber = state.newsletter.confirm(token).await?;
    tracing::info!(subscriber_id = %subscriber.id, "✓ Newsletter subscription confirmed");

    Ok(Json(json!({
        "success": true,
        "message": "뉴스레터 구독이 완료되었습니다.",
        "data": subscriber,
    })))
}

// ============ FAQ ============

#[derive(Debug, Deserialize)]
pub struct FaqQuery {
    pub published: Option<bool>,
    pub category: Option<String>,
}

fn validate_faq(input: &FaqInput) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::BadRequest(errors.join(", ")))
}

fn faq_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("FAQ {}", id))
}

/// GET /api/faqs
pub async fn list_faqs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FaqQuery>,
) -> Result<Json<Value>, AppError> {
    let filter = FaqFilter {
        published: params.published,
        category: params.category.filter(|c| !c.is_empty()),
    };
    let faqs = state.storage.list_faqs(&filter).await?;

    Ok(Json(json!({
        "success": true,
        "data": faqs,
        "count": faqs.len(),
    })))
}

/// GET /api/faqs/:id
pub async fn get_faq(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let faq = state.storage.get_faq(id).await?.ok_or_else(|| faq_not_found(id))?;
    Ok(Json(json!({ "success": true, "data": faq })))
}

/// POST /api/faqs
pub async fn create_faq(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AppJson(input): AppJson<FaqInput>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_admin(&state.config, &headers)?;
    validate_faq(&input)?;

    let faq = state.storage.create_faq(&input).await?;
    tracing::info!(faq_id = %faq.id, category = %faq.category, "FAQ created");

    Ok((StatusCode::CREATED, Json(json!({ "success": true, "data": faq }))))
}

/// PUT /api/faqs/:id
pub async fn update_faq(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    AppJson(input): AppJson<FaqInput>,
) -> Result<Json<Value>, AppError> {
    require_admin(&state.config, &headers)?;
    validate_faq(&input)?;

    let faq = state
        .storage
        .update_faq(id, &input)
        .await?
        .ok_or_else(|| faq_not_found(id))?;

    Ok(Json(json!({ "success": true, "data": faq })))
}

/// DELETE /api/faqs/:id
pub async fn delete_faq(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_admin(&state.config, &headers)?;

    if !state.storage.delete_faq(id).await? {
        return Err(faq_not_found(id));
    }
    tracing::info!(faq_id = %id, "FAQ deleted");

    Ok(Json(json!({ "success": true })))
}

/// PATCH /api/faqs/:id/publish
pub async fn toggle_faq_publish(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_admin(&state.config, &headers)?;

    let faq = state
        .storage
        .toggle_faq_published(id)
        .await?
        .ok_or_else(|| faq_not_found(id))?;

    Ok(Json(json!({ "success": true, "data": faq })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn admin_check_is_open_without_token() {
        let config = Config::local("postgres://localhost/test");
        assert!(require_admin(&config, &HeaderMap::new()).is_ok());
    }

    #[test]
    fn admin_check_requires_matching_bearer() {
        let mut config = Config::local("postgres://localhost/test");
        config.admin_token = Some("letmein".into());

        let mut headers = HeaderMap::new();
        assert!(require_admin(&config, &headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert!(require_admin(&config, &headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer letmein"));
        assert!(require_admin(&config, &headers).is_ok());
    }

    #[test]
    fn notification_requires_type_fields() {
        let err = parse_notification(
            "appointment_reminder",
            json!({"patientName": "김환자", "phoneNumber": ""}),
        )
        .unwrap_err();
        let AppError::BadRequest(message) = err else {
            panic!("expected bad request");
        };
        assert!(message.contains("phoneNumber"));
        assert!(message.contains("appointmentDate"));
    }

    #[test]
    fn notification_types_parse() {
        let event = parse_notification(
            "appointment_cancellation",
            json!({"patientName": "김환자", "appointmentDate": "2026-05-10", "appointmentTime": "10:00"}),
        )
        .unwrap();
        assert_eq!(event.kind(), "appointment_cancellation");

        let alert = parse_notification("system_alert", json!({"message": "디스크 부족", "priority": "high"})).unwrap();
        assert_eq!(
            alert,
            NotificationEvent::SystemAlert {
                message: "디스크 부족".into(),
                priority: Priority::High
            }
        );

        assert!(matches!(
            parse_notification("fax", json!({})),
            Err(AppError::BadRequest(_))
        ));
    }
}
