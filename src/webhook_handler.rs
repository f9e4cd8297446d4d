use crate::errors::{AppError, AppJson};
use crate::handlers::AppState;
use crate::newsletter::{SubscribeRequest, SubscriptionSource};
use crate::webhook_models::{TypebotWebhookPayload, TypebotWebhookResponse};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;

pub const SIGNATURE_HEADER: &str = "x-typebot-signature";

/// Typebot Webhook Handler
///
/// Receives the answers of a finished Typebot conversation, maps them onto a lead and
/// runs the best-effort intake (score, save, Slack). Leads that left an email are also
/// signed up for the newsletter. Individual failures are reported
/// in `results.errors`; the response is 200 whenever the payload itself was valid.
///
/// Authentication: `x-typebot-signature` must match TYPEBOT_WEBHOOK_SECRET when set.
pub async fn typebot_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AppJson(payload): AppJson<TypebotWebhookPayload>,
) -> Result<(StatusCode, Json<TypebotWebhookResponse>), AppError> {
    validate_signature(state.config.typebot_webhook_secret.as_deref(), &headers)?;

    tracing::info!(
        typebot_id = %payload.typebot_id,
        session_id = %payload.session_id,
        answers = payload.answers.len(),
        "Received Typebot webhook"
    );

    let submission = payload.to_submission();

    if submission.name.is_none() || submission.phone.is_none() {
        tracing::info!(session_id = %payload.session_id, "Typebot session without contact details, lead skipped");
        return Ok((
            StatusCode::OK,
            Json(TypebotWebhookResponse {
                success: true,
                message: "연락처 정보가 없어 리드를 저장하지 않았습니다".to_string(),
                results: Default::default(),
            }),
        ));
    }

    let newsletter = submission.email.clone().map(|email| SubscribeRequest {
        email: Some(email),
        name: submission.name.clone(),
        source: SubscriptionSource::Typebot,
        tags: Some(vec!["typebot".to_string(), "auto_subscribe".to_string()]),
        ..SubscribeRequest::default()
    });

    let mut results = state.leads.intake(submission).await;

    if let Some(request) = newsletter {
        match state.newsletter.subscribe(request).await {
            Ok(subscriber) => {
                tracing::info!(subscriber_id = %subscriber.id, "Typebot lead subscribed to newsletter");
                results.newsletter_subscribed = true;
            }
            Err(e) => {
                tracing::warn!(session_id = %payload.session_id, "Newsletter auto-subscribe failed: {}", e);
                results.errors.push("뉴스레터 구독 실패".to_string());
            }
        }
    }

    let message = if results.errors.is_empty() {
        "Typebot 웹훅이 처리되었습니다"
    } else {
        "Typebot 웹훅이 부분적으로 처리되었습니다"
    };

    Ok((
        StatusCode::OK,
        Json(TypebotWebhookResponse {
            success: true,
            message: message.to_string(),
            results,
        }),
    ))
}

/// Check the signature header against the configured secret, if any.
pub fn validate_signature(secret: Option<&str>, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = secret else {
        return Ok(());
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing x-typebot-signature header".to_string()))?;

    if !constant_time_compare(signature, expected) {
        tracing::warn!("Invalid Typebot webhook signature received");
        return Err(AppError::Unauthorized("Invalid webhook signature".to_string()));
    }

    Ok(())
}

/// Constant-time string comparison.
pub(crate) fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn compare_requires_equal_strings() {
        assert!(constant_time_compare("secret", "secret"));
        assert!(!constant_time_compare("secret", "secreT"));
        assert!(!constant_time_compare("secret", "secrets"));
    }

    #[test]
    fn signature_is_optional_without_secret() {
        assert!(validate_signature(None, &HeaderMap::new()).is_ok());
    }

    #[test]
    fn signature_must_match_secret() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            validate_signature(Some("s3cret"), &headers),
            Err(AppError::Unauthorized(_))
        ));

        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("wrong!"));
        assert!(validate_signature(Some("s3cret"), &headers).is_err());

        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("s3cret"));
        assert!(validate_signature(Some("s3cret"), &headers).is_ok());
    }
}
