use axum::{
    http::{header, HeaderValue},
    middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer, limit::RequestBodyLimitLayer, set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::handlers::{self, AppState};
use crate::rate_limiter::rate_limit_middleware;
use crate::webhook_handler;

/// Request size limit: 1MB is plenty for forms and webhook payloads.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// `/api/*` routes behind the per-route rate limiter.
pub fn api_routes(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/leads", post(handlers::create_lead).get(handlers::list_leads))
        .route("/api/typebot/webhook", post(webhook_handler::typebot_webhook))
        .route(
            "/api/notifications/send",
            post(handlers::send_notification).get(handlers::notification_types),
        )
        .route(
            "/api/scheduler/reminder",
            get(handlers::scheduler_status)
                .post(handlers::scheduler_action)
                .delete(handlers::scheduler_shutdown),
        )
        .route("/api/consultation/summary", post(handlers::consultation_summary))
        .route("/api/newsletter/subscribe", post(handlers::newsletter_subscribe))
        .route("/api/newsletter/confirm", get(handlers::newsletter_confirm))
        .route("/api/faqs", get(handlers::list_faqs).post(handlers::create_faq))
        .route(
            "/api/faqs/:id",
            get(handlers::get_faq)
                .put(handlers::update_faq)
                .delete(handlers::delete_faq),
        )
        .route("/api/faqs/:id/publish", patch(handlers::toggle_faq_publish))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.rate_limiter),
            rate_limit_middleware,
        ))
}

/// Full application: health check (never rate limited), `api`, and the global layers.
pub fn app(state: Arc<AppState>, api: Router<Arc<AppState>>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .merge(api)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::REFERRER_POLICY,
                    HeaderValue::from_static("strict-origin-when-cross-origin"),
                )),
        )
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
}

/// Application without the outer per-IP governor.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = api_routes(&state);
    app(state, api)
}
