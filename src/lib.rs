//! YSK Clinic API Library
//!
//! Backend for the 연수김안과의원 website: lead intake and scoring, per-route rate
//! limiting, multi-channel notifications (email, Slack, KakaoTalk) and the daily
//! reservation reminder jobs.
//!
//! # Modules
//!
//! - `circuit_breaker`: Per-channel circuit breakers.
//! - `config`: Configuration management.
//! - `consultation`: Chatbot consultation summaries.
//! - `db`: Database connection and pool management.
//! - `db_storage`: Database storage operations.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `lead_processor`: Booking and webhook lead intake.
//! - `lead_scoring`: Lead scoring rules.
//! - `models`: Core data models.
//! - `newsletter`: Newsletter sign-up with double opt-in.
//! - `notifications`: Notification channels and fan-out.
//! - `rate_limiter`: Fixed-window rate limiting.
//! - `reminder_scheduler`: Daily reminder jobs.
//! - `routes`: Router assembly.
//! - `validation`: Phone and email validation.
//! - `webhook_handler`: Typebot webhook handler.
//! - `webhook_models`: Webhook payload models.

pub mod circuit_breaker;
pub mod config;
pub mod consultation;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod lead_processor;
pub mod lead_scoring;
pub mod models;
pub mod newsletter;
pub mod notifications;
pub mod rate_limiter;
pub mod reminder_scheduler;
pub mod routes;
pub mod validation;
pub mod webhook_handler;
pub mod webhook_models;
