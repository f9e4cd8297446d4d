use futures::future::{join_all, BoxFuture};
use std::sync::Arc;
use uuid::Uuid;

use super::email::{self, ResendEmailClient};
use super::kakao::{self, KakaoClient};
use super::slack::{self, SlackClient};
use super::{
    AlimtalkMessage, AppointmentNotification, Channel, ChannelError, ChatOpsChannel, ChatOpsPost,
    ConsultationNotification, EmailChannel, EmailMessage, EmergencyNotification,
    LeadNotification, MessagingChannel, NotificationConfig, NotificationEvent, NotificationResult,
};
use crate::circuit_breaker::{call_guarded, create_channel_circuit_breaker, ChannelBreaker, Guarded};
use crate::config::Config;
use crate::errors::AppError;
use crate::models::Priority;

type Delivery = BoxFuture<'static, Result<(), ChannelError>>;

struct ChannelBreakers {
    email: ChannelBreaker,
    slack: ChannelBreaker,
    kakao: ChannelBreaker,
}

/// Dispatches one business event to every enabled channel concurrently.
///
/// Each channel call runs in its own task behind that channel's circuit breaker.
/// Failures of any kind (provider errors, open circuits, panics) end up as strings
/// in [`NotificationResult::errors`]; none of the send methods can fail.
pub struct NotificationManager {
    email: Arc<dyn EmailChannel>,
    chat_ops: Arc<dyn ChatOpsChannel>,
    messaging: Arc<dyn MessagingChannel>,
    breakers: Arc<ChannelBreakers>,
    app_url: String,
}

impl NotificationManager {
    pub fn new(
        email: Arc<dyn EmailChannel>,
        chat_ops: Arc<dyn ChatOpsChannel>,
        messaging: Arc<dyn MessagingChannel>,
        app_url: impl Into<String>,
    ) -> Self {
        Self {
            email,
            chat_ops,
            messaging,
            breakers: Arc::new(ChannelBreakers {
                email: create_channel_circuit_breaker(),
                slack: create_channel_circuit_breaker(),
                kakao: create_channel_circuit_breaker(),
            }),
            app_url: app_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Manager over the Resend, Slack and Bizppurio HTTP clients.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let email = ResendEmailClient::new(
            config.email.api_url.clone(),
            config.email.api_key.clone(),
            config.email.from.clone(),
        )?;
        let slack = SlackClient::new(&config.slack)?;
        let kakao = KakaoClient::new(config.kakao.clone())?;

        if kakao.is_simulation() {
            tracing::warn!("KAKAO_API_KEY not set, KakaoTalk runs in simulation mode");
        }

        Ok(Self::new(
            Arc::new(email),
            Arc::new(slack),
            Arc::new(kakao),
            config.app_url.clone(),
        ))
    }

    // ============ Deliveries ============

    fn email_delivery(&self, message: EmailMessage) -> (Channel, Delivery) {
        let channel = Arc::clone(&self.email);
        let breakers = Arc::clone(&self.breakers);
        let delivery: Delivery = Box::pin(async move {
            match call_guarded(&breakers.email, channel.send(&message)).await {
                Guarded::Completed(result) => result.map(|_| ()),
                Guarded::Rejected => Err(ChannelError::CircuitOpen),
            }
        });
        (Channel::Email, delivery)
    }

    fn slack_delivery(&self, post: ChatOpsPost) -> (Channel, Delivery) {
        let channel = Arc::clone(&self.chat_ops);
        let breakers = Arc::clone(&self.breakers);
        let delivery: Delivery = Box::pin(async move {
            match call_guarded(&breakers.slack, channel.post(&post)).await {
                Guarded::Completed(result) => result,
                Guarded::Rejected => Err(ChannelError::CircuitOpen),
            }
        });
        (Channel::Slack, delivery)
    }

    fn kakao_delivery(&self, message: AlimtalkMessage) -> (Channel, Delivery) {
        let channel = Arc::clone(&self.messaging);
        let breakers = Arc::clone(&self.breakers);
        let delivery: Delivery = Box::pin(async move {
            match call_guarded(&breakers.kakao, channel.send(&message)).await {
                Guarded::Completed(result) => result.map(|_| ()),
                Guarded::Rejected => Err(ChannelError::CircuitOpen),
            }
        });
        (Channel::Kakao, delivery)
    }

    /// Spawn every delivery, wait for all of them and merge the outcomes.
    async fn fan_out(&self, event: &'static str, deliveries: Vec<(Channel, Delivery)>) -> NotificationResult {
        let (channels, tasks): (Vec<Channel>, Vec<_>) = deliveries
            .into_iter()
            .map(|(channel, delivery)| (channel, tokio::spawn(delivery)))
            .unzip();

        let outcomes = join_all(tasks).await;

        let mut result = NotificationResult::default();
        for (channel, outcome) in channels.into_iter().zip(outcomes) {
            match outcome {
                Ok(Ok(())) => result.mark_sent(channel),
                Ok(Err(e)) => {
                    tracing::warn!(event, %channel, "Notification delivery failed: {}", e);
                    result.errors.push(format!("{} delivery failed: {}", channel, e));
                }
                Err(join_error) => {
                    tracing::error!(event, %channel, "Notification task aborted: {}", join_error);
                    result.errors.push(format!("{} delivery aborted: {}", channel, join_error));
                }
            }
        }

        tracing::info!(
            event,
            email = result.email,
            slack = result.slack,
            kakao = result.kakao,
            errors = result.errors.len(),
            "Notification fan-out finished"
        );
        result
    }

    async fn slack_only(
        &self,
        event: &'static str,
        post: ChatOpsPost,
        config: Option<NotificationConfig>,
    ) -> NotificationResult {
        let enabled = config.map_or(true, |c| c.slack);
        let deliveries = if enabled {
            vec![self.slack_delivery(post)]
        } else {
            Vec::new()
        };
        self.fan_out(event, deliveries).await
    }

    // ============ Events ============

    /// Email (when the patient has an address), Slack and KakaoTalk by default.
    pub async fn send_appointment_confirmation(
        &self,
        data: &AppointmentNotification,
        config: Option<NotificationConfig>,
    ) -> NotificationResult {
        let config = config.unwrap_or(NotificationConfig::all());
        let mut deliveries = Vec::new();

        if config.email {
            if let Some(to) = data.email.as_deref().filter(|e| !e.is_empty()) {
                deliveries.push(self.email_delivery(email::appointment_confirmation(to, data, &self.app_url)));
            }
        }
        if config.slack {
            deliveries.push(self.slack_delivery(slack::new_appointment(data, &self.app_url)));
        }
        if config.kakao {
            deliveries.push(self.kakao_delivery(kakao::appointment_confirmation(data, &self.app_url)));
        }

        self.fan_out("appointment_confirmation", deliveries).await
    }

    /// Email and KakaoTalk by default. Reminders have no Slack message.
    pub async fn send_appointment_reminder(
        &self,
        data: &AppointmentNotification,
        config: Option<NotificationConfig>,
    ) -> NotificationResult {
        let config = config.unwrap_or(NotificationConfig {
            email: true,
            slack: false,
            kakao: true,
        });
        let mut deliveries = Vec::new();

        if config.email {
            if let Some(to) = data.email.as_deref().filter(|e| !e.is_empty()) {
                deliveries.push(self.email_delivery(email::appointment_reminder(to, data, &self.app_url)));
            }
        }
        if config.kakao {
            deliveries.push(self.kakao_delivery(kakao::appointment_reminder(data, &self.app_url)));
        }

        self.fan_out("appointment_reminder", deliveries).await
    }

    /// Slack and KakaoTalk by default. Cancellations have no email.
    pub async fn send_appointment_cancellation(
        &self,
        data: &AppointmentNotification,
        config: Option<NotificationConfig>,
    ) -> NotificationResult {
        let config = config.unwrap_or(NotificationConfig {
            email: false,
            slack: true,
            kakao: true,
        });
        let mut deliveries = Vec::new();

        if config.slack {
            deliveries.push(self.slack_delivery(slack::appointment_cancellation(data)));
        }
        if config.kakao {
            deliveries.push(self.kakao_delivery(kakao::appointment_cancellation(data, &self.app_url)));
        }

        self.fan_out("appointment_cancellation", deliveries).await
    }

    /// Email (when present) and KakaoTalk by default.
    pub async fn send_consultation_summary(
        &self,
        data: &ConsultationNotification,
        config: Option<NotificationConfig>,
    ) -> NotificationResult {
        let config = config.unwrap_or(NotificationConfig {
            email: true,
            slack: false,
            kakao: true,
        });
        let mut deliveries = Vec::new();

        if config.email {
            if let Some(to) = data.email.as_deref().filter(|e| !e.is_empty()) {
                deliveries.push(self.email_delivery(email::consultation_summary(to, data, &self.app_url)));
            }
        }
        if config.kakao {
            deliveries.push(self.kakao_delivery(kakao::consultation_summary(data, &self.app_url)));
        }

        self.fan_out("consultation_summary", deliveries).await
    }

    /// Double opt-in email for a newsletter sign-up.
    pub async fn send_newsletter_confirmation(
        &self,
        to: &str,
        name: Option<&str>,
        token: Uuid,
    ) -> NotificationResult {
        let confirm_url = format!("{}/api/newsletter/confirm?token={}", self.app_url, token);
        let delivery = self.email_delivery(email::newsletter_confirmation(to, name, &confirm_url));
        self.fan_out("newsletter_confirmation", vec![delivery]).await
    }

    /// Staff-facing Slack post for a new lead.
    pub async fn send_lead_notification(&self, data: &LeadNotification) -> bool {
        self.slack_only("lead_notification", slack::lead_submission(data, &self.app_url), None)
            .await
            .slack
    }

    pub async fn send_emergency_notification(&self, data: &EmergencyNotification) -> bool {
        self.slack_only("emergency", slack::emergency(data), None)
            .await
            .slack
    }

    pub async fn send_system_alert(&self, message: &str, priority: Priority) -> bool {
        self.slack_only("system_alert", slack::system_alert(message, priority), None)
            .await
            .slack
    }

    /// Route any event to its channels. `config` overrides the per-event defaults.
    pub async fn dispatch(
        &self,
        event: &NotificationEvent,
        config: Option<NotificationConfig>,
    ) -> NotificationResult {
        match event {
            NotificationEvent::AppointmentConfirmation(data) => {
                self.send_appointment_confirmation(data, config).await
            }
            NotificationEvent::AppointmentReminder(data) => {
                self.send_appointment_reminder(data, config).await
            }
            NotificationEvent::AppointmentCancellation(data) => {
                self.send_appointment_cancellation(data, config).await
            }
            NotificationEvent::ConsultationSummary(data) => {
                self.send_consultation_summary(data, config).await
            }
            NotificationEvent::LeadSubmission(data) => {
                self.slack_only(event.kind(), slack::lead_submission(data, &self.app_url), config)
                    .await
            }
            NotificationEvent::Emergency(data) => {
                self.slack_only(event.kind(), slack::emergency(data), config).await
            }
            NotificationEvent::SystemAlert { message, priority } => {
                self.slack_only(event.kind(), slack::system_alert(message, *priority), config)
                    .await
            }
        }
    }
}
