//! Slack notifications for clinic staff.
//!
//! Messages go through `chat.postMessage` with the bot token. When that fails and an
//! incoming-webhook URL is configured, the plain-text summary is posted there instead.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    AppointmentNotification, ChannelError, ChatOpsChannel, ChatOpsPost, EmergencyNotification,
    LeadNotification, SlackRoute,
};
use crate::config::SlackSettings;
use crate::errors::AppError;
use crate::models::{clinic_now, Priority};

pub struct SlackClient {
    client: Client,
    api_url: String,
    bot_token: Option<String>,
    webhook_url: Option<String>,
    alerts_channel: String,
    reservations_channel: String,
}

#[derive(Debug, Deserialize)]
struct SlackApiResponse {
    ok: bool,
    error: Option<String>,
}

impl SlackClient {
    pub fn new(settings: &SlackSettings) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            bot_token: settings.bot_token.clone(),
            webhook_url: settings.webhook_url.clone(),
            alerts_channel: settings.alerts_channel.clone(),
            reservations_channel: settings.reservations_channel.clone(),
        })
    }

    fn channel_for(&self, route: SlackRoute) -> &str {
        match route {
            SlackRoute::Alerts => &self.alerts_channel,
            SlackRoute::Reservations => &self.reservations_channel,
        }
    }

    async fn post_message(&self, post: &ChatOpsPost) -> Result<(), ChannelError> {
        let Some(token) = &self.bot_token else {
            return Err(ChannelError::NotConfigured("SLACK_BOT_TOKEN"));
        };

        let url = format!("{}/chat.postMessage", self.api_url);
        let channel = self.channel_for(post.route);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&json!({
                "channel": channel,
                "text": post.text,
                "blocks": post.blocks,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ChannelError::Rejected(format!("Slack API returned {}", status)));
        }

        let body: SlackApiResponse = response.json().await?;
        if !body.ok {
            return Err(ChannelError::Rejected(
                body.error.unwrap_or_else(|| "unknown Slack error".to_string()),
            ));
        }

        tracing::info!(channel, "✓ Slack message posted");
        Ok(())
    }

    async fn post_webhook(&self, webhook_url: &str, text: &str) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ChannelError::Rejected(format!(
                "Slack webhook returned {}",
                response.status()
            )));
        }

        tracing::info!("✓ Slack webhook fallback delivered");
        Ok(())
    }
}

#[async_trait]
impl ChatOpsChannel for SlackClient {
    async fn post(&self, post: &ChatOpsPost) -> Result<(), ChannelError> {
        match self.post_message(post).await {
            Ok(()) => Ok(()),
            Err(e) => match &self.webhook_url {
                Some(webhook_url) => {
                    tracing::warn!("chat.postMessage failed ({}), using webhook fallback", e);
                    self.post_webhook(webhook_url, &post.text).await
                }
                None => Err(e),
            },
        }
    }
}

// ============ Message builders ============

pub fn priority_emoji(priority: Priority) -> &'static str {
    match priority {
        Priority::Urgent => "🔴",
        Priority::High => "🟡",
        Priority::Medium => "🟢",
        Priority::Low => "🔵",
    }
}

/// System alerts only distinguish urgent and high from everything else.
fn alert_emoji(priority: Priority) -> &'static str {
    match priority {
        Priority::Urgent => "🔴",
        Priority::High => "🟡",
        _ => "🔵",
    }
}

fn service_emoji(service_type: Option<&str>) -> &'static str {
    let Some(service) = service_type else {
        return "👁️";
    };
    let service = service.to_lowercase();
    if service.contains("라식") || service.contains("라섹") || service.contains("lasik") {
        "✨"
    } else if service.contains("백내장") || service.contains("cataract") {
        "🌤️"
    } else if service.contains("노안") || service.contains("presbyopia") {
        "👓"
    } else if service.contains("렌즈삽입") {
        "💎"
    } else if service.contains("녹내장") || service.contains("glaucoma") {
        "🌊"
    } else {
        "👁️"
    }
}

fn or_unknown(value: &str) -> &str {
    if value.is_empty() {
        "정보 없음"
    } else {
        value
    }
}

fn timestamp() -> String {
    clinic_now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn header(text: &str) -> Value {
    json!({
        "type": "header",
        "text": { "type": "plain_text", "text": text },
    })
}

fn fields(pairs: &[(&str, String)]) -> Value {
    let fields: Vec<Value> = pairs
        .iter()
        .map(|(label, value)| json!({ "type": "mrkdwn", "text": format!("*{}:*\n{}", label, value) }))
        .collect();
    json!({ "type": "section", "fields": fields })
}

fn section(text: String) -> Value {
    json!({
        "type": "section",
        "text": { "type": "mrkdwn", "text": text },
    })
}

fn button(text: &str, url: String, primary: bool) -> Value {
    let mut button = json!({
        "type": "button",
        "text": { "type": "plain_text", "text": text },
        "url": url,
    });
    if primary {
        button["style"] = json!("primary");
    }
    button
}

fn actions(buttons: Vec<Value>) -> Value {
    json!({ "type": "actions", "elements": buttons })
}

pub fn new_appointment(data: &AppointmentNotification, app_url: &str) -> ChatOpsPost {
    let emoji = priority_emoji(data.priority);
    let service = data.service_type.as_deref();
    ChatOpsPost {
        route: SlackRoute::Reservations,
        text: format!(
            "{} 새로운 예약: {} - {} {}",
            emoji, data.patient_name, data.appointment_date, data.appointment_time
        ),
        blocks: vec![
            header(&format!("{} 새로운 예약 등록", emoji)),
            fields(&[
                ("환자명", or_unknown(&data.patient_name).to_string()),
                ("연락처", or_unknown(&data.phone_number).to_string()),
                ("예약 날짜", or_unknown(&data.appointment_date).to_string()),
                ("예약 시간", or_unknown(&data.appointment_time).to_string()),
                (
                    "서비스 유형",
                    format!("{} {}", service_emoji(service), service.unwrap_or("일반 진료")),
                ),
                ("등록 시간", timestamp()),
            ]),
            actions(vec![
                button("예약 관리", format!("{}/admin/appointments", app_url), true),
                button("환자 정보", format!("{}/admin/patients", app_url), false),
            ]),
        ],
    }
}

pub fn appointment_cancellation(data: &AppointmentNotification) -> ChatOpsPost {
    ChatOpsPost {
        route: SlackRoute::Reservations,
        text: format!(
            "⚠️ 예약 취소: {} - {} {}",
            data.patient_name, data.appointment_date, data.appointment_time
        ),
        blocks: vec![
            header("⚠️ 예약 취소 알림"),
            fields(&[
                ("환자명", or_unknown(&data.patient_name).to_string()),
                (
                    "취소된 예약",
                    format!("{} {}", data.appointment_date, data.appointment_time),
                ),
                ("취소 시간", timestamp()),
            ]),
        ],
    }
}

pub fn emergency(data: &EmergencyNotification) -> ChatOpsPost {
    ChatOpsPost {
        route: SlackRoute::Alerts,
        text: format!("🚨 응급 연락: {} ({})", data.patient_name, data.phone_number),
        blocks: vec![
            header("🚨 응급 연락 알림"),
            fields(&[
                ("환자명", or_unknown(&data.patient_name).to_string()),
                ("연락처", or_unknown(&data.phone_number).to_string()),
                ("우선순위", "URGENT".to_string()),
                ("접수 시간", timestamp()),
            ]),
            section(format!("*추가 정보:*\n{}", or_unknown(&data.message))),
        ],
    }
}

pub fn lead_submission(data: &LeadNotification, app_url: &str) -> ChatOpsPost {
    let emoji = priority_emoji(data.priority);
    let mut details = vec![
        ("이름", or_unknown(&data.patient_name).to_string()),
        ("연락처", or_unknown(&data.phone_number).to_string()),
        ("관심 서비스", data.service_type.clone()),
        ("우선순위", format!("{} {}", emoji, data.priority.as_str().to_uppercase())),
    ];
    if let Some(score) = data.score {
        details.push(("리드 점수", score.to_string()));
    }
    if let Some(source) = &data.source {
        details.push(("유입 경로", source.clone()));
    }
    if let (Some(date), Some(time)) = (&data.preferred_date, &data.preferred_time) {
        details.push(("희망 일정", format!("{} {}", date, time)));
    }
    details.push(("제출 시간", timestamp()));

    let mut blocks = vec![header(&format!("💡 새로운 리드 제출 {}", emoji)), fields(&details)];
    if let Some(symptoms) = &data.symptoms {
        blocks.push(section(format!("*증상/요청사항:*\n{}", symptoms)));
    }
    blocks.push(actions(vec![
        button("리드 관리", format!("{}/admin/leads", app_url), true),
        button("연락하기", format!("tel:{}", data.phone_number), false),
    ]));

    ChatOpsPost {
        route: SlackRoute::Reservations,
        text: format!(
            "💡 새로운 리드: {} ({}) - {}",
            data.patient_name, data.phone_number, data.service_type
        ),
        blocks,
    }
}

pub fn system_alert(message: &str, priority: Priority) -> ChatOpsPost {
    let emoji = alert_emoji(priority);
    ChatOpsPost {
        route: SlackRoute::Alerts,
        text: format!("{} 시스템 알림: {}", emoji, message),
        blocks: vec![
            header(&format!("{} 시스템 알림", emoji)),
            section(format!("*메시지:* {}", message)),
            fields(&[
                ("우선순위", priority.as_str().to_uppercase()),
                ("발생 시간", timestamp()),
            ]),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emoji_tables() {
        assert_eq!(priority_emoji(Priority::Medium), "🟢");
        assert_eq!(alert_emoji(Priority::Medium), "🔵");
        assert_eq!(alert_emoji(Priority::Urgent), "🔴");
        assert_eq!(service_emoji(Some("백내장 상담")), "🌤️");
        assert_eq!(service_emoji(None), "👁️");
    }

    #[test]
    fn lead_post_goes_to_reservations_with_call_button() {
        let post = lead_submission(
            &LeadNotification {
                patient_name: "김환자".into(),
                phone_number: "010-1234-5678".into(),
                service_type: "라식/라섹 상담".into(),
                priority: Priority::Urgent,
                source: Some("referral".into()),
                symptoms: Some("심한 통증".into()),
                preferred_date: None,
                preferred_time: None,
                score: Some(84),
            },
            "https://ysk-eye.ai",
        );

        assert_eq!(post.route, SlackRoute::Reservations);
        assert!(post.text.contains("김환자"));
        let actions = post.blocks.last().unwrap();
        assert_eq!(actions["elements"][1]["url"], "tel:010-1234-5678");
    }

    #[test]
    fn system_alert_goes_to_alerts() {
        let post = system_alert("배치 완료", Priority::High);
        assert_eq!(post.route, SlackRoute::Alerts);
        assert_eq!(post.blocks[0]["text"]["text"], "🟡 시스템 알림");
    }
}
