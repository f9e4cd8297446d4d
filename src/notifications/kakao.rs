//! KakaoTalk AlimTalk delivery through the Bizppurio message API.
//!
//! Without an API key the client runs in simulation mode: messages are logged and a
//! synthetic `sim_` id is returned, so local setups exercise the full flow.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use super::{
    AlimtalkMessage, AppointmentNotification, ChannelError, ConsultationNotification,
    KakaoButton, KakaoTemplate, MessagingChannel,
};
use crate::config::KakaoSettings;
use crate::errors::AppError;
use crate::models::{clinic_today, CLINIC_NAME, CLINIC_PHONE};
use crate::validation::normalize_kr_phone;

pub struct KakaoClient {
    client: Client,
    settings: KakaoSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BizppurioResponse {
    code: Option<String>,
    message_id: Option<String>,
    message: Option<String>,
}

impl KakaoClient {
    pub fn new(settings: KakaoSettings) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, settings })
    }

    pub fn is_simulation(&self) -> bool {
        self.settings.api_key.is_none()
    }

    fn template_id(&self, template: KakaoTemplate) -> &str {
        let ids = &self.settings.templates;
        match template {
            KakaoTemplate::Appointment => &ids.appointment,
            KakaoTemplate::Reminder => &ids.reminder,
            KakaoTemplate::Cancellation => &ids.cancellation,
            KakaoTemplate::Consultation => &ids.consultation,
        }
    }
}

#[async_trait]
impl MessagingChannel for KakaoClient {
    async fn send(&self, message: &AlimtalkMessage) -> Result<String, ChannelError> {
        if message.phone_number.trim().is_empty() {
            return Err(ChannelError::MissingRecipient("phone number"));
        }
        let to = normalize_kr_phone(&message.phone_number);
        let template_id = self.template_id(message.template);

        let Some(api_key) = &self.settings.api_key else {
            let message_id = format!("sim_{}", Uuid::new_v4().simple());
            tracing::info!(
                template_id,
                message_id = %message_id,
                buttons = message.buttons.len(),
                "KakaoTalk simulation mode, message not sent"
            );
            return Ok(message_id);
        };

        let url = format!("{}/v1/message", self.settings.api_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&json!({
                "account": self.settings.account_id,
                "messageType": "AT",
                "from": self.settings.sender_key,
                "to": to,
                "content": {
                    "templateId": template_id,
                    "message": message.message,
                    "buttons": message.buttons,
                },
            }))
            .send()
            .await?;

        let status = response.status();
        let body: BizppurioResponse = response.json().await?;

        match (status.is_success(), body.code.as_deref(), body.message_id) {
            (true, Some("200"), Some(message_id)) => {
                tracing::info!(template_id, message_id = %message_id, "✓ KakaoTalk message sent");
                Ok(message_id)
            }
            _ => {
                let reason = body
                    .message
                    .unwrap_or_else(|| "알림톡 발송에 실패했습니다".to_string());
                tracing::error!(template_id, "KakaoTalk delivery failed ({}): {}", status, reason);
                Err(ChannelError::Rejected(reason))
            }
        }
    }
}

// ============ Message builders ============

pub fn appointment_confirmation(data: &AppointmentNotification, app_url: &str) -> AlimtalkMessage {
    let message = format!(
        "[{clinic}] 예약 확정 안내\n\n\
         안녕하세요, {name}님!\n\
         예약이 성공적으로 확정되었습니다.\n\n\
         📅 예약 정보\n\
         • 날짜: {date}\n\
         • 시간: {time}\n\
         • 진료: {service}\n\
         • 담당: {doctor}\n\n\
         🏥 병원 정보\n\
         • {clinic}\n\
         • 인천 연수구 컨벤시아대로 165 포스코타워-연수 B동 17층\n\
         • ☎️ {phone}\n\n\
         📋 방문 전 준비사항\n\
         • 방문 30분 전까지 내원\n\
         • 신분증, 건강보험증 지참\n\
         • 렌즈 착용자는 24시간 전 제거 권장\n\n\
         변경이나 취소는 최소 1일 전까지 연락 바랍니다.",
        clinic = CLINIC_NAME,
        name = data.patient_name,
        date = data.appointment_date,
        time = data.appointment_time,
        service = data.service_type.as_deref().unwrap_or("일반 진료"),
        doctor = data.doctor_name.as_deref().unwrap_or("연수김안과 의료진"),
        phone = CLINIC_PHONE,
    );

    AlimtalkMessage {
        template: KakaoTemplate::Appointment,
        phone_number: data.phone_number.clone(),
        message,
        buttons: vec![
            KakaoButton::web_link("예약관리", format!("{}/appointment/manage", app_url)),
            KakaoButton::web_link("병원위치", format!("{}/location", app_url)),
        ],
    }
}

pub fn appointment_reminder(data: &AppointmentNotification, app_url: &str) -> AlimtalkMessage {
    let message = format!(
        "[{clinic}] 예약 안내\n\n\
         {name}님, 안녕하세요!\n\
         예약이 있어 안내드립니다.\n\n\
         ⏰ 예약 정보\n\
         • 날짜: {date}\n\
         • 시간: {time}\n\
         • 진료: {service}\n\n\
         📋 방문 준비사항\n\
         ✅ 신분증 및 건강보험증 지참\n\
         ✅ 렌즈 착용자는 미리 제거 권장\n\
         ✅ 30분 전 내원\n\
         ✅ 기존 안경 및 처방전 지참\n\n\
         🚗 교통 안내\n\
         • 인천지하철 1호선 센트럴파크역 2번 출구\n\
         • 포스코타워-연수 지하주차장 이용 가능\n\n\
         변경이나 취소는 {phone}로 연락주세요.",
        clinic = CLINIC_NAME,
        name = data.patient_name,
        date = data.appointment_date,
        time = data.appointment_time,
        service = data.service_type.as_deref().unwrap_or("일반 진료"),
        phone = CLINIC_PHONE,
    );

    AlimtalkMessage {
        template: KakaoTemplate::Reminder,
        phone_number: data.phone_number.clone(),
        message,
        buttons: vec![
            KakaoButton::web_link("위치안내", format!("{}/location", app_url)),
            KakaoButton::web_link("변경/취소", format!("{}/appointment/manage", app_url)),
        ],
    }
}

pub fn appointment_cancellation(data: &AppointmentNotification, app_url: &str) -> AlimtalkMessage {
    let message = format!(
        "[{clinic}] 예약 취소 확인\n\n\
         {name}님, 안녕하세요!\n\n\
         다음 예약이 취소되었습니다.\n\
         • 날짜: {date}\n\
         • 시간: {time}\n\n\
         언제든지 다시 예약하실 수 있습니다.\n\n\
         📞 재예약 문의: {phone}",
        clinic = CLINIC_NAME,
        name = data.patient_name,
        date = data.appointment_date,
        time = data.appointment_time,
        phone = CLINIC_PHONE,
    );

    AlimtalkMessage {
        template: KakaoTemplate::Cancellation,
        phone_number: data.phone_number.clone(),
        message,
        buttons: vec![
            KakaoButton::web_link("재예약하기", format!("{}/appointment", app_url)),
            KakaoButton::web_link("상담받기", format!("{}/chatbot", app_url)),
        ],
    }
}

pub fn consultation_summary(data: &ConsultationNotification, app_url: &str) -> AlimtalkMessage {
    let date = data
        .consultation_date
        .clone()
        .unwrap_or_else(|| clinic_today().format("%Y-%m-%d").to_string());
    let message = format!(
        "[{clinic}] AI 상담 요약\n\n\
         {name}님, 안녕하세요!\n\
         오늘 AI 상담 내용을 요약해드립니다.\n\n\
         🤖 상담 내용\n\
         • 상담 일시: {date}\n\
         • 주요 증상: {symptoms}\n\n\
         💡 AI 추천사항\n\
         {recommendations}\n\n\
         ⚠️ 중요 안내\n\
         이 상담은 참고용이며, 정확한 진단은 직접 내원하여 검사받으시기 바랍니다.\n\n\
         증상이 지속되거나 악화되면 즉시 내원해 주세요.",
        clinic = CLINIC_NAME,
        name = data.patient_name,
        date = date,
        symptoms = data.symptoms,
        recommendations = data.recommendations,
    );

    AlimtalkMessage {
        template: KakaoTemplate::Consultation,
        phone_number: data.phone_number.clone(),
        message,
        buttons: vec![
            KakaoButton::web_link("진료예약", format!("{}/appointment", app_url)),
            KakaoButton::web_link("추가상담", format!("{}/chatbot", app_url)),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;

    fn appointment() -> AppointmentNotification {
        AppointmentNotification {
            patient_name: "김환자".into(),
            phone_number: "010-1234-5678".into(),
            email: None,
            appointment_date: "2026-11-02".into(),
            appointment_time: "15:00".into(),
            service_type: Some("백내장 상담".into()),
            doctor_name: None,
            notes: None,
            priority: Priority::Medium,
        }
    }

    #[test]
    fn confirmation_text_and_buttons() {
        let message = appointment_confirmation(&appointment(), "https://ysk-eye.ai");
        assert_eq!(message.template, KakaoTemplate::Appointment);
        assert!(message.message.contains("김환자님"));
        assert!(message.message.contains("백내장 상담"));
        assert!(message.message.contains("연수김안과 의료진"));
        assert_eq!(message.buttons[0].url_pc, "https://ysk-eye.ai/appointment/manage");
        assert_eq!(message.buttons[0].kind, "WL");
    }

    #[tokio::test]
    async fn simulation_mode_returns_synthetic_id() {
        let client = KakaoClient::new(KakaoSettings::default()).unwrap();
        assert!(client.is_simulation());

        let id = client
            .send(&appointment_reminder(&appointment(), "https://ysk-eye.ai"))
            .await
            .unwrap();
        assert!(id.starts_with("sim_"));
    }

    #[tokio::test]
    async fn empty_recipient_is_rejected() {
        let client = KakaoClient::new(KakaoSettings::default()).unwrap();
        let mut message = appointment_cancellation(&appointment(), "https://ysk-eye.ai");
        message.phone_number.clear();
        assert!(matches!(
            client.send(&message).await,
            Err(ChannelError::MissingRecipient(_))
        ));
    }
}
