//! Transactional email through the Resend API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{
    AppointmentNotification, ChannelError, ConsultationNotification, DeliveryReceipt,
    EmailChannel, EmailMessage,
};
use crate::errors::AppError;
use crate::models::{CLINIC_ADDRESS, CLINIC_NAME, CLINIC_PHONE};

pub struct ResendEmailClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    from: String,
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: String,
}

impl ResendEmailClient {
    pub fn new(base_url: String, api_key: Option<String>, from: String) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            from,
        })
    }
}

#[async_trait]
impl EmailChannel for ResendEmailClient {
    async fn send(&self, message: &EmailMessage) -> Result<DeliveryReceipt, ChannelError> {
        let Some(api_key) = &self.api_key else {
            tracing::warn!("RESEND_API_KEY not set, email skipped");
            return Err(ChannelError::NotConfigured("RESEND_API_KEY"));
        };

        let url = format!("{}/emails", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&json!({
                "from": self.from,
                "to": [message.to],
                "subject": message.subject,
                "html": message.html,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Resend API error ({}): {}", status, error_text);
            return Err(ChannelError::Rejected(format!("{}: {}", status, error_text)));
        }

        let body: ResendResponse = response.json().await?;
        tracing::info!(email_id = %body.id, "✓ Email sent");
        Ok(DeliveryReceipt { id: body.id })
    }
}

// ============ Templates ============

pub(crate) fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="ko">
<head><meta charset="UTF-8"><title>{title}</title></head>
<body style="font-family: 'Apple SD Gothic Neo', sans-serif; color: #1f2937; max-width: 600px; margin: 0 auto;">
<div style="background: #1e40af; color: #fff; padding: 24px; text-align: center;">
<h1 style="margin: 0; font-size: 22px;">{clinic}</h1>
<p style="margin: 8px 0 0;">{title}</p>
</div>
<div style="padding: 24px;">
{body}
</div>
<div style="background: #f3f4f6; padding: 16px; font-size: 13px; text-align: center;">
<p style="margin: 0;">{clinic} | {address}</p>
<p style="margin: 4px 0 0;">☎️ {phone}</p>
</div>
</body>
</html>"#,
        title = title,
        clinic = CLINIC_NAME,
        address = CLINIC_ADDRESS,
        phone = CLINIC_PHONE,
        body = body,
    )
}

fn appointment_table(data: &AppointmentNotification) -> String {
    format!(
        r#"<table style="width: 100%; border-collapse: collapse;">
<tr><td style="padding: 6px 0; color: #6b7280;">날짜</td><td>{date}</td></tr>
<tr><td style="padding: 6px 0; color: #6b7280;">시간</td><td>{time}</td></tr>
<tr><td style="padding: 6px 0; color: #6b7280;">진료</td><td>{service}</td></tr>
<tr><td style="padding: 6px 0; color: #6b7280;">담당</td><td>{doctor}</td></tr>
</table>"#,
        date = escape_html(&data.appointment_date),
        time = escape_html(&data.appointment_time),
        service = escape_html(data.service_type.as_deref().unwrap_or("일반 진료")),
        doctor = escape_html(data.doctor_name.as_deref().unwrap_or("연수김안과 의료진")),
    )
}

pub fn appointment_confirmation(to: &str, data: &AppointmentNotification, app_url: &str) -> EmailMessage {
    let body = format!(
        r#"<p>안녕하세요, {name}님.</p>
<p>예약이 확정되었습니다.</p>
{table}
<h3>방문 전 준비사항</h3>
<ul>
<li>방문 30분 전까지 내원해주세요.</li>
<li>신분증과 건강보험증을 지참해주세요.</li>
<li>렌즈 착용자는 24시간 전 제거를 권장합니다.</li>
</ul>
<p><a href="{app_url}/appointment/manage">예약 변경/취소</a></p>"#,
        name = escape_html(&data.patient_name),
        table = appointment_table(data),
        app_url = app_url,
    );

    EmailMessage {
        to: to.to_string(),
        subject: format!("[{}] 예약이 확정되었습니다", CLINIC_NAME),
        html: layout("예약 확정 안내", &body),
    }
}

pub fn appointment_reminder(to: &str, data: &AppointmentNotification, app_url: &str) -> EmailMessage {
    let body = format!(
        r#"<p>{name}님, 내일 예약이 있어 안내드립니다.</p>
{table}
<h3>내일 방문 준비사항</h3>
<ul>
<li>신분증 및 건강보험증</li>
<li>기존 안경 및 처방전</li>
<li>렌즈 착용자는 오늘부터 제거 권장</li>
</ul>
<p>인천지하철 1호선 센트럴파크역 2번 출구, 포스코타워-연수 지하주차장 이용 가능</p>
<p><a href="{app_url}/location">오시는 길</a></p>"#,
        name = escape_html(&data.patient_name),
        table = appointment_table(data),
        app_url = app_url,
    );

    EmailMessage {
        to: to.to_string(),
        subject: format!("[{}] 내일 예약이 있습니다", CLINIC_NAME),
        html: layout("예약 리마인더", &body),
    }
}

pub fn consultation_summary(to: &str, data: &ConsultationNotification, app_url: &str) -> EmailMessage {
    let body = format!(
        r#"<p>{name}님, AI 상담 내용을 요약해드립니다.</p>
<h3>주요 증상</h3>
<p>{symptoms}</p>
<h3>추천사항</h3>
<p>{recommendations}</p>
<p style="color: #b91c1c;">이 상담은 참고용이며, 정확한 진단은 내원하여 검사받으시기 바랍니다.</p>
<p><a href="{app_url}/appointment">진료 예약하기</a></p>"#,
        name = escape_html(&data.patient_name),
        symptoms = escape_html(&data.symptoms),
        recommendations = escape_html(&data.recommendations),
        app_url = app_url,
    );

    EmailMessage {
        to: to.to_string(),
        subject: format!("[{}] 상담 내용 요약", CLINIC_NAME),
        html: layout("AI 상담 요약", &body),
    }
}

pub fn newsletter_confirmation(to: &str, name: Option<&str>, confirm_url: &str) -> EmailMessage {
    let greeting = match name {
        Some(name) => format!("{}님, 안녕하세요.", escape_html(name)),
        None => "안녕하세요.".to_string(),
    };
    let body = format!(
        r#"<p>{greeting}</p>
<p>{clinic} 눈 건강 소식지 구독을 신청해주셔서 감사합니다.</p>
<p>아래 버튼을 눌러 구독을 완료해주세요.</p>
<p style="text-align: center; margin: 24px 0;">
<a href="{confirm_url}" style="background: #1e40af; color: #fff; padding: 12px 24px; text-decoration: none; border-radius: 6px;">구독 확인하기</a>
</p>
<p style="color: #6b7280; font-size: 13px;">본인이 신청하지 않았다면 이 메일을 무시해주세요.</p>"#,
        greeting = greeting,
        clinic = CLINIC_NAME,
        confirm_url = escape_html(confirm_url),
    );

    EmailMessage {
        to: to.to_string(),
        subject: format!("[{}] 뉴스레터 구독을 확인해주세요", CLINIC_NAME),
        html: layout("뉴스레터 구독 확인", &body),
    }
}
