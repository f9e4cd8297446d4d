/// HTTP channel clients against mocked provider APIs
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use ysk_clinic_api::config::{KakaoSettings, KakaoTemplateIds, SlackSettings};
use ysk_clinic_api::notifications::email::ResendEmailClient;
use ysk_clinic_api::notifications::kakao::KakaoClient;
use ysk_clinic_api::notifications::slack::SlackClient;
use ysk_clinic_api::notifications::{
    AlimtalkMessage, ChannelError, ChatOpsChannel, ChatOpsPost, EmailChannel, EmailMessage,
    KakaoTemplate, MessagingChannel, SlackRoute,
};

fn slack_settings(api_url: String, webhook_url: Option<String>) -> SlackSettings {
    SlackSettings {
        api_url,
        bot_token: Some("xoxb-test".into()),
        webhook_url,
        ..SlackSettings::default()
    }
}

fn alert_post() -> ChatOpsPost {
    ChatOpsPost {
        route: SlackRoute::Alerts,
        text: "🔵 시스템 알림: 점검".into(),
        blocks: vec![],
    }
}

fn kakao_settings(api_url: String, api_key: Option<&str>) -> KakaoSettings {
    KakaoSettings {
        api_url,
        api_key: api_key.map(String::from),
        account_id: "ysk-eye".into(),
        sender_key: "sender-key".into(),
        templates: KakaoTemplateIds {
            appointment: "TPL_APPOINTMENT".into(),
            reminder: "TPL_REMINDER".into(),
            cancellation: "TPL_CANCEL".into(),
            consultation: "TPL_CONSULT".into(),
        },
    }
}

fn alimtalk(phone: &str) -> AlimtalkMessage {
    AlimtalkMessage {
        template: KakaoTemplate::Appointment,
        phone_number: phone.into(),
        message: "예약이 확정되었습니다".into(),
        buttons: vec![],
    }
}

#[tokio::test]
async fn slack_posts_to_the_configured_channel() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat.postMessage"))
        .and(header("authorization", "Bearer xoxb-test"))
        .and(body_partial_json(json!({ "channel": "#alerts", "text": "🔵 시스템 알림: 점검" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let client = SlackClient::new(&slack_settings(server.uri(), None)).unwrap();
    assert!(client.post(&alert_post()).await.is_ok());
}

#[tokio::test]
async fn slack_falls_back_to_webhook_when_api_rejects() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat.postMessage"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "ok": false, "error": "channel_not_found" })),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/hooks/fallback"))
        .and(body_partial_json(json!({ "text": "🔵 시스템 알림: 점검" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let webhook = format!("{}/hooks/fallback", server.uri());
    let client = SlackClient::new(&slack_settings(server.uri(), Some(webhook))).unwrap();

    assert!(client.post(&alert_post()).await.is_ok());
}

#[tokio::test]
async fn slack_without_fallback_surfaces_the_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat.postMessage"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "ok": false, "error": "invalid_auth" })),
        )
        .mount(&server)
        .await;

    let client = SlackClient::new(&slack_settings(server.uri(), None)).unwrap();
    let err = client.post(&alert_post()).await.unwrap_err();

    assert!(matches!(err, ChannelError::Rejected(ref reason) if reason == "invalid_auth"));
}

#[tokio::test]
async fn slack_without_token_is_not_configured() {
    let settings = SlackSettings::default();
    let client = SlackClient::new(&settings).unwrap();

    let err = client.post(&alert_post()).await.unwrap_err();
    assert!(matches!(err, ChannelError::NotConfigured("SLACK_BOT_TOKEN")));
}

#[tokio::test]
async fn kakao_sends_alimtalk_with_normalized_number() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/message"))
        .and(header("authorization", "Bearer kakao-key"))
        .and(body_partial_json(json!({
            "account": "ysk-eye",
            "messageType": "AT",
            "from": "sender-key",
            "to": "+821012345678",
            "content": { "templateId": "TPL_APPOINTMENT" }
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "code": "200", "messageId": "biz-001" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = KakaoClient::new(kakao_settings(server.uri(), Some("kakao-key"))).unwrap();
    let message_id = client.send(&alimtalk("010-1234-5678")).await.unwrap();

    assert_eq!(message_id, "biz-001");
}

#[tokio::test]
async fn kakao_provider_rejection_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/message"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "code": "4001", "message": "등록되지 않은 템플릿" })),
        )
        .mount(&server)
        .await;

    let client = KakaoClient::new(kakao_settings(server.uri(), Some("kakao-key"))).unwrap();
    let err = client.send(&alimtalk("010-1234-5678")).await.unwrap_err();

    assert!(matches!(err, ChannelError::Rejected(ref reason) if reason == "등록되지 않은 템플릿"));
}

#[tokio::test]
async fn kakao_simulation_mode_never_calls_the_provider() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = KakaoClient::new(kakao_settings(server.uri(), None)).unwrap();
    assert!(client.is_simulation());

    let message_id = client.send(&alimtalk("010-1234-5678")).await.unwrap();
    assert!(message_id.starts_with("sim_"));
}

#[tokio::test]
async fn kakao_requires_a_phone_number() {
    let client = KakaoClient::new(kakao_settings("http://127.0.0.1:9".into(), None)).unwrap();

    let err = client.send(&alimtalk("  ")).await.unwrap_err();
    assert!(matches!(err, ChannelError::MissingRecipient(_)));
}

#[tokio::test]
async fn resend_returns_the_email_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/emails"))
        .and(header("authorization", "Bearer re_test"))
        .and(body_partial_json(json!({
            "from": "noreply@ysk-eye.ai",
            "to": ["patient@example.com"],
            "subject": "예약 확인"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "email-123" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ResendEmailClient::new(
        server.uri(),
        Some("re_test".into()),
        "noreply@ysk-eye.ai".into(),
    )
    .unwrap();

    let receipt = client
        .send(&EmailMessage {
            to: "patient@example.com".into(),
            subject: "예약 확인".into(),
            html: "<p>확인</p>".into(),
        })
        .await
        .unwrap();

    assert_eq!(receipt.id, "email-123");
}

#[tokio::test]
async fn resend_error_status_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(422).set_body_string("invalid from address"))
        .mount(&server)
        .await;

    let client = ResendEmailClient::new(server.uri(), Some("re_test".into()), "bad".into()).unwrap();
    let err = client
        .send(&EmailMessage {
            to: "patient@example.com".into(),
            subject: "예약 확인".into(),
            html: String::new(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ChannelError::Rejected(ref reason) if reason.contains("422")));
}
