//! In-process channel fakes shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ysk_clinic_api::notifications::{
    AlimtalkMessage, ChannelError, ChatOpsChannel, ChatOpsPost, DeliveryReceipt, EmailChannel,
    EmailMessage, MessagingChannel, NotificationManager,
};

#[derive(Default)]
pub struct FakeEmail {
    pub sent: Mutex<Vec<EmailMessage>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl EmailChannel for FakeEmail {
    async fn send(&self, message: &EmailMessage) -> Result<DeliveryReceipt, ChannelError> {
        self.sent.lock().unwrap().push(message.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChannelError::Rejected("email down".into()));
        }
        Ok(DeliveryReceipt { id: "email-1".into() })
    }
}

#[derive(Default)]
pub struct FakeChatOps {
    pub posts: Mutex<Vec<ChatOpsPost>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl ChatOpsChannel for FakeChatOps {
    async fn post(&self, post: &ChatOpsPost) -> Result<(), ChannelError> {
        self.posts.lock().unwrap().push(post.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChannelError::Rejected("boom".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeKakao {
    pub sent: Mutex<Vec<AlimtalkMessage>>,
    pub fail: AtomicBool,
    pub panic: AtomicBool,
}

#[async_trait]
impl MessagingChannel for FakeKakao {
    async fn send(&self, message: &AlimtalkMessage) -> Result<String, ChannelError> {
        if self.panic.load(Ordering::SeqCst) {
            panic!("kakao client crashed");
        }
        self.sent.lock().unwrap().push(message.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChannelError::Rejected("template rejected".into()));
        }
        Ok(format!("msg-{}", self.sent.lock().unwrap().len()))
    }
}

pub struct Channels {
    pub email: Arc<FakeEmail>,
    pub chat_ops: Arc<FakeChatOps>,
    pub kakao: Arc<FakeKakao>,
}

impl Channels {
    pub fn new() -> Self {
        Self {
            email: Arc::new(FakeEmail::default()),
            chat_ops: Arc::new(FakeChatOps::default()),
            kakao: Arc::new(FakeKakao::default()),
        }
    }

    pub fn manager(&self) -> Arc<NotificationManager> {
        Arc::new(NotificationManager::new(
            self.email.clone(),
            self.chat_ops.clone(),
            self.kakao.clone(),
            "https://ysk-eye.ai",
        ))
    }

    pub fn emails(&self) -> usize {
        self.email.sent.lock().unwrap().len()
    }

    pub fn posts(&self) -> Vec<ChatOpsPost> {
        self.chat_ops.posts.lock().unwrap().clone()
    }

    pub fn kakao_messages(&self) -> Vec<AlimtalkMessage> {
        self.kakao.sent.lock().unwrap().clone()
    }
}

/// Full router over a lazily-connected pool; handlers that reach the database fail
/// after a short acquire timeout.
pub fn test_app(config: ysk_clinic_api::config::Config, channels: &Channels) -> axum::Router {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(250))
        .connect_lazy(&config.database_url)
        .unwrap();
    let state = Arc::new(ysk_clinic_api::handlers::AppState::new(config, pool, channels.manager()));
    ysk_clinic_api::routes::build_router(state)
}
