use std::time::Duration;

/// Resend (email) settings.
#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub api_url: String,
    pub api_key: Option<String>,
    pub from: String,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.resend.com".to_string(),
            api_key: None,
            from: "noreply@ysk-eye.ai".to_string(),
        }
    }
}

/// Slack bot and fallback webhook settings.
#[derive(Debug, Clone)]
pub struct SlackSettings {
    pub api_url: String,
    pub bot_token: Option<String>,
    pub webhook_url: Option<String>,
    pub alerts_channel: String,
    pub reservations_channel: String,
}

impl Default for SlackSettings {
    fn default() -> Self {
        Self {
            api_url: "https://slack.com/api".to_string(),
            bot_token: None,
            webhook_url: None,
            alerts_channel: "#alerts".to_string(),
            reservations_channel: "#reservations".to_string(),
        }
    }
}

/// AlimTalk template ids registered with the provider.
#[derive(Debug, Clone, Default)]
pub struct KakaoTemplateIds {
    pub appointment: String,
    pub reminder: String,
    pub cancellation: String,
    pub consultation: String,
}

/// Bizppurio (KakaoTalk AlimTalk) settings. No API key means simulation mode.
#[derive(Debug, Clone)]
pub struct KakaoSettings {
    pub api_url: String,
    pub api_key: Option<String>,
    pub account_id: String,
    pub sender_key: String,
    pub templates: KakaoTemplateIds,
}

impl Default for KakaoSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.bizppurio.com".to_string(),
            api_key: None,
            account_id: String::new(),
            sender_key: String::new(),
            templates: KakaoTemplateIds::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Public site URL used in message links.
    pub app_url: String,
    /// Bearer token for admin routes; open when unset.
    pub admin_token: Option<String>,
    pub typebot_webhook_secret: Option<String>,
    pub email: EmailSettings,
    pub slack: SlackSettings,
    pub kakao: KakaoSettings,
    pub scheduler_autostart: bool,
    pub rate_limit_sweep_interval: Duration,
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn with_default(name: &str, default: &str) -> String {
    optional(name).unwrap_or_else(|| default.to_string())
}

fn http_url(name: &str, default: &str) -> anyhow::Result<String> {
    let url = with_default(name, default);
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let email_defaults = EmailSettings::default();
        let slack_defaults = SlackSettings::default();
        let kakao_defaults = KakaoSettings::default();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable required"))
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            app_url: http_url("APP_URL", "https://ysk-eye.ai")?
                .trim_end_matches('/')
                .to_string(),
            admin_token: optional("ADMIN_API_TOKEN"),
            typebot_webhook_secret: optional("TYPEBOT_WEBHOOK_SECRET"),
            email: EmailSettings {
                api_url: http_url("RESEND_API_URL", &email_defaults.api_url)?,
                api_key: optional("RESEND_API_KEY"),
                from: with_default("FROM_EMAIL", &email_defaults.from),
            },
            slack: SlackSettings {
                api_url: http_url("SLACK_API_URL", &slack_defaults.api_url)?,
                bot_token: optional("SLACK_BOT_TOKEN"),
                webhook_url: optional("SLACK_WEBHOOK_URL"),
                alerts_channel: with_default("SLACK_CHANNEL_ALERTS", &slack_defaults.alerts_channel),
                reservations_channel: with_default(
                    "SLACK_CHANNEL_RESERVATIONS",
                    &slack_defaults.reservations_channel,
                ),
            },
            kakao: KakaoSettings {
                api_url: http_url("KAKAO_API_URL", &kakao_defaults.api_url)?,
                api_key: optional("KAKAO_API_KEY"),
                account_id: with_default("KAKAO_ACCOUNT_ID", ""),
                sender_key: with_default("KAKAO_SENDER_KEY", ""),
                templates: KakaoTemplateIds {
                    appointment: with_default("KAKAO_TEMPLATE_ID_APPOINTMENT", ""),
                    reminder: with_default("KAKAO_TEMPLATE_ID_REMINDER", ""),
                    cancellation: with_default("KAKAO_TEMPLATE_ID_CANCELLATION", ""),
                    consultation: with_default("KAKAO_TEMPLATE_ID_CONSULTATION", ""),
                },
            },
            scheduler_autostart: std::env::var("REMINDER_SCHEDULER_AUTOSTART")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            rate_limit_sweep_interval: Duration::from_secs(
                std::env::var("RATE_LIMIT_SWEEP_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse::<u64>()
                    .map_err(|_| anyhow::anyhow!("RATE_LIMIT_SWEEP_SECS must be a positive number"))?
                    .max(1),
            ),
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            config.database_url.chars().take(20).collect::<String>()
        );
        tracing::debug!("App URL: {}", config.app_url);
        tracing::debug!("Server Port: {}", config.port);
        tracing::info!(
            email = config.email.api_key.is_some(),
            slack_bot = config.slack.bot_token.is_some(),
            slack_webhook = config.slack.webhook_url.is_some(),
            kakao = config.kakao.api_key.is_some(),
            admin_auth = config.admin_token.is_some(),
            "Notification channels configured"
        );

        Ok(config)
    }

    /// Configuration with every external integration disabled.
    pub fn local(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            port: 3000,
            app_url: "http://localhost:3000".to_string(),
            admin_token: None,
            typebot_webhook_secret: None,
            email: EmailSettings::default(),
            slack: SlackSettings::default(),
            kakao: KakaoSettings::default(),
            scheduler_autostart: false,
            rate_limit_sweep_interval: Duration::from_secs(300),
        }
    }
}
