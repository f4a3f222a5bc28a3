use kedai_domain::support::{DEFAULT_MAX_ATTACHMENT_BYTES, DEFAULT_MAX_TEXT_CHARS, SupportLimits};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub jwt_secret: String,
    pub support_max_attachment_bytes: usize,
    pub support_max_text_chars: usize,
    pub support_upload_body_limit_bytes: usize,
    pub realtime_subscriber_queue: usize,
    pub realtime_heartbeat_secs: u64,
    #[serde(default)]
    pub storefront_fixture_path: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 3000)?
            .set_default("log_level", "info")?
            .set_default("jwt_secret", "dev-secret")?
            .set_default(
                "support_max_attachment_bytes",
                DEFAULT_MAX_ATTACHMENT_BYTES as u64,
            )?
            .set_default("support_max_text_chars", DEFAULT_MAX_TEXT_CHARS as u64)?
            .set_default("support_upload_body_limit_bytes", 32_u64 * 1024 * 1024)?
            .set_default("realtime_subscriber_queue", 64)?
            .set_default("realtime_heartbeat_secs", 15)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn for_tests() -> Self {
        Self {
            app_env: "test".to_string(),
            port: 0,
            log_level: "warn".to_string(),
            jwt_secret: "test-secret".to_string(),
            support_max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
            support_max_text_chars: DEFAULT_MAX_TEXT_CHARS,
            support_upload_body_limit_bytes: 32 * 1024 * 1024,
            realtime_subscriber_queue: 64,
            realtime_heartbeat_secs: 15,
            storefront_fixture_path: None,
        }
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn is_test(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("test")
    }

    pub fn support_limits(&self) -> SupportLimits {
        SupportLimits {
            max_attachment_bytes: self.support_max_attachment_bytes,
            max_text_chars: self.support_max_text_chars,
        }
    }
}
