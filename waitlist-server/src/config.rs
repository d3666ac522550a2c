use chrono::{DateTime, Utc};

/// Bot notification credentials for the settlement approval flow.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Shared secret expected as the webhook `secret` query parameter.
    /// Compared exactly, untrimmed.
    pub webhook_secret: String,
    /// Chat that receives approval requests.
    pub admin_chat_id: i64,
}

/// Beta-distribution API credentials (ES256 key for bearer tokens).
#[derive(Debug, Clone)]
pub struct TestflightConfig {
    pub key_id: String,
    pub issuer_id: String,
    pub private_key_pem: String,
    pub app_id: String,
}

/// Token transfer provider credentials for settlement.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub api_url: String,
    pub secret_key: String,
    pub treasury_wallet: String,
    pub token_address: String,
    pub chain_id: u64,
}

/// Identity/OTP provider credentials for the auth proxy endpoints.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub api_url: String,
    pub secret_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Public site base, used to build referral links.
    pub site_url: String,
    pub admin_api_key: Option<String>,
    /// Start of the early-bird multiplier schedule.
    pub launch_timestamp: DateTime<Utc>,
    pub telegram: Option<TelegramConfig>,
    pub testflight: Option<TestflightConfig>,
    pub transfer: Option<TransferConfig>,
    pub auth: Option<AuthConfig>,
}

impl Config {
    /// Exact match after trimming both sides. Absent key means no admin
    /// access at all, never open access.
    pub fn admin_key_matches(&self, supplied: &str) -> bool {
        match &self.admin_api_key {
            Some(key) => !key.trim().is_empty() && key.trim() == supplied.trim(),
            None => false,
        }
    }

    pub fn referral_link(&self, code: &str) -> String {
        format!("{}/?ref={}", self.site_url.trim_end_matches('/'), code)
    }
}
