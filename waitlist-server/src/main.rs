use chrono::{DateTime, TimeZone, Utc};
use clap::Parser;
use log::info;
use std::net::SocketAddr;
use std::sync::Arc;
use waitlist_server::config::{AuthConfig, Config, TelegramConfig, TestflightConfig, TransferConfig};
use waitlist_server::postgrest::PostgrestStore;
use waitlist_server::AppState;

/// Bearish waitlist service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port number to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8787)]
    port: u16,

    /// Public site base used for referral links
    #[arg(long, env = "SITE_URL", default_value = "https://bearish.money")]
    site_url: String,

    /// Datastore REST endpoint
    #[arg(long, env = "SUPABASE_URL")]
    supabase_url: String,

    /// Datastore service-role key
    #[arg(long, env = "SUPABASE_SERVICE_KEY", hide_env_values = true)]
    supabase_service_key: String,

    /// Shared secret for the admin endpoints
    #[arg(long, env = "ADMIN_API_KEY", hide_env_values = true)]
    admin_api_key: Option<String>,

    /// RFC3339 start of the early-bird multiplier schedule
    #[arg(long, env = "LAUNCH_TIMESTAMP")]
    launch_timestamp: Option<DateTime<Utc>>,

    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    telegram_bot_token: Option<String>,
    #[arg(long, env = "TELEGRAM_WEBHOOK_SECRET", hide_env_values = true)]
    telegram_webhook_secret: Option<String>,
    #[arg(long, env = "TELEGRAM_ADMIN_CHAT_ID", allow_hyphen_values = true)]
    telegram_admin_chat_id: Option<i64>,

    #[arg(long, env = "ASC_KEY_ID")]
    asc_key_id: Option<String>,
    #[arg(long, env = "ASC_ISSUER_ID")]
    asc_issuer_id: Option<String>,
    /// PEM-encoded private key for the beta-distribution API
    #[arg(long, env = "ASC_PRIVATE_KEY", hide_env_values = true)]
    asc_private_key: Option<String>,
    #[arg(long, env = "ASC_APP_ID")]
    asc_app_id: Option<String>,

    #[arg(long, env = "TRANSFER_API_URL")]
    transfer_api_url: Option<String>,
    #[arg(long, env = "TRANSFER_SECRET_KEY", hide_env_values = true)]
    transfer_secret_key: Option<String>,
    #[arg(long, env = "TREASURY_WALLET")]
    treasury_wallet: Option<String>,
    #[arg(long, env = "TOKEN_ADDRESS")]
    token_address: Option<String>,
    #[arg(long, env = "CHAIN_ID", default_value_t = 8453)]
    chain_id: u64,

    #[arg(long, env = "AUTH_API_URL")]
    auth_api_url: Option<String>,
    #[arg(long, env = "AUTH_SECRET_KEY", hide_env_values = true)]
    auth_secret_key: Option<String>,
}

impl Args {
    fn telegram(&self) -> Option<TelegramConfig> {
        match (
            &self.telegram_bot_token,
            &self.telegram_webhook_secret,
            self.telegram_admin_chat_id,
        ) {
            (Some(bot_token), Some(webhook_secret), Some(admin_chat_id)) => Some(TelegramConfig {
                bot_token: bot_token.clone(),
                webhook_secret: webhook_secret.clone(),
                admin_chat_id,
            }),
            (None, None, None) => None,
            _ => {
                log::warn!("partial telegram configuration ignored");
                None
            }
        }
    }

    fn testflight(&self) -> Option<TestflightConfig> {
        match (
            &self.asc_key_id,
            &self.asc_issuer_id,
            &self.asc_private_key,
            &self.asc_app_id,
        ) {
            (Some(key_id), Some(issuer_id), Some(private_key_pem), Some(app_id)) => {
                Some(TestflightConfig {
                    key_id: key_id.clone(),
                    issuer_id: issuer_id.clone(),
                    private_key_pem: private_key_pem.clone(),
                    app_id: app_id.clone(),
                })
            }
            (None, None, None, None) => None,
            _ => {
                log::warn!("partial testflight configuration ignored");
                None
            }
        }
    }

    fn transfer(&self) -> Option<TransferConfig> {
        match (
            &self.transfer_api_url,
            &self.transfer_secret_key,
            &self.treasury_wallet,
            &self.token_address,
        ) {
            (Some(api_url), Some(secret_key), Some(treasury_wallet), Some(token_address)) => {
                Some(TransferConfig {
                    api_url: api_url.trim_end_matches('/').to_string(),
                    secret_key: secret_key.clone(),
                    treasury_wallet: treasury_wallet.clone(),
                    token_address: token_address.clone(),
                    chain_id: self.chain_id,
                })
            }
            (None, None, None, None) => None,
            _ => {
                log::warn!("partial transfer configuration ignored");
                None
            }
        }
    }

    fn auth(&self) -> Option<AuthConfig> {
        match (&self.auth_api_url, &self.auth_secret_key) {
            (Some(api_url), Some(secret_key)) => Some(AuthConfig {
                api_url: api_url.trim_end_matches('/').to_string(),
                secret_key: secret_key.clone(),
            }),
            (None, None) => None,
            _ => {
                log::warn!("partial auth configuration ignored");
                None
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    env_logger::init();
    info!("Starting waitlist service...");

    let config = Config {
        site_url: args.site_url.clone(),
        admin_api_key: args.admin_api_key.clone(),
        launch_timestamp: args
            .launch_timestamp
            .unwrap_or_else(|| Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap()),
        telegram: args.telegram(),
        testflight: args.testflight(),
        transfer: args.transfer(),
        auth: args.auth(),
    };
    info!(
        "integrations: telegram={} testflight={} transfer={} auth={}",
        config.telegram.is_some(),
        config.testflight.is_some(),
        config.transfer.is_some(),
        config.auth.is_some()
    );

    let store = Arc::new(PostgrestStore::new(
        reqwest::Client::new(),
        args.supabase_url,
        args.supabase_service_key,
    ));
    let state = AppState::new(config, store);

    let addr: SocketAddr = ([0, 0, 0, 0], args.port).into();
    info!("Server starting on {}", addr);
    warp::serve(waitlist_server::routes(state)).run(addr).await;
}
