//! Shared fixtures for the endpoint tests: an in-memory datastore and mock
//! provider clients wired into the full route tree.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use waitlist_server::config::{Config, TelegramConfig};
use waitlist_server::error::ApiError;
use waitlist_server::settlement::Notifier;
use waitlist_server::store::{MemoryStore, QueueRow};
use waitlist_server::testflight::{BetaDistribution, CreateTesterOutcome};
use waitlist_server::AppState;

pub const ADMIN_KEY: &str = "test-admin-key";
pub const WEBHOOK_SECRET: &str = "test-hook-secret";

pub struct MockBeta {
    pub calls: Mutex<Vec<String>>,
    existing: Mutex<HashSet<String>>,
}

impl MockBeta {
    pub fn new() -> Arc<Self> {
        Arc::new(MockBeta {
            calls: Mutex::new(Vec::new()),
            existing: Mutex::new(HashSet::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl BetaDistribution for MockBeta {
    async fn default_group(&self) -> Result<String, ApiError> {
        Ok("group-external".to_string())
    }

    async fn create_tester(
        &self,
        email: &str,
        _group_id: &str,
    ) -> Result<CreateTesterOutcome, ApiError> {
        self.calls.lock().unwrap().push(email.to_string());
        let mut existing = self.existing.lock().unwrap();
        if existing.contains(email) {
            Ok(CreateTesterOutcome::AlreadyInvited)
        } else {
            existing.insert(email.to_string());
            Ok(CreateTesterOutcome::Created {
                tester_id: format!("tester-{}", existing.len()),
            })
        }
    }
}

#[derive(Default)]
pub struct MockNotifier {
    pub edits: Mutex<Vec<String>>,
    pub acks: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_approval_request(&self, _item: &QueueRow) -> Result<(i64, i64), ApiError> {
        Ok((1001, 55))
    }

    async fn edit_message(
        &self,
        _chat_id: i64,
        _message_id: i64,
        text: &str,
    ) -> Result<(), ApiError> {
        self.edits.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn answer_callback(&self, _callback_id: &str, text: &str) -> Result<(), ApiError> {
        self.acks.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockTransfer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl waitlist_server::settlement::TokenTransfer for MockTransfer {
    async fn transfer(&self, _to: &str, _amount: u64) -> Result<(), ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct TestHarness {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub beta: Arc<MockBeta>,
    pub notifier: Arc<MockNotifier>,
    pub transfer: Arc<MockTransfer>,
}

pub fn harness() -> TestHarness {
    let config = Config {
        site_url: "https://bearish.money".to_string(),
        admin_api_key: Some(ADMIN_KEY.to_string()),
        launch_timestamp: Utc::now(),
        telegram: Some(TelegramConfig {
            bot_token: "000:fake".to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            admin_chat_id: 1001,
        }),
        // Provider clients are injected below; credentials stay unset.
        testflight: None,
        transfer: None,
        auth: None,
    };
    let store = Arc::new(MemoryStore::new());
    let beta = MockBeta::new();
    let notifier = Arc::new(MockNotifier::default());
    let transfer = Arc::new(MockTransfer::default());
    let state = AppState::with_services(
        config,
        store.clone(),
        Some(beta.clone()),
        Some(notifier.clone()),
        Some(transfer.clone()),
        None,
    );
    TestHarness {
        state,
        store,
        beta,
        notifier,
        transfer,
    }
}
