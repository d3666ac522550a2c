//! Human-in-the-loop settlement: queued airdrop transfers approved or
//! rejected through bot callbacks.
//!
//! Approval marks the item `approved` before the transfer is attempted, so
//! a crash mid-transfer leaves a recoverable non-pending state instead of a
//! silently retryable one. Never double pays, may fail to pay.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{TelegramConfig, TransferConfig};
use crate::error::ApiError;
use crate::store::{QueueRow, QueueStatus, Store};
use crate::waitlist::normalize_email;

/// Provider error text is truncated to this many characters for display.
const ERROR_TEXT_MAX: usize = 200;

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// On-chain transfer seam.
#[async_trait]
pub trait TokenTransfer: Send + Sync {
    async fn transfer(&self, to: &str, amount: u64) -> Result<(), ApiError>;
}

/// Approval-thread notification seam. One mutable message per queue item.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post the approval request; returns (chat_id, message_id).
    async fn send_approval_request(&self, item: &QueueRow) -> Result<(i64, i64), ApiError>;
    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str)
        -> Result<(), ApiError>;
    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<(), ApiError>;
}

/// Wallet-as-a-service transfer client.
pub struct TransferClient {
    client: Client,
    config: TransferConfig,
}

impl TransferClient {
    pub fn new(client: Client, config: TransferConfig) -> Self {
        TransferClient { client, config }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferRequest<'a> {
    from: &'a str,
    to: &'a str,
    amount: u64,
    token_address: &'a str,
    chain_id: u64,
}

#[async_trait]
impl TokenTransfer for TransferClient {
    async fn transfer(&self, to: &str, amount: u64) -> Result<(), ApiError> {
        let response = self
            .client
            .post(format!("{}/tokens/transfer", self.config.api_url))
            .header("x-secret-key", &self.config.secret_key)
            .json(&TransferRequest {
                from: &self.config.treasury_wallet,
                to,
                amount,
                token_address: &self.config.token_address,
                chain_id: self.config.chain_id,
            })
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("transfer request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "transfer returned {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

/// Bot API client for the approval thread.
pub struct TelegramNotifier {
    client: Client,
    config: TelegramConfig,
}

impl TelegramNotifier {
    pub fn new(client: Client, config: TelegramConfig) -> Self {
        TelegramNotifier { client, config }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{}",
            self.config.bot_token, method
        )
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<serde_json::Value, ApiError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("bot {} failed: {}", method, e)))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "bot {} returned {}: {}",
                method, status, text
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ApiError::Upstream(format!("bot {} parse failed: {}", method, e)))
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_approval_request(&self, item: &QueueRow) -> Result<(i64, i64), ApiError> {
        let text = format!(
            "Airdrop request\nemail: {}\nwallet: {}\namount: {}",
            item.referrer_email, item.referrer_wallet, item.amount
        );
        let body = serde_json::json!({
            "chat_id": self.config.admin_chat_id,
            "text": text,
            "reply_markup": {
                "inline_keyboard": [[
                    { "text": "Approve", "callback_data": format!("approve:{}", item.id) },
                    { "text": "Reject", "callback_data": format!("reject:{}", item.id) }
                ]]
            }
        });
        let reply = self.call("sendMessage", body).await?;
        let message_id = reply["result"]["message_id"].as_i64();
        let chat_id = reply["result"]["chat"]["id"].as_i64();
        match (chat_id, message_id) {
            (Some(chat_id), Some(message_id)) => Ok((chat_id, message_id)),
            _ => Err(ApiError::Upstream(
                "bot sendMessage reply missing message ids".to_string(),
            )),
        }
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), ApiError> {
        self.call(
            "editMessageText",
            serde_json::json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "text": text,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<(), ApiError> {
        self.call(
            "answerCallbackQuery",
            serde_json::json!({
                "callback_query_id": callback_id,
                "text": text,
            }),
        )
        .await
        .map(|_| ())
    }
}

/// Inbound webhook payload (the subset the approval flow reads).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TelegramUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CallbackQuery {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<TelegramUser>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TelegramUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

pub struct SettlementService {
    store: Arc<dyn Store>,
    notifier: Option<Arc<dyn Notifier>>,
    transfer: Option<Arc<dyn TokenTransfer>>,
}

impl SettlementService {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Option<Arc<dyn Notifier>>,
        transfer: Option<Arc<dyn TokenTransfer>>,
    ) -> Self {
        SettlementService {
            store,
            notifier,
            transfer,
        }
    }

    /// Queue a transfer for `email`'s linked wallet and post the approval
    /// request. The item stays `pending` until a reviewer acts on it.
    pub async fn enqueue(&self, email: &str, amount: u64) -> Result<Uuid, ApiError> {
        if amount == 0 {
            return Err(ApiError::Validation("amount must be positive".to_string()));
        }
        let email = normalize_email(email);
        let entry = self
            .store
            .entry_by_email(&email)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("no waitlist entry for {}", email)))?;
        let wallet = entry.wallet_address.ok_or_else(|| {
            ApiError::Validation(format!("{} has no linked wallet", email))
        })?;

        let mut item = QueueRow {
            id: Uuid::new_v4(),
            referrer_email: email.clone(),
            referrer_wallet: wallet,
            amount,
            status: QueueStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            sent_at: None,
            error_message: None,
            rejection_reason: None,
            chat_id: None,
            message_id: None,
            created_at: Utc::now(),
        };
        self.store.insert_queue_item(item.clone()).await?;

        if let Some(notifier) = &self.notifier {
            match notifier.send_approval_request(&item).await {
                Ok((chat_id, message_id)) => {
                    item.chat_id = Some(chat_id);
                    item.message_id = Some(message_id);
                    if let Err(e) = self.store.update_queue_item(item.clone()).await {
                        log::error!("queue item {} message ids not saved: {}", item.id, e);
                    }
                }
                Err(e) => {
                    log::error!("approval notification for {} failed: {}", item.id, e);
                }
            }
        }
        log::info!(
            "queued airdrop {} for {} ({} tokens)",
            item.id,
            email,
            amount
        );
        Ok(item.id)
    }

    /// Process one inbound bot callback. Always acknowledges so the caller
    /// UI clears its pending state; all failures are reported in the
    /// acknowledgement text rather than the HTTP status.
    pub async fn handle_callback(&self, update: TelegramUpdate) {
        let query = match update.callback_query {
            Some(query) => query,
            None => {
                log::debug!("webhook update without callback query, ignoring");
                return;
            }
        };
        let reviewer = query
            .from
            .as_ref()
            .and_then(|u| u.username.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let ack = match query.data.as_deref() {
            Some(data) => self.apply_action(data, &reviewer).await,
            None => "missing callback data".to_string(),
        };
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.answer_callback(&query.id, &ack).await {
                log::error!("callback acknowledgement failed: {}", e);
            }
        }
    }

    async fn apply_action(&self, data: &str, reviewer: &str) -> String {
        let (action, id) = match data.split_once(':') {
            Some(parts) => parts,
            None => return format!("unrecognized action {}", data),
        };
        let id = match Uuid::parse_str(id) {
            Ok(id) => id,
            Err(_) => return format!("bad queue id {}", id),
        };
        let item = match self.store.queue_item(id).await {
            Ok(Some(item)) => item,
            Ok(None) => return format!("unknown queue item {}", id),
            Err(e) => {
                log::error!("queue item {} load failed: {}", id, e);
                return "datastore unavailable".to_string();
            }
        };
        // Terminal states stay terminal; no automatic retry on this path.
        if item.status != QueueStatus::Pending {
            return format!("already: {}", item.status);
        }
        match action {
            "approve" => self.approve(item, reviewer).await,
            "reject" => self.reject(item, reviewer).await,
            other => format!("unrecognized action {}", other),
        }
    }

    async fn approve(&self, mut item: QueueRow, reviewer: &str) -> String {
        item.status = QueueStatus::Approved;
        item.reviewed_by = Some(reviewer.to_string());
        item.reviewed_at = Some(Utc::now());
        if let Err(e) = self.store.update_queue_item(item.clone()).await {
            log::error!("queue item {} approve not persisted: {}", item.id, e);
            return "datastore unavailable".to_string();
        }

        let transfer_result = match &self.transfer {
            Some(transfer) => transfer.transfer(&item.referrer_wallet, item.amount).await,
            None => Err(ApiError::Configuration("transfer".to_string())),
        };

        let ack = match transfer_result {
            Ok(()) => {
                item.status = QueueStatus::Sent;
                item.sent_at = Some(Utc::now());
                log::info!("queue item {} sent ({} tokens)", item.id, item.amount);
                format!("sent {} tokens to {}", item.amount, item.referrer_email)
            }
            Err(e) => {
                item.status = QueueStatus::Failed;
                item.error_message = Some(truncate_chars(&e.to_string(), ERROR_TEXT_MAX));
                log::error!("queue item {} transfer failed: {}", item.id, e);
                "transfer failed".to_string()
            }
        };
        if let Err(e) = self.store.update_queue_item(item.clone()).await {
            log::error!("queue item {} final state not persisted: {}", item.id, e);
        }
        self.edit_thread(&item).await;
        ack
    }

    async fn reject(&self, mut item: QueueRow, reviewer: &str) -> String {
        item.status = QueueStatus::Rejected;
        item.reviewed_by = Some(reviewer.to_string());
        item.reviewed_at = Some(Utc::now());
        item.rejection_reason = Some(format!("rejected by {}", reviewer));
        if let Err(e) = self.store.update_queue_item(item.clone()).await {
            log::error!("queue item {} reject not persisted: {}", item.id, e);
            return "datastore unavailable".to_string();
        }
        self.edit_thread(&item).await;
        "rejected".to_string()
    }

    /// Edit the original approval message so the thread stays a single
    /// mutable record of final state.
    async fn edit_thread(&self, item: &QueueRow) {
        let notifier = match &self.notifier {
            Some(notifier) => notifier,
            None => return,
        };
        let (chat_id, message_id) = match (item.chat_id, item.message_id) {
            (Some(chat_id), Some(message_id)) => (chat_id, message_id),
            _ => return,
        };
        let text = match item.status {
            QueueStatus::Sent => format!(
                "SENT — {} tokens to {} ({})",
                item.amount, item.referrer_email, item.referrer_wallet
            ),
            QueueStatus::Failed => format!(
                "FAILED — {} tokens to {}: {}",
                item.amount,
                item.referrer_email,
                item.error_message.as_deref().unwrap_or("unknown error")
            ),
            QueueStatus::Rejected => format!(
                "REJECTED — {} tokens to {} ({})",
                item.amount,
                item.referrer_email,
                item.rejection_reason.as_deref().unwrap_or("no reason")
            ),
            _ => return,
        };
        if let Err(e) = notifier.edit_message(chat_id, message_id, &text).await {
            log::error!("approval message edit failed for {}: {}", item.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use waitlist_api::Platform;

    struct MockTransfer {
        calls: AtomicUsize,
        fail: bool,
        error_text: String,
    }

    impl MockTransfer {
        fn ok() -> Arc<Self> {
            Arc::new(MockTransfer {
                calls: AtomicUsize::new(0),
                fail: false,
                error_text: String::new(),
            })
        }

        fn failing(error_text: &str) -> Arc<Self> {
            Arc::new(MockTransfer {
                calls: AtomicUsize::new(0),
                fail: true,
                error_text: error_text.to_string(),
            })
        }
    }

    #[async_trait]
    impl TokenTransfer for MockTransfer {
        async fn transfer(&self, _to: &str, _amount: u64) -> Result<(), ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ApiError::Upstream(self.error_text.clone()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct MockNotifier {
        edits: Mutex<Vec<String>>,
        acks: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        async fn send_approval_request(&self, _item: &QueueRow) -> Result<(i64, i64), ApiError> {
            Ok((42, 7))
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

    async fn seed_entry(store: &MemoryStore, email: &str, wallet: Option<&str>) {
        store
            .insert_entry(crate::store::WaitlistRow {
                email: email.to_string(),
                tier_number: 1,
                tier_name: "OG Founder".to_string(),
                signup_position: 1,
                referral_code: "BEARAB23".to_string(),
                referred_by: None,
                verified: true,
                platform: Platform::Ios,
                wallet_address: wallet.map(String::from),
                thirdweb_user_id: Some("u1".to_string()),
                metadata: serde_json::json!({}),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    fn callback(data: &str) -> TelegramUpdate {
        TelegramUpdate {
            callback_query: Some(CallbackQuery {
                id: "cb-1".to_string(),
                data: Some(data.to_string()),
                from: Some(TelegramUser {
                    username: Some("reviewer".to_string()),
                }),
            }),
        }
    }

    #[tokio::test]
    async fn test_enqueue_requires_linked_wallet() {
        let store = Arc::new(MemoryStore::new());
        seed_entry(&store, "a@x.com", None).await;
        let svc = SettlementService::new(store, None, None);

        let err = svc.enqueue("a@x.com", 1_000).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn test_enqueue_stores_notification_ids() {
        let store = Arc::new(MemoryStore::new());
        seed_entry(&store, "a@x.com", Some(&"9".repeat(40))).await;
        let notifier = Arc::new(MockNotifier::default());
        let svc = SettlementService::new(store.clone(), Some(notifier), None);

        let id = svc.enqueue("a@x.com", 1_000).await.unwrap();
        let item = store.queue_item(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.chat_id, Some(42));
        assert_eq!(item.message_id, Some(7));
    }

    #[tokio::test]
    async fn test_approve_transfers_and_marks_sent() {
        let store = Arc::new(MemoryStore::new());
        seed_entry(&store, "a@x.com", Some(&"9".repeat(40))).await;
        let notifier = Arc::new(MockNotifier::default());
        let transfer = MockTransfer::ok();
        let svc = SettlementService::new(store.clone(), Some(notifier.clone()), Some(transfer.clone()));

        let id = svc.enqueue("a@x.com", 1_000).await.unwrap();
        svc.handle_callback(callback(&format!("approve:{}", id))).await;

        let item = store.queue_item(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Sent);
        assert!(item.sent_at.is_some());
        assert_eq!(item.reviewed_by.as_deref(), Some("reviewer"));
        assert_eq!(transfer.calls.load(Ordering::SeqCst), 1);

        let edits = notifier.edits.lock().unwrap();
        assert!(edits.last().unwrap().starts_with("SENT"));
        let acks = notifier.acks.lock().unwrap();
        assert!(acks.last().unwrap().contains("sent"));
    }

    #[tokio::test]
    async fn test_approve_failure_records_truncated_error() {
        let store = Arc::new(MemoryStore::new());
        seed_entry(&store, "a@x.com", Some(&"9".repeat(40))).await;
        let long_error = "x".repeat(300);
        let transfer = MockTransfer::failing(&long_error);
        let notifier = Arc::new(MockNotifier::default());
        let svc = SettlementService::new(store.clone(), Some(notifier.clone()), Some(transfer));

        let id = svc.enqueue("a@x.com", 1_000).await.unwrap();
        svc.handle_callback(callback(&format!("approve:{}", id))).await;

        let item = store.queue_item(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.error_message.as_ref().unwrap().chars().count(), 200);
        let edits = notifier.edits.lock().unwrap();
        assert!(edits.last().unwrap().starts_with("FAILED"));
    }

    #[tokio::test]
    async fn test_reject_skips_transfer() {
        let store = Arc::new(MemoryStore::new());
        seed_entry(&store, "a@x.com", Some(&"9".repeat(40))).await;
        let transfer = MockTransfer::ok();
        let notifier = Arc::new(MockNotifier::default());
        let svc = SettlementService::new(store.clone(), Some(notifier.clone()), Some(transfer.clone()));

        let id = svc.enqueue("a@x.com", 1_000).await.unwrap();
        svc.handle_callback(callback(&format!("reject:{}", id))).await;

        let item = store.queue_item(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Rejected);
        assert_eq!(
            item.rejection_reason.as_deref(),
            Some("rejected by reviewer")
        );
        assert_eq!(transfer.calls.load(Ordering::SeqCst), 0);
        let edits = notifier.edits.lock().unwrap();
        assert!(edits.last().unwrap().starts_with("REJECTED"));
    }

    #[tokio::test]
    async fn test_second_approve_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        seed_entry(&store, "a@x.com", Some(&"9".repeat(40))).await;
        let transfer = MockTransfer::ok();
        let notifier = Arc::new(MockNotifier::default());
        let svc = SettlementService::new(store.clone(), Some(notifier.clone()), Some(transfer.clone()));

        let id = svc.enqueue("a@x.com", 1_000).await.unwrap();
        svc.handle_callback(callback(&format!("approve:{}", id))).await;
        svc.handle_callback(callback(&format!("approve:{}", id))).await;

        // No second transfer, and the reviewer is told the final state.
        assert_eq!(transfer.calls.load(Ordering::SeqCst), 1);
        let acks = notifier.acks.lock().unwrap();
        assert_eq!(acks.last().unwrap(), "already: sent");
    }

    #[tokio::test]
    async fn test_unknown_item_and_garbage_data() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(MockNotifier::default());
        let svc = SettlementService::new(store, Some(notifier.clone()), None);

        svc.handle_callback(callback(&format!("approve:{}", Uuid::new_v4())))
            .await;
        svc.handle_callback(callback("approve:not-a-uuid")).await;
        svc.handle_callback(callback("launch-missiles")).await;

        let acks = notifier.acks.lock().unwrap();
        assert!(acks[0].contains("unknown queue item"));
        assert!(acks[1].contains("bad queue id"));
        assert!(acks[2].contains("unrecognized action"));
    }
}
