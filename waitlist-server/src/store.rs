use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;
use waitlist_api::Platform;

/// Row in the `waitlist` table. One per unique email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitlistRow {
    pub email: String,
    pub tier_number: u8,
    pub tier_name: String,
    pub signup_position: u64,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub verified: bool,
    pub platform: Platform,
    pub wallet_address: Option<String>,
    /// Prior-authentication marker from the identity provider. Wallet
    /// linking is refused while this is absent.
    pub thirdweb_user_id: Option<String>,
    /// Beta-invite attempt history (invited flag, timestamp, error text,
    /// retry/batch markers). Mutated asynchronously by the invite paths.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Row in the `airdrop_allocations` table. Denormalized copy of the entry
/// for leaderboard/airdrop reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationRow {
    pub email: String,
    pub referral_code: String,
    pub tier_name: String,
    pub tier_number: u8,
    pub base_amount: u64,
    pub referral_amount: u64,
    pub action_amount: u64,
    pub bonus_multiplier: f64,
    pub wallet_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Settlement lifecycle of a queued transfer request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Approved,
    Sent,
    Rejected,
    Failed,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Approved => "approved",
            QueueStatus::Sent => "sent",
            QueueStatus::Rejected => "rejected",
            QueueStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Row in the `airdrop_queue` table. One per transfer request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRow {
    pub id: Uuid,
    pub referrer_email: String,
    pub referrer_wallet: String,
    pub amount: u64,
    pub status: QueueStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub rejection_reason: Option<String>,
    /// Chat and message of the approval notification, kept so every
    /// transition can edit the original message instead of posting a new one.
    pub chat_id: Option<i64>,
    pub message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique-constraint violation (duplicate email or referral code).
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    /// Datastore unreachable or returned an unexpected failure.
    #[error("{0}")]
    Unavailable(String),
}

/// Datastore boundary. Row-level CRUD with eq/count/order/limit primitives
/// over the `waitlist`, `airdrop_allocations` and `airdrop_queue` tables;
/// the datastore is the single source of truth across requests.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_entry(&self, row: WaitlistRow) -> Result<(), StoreError>;
    async fn entry_by_email(&self, email: &str) -> Result<Option<WaitlistRow>, StoreError>;
    async fn entry_by_referral_code(&self, code: &str)
        -> Result<Option<WaitlistRow>, StoreError>;
    async fn count_entries(&self) -> Result<u64, StoreError>;
    async fn count_tier_entries(&self, tier_number: u8) -> Result<u64, StoreError>;
    /// Referral counts are computed at read time rather than kept as a
    /// stored counter, avoiding a hot-counter race on concurrent links.
    async fn count_referred_by(&self, code: &str) -> Result<u64, StoreError>;
    async fn set_referred_by(&self, email: &str, code: &str) -> Result<(), StoreError>;
    async fn set_entry_wallet(&self, email: &str, wallet: &str) -> Result<(), StoreError>;
    /// Shallow-merge `patch` (an object) into the entry's metadata bag.
    async fn merge_entry_metadata(
        &self,
        email: &str,
        patch: serde_json::Value,
    ) -> Result<(), StoreError>;
    /// Verified entries ordered by ascending signup position.
    async fn verified_entries_by_position(
        &self,
        limit: Option<u32>,
    ) -> Result<Vec<WaitlistRow>, StoreError>;

    async fn insert_allocation(&self, row: AllocationRow) -> Result<(), StoreError>;
    async fn allocation_by_email(&self, email: &str)
        -> Result<Option<AllocationRow>, StoreError>;
    async fn set_allocation_wallet(&self, email: &str, wallet: &str) -> Result<(), StoreError>;
    /// Allocations in signup order (creation order), up to `limit`.
    async fn list_allocations(&self, limit: u32) -> Result<Vec<AllocationRow>, StoreError>;

    async fn insert_queue_item(&self, row: QueueRow) -> Result<(), StoreError>;
    async fn queue_item(&self, id: Uuid) -> Result<Option<QueueRow>, StoreError>;
    async fn update_queue_item(&self, row: QueueRow) -> Result<(), StoreError>;
}

/// In-memory `Store` used by tests. The single mutex serializes every
/// check-then-insert, so the soft-capacity race of the REST datastore does
/// not exist here.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, WaitlistRow>,
    allocations: HashMap<String, AllocationRow>,
    queue: HashMap<Uuid, QueueRow>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn merge_objects(target: &mut serde_json::Value, patch: serde_json::Value) {
    if !target.is_object() {
        *target = serde_json::json!({});
    }
    if let (Some(map), Some(patch_map)) = (target.as_object_mut(), patch.as_object()) {
        for (k, v) in patch_map {
            map.insert(k.clone(), v.clone());
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_entry(&self, row: WaitlistRow) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.entries.contains_key(&row.email) {
            return Err(StoreError::Conflict(format!(
                "waitlist entry already exists for {}",
                row.email
            )));
        }
        if inner
            .entries
            .values()
            .any(|e| e.referral_code == row.referral_code)
        {
            return Err(StoreError::Conflict(format!(
                "referral code {} already taken",
                row.referral_code
            )));
        }
        inner.entries.insert(row.email.clone(), row);
        Ok(())
    }

    async fn entry_by_email(&self, email: &str) -> Result<Option<WaitlistRow>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.entries.get(email).cloned())
    }

    async fn entry_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<WaitlistRow>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .values()
            .find(|e| e.referral_code == code)
            .cloned())
    }

    async fn count_entries(&self) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.entries.len() as u64)
    }

    async fn count_tier_entries(&self, tier_number: u8) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .values()
            .filter(|e| e.tier_number == tier_number)
            .count() as u64)
    }

    async fn count_referred_by(&self, code: &str) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .values()
            .filter(|e| e.referred_by.as_deref() == Some(code))
            .count() as u64)
    }

    async fn set_referred_by(&self, email: &str, code: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.entries.get_mut(email) {
            Some(entry) => {
                entry.referred_by = Some(code.to_string());
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("no entry for {}", email))),
        }
    }

    async fn set_entry_wallet(&self, email: &str, wallet: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.entries.get_mut(email) {
            Some(entry) => {
                entry.wallet_address = Some(wallet.to_string());
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("no entry for {}", email))),
        }
    }

    async fn merge_entry_metadata(
        &self,
        email: &str,
        patch: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.entries.get_mut(email) {
            Some(entry) => {
                merge_objects(&mut entry.metadata, patch);
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("no entry for {}", email))),
        }
    }

    async fn verified_entries_by_position(
        &self,
        limit: Option<u32>,
    ) -> Result<Vec<WaitlistRow>, StoreError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<WaitlistRow> = inner
            .entries
            .values()
            .filter(|e| e.verified)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.signup_position);
        if let Some(limit) = limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    async fn insert_allocation(&self, row: AllocationRow) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.allocations.contains_key(&row.email) {
            return Err(StoreError::Conflict(format!(
                "allocation already exists for {}",
                row.email
            )));
        }
        inner.allocations.insert(row.email.clone(), row);
        Ok(())
    }

    async fn allocation_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AllocationRow>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.allocations.get(email).cloned())
    }

    async fn set_allocation_wallet(&self, email: &str, wallet: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.allocations.get_mut(email) {
            Some(alloc) => {
                alloc.wallet_address = Some(wallet.to_string());
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("no allocation for {}", email))),
        }
    }

    async fn list_allocations(&self, limit: u32) -> Result<Vec<AllocationRow>, StoreError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<AllocationRow> = inner.allocations.values().cloned().collect();
        rows.sort_by_key(|a| a.created_at);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn insert_queue_item(&self, row: QueueRow) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.queue.contains_key(&row.id) {
            return Err(StoreError::Conflict(format!(
                "queue item {} already exists",
                row.id
            )));
        }
        inner.queue.insert(row.id, row);
        Ok(())
    }

    async fn queue_item(&self, id: Uuid) -> Result<Option<QueueRow>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.queue.get(&id).cloned())
    }

    async fn update_queue_item(&self, row: QueueRow) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.queue.get_mut(&row.id) {
            Some(existing) => {
                *existing = row;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("no queue item {}", row.id))),
        }
    }
}
