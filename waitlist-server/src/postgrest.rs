//! `Store` implementation speaking the database-as-a-service REST dialect.
//!
//! Row filters are passed as `col=eq.value` query parameters; counts use the
//! `Prefer: count=exact` header and come back in `Content-Range`; ordering
//! and limits map to the `order` / `limit` parameters.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::store::{AllocationRow, QueueRow, Store, StoreError, WaitlistRow};

const WAITLIST_TABLE: &str = "waitlist";
const ALLOCATIONS_TABLE: &str = "airdrop_allocations";
const QUEUE_TABLE: &str = "airdrop_queue";

pub struct PostgrestStore {
    client: Client,
    base_url: String,
    service_key: String,
}

impl PostgrestStore {
    pub fn new(client: Client, base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        PostgrestStore {
            client,
            base_url,
            service_key: service_key.into(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(key) = HeaderValue::from_str(&self.service_key) {
            headers.insert("apikey", key);
        }
        if let Ok(bearer) = HeaderValue::from_str(&format!("Bearer {}", self.service_key)) {
            headers.insert("Authorization", bearer);
        }
        headers
    }

    async fn select_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let response = self
            .client
            .get(self.table_url(table))
            .headers(self.auth_headers())
            .query(filters)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{} select failed: {}", table, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Unavailable(format!(
                "{} select returned {}: {}",
                table, status, body
            )));
        }
        response
            .json()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{} select parse failed: {}", table, e)))
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Option<T>, StoreError> {
        let mut filters: Vec<(&str, String)> = filters.to_vec();
        filters.push(("limit", "1".to_string()));
        let mut rows: Vec<T> = self.select_rows(table, &filters).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }

    async fn count_rows(&self, table: &str, filters: &[(&str, String)]) -> Result<u64, StoreError> {
        let mut filters: Vec<(&str, String)> = filters.to_vec();
        filters.push(("select", "email".to_string()));
        filters.push(("limit", "1".to_string()));

        let response = self
            .client
            .get(self.table_url(table))
            .headers(self.auth_headers())
            .header("Prefer", "count=exact")
            .query(&filters)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{} count failed: {}", table, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Unavailable(format!(
                "{} count returned {}: {}",
                table, status, body
            )));
        }

        // Content-Range looks like "0-0/42"; the total is after the slash.
        let total = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit('/').next())
            .and_then(|v| v.parse::<u64>().ok());
        total.ok_or_else(|| {
            StoreError::Unavailable(format!("{} count missing content-range total", table))
        })
    }

    async fn insert_row<T: Serialize>(&self, table: &str, row: &T) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.table_url(table))
            .headers(self.auth_headers())
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{} insert failed: {}", table, e)))?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Conflict(format!(
                "{} unique constraint violation: {}",
                table, body
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Unavailable(format!(
                "{} insert returned {}: {}",
                table, status, body
            )));
        }
        Ok(())
    }

    /// PATCH matching rows and fail with NotFound when nothing matched.
    async fn patch_rows(
        &self,
        table: &str,
        filters: &[(&str, String)],
        body: serde_json::Value,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .patch(self.table_url(table))
            .headers(self.auth_headers())
            .header("Prefer", "return=representation")
            .query(filters)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{} update failed: {}", table, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::Unavailable(format!(
                "{} update returned {}: {}",
                table, status, text
            )));
        }
        let updated: Vec<serde_json::Value> = response.json().await.map_err(|e| {
            StoreError::Unavailable(format!("{} update parse failed: {}", table, e))
        })?;
        if updated.is_empty() {
            return Err(StoreError::NotFound(format!(
                "{} update matched no rows",
                table
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for PostgrestStore {
    async fn insert_entry(&self, row: WaitlistRow) -> Result<(), StoreError> {
        self.insert_row(WAITLIST_TABLE, &row).await
    }

    async fn entry_by_email(&self, email: &str) -> Result<Option<WaitlistRow>, StoreError> {
        self.select_one(WAITLIST_TABLE, &[("email", format!("eq.{}", email))])
            .await
    }

    async fn entry_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<WaitlistRow>, StoreError> {
        self.select_one(WAITLIST_TABLE, &[("referral_code", format!("eq.{}", code))])
            .await
    }

    async fn count_entries(&self) -> Result<u64, StoreError> {
        self.count_rows(WAITLIST_TABLE, &[]).await
    }

    async fn count_tier_entries(&self, tier_number: u8) -> Result<u64, StoreError> {
        self.count_rows(
            WAITLIST_TABLE,
            &[("tier_number", format!("eq.{}", tier_number))],
        )
        .await
    }

    async fn count_referred_by(&self, code: &str) -> Result<u64, StoreError> {
        self.count_rows(WAITLIST_TABLE, &[("referred_by", format!("eq.{}", code))])
            .await
    }

    async fn set_referred_by(&self, email: &str, code: &str) -> Result<(), StoreError> {
        self.patch_rows(
            WAITLIST_TABLE,
            &[("email", format!("eq.{}", email))],
            serde_json::json!({ "referred_by": code }),
        )
        .await
    }

    async fn set_entry_wallet(&self, email: &str, wallet: &str) -> Result<(), StoreError> {
        self.patch_rows(
            WAITLIST_TABLE,
            &[("email", format!("eq.{}", email))],
            serde_json::json!({ "wallet_address": wallet }),
        )
        .await
    }

    async fn merge_entry_metadata(
        &self,
        email: &str,
        patch: serde_json::Value,
    ) -> Result<(), StoreError> {
        // The REST dialect has no server-side JSON merge; read-modify-write
        // is acceptable because metadata writes are bookkeeping, and the
        // invite paths that race here record compatible keys.
        let entry = self
            .entry_by_email(email)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("no entry for {}", email)))?;
        let mut metadata = entry.metadata;
        if !metadata.is_object() {
            metadata = serde_json::json!({});
        }
        if let (Some(map), Some(patch_map)) = (metadata.as_object_mut(), patch.as_object()) {
            for (k, v) in patch_map {
                map.insert(k.clone(), v.clone());
            }
        }
        self.patch_rows(
            WAITLIST_TABLE,
            &[("email", format!("eq.{}", email))],
            serde_json::json!({ "metadata": metadata }),
        )
        .await
    }

    async fn verified_entries_by_position(
        &self,
        limit: Option<u32>,
    ) -> Result<Vec<WaitlistRow>, StoreError> {
        let mut filters = vec![
            ("verified", "eq.true".to_string()),
            ("order", "signup_position.asc".to_string()),
        ];
        if let Some(limit) = limit {
            filters.push(("limit", limit.to_string()));
        }
        self.select_rows(WAITLIST_TABLE, &filters).await
    }

    async fn insert_allocation(&self, row: AllocationRow) -> Result<(), StoreError> {
        self.insert_row(ALLOCATIONS_TABLE, &row).await
    }

    async fn allocation_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AllocationRow>, StoreError> {
        self.select_one(ALLOCATIONS_TABLE, &[("email", format!("eq.{}", email))])
            .await
    }

    async fn set_allocation_wallet(&self, email: &str, wallet: &str) -> Result<(), StoreError> {
        self.patch_rows(
            ALLOCATIONS_TABLE,
            &[("email", format!("eq.{}", email))],
            serde_json::json!({ "wallet_address": wallet }),
        )
        .await
    }

    async fn list_allocations(&self, limit: u32) -> Result<Vec<AllocationRow>, StoreError> {
        self.select_rows(
            ALLOCATIONS_TABLE,
            &[
                ("order", "created_at.asc".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn insert_queue_item(&self, row: QueueRow) -> Result<(), StoreError> {
        self.insert_row(QUEUE_TABLE, &row).await
    }

    async fn queue_item(&self, id: Uuid) -> Result<Option<QueueRow>, StoreError> {
        self.select_one(QUEUE_TABLE, &[("id", format!("eq.{}", id))])
            .await
    }

    async fn update_queue_item(&self, row: QueueRow) -> Result<(), StoreError> {
        let id = row.id;
        let body = serde_json::to_value(&row)
            .map_err(|e| StoreError::Unavailable(format!("queue row serialize failed: {}", e)))?;
        self.patch_rows(QUEUE_TABLE, &[("id", format!("eq.{}", id))], body)
            .await
    }
}
