//! Wallet linking. Addresses are stored as untrusted strings; only their
//! shape is validated, no signature verification.

use std::sync::Arc;

use crate::error::ApiError;
use crate::referral_code;
use crate::store::{Store, WaitlistRow};
use crate::waitlist::normalize_email;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const ADDRESS_MIN_LEN: usize = 32;
const ADDRESS_MAX_LEN: usize = 44;

pub fn is_valid_address(address: &str) -> bool {
    (ADDRESS_MIN_LEN..=ADDRESS_MAX_LEN).contains(&address.len())
        && address.chars().all(|c| BASE58_ALPHABET.contains(c))
}

/// How the caller identifies the entry to link.
pub enum IdentitySelector {
    Email(String),
    ReferralCode(String),
}

pub struct WalletService {
    store: Arc<dyn Store>,
}

impl WalletService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        WalletService { store }
    }

    async fn resolve(&self, selector: IdentitySelector) -> Result<WaitlistRow, ApiError> {
        match selector {
            IdentitySelector::Email(email) => {
                let email = normalize_email(&email);
                self.store
                    .entry_by_email(&email)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("no waitlist entry for {}", email)))
            }
            IdentitySelector::ReferralCode(code) => {
                let code = referral_code::normalize(&code);
                self.store
                    .entry_by_referral_code(&code)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("unknown referral code {}", code)))
            }
        }
    }

    /// Validate and persist a wallet address for a verified identity.
    /// The denormalized allocation mirror is best-effort.
    pub async fn link_wallet(
        &self,
        selector: IdentitySelector,
        wallet_address: &str,
    ) -> Result<(), ApiError> {
        let wallet_address = wallet_address.trim();
        if !is_valid_address(wallet_address) {
            return Err(ApiError::Validation(
                "invalid wallet address: expected a base58 string of 32-44 characters".to_string(),
            ));
        }

        let entry = self.resolve(selector).await?;

        // Prevents wallet-address squatting on unverified emails.
        if !entry.verified || entry.thirdweb_user_id.is_none() {
            return Err(ApiError::Authorization(
                "identity verification required before wallet linking".to_string(),
            ));
        }

        if let Some(previous) = &entry.wallet_address {
            if previous != wallet_address {
                log::warn!(
                    "overwriting wallet for {}: {}... -> {}...",
                    entry.email,
                    &previous[..previous.len().min(8)],
                    &wallet_address[..wallet_address.len().min(8)]
                );
            }
        }

        self.store
            .set_entry_wallet(&entry.email, wallet_address)
            .await?;
        if let Err(e) = self
            .store
            .set_allocation_wallet(&entry.email, wallet_address)
            .await
        {
            log::error!("allocation wallet mirror failed for {}: {}", entry.email, e);
        }
        log::info!("linked wallet for {}", entry.email);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use waitlist_api::Platform;

    fn entry(email: &str, code: &str, verified: bool, user_id: Option<&str>) -> WaitlistRow {
        WaitlistRow {
            email: email.to_string(),
            tier_number: 1,
            tier_name: "OG Founder".to_string(),
            signup_position: 1,
            referral_code: code.to_string(),
            referred_by: None,
            verified,
            platform: Platform::Ios,
            wallet_address: None,
            thirdweb_user_id: user_id.map(String::from),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    fn valid_address() -> String {
        "A".repeat(44)
    }

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address(&valid_address()));
        assert!(is_valid_address(&"9".repeat(32)));
        assert!(!is_valid_address("not-base58!!"));
        assert!(!is_valid_address(&"A".repeat(31))); // too short
        assert!(!is_valid_address(&"A".repeat(45))); // too long
        assert!(!is_valid_address(&"O".repeat(40))); // O not in base58
        assert!(!is_valid_address(&"l".repeat(40))); // l not in base58
        assert!(!is_valid_address(&"0".repeat(40))); // 0 not in base58
    }

    #[tokio::test]
    async fn test_link_by_email_and_mirror() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_entry(entry("a@x.com", "BEARAB23", true, Some("u1")))
            .await
            .unwrap();
        store
            .insert_allocation(crate::store::AllocationRow {
                email: "a@x.com".to_string(),
                referral_code: "BEARAB23".to_string(),
                tier_name: "OG Founder".to_string(),
                tier_number: 1,
                base_amount: 50_000,
                referral_amount: 0,
                action_amount: 0,
                bonus_multiplier: 1.5,
                wallet_address: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let svc = WalletService::new(store.clone());
        svc.link_wallet(
            IdentitySelector::Email("A@x.com ".to_string()),
            &valid_address(),
        )
        .await
        .unwrap();

        let row = store.entry_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(row.wallet_address.as_deref(), Some(valid_address().as_str()));
        let alloc = store.allocation_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(alloc.wallet_address.as_deref(), Some(valid_address().as_str()));
    }

    #[tokio::test]
    async fn test_link_by_referral_code() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_entry(entry("a@x.com", "BEARAB23", true, Some("u1")))
            .await
            .unwrap();

        let svc = WalletService::new(store.clone());
        svc.link_wallet(
            IdentitySelector::ReferralCode("bearab23".to_string()),
            &valid_address(),
        )
        .await
        .unwrap();

        let row = store.entry_by_email("a@x.com").await.unwrap().unwrap();
        assert!(row.wallet_address.is_some());
    }

    #[tokio::test]
    async fn test_requires_prior_auth_and_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_entry(entry("a@x.com", "BEARAB23", true, None))
            .await
            .unwrap();

        let svc = WalletService::new(store.clone());
        let err = svc
            .link_wallet(
                IdentitySelector::Email("a@x.com".to_string()),
                &valid_address(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authorization(_)));

        let row = store.entry_by_email("a@x.com").await.unwrap().unwrap();
        assert!(row.wallet_address.is_none());
    }

    #[tokio::test]
    async fn test_invalid_address_rejected_before_lookup() {
        let store = Arc::new(MemoryStore::new());
        let svc = WalletService::new(store);
        let err = svc
            .link_wallet(
                IdentitySelector::Email("a@x.com".to_string()),
                "not-base58!!",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unknown_code_not_found() {
        let store = Arc::new(MemoryStore::new());
        let svc = WalletService::new(store);
        let err = svc
            .link_wallet(
                IdentitySelector::ReferralCode("BEARZZ99".to_string()),
                &valid_address(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_relink_overwrites() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_entry(entry("a@x.com", "BEARAB23", true, Some("u1")))
            .await
            .unwrap();

        let svc = WalletService::new(store.clone());
        svc.link_wallet(
            IdentitySelector::Email("a@x.com".to_string()),
            &"B".repeat(40),
        )
        .await
        .unwrap();
        svc.link_wallet(
            IdentitySelector::Email("a@x.com".to_string()),
            &"C".repeat(40),
        )
        .await
        .unwrap();

        let row = store.entry_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(row.wallet_address.as_deref(), Some("C".repeat(40).as_str()));
    }
}
