//! Waitlist allocation and referral linking.
//!
//! Signup is idempotent on email: claiming twice returns the original
//! referral code. Capacity is checked before insert; email and referral-code
//! uniqueness are enforced by the persistence layer, so a losing race
//! surfaces as a conflict rather than a duplicate row.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use waitlist_api::{LeaderboardEntry, Platform, TierAvailability};

use crate::allocation::projected_airdrop;
use crate::config::Config;
use crate::error::ApiError;
use crate::referral_code;
use crate::store::{AllocationRow, Store, StoreError, WaitlistRow};
use crate::tiers;

const DEFAULT_LEADERBOARD_LIMIT: u32 = 50;

#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    pub referral_code: String,
    pub referral_link: String,
    pub position: u64,
    pub spots_left: i64,
    /// False on an idempotent retry that returned the existing entry.
    pub newly_created: bool,
}

/// Outcome of a retroactive referral link. Each variant renders differently
/// for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked { referrer_code: String },
    AlreadyLinked,
    InvalidCode,
}

pub struct WaitlistService {
    store: Arc<dyn Store>,
    config: Arc<Config>,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl WaitlistService {
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        WaitlistService { store, config }
    }

    /// Claim a tier slot for `email`. Identity proof must already have
    /// succeeded; this service trusts the authenticated user id it receives.
    pub async fn claim_tier(
        &self,
        email: &str,
        tier_number: u8,
        tier_name: &str,
        thirdweb_user_id: &str,
        referred_by: Option<&str>,
        platform: Platform,
    ) -> Result<ClaimOutcome, ApiError> {
        if thirdweb_user_id.trim().is_empty() {
            return Err(ApiError::Authorization(
                "identity verification required before signup".to_string(),
            ));
        }
        let email = normalize_email(email);
        if email.is_empty() || !email.contains('@') {
            return Err(ApiError::Validation("a valid email is required".to_string()));
        }
        let tier = tiers::tier(tier_number)
            .ok_or_else(|| ApiError::Validation(format!("unknown tier {}", tier_number)))?;

        // Idempotent on retry: an existing entry gets its original code back.
        if let Some(existing) = self.store.entry_by_email(&email).await? {
            log::info!("signup retry for {}, returning existing code", email);
            let claimed = self.store.count_tier_entries(existing.tier_number).await?;
            let spots_left = tiers::tier(existing.tier_number)
                .map(|t| t.max_spots as i64 - claimed as i64)
                .unwrap_or(0);
            return Ok(ClaimOutcome {
                referral_link: self.config.referral_link(&existing.referral_code),
                referral_code: existing.referral_code,
                position: existing.signup_position,
                spots_left,
                newly_created: false,
            });
        }

        let position = self.store.count_entries().await? + 1;
        let claimed = self.store.count_tier_entries(tier_number).await?;
        let spots_left = tier.max_spots as i64 - claimed as i64;
        if spots_left <= 0 {
            return Err(ApiError::Capacity { tier: tier_number });
        }

        let code = referral_code::generate();

        // A bad inviter code must never block signup: validate, else drop.
        let referred_by = match referred_by {
            Some(raw) => {
                let candidate = referral_code::normalize(raw);
                if candidate == code {
                    log::warn!("dropping self-referral attempt for {}", email);
                    None
                } else {
                    match self.store.entry_by_referral_code(&candidate).await? {
                        Some(_) => Some(candidate),
                        None => {
                            log::warn!(
                                "dropping unknown referral code {} for {}",
                                candidate,
                                email
                            );
                            None
                        }
                    }
                }
            }
            None => None,
        };

        let now = Utc::now();
        let row = WaitlistRow {
            email: email.clone(),
            tier_number,
            tier_name: tier.name.to_string(),
            signup_position: position,
            referral_code: code.clone(),
            referred_by,
            verified: true,
            platform,
            wallet_address: None,
            thirdweb_user_id: Some(thirdweb_user_id.trim().to_string()),
            metadata: serde_json::json!({}),
            created_at: now,
        };
        if tier_name != tier.name {
            log::warn!(
                "signup for {} sent tier name {:?}, storing canonical {:?}",
                email,
                tier_name,
                tier.name
            );
        }

        match self.store.insert_entry(row).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                // Either a signup race on the email or a code collision.
                return if self.store.entry_by_email(&email).await?.is_some() {
                    Err(ApiError::Conflict("already registered".to_string()))
                } else {
                    Err(ApiError::Conflict(
                        "referral code collision, please retry".to_string(),
                    ))
                };
            }
            Err(e) => return Err(e.into()),
        }

        // Best-effort bookkeeping: signup success must not depend on the
        // leaderboard copy landing.
        let multiplier = tiers::early_bird_multiplier(self.config.launch_timestamp, now);
        let allocation = AllocationRow {
            email: email.clone(),
            referral_code: code.clone(),
            tier_name: tier.name.to_string(),
            tier_number,
            base_amount: tier.base_amount,
            referral_amount: 0,
            action_amount: 0,
            bonus_multiplier: multiplier,
            wallet_address: None,
            created_at: now,
        };
        if let Err(e) = self.store.insert_allocation(allocation).await {
            log::error!("allocation insert failed for {}: {}", email, e);
        }

        log::info!(
            "claimed tier {} for {} at position {} (code {})",
            tier_number,
            email,
            position,
            code
        );
        Ok(ClaimOutcome {
            referral_link: self.config.referral_link(&code),
            referral_code: code,
            position,
            spots_left: spots_left - 1,
            newly_created: true,
        })
    }

    /// Retroactively link `email` to a referrer code. First writer wins;
    /// re-linking and self-referral are refused.
    pub async fn link_referral(
        &self,
        email: &str,
        referral_code_raw: &str,
    ) -> Result<LinkOutcome, ApiError> {
        let email = normalize_email(email);
        let code = referral_code::normalize(referral_code_raw);

        let entry = self
            .store
            .entry_by_email(&email)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("no waitlist entry for {}", email)))?;

        if entry.referred_by.is_some() {
            return Ok(LinkOutcome::AlreadyLinked);
        }
        if code == entry.referral_code {
            log::warn!("self-referral attempt by {}", email);
            return Ok(LinkOutcome::InvalidCode);
        }
        let referrer = match self.store.entry_by_referral_code(&code).await? {
            Some(r) if r.email != entry.email => r,
            _ => return Ok(LinkOutcome::InvalidCode),
        };

        self.store.set_referred_by(&email, &code).await?;
        log::info!("linked {} to referrer {}", email, referrer.referral_code);
        Ok(LinkOutcome::Linked {
            referrer_code: referrer.referral_code,
        })
    }

    pub async fn total_count(&self) -> Result<u64, ApiError> {
        Ok(self.store.count_entries().await?)
    }

    pub async fn tier_availability(&self) -> Result<BTreeMap<u8, TierAvailability>, ApiError> {
        let mut availability = BTreeMap::new();
        for tier in tiers::TIERS.iter() {
            let claimed = self.store.count_tier_entries(tier.number).await?;
            availability.insert(
                tier.number,
                TierAvailability {
                    max_spots: tier.max_spots,
                    claimed,
                    available: (tier.max_spots as i64 - claimed as i64).max(0),
                },
            );
        }
        Ok(availability)
    }

    /// Leaderboard read model. Referral counts are computed per row at read
    /// time; acceptable at waitlist scale.
    pub async fn leaderboard(&self, limit: Option<u32>) -> Result<Vec<LeaderboardEntry>, ApiError> {
        let limit = limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT).min(500);
        let allocations = self.store.list_allocations(limit).await?;
        let mut entries = Vec::with_capacity(allocations.len());
        for alloc in allocations {
            let referral_count = self.store.count_referred_by(&alloc.referral_code).await?;
            entries.push(LeaderboardEntry {
                referral_code: alloc.referral_code,
                tier_name: alloc.tier_name,
                tier_number: alloc.tier_number,
                referral_count,
                projected_airdrop: projected_airdrop(
                    alloc.base_amount,
                    alloc.referral_amount,
                    alloc.action_amount,
                    alloc.bonus_multiplier,
                ),
                wallet_linked: alloc.wallet_address.is_some(),
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> WaitlistService {
        let config = Config {
            site_url: "https://bearish.money".to_string(),
            admin_api_key: None,
            launch_timestamp: Utc::now(),
            telegram: None,
            testflight: None,
            transfer: None,
            auth: None,
        };
        WaitlistService::new(Arc::new(MemoryStore::new()), Arc::new(config))
    }

    #[tokio::test]
    async fn test_first_signup_takes_position_one() {
        let svc = service();
        let outcome = svc
            .claim_tier("a@x.com", 1, "OG Founder", "u1", None, Platform::Ios)
            .await
            .unwrap();

        assert_eq!(outcome.position, 1);
        assert_eq!(outcome.spots_left, 9);
        assert!(referral_code::is_well_formed(&outcome.referral_code));
        assert_eq!(
            outcome.referral_link,
            format!("https://bearish.money/?ref={}", outcome.referral_code)
        );
    }

    #[tokio::test]
    async fn test_signup_is_idempotent_on_email() {
        let svc = service();
        let first = svc
            .claim_tier("a@x.com", 1, "OG Founder", "u1", None, Platform::Ios)
            .await
            .unwrap();
        let second = svc
            .claim_tier("A@X.COM ", 1, "OG Founder", "u1", None, Platform::Ios)
            .await
            .unwrap();

        assert_eq!(first.referral_code, second.referral_code);
        assert_eq!(second.position, 1);
        assert!(first.newly_created);
        assert!(!second.newly_created);
        assert_eq!(svc.total_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_signup_requires_identity_proof() {
        let svc = service();
        let err = svc
            .claim_tier("a@x.com", 1, "OG Founder", "  ", None, Platform::Ios)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authorization(_)));
        assert_eq!(svc.total_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tier_capacity_enforced() {
        let svc = service();
        for i in 0..10 {
            svc.claim_tier(
                &format!("u{}@x.com", i),
                1,
                "OG Founder",
                "u1",
                None,
                Platform::Desktop,
            )
            .await
            .unwrap();
        }
        let err = svc
            .claim_tier("late@x.com", 1, "OG Founder", "u1", None, Platform::Desktop)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Capacity { tier: 1 }));

        // Other tiers still open.
        svc.claim_tier("late@x.com", 2, "Early Adopter", "u1", None, Platform::Desktop)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_referred_signup_links_and_counts() {
        let svc = service();
        let a = svc
            .claim_tier("a@x.com", 1, "OG Founder", "u1", None, Platform::Ios)
            .await
            .unwrap();
        let _b = svc
            .claim_tier(
                "b@x.com",
                1,
                "OG Founder",
                "u2",
                Some(&a.referral_code.to_lowercase()),
                Platform::Ios,
            )
            .await
            .unwrap();

        let b_entry = svc.store.entry_by_email("b@x.com").await.unwrap().unwrap();
        assert_eq!(b_entry.referred_by.as_deref(), Some(a.referral_code.as_str()));
        assert_eq!(
            svc.store.count_referred_by(&a.referral_code).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_referral_code_dropped_silently() {
        let svc = service();
        let outcome = svc
            .claim_tier(
                "a@x.com",
                1,
                "OG Founder",
                "u1",
                Some("BEARZZ99"),
                Platform::Ios,
            )
            .await
            .unwrap();
        assert_eq!(outcome.position, 1);

        let entry = svc.store.entry_by_email("a@x.com").await.unwrap().unwrap();
        assert!(entry.referred_by.is_none());
    }

    #[tokio::test]
    async fn test_allocation_row_written_at_signup() {
        let svc = service();
        svc.claim_tier("a@x.com", 1, "OG Founder", "u1", None, Platform::Ios)
            .await
            .unwrap();

        let alloc = svc
            .store
            .allocation_by_email("a@x.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alloc.base_amount, 50_000);
        assert_eq!(alloc.referral_amount, 0);
        assert_eq!(alloc.action_amount, 0);
        // Launch week signup earns the full early-bird bonus.
        assert_eq!(alloc.bonus_multiplier, 1.5);
        assert_eq!(
            projected_airdrop(
                alloc.base_amount,
                alloc.referral_amount,
                alloc.action_amount,
                alloc.bonus_multiplier
            ),
            75_000
        );
    }

    #[tokio::test]
    async fn test_link_referral_first_writer_wins() {
        let svc = service();
        let a = svc
            .claim_tier("a@x.com", 1, "OG Founder", "u1", None, Platform::Ios)
            .await
            .unwrap();
        let b = svc
            .claim_tier("b@x.com", 1, "OG Founder", "u2", None, Platform::Ios)
            .await
            .unwrap();
        svc.claim_tier("c@x.com", 1, "OG Founder", "u3", None, Platform::Ios)
            .await
            .unwrap();

        let linked = svc.link_referral("c@x.com", &a.referral_code).await.unwrap();
        assert_eq!(
            linked,
            LinkOutcome::Linked {
                referrer_code: a.referral_code.clone()
            }
        );

        // Second link attempt is refused even with a different valid code.
        let again = svc.link_referral("c@x.com", &b.referral_code).await.unwrap();
        assert_eq!(again, LinkOutcome::AlreadyLinked);

        let entry = svc.store.entry_by_email("c@x.com").await.unwrap().unwrap();
        assert_eq!(entry.referred_by.as_deref(), Some(a.referral_code.as_str()));
    }

    #[tokio::test]
    async fn test_link_referral_rejects_self_and_unknown() {
        let svc = service();
        let a = svc
            .claim_tier("a@x.com", 1, "OG Founder", "u1", None, Platform::Ios)
            .await
            .unwrap();

        let own = svc.link_referral("a@x.com", &a.referral_code).await.unwrap();
        assert_eq!(own, LinkOutcome::InvalidCode);

        let unknown = svc.link_referral("a@x.com", "BEARZZ99").await.unwrap();
        assert_eq!(unknown, LinkOutcome::InvalidCode);

        let missing = svc.link_referral("nobody@x.com", &a.referral_code).await;
        assert!(matches!(missing, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_tier_availability() {
        let svc = service();
        svc.claim_tier("a@x.com", 1, "OG Founder", "u1", None, Platform::Ios)
            .await
            .unwrap();

        let availability = svc.tier_availability().await.unwrap();
        assert_eq!(availability[&1].max_spots, 10);
        assert_eq!(availability[&1].claimed, 1);
        assert_eq!(availability[&1].available, 9);
        assert_eq!(availability[&2].claimed, 0);
        assert_eq!(availability[&3].available, 1_000);
    }

    #[tokio::test]
    async fn test_leaderboard_projected_amounts() {
        let svc = service();
        let a = svc
            .claim_tier("a@x.com", 1, "OG Founder", "u1", None, Platform::Ios)
            .await
            .unwrap();
        svc.claim_tier(
            "b@x.com",
            2,
            "Early Adopter",
            "u2",
            Some(&a.referral_code),
            Platform::Ios,
        )
        .await
        .unwrap();

        let entries = svc.leaderboard(None).await.unwrap();
        assert_eq!(entries.len(), 2);
        let top = entries
            .iter()
            .find(|e| e.referral_code == a.referral_code)
            .unwrap();
        assert_eq!(top.referral_count, 1);
        assert_eq!(top.projected_airdrop, 75_000);
        assert!(!top.wallet_linked);
    }
}
