//! Beta-distribution integration: a JWT-authenticated provider client and
//! the invitation service built on it.
//!
//! Only iOS users are ever invited; the distribution channel in scope is a
//! single-platform beta program. Repeated invites for the same person are
//! safe: a provider conflict is success with `already_invited`.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use waitlist_api::{InviteOutcome, InviteOutcomeStatus, InviteSummary, Platform};

use crate::config::TestflightConfig;
use crate::error::ApiError;
use crate::store::{Store, WaitlistRow};
use crate::waitlist::normalize_email;

const ASC_API_BASE: &str = "https://api.appstoreconnect.apple.com";
const TOKEN_TTL_SECS: i64 = 20 * 60;

/// Mandatory gap between successive invite calls in batch mode. Bursts
/// trigger provider throttling.
pub const BATCH_INVITE_DELAY: Duration = Duration::from_millis(200);

/// Result of one invite attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteResult {
    Invited { tester_id: String },
    AlreadyInvited,
    Skipped { reason: String },
    /// Dry-run only: passed every eligibility gate, no call made.
    Candidate,
}

/// Provider seam. The invitation service only needs group resolution and
/// tester creation.
#[async_trait]
pub trait BetaDistribution: Send + Sync {
    async fn default_group(&self) -> Result<String, ApiError>;
    async fn create_tester(&self, email: &str, group_id: &str)
        -> Result<CreateTesterOutcome, ApiError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateTesterOutcome {
    Created { tester_id: String },
    AlreadyInvited,
}

#[derive(Serialize)]
struct AscClaims {
    iss: String,
    iat: i64,
    exp: i64,
    aud: &'static str,
}

#[derive(Deserialize)]
struct BetaGroupsResponse {
    data: Vec<BetaGroup>,
}

#[derive(Deserialize)]
struct BetaGroup {
    id: String,
    attributes: BetaGroupAttributes,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BetaGroupAttributes {
    #[allow(dead_code)]
    name: Option<String>,
    is_internal_group: Option<bool>,
}

#[derive(Deserialize)]
struct CreateTesterResponse {
    data: CreatedTester,
}

#[derive(Deserialize)]
struct CreatedTester {
    id: String,
}

/// App Store Connect client. Every request carries a short-lived ES256
/// bearer token signed with the team's API key.
pub struct TestflightClient {
    client: Client,
    config: TestflightConfig,
}

impl TestflightClient {
    pub fn new(client: Client, config: TestflightConfig) -> Self {
        TestflightClient { client, config }
    }

    fn bearer_token(&self) -> Result<String, ApiError> {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.config.key_id.clone());
        let key = EncodingKey::from_ec_pem(self.config.private_key_pem.as_bytes())
            .map_err(|e| ApiError::Configuration(format!("testflight key ({})", e)))?;
        let now = Utc::now().timestamp();
        let claims = AscClaims {
            iss: self.config.issuer_id.clone(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
            aud: "appstoreconnect-v1",
        };
        encode(&header, &claims, &key)
            .map_err(|e| ApiError::Upstream(format!("testflight token signing failed: {}", e)))
    }
}

#[async_trait]
impl BetaDistribution for TestflightClient {
    /// Resolve the group new testers join. External groups are preferred
    /// over internal ones; with no external group the first returned group
    /// is used. Group choice affects who can see the build, so this
    /// ordering is load-bearing.
    async fn default_group(&self) -> Result<String, ApiError> {
        let token = self.bearer_token()?;
        let response = self
            .client
            .get(format!("{}/v1/betaGroups", ASC_API_BASE))
            .bearer_auth(&token)
            .query(&[("filter[app]", self.config.app_id.as_str())])
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("beta group lookup failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "beta group lookup returned {}: {}",
                status, body
            )));
        }
        let groups: BetaGroupsResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Upstream(format!("beta group parse failed: {}", e)))?;

        groups
            .data
            .iter()
            .find(|g| g.attributes.is_internal_group != Some(true))
            .or_else(|| groups.data.first())
            .map(|g| g.id.clone())
            .ok_or_else(|| ApiError::Upstream("no beta groups configured for app".to_string()))
    }

    async fn create_tester(
        &self,
        email: &str,
        group_id: &str,
    ) -> Result<CreateTesterOutcome, ApiError> {
        let token = self.bearer_token()?;
        let body = serde_json::json!({
            "data": {
                "type": "betaTesters",
                "attributes": { "email": email },
                "relationships": {
                    "betaGroups": { "data": [{ "type": "betaGroups", "id": group_id }] }
                }
            }
        });
        let response = self
            .client
            .post(format!("{}/v1/betaTesters", ASC_API_BASE))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("tester create failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Ok(CreateTesterOutcome::AlreadyInvited);
        }
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            // The provider reports an existing tester/group membership as a
            // validation error rather than a conflict.
            let text = response.text().await.unwrap_or_default();
            if text.to_lowercase().contains("already") {
                return Ok(CreateTesterOutcome::AlreadyInvited);
            }
            return Err(ApiError::Upstream(format!(
                "tester create returned {}: {}",
                status, text
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "tester create returned {}: {}",
                status, body
            )));
        }
        let created: CreateTesterResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Upstream(format!("tester create parse failed: {}", e)))?;
        Ok(CreateTesterOutcome::Created {
            tester_id: created.data.id,
        })
    }
}

pub struct InviteService {
    store: Arc<dyn Store>,
    beta: Option<Arc<dyn BetaDistribution>>,
}

impl InviteService {
    pub fn new(store: Arc<dyn Store>, beta: Option<Arc<dyn BetaDistribution>>) -> Self {
        InviteService { store, beta }
    }

    pub fn is_configured(&self) -> bool {
        self.beta.is_some()
    }

    /// One invite attempt for `email`, gates checked in order and
    /// short-circuiting: configured, exists, verified, platform.
    pub async fn invite(&self, email: &str, dry_run: bool) -> Result<InviteResult, ApiError> {
        let beta = match &self.beta {
            Some(beta) => beta,
            None => {
                return Ok(InviteResult::Skipped {
                    reason: "not configured".to_string(),
                })
            }
        };

        let email = normalize_email(email);
        let entry = self
            .store
            .entry_by_email(&email)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("no waitlist entry for {}", email)))?;
        if !entry.verified {
            return Err(ApiError::Forbidden(format!("{} is not verified", email)));
        }
        if entry.platform != Platform::Ios {
            return Ok(InviteResult::Skipped {
                reason: format!("platform {:?} is not eligible", entry.platform),
            });
        }

        if dry_run {
            return Ok(InviteResult::Candidate);
        }

        let group_id = beta.default_group().await?;
        match beta.create_tester(&email, &group_id).await? {
            CreateTesterOutcome::Created { tester_id } => {
                log::info!("invited {} as tester {}", email, tester_id);
                Ok(InviteResult::Invited { tester_id })
            }
            CreateTesterOutcome::AlreadyInvited => {
                log::info!("{} was already invited", email);
                Ok(InviteResult::AlreadyInvited)
            }
        }
    }

    /// Write the outcome of an attempt into the entry's metadata so later
    /// runs can tell "never attempted" from "attempted and failed" from
    /// "attempted and succeeded". Best-effort: failures are logged, never
    /// escalated.
    pub async fn record_outcome(
        &self,
        email: &str,
        result: &Result<InviteResult, ApiError>,
        extra: &[(&str, serde_json::Value)],
    ) {
        let mut patch = serde_json::Map::new();
        match result {
            Ok(InviteResult::Invited { .. }) => {
                patch.insert("testflight_invited".to_string(), true.into());
                patch.insert(
                    "testflight_invited_at".to_string(),
                    Utc::now().to_rfc3339().into(),
                );
            }
            Ok(InviteResult::AlreadyInvited) => {
                patch.insert("testflight_invited".to_string(), true.into());
                patch.insert("testflight_already_invited".to_string(), true.into());
                patch.insert(
                    "testflight_invited_at".to_string(),
                    Utc::now().to_rfc3339().into(),
                );
            }
            Ok(InviteResult::Skipped { .. }) | Ok(InviteResult::Candidate) => return,
            Err(e) => {
                patch.insert("testflight_error".to_string(), e.to_string().into());
            }
        }
        for (key, value) in extra {
            patch.insert(key.to_string(), value.clone());
        }
        let email = normalize_email(email);
        if let Err(e) = self
            .store
            .merge_entry_metadata(&email, serde_json::Value::Object(patch))
            .await
        {
            log::error!("invite metadata write failed for {}: {}", email, e);
        }
    }

    /// Post-signup mode: detached continuation so the signup response never
    /// waits on the provider. The task records its own outcome.
    pub fn spawn_post_signup_invite(self: &Arc<Self>, email: String) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let result = service.invite(&email, false).await;
            if let Err(e) = &result {
                log::error!("post-signup invite failed for {}: {}", email, e);
            }
            service.record_outcome(&email, &result, &[]).await;
        });
    }

    fn metadata_flag(entry: &WaitlistRow, key: &str) -> bool {
        entry.metadata.get(key) == Some(&serde_json::Value::Bool(true))
    }

    /// Retry mode: re-scan iOS-eligible entries whose metadata does not show
    /// a successful invite, optionally narrowed to one email.
    pub async fn retry(
        &self,
        dry_run: bool,
        email_filter: Option<&str>,
    ) -> Result<(InviteSummary, Vec<InviteOutcome>), ApiError> {
        if !dry_run && !self.is_configured() {
            return Err(ApiError::Configuration("testflight".to_string()));
        }
        let email_filter = email_filter.map(normalize_email);
        let candidates: Vec<WaitlistRow> = self
            .store
            .verified_entries_by_position(None)
            .await?
            .into_iter()
            .filter(|e| e.platform == Platform::Ios)
            .filter(|e| !Self::metadata_flag(e, "testflight_invited"))
            .filter(|e| email_filter.as_deref().map_or(true, |f| e.email == f))
            .collect();

        self.run_over(
            candidates,
            dry_run,
            &[("testflight_retry", serde_json::Value::Bool(true))],
            false,
        )
        .await
    }

    /// Batch backfill: verified entries in ascending signup position,
    /// excluding those already batch-marked, up to `limit`, with the
    /// mandatory pacing delay between provider calls.
    pub async fn batch(
        &self,
        dry_run: bool,
        limit: Option<u32>,
    ) -> Result<(InviteSummary, Vec<InviteOutcome>), ApiError> {
        if !dry_run && !self.is_configured() {
            return Err(ApiError::Configuration("testflight".to_string()));
        }
        let mut candidates: Vec<WaitlistRow> = self
            .store
            .verified_entries_by_position(None)
            .await?
            .into_iter()
            .filter(|e| e.platform == Platform::Ios)
            .filter(|e| !Self::metadata_flag(e, "testflight_batch_invited"))
            .collect();
        if let Some(limit) = limit {
            candidates.truncate(limit as usize);
        }

        self.run_over(
            candidates,
            dry_run,
            &[("testflight_batch_invited", serde_json::Value::Bool(true))],
            true,
        )
        .await
    }

    async fn run_over(
        &self,
        candidates: Vec<WaitlistRow>,
        dry_run: bool,
        success_flags: &[(&str, serde_json::Value)],
        paced: bool,
    ) -> Result<(InviteSummary, Vec<InviteOutcome>), ApiError> {
        let mut summary = InviteSummary {
            total: candidates.len() as u64,
            ..Default::default()
        };
        let mut results = Vec::with_capacity(candidates.len());

        if dry_run {
            for entry in candidates {
                results.push(InviteOutcome {
                    email: entry.email,
                    status: InviteOutcomeStatus::Candidate,
                    error: None,
                });
            }
            return Ok((summary, results));
        }

        for (i, entry) in candidates.into_iter().enumerate() {
            if paced && i > 0 {
                sleep(BATCH_INVITE_DELAY).await;
            }
            let result = self.invite(&entry.email, false).await;
            let (status, error) = match &result {
                Ok(InviteResult::Invited { .. }) => {
                    summary.new_invites += 1;
                    (InviteOutcomeStatus::Invited, None)
                }
                Ok(InviteResult::AlreadyInvited) => {
                    summary.already_invited += 1;
                    (InviteOutcomeStatus::AlreadyInvited, None)
                }
                Ok(InviteResult::Skipped { reason }) => {
                    (InviteOutcomeStatus::Skipped, Some(reason.clone()))
                }
                Ok(InviteResult::Candidate) => (InviteOutcomeStatus::Skipped, None),
                Err(e) => {
                    summary.failed += 1;
                    (InviteOutcomeStatus::Failed, Some(e.to_string()))
                }
            };
            // Per-attempt failures go into the report, not up the stack, so
            // one bad email never fails the whole run. A failure also skips
            // the success markers, leaving the entry eligible next run.
            let no_flags: &[(&str, serde_json::Value)] = &[];
            let record_extra = if matches!(status, InviteOutcomeStatus::Failed) {
                no_flags
            } else {
                success_flags
            };
            self.record_outcome(&entry.email, &result, record_extra).await;
            results.push(InviteOutcome {
                email: entry.email,
                status,
                error,
            });
        }
        Ok((summary, results))
    }
}
