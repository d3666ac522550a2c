use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Device platform captured at signup, used for beta-invite targeting.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Desktop,
    Unknown,
}

impl Default for Platform {
    fn default() -> Self {
        Platform::Unknown
    }
}

/// Request payload for `/api/signup`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: String,
    pub tier_number: u8,
    pub tier_name: String,
    /// Authenticated session id from the identity provider. Required;
    /// signup is only reachable after the OTP step completes.
    pub thirdweb_user_id: String,
    /// Referral code of the inviter, if the signup came through a link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referred_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

/// Response payload for `/api/signup`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SignupResponse {
    pub success: bool,
    pub referral_code: String,
    pub referral_link: String,
    pub position: u64,
    pub spots_left: i64,
}

/// Read actions supported by `/api/waitlist`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WaitlistAction {
    Count,
    TierAvailability,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WaitlistQueryRequest {
    pub action: WaitlistAction,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WaitlistCountResponse {
    pub count: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TierAvailability {
    pub max_spots: u32,
    pub claimed: u64,
    pub available: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TierAvailabilityResponse {
    /// Keyed by tier number.
    pub availability: BTreeMap<u8, TierAvailability>,
}

/// Request payload for `/api/link-referral`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LinkReferralRequest {
    pub email: String,
    pub referral_code: String,
}

/// Response payload for `/api/link-referral`. `message` distinguishes
/// "already linked" / "invalid code" / "linked" for the caller to render.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LinkReferralResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer_code: Option<String>,
    pub message: String,
}

/// Request payload for `/api/link-wallet`. Exactly one of `email` or
/// `referral_code` identifies the entry.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LinkWalletRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
    pub wallet_address: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LinkWalletResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub referral_code: String,
    pub tier_name: String,
    pub tier_number: u8,
    pub referral_count: u64,
    pub projected_airdrop: u64,
    pub wallet_linked: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LeaderboardResponse {
    pub entries: Vec<LeaderboardEntry>,
}

/// Request payload for `/api/testflight-invite`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TestflightInviteRequest {
    pub email: String,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TestflightInviteResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tester_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_invited: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request payload for `/api/auth/initiate`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthInitiateRequest {
    pub email: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthInitiateResponse {
    pub success: bool,
}

/// Request payload for `/api/auth/complete`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthCompleteRequest {
    pub email: String,
    pub code: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuthCompleteResponse {
    pub success: bool,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    pub is_new_user: bool,
}

/// Request payload for `/api/admin/batch-testflight`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BatchInviteRequest {
    pub admin_key: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// Request payload for `/api/admin/retry-testflight`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RetryInviteRequest {
    pub admin_key: String,
    #[serde(default)]
    pub dry_run: bool,
    /// Restrict the retry scan to a single email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Per-email outcome inside a batch/retry report.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InviteOutcomeStatus {
    Invited,
    AlreadyInvited,
    Failed,
    Skipped,
    /// Dry-run only: would have been invited.
    Candidate,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InviteOutcome {
    pub email: String,
    pub status: InviteOutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct InviteSummary {
    pub total: u64,
    pub new_invites: u64,
    pub already_invited: u64,
    pub failed: u64,
}

/// Response payload shared by both admin invite endpoints.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InviteReportResponse {
    pub success: bool,
    pub dry_run: bool,
    pub summary: InviteSummary,
    pub results: Vec<InviteOutcome>,
}

/// Request payload for `/api/admin/queue-airdrop`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QueueAirdropRequest {
    pub admin_key: String,
    pub email: String,
    pub amount: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QueueAirdropResponse {
    pub success: bool,
    pub queue_id: String,
}

/// Error body returned by every endpoint on failure.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        ErrorResponse {
            success: false,
            error: error.into(),
        }
    }
}

/// Acknowledgement body for the bot webhook (the bot protocol requires a
/// 200 with this shape once the secret check passes).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WebhookAck {
    pub ok: bool,
}
