// waitlist-server/src/lib.rs

pub mod allocation;
pub mod auth;
pub mod config;
pub mod error;
pub mod postgrest;
pub mod referral_code;
pub mod settlement;
pub mod store;
pub mod testflight;
pub mod tiers;
pub mod waitlist;
pub mod wallet;

use serde::Deserialize;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use waitlist_api::*;

use crate::auth::AuthClient;
use crate::config::Config;
use crate::error::ApiError;
use crate::settlement::{
    Notifier, SettlementService, TelegramNotifier, TelegramUpdate, TokenTransfer, TransferClient,
};
use crate::store::Store;
use crate::testflight::{BetaDistribution, InviteResult, InviteService, TestflightClient};
use crate::waitlist::{LinkOutcome, WaitlistService};
use crate::wallet::{IdentitySelector, WalletService};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub waitlist: Arc<WaitlistService>,
    pub wallet: Arc<WalletService>,
    pub invites: Arc<InviteService>,
    pub settlement: Arc<SettlementService>,
    pub auth: Option<Arc<AuthClient>>,
}

impl AppState {
    /// Wire every provider client from configuration.
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        let http = reqwest::Client::new();
        let beta = config.testflight.clone().map(|c| {
            Arc::new(TestflightClient::new(http.clone(), c)) as Arc<dyn BetaDistribution>
        });
        let notifier = config
            .telegram
            .clone()
            .map(|c| Arc::new(TelegramNotifier::new(http.clone(), c)) as Arc<dyn Notifier>);
        let transfer = config
            .transfer
            .clone()
            .map(|c| Arc::new(TransferClient::new(http.clone(), c)) as Arc<dyn TokenTransfer>);
        let auth = config
            .auth
            .clone()
            .map(|c| Arc::new(AuthClient::new(http.clone(), c)));
        Self::with_services(config, store, beta, notifier, transfer, auth)
    }

    /// Assembly seam used by tests to swap provider clients for mocks.
    pub fn with_services(
        config: Config,
        store: Arc<dyn Store>,
        beta: Option<Arc<dyn BetaDistribution>>,
        notifier: Option<Arc<dyn Notifier>>,
        transfer: Option<Arc<dyn TokenTransfer>>,
        auth: Option<Arc<AuthClient>>,
    ) -> Self {
        let config = Arc::new(config);
        AppState {
            waitlist: Arc::new(WaitlistService::new(store.clone(), config.clone())),
            wallet: Arc::new(WalletService::new(store.clone())),
            invites: Arc::new(InviteService::new(store.clone(), beta)),
            settlement: Arc::new(SettlementService::new(store, notifier, transfer)),
            auth,
            config,
        }
    }
}

#[derive(Deserialize)]
pub struct WebhookQuery {
    pub secret: Option<String>,
}

/// Compose every route. All endpoints are POST with JSON bodies.
pub fn routes(
    state: AppState,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let state_filter = warp::any().map(move || state.clone());

    let signup = warp::post()
        .and(warp::path!("api" / "signup"))
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(handle_signup);

    let waitlist_query = warp::post()
        .and(warp::path!("api" / "waitlist"))
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(handle_waitlist_query);

    let link_referral = warp::post()
        .and(warp::path!("api" / "link-referral"))
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(handle_link_referral);

    let link_wallet = warp::post()
        .and(warp::path!("api" / "link-wallet"))
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(handle_link_wallet);

    let leaderboard = warp::post()
        .and(warp::path!("api" / "leaderboard"))
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(handle_leaderboard);

    let testflight_invite = warp::post()
        .and(warp::path!("api" / "testflight-invite"))
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(handle_testflight_invite);

    let auth_initiate = warp::post()
        .and(warp::path!("api" / "auth" / "initiate"))
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(handle_auth_initiate);

    let auth_complete = warp::post()
        .and(warp::path!("api" / "auth" / "complete"))
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(handle_auth_complete);

    let batch_testflight = warp::post()
        .and(warp::path!("api" / "admin" / "batch-testflight"))
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(handle_batch_testflight);

    let retry_testflight = warp::post()
        .and(warp::path!("api" / "admin" / "retry-testflight"))
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(handle_retry_testflight);

    let queue_airdrop = warp::post()
        .and(warp::path!("api" / "admin" / "queue-airdrop"))
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(handle_queue_airdrop);

    let telegram_webhook = warp::post()
        .and(warp::path!("api" / "telegram-webhook"))
        .and(warp::query::<WebhookQuery>())
        .and(warp::body::json())
        .and(state_filter)
        .and_then(handle_telegram_webhook);

    signup
        .or(waitlist_query)
        .or(link_referral)
        .or(link_wallet)
        .or(leaderboard)
        .or(testflight_invite)
        .or(auth_initiate)
        .or(auth_complete)
        .or(batch_testflight)
        .or(retry_testflight)
        .or(queue_airdrop)
        .or(telegram_webhook)
}

// --- HTTP Handlers ---

pub async fn handle_signup(
    request: SignupRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    log::debug!("signup request for {}", request.email);
    let platform = request.platform.unwrap_or_default();
    match state
        .waitlist
        .claim_tier(
            &request.email,
            request.tier_number,
            &request.tier_name,
            &request.thirdweb_user_id,
            request.referred_by.as_deref(),
            platform,
        )
        .await
    {
        Ok(outcome) => {
            // iOS signups get a detached invite; the response never waits
            // on the beta provider.
            if outcome.newly_created && platform == Platform::Ios {
                state
                    .invites
                    .spawn_post_signup_invite(waitlist::normalize_email(&request.email));
            }
            Ok(warp::reply::with_status(
                warp::reply::json(&SignupResponse {
                    success: true,
                    referral_code: outcome.referral_code,
                    referral_link: outcome.referral_link,
                    position: outcome.position,
                    spots_left: outcome.spots_left,
                }),
                StatusCode::OK,
            ))
        }
        Err(e) => {
            log::warn!("signup rejected for {}: {}", request.email, e);
            Ok(e.into_reply())
        }
    }
}

pub async fn handle_waitlist_query(
    request: WaitlistQueryRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let result = match request.action {
        WaitlistAction::Count => state
            .waitlist
            .total_count()
            .await
            .map(|count| warp::reply::json(&WaitlistCountResponse { count })),
        WaitlistAction::TierAvailability => state
            .waitlist
            .tier_availability()
            .await
            .map(|availability| warp::reply::json(&TierAvailabilityResponse { availability })),
    };
    match result {
        Ok(reply) => Ok(warp::reply::with_status(reply, StatusCode::OK)),
        Err(e) => Ok(e.into_reply()),
    }
}

pub async fn handle_link_referral(
    request: LinkReferralRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    match state
        .waitlist
        .link_referral(&request.email, &request.referral_code)
        .await
    {
        Ok(LinkOutcome::Linked { referrer_code }) => Ok(warp::reply::with_status(
            warp::reply::json(&LinkReferralResponse {
                success: true,
                referrer_code: Some(referrer_code),
                message: "referral linked".to_string(),
            }),
            StatusCode::OK,
        )),
        Ok(LinkOutcome::AlreadyLinked) => Ok(warp::reply::with_status(
            warp::reply::json(&LinkReferralResponse {
                success: false,
                referrer_code: None,
                message: "already linked to a referrer".to_string(),
            }),
            StatusCode::BAD_REQUEST,
        )),
        Ok(LinkOutcome::InvalidCode) => Ok(warp::reply::with_status(
            warp::reply::json(&LinkReferralResponse {
                success: false,
                referrer_code: None,
                message: "invalid referral code".to_string(),
            }),
            StatusCode::BAD_REQUEST,
        )),
        Err(e) => Ok(e.into_reply()),
    }
}

pub async fn handle_link_wallet(
    request: LinkWalletRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let selector = match (&request.email, &request.referral_code) {
        (Some(email), _) => IdentitySelector::Email(email.clone()),
        (None, Some(code)) => IdentitySelector::ReferralCode(code.clone()),
        (None, None) => {
            return Ok(
                ApiError::Validation("email or referralCode is required".to_string()).into_reply(),
            )
        }
    };
    match state
        .wallet
        .link_wallet(selector, &request.wallet_address)
        .await
    {
        Ok(()) => Ok(warp::reply::with_status(
            warp::reply::json(&LinkWalletResponse {
                success: true,
                message: "wallet linked".to_string(),
            }),
            StatusCode::OK,
        )),
        Err(e) => Ok(e.into_reply()),
    }
}

pub async fn handle_leaderboard(
    request: LeaderboardRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    match state.waitlist.leaderboard(request.limit).await {
        Ok(entries) => Ok(warp::reply::with_status(
            warp::reply::json(&LeaderboardResponse { entries }),
            StatusCode::OK,
        )),
        Err(e) => Ok(e.into_reply()),
    }
}

pub async fn handle_testflight_invite(
    request: TestflightInviteRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    if request.email.trim().is_empty() {
        return Ok(ApiError::Validation("email is required".to_string()).into_reply());
    }
    let result = state.invites.invite(&request.email, request.dry_run).await;
    if !request.dry_run {
        state.invites.record_outcome(&request.email, &result, &[]).await;
    }
    match result {
        Ok(InviteResult::Invited { tester_id }) => Ok(warp::reply::with_status(
            warp::reply::json(&TestflightInviteResponse {
                success: true,
                tester_id: Some(tester_id),
                already_invited: None,
                skipped: None,
                error: None,
            }),
            StatusCode::OK,
        )),
        Ok(InviteResult::AlreadyInvited) => Ok(warp::reply::with_status(
            warp::reply::json(&TestflightInviteResponse {
                success: true,
                tester_id: None,
                already_invited: Some(true),
                skipped: None,
                error: None,
            }),
            StatusCode::OK,
        )),
        Ok(InviteResult::Skipped { reason }) => Ok(warp::reply::with_status(
            warp::reply::json(&TestflightInviteResponse {
                success: false,
                tester_id: None,
                already_invited: None,
                skipped: Some(true),
                error: Some(reason),
            }),
            StatusCode::OK,
        )),
        Ok(InviteResult::Candidate) => Ok(warp::reply::with_status(
            warp::reply::json(&TestflightInviteResponse {
                success: true,
                tester_id: None,
                already_invited: None,
                skipped: None,
                error: None,
            }),
            StatusCode::OK,
        )),
        Err(e) => Ok(e.into_reply()),
    }
}

pub async fn handle_auth_initiate(
    request: AuthInitiateRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let auth = match &state.auth {
        Some(auth) => auth,
        None => return Ok(ApiError::Configuration("auth".to_string()).into_reply()),
    };
    match auth.initiate_email_otp(request.email.trim()).await {
        Ok(()) => Ok(warp::reply::with_status(
            warp::reply::json(&AuthInitiateResponse { success: true }),
            StatusCode::OK,
        )),
        Err(e) => Ok(e.into_reply()),
    }
}

pub async fn handle_auth_complete(
    request: AuthCompleteRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let auth = match &state.auth {
        Some(auth) => auth,
        None => return Ok(ApiError::Configuration("auth".to_string()).into_reply()),
    };
    match auth
        .complete_email_otp(request.email.trim(), request.code.trim())
        .await
    {
        Ok(completion) => Ok(warp::reply::with_status(
            warp::reply::json(&AuthCompleteResponse {
                success: true,
                user_id: completion.user_id,
                wallet_address: completion.wallet_address,
                is_new_user: completion.is_new_user,
            }),
            StatusCode::OK,
        )),
        Err(e) => Ok(e.into_reply()),
    }
}

fn check_admin_key(state: &AppState, supplied: &str) -> Result<(), ApiError> {
    if state.config.admin_key_matches(supplied) {
        Ok(())
    } else {
        Err(ApiError::Authorization("invalid admin key".to_string()))
    }
}

pub async fn handle_batch_testflight(
    request: BatchInviteRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    if let Err(e) = check_admin_key(&state, &request.admin_key) {
        return Ok(e.into_reply());
    }
    match state.invites.batch(request.dry_run, request.limit).await {
        Ok((summary, results)) => Ok(warp::reply::with_status(
            warp::reply::json(&InviteReportResponse {
                success: true,
                dry_run: request.dry_run,
                summary,
                results,
            }),
            StatusCode::OK,
        )),
        Err(e) => Ok(e.into_reply()),
    }
}

pub async fn handle_retry_testflight(
    request: RetryInviteRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    if let Err(e) = check_admin_key(&state, &request.admin_key) {
        return Ok(e.into_reply());
    }
    match state
        .invites
        .retry(request.dry_run, request.email.as_deref())
        .await
    {
        Ok((summary, results)) => Ok(warp::reply::with_status(
            warp::reply::json(&InviteReportResponse {
                success: true,
                dry_run: request.dry_run,
                summary,
                results,
            }),
            StatusCode::OK,
        )),
        Err(e) => Ok(e.into_reply()),
    }
}

pub async fn handle_queue_airdrop(
    request: QueueAirdropRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    if let Err(e) = check_admin_key(&state, &request.admin_key) {
        return Ok(e.into_reply());
    }
    match state.settlement.enqueue(&request.email, request.amount).await {
        Ok(id) => Ok(warp::reply::with_status(
            warp::reply::json(&QueueAirdropResponse {
                success: true,
                queue_id: id.to_string(),
            }),
            StatusCode::OK,
        )),
        Err(e) => Ok(e.into_reply()),
    }
}

pub async fn handle_telegram_webhook(
    query: WebhookQuery,
    update: TelegramUpdate,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    // Exact match, untrimmed. An unconfigured bot rejects everything.
    let authorized = match &state.config.telegram {
        Some(telegram) => query.secret.as_deref() == Some(telegram.webhook_secret.as_str()),
        None => false,
    };
    if !authorized {
        log::warn!("webhook call with bad or missing secret");
        return Ok(
            ApiError::Authorization("invalid webhook secret".to_string()).into_reply(),
        );
    }
    state.settlement.handle_callback(update).await;
    Ok(warp::reply::with_status(
        warp::reply::json(&WebhookAck { ok: true }),
        StatusCode::OK,
    ))
}
