//! Identity/OTP provider client. The browser talks to the proxy endpoints
//! so the provider secret never leaves the server.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::error::ApiError;

#[derive(Serialize)]
struct ChallengeRequest<'a> {
    method: &'static str,
    email: &'a str,
}

#[derive(Serialize)]
struct CompleteRequest<'a> {
    method: &'static str,
    email: &'a str,
    code: &'a str,
}

/// Result of a completed email OTP challenge.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OtpCompletion {
    pub user_id: String,
    #[allow(dead_code)]
    pub token: Option<String>,
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub is_new_user: bool,
}

pub struct AuthClient {
    client: Client,
    config: AuthConfig,
}

impl AuthClient {
    pub fn new(client: Client, config: AuthConfig) -> Self {
        AuthClient { client, config }
    }

    /// Start an email OTP challenge for `email`.
    pub async fn initiate_email_otp(&self, email: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(format!("{}/auth/initiate", self.config.api_url))
            .header("x-secret-key", &self.config.secret_key)
            .json(&ChallengeRequest {
                method: "email",
                email,
            })
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("auth initiate failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            log::error!("auth initiate returned {}: {}", status, body);
            return Err(ApiError::Upstream(format!(
                "auth provider rejected initiate ({})",
                status
            )));
        }
        Ok(())
    }

    /// Complete an email OTP challenge and return the provider identity.
    pub async fn complete_email_otp(
        &self,
        email: &str,
        code: &str,
    ) -> Result<OtpCompletion, ApiError> {
        let response = self
            .client
            .post(format!("{}/auth/complete", self.config.api_url))
            .header("x-secret-key", &self.config.secret_key)
            .json(&CompleteRequest {
                method: "email",
                email,
                code,
            })
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("auth complete failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::BAD_REQUEST
        {
            return Err(ApiError::Validation("invalid verification code".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("auth complete returned {}: {}", status, body);
            return Err(ApiError::Upstream(format!(
                "auth provider rejected complete ({})",
                status
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ApiError::Upstream(format!("auth complete parse failed: {}", e)))
    }
}
