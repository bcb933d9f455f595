//! REST adapter: credential validation, guild membership and leaving guilds.
//!
//! Every call is a single authenticated request; the raw credential goes in
//! the `Authorization` header as the platform expects for user accounts.

use std::time::Duration;

use reqwest::StatusCode;
use rota_core::{
    config::Config,
    domain::{Credential, GuildId},
    errors::Error,
    Result,
};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: Vec<Credential>,
    pub invalid: Vec<Credential>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Membership {
    Present,
    /// Not a member (or not checkable); carries the status and error detail.
    Missing(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left,
    /// The platform refused; carries the status and error detail.
    Failed(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeaveReport {
    pub left: usize,
    pub failed: Vec<(Credential, String)>,
}

#[derive(Clone, Debug)]
pub struct CredentialValidator {
    base: String,
    http: reqwest::Client,
}

impl CredentialValidator {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("http client build error: {e}")))?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(cfg.api_base.clone(), cfg.http_timeout)
    }

    async fn send(
        &self,
        method: reqwest::Method,
        credential: &Credential,
        path: &str,
    ) -> Result<reqwest::Response> {
        self.http
            .request(method, format!("{}{path}", self.base))
            .header(reqwest::header::AUTHORIZATION, credential.expose())
            .send()
            .await
            .map_err(|e| Error::External(format!("request error: {e}")))
    }

    async fn get(&self, credential: &Credential, path: &str) -> Result<reqwest::Response> {
        self.send(reqwest::Method::GET, credential, path).await
    }

    /// "Who am I" request. Only a 401 marks the credential invalid.
    pub async fn check(&self, credential: &Credential) -> Result<Validity> {
        let resp = self.get(credential, "/users/@me").await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(Validity::Valid);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Ok(Validity::Invalid);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::External(format!(
            "validation failed: {status} {}",
            body.chars().take(200).collect::<String>()
        )))
    }

    /// Check every credential in turn. Errors count as invalid.
    pub async fn validate_all(&self, credentials: &[Credential]) -> ValidationReport {
        let mut report = ValidationReport::default();
        for credential in credentials {
            match self.check(credential).await {
                Ok(Validity::Valid) => report.valid.push(credential.clone()),
                Ok(Validity::Invalid) => {
                    warn!(account = %credential, "credential rejected");
                    report.invalid.push(credential.clone());
                }
                Err(e) => {
                    warn!(account = %credential, "credential check failed: {e}");
                    report.invalid.push(credential.clone());
                }
            }
        }
        info!(
            valid = report.valid.len(),
            invalid = report.invalid.len(),
            "credential validation finished"
        );
        report
    }

    pub async fn check_membership(
        &self,
        credential: &Credential,
        guild_id: &GuildId,
    ) -> Result<Membership> {
        let resp = self
            .get(credential, &format!("/guilds/{guild_id}/members/@me"))
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(Membership::Present);
        }

        Ok(Membership::Missing(failure_detail(resp).await))
    }

    /// Leave a guild with one account.
    pub async fn leave_guild(
        &self,
        credential: &Credential,
        guild_id: &GuildId,
    ) -> Result<LeaveOutcome> {
        let path = format!("/users/@me/guilds/{guild_id}");
        let resp = self.send(reqwest::Method::DELETE, credential, &path).await?;
        if resp.status().is_success() {
            return Ok(LeaveOutcome::Left);
        }
        Ok(LeaveOutcome::Failed(failure_detail(resp).await))
    }

    /// Leave a guild with every credential in turn.
    pub async fn leave_guild_all(
        &self,
        credentials: &[Credential],
        guild_id: &GuildId,
    ) -> LeaveReport {
        let mut report = LeaveReport::default();
        for credential in credentials {
            let detail = match self.leave_guild(credential, guild_id).await {
                Ok(LeaveOutcome::Left) => {
                    report.left += 1;
                    continue;
                }
                Ok(LeaveOutcome::Failed(detail)) => detail,
                Err(e) => e.to_string(),
            };
            warn!(account = %credential, guild = %guild_id, "leave failed: {detail}");
            report.failed.push((credential.clone(), detail));
        }
        info!(
            guild = %guild_id,
            left = report.left,
            failed = report.failed.len(),
            "leave finished"
        );
        report
    }
}

/// `"<status> <message>"` from an error response, falling back to the raw body.
async fn failure_detail(resp: reqwest::Response) -> String {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect());
    format!("{} {detail}", status.as_u16()).trim().to_string()
}
