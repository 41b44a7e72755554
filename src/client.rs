use crate::api::*;
use crate::settings::{FanOut, IssuerSettings};
use anyhow::{bail, Context, Result};
use futures_util::stream::{FuturesUnordered, StreamExt};
use log::{debug, warn};
use reqwest::Response;
use thiserror::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerFailure {
    pub issuer: String,
    pub reason: String,
}
impl Display for IssuerFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.issuer, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("no issuers configured")]
    NoIssuers,
    /// Failures in configured issuer order.
    #[error("all issuers failed: {}", join_failures(.0))]
    AllIssuersFailed(Vec<IssuerFailure>),
}

fn join_failures(failures: &[IssuerFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Fetches signed balance proofs from the first issuer able to provide one.
/// Validity of the signature is left to the claiming contract.
pub struct ProofRetriever {
    issuers: Vec<String>,
    timeout: Duration,
    fan_out: FanOut,
    client: reqwest::Client,
}
impl ProofRetriever {
    pub fn new(settings: &IssuerSettings) -> Self {
        Self {
            issuers: settings
                .urls
                .iter()
                .map(|url| url.trim_end_matches('/').to_string())
                .collect(),
            timeout: Duration::from_millis(settings.timeout_ms),
            fan_out: settings.fan_out,
            client: reqwest::Client::new(),
        }
    }
    pub fn issuers(&self) -> &[String] {
        &self.issuers
    }
    pub async fn fetch_proof(
        &self,
        batch_id: BatchId,
        participant: &str,
        from_tick: TickId,
        to_tick: TickId,
    ) -> Result<ClaimProof, ProofError> {
        if self.issuers.is_empty() {
            return Err(ProofError::NoIssuers);
        }
        let failures = match self.fan_out {
            FanOut::Sequential => {
                let mut failures = Vec::with_capacity(self.issuers.len());
                for issuer in &self.issuers {
                    match self
                        .fetch_from(issuer, batch_id, participant, from_tick, to_tick)
                        .await
                    {
                        Ok(proof) => return Ok(proof),
                        Err(e) => failures.push(self.failure(issuer, e)),
                    }
                }
                failures
            }
            FanOut::Concurrent => {
                let mut pending: FuturesUnordered<_> = self
                    .issuers
                    .iter()
                    .enumerate()
                    .map(|(i, issuer)| async move {
                        let result = self
                            .fetch_from(issuer, batch_id, participant, from_tick, to_tick)
                            .await;
                        (i, result)
                    })
                    .collect();
                let mut failures: Vec<Option<IssuerFailure>> =
                    self.issuers.iter().map(|_| None).collect();
                while let Some((i, result)) = pending.next().await {
                    match result {
                        // Dropping `pending` cancels the issuers still in flight.
                        Ok(proof) => return Ok(proof),
                        Err(e) => failures[i] = Some(self.failure(&self.issuers[i], e)),
                    }
                }
                failures.into_iter().flatten().collect()
            }
        };
        Err(ProofError::AllIssuersFailed(failures))
    }

    async fn fetch_from(
        &self,
        issuer: &str,
        batch_id: BatchId,
        participant: &str,
        from_tick: TickId,
        to_tick: TickId,
    ) -> Result<ClaimProof> {
        let response = self
            .client
            .get(format!("{}/balance/{}/{}", issuer, batch_id, participant))
            .query(&[("fromTick", from_tick), ("toTick", to_tick)])
            .timeout(self.timeout)
            .send()
            .await?;
        let response = bail_if_err(response).await?;
        let body = response
            .json::<BalanceProofResponse>()
            .await
            .context("malformed proof body")?;
        let proof = body.into_proof(from_tick, to_tick)?;
        debug!(
            "Got proof for batch {} ticks {}..{} from {}",
            batch_id, proof.from_tick, proof.to_tick, issuer
        );
        Ok(proof)
    }
    fn failure(&self, issuer: &str, e: anyhow::Error) -> IssuerFailure {
        let reason = truncate_reason(&map_any_err(&e), MAX_REASON_LEN);
        warn!("Issuer {} failed: {}", issuer, reason);
        IssuerFailure {
            issuer: issuer.to_string(),
            reason,
        }
    }
}

pub(crate) async fn bail_if_err(response: Response) -> Result<Response> {
    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        bail!("{}: {}", status, truncate_reason(&text, MAX_REASON_LEN))
    } else {
        Ok(response)
    }
}
