use super::*;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Body of an issuer's `GET /balance/...` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceProofResponse {
    pub balance: String,
    pub signature: String,
    #[serde(default)]
    pub from_tick: Option<TickId>,
    #[serde(default)]
    pub to_tick: Option<TickId>,
}
impl BalanceProofResponse {
    /// Validates the wire form against the requested range. Missing tick bounds
    /// fall back to it; bounds that differ make the reply unusable.
    pub fn into_proof(self, from_tick: TickId, to_tick: TickId) -> Result<ClaimProof> {
        let signed = (
            self.from_tick.unwrap_or(from_tick),
            self.to_tick.unwrap_or(to_tick),
        );
        if signed != (from_tick, to_tick) {
            bail!(
                "proof covers ticks {}..{}, requested {}..{}",
                signed.0,
                signed.1,
                from_tick,
                to_tick
            );
        }
        let balance = self.balance.trim();
        if balance.is_empty() || !balance.bytes().all(|b| b.is_ascii_digit()) {
            bail!("invalid balance {:?}", self.balance);
        }
        let signature = hex::decode(self.signature.trim_start_matches("0x"))
            .context("signature is not hex")?;
        if signature.is_empty() {
            return Err(anyhow!("empty signature"));
        }
        Ok(ClaimProof {
            balance: balance.to_string(),
            signature,
            from_tick,
            to_tick,
        })
    }
}
