//! Live order submission against the venue's CLOB, via
//! `polymarket-client-sdk`'s authenticated builder chain. This module's
//! only job is translating our order/result types and categorising
//! failures the way the trader expects to log them.
//!
//! The hard 5s deadline is enforced by the caller (`ArbTrader::execute`)
//! via `tokio::time::timeout`, not by anything in here — a client-side
//! timeout on our end would race the core's and is not a substitute for it.

use std::str::FromStr;

use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use polymarket_client_sdk::auth::state::Authenticated;
use polymarket_client_sdk::auth::{LocalSigner, Normal, Signer};
use polymarket_client_sdk::clob::types::{OrderType as ClobOrderType, Side as ClobSide, SignatureType};
use polymarket_client_sdk::clob::{Client as ClobClient, Config as ClobConfig};
use polymarket_client_sdk::types::{Decimal as ClobDecimal, U256};
use polymarket_client_sdk::POLYGON;
use rust_decimal::prelude::*;
use tracing::warn;

use crate::engine::trader::ExecutionSink;
use crate::types::{ExecutionFailure, OrderRequest, OrderResult};

pub struct LiveExecutionSink {
    client: ClobClient<Authenticated<Normal>>,
    signer: LocalSigner<SigningKey>,
}

impl LiveExecutionSink {
    pub async fn connect(
        clob_url: &str,
        signer_key: &str,
        signature_type: i64,
        funder_address: Option<&str>,
    ) -> anyhow::Result<Self> {
        let signer = LocalSigner::from_str(signer_key)?.with_chain_id(Some(POLYGON));

        let sig_type = match signature_type {
            1 => SignatureType::Proxy,
            2 => SignatureType::GnosisSafe,
            _ => SignatureType::Eoa,
        };

        let mut auth_builder = ClobClient::new(clob_url, ClobConfig::default())?
            .authentication_builder(&signer)
            .signature_type(sig_type);

        if let Some(funder) = funder_address {
            auth_builder = auth_builder.funder(funder.parse()?);
        }

        let client = auth_builder.authenticate().await?;
        Ok(Self { client, signer })
    }
}

#[async_trait]
impl ExecutionSink for LiveExecutionSink {
    async fn submit_ioc(&self, order: OrderRequest) -> OrderResult {
        let result: Result<_, String> = async {
            let price = ClobDecimal::from_str(&order.price.to_string()).map_err(|e| format!("bad price: {e}"))?;
            let size = ClobDecimal::from_str(&order.size.to_string()).map_err(|e| format!("bad size: {e}"))?;
            let token_id = U256::from_str(&order.token_id).map_err(|e| format!("bad token_id: {e}"))?;

            let signable = self
                .client
                .limit_order()
                .token_id(token_id)
                .price(price)
                .size(size)
                .side(ClobSide::Buy)
                .order_type(ClobOrderType::FOK)
                .post_only(false)
                .build()
                .await
                .map_err(|e| format!("build: {e}"))?;

            let signed = self.client.sign(&self.signer, signable).await.map_err(|e| format!("sign: {e}"))?;

            self.client.post_order(signed).await.map_err(|e| format!("post: {e}"))
        }
        .await;

        match result {
            Ok(resp) if resp.success => OrderResult::Filled {
                order_id: resp.order_id,
                fill_price: order.price.to_f64().unwrap_or(0.0),
                fill_size: order.size.to_f64().unwrap_or(0.0),
            },
            Ok(resp) => {
                let msg = resp.error_msg.unwrap_or_else(|| "unknown rejection".to_string());
                OrderResult::Rejected { reason: categorise_failure(&msg) }
            }
            Err(msg) => OrderResult::Rejected { reason: categorise_failure(&msg) },
        }
    }
}

fn categorise_failure(msg: &str) -> ExecutionFailure {
    if msg.contains("403") {
        ExecutionFailure::AuthBlocked
    } else if msg.contains("429") {
        ExecutionFailure::RateLimited
    } else if msg.contains("timed out") || msg.contains("timeout") {
        ExecutionFailure::Timeout
    } else if msg.contains("insufficient") || msg.contains("balance") {
        ExecutionFailure::InsufficientBalance
    } else {
        warn!(error = %msg, "uncategorised execution failure");
        ExecutionFailure::Other(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: a 403 response string from the CLOB.
    /// Expected: categorised as AuthBlocked.
    #[test]
    fn categorises_auth_blocked() {
        assert_eq!(categorise_failure("http 403 forbidden"), ExecutionFailure::AuthBlocked);
    }

    /// Scenario: a rate-limit response string.
    /// Expected: categorised as RateLimited.
    #[test]
    fn categorises_rate_limited() {
        assert_eq!(categorise_failure("429 too many requests"), ExecutionFailure::RateLimited);
    }

    /// Scenario: a message with none of the known markers.
    /// Expected: categorised as Other, carrying the raw message.
    #[test]
    fn uncategorised_errors_fall_through_to_other() {
        match categorise_failure("unexpected gateway response") {
            ExecutionFailure::Other(msg) => assert!(msg.contains("unexpected")),
            other => panic!("expected Other, got {other:?}"),
        }
    }
}
