use crate::encoding::{self, parse_h256, parse_u256_field, Hexlify};
use crate::rpc::JsonRpcClient;
use crate::types::{GasEstimates, SignedUserOperation, UserOperation};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::types::{Address, H256};
use serde_json::Value;
use std::time::Duration;

/// Gas-limit estimation for a draft user operation.
#[async_trait]
pub trait GasEstimator: Send + Sync {
    async fn estimate_user_operation_gas(
        &self,
        user_op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasEstimates>;
}

/// Hands a signed user operation to a bundler; returns the userOpHash.
#[async_trait]
pub trait UserOperationRelay: Send + Sync {
    async fn send_user_operation(
        &self,
        user_op: &SignedUserOperation,
        entry_point: Address,
    ) -> Result<H256>;
}

#[derive(Debug, Clone)]
pub struct BundlerClient {
    rpc: JsonRpcClient,
}

impl BundlerClient {
    pub fn new(url: String) -> Self {
        Self {
            rpc: JsonRpcClient::new(url),
        }
    }

    pub async fn supported_entry_points(&self) -> Result<Vec<Address>> {
        let res = self
            .rpc
            .request("eth_supportedEntryPoints", serde_json::json!([]))
            .await
            .context("eth_supportedEntryPoints failed")?;
        serde_json::from_value(res).context("invalid eth_supportedEntryPoints result")
    }

    /// Poll for a receipt until timeout.
    pub async fn wait_for_user_operation_receipt(
        &self,
        user_op_hash: H256,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Value> {
        let start = std::time::Instant::now();
        loop {
            if !timeout.is_zero() && start.elapsed() > timeout {
                return Err(anyhow!(
                    "timed out waiting for userOp receipt after {:?}",
                    timeout
                ));
            }

            let params = serde_json::json!([encoding::fmt_h256(user_op_hash)]);
            let res = self.rpc.request("eth_getUserOperationReceipt", params).await;

            match res {
                Ok(v) => {
                    if !v.is_null() {
                        return Ok(v);
                    }
                }
                Err(e) => {
                    // transient errors are common on free-tier bundlers; keep polling
                    tracing::warn!(error = %e, "bundler receipt poll error");
                }
            }

            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[async_trait]
impl GasEstimator for BundlerClient {
    async fn estimate_user_operation_gas(
        &self,
        user_op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasEstimates> {
        let params = serde_json::json!([user_op.hexlify(), entry_point.hexlify()]);
        let res = self
            .rpc
            .request("eth_estimateUserOperationGas", params)
            .await
            .context("eth_estimateUserOperationGas failed")?;

        Ok(GasEstimates {
            call_gas_limit: parse_u256_field(&res, "callGasLimit")?,
            verification_gas_limit: parse_u256_field(&res, "verificationGasLimit")?,
            pre_verification_gas: parse_u256_field(&res, "preVerificationGas")?,
        })
    }
}

#[async_trait]
impl UserOperationRelay for BundlerClient {
    async fn send_user_operation(
        &self,
        user_op: &SignedUserOperation,
        entry_point: Address,
    ) -> Result<H256> {
        let params = serde_json::json!([user_op.hexlify(), entry_point.hexlify()]);
        let res = self
            .rpc
            .request("eth_sendUserOperation", params)
            .await
            .context("eth_sendUserOperation failed")?;
        parse_userop_hash(&res)
    }
}

fn parse_userop_hash(res: &Value) -> Result<H256> {
    // Most bundlers return the userOpHash directly as a JSON string.
    // Some wrap it in an object: { "result": "0x..." }.
    let hash_str = if let Some(s) = res.as_str() {
        s
    } else if let Some(s) = res.get("result").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOpHash").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOperationHash").and_then(|v| v.as_str()) {
        s
    } else {
        return Err(anyhow!(
            "unexpected eth_sendUserOperation result shape (expected string or {{result: ...}}): {}",
            res
        ));
    };

    parse_h256(hash_str)
}
