//! `pm_sponsorUserOperation` clients.
//!
//! Two sponsor services share the method name but differ in the third
//! parameter: an optional sponsorship policy id, or a tagged payment context.

use crate::encoding::{self, parse_bytes, parse_u256_field, Hexlify};
use crate::middleware::SponsorSupplier;
use crate::rpc::JsonRpcClient;
use crate::types::{SponsorshipResponse, UserOperation};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sponsor selected by a sponsorship policy id.
#[derive(Debug, Clone)]
pub struct PolicySponsorClient {
    rpc: JsonRpcClient,
    sponsorship_policy_id: Option<String>,
}

impl PolicySponsorClient {
    pub fn new(url: String, sponsorship_policy_id: Option<String>) -> Self {
        Self {
            rpc: JsonRpcClient::new(url),
            sponsorship_policy_id,
        }
    }

    pub async fn sponsor_user_operation(
        &self,
        user_op: &UserOperation,
        entry_point: Address,
    ) -> Result<SponsorshipResponse> {
        let params = policy_params(user_op, entry_point, self.sponsorship_policy_id.as_deref());
        let res = self
            .rpc
            .request("pm_sponsorUserOperation", params)
            .await
            .context("pm_sponsorUserOperation failed")?;
        parse_sponsorship(&res)
    }
}

#[async_trait]
impl SponsorSupplier for PolicySponsorClient {
    async fn sponsor(
        &self,
        user_op: &UserOperation,
        entry_point: Address,
    ) -> Result<SponsorshipResponse> {
        self.sponsor_user_operation(user_op, entry_point).await
    }
}

/// How the user pays a context-based sponsor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SponsorContext {
    /// Gas is paid back in an ERC-20 token.
    #[serde(rename = "erc20token")]
    Erc20Token { token: Address },
    /// Pay-as-you-go billing on the sponsor's side.
    #[serde(rename = "payg")]
    Payg,
}

/// Sponsor that takes an explicit payment context with every request.
#[derive(Debug, Clone)]
pub struct ContextSponsorClient {
    rpc: JsonRpcClient,
    context: SponsorContext,
}

impl ContextSponsorClient {
    pub fn new(url: String, context: SponsorContext) -> Self {
        Self {
            rpc: JsonRpcClient::new(url),
            context,
        }
    }

    pub async fn sponsor_user_operation(
        &self,
        user_op: &UserOperation,
        entry_point: Address,
    ) -> Result<SponsorshipResponse> {
        let params = serde_json::json!([
            encoding::user_op_to_paymaster_json(user_op),
            entry_point.hexlify(),
            self.context,
        ]);
        let res = self
            .rpc
            .request("pm_sponsorUserOperation", params)
            .await
            .context("pm_sponsorUserOperation failed")?;
        parse_sponsorship(&res)
    }

    /// Paymaster addresses the sponsor operates for `entry_point`.
    pub async fn accounts(&self, entry_point: Address) -> Result<Vec<Address>> {
        let res = self
            .rpc
            .request("pm_accounts", serde_json::json!([entry_point.hexlify()]))
            .await
            .context("pm_accounts failed")?;
        serde_json::from_value(res).context("invalid pm_accounts result")
    }
}

#[async_trait]
impl SponsorSupplier for ContextSponsorClient {
    async fn sponsor(
        &self,
        user_op: &UserOperation,
        entry_point: Address,
    ) -> Result<SponsorshipResponse> {
        self.sponsor_user_operation(user_op, entry_point).await
    }
}

fn policy_params(user_op: &UserOperation, entry_point: Address, policy_id: Option<&str>) -> Value {
    let user_op = encoding::user_op_to_paymaster_json(user_op);
    match policy_id {
        Some(id) => serde_json::json!([
            user_op,
            entry_point.hexlify(),
            { "sponsorshipPolicyId": id }
        ]),
        None => serde_json::json!([user_op, entry_point.hexlify()]),
    }
}

fn parse_sponsorship(res: &Value) -> Result<SponsorshipResponse> {
    let pm = res
        .get("paymasterAndData")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing paymasterAndData field"))?;

    Ok(SponsorshipResponse {
        paymaster_and_data: parse_bytes(pm).context("invalid hex in paymasterAndData")?,
        call_gas_limit: parse_u256_field(res, "callGasLimit")?,
        verification_gas_limit: parse_u256_field(res, "verificationGasLimit")?,
        pre_verification_gas: parse_u256_field(res, "preVerificationGas")?,
        max_fee_per_gas: optional_u256(res, "maxFeePerGas")?,
        max_priority_fee_per_gas: optional_u256(res, "maxPriorityFeePerGas")?,
    })
}

fn optional_u256(res: &Value, key: &str) -> Result<Option<U256>> {
    match res.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => parse_u256_field(res, key).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Bytes;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ENTRY_POINT: &str = "0x5ff137d4b0fdcd49dca30c7cf57e578a026d2789";

    fn sponsored() -> Value {
        json!({
            "paymasterAndData": "0xdead",
            "preVerificationGas": "0x5208",
            "verificationGasLimit": "0xea60",
            "callGasLimit": "0x186a0"
        })
    }

    fn draft() -> UserOperation {
        UserOperation {
            max_fee_per_gas: U256::from(1_000u64),
            signature: Bytes::from(vec![0x01]),
            ..Default::default()
        }
    }

    #[test]
    fn parse_sponsorship_decodes_quantities() {
        let out = parse_sponsorship(&sponsored()).unwrap();
        assert_eq!(out.paymaster_and_data, Bytes::from(vec![0xde, 0xad]));
        assert_eq!(out.call_gas_limit, U256::from(100_000u64));
        assert_eq!(out.verification_gas_limit, U256::from(60_000u64));
        assert_eq!(out.pre_verification_gas, U256::from(21_000u64));
        assert_eq!(out.max_fee_per_gas, None);
    }

    #[test]
    fn parse_sponsorship_reads_revised_fees() {
        let mut res = sponsored();
        res["maxFeePerGas"] = json!("0x64");
        let out = parse_sponsorship(&res).unwrap();
        assert_eq!(out.max_fee_per_gas, Some(U256::from(100u64)));
        assert_eq!(out.max_priority_fee_per_gas, None);
    }

    #[test]
    fn parse_sponsorship_requires_paymaster_and_data() {
        let res = json!({ "callGasLimit": "0x1" });
        assert!(parse_sponsorship(&res).is_err());
    }

    #[test]
    fn policy_params_include_policy_only_when_set() {
        let ep: Address = ENTRY_POINT.parse().unwrap();

        let with = policy_params(&draft(), ep, Some("sp_test"));
        assert_eq!(with.as_array().unwrap().len(), 3);
        assert_eq!(with[2], json!({ "sponsorshipPolicyId": "sp_test" }));

        let without = policy_params(&draft(), ep, None);
        assert_eq!(without.as_array().unwrap().len(), 2);
        assert_eq!(without[1], json!(ENTRY_POINT));
        assert!(without[0].get("callGasLimit").is_none());
    }

    #[test]
    fn sponsor_context_is_tagged() {
        let token: Address = "0x3870419ba2bbf0127060bcb37f69a1b1c090992b".parse().unwrap();
        assert_eq!(
            serde_json::to_value(SponsorContext::Erc20Token { token }).unwrap(),
            json!({ "type": "erc20token", "token": "0x3870419ba2bbf0127060bcb37f69a1b1c090992b" })
        );
        assert_eq!(
            serde_json::to_value(SponsorContext::Payg).unwrap(),
            json!({ "type": "payg" })
        );
    }

    #[tokio::test]
    async fn policy_client_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "pm_sponsorUserOperation",
                "params": [{ "maxFeePerGas": "0x3e8" }, ENTRY_POINT, { "sponsorshipPolicyId": "sp_test" }]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": sponsored() })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = PolicySponsorClient::new(server.uri(), Some("sp_test".to_string()));
        let out = client
            .sponsor(&draft(), ENTRY_POINT.parse().unwrap())
            .await
            .unwrap();
        assert_eq!(out.paymaster_and_data, Bytes::from(vec![0xde, 0xad]));
    }

    #[tokio::test]
    async fn context_client_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "pm_sponsorUserOperation",
                "params": [{ "signature": "0x01" }, ENTRY_POINT, { "type": "payg" }]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": sponsored() })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ContextSponsorClient::new(server.uri(), SponsorContext::Payg);
        let out = client
            .sponsor(&draft(), ENTRY_POINT.parse().unwrap())
            .await
            .unwrap();
        assert_eq!(out.call_gas_limit, U256::from(100_000u64));
    }

    #[tokio::test]
    async fn context_client_lists_accounts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "pm_accounts", "params": [ENTRY_POINT] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": ["0xe93eca6595fe94091dc1af46aac2a8b5d7990770"]
            })))
            .mount(&server)
            .await;

        let client = ContextSponsorClient::new(server.uri(), SponsorContext::Payg);
        let accounts = client.accounts(ENTRY_POINT.parse().unwrap()).await.unwrap();
        assert_eq!(accounts.len(), 1);
    }
}
