use super::{DeploymentCache, DeploymentState, SmartAccount};
use crate::chain::ChainReader;
use crate::error::{AaError, Result};
use crate::types::{AccountCall, Call, UserOperation};
use anyhow::Context;
use async_trait::async_trait;
use ethers::abi::AbiParser;
use ethers::contract::BaseContract;
use ethers::signers::Signer;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, Bytes, H256, U256};
use std::fmt;
use std::sync::Arc;

const SOURCE: &str = "SimpleSmartAccount";

/// Hex form of [`DUMMY_SIGNATURE`].
pub const SIMPLE_ACCOUNT_DUMMY_SIGNATURE: &str = "0xfffffffffffffffffffffffffffffff0000000000000000000000000000000007aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1c";

/// 65-byte ECDSA-shaped placeholder (r, s, v).
const DUMMY_SIGNATURE: [u8; 65] = dummy_signature();

const fn dummy_signature() -> [u8; 65] {
    let mut sig = [0u8; 65];
    let mut i = 0;
    while i < 15 {
        sig[i] = 0xff;
        i += 1;
    }
    sig[15] = 0xf0;
    sig[32] = 0x7a;
    let mut i = 33;
    while i < 64 {
        sig[i] = 0xaa;
        i += 1;
    }
    sig[64] = 0x1c;
    sig
}

#[derive(Clone, Copy, Debug)]
pub struct SimpleAccountConfig {
    pub factory: Address,
    pub entry_point: Address,
    /// CREATE2 salt passed to the factory.
    pub salt: U256,
    /// Skips the factory lookup when the account address is already known.
    pub address: Option<Address>,
}

/// eth-infinitism `SimpleAccount` owned by a single ECDSA signer.
pub struct SimpleAccount<S> {
    chain: Arc<dyn ChainReader>,
    signer: S,
    owner: Address,
    factory: Address,
    entry_point: Address,
    salt: U256,
    address: Address,
    deployment: DeploymentCache,
}

impl<S: Signer + 'static> SimpleAccount<S> {
    /// Resolves the account address and probes its deployment once.
    pub async fn new(
        chain: Arc<dyn ChainReader>,
        signer: S,
        config: SimpleAccountConfig,
    ) -> Result<Self> {
        let owner = signer.address();

        let address = match config.address {
            Some(address) => address,
            None => {
                chain
                    .counterfactual_address(config.factory, owner, config.salt)
                    .await?
            }
        };

        let deployment = DeploymentCache::new();
        deployment.observe(chain.is_deployed(address).await?);

        tracing::debug!(
            %address,
            %owner,
            state = ?deployment.state(),
            "simple account ready"
        );

        Ok(Self {
            chain,
            signer,
            owner,
            factory: config.factory,
            entry_point: config.entry_point,
            salt: config.salt,
            address,
            deployment,
        })
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn deployment_state(&self) -> DeploymentState {
        self.deployment.state()
    }

    /// Re-probes the chain unless deployment was already observed.
    async fn needs_deployment(&self) -> Result<bool> {
        if self.deployment.is_deployed() {
            return Ok(false);
        }
        let deployed = self.chain.is_deployed(self.address).await?;
        Ok(self.deployment.observe(deployed) != DeploymentState::Deployed)
    }

    /// `createAccount(owner, salt)` call data for the factory.
    fn factory_calldata(&self) -> Result<Bytes> {
        let factory_abi = AbiParser::default()
            .parse(&["function createAccount(address owner, uint256 salt) returns (address)"])
            .context("failed to parse factory ABI")?;
        let calldata = BaseContract::from(factory_abi)
            .encode("createAccount", (self.owner, self.salt))
            .context("failed to build createAccount calldata")?;
        Ok(calldata)
    }
}

impl<S> fmt::Debug for SimpleAccount<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleAccount")
            .field("address", &self.address)
            .field("owner", &self.owner)
            .field("factory", &self.factory)
            .field("entry_point", &self.entry_point)
            .field("salt", &self.salt)
            .field("deployment", &self.deployment.state())
            .finish()
    }
}

#[async_trait]
impl<S: Signer + 'static> SmartAccount for SimpleAccount<S> {
    fn source(&self) -> &'static str {
        SOURCE
    }

    fn address(&self) -> Address {
        self.address
    }

    fn entry_point(&self) -> Address {
        self.entry_point
    }

    async fn get_nonce(&self) -> Result<U256> {
        Ok(self
            .chain
            .account_nonce(self.address, self.entry_point)
            .await?)
    }

    async fn get_init_code(&self) -> Result<Bytes> {
        if !self.needs_deployment().await? {
            return Ok(Bytes::default());
        }

        let calldata = self.factory_calldata()?;
        let mut v = Vec::with_capacity(20 + calldata.len());
        v.extend_from_slice(self.factory.as_bytes());
        v.extend_from_slice(calldata.as_ref());
        Ok(Bytes::from(v))
    }

    async fn get_factory(&self) -> Result<Option<Address>> {
        if !self.needs_deployment().await? {
            return Ok(None);
        }
        Ok(Some(self.factory))
    }

    async fn get_factory_data(&self) -> Result<Option<Bytes>> {
        if !self.needs_deployment().await? {
            return Ok(None);
        }
        Ok(Some(self.factory_calldata()?))
    }

    fn encode_call_data(&self, call: &AccountCall) -> Result<Bytes> {
        match call {
            AccountCall::Single(call) => encode_execute(call),
            AccountCall::Batch(calls) => encode_execute_batch(calls),
        }
    }

    fn encode_deploy_call_data(&self, _bytecode: &Bytes) -> Result<Bytes> {
        Err(AaError::Unsupported {
            operation: "account deployment",
            account: SOURCE,
        })
    }

    fn dummy_signature(&self, _user_operation: &UserOperation) -> Bytes {
        Bytes::from(DUMMY_SIGNATURE.to_vec())
    }

    async fn sign_user_operation_hash(&self, hash: H256) -> Result<Bytes> {
        let sig = self
            .signer
            .sign_message(hash.as_bytes())
            .await
            .context("failed to sign userOpHash")?;
        Ok(Bytes::from(sig.to_vec()))
    }

    async fn sign_message(&self, _message: &[u8]) -> Result<Bytes> {
        Err(AaError::NotCompliant { account: SOURCE })
    }

    async fn sign_typed_data(&self, _typed_data: &TypedData) -> Result<Bytes> {
        Err(AaError::NotCompliant { account: SOURCE })
    }

    async fn sign_transaction(&self, _tx: &TypedTransaction) -> Result<Bytes> {
        Err(AaError::Unsupported {
            operation: "sign_transaction",
            account: SOURCE,
        })
    }
}

/// `SimpleAccount.execute(address dest, uint256 value, bytes func)`
fn encode_execute(call: &Call) -> Result<Bytes> {
    let account_abi = AbiParser::default()
        .parse(&["function execute(address dest, uint256 value, bytes func)"])
        .context("failed to parse account ABI")?;
    let calldata = BaseContract::from(account_abi)
        .encode("execute", (call.to, call.value, call.data.clone()))
        .context("failed to build execute calldata")?;
    Ok(calldata)
}

/// `SimpleAccount.executeBatch(address[] dest, uint256[] value, bytes[] func)`
///
/// The value array is sent empty when no call transfers value; the account
/// treats an empty array as all zeros.
fn encode_execute_batch(calls: &[Call]) -> Result<Bytes> {
    let dests: Vec<Address> = calls.iter().map(|c| c.to).collect();
    let values: Vec<U256> = if calls.iter().any(|c| !c.value.is_zero()) {
        calls.iter().map(|c| c.value).collect()
    } else {
        Vec::new()
    };
    let funcs: Vec<Bytes> = calls.iter().map(|c| c.data.clone()).collect();

    let account_abi = AbiParser::default()
        .parse(&["function executeBatch(address[] dest, uint256[] value, bytes[] func)"])
        .context("failed to parse account ABI")?;
    let calldata = BaseContract::from(account_abi)
        .encode("executeBatch", (dests, values, funcs))
        .context("failed to build executeBatch calldata")?;
    Ok(calldata)
}
