//! Smart account capability set and the deployment-state cache shared by
//! every account variant.

mod simple;

pub use simple::{SimpleAccount, SimpleAccountConfig, SIMPLE_ACCOUNT_DUMMY_SIGNATURE};

use crate::error::Result;
use crate::types::{AccountCall, UserOperation};
use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, Bytes, H256, U256};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// What every account contract variant must provide to the pipeline.
#[async_trait]
pub trait SmartAccount: Send + Sync + fmt::Debug {
    /// Short name of the variant, used in capability errors.
    fn source(&self) -> &'static str;

    fn address(&self) -> Address;

    fn entry_point(&self) -> Address;

    /// Fresh entry-point nonce; never cached.
    async fn get_nonce(&self) -> Result<U256>;

    /// Factory address followed by the factory call, or empty once deployed.
    async fn get_init_code(&self) -> Result<Bytes>;

    /// `None` once deployed.
    async fn get_factory(&self) -> Result<Option<Address>>;

    /// `None` once deployed.
    async fn get_factory_data(&self) -> Result<Option<Bytes>>;

    fn encode_call_data(&self, call: &AccountCall) -> Result<Bytes>;

    /// Call data that makes the account deploy `bytecode` itself.
    fn encode_deploy_call_data(&self, bytecode: &Bytes) -> Result<Bytes>;

    /// Fixed placeholder with the exact length of a real signature.
    fn dummy_signature(&self, user_operation: &UserOperation) -> Bytes;

    /// Signs a userOpHash over its raw bytes.
    async fn sign_user_operation_hash(&self, hash: H256) -> Result<Bytes>;

    async fn sign_message(&self, message: &[u8]) -> Result<Bytes>;

    async fn sign_typed_data(&self, typed_data: &TypedData) -> Result<Bytes>;

    async fn sign_transaction(&self, tx: &TypedTransaction) -> Result<Bytes>;
}

/// Deployment status as last observed on chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DeploymentState {
    Unknown = 0,
    NotDeployed = 1,
    Deployed = 2,
}

impl DeploymentState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => DeploymentState::Unknown,
            1 => DeploymentState::NotDeployed,
            _ => DeploymentState::Deployed,
        }
    }
}

/// Per-account cached deployment flag.
///
/// Transitions only move forward (`Unknown -> NotDeployed -> Deployed`);
/// `Deployed` is terminal. Two concurrent callers may both see
/// `NotDeployed` and both re-probe the chain. The probe is idempotent so
/// this race is harmless and no lock is taken.
#[derive(Debug)]
pub struct DeploymentCache(AtomicU8);

impl DeploymentCache {
    pub fn new() -> Self {
        Self(AtomicU8::new(DeploymentState::Unknown as u8))
    }

    pub fn state(&self) -> DeploymentState {
        DeploymentState::from_u8(self.0.load(Ordering::Relaxed))
    }

    pub fn is_deployed(&self) -> bool {
        self.state() == DeploymentState::Deployed
    }

    /// Records a probe result. Never moves the state backwards.
    pub fn observe(&self, deployed: bool) -> DeploymentState {
        let next = if deployed {
            DeploymentState::Deployed
        } else {
            DeploymentState::NotDeployed
        };
        let prev = self.0.fetch_max(next as u8, Ordering::Relaxed);
        DeploymentState::from_u8(prev.max(next as u8))
    }
}

impl Default for DeploymentCache {
    fn default() -> Self {
        Self::new()
    }
}
