//! In-memory collaborators that count how often the pipeline calls them.

use crate::bundler::{GasEstimator, UserOperationRelay};
use crate::chain::ChainReader;
use crate::middleware::{GasPriceSupplier, OverrideMiddleware, SponsorSupplier};
use crate::types::{GasEstimates, GasPrice, SignedUserOperation, SponsorshipResponse, UserOperation};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Well-known anvil/hardhat dev key #0.
pub(crate) const OWNER_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub(crate) const CHAIN_ID: u64 = 84_532;

pub(crate) struct FakeChain {
    pub account_address: Address,
    deployed: AtomicBool,
    nonce: Mutex<U256>,
    fail_nonce: AtomicBool,
    fees: GasPrice,
    gas_price: U256,
    deployment_probes: AtomicUsize,
    counterfactual_calls: AtomicUsize,
    fee_estimates: AtomicUsize,
}

impl FakeChain {
    pub fn new() -> Self {
        Self {
            account_address: Address::repeat_byte(0xaa),
            deployed: AtomicBool::new(false),
            nonce: Mutex::new(U256::zero()),
            fail_nonce: AtomicBool::new(false),
            fees: GasPrice {
                max_fee_per_gas: U256::from(3_000_000_000u64),
                max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            },
            gas_price: U256::from(2_000_000_000u64),
            deployment_probes: AtomicUsize::new(0),
            counterfactual_calls: AtomicUsize::new(0),
            fee_estimates: AtomicUsize::new(0),
        }
    }

    pub fn deployed() -> Self {
        let chain = Self::new();
        chain.set_deployed(true);
        chain
    }

    pub fn set_deployed(&self, deployed: bool) {
        self.deployed.store(deployed, Ordering::SeqCst);
    }

    pub fn set_nonce(&self, nonce: U256) {
        *self.nonce.lock().unwrap() = nonce;
    }

    pub fn nonce(&self) -> U256 {
        *self.nonce.lock().unwrap()
    }

    pub fn fail_nonce(&self) {
        self.fail_nonce.store(true, Ordering::SeqCst);
    }

    pub fn fees(&self) -> GasPrice {
        self.fees
    }

    pub fn legacy_gas_price(&self) -> U256 {
        self.gas_price
    }

    pub fn deployment_probes(&self) -> usize {
        self.deployment_probes.load(Ordering::SeqCst)
    }

    pub fn counterfactual_calls(&self) -> usize {
        self.counterfactual_calls.load(Ordering::SeqCst)
    }

    pub fn fee_estimates(&self) -> usize {
        self.fee_estimates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn chain_id(&self) -> Result<u64> {
        Ok(CHAIN_ID)
    }

    async fn is_deployed(&self, _address: Address) -> Result<bool> {
        self.deployment_probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.deployed.load(Ordering::SeqCst))
    }

    async fn account_nonce(&self, _sender: Address, _entry_point: Address) -> Result<U256> {
        if self.fail_nonce.load(Ordering::SeqCst) {
            return Err(anyhow!("entryPoint.getNonce failed"));
        }
        Ok(self.nonce())
    }

    async fn counterfactual_address(
        &self,
        _factory: Address,
        _owner: Address,
        _salt: U256,
    ) -> Result<Address> {
        self.counterfactual_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.account_address)
    }

    async fn estimate_fees_per_gas(&self) -> Result<GasPrice> {
        self.fee_estimates.fetch_add(1, Ordering::SeqCst);
        Ok(self.fees)
    }

    async fn gas_price(&self) -> Result<U256> {
        Ok(self.gas_price)
    }
}

pub(crate) struct FakeBundler {
    pub estimates: GasEstimates,
    pub hash: H256,
    estimate_calls: AtomicUsize,
    last_estimated: Mutex<Option<UserOperation>>,
    sent: Mutex<Vec<(SignedUserOperation, Address)>>,
}

impl FakeBundler {
    pub fn new() -> Self {
        Self {
            estimates: GasEstimates {
                call_gas_limit: U256::from(50_000u64),
                verification_gas_limit: U256::from(150_000u64),
                pre_verification_gas: U256::from(45_000u64),
            },
            hash: H256::repeat_byte(0x77),
            estimate_calls: AtomicUsize::new(0),
            last_estimated: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn estimate_calls(&self) -> usize {
        self.estimate_calls.load(Ordering::SeqCst)
    }

    pub fn last_estimated(&self) -> Option<UserOperation> {
        self.last_estimated.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(SignedUserOperation, Address)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl GasEstimator for FakeBundler {
    async fn estimate_user_operation_gas(
        &self,
        user_op: &UserOperation,
        _entry_point: Address,
    ) -> Result<GasEstimates> {
        self.estimate_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_estimated.lock().unwrap() = Some(user_op.clone());
        Ok(self.estimates)
    }
}

#[async_trait]
impl UserOperationRelay for FakeBundler {
    async fn send_user_operation(
        &self,
        user_op: &SignedUserOperation,
        entry_point: Address,
    ) -> Result<H256> {
        self.sent
            .lock()
            .unwrap()
            .push((user_op.clone(), entry_point));
        Ok(self.hash)
    }
}

pub(crate) struct FakeSponsor {
    pub response: SponsorshipResponse,
    fail: bool,
    calls: AtomicUsize,
    last_op: Mutex<Option<UserOperation>>,
}

impl FakeSponsor {
    pub fn new(response: SponsorshipResponse) -> Self {
        Self {
            response,
            fail: false,
            calls: AtomicUsize::new(0),
            last_op: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(SponsorshipResponse::default())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_op(&self) -> Option<UserOperation> {
        self.last_op.lock().unwrap().clone()
    }
}

#[async_trait]
impl SponsorSupplier for FakeSponsor {
    async fn sponsor(
        &self,
        user_op: &UserOperation,
        _entry_point: Address,
    ) -> Result<SponsorshipResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_op.lock().unwrap() = Some(user_op.clone());
        if self.fail {
            return Err(anyhow!("pm_sponsorUserOperation failed: policy rejected"));
        }
        Ok(self.response.clone())
    }
}

pub(crate) struct FakeGasPrice {
    pub price: GasPrice,
    calls: AtomicUsize,
}

impl FakeGasPrice {
    pub fn new(max_fee_per_gas: u64, max_priority_fee_per_gas: u64) -> Self {
        Self {
            price: GasPrice {
                max_fee_per_gas: U256::from(max_fee_per_gas),
                max_priority_fee_per_gas: U256::from(max_priority_fee_per_gas),
            },
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GasPriceSupplier for FakeGasPrice {
    async fn gas_price(&self) -> Result<GasPrice> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.price)
    }
}

/// Override middleware that stamps a fixed marker onto the draft it receives.
pub(crate) struct FakeOverride {
    calls: AtomicUsize,
    received: Mutex<Option<UserOperation>>,
}

impl FakeOverride {
    pub const MARKER: u64 = 424_242;

    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            received: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Option<UserOperation> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl OverrideMiddleware for FakeOverride {
    async fn apply(&self, user_op: UserOperation, _entry_point: Address) -> Result<UserOperation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.received.lock().unwrap() = Some(user_op.clone());
        Ok(UserOperation {
            call_gas_limit: U256::from(Self::MARKER),
            verification_gas_limit: U256::from(Self::MARKER),
            pre_verification_gas: U256::from(Self::MARKER),
            max_fee_per_gas: U256::from(Self::MARKER),
            max_priority_fee_per_gas: U256::from(Self::MARKER),
            ..user_op
        })
    }
}
