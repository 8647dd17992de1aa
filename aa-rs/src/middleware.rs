//! User-operation middleware: either one function that takes over
//! preparation entirely, or a pair of optional fee and sponsorship stages.

use crate::chain::ChainReader;
use crate::types::{GasPrice, SponsorshipResponse, UserOperation};
use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Address, U256};
use std::fmt;
use std::sync::Arc;

/// Full replacement for every stage after the draft is built.
#[async_trait]
pub trait OverrideMiddleware: Send + Sync {
    async fn apply(&self, user_op: UserOperation, entry_point: Address) -> Result<UserOperation>;
}

/// Supplies both fee fields.
#[async_trait]
pub trait GasPriceSupplier: Send + Sync {
    async fn gas_price(&self) -> Result<GasPrice>;
}

/// Asks a sponsor to cover the operation.
#[async_trait]
pub trait SponsorSupplier: Send + Sync {
    async fn sponsor(
        &self,
        user_op: &UserOperation,
        entry_point: Address,
    ) -> Result<SponsorshipResponse>;
}

#[derive(Clone, Default)]
pub struct MiddlewareStages {
    pub gas_price: Option<Arc<dyn GasPriceSupplier>>,
    pub sponsor: Option<Arc<dyn SponsorSupplier>>,
}

#[derive(Clone)]
pub enum UserOpMiddleware {
    Override(Arc<dyn OverrideMiddleware>),
    Stages(MiddlewareStages),
}

impl UserOpMiddleware {
    pub fn with_override(middleware: impl OverrideMiddleware + 'static) -> Self {
        UserOpMiddleware::Override(Arc::new(middleware))
    }

    pub fn stages(
        gas_price: Option<Arc<dyn GasPriceSupplier>>,
        sponsor: Option<Arc<dyn SponsorSupplier>>,
    ) -> Self {
        UserOpMiddleware::Stages(MiddlewareStages { gas_price, sponsor })
    }
}

impl Default for UserOpMiddleware {
    fn default() -> Self {
        UserOpMiddleware::Stages(MiddlewareStages::default())
    }
}

impl fmt::Debug for UserOpMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserOpMiddleware::Override(_) => f.write_str("Override"),
            UserOpMiddleware::Stages(stages) => f
                .debug_struct("Stages")
                .field("gas_price", &stages.gas_price.is_some())
                .field("sponsor", &stages.sponsor.is_some())
                .finish(),
        }
    }
}

/// Node gas price scaled by a basis-point multiplier, used for both fee fields.
pub struct ScaledGasPrice {
    chain: Arc<dyn ChainReader>,
    multiplier_bps: u64,
}

impl ScaledGasPrice {
    pub fn new(chain: Arc<dyn ChainReader>, multiplier_bps: u64) -> Self {
        Self {
            chain,
            multiplier_bps: multiplier_bps.max(1),
        }
    }
}

#[async_trait]
impl GasPriceSupplier for ScaledGasPrice {
    async fn gas_price(&self) -> Result<GasPrice> {
        let gas_price = self.chain.gas_price().await?;
        let scaled = gas_price.saturating_mul(U256::from(self.multiplier_bps)) / U256::from(10_000u64);

        if self.multiplier_bps != 10_000 {
            tracing::info!(
                bps = self.multiplier_bps,
                %gas_price,
                %scaled,
                "gas multiplier applied"
            );
        }

        Ok(GasPrice {
            max_fee_per_gas: scaled,
            max_priority_fee_per_gas: scaled,
        })
    }
}
