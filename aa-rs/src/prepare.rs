//! Turns a partial user operation into a fully resolved, dummy-signed draft.
//!
//! The builder fans out the four independent lookups (sender, nonce, init
//! code, chain id), applies defaults, and then walks [`STAGE_ORDER`]. Each
//! stage receives the current draft and hands back either a draft for the
//! next stage or a finished one.

use crate::account::SmartAccount;
use crate::bundler::GasEstimator;
use crate::chain::ChainReader;
use crate::error::{AaError, Result};
use crate::middleware::{MiddlewareStages, UserOpMiddleware};
use crate::types::{PartialUserOperation, UserOperation};
use ethers::types::{Address, U256};
use tracing::debug;

/// A resolved operation together with the chain id fetched while building it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedUserOperation {
    pub user_op: UserOperation,
    pub chain_id: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Fee supplier from the middleware overwrites both fee fields.
    GasPrice,
    /// Node fee estimate fills whichever fee field is still zero.
    FeeEstimate,
    /// Sponsor overwrites gas limits and paymaster data, then ends preparation.
    Sponsorship,
    /// Bundler estimate fills whichever gas limit is still zero.
    GasEstimate,
}

pub const STAGE_ORDER: [Stage; 4] = [
    Stage::GasPrice,
    Stage::FeeEstimate,
    Stage::Sponsorship,
    Stage::GasEstimate,
];

enum Resolution {
    Continue(UserOperation),
    Done(UserOperation),
}

/// Collaborators the pipeline reads from while resolving a draft.
#[derive(Clone, Copy)]
pub struct Resolvers<'a> {
    pub chain: &'a dyn ChainReader,
    pub gas_estimator: &'a dyn GasEstimator,
}

/// Build the draft and run it through the middleware and fallbacks.
pub async fn prepare_user_operation(
    account: &dyn SmartAccount,
    partial: PartialUserOperation,
    middleware: &UserOpMiddleware,
    resolvers: Resolvers<'_>,
) -> Result<PreparedUserOperation> {
    let PreparedUserOperation { user_op, chain_id } =
        build_draft(account, resolvers.chain, partial).await?;
    let entry_point = account.entry_point();

    let stages = match middleware {
        UserOpMiddleware::Override(middleware) => {
            debug!(sender = ?user_op.sender, "override middleware takes over preparation");
            let user_op = middleware.apply(user_op, entry_point).await?;
            return Ok(PreparedUserOperation { user_op, chain_id });
        }
        UserOpMiddleware::Stages(stages) => stages,
    };

    let mut user_op = user_op;
    for stage in STAGE_ORDER {
        match resolve(stage, stages, resolvers, entry_point, user_op).await? {
            Resolution::Continue(next) => user_op = next,
            Resolution::Done(done) => {
                debug!(?stage, "preparation finished early");
                return Ok(PreparedUserOperation {
                    user_op: done,
                    chain_id,
                });
            }
        }
    }

    Ok(PreparedUserOperation { user_op, chain_id })
}

/// Resolve the fields that depend only on the account, then apply defaults.
pub async fn build_draft(
    account: &dyn SmartAccount,
    chain: &dyn ChainReader,
    partial: PartialUserOperation,
) -> Result<PreparedUserOperation> {
    let PartialUserOperation {
        sender,
        nonce,
        init_code,
        call_data,
        call_gas_limit,
        verification_gas_limit,
        pre_verification_gas,
        max_fee_per_gas,
        max_priority_fee_per_gas,
        paymaster_and_data,
        signature,
    } = partial;

    // Any failure drops the other in-flight lookups.
    let (sender, nonce, init_code, chain_id) = tokio::try_join!(
        async move { Ok::<_, AaError>(sender.unwrap_or_else(|| account.address())) },
        async move {
            match nonce {
                Some(nonce) => Ok(nonce),
                None => account.get_nonce().await,
            }
        },
        async move {
            match init_code {
                Some(init_code) => Ok(init_code),
                None => account.get_init_code().await,
            }
        },
        async move { Ok::<_, AaError>(chain.chain_id().await?) },
    )?;

    let mut user_op = UserOperation {
        sender,
        nonce,
        init_code,
        call_data,
        call_gas_limit: call_gas_limit.unwrap_or_default(),
        verification_gas_limit: verification_gas_limit.unwrap_or_default(),
        pre_verification_gas: pre_verification_gas.unwrap_or_default(),
        max_fee_per_gas: max_fee_per_gas.unwrap_or_default(),
        max_priority_fee_per_gas: max_priority_fee_per_gas.unwrap_or_default(),
        paymaster_and_data: paymaster_and_data.unwrap_or_default(),
        signature: signature.unwrap_or_default(),
    };

    if user_op.signature.is_empty() {
        user_op.signature = account.dummy_signature(&user_op);
    }

    debug!(
        sender = ?user_op.sender,
        nonce = %user_op.nonce,
        deploys = !user_op.init_code.is_empty(),
        chain_id,
        "draft built"
    );

    Ok(PreparedUserOperation { user_op, chain_id })
}

async fn resolve(
    stage: Stage,
    stages: &MiddlewareStages,
    resolvers: Resolvers<'_>,
    entry_point: Address,
    mut user_op: UserOperation,
) -> Result<Resolution> {
    match stage {
        Stage::GasPrice => {
            if let Some(supplier) = &stages.gas_price {
                let price = supplier.gas_price().await?;
                user_op.max_fee_per_gas = price.max_fee_per_gas;
                user_op.max_priority_fee_per_gas = price.max_priority_fee_per_gas;
                debug!(
                    max_fee_per_gas = %price.max_fee_per_gas,
                    max_priority_fee_per_gas = %price.max_priority_fee_per_gas,
                    "fees from middleware"
                );
            }
        }
        Stage::FeeEstimate => {
            if user_op.max_fee_per_gas.is_zero() || user_op.max_priority_fee_per_gas.is_zero() {
                let fees = resolvers.chain.estimate_fees_per_gas().await?;
                fill_unset(&mut user_op.max_fee_per_gas, fees.max_fee_per_gas);
                fill_unset(
                    &mut user_op.max_priority_fee_per_gas,
                    fees.max_priority_fee_per_gas,
                );
                debug!(
                    max_fee_per_gas = %user_op.max_fee_per_gas,
                    max_priority_fee_per_gas = %user_op.max_priority_fee_per_gas,
                    "fees from node estimate"
                );
            }
        }
        Stage::Sponsorship => {
            if let Some(sponsor) = &stages.sponsor {
                let sponsored = sponsor.sponsor(&user_op, entry_point).await?;
                user_op.call_gas_limit = sponsored.call_gas_limit;
                user_op.verification_gas_limit = sponsored.verification_gas_limit;
                user_op.pre_verification_gas = sponsored.pre_verification_gas;
                user_op.paymaster_and_data = sponsored.paymaster_and_data;
                if let Some(fee) = sponsored.max_fee_per_gas.filter(|fee| !fee.is_zero()) {
                    user_op.max_fee_per_gas = fee;
                }
                if let Some(fee) = sponsored
                    .max_priority_fee_per_gas
                    .filter(|fee| !fee.is_zero())
                {
                    user_op.max_priority_fee_per_gas = fee;
                }
                debug!(
                    call_gas_limit = %user_op.call_gas_limit,
                    verification_gas_limit = %user_op.verification_gas_limit,
                    pre_verification_gas = %user_op.pre_verification_gas,
                    "sponsored"
                );
                return Ok(Resolution::Done(user_op));
            }
        }
        Stage::GasEstimate => {
            if user_op.call_gas_limit.is_zero()
                || user_op.verification_gas_limit.is_zero()
                || user_op.pre_verification_gas.is_zero()
            {
                let estimates = resolvers
                    .gas_estimator
                    .estimate_user_operation_gas(&user_op, entry_point)
                    .await?;
                fill_unset(&mut user_op.call_gas_limit, estimates.call_gas_limit);
                fill_unset(
                    &mut user_op.verification_gas_limit,
                    estimates.verification_gas_limit,
                );
                fill_unset(
                    &mut user_op.pre_verification_gas,
                    estimates.pre_verification_gas,
                );
                debug!(
                    call_gas_limit = %user_op.call_gas_limit,
                    verification_gas_limit = %user_op.verification_gas_limit,
                    pre_verification_gas = %user_op.pre_verification_gas,
                    "gas limits from bundler estimate"
                );
            }
        }
    }

    Ok(Resolution::Continue(user_op))
}

fn fill_unset(field: &mut U256, value: U256) {
    if field.is_zero() {
        *field = value;
    }
}
