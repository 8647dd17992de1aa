//! ERC-4337 user operation preparation for smart accounts.
//!
//! A [`SmartAccountClient`] takes a partially filled [`PartialUserOperation`],
//! resolves every missing field (nonce, init code, fees, gas limits,
//! sponsorship), signs the userOpHash with the account owner and hands the
//! result to a bundler.

pub mod account;
pub mod bundler;
pub mod chain;
pub mod client;
pub mod config;
pub mod encoding;
pub mod error;
pub mod middleware;
pub mod paymaster;
pub mod prepare;
pub mod rpc;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use account::{DeploymentState, SimpleAccount, SimpleAccountConfig, SmartAccount};
pub use bundler::{BundlerClient, GasEstimator, UserOperationRelay};
pub use chain::{ChainReader, ProviderChain};
pub use client::{SmartAccountClient, UserOperationRequest};
pub use error::{AaError, Result};
pub use middleware::{
    GasPriceSupplier, MiddlewareStages, OverrideMiddleware, ScaledGasPrice, SponsorSupplier,
    UserOpMiddleware,
};
pub use paymaster::{ContextSponsorClient, PolicySponsorClient, SponsorContext};
pub use types::{
    AccountCall, Call, GasEstimates, GasPrice, PartialUserOperation, SignedUserOperation,
    SponsorshipResponse, UserOperation,
};
