use crate::types::GasPrice;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::abi::AbiParser;
use ethers::prelude::Contract;
use ethers::providers::Middleware;
use ethers::types::{Address, U256};
use std::sync::Arc;

/// Read-only node access needed by accounts and the preparation pipeline.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    /// True once contract code exists at `address`.
    async fn is_deployed(&self, address: Address) -> Result<bool>;

    /// `EntryPoint.getNonce(sender, 0)`.
    async fn account_nonce(&self, sender: Address, entry_point: Address) -> Result<U256>;

    /// `factory.getAddress(owner, salt)`.
    async fn counterfactual_address(
        &self,
        factory: Address,
        owner: Address,
        salt: U256,
    ) -> Result<Address>;

    /// Current EIP-1559 fee suggestion from the node.
    async fn estimate_fees_per_gas(&self) -> Result<GasPrice>;

    /// Legacy `eth_gasPrice`.
    async fn gas_price(&self) -> Result<U256>;
}

/// [`ChainReader`] over any ethers middleware.
#[derive(Debug)]
pub struct ProviderChain<M> {
    client: Arc<M>,
}

impl<M: Middleware + 'static> ProviderChain<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainReader for ProviderChain<M> {
    async fn chain_id(&self) -> Result<u64> {
        let chain_id = self
            .client
            .get_chainid()
            .await
            .context("eth_chainId failed")?;
        narrow_chain_id(chain_id)
    }

    async fn is_deployed(&self, address: Address) -> Result<bool> {
        let code = self
            .client
            .get_code(address, None)
            .await
            .context("eth_getCode failed")?;
        Ok(!code.as_ref().is_empty())
    }

    async fn account_nonce(&self, sender: Address, entry_point: Address) -> Result<U256> {
        let entrypoint_abi = AbiParser::default()
            .parse(&["function getNonce(address sender, uint192 key) view returns (uint256)"])?;
        let entrypoint_c = Contract::new(entry_point, entrypoint_abi, self.client.clone());

        let nonce: U256 = entrypoint_c
            .method("getNonce", (sender, U256::zero()))?
            .call()
            .await
            .context("entryPoint.getNonce failed")?;
        Ok(nonce)
    }

    async fn counterfactual_address(
        &self,
        factory: Address,
        owner: Address,
        salt: U256,
    ) -> Result<Address> {
        let factory_abi = AbiParser::default()
            .parse(&["function getAddress(address owner, uint256 salt) view returns (address)"])?;
        let factory_c = Contract::new(factory, factory_abi, self.client.clone());

        let account: Address = factory_c
            .method("getAddress", (owner, salt))?
            .call()
            .await
            .context("factory.getAddress failed")?;
        Ok(account)
    }

    async fn estimate_fees_per_gas(&self) -> Result<GasPrice> {
        let (max_fee_per_gas, max_priority_fee_per_gas) = self
            .client
            .estimate_eip1559_fees(None)
            .await
            .context("failed to estimate EIP-1559 fees")?;
        Ok(GasPrice {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }

    async fn gas_price(&self) -> Result<U256> {
        self.client
            .get_gas_price()
            .await
            .context("failed to fetch gas price")
    }
}

fn narrow_chain_id(chain_id: U256) -> Result<u64> {
    u64::try_from(chain_id)
        .map_err(|_| anyhow!("eth_chainId returned {chain_id}, which does not fit in u64"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_id_fits_u64() {
        assert_eq!(narrow_chain_id(U256::from(84_532u64)).unwrap(), 84_532);
        assert_eq!(narrow_chain_id(U256::from(u64::MAX)).unwrap(), u64::MAX);
    }

    #[test]
    fn oversized_chain_id_is_an_error() {
        let err = narrow_chain_id(U256::from(u64::MAX) + U256::one()).unwrap_err();
        assert!(err.to_string().contains("does not fit in u64"));
    }
}
