use crate::account::SmartAccount;
use crate::bundler::{BundlerClient, GasEstimator, UserOperationRelay};
use crate::chain::ChainReader;
use crate::error::{AaError, Result};
use crate::middleware::UserOpMiddleware;
use crate::prepare::{self, PreparedUserOperation, Resolvers};
use crate::types::{AccountCall, PartialUserOperation, UserOperation};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Bytes, H256};
use std::fmt;
use std::sync::Arc;

/// Per-call overrides for the client's bound account and middleware.
#[derive(Clone, Debug, Default)]
pub struct UserOperationRequest {
    pub user_operation: PartialUserOperation,
    pub account: Option<Arc<dyn SmartAccount>>,
    pub middleware: Option<UserOpMiddleware>,
}

impl UserOperationRequest {
    pub fn new(user_operation: PartialUserOperation) -> Self {
        Self {
            user_operation,
            ..Default::default()
        }
    }

    pub fn with_account(mut self, account: Arc<dyn SmartAccount>) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_middleware(mut self, middleware: UserOpMiddleware) -> Self {
        self.middleware = Some(middleware);
        self
    }
}

/// Prepares, signs and relays user operations for a smart account.
#[derive(Clone)]
pub struct SmartAccountClient {
    account: Option<Arc<dyn SmartAccount>>,
    chain: Arc<dyn ChainReader>,
    gas_estimator: Arc<dyn GasEstimator>,
    relay: Arc<dyn UserOperationRelay>,
    middleware: UserOpMiddleware,
}

impl SmartAccountClient {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        gas_estimator: Arc<dyn GasEstimator>,
        relay: Arc<dyn UserOperationRelay>,
    ) -> Self {
        Self {
            account: None,
            chain,
            gas_estimator,
            relay,
            middleware: UserOpMiddleware::default(),
        }
    }

    /// One bundler both estimates gas and relays.
    pub fn with_bundler(chain: Arc<dyn ChainReader>, bundler: Arc<BundlerClient>) -> Self {
        Self::new(chain, bundler.clone(), bundler)
    }

    pub fn with_account(mut self, account: Arc<dyn SmartAccount>) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_middleware(mut self, middleware: UserOpMiddleware) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn account(&self) -> Option<&Arc<dyn SmartAccount>> {
        self.account.as_ref()
    }

    /// Resolve every field of the operation and attach a dummy signature.
    pub async fn prepare_user_operation(
        &self,
        request: UserOperationRequest,
    ) -> Result<UserOperation> {
        let account = self.resolve_account(request.account)?;
        let prepared = self
            .prepare_with(
                account.as_ref(),
                request.user_operation,
                request.middleware.as_ref(),
            )
            .await?;
        Ok(prepared.user_op)
    }

    /// Prepare, sign over the userOpHash, and hand the operation to the relay.
    ///
    /// Returns the hash the relay reports for tracking.
    pub async fn send_user_operation(&self, request: UserOperationRequest) -> Result<H256> {
        let account = self.resolve_account(request.account)?;
        let PreparedUserOperation { user_op, chain_id } = self
            .prepare_with(
                account.as_ref(),
                request.user_operation,
                request.middleware.as_ref(),
            )
            .await?;

        let entry_point = account.entry_point();
        let hash = user_op.hash(entry_point, chain_id);
        let signature = account.sign_user_operation_hash(hash).await?;
        let signed = user_op.into_signed(signature);

        let user_op_hash = self.relay.send_user_operation(&signed, entry_point).await?;
        tracing::info!(
            sender = ?signed.sender,
            nonce = %signed.nonce,
            %user_op_hash,
            "user operation submitted"
        );
        Ok(user_op_hash)
    }

    /// Encode `calls` for the account's `execute`/`executeBatch` and send them.
    pub async fn send_calls(
        &self,
        calls: impl Into<AccountCall>,
        account: Option<Arc<dyn SmartAccount>>,
    ) -> Result<H256> {
        let account = self.resolve_account(account)?;
        let call_data = account.encode_call_data(&calls.into())?;
        self.send_user_operation(
            UserOperationRequest::new(PartialUserOperation::new(call_data)).with_account(account),
        )
        .await
    }

    /// Deploy `bytecode` from the account itself, if the account can.
    pub async fn deploy_contract(
        &self,
        bytecode: &Bytes,
        account: Option<Arc<dyn SmartAccount>>,
    ) -> Result<H256> {
        let account = self.resolve_account(account)?;
        let call_data = account.encode_deploy_call_data(bytecode)?;
        self.send_user_operation(
            UserOperationRequest::new(PartialUserOperation::new(call_data)).with_account(account),
        )
        .await
    }

    pub async fn sign_message(
        &self,
        message: &[u8],
        account: Option<Arc<dyn SmartAccount>>,
    ) -> Result<Bytes> {
        self.resolve_account(account)?.sign_message(message).await
    }

    pub async fn sign_typed_data(
        &self,
        typed_data: &TypedData,
        account: Option<Arc<dyn SmartAccount>>,
    ) -> Result<Bytes> {
        self.resolve_account(account)?
            .sign_typed_data(typed_data)
            .await
    }

    pub async fn sign_transaction(
        &self,
        tx: &TypedTransaction,
        account: Option<Arc<dyn SmartAccount>>,
    ) -> Result<Bytes> {
        self.resolve_account(account)?.sign_transaction(tx).await
    }

    fn resolve_account(
        &self,
        explicit: Option<Arc<dyn SmartAccount>>,
    ) -> Result<Arc<dyn SmartAccount>> {
        explicit
            .or_else(|| self.account.clone())
            .ok_or(AaError::MissingAccount)
    }

    async fn prepare_with(
        &self,
        account: &dyn SmartAccount,
        partial: PartialUserOperation,
        middleware: Option<&UserOpMiddleware>,
    ) -> Result<PreparedUserOperation> {
        prepare::prepare_user_operation(
            account,
            partial,
            middleware.unwrap_or(&self.middleware),
            Resolvers {
                chain: self.chain.as_ref(),
                gas_estimator: self.gas_estimator.as_ref(),
            },
        )
        .await
    }
}

impl fmt::Debug for SmartAccountClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmartAccountClient")
            .field("account", &self.account)
            .field("middleware", &self.middleware)
            .finish_non_exhaustive()
    }
}
