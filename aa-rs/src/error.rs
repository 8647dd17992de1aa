use thiserror::Error;

/// Errors surfaced by the smart account client and the preparation pipeline.
///
/// Every variant aborts the pipeline at the stage that produced it.
#[derive(Debug, Error)]
pub enum AaError {
    /// No account bound to the client and none passed with the request.
    #[error("no smart account bound to the client and none supplied with the request")]
    MissingAccount,

    /// The account variant lacks the requested capability.
    #[error("{operation} is not supported by {account}")]
    Unsupported {
        operation: &'static str,
        account: &'static str,
    },

    /// The account variant cannot produce ERC-1271 verifiable signatures.
    #[error("{account} isn't 1271 compliant")]
    NotCompliant { account: &'static str },

    /// Failure from a node, bundler, sponsor or signer, passed through as is.
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

pub type Result<T, E = AaError> = std::result::Result<T, E>;
