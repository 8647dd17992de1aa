use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use std::ops::Deref;

/// ERC-4337 UserOperation (EntryPoint v0.6 layout).
///
/// Inside the preparation pipeline a zero numeric field and an empty
/// `paymaster_and_data` mean "not resolved yet".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// Canonical userOpHash as computed by `EntryPoint.getUserOpHash`.
    ///
    /// The signature is not part of the hash; the entry point and chain id are.
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> H256 {
        let packed = abi::encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(&self.init_code).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::Uint(self.call_gas_limit),
            Token::Uint(self.verification_gas_limit),
            Token::Uint(self.pre_verification_gas),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::FixedBytes(keccak256(&self.paymaster_and_data).to_vec()),
        ]);

        let outer = abi::encode(&[
            Token::FixedBytes(keccak256(packed).to_vec()),
            Token::Address(entry_point),
            Token::Uint(U256::from(chain_id)),
        ]);

        H256(keccak256(outer))
    }

    /// Minimum balance the sender (or paymaster) must hold for this operation.
    ///
    /// Paymaster-validated operations reserve three times the verification gas.
    pub fn required_prefund(&self) -> U256 {
        let multiplier = if self.paymaster_and_data.is_empty() {
            U256::one()
        } else {
            U256::from(3u64)
        };

        let required_gas = self
            .call_gas_limit
            .saturating_add(self.verification_gas_limit.saturating_mul(multiplier))
            .saturating_add(self.pre_verification_gas);

        required_gas.saturating_mul(self.max_fee_per_gas)
    }

    /// Attach the final signature. The result can no longer be mutated.
    pub fn into_signed(mut self, signature: Bytes) -> SignedUserOperation {
        self.signature = signature;
        SignedUserOperation(self)
    }
}

/// A user operation whose signature has been written.
///
/// Only read access is exposed so no hashed field can change after signing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedUserOperation(UserOperation);

impl SignedUserOperation {
    pub fn into_inner(self) -> UserOperation {
        self.0
    }
}

impl Deref for SignedUserOperation {
    type Target = UserOperation;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Caller-supplied operation where everything except `call_data` may be left
/// for the pipeline to resolve.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartialUserOperation {
    pub sender: Option<Address>,
    pub nonce: Option<U256>,
    pub init_code: Option<Bytes>,
    pub call_data: Bytes,
    pub call_gas_limit: Option<U256>,
    pub verification_gas_limit: Option<U256>,
    pub pre_verification_gas: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub paymaster_and_data: Option<Bytes>,
    pub signature: Option<Bytes>,
}

impl PartialUserOperation {
    pub fn new(call_data: Bytes) -> Self {
        Self {
            call_data,
            ..Default::default()
        }
    }
}

/// A call the smart account should execute.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Call {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

/// Single call or batch, encoded differently by the account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountCall {
    Single(Call),
    Batch(Vec<Call>),
}

impl From<Call> for AccountCall {
    fn from(call: Call) -> Self {
        AccountCall::Single(call)
    }
}

impl From<Vec<Call>> for AccountCall {
    fn from(calls: Vec<Call>) -> Self {
        AccountCall::Batch(calls)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GasEstimates {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GasPrice {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// What a sponsor returns for a user operation it agrees to cover.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SponsorshipResponse {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub paymaster_and_data: Bytes,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTRY_POINT: &str = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789";

    fn priced_op() -> UserOperation {
        UserOperation {
            call_gas_limit: 100_000.into(),
            verification_gas_limit: 60_000.into(),
            pre_verification_gas: 21_000.into(),
            max_fee_per_gas: 2_000_000_000u64.into(),
            ..Default::default()
        }
    }

    #[test]
    fn hash_matches_entry_point() {
        let entry_point: Address = ENTRY_POINT.parse().unwrap();

        let op = UserOperation {
            verification_gas_limit: 100_000.into(),
            pre_verification_gas: 21_000.into(),
            max_priority_fee_per_gas: 1_000_000_000.into(),
            ..Default::default()
        };
        assert_eq!(
            op.hash(entry_point, 80_001),
            "0x95418c07086df02ff6bc9e8bdc150b380cb761beecc098630440bcec6e862702"
                .parse::<H256>()
                .unwrap()
        );

        let op = UserOperation {
            sender: "0x9c5754De1443984659E1b3a8d1931D83475ba29C".parse().unwrap(),
            nonce: U256::zero(),
            init_code: "0x9406cc6185a346906296840746125a0e449764545fbfb9cf000000000000000000000000ce0fefa6f7979c4c9b5373e0f5105b7259092c6d0000000000000000000000000000000000000000000000000000000000000000".parse().unwrap(),
            call_data: "0xb61d27f60000000000000000000000009c5754de1443984659e1b3a8d1931d83475ba29c00000000000000000000000000000000000000000000000000005af3107a400000000000000000000000000000000000000000000000000000000000000000600000000000000000000000000000000000000000000000000000000000000000".parse().unwrap(),
            call_gas_limit: 33_100.into(),
            verification_gas_limit: 361_460.into(),
            pre_verification_gas: 44_980.into(),
            max_fee_per_gas: 1_695_000_030u64.into(),
            max_priority_fee_per_gas: 1_695_000_000u64.into(),
            paymaster_and_data: Bytes::default(),
            signature: "0xebfd4657afe1f1c05c1ec65f3f9cc992a3ac083c424454ba61eab93152195e1400d74df01fc9fa53caadcb83a891d478b713016bcc0c64307c1ad3d7ea2e2d921b".parse().unwrap(),
        };
        assert_eq!(
            op.hash(entry_point, 80_001),
            "0x7c1b8c9df49a9e09ecef0f0fe6841d895850d29820f9a4b494097764085dcd7e"
                .parse::<H256>()
                .unwrap()
        );
    }

    #[test]
    fn hash_ignores_signature() {
        let entry_point: Address = ENTRY_POINT.parse().unwrap();
        let op = priced_op();
        let signed = op.clone().into_signed(Bytes::from(vec![0xab; 65]));
        assert_eq!(op.hash(entry_point, 1), signed.hash(entry_point, 1));
        assert_ne!(op.hash(entry_point, 1), op.hash(entry_point, 2));
    }

    #[test]
    fn required_prefund_unsponsored() {
        let op = priced_op();
        let expected = U256::from(100_000u64 + 60_000 + 21_000) * U256::from(2_000_000_000u64);
        assert_eq!(op.required_prefund(), expected);
    }

    #[test]
    fn required_prefund_triples_verification_gas_when_sponsored() {
        let unsponsored = priced_op();
        let sponsored = UserOperation {
            paymaster_and_data: Bytes::from(vec![0xde, 0xad]),
            ..priced_op()
        };

        let without_vgl = |op: &UserOperation| UserOperation {
            verification_gas_limit: U256::zero(),
            ..op.clone()
        };

        let unsponsored_vgl =
            unsponsored.required_prefund() - without_vgl(&unsponsored).required_prefund();
        let sponsored_vgl =
            sponsored.required_prefund() - without_vgl(&sponsored).required_prefund();

        assert_eq!(sponsored_vgl, unsponsored_vgl * U256::from(3u64));
    }

    #[test]
    fn required_prefund_is_monotonic() {
        let base = priced_op();
        let before = base.required_prefund();

        let bumped = [
            UserOperation {
                call_gas_limit: base.call_gas_limit + U256::one(),
                ..base.clone()
            },
            UserOperation {
                verification_gas_limit: base.verification_gas_limit + U256::one(),
                ..base.clone()
            },
            UserOperation {
                pre_verification_gas: base.pre_verification_gas + U256::one(),
                ..base.clone()
            },
            UserOperation {
                max_fee_per_gas: base.max_fee_per_gas + U256::one(),
                ..base.clone()
            },
        ];

        for op in bumped {
            assert!(op.required_prefund() >= before);
        }
    }

    #[test]
    fn required_prefund_saturates() {
        let op = UserOperation {
            call_gas_limit: U256::MAX,
            max_fee_per_gas: U256::MAX,
            ..Default::default()
        };
        assert_eq!(op.required_prefund(), U256::MAX);
    }
}
