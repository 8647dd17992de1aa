use crate::types::UserOperation;
use anyhow::{anyhow, Context};
use ethers::types::{Address, Bytes, H256, U256};
use serde_json::{Map, Value};

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b.as_ref()))
}

/// Converts a value into its wire form: quantities become `0x`-prefixed
/// lowercase hex, byte strings become `0x`-prefixed hex, containers recurse.
pub trait Hexlify {
    fn hexlify(&self) -> Value;
}

impl Hexlify for U256 {
    fn hexlify(&self) -> Value {
        Value::String(fmt_u256(*self))
    }
}

impl Hexlify for u64 {
    fn hexlify(&self) -> Value {
        U256::from(*self).hexlify()
    }
}

impl Hexlify for Address {
    fn hexlify(&self) -> Value {
        Value::String(fmt_address(*self))
    }
}

impl Hexlify for H256 {
    fn hexlify(&self) -> Value {
        Value::String(fmt_h256(*self))
    }
}

impl Hexlify for Bytes {
    fn hexlify(&self) -> Value {
        Value::String(fmt_bytes(self))
    }
}

impl<T: Hexlify> Hexlify for Option<T> {
    fn hexlify(&self) -> Value {
        match self {
            Some(v) => v.hexlify(),
            None => Value::Null,
        }
    }
}

impl<T: Hexlify> Hexlify for [T] {
    fn hexlify(&self) -> Value {
        Value::Array(self.iter().map(Hexlify::hexlify).collect())
    }
}

impl<T: Hexlify> Hexlify for Vec<T> {
    fn hexlify(&self) -> Value {
        self.as_slice().hexlify()
    }
}

impl Hexlify for UserOperation {
    fn hexlify(&self) -> Value {
        let fields: [(&str, &dyn Hexlify); 11] = [
            ("sender", &self.sender),
            ("nonce", &self.nonce),
            ("initCode", &self.init_code),
            ("callData", &self.call_data),
            ("callGasLimit", &self.call_gas_limit),
            ("verificationGasLimit", &self.verification_gas_limit),
            ("preVerificationGas", &self.pre_verification_gas),
            ("maxFeePerGas", &self.max_fee_per_gas),
            ("maxPriorityFeePerGas", &self.max_priority_fee_per_gas),
            ("paymasterAndData", &self.paymaster_and_data),
            ("signature", &self.signature),
        ];

        let map: Map<String, Value> = fields
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.hexlify()))
            .collect();
        Value::Object(map)
    }
}

pub fn user_op_to_json(op: &UserOperation) -> Value {
    op.hexlify()
}

const GAS_LIMIT_FIELDS: [&str; 3] = ["callGasLimit", "verificationGasLimit", "preVerificationGas"];

/// Wire form sent to sponsors: gas limits that are still unresolved (zero)
/// are left out so the sponsor estimates them itself.
pub fn user_op_to_paymaster_json(op: &UserOperation) -> Value {
    let mut value = op.hexlify();
    if let Some(obj) = value.as_object_mut() {
        for key in GAS_LIMIT_FIELDS {
            if obj.get(key).and_then(Value::as_str) == Some("0x0") {
                obj.remove(key);
            }
        }
    }
    value
}

pub fn parse_u256_quantity(s: &str) -> anyhow::Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    Ok(U256::from_str_radix(s, 16)?)
}

/// Reads a quantity field that may be a hex string or a plain JSON number.
pub fn parse_u256_field(v: &Value, key: &str) -> anyhow::Result<U256> {
    match v.get(key) {
        Some(Value::String(s)) => {
            parse_u256_quantity(s).with_context(|| format!("invalid quantity in {key}"))
        }
        Some(Value::Number(n)) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| anyhow!("invalid numeric field {key}: {n}")),
        _ => Err(anyhow!("missing or invalid field {key}")),
    }
}

pub fn parse_bytes(s: &str) -> anyhow::Result<Bytes> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).context("invalid hex")?;
    Ok(Bytes::from(bytes))
}

pub fn parse_h256(s: &str) -> anyhow::Result<H256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("expected 32-byte hex, got {} bytes", bytes.len());
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(H256(arr))
}
