//! Field and hash adapter for the Innocent pool
//!
//! Everything above this module treats field elements as opaque values of the
//! BN254 scalar field and hashing as a black box behind [`FieldHasher`].
//! The default hasher is circom-compatible Poseidon.

use alloy_primitives::{Address, B256, U256};
use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use light_poseidon::{Poseidon, PoseidonError, PoseidonHasher as _};
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

/// Scalar field modulus `p` of BN254, in decimal.
pub const FIELD_SIZE: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

/// Hash and field element length in bytes
pub const HASH_LENGTH: usize = 32;

/// Seed of the canonical empty leaf, `keccak256(seed) mod p`.
///
/// Matches the zero element of the client-side `fixed-merkle-tree` mirror.
pub const ZERO_LEAF_SEED: &[u8] = b"tornado";

/// Failure inside the hash adapter.
#[derive(Debug, Error)]
pub enum HashError {
    /// Poseidon rejected the input arity or length.
    #[error("poseidon: {0}")]
    Poseidon(#[from] PoseidonError),
}

/// Error parsing a field element from its hex encoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldParseError {
    /// Input is not valid hex.
    #[error("invalid hex: {0}")]
    Hex(String),
    /// Input is longer than 32 bytes.
    #[error("field element must be at most 32 bytes, got {0}")]
    Length(usize),
    /// Input is not smaller than the field modulus.
    #[error("value is not a canonical field element")]
    NonCanonical,
}

/// Hash function over field elements.
///
/// Used for tree nodes (`hash(left, right)`), commitments
/// (`hash(nullifier, secret)`), nullifier hashes (`hash(nullifier)`) and the
/// shares-variant application commitment (`hash(commitment, fees, shares)`).
pub trait FieldHasher {
    /// Hash an ordered sequence of field elements.
    fn hash(&self, inputs: &[Fr]) -> Result<Fr, HashError>;

    /// Hash two children into their parent node.
    fn hash_pair(&self, left: Fr, right: Fr) -> Result<Fr, HashError> {
        self.hash(&[left, right])
    }
}

/// Circom-compatible Poseidon over BN254.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoseidonHasher;

impl FieldHasher for PoseidonHasher {
    fn hash(&self, inputs: &[Fr]) -> Result<Fr, HashError> {
        let mut poseidon = Poseidon::<Fr>::new_circom(inputs.len())?;
        Ok(poseidon.hash(inputs)?)
    }
}

/// Compute Keccak-256 hash of input data
pub fn keccak256<T: AsRef<[u8]>>(input: T) -> B256 {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; HASH_LENGTH];

    hasher.update(input.as_ref());
    hasher.finalize(&mut output);

    B256::from(output)
}

/// The canonical empty leaf, `keccak256("tornado") mod p`.
pub fn zero_leaf() -> Fr {
    Fr::from_be_bytes_mod_order(keccak256(ZERO_LEAF_SEED).as_slice())
}

/// Reduce an integer into the field.
pub fn u256_to_field(value: U256) -> Fr {
    Fr::from_be_bytes_mod_order(&value.to_be_bytes::<32>())
}

/// Read an address as a big-endian integer.
pub fn address_to_field(address: Address) -> Fr {
    Fr::from_be_bytes_mod_order(address.as_slice())
}

/// Big-endian 32-byte encoding of a field element
pub fn field_to_bytes_be(value: &Fr) -> [u8; HASH_LENGTH] {
    let bytes = value.into_bigint().to_bytes_be();
    let mut out = [0u8; HASH_LENGTH];
    out[HASH_LENGTH - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// `0x`-prefixed, zero-padded hex encoding of a field element.
pub fn field_to_hex(value: &Fr) -> String {
    format!("0x{}", hex::encode(field_to_bytes_be(value)))
}

/// Parse a big-endian hex string into a field element.
///
/// Rejects values that are not strictly smaller than the modulus rather than
/// reducing them, so every accepted string has exactly one field value.
pub fn field_from_hex(input: &str) -> Result<Fr, FieldParseError> {
    let digits = input.strip_prefix("0x").unwrap_or(input);
    let bytes = hex::decode(digits).map_err(|e| FieldParseError::Hex(e.to_string()))?;
    if bytes.len() > HASH_LENGTH {
        return Err(FieldParseError::Length(bytes.len()));
    }

    let mut padded = [0u8; HASH_LENGTH];
    padded[HASH_LENGTH - bytes.len()..].copy_from_slice(&bytes);

    let value = Fr::from_be_bytes_mod_order(&padded);
    if field_to_bytes_be(&value) != padded {
        return Err(FieldParseError::NonCanonical);
    }
    Ok(value)
}

/// Serde adapter encoding field elements as hex strings.
pub mod field_serde {
    use ark_bn254::Fr;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    use super::{field_from_hex, field_to_hex};

    pub fn serialize<S: Serializer>(value: &Fr, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&field_to_hex(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Fr, D::Error> {
        let raw = String::deserialize(deserializer)?;
        field_from_hex(&raw).map_err(D::Error::custom)
    }

    /// Same encoding for sequences.
    pub mod seq {
        use ark_bn254::Fr;
        use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

        use crate::crypto::{field_from_hex, field_to_hex};

        pub fn serialize<S: Serializer>(values: &[Fr], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(values.iter().map(field_to_hex))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Fr>, D::Error> {
            Vec::<String>::deserialize(deserializer)?
                .iter()
                .map(|raw| field_from_hex(raw).map_err(D::Error::custom))
                .collect()
        }
    }
}
