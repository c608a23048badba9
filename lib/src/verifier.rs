//! Proof verifier adapter and public-signal schemas.
//!
//! The pool treats the zk verifier as an oracle: a proof plus an ordered
//! vector of public signals in, a verdict out. The order of that vector is a
//! wire contract with the compiled circuit, so each pool variant pins it as a
//! [`SignalSchema`].

use alloy_primitives::{Address, U256};
use ark_bn254::Fr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{address_to_field, field_serde, u256_to_field, FieldHasher};
use crate::merkle_tree::MerklePath;
use crate::note::Note;
use crate::policy::app_commitment;

/// Opaque proof bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Proof(pub Vec<u8>);

impl Proof {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// The verifier could not produce a verdict.
#[derive(Debug, Error)]
#[error("verifier fault: {0}")]
pub struct VerifierFault(pub String);

/// Proof verification oracle.
pub trait ProofVerifier {
    /// `Ok(true)` only for a proof valid against exactly these signals.
    fn verify(&self, proof: &Proof, public_signals: &[Fr]) -> Result<bool, VerifierFault>;
}

/// Extra public inputs of the shares variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareClaim {
    /// Fee index snapshot bound into the deposit leaf.
    pub fees_accrued: U256,
    /// Shares being withdrawn.
    pub share_amount: U256,
}

/// Public inputs of a withdrawal, before schema encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicInputs {
    #[serde(with = "field_serde")]
    pub root: Fr,
    #[serde(with = "field_serde")]
    pub nullifier_hash: Fr,
    pub recipient: Address,
    pub relayer: Address,
    pub fee: U256,
    pub refund: U256,
    /// Present exactly for the shares variant.
    pub share_claim: Option<ShareClaim>,
}

/// Errors encoding public inputs under a schema.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema {0:?} requires a share claim")]
    MissingShareClaim(SignalSchema),
    #[error("schema {0:?} does not accept a share claim")]
    UnexpectedShareClaim(SignalSchema),
}

/// Versioned public-signal layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalSchema {
    /// `[root, nullifierHash, recipient, relayer, fee, refund]`
    BaseV1,
    /// `BaseV1` followed by `[feesAccrued, shareAmount]`
    SharesV2,
}

const BASE_V1_LABELS: [&str; 6] = ["root", "nullifierHash", "recipient", "relayer", "fee", "refund"];
const SHARES_V2_LABELS: [&str; 8] = [
    "root",
    "nullifierHash",
    "recipient",
    "relayer",
    "fee",
    "refund",
    "feesAccrued",
    "shareAmount",
];

impl SignalSchema {
    /// Signal names in wire order.
    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            SignalSchema::BaseV1 => &BASE_V1_LABELS,
            SignalSchema::SharesV2 => &SHARES_V2_LABELS,
        }
    }

    pub fn len(&self) -> usize {
        self.labels().len()
    }

    /// Encode `inputs` in wire order.
    pub fn encode(&self, inputs: &PublicInputs) -> Result<Vec<Fr>, SchemaError> {
        let mut signals = vec![
            inputs.root,
            inputs.nullifier_hash,
            address_to_field(inputs.recipient),
            address_to_field(inputs.relayer),
            u256_to_field(inputs.fee),
            u256_to_field(inputs.refund),
        ];

        match (self, &inputs.share_claim) {
            (SignalSchema::BaseV1, None) => {}
            (SignalSchema::BaseV1, Some(_)) => {
                return Err(SchemaError::UnexpectedShareClaim(*self));
            }
            (SignalSchema::SharesV2, Some(claim)) => {
                signals.push(u256_to_field(claim.fees_accrued));
                signals.push(u256_to_field(claim.share_amount));
            }
            (SignalSchema::SharesV2, None) => {
                return Err(SchemaError::MissingShareClaim(*self));
            }
        }

        Ok(signals)
    }
}

/// Cleartext withdraw witness, standing in for a zk proof in simulations.
///
/// Carries the private inputs of the withdraw circuit together with the
/// public signals it was produced for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawWitness {
    #[serde(with = "field_serde")]
    pub nullifier: Fr,
    #[serde(with = "field_serde")]
    pub secret: Fr,
    pub path: MerklePath,
    #[serde(with = "field_serde::seq")]
    pub public_signals: Vec<Fr>,
}

impl WithdrawWitness {
    /// Build the witness for `note` and encode it as a [`Proof`].
    pub fn prove(
        note: &Note,
        path: MerklePath,
        schema: SignalSchema,
        inputs: &PublicInputs,
    ) -> Result<Proof, VerifierFault> {
        let public_signals = schema
            .encode(inputs)
            .map_err(|e| VerifierFault(e.to_string()))?;
        let witness = Self {
            nullifier: note.nullifier_field(),
            secret: note.secret_field(),
            path,
            public_signals,
        };
        serde_json::to_vec(&witness)
            .map(Proof)
            .map_err(|e| VerifierFault(e.to_string()))
    }
}

/// Verifier that checks the withdraw relation in the clear.
///
/// Accepts iff the witness was produced for exactly these signals, its path
/// spans all `levels` of the tree, the leaf derived from the witness hashes
/// up to the signalled root, and the nullifier hashes to the signalled
/// nullifier hash.
#[derive(Debug, Clone)]
pub struct TransparentVerifier<H> {
    hasher: H,
    schema: SignalSchema,
    levels: usize,
}

impl<H: FieldHasher> TransparentVerifier<H> {
    /// `levels` must equal the depth of the pool's tree.
    pub fn new(hasher: H, schema: SignalSchema, levels: usize) -> Self {
        Self {
            hasher,
            schema,
            levels,
        }
    }
}

impl<H: FieldHasher> ProofVerifier for TransparentVerifier<H> {
    fn verify(&self, proof: &Proof, public_signals: &[Fr]) -> Result<bool, VerifierFault> {
        if public_signals.len() != self.schema.len() {
            return Err(VerifierFault(format!(
                "expected {} public signals, got {}",
                self.schema.len(),
                public_signals.len()
            )));
        }
        let witness: WithdrawWitness = serde_json::from_slice(proof.as_bytes())
            .map_err(|e| VerifierFault(format!("malformed proof: {e}")))?;

        if witness.public_signals != public_signals {
            return Ok(false);
        }
        if !witness.path.spans(self.levels) {
            return Ok(false);
        }

        let fault = |e: crate::crypto::HashError| VerifierFault(e.to_string());
        let commitment = self
            .hasher
            .hash(&[witness.nullifier, witness.secret])
            .map_err(fault)?;
        let leaf = match self.schema {
            SignalSchema::BaseV1 => commitment,
            SignalSchema::SharesV2 => {
                app_commitment(&self.hasher, commitment, public_signals[6], public_signals[7])
                    .map_err(fault)?
            }
        };

        let root = witness.path.compute_root(&self.hasher, leaf).map_err(fault)?;
        let nullifier_hash = self.hasher.hash(&[witness.nullifier]).map_err(fault)?;

        Ok(root == public_signals[0] && nullifier_hash == public_signals[1])
    }
}

/// Verifier returning a fixed verdict.
#[derive(Debug, Clone, Copy)]
pub struct StaticVerifier(pub bool);

impl ProofVerifier for StaticVerifier {
    fn verify(&self, _proof: &Proof, _public_signals: &[Fr]) -> Result<bool, VerifierFault> {
        Ok(self.0)
    }
}
