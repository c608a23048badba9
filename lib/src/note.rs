use ark_bn254::Fr;
use ark_ff::PrimeField;
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::crypto::{FieldHasher, HashError};

// The size of our secret and nullifier in bytes.
// 31 bytes keeps both strictly below the BN254 modulus.
pub const NOTE_SIZE: usize = 31;

/// Prefix of the textual note format.
pub const NOTE_PREFIX: &str = "innocent";

/// Errors parsing a textual note.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NoteError {
    #[error("note must look like innocent-<denomination>-0x<hex>")]
    Format,
    #[error("invalid note hex: {0}")]
    Hex(String),
    #[error("note preimage must be {} bytes, got {0}", 2 * NOTE_SIZE)]
    Length(usize),
}

/// Represents a deposit note, containing the core
/// cryptographic secrets.
/// The `secret` provides ownership, and the `nullifier`
/// prevents double-spending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub nullifier: [u8; NOTE_SIZE],
    pub secret: [u8; NOTE_SIZE],
}

impl Note {
    /// Creates a new Note with a cryptographically secure
    /// random secret and nullifier.
    pub fn new() -> Self {
        let mut secret = [0u8; NOTE_SIZE];
        let mut nullifier = [0u8; NOTE_SIZE];

        OsRng.fill_bytes(&mut nullifier);
        OsRng.fill_bytes(&mut secret);

        Self { nullifier, secret }
    }

    /// Nullifier as a field element (little-endian, as the client packs it).
    pub fn nullifier_field(&self) -> Fr {
        Fr::from_le_bytes_mod_order(&self.nullifier)
    }

    /// Secret as a field element.
    pub fn secret_field(&self) -> Fr {
        Fr::from_le_bytes_mod_order(&self.secret)
    }

    /// The commitment stored in the tree: `hash(nullifier, secret)`.
    pub fn commitment<H: FieldHasher>(&self, hasher: &H) -> Result<Fr, HashError> {
        hasher.hash(&[self.nullifier_field(), self.secret_field()])
    }

    /// The nullifier hash revealed at withdrawal: `hash(nullifier)`.
    pub fn nullifier_hash<H: FieldHasher>(&self, hasher: &H) -> Result<Fr, HashError> {
        hasher.hash(&[self.nullifier_field()])
    }

    /// Preimage bytes, `nullifier || secret`.
    pub fn preimage(&self) -> [u8; 2 * NOTE_SIZE] {
        let mut out = [0u8; 2 * NOTE_SIZE];
        out[..NOTE_SIZE].copy_from_slice(&self.nullifier);
        out[NOTE_SIZE..].copy_from_slice(&self.secret);
        out
    }

    /// Textual note for a given pool denomination.
    pub fn to_note_string(&self, denomination: u128) -> String {
        format!(
            "{NOTE_PREFIX}-{denomination}-0x{}",
            hex::encode(self.preimage())
        )
    }
}

/// Parsed `innocent-<denomination>-0x<hex>` note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedNote {
    pub denomination: u128,
    pub note: Note,
}

impl FromStr for ParsedNote {
    type Err = NoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, '-');
        let (Some(prefix), Some(denomination), Some(body)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(NoteError::Format);
        };
        if prefix != NOTE_PREFIX {
            return Err(NoteError::Format);
        }
        let denomination = denomination.parse().map_err(|_| NoteError::Format)?;

        let body = body.strip_prefix("0x").ok_or(NoteError::Format)?;
        let bytes = hex::decode(body).map_err(|e| NoteError::Hex(e.to_string()))?;
        if bytes.len() != 2 * NOTE_SIZE {
            return Err(NoteError::Length(bytes.len()));
        }

        let mut nullifier = [0u8; NOTE_SIZE];
        let mut secret = [0u8; NOTE_SIZE];
        nullifier.copy_from_slice(&bytes[..NOTE_SIZE]);
        secret.copy_from_slice(&bytes[NOTE_SIZE..]);

        Ok(Self {
            denomination,
            note: Note { nullifier, secret },
        })
    }
}

/// Partial hex representation for display.
/// Never prints the full secret material.
impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Note(nullifier: 0x{}..., secret: 0x{}...)",
            hex::encode(&self.nullifier[0..4]),
            hex::encode(&self.secret[0..4])
        )
    }
}

impl Default for Note {
    fn default() -> Self {
        Self::new()
    }
}
