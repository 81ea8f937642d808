use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod domain;
mod lookup;
mod params;
mod table;

pub use domain::*;
pub use lookup::*;
pub use params::*;
pub use table::*;

/// Unique primary key of a table row.
pub type RowId = u64;

/// The height of a block (1-based, 0 = genesis).
pub type BlockHeight = i64;

/// A fixed-length span of consecutive blocks.
pub type Cycle = i64;

/// Internal numeric id of an on-chain account.
pub type AccountId = u64;

/// A coin amount in base units (smallest denomination).
pub type Amount = i64;

pub type Timestamp = chrono::DateTime<chrono::Utc>;

const ADDRESS_BODY_LEN: usize = 33;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// The class of an on-chain address, given by its textual prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressKind {
    Ed25519,
    Secp256k1,
    P256,
    Contract,
}

impl AddressKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            AddressKind::Ed25519 => "tz1",
            AddressKind::Secp256k1 => "tz2",
            AddressKind::P256 => "tz3",
            AddressKind::Contract => "KT1",
        }
    }

    fn from_prefix(s: &str) -> Option<Self> {
        match s {
            "tz1" => Some(AddressKind::Ed25519),
            "tz2" => Some(AddressKind::Secp256k1),
            "tz3" => Some(AddressKind::P256),
            "KT1" => Some(AddressKind::Contract),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("unknown address prefix")]
    UnknownPrefix,

    #[error("invalid address length")]
    InvalidLength,

    #[error("invalid address character")]
    InvalidCharacter,
}

/// A validated textual on-chain address.
///
/// Parsing checks the prefix and the base58 body. Full checksum
/// verification belongs to the protocol layer and is not performed here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    kind: AddressKind,
    body: String,
}

impl Address {
    pub fn kind(&self) -> AddressKind {
        self.kind
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 3 + ADDRESS_BODY_LEN {
            return Err(AddressError::InvalidLength);
        }
        let kind = AddressKind::from_prefix(&s[..3]).ok_or(AddressError::UnknownPrefix)?;
        let body = &s[3..];
        if !body.chars().all(|c| BASE58_ALPHABET.contains(c)) {
            return Err(AddressError::InvalidCharacter);
        }
        Ok(Address {
            kind,
            body: body.to_string(),
        })
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.body)
    }
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("store error")]
    StoreError(#[from] StoreError),

    #[error("chain has no blocks yet")]
    EmptyChain,
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("error binding listener")]
    BindError(#[source] std::io::Error),

    #[error("error during shutdown")]
    ShutdownError(#[source] std::io::Error),

    #[error("internal error")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}
