use std::{
    fmt,
    ops::{Add, AddAssign, Sub},
    str::FromStr,
};

use anyhow::anyhow;
use bitcoin::secp256k1::{XOnlyPublicKey, schnorr::Signature};
use bon::Builder;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

pub type BlockHeight = u64;

/// 10^24 base units make one coin.
pub const COIN_PRECISION: u128 = 1_000_000_000_000_000_000_000_000;

/// Blocks in a 30 day month at 10 minutes per block.
pub const BLOCKS_PER_MONTH: u128 = 4320;

pub const BYTES_PER_GB: u128 = 1_000_000_000;

/// Share of a contract payout withheld by the chain, in thousandths.
pub const PAYOUT_TAX_PER_MILLE: u128 = 39;

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl FromStr for Hash256 {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow!("Expected 32 bytes of hex, got {}", s))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

macro_rules! hash_id {
    ($name:ident) => {
        #[derive(
            Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Hash256);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

hash_id!(ContractId);
hash_id!(TransactionId);
hash_id!(BlockId);

/// Amount of money in base units. Serialized as a decimal string since
/// values routinely exceed what JSON numbers carry exactly.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Currency(pub u128);

impl Currency {
    pub const ZERO: Currency = Currency(0);

    pub fn new(value: u128) -> Self {
        Self(value)
    }

    pub fn coins(coins: u128) -> Self {
        Self(coins * COIN_PRECISION)
    }

    pub fn checked_add(self, other: Currency) -> Option<Currency> {
        self.0.checked_add(other.0).map(Currency)
    }

    pub fn checked_mul(self, factor: u128) -> Option<Currency> {
        self.0.checked_mul(factor).map(Currency)
    }

    pub fn saturating_sub(self, other: Currency) -> Currency {
        Currency(self.0.saturating_sub(other.0))
    }

    pub fn saturating_mul(self, factor: u128) -> Currency {
        Currency(self.0.saturating_mul(factor))
    }

    pub fn div(self, divisor: u128) -> Currency {
        Currency(self.0 / divisor)
    }

    /// What remains of a payout once the chain has withheld its tax.
    pub fn post_tax(self) -> Currency {
        self.saturating_sub(Currency(self.0 / 1000 * PAYOUT_TAX_PER_MILLE))
    }
}

impl Add for Currency {
    type Output = Currency;

    fn add(self, other: Currency) -> Currency {
        Currency(self.0.saturating_add(other.0))
    }
}

impl AddAssign for Currency {
    fn add_assign(&mut self, other: Currency) {
        *self = *self + other;
    }
}

impl Sub for Currency {
    type Output = Currency;

    fn sub(self, other: Currency) -> Currency {
        self.saturating_sub(other)
    }
}

impl std::iter::Sum for Currency {
    fn sum<I: Iterator<Item = Currency>>(iter: I) -> Self {
        iter.fold(Currency::ZERO, |acc, c| acc + c)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Currency {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Currency(s.trim().parse()?))
    }
}

impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Terms of a file contract as recorded on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct FileContract {
    pub file_size: u64,
    pub file_merkle_root: Hash256,
    pub window_start: BlockHeight,
    pub window_end: BlockHeight,
    /// Total value locked in the contract.
    pub payout: Currency,
    /// Paid to the host when a valid storage proof lands inside the window.
    pub host_payout: Currency,
    #[builder(default)]
    pub revision_number: u64,
}

impl FileContract {
    /// The last height at which a storage proof is accepted.
    pub fn due_height(&self) -> BlockHeight {
        self.window_end
    }

    fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update(self.file_size.to_le_bytes());
        hasher.update(self.file_merkle_root.0);
        hasher.update(self.window_start.to_le_bytes());
        hasher.update(self.window_end.to_le_bytes());
        hasher.update(self.payout.0.to_le_bytes());
        hasher.update(self.host_payout.0.to_le_bytes());
        hasher.update(self.revision_number.to_le_bytes());
    }
}

/// The transaction forming a new file contract, signed by the renter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractTransaction {
    pub contract: FileContract,
    pub renter_key: XOnlyPublicKey,
    pub renter_signature: Signature,
}

impl ContractTransaction {
    pub fn contract_id(&self) -> ContractId {
        let mut hasher = Sha256::new();
        hasher.update(b"file_contract");
        self.contract.hash_into(&mut hasher);
        hasher.update(self.renter_key.serialize());
        ContractId(Hash256(hasher.finalize().into()))
    }

    /// Digest the renter signs when forming the contract.
    pub fn sig_hash(contract: &FileContract, renter_key: &XOnlyPublicKey) -> Hash256 {
        let mut hasher = Sha256::new();
        hasher.update(b"file_contract_sig");
        contract.hash_into(&mut hasher);
        hasher.update(renter_key.serialize());
        Hash256(hasher.finalize().into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionTransaction {
    pub parent_id: ContractId,
    pub revision: FileContract,
    #[serde(default)]
    pub renter_signature: Option<Signature>,
    #[serde(default)]
    pub host_signature: Option<Signature>,
}

impl RevisionTransaction {
    pub fn new(parent_id: ContractId, revision: FileContract) -> Self {
        Self {
            parent_id,
            revision,
            renter_signature: None,
            host_signature: None,
        }
    }

    /// Digest both parties sign. Signatures are not part of it.
    pub fn sig_hash(&self) -> Hash256 {
        let mut hasher = Sha256::new();
        hasher.update(b"file_contract_revision");
        hasher.update(self.parent_id.0.0);
        self.revision.hash_into(&mut hasher);
        Hash256(hasher.finalize().into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProof {
    pub parent_id: ContractId,
    pub segment_index: u64,
    pub segment: Vec<u8>,
    pub hash_set: Vec<Hash256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionBody {
    FileContract(ContractTransaction),
    Revision(RevisionTransaction),
    StorageProof(StorageProof),
}

/// A chain transaction. `signatures` are the wallet's funding signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub body: TransactionBody,
    #[serde(default)]
    pub signatures: Vec<Signature>,
}

impl Transaction {
    pub fn unsigned(body: TransactionBody) -> Self {
        Self {
            body,
            signatures: vec![],
        }
    }

    pub fn id(&self) -> TransactionId {
        let mut hasher = Sha256::new();
        match &self.body {
            TransactionBody::FileContract(txn) => {
                hasher.update(b"txn_file_contract");
                hasher.update(txn.contract_id().0.0);
            }
            TransactionBody::Revision(txn) => {
                hasher.update(b"txn_revision");
                hasher.update(txn.sig_hash().0);
            }
            TransactionBody::StorageProof(proof) => {
                hasher.update(b"txn_storage_proof");
                hasher.update(proof.parent_id.0.0);
                hasher.update(proof.segment_index.to_le_bytes());
                hasher.update(&proof.segment);
                for h in &proof.hash_set {
                    hasher.update(h.0);
                }
            }
        }
        TransactionId(Hash256(hasher.finalize().into()))
    }

    /// The contract this transaction proves storage for, if it is a storage proof.
    pub fn storage_proof_for(&self) -> Option<ContractId> {
        match &self.body {
            TransactionBody::StorageProof(proof) => Some(proof.parent_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct Block {
    pub height: BlockHeight,
    pub id: BlockId,
    pub parent_id: BlockId,
    #[builder(default)]
    pub transactions: Vec<Transaction>,
}

/// One ordered notification from the consensus set. Reverted blocks are
/// listed tip first, applied blocks lowest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct ConsensusChange {
    pub id: u64,
    #[builder(default)]
    pub reverted_blocks: Vec<Block>,
    #[builder(default)]
    pub applied_blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub net_address: String,
    /// Price per byte per block.
    pub price: Currency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct HostSettings {
    #[serde(default)]
    #[builder(default)]
    pub net_address: String,
    pub total_storage: i64,
    pub max_filesize: u64,
    pub max_duration: BlockHeight,
    pub window_size: BlockHeight,
    /// Price per byte per block.
    pub price: Currency,
    pub collateral: Currency,
}

impl HostSettings {
    /// 200 coins per GB per month, expressed per byte per block.
    pub fn default_price() -> Currency {
        Currency(COIN_PRECISION / (BLOCKS_PER_MONTH * BYTES_PER_GB / 200))
    }
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            net_address: String::new(),
            total_storage: 10_000_000_000,
            max_filesize: 100_000_000_000,
            max_duration: 144 * 60,
            window_size: 288,
            price: Self::default_price(),
            collateral: Currency::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatus {
    pub block_height: BlockHeight,
    pub storage_remaining: i64,
    pub num_contracts: usize,
    pub profit: Currency,
    pub potential_profit: Currency,
    /// Average competing price per GB per month, absent without enough quotes.
    pub competition: Option<Currency>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_tax_withholds_share() {
        let payout = Currency::new(1_000_000);
        assert_eq!(payout.post_tax(), Currency::new(961_000));
        assert_eq!(Currency::ZERO.post_tax(), Currency::ZERO);
    }

    #[test]
    fn test_hash_parse_display() {
        let h = Hash256::digest(b"abc");
        let parsed: Hash256 = h.to_string().parse().unwrap();
        assert_eq!(h, parsed);
        assert!("abcd".parse::<Hash256>().is_err());
    }

    #[test]
    fn test_currency_serializes_as_string() {
        let c = Currency::coins(3);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, format!("\"{}\"", 3 * COIN_PRECISION));
    }

    #[test]
    fn test_default_price() {
        // 1e24 / 21.6e9
        assert_eq!(HostSettings::default_price(), Currency::new(46_296_296_296_296));
    }
}
