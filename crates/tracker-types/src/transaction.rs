//! Transaction types tracked by the engine.
//!
//! A [`Transaction`] is the local record of something the wallet submitted. A
//! [`NodeTransaction`] is what a remote node reports for the same hash; it is
//! only ever used to update the local record and is never stored as-is.

use crate::utils::{current_timestamp, with_0x_prefix, without_0x_prefix};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Blockchain transaction hash representation.
///
/// Stores hashes as raw bytes; serialized as a 0x-prefixed hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionHash(pub Vec<u8>);

impl TransactionHash {
	/// Parses a hex string, with or without the 0x prefix.
	pub fn from_hex(value: &str) -> Result<Self, hex::FromHexError> {
		hex::decode(without_0x_prefix(value)).map(Self)
	}

	/// Returns the 0x-prefixed hex form of the hash.
	pub fn to_hex(&self) -> String {
		with_0x_prefix(&hex::encode(&self.0))
	}
}

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_hex())
	}
}

impl Serialize for TransactionHash {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_hex())
	}
}

impl<'de> Deserialize<'de> for TransactionHash {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let value = String::deserialize(deserializer)?;
		Self::from_hex(&value)
			.map_err(|e| serde::de::Error::custom(format!("Invalid transaction hash: {}", e)))
	}
}

/// Unique identifier of a local transaction record.
///
/// Derived from chain, sender, nonce and hash. Sender, nonce and chain group
/// the transactions competing for one nonce slot; the hash keeps a replacement
/// transaction distinct from the one it replaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
	/// Derives the id for a transaction.
	pub fn derive(chain_id: u64, from: &str, nonce: u64, hash: &TransactionHash) -> Self {
		Self(format!(
			"{}-{}-{}-{}",
			chain_id,
			with_0x_prefix(from).to_lowercase(),
			nonce,
			hash.to_hex()
		))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for TransactionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for TransactionId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

impl From<&str> for TransactionId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

/// Lifecycle state of a local transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
	/// Submitted locally, not yet seen in a block.
	Pending,
	/// Included in a block according to the node.
	Completed,
	/// Known to have failed.
	Failed,
}

impl fmt::Display for TransactionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			TransactionState::Pending => "pending",
			TransactionState::Completed => "completed",
			TransactionState::Failed => "failed",
		};
		f.write_str(name)
	}
}

/// Local record of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
	pub id: TransactionId,
	pub hash: TransactionHash,
	pub chain_id: u64,
	/// Sender address.
	pub from: String,
	/// Recipient or contract address; `None` for contract creation.
	pub to: Option<String>,
	pub nonce: u64,
	/// Value in wei as a decimal string.
	pub value: String,
	/// Gas price in wei as a decimal string.
	pub gas_price: String,
	pub state: TransactionState,
	/// Block the transaction was included in, set on completion.
	pub block_number: Option<u64>,
	pub created_at: u64,
	pub updated_at: u64,
}

impl Transaction {
	/// Returns true if `other` occupies the same sender + nonce + chain slot.
	pub fn shares_nonce_with(&self, other: &Transaction) -> bool {
		self.chain_id == other.chain_id
			&& self.nonce == other.nonce
			&& self.from.eq_ignore_ascii_case(&other.from)
	}
}

/// A locally submitted transaction that has not been recorded yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
	pub hash: TransactionHash,
	pub chain_id: u64,
	pub from: String,
	#[serde(default)]
	pub to: Option<String>,
	pub nonce: u64,
	#[serde(default = "zero_amount")]
	pub value: String,
	#[serde(default = "zero_amount")]
	pub gas_price: String,
}

fn zero_amount() -> String {
	"0".to_string()
}

impl From<NewTransaction> for Transaction {
	fn from(submitted: NewTransaction) -> Self {
		let now = current_timestamp();
		Transaction {
			id: TransactionId::derive(
				submitted.chain_id,
				&submitted.from,
				submitted.nonce,
				&submitted.hash,
			),
			hash: submitted.hash,
			chain_id: submitted.chain_id,
			from: submitted.from,
			to: submitted.to,
			nonce: submitted.nonce,
			value: submitted.value,
			gas_price: submitted.gas_price,
			state: TransactionState::Pending,
			block_number: None,
			created_at: now,
			updated_at: now,
		}
	}
}

/// A node's view of a transaction that has been included in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTransaction {
	pub hash: TransactionHash,
	pub block_number: u64,
	/// Sender as reported by the node.
	pub from: Option<String>,
}

/// Predicate over local transactions.
///
/// `None` fields match anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionFilter {
	pub chain_id: Option<u64>,
	pub state: Option<TransactionState>,
}

impl TransactionFilter {
	/// Pending transactions on one chain.
	pub fn pending(chain_id: u64) -> Self {
		Self {
			chain_id: Some(chain_id),
			state: Some(TransactionState::Pending),
		}
	}

	pub fn matches(&self, tx: &Transaction) -> bool {
		self.chain_id.is_none_or(|chain_id| chain_id == tx.chain_id)
			&& self.state.is_none_or(|state| state == tx.state)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn submitted(nonce: u64, hash: &str) -> NewTransaction {
		NewTransaction {
			hash: TransactionHash::from_hex(hash).unwrap(),
			chain_id: 1,
			from: "0xAbC0000000000000000000000000000000000001".to_string(),
			to: None,
			nonce,
			value: "0".to_string(),
			gas_price: "1".to_string(),
		}
	}

	#[test]
	fn test_id_distinguishes_replacements() {
		let original: Transaction = submitted(5, "0x01").into();
		let replacement: Transaction = submitted(5, "0x02").into();

		assert_ne!(original.id, replacement.id);
		assert!(original.shares_nonce_with(&replacement));
		assert_eq!(
			original.id.as_str(),
			"1-0xabc0000000000000000000000000000000000001-5-0x01"
		);
	}

	#[test]
	fn test_hash_serializes_as_hex() {
		let hash = TransactionHash(vec![0xde, 0xad]);
		let json = serde_json::to_string(&hash).unwrap();
		assert_eq!(json, "\"0xdead\"");

		let parsed: TransactionHash = serde_json::from_str("\"dead\"").unwrap();
		assert_eq!(parsed, hash);
		assert!(serde_json::from_str::<TransactionHash>("\"0xzz\"").is_err());
	}

	#[test]
	fn test_filter_matches() {
		let mut tx: Transaction = submitted(1, "0x01").into();
		assert!(TransactionFilter::pending(1).matches(&tx));
		assert!(!TransactionFilter::pending(2).matches(&tx));

		tx.state = TransactionState::Completed;
		assert!(!TransactionFilter::pending(1).matches(&tx));
		assert!(TransactionFilter::default().matches(&tx));
	}
}
