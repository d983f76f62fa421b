use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hashing and identifier helpers shared by the bundle codec and the
/// session layer.
pub struct CryptoBridge;

impl CryptoBridge {
	/// Raw SHA-256 digest of `data`
	pub fn sha256(data: &[u8]) -> [u8; 32] {
		let mut hasher = Sha256::new();
		hasher.update(data);
		hasher.finalize().into()
	}

	/// Lowercase hex SHA-256 of a UTF-8 string, the format stored in `users.json`
	pub fn sha256_hex(text: &str) -> String {
		hex::encode(Self::sha256(text.as_bytes()))
	}

	/// Fresh random identifier (UUID v4), used for session tokens and user ids
	pub fn random_id() -> String {
		Uuid::new_v4().to_string()
	}
}
