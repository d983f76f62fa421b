//! Bundle Codec
//!
//! A bundle is a project's file map serialized to JSON, encrypted with
//! AES-256-CBC and gzip-compressed:
//!
//! ```text
//! { "Main.tont": "...", "public/index.html": "..." }
//!      │ serde_json
//!      ▼
//! hex(iv) ":" hex(ciphertext)      key = sha256(BUNDLE_SECRET), fresh iv per call
//!      │ gzip
//!      ▼
//! bundle bytes
//! ```

use crate::error::{RuntimeError, RuntimeResult};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use host_bridge::CryptoBridge;
use rand::RngCore;
use std::collections::BTreeMap;
use std::io::{Read, Write};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Shared secret the bundle key is derived from
pub const BUNDLE_SECRET: &str = "tontoo-super-secret-key-123456789012345";

/// Extension of executable source files inside a bundle
pub const SOURCE_EXTENSION: &str = "tont";

/// Relative path to file content. Paths are unique and iterate in sorted order.
pub type FileMap = BTreeMap<String, String>;

const IV_LEN: usize = 16;

fn bundle_key() -> [u8; 32] {
    CryptoBridge::sha256(BUNDLE_SECRET.as_bytes())
}

/// True if `path` names a directive source file
pub fn is_source_path(path: &str) -> bool {
    path.rsplit_once('.')
        .is_some_and(|(_, ext)| ext == SOURCE_EXTENSION)
}

/// Encode a file map into bundle bytes
pub fn encode(files: &FileMap) -> RuntimeResult<Vec<u8>> {
    let json = serde_json::to_string(files)
        .map_err(|e| RuntimeError::config(format!("Failed to serialize bundle: {}", e)))?;
    let sealed = encrypt(json.as_bytes());

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(sealed.as_bytes())?;
    Ok(encoder.finish()?)
}

/// Encode a "distributable" bundle with full-line `#` comments removed from
/// every source file. Assets are left untouched.
pub fn encode_distributable(files: &FileMap) -> RuntimeResult<Vec<u8>> {
    let stripped: FileMap = files
        .iter()
        .map(|(path, content)| {
            let content = if is_source_path(path) {
                strip_comments(content)
            } else {
                content.clone()
            };
            (path.clone(), content)
        })
        .collect();
    encode(&stripped)
}

/// Remove lines whose trimmed text starts with `#`
pub fn strip_comments(code: &str) -> String {
    code.split('\n')
        .filter(|line| !line.trim().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decode bundle bytes back into the file map.
///
/// Any failure (bad gzip stream, malformed `iv:ciphertext` text, wrong key or
/// padding, invalid JSON) is a [`RuntimeError::CorruptBundle`].
pub fn decode(bytes: &[u8]) -> RuntimeResult<FileMap> {
    let mut sealed = String::new();
    GzDecoder::new(bytes)
        .read_to_string(&mut sealed)
        .map_err(|e| RuntimeError::corrupt_bundle(format!("decompression failed: {}", e)))?;

    let plaintext = decrypt(sealed.trim())?;

    serde_json::from_slice(&plaintext)
        .map_err(|e| RuntimeError::corrupt_bundle(format!("invalid file map: {}", e)))
}

fn encrypt(plaintext: &[u8]) -> String {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext =
        Aes256CbcEnc::new(&bundle_key().into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    format!("{}:{}", hex::encode(iv), hex::encode(ciphertext))
}

fn decrypt(sealed: &str) -> RuntimeResult<Vec<u8>> {
    let (iv_hex, data_hex) = sealed
        .split_once(':')
        .ok_or_else(|| RuntimeError::corrupt_bundle("missing iv separator"))?;

    let iv = hex::decode(iv_hex)
        .map_err(|e| RuntimeError::corrupt_bundle(format!("bad iv: {}", e)))?;
    let ciphertext = hex::decode(data_hex)
        .map_err(|e| RuntimeError::corrupt_bundle(format!("bad ciphertext: {}", e)))?;

    let cipher = Aes256CbcDec::new_from_slices(&bundle_key(), &iv)
        .map_err(|_| RuntimeError::corrupt_bundle(format!("iv must be {} bytes", IV_LEN)))?;

    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| RuntimeError::corrupt_bundle("decryption failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileMap {
        let mut files = FileMap::new();
        files.insert(
            "Main.tont".to_string(),
            "# entry point\nVB: PORT: \"9090\"\n  # indented comment\nconsole.log: \"hi\"".to_string(),
        );
        files.insert("public/index.html".to_string(), "<h1>Ünïcödé</h1>\n# not a comment".to_string());
        files.insert("ping.json".to_string(), "[]".to_string());
        files
    }

    #[test]
    fn test_round_trip() {
        let files = sample();
        let bytes = encode(&files).unwrap();
        assert_eq!(decode(&bytes).unwrap(), files);
    }

    #[test]
    fn test_round_trip_empty_map() {
        let files = FileMap::new();
        assert_eq!(decode(&encode(&files).unwrap()).unwrap(), files);
    }

    #[test]
    fn test_fresh_iv_per_encode() {
        let files = sample();
        assert_ne!(encode(&files).unwrap(), encode(&files).unwrap());
    }

    #[test]
    fn test_distributable_strips_only_source_comments() {
        let decoded = decode(&encode_distributable(&sample()).unwrap()).unwrap();

        assert_eq!(decoded["Main.tont"], "VB: PORT: \"9090\"\nconsole.log: \"hi\"");
        assert_eq!(decoded["public/index.html"], "<h1>Ünïcödé</h1>\n# not a comment");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode(b"definitely not gzip").unwrap_err();
        assert!(matches!(err, RuntimeError::CorruptBundle(_)));
    }

    #[test]
    fn test_decode_rejects_bad_separator_and_hex() {
        for text in ["no-separator-here", "zz:00", "00112233445566778899aabbccddeeff:abc"] {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(text.as_bytes()).unwrap();
            let bytes = encoder.finish().unwrap();

            let err = decode(&bytes).unwrap_err();
            assert!(matches!(err, RuntimeError::CorruptBundle(_)), "{}", text);
        }
    }

    #[test]
    fn test_decode_rejects_truncated_stream() {
        let bytes = encode(&sample()).unwrap();
        let err = decode(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, RuntimeError::CorruptBundle(_)));
    }

    #[test]
    fn test_decode_rejects_non_map_json() {
        let sealed = encrypt(b"[1, 2, 3]");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(sealed.as_bytes()).unwrap();

        let err = decode(&encoder.finish().unwrap()).unwrap_err();
        assert!(matches!(err, RuntimeError::CorruptBundle(_)));
    }

    #[test]
    fn test_is_source_path() {
        assert!(is_source_path("Main.tont"));
        assert!(is_source_path("tont-packets/db/Db.tont"));
        assert!(!is_source_path("public/index.html"));
        assert!(!is_source_path("tont"));
    }
}
