//! Shared-access-signature signing.
//!
//! Both Azure Storage and Service Bus sign a canonical string with
//! HMAC-SHA256 and transmit the base64 result. They differ in the key
//! encoding: storage account keys are base64, Service Bus policy keys are
//! used as raw bytes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::errors::{Error, Result};
use crate::secrets::SecretString;

type HmacSha256 = Hmac<Sha256>;

/// Produces the `sig` value for a string-to-sign.
pub trait SasSigner: Send + Sync {
    fn sign(&self, string_to_sign: &str) -> Result<String>;
}

/// HMAC-SHA256 signer over a shared key.
pub struct SharedKeySigner {
    key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for SharedKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKeySigner([REDACTED])")
    }
}

impl SharedKeySigner {
    /// Signer for a base64-encoded storage account key.
    pub fn from_base64(key: &SecretString) -> Result<Self> {
        let key = STANDARD.decode(key.expose_secret().trim()).map_err(|e| {
            Error::validation_field(format!("account_key must be base64: {}", e), "account_key")
        })?;
        Ok(Self { key: Zeroizing::new(key) })
    }

    /// Signer using the key's UTF-8 bytes.
    pub fn from_raw(key: &SecretString) -> Self {
        Self { key: Zeroizing::new(key.expose_secret().as_bytes().to_vec()) }
    }
}

impl SasSigner for SharedKeySigner {
    fn sign(&self, string_to_sign: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| Error::internal(format!("invalid signing key: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}

/// Percent-encode one query or token component.
pub fn encode_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_hmac_vector() {
        // RFC 4231 test case 2
        let signer = SharedKeySigner::from_raw(&SecretString::new("Jefe"));
        let sig = signer.sign("what do ya want for nothing?").unwrap();
        let expected = STANDARD.encode(
            [
                0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08, 0x95,
                0x75, 0xc7, 0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83, 0x9d, 0xec, 0x58, 0xb9,
                0x64, 0xec, 0x38, 0x43,
            ]
            .as_slice(),
        );
        assert_eq!(sig, expected);
    }

    #[test]
    fn test_base64_key_matches_raw_bytes() {
        let raw = SharedKeySigner::from_raw(&SecretString::new("account-key"));
        let encoded =
            SharedKeySigner::from_base64(&SecretString::new(STANDARD.encode("account-key"))).unwrap();
        assert_eq!(raw.sign("abc").unwrap(), encoded.sign("abc").unwrap());
    }

    #[test]
    fn test_invalid_base64_key() {
        let err = SharedKeySigner::from_base64(&SecretString::new("%%%")).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_encode_component() {
        assert_eq!(
            encode_component("https://ns.servicebus.windows.net/q"),
            "https%3A%2F%2Fns.servicebus.windows.net%2Fq"
        );
        assert_eq!(encode_component("a+b/c="), "a%2Bb%2Fc%3D");
    }
}
