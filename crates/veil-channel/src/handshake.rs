use std::fmt;

use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroize;

use veil_core::errors::ExchangeError;

/// Fixed HKDF info label. Domain-separates this protocol from anything else
/// deriving keys from the same agreement primitive.
const HKDF_INFO: &[u8] = b"secure-chat";

/// Raw curve point length on the wire.
pub const KEY_LEN: usize = 32;

/// A 256-bit AEAD key derived for exactly one request/response exchange.
/// Never serialized, never logged; wiped when dropped.
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Result of one key exchange: the derived key and the serialized client
/// public key the service needs to perform the matching derivation.
#[derive(Debug)]
pub struct Handshake {
    pub key: SymmetricKey,
    pub client_public: [u8; 32],
}

/// Perform a full ephemeral key exchange against the service's published
/// public key (hex-encoded raw curve point).
///
/// A fresh key pair is generated on every call; the private half is consumed
/// by the agreement and never leaves this function. Nothing is cached, so
/// each request gets forward secrecy at the cost of one extra round trip.
pub fn establish(service_key_hex: &str) -> Result<Handshake, ExchangeError> {
    let raw = hex::decode(service_key_hex.trim())
        .map_err(|_| ExchangeError::KeyAgreement("service key is not valid hex".into()))?;
    let point: [u8; KEY_LEN] = raw
        .as_slice()
        .try_into()
        .map_err(|_| ExchangeError::KeyAgreement(format!("service key must be {KEY_LEN} bytes")))?;
    let service_public = PublicKey::from(point);

    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let client_public = PublicKey::from(&ephemeral);

    let shared = ephemeral.diffie_hellman(&service_public);
    // Low-order peer points collapse the shared secret to a constant.
    if !shared.was_contributory() {
        return Err(ExchangeError::KeyAgreement(
            "service key is a non-contributory point".into(),
        ));
    }

    let key = expand(shared.as_bytes())?;
    Ok(Handshake {
        key,
        client_public: client_public.to_bytes(),
    })
}

/// Expand a raw agreement output into a uniformly random 256-bit key.
/// Raw DH output is not uniformly distributed and must not key a cipher
/// directly. Empty salt and a fixed info label, matching the service side.
pub(crate) fn expand(shared: &[u8]) -> Result<SymmetricKey, ExchangeError> {
    let hk = Hkdf::<Sha256>::new(Some(&[]), shared);
    let mut okm = [0u8; 32];
    hk.expand(HKDF_INFO, &mut okm)
        .map_err(|_| ExchangeError::KeyAgreement("key expansion failed".into()))?;
    Ok(SymmetricKey(okm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use x25519_dalek::StaticSecret;

    #[test]
    fn establish_derives_matching_keys() {
        let service_secret = StaticSecret::random_from_rng(OsRng);
        let service_public = PublicKey::from(&service_secret);
        let service_hex = hex::encode(service_public.as_bytes());

        let handshake = establish(&service_hex).unwrap();

        // Service-side derivation from the client public key.
        let client_public = PublicKey::from(handshake.client_public);
        let shared = service_secret.diffie_hellman(&client_public);
        let service_key = expand(shared.as_bytes()).unwrap();

        assert_eq!(handshake.key.as_bytes(), service_key.as_bytes());
    }

    #[test]
    fn fresh_keys_every_call() {
        let service_secret = StaticSecret::random_from_rng(OsRng);
        let service_hex = hex::encode(PublicKey::from(&service_secret).as_bytes());

        let a = establish(&service_hex).unwrap();
        let b = establish(&service_hex).unwrap();
        assert_ne!(a.client_public, b.client_public);
        assert_ne!(a.key.as_bytes(), b.key.as_bytes());
    }

    #[test]
    fn rejects_invalid_hex() {
        let err = establish("not-hex-at-all").unwrap_err();
        assert!(matches!(err, ExchangeError::KeyAgreement(_)));
    }

    #[test]
    fn rejects_wrong_length() {
        let err = establish(&hex::encode([0u8; 16])).unwrap_err();
        assert!(matches!(err, ExchangeError::KeyAgreement(_)));
    }

    #[test]
    fn rejects_low_order_point() {
        // The identity point contributes nothing to the agreement.
        let err = establish(&hex::encode([0u8; 32])).unwrap_err();
        assert!(matches!(err, ExchangeError::KeyAgreement(_)));
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        let service_secret = StaticSecret::random_from_rng(OsRng);
        let service_hex = format!(
            "  {}\n",
            hex::encode(PublicKey::from(&service_secret).as_bytes())
        );
        assert!(establish(&service_hex).is_ok());
    }

    #[test]
    fn key_debug_hides_bytes() {
        let key = SymmetricKey::from_bytes([7u8; 32]);
        assert_eq!(format!("{key:?}"), "SymmetricKey(..)");
    }
}
