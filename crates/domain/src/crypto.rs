//! CryptoNote one-time key primitives.
//!
//! Keys travel as `monero` types; the arithmetic happens on
//! `curve25519-dalek` points and scalars. Every conversion goes through the
//! 32-byte encodings so the two crates never have to agree on internal types.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use monero::util::key::{PrivateKey, PublicKey};
use monero_generators::hash_to_point;
use sha3::{Digest, Keccak256};

use crate::model::KeyImage;

/// Shared secret `8·a·R` between a transaction key and a view key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KeyDerivation([u8; 32]);

impl KeyDerivation {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `Hs(D || varint(index))`.
    pub fn to_scalar(&self, output_index: u64) -> Scalar {
        let mut hasher = Keccak256::new();
        hasher.update(self.0);
        hasher.update(encode_varint(output_index));
        let digest: [u8; 32] = hasher.finalize().into();
        Scalar::from_bytes_mod_order(digest)
    }

    /// One-time output key `Hs·G + B` for the given spend key.
    pub fn derive_public_key(&self, output_index: u64, spend_key: &PublicKey) -> Option<PublicKey> {
        let base = decompress(spend_key)?;
        let point = EdwardsPoint::mul_base(&self.to_scalar(output_index)) + base;
        to_public_key(&point)
    }

    /// Recovers the spend key `P - Hs·G` an output key would have been built
    /// from. The result is only meaningful when compared against known keys.
    pub fn underive_public_key(
        &self,
        output_index: u64,
        output_key: &PublicKey,
    ) -> Option<PublicKey> {
        let point = decompress(output_key)?;
        let spend = point - EdwardsPoint::mul_base(&self.to_scalar(output_index));
        to_public_key(&spend)
    }

    /// One-time output secret `Hs + b`.
    pub fn derive_secret_key(
        &self,
        output_index: u64,
        spend_secret: &PrivateKey,
    ) -> Option<PrivateKey> {
        let secret = self.to_scalar(output_index) + to_scalar(spend_secret);
        PrivateKey::from_slice(secret.as_bytes()).ok()
    }
}

impl std::fmt::Debug for KeyDerivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyDerivation(..)")
    }
}

/// Computes `8·secret·public`. Returns `None` when `public` is not a valid
/// curve point, which callers treat as "nothing addressed to us".
pub fn generate_key_derivation(public: &PublicKey, secret: &PrivateKey) -> Option<KeyDerivation> {
    let point = decompress(public)?;
    let shared = (to_scalar(secret) * point).mul_by_cofactor();
    Some(KeyDerivation(shared.compress().to_bytes()))
}

/// Key image `x·Hp(P)` of a one-time output key pair.
pub fn generate_key_image(output_key: &PublicKey, output_secret: &PrivateKey) -> Option<KeyImage> {
    let bytes: [u8; 32] = output_key.as_bytes().try_into().ok()?;
    let image = to_scalar(output_secret) * hash_to_point(bytes);
    Some(KeyImage(image.compress().to_bytes()))
}

fn to_scalar(key: &PrivateKey) -> Scalar {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(key.as_bytes());
    Scalar::from_bytes_mod_order(bytes)
}

fn decompress(key: &PublicKey) -> Option<EdwardsPoint> {
    CompressedEdwardsY::from_slice(key.as_bytes())
        .ok()?
        .decompress()
}

fn to_public_key(point: &EdwardsPoint) -> Option<PublicKey> {
    PublicKey::from_slice(point.compress().as_bytes()).ok()
}

fn encode_varint(mut value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(seed: u8) -> PrivateKey {
        let scalar = Scalar::from_bytes_mod_order(Keccak256::digest([seed]).into());
        PrivateKey::from_slice(scalar.as_bytes()).unwrap()
    }

    #[test]
    fn varint_matches_cryptonote_encoding() {
        assert_eq!(encode_varint(0), vec![0x00]);
        assert_eq!(encode_varint(127), vec![0x7f]);
        assert_eq!(encode_varint(128), vec![0x80, 0x01]);
        assert_eq!(encode_varint(300), vec![0xac, 0x02]);
    }

    #[test]
    fn sender_and_receiver_derive_the_same_secret() {
        let tx_secret = secret(1);
        let view_secret = secret(2);
        let tx_public = PublicKey::from_private_key(&tx_secret);
        let view_public = PublicKey::from_private_key(&view_secret);

        let sender = generate_key_derivation(&view_public, &tx_secret).unwrap();
        let receiver = generate_key_derivation(&tx_public, &view_secret).unwrap();
        assert!(sender == receiver);
    }

    #[test]
    fn underive_inverts_derive() {
        let derivation = generate_key_derivation(
            &PublicKey::from_private_key(&secret(3)),
            &secret(4),
        )
        .unwrap();
        let spend = PublicKey::from_private_key(&secret(5));

        let output_key = derivation.derive_public_key(7, &spend).unwrap();
        assert_eq!(derivation.underive_public_key(7, &output_key), Some(spend));
        assert_ne!(derivation.underive_public_key(8, &output_key), Some(spend));
    }

    #[test]
    fn derived_secret_matches_derived_public_key() {
        let derivation = generate_key_derivation(
            &PublicKey::from_private_key(&secret(6)),
            &secret(7),
        )
        .unwrap();
        let spend_secret = secret(8);
        let spend_public = PublicKey::from_private_key(&spend_secret);

        let output_secret = derivation.derive_secret_key(0, &spend_secret).unwrap();
        let output_public = derivation.derive_public_key(0, &spend_public).unwrap();
        assert_eq!(PublicKey::from_private_key(&output_secret), output_public);
    }

    #[test]
    fn key_images_are_deterministic_and_distinct() {
        let x1 = secret(9);
        let x2 = secret(10);
        let p1 = PublicKey::from_private_key(&x1);
        let p2 = PublicKey::from_private_key(&x2);

        let image = generate_key_image(&p1, &x1).unwrap();
        assert_eq!(generate_key_image(&p1, &x1), Some(image));
        assert_ne!(generate_key_image(&p2, &x2), Some(image));
    }
}
