//! A thin layer over `libpaillier`.
//!
//! Besides giving the keys and ciphertexts their own types, this is where the
//! size of a modulus gets checked against the curve it's used with.
//! Signing encrypts values close to `q^3`, and these must never wrap around.
use std::fmt;

use libpaillier::{unknown_order::BigNumber, DecryptionKey, EncryptionKey};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::{compat::CSCurve, math::order};

/// The default size of a Paillier modulus, in bits.
pub const PAILLIER_BITS: usize = 2048;

/// Errors coming out of the Paillier engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaillierError {
    #[error("modulus is too small for this curve")]
    ModulusTooSmall,
    #[error("plaintext does not lie in [0, N)")]
    PlaintextOutOfRange,
    #[error("ciphertext is not valid for this key")]
    InvalidCiphertext,
    #[error("failed to generate a key pair")]
    KeyGeneration,
}

/// The smallest modulus we accept for a given curve.
///
/// This is `4 * q^3`, with `q` the order of the curve.
pub fn minimum_modulus<C: CSCurve>() -> BigNumber {
    let q = order::<C>();
    BigNumber::from(4u64) * &q * &q * &q
}

/// A Paillier ciphertext.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext(BigNumber);

/// The public half of a Paillier key pair.
#[derive(Clone, Serialize, Deserialize)]
pub struct PaillierPublicKey(EncryptionKey);

impl PaillierPublicKey {
    /// The modulus `N` of this key.
    pub fn n(&self) -> &BigNumber {
        self.0.n()
    }

    /// Check that this key is large enough to be used with a given curve.
    pub fn validate_for<C: CSCurve>(&self) -> Result<(), PaillierError> {
        if self.n() <= &minimum_modulus::<C>() {
            error!(
                bytes = self.n().to_bytes().len(),
                "paillier modulus is too small"
            );
            return Err(PaillierError::ModulusTooSmall);
        }
        Ok(())
    }

    /// Encrypt a plaintext in `[0, N)`, with fresh randomness.
    pub fn encrypt(
        &self,
        rng: &mut impl CryptoRngCore,
        m: &BigNumber,
    ) -> Result<Ciphertext, PaillierError> {
        if m < &BigNumber::zero() || m >= self.n() {
            return Err(PaillierError::PlaintextOutOfRange);
        }
        let nonce = loop {
            let nonce = BigNumber::from_rng(self.n(), &mut *rng);
            if nonce != BigNumber::zero() {
                break nonce;
            }
        };
        let (c, _) = self
            .0
            .encrypt(m.to_bytes(), Some(nonce))
            .ok_or(PaillierError::PlaintextOutOfRange)?;
        Ok(Ciphertext(c))
    }

    /// Produce an encryption of the sum of two plaintexts.
    pub fn add(&self, c1: &Ciphertext, c2: &Ciphertext) -> Result<Ciphertext, PaillierError> {
        self.0
            .add(&c1.0, &c2.0)
            .map(Ciphertext)
            .ok_or(PaillierError::InvalidCiphertext)
    }

    /// Produce an encryption of a plaintext multiplied by a public factor.
    pub fn mul_plain(&self, c: &Ciphertext, a: &BigNumber) -> Result<Ciphertext, PaillierError> {
        self.0
            .mul(&c.0, a)
            .map(Ciphertext)
            .ok_or(PaillierError::InvalidCiphertext)
    }

    /// Produce an encryption of a plaintext minus a public value, modulo `N`.
    pub fn sub_plain(
        &self,
        rng: &mut impl CryptoRngCore,
        c: &Ciphertext,
        m: &BigNumber,
    ) -> Result<Ciphertext, PaillierError> {
        let negated = (self.n() - m.nmod(self.n())).nmod(self.n());
        let c_neg = self.encrypt(rng, &negated)?;
        self.add(c, &c_neg)
    }
}

impl PartialEq for PaillierPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.n() == other.n()
    }
}

impl Eq for PaillierPublicKey {}

impl fmt::Debug for PaillierPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PaillierPublicKey").field(self.n()).finish()
    }
}

/// The secret half of a Paillier key pair.
#[derive(Clone, Serialize, Deserialize)]
pub struct PaillierSecretKey(DecryptionKey);

impl PaillierSecretKey {
    pub fn public_key(&self) -> PaillierPublicKey {
        PaillierPublicKey(EncryptionKey::from(&self.0))
    }

    /// Decrypt a ciphertext, returning the plaintext in `[0, N)`.
    pub fn decrypt(&self, c: &Ciphertext) -> Result<BigNumber, PaillierError> {
        self.0
            .decrypt(&c.0)
            .map(BigNumber::from_slice)
            .ok_or(PaillierError::InvalidCiphertext)
    }
}

impl fmt::Debug for PaillierSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PaillierSecretKey([redacted])")
    }
}

/// Generate a key pair of (about) `bits` bits, with no check on its size.
pub(crate) fn generate_unchecked(
    rng: &mut impl CryptoRngCore,
    bits: usize,
) -> Result<(PaillierPublicKey, PaillierSecretKey), PaillierError> {
    let (p, q) = loop {
        let p = BigNumber::prime_from_rng(bits / 2, &mut *rng);
        let q = BigNumber::prime_from_rng(bits / 2, &mut *rng);
        if p != q {
            break (p, q);
        }
    };
    let sk = DecryptionKey::with_primes_unchecked(&p, &q)
        .map(PaillierSecretKey)
        .ok_or(PaillierError::KeyGeneration)?;
    Ok((sk.public_key(), sk))
}

/// Generate a fresh key pair whose modulus has (about) `bits` bits.
///
/// Fails if the resulting modulus is too small for the curve.
pub fn generate<C: CSCurve>(
    rng: &mut impl CryptoRngCore,
    bits: usize,
) -> Result<(PaillierPublicKey, PaillierSecretKey), PaillierError> {
    let (pk, sk) = generate_unchecked(rng, bits)?;
    pk.validate_for::<C>()?;
    Ok((pk, sk))
}

#[cfg(test)]
mod test {
    use k256::Secp256k1;
    use rand::{rngs::StdRng, SeedableRng};
    use rand_core::OsRng;

    use super::*;

    #[test]
    fn test_homomorphisms() -> Result<(), PaillierError> {
        let (pk, sk) = generate::<Secp256k1>(&mut OsRng, 1024)?;
        let a = BigNumber::from(1234u64);
        let b = BigNumber::from(5678u64);
        let ca = pk.encrypt(&mut OsRng, &a)?;
        let cb = pk.encrypt(&mut OsRng, &b)?;

        assert_eq!(sk.decrypt(&ca)?, a);
        assert_eq!(sk.decrypt(&pk.add(&ca, &cb)?)?, &a + &b);
        assert_eq!(
            sk.decrypt(&pk.mul_plain(&ca, &BigNumber::from(3u64))?)?,
            &a * BigNumber::from(3u64)
        );
        assert_eq!(sk.decrypt(&pk.sub_plain(&mut OsRng, &cb, &a)?)?, &b - &a);
        Ok(())
    }

    #[test]
    fn test_encryption_is_randomized() -> Result<(), PaillierError> {
        let (pk, _) = generate::<Secp256k1>(&mut OsRng, 1024)?;
        let m = BigNumber::from(7u64);
        assert_ne!(pk.encrypt(&mut OsRng, &m)?, pk.encrypt(&mut OsRng, &m)?);
        assert_eq!(
            pk.encrypt(&mut OsRng, pk.n()),
            Err(PaillierError::PlaintextOutOfRange)
        );
        Ok(())
    }

    #[test]
    fn test_key_generation_follows_the_rng() -> Result<(), PaillierError> {
        let (pk1, _) = generate::<Secp256k1>(&mut StdRng::from_seed([7; 32]), 1024)?;
        let (pk2, _) = generate::<Secp256k1>(&mut StdRng::from_seed([7; 32]), 1024)?;
        let (pk3, _) = generate::<Secp256k1>(&mut StdRng::from_seed([8; 32]), 1024)?;
        assert_eq!(pk1, pk2);
        assert_ne!(pk1, pk3);
        Ok(())
    }

    #[test]
    fn test_small_modulus_is_rejected() {
        assert_eq!(
            generate::<Secp256k1>(&mut OsRng, 512).map(|_| ()),
            Err(PaillierError::ModulusTooSmall)
        );
        let q = order::<Secp256k1>();
        assert!(minimum_modulus::<Secp256k1>() > &q * &q * &q);
    }
}
