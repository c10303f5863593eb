//! Keyed ESP cipher contexts
//!
//! A [`CipherSuite`] holds the expanded key schedule for one SA generation.
//! The per-packet entry points only receive the IV, the AAD and the buffer,
//! so no key expansion happens on the packet path.
//!
//! # IV construction
//!
//! ```text
//! CBC:  IV = random(block_size)
//! CTR:  IV = seq_lo | seq_hi                      (8 bytes, on the wire)
//!       counter block = salt | IV | 0x00000001    (RFC 3686)
//! GCM:  IV = seq_lo | seq_hi                      (8 bytes, on the wire)
//!       nonce = salt | IV                         (RFC 4106)
//! ```

use super::{CipherFamily, CryptoAlg, GCM_TAG_LEN, SALT_LEN};
use crate::ipsec::{Error, Result};
use aes::{Aes128, Aes192, Aes256};
use aes_gcm::{
    aead::{consts::U12, generic_array::GenericArray, AeadInPlace},
    Aes128Gcm, Aes256Gcm, AesGcm,
};
use cipher::{
    block_padding::NoPadding, BlockCipher, BlockDecryptMut, BlockEncryptMut, InnerIvInit,
    KeyInit, StreamCipher,
};
use ctr::{Ctr128BE, CtrCore};
use des::{Des, TdesEde3};
use rand::RngCore;

type Aes192Gcm = AesGcm<Aes192, U12>;

#[derive(Clone)]
enum BlockKey {
    Des(Des),
    Tdes(TdesEde3),
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

#[derive(Clone)]
enum AesKey {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

#[derive(Clone)]
enum GcmKey {
    Aes128(Box<Aes128Gcm>),
    Aes192(Box<Aes192Gcm>),
    Aes256(Box<Aes256Gcm>),
}

#[derive(Clone)]
enum Engine {
    Null,
    Cbc(BlockKey),
    Ctr { key: AesKey, salt: [u8; SALT_LEN] },
    Gcm { key: GcmKey, salt: [u8; SALT_LEN] },
}

/// Keyed cipher context for one SA generation
#[derive(Clone)]
pub struct CipherSuite {
    alg: CryptoAlg,
    engine: Engine,
}

impl std::fmt::Debug for CipherSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherSuite")
            .field("algorithm", &self.alg)
            .field("key", &"<redacted>")
            .finish()
    }
}

fn key_error(_: cipher::InvalidLength) -> Error {
    Error::CryptoError("cipher rejected key".into())
}

fn iv_error(_: cipher::InvalidLength) -> Error {
    Error::CryptoError("invalid IV length".into())
}

fn cbc_encrypt<C>(cipher: &C, iv: &[u8], data: &mut [u8]) -> Result<()>
where
    C: BlockEncryptMut + BlockCipher + Clone,
{
    let len = data.len();
    cbc::Encryptor::<C>::inner_iv_slice_init(cipher.clone(), iv)
        .map_err(iv_error)?
        .encrypt_padded_mut::<NoPadding>(data, len)
        .map_err(|_| Error::CryptoError("CBC input not block aligned".into()))?;
    Ok(())
}

fn cbc_decrypt<C>(cipher: &C, iv: &[u8], data: &mut [u8]) -> Result<()>
where
    C: BlockDecryptMut + BlockCipher + Clone,
{
    cbc::Decryptor::<C>::inner_iv_slice_init(cipher.clone(), iv)
        .map_err(iv_error)?
        .decrypt_padded_mut::<NoPadding>(data)
        .map_err(|_| Error::CryptoError("CBC input not block aligned".into()))?;
    Ok(())
}

fn ctr_apply(key: &AesKey, counter_block: &[u8], data: &mut [u8]) -> Result<()> {
    match key {
        AesKey::Aes128(c) => Ctr128BE::<Aes128>::from_core(
            CtrCore::inner_iv_slice_init(c.clone(), counter_block).map_err(iv_error)?,
        )
        .apply_keystream(data),
        AesKey::Aes192(c) => Ctr128BE::<Aes192>::from_core(
            CtrCore::inner_iv_slice_init(c.clone(), counter_block).map_err(iv_error)?,
        )
        .apply_keystream(data),
        AesKey::Aes256(c) => Ctr128BE::<Aes256>::from_core(
            CtrCore::inner_iv_slice_init(c.clone(), counter_block).map_err(iv_error)?,
        )
        .apply_keystream(data),
    }
    Ok(())
}

impl CipherSuite {
    /// Expand `key` for `alg`
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength` if the key does not match the algorithm
    /// - `InvalidParameter` if a CTR/GCM SA has no salt
    pub fn new(alg: CryptoAlg, key: &[u8], salt: Option<[u8; SALT_LEN]>) -> Result<Self> {
        if key.len() != alg.key_len() {
            return Err(Error::InvalidKeyLength {
                expected: alg.key_len(),
                actual: key.len(),
            });
        }

        let salt = match (alg.needs_salt(), salt) {
            (true, Some(salt)) => salt,
            (true, None) => {
                return Err(Error::InvalidParameter(format!("{} requires a salt", alg)))
            }
            (false, _) => [0u8; SALT_LEN],
        };

        let engine = match alg {
            CryptoAlg::None => Engine::Null,
            CryptoAlg::DesCbc => Engine::Cbc(BlockKey::Des(
                Des::new_from_slice(key).map_err(key_error)?,
            )),
            CryptoAlg::TripleDesCbc => Engine::Cbc(BlockKey::Tdes(
                TdesEde3::new_from_slice(key).map_err(key_error)?,
            )),
            CryptoAlg::AesCbc128 => Engine::Cbc(BlockKey::Aes128(
                Aes128::new_from_slice(key).map_err(key_error)?,
            )),
            CryptoAlg::AesCbc192 => Engine::Cbc(BlockKey::Aes192(
                Aes192::new_from_slice(key).map_err(key_error)?,
            )),
            CryptoAlg::AesCbc256 => Engine::Cbc(BlockKey::Aes256(
                Aes256::new_from_slice(key).map_err(key_error)?,
            )),
            CryptoAlg::AesCtr128 => Engine::Ctr {
                key: AesKey::Aes128(Aes128::new_from_slice(key).map_err(key_error)?),
                salt,
            },
            CryptoAlg::AesCtr192 => Engine::Ctr {
                key: AesKey::Aes192(Aes192::new_from_slice(key).map_err(key_error)?),
                salt,
            },
            CryptoAlg::AesCtr256 => Engine::Ctr {
                key: AesKey::Aes256(Aes256::new_from_slice(key).map_err(key_error)?),
                salt,
            },
            CryptoAlg::AesGcm128 => Engine::Gcm {
                key: GcmKey::Aes128(Box::new(
                    Aes128Gcm::new_from_slice(key).map_err(key_error)?,
                )),
                salt,
            },
            CryptoAlg::AesGcm192 => Engine::Gcm {
                key: GcmKey::Aes192(Box::new(
                    Aes192Gcm::new_from_slice(key).map_err(key_error)?,
                )),
                salt,
            },
            CryptoAlg::AesGcm256 => Engine::Gcm {
                key: GcmKey::Aes256(Box::new(
                    Aes256Gcm::new_from_slice(key).map_err(key_error)?,
                )),
                salt,
            },
        };

        Ok(CipherSuite { alg, engine })
    }

    /// Algorithm this context was keyed for
    pub fn alg(&self) -> CryptoAlg {
        self.alg
    }

    /// Fill the explicit IV for the packet carrying `seq`
    ///
    /// `iv` must be exactly `alg().iv_size()` bytes.
    pub fn write_iv<R: RngCore + ?Sized>(&self, seq: u64, rng: &mut R, iv: &mut [u8]) {
        match self.alg.family() {
            CipherFamily::Null => {}
            CipherFamily::Cbc => rng.fill_bytes(iv),
            CipherFamily::Ctr | CipherFamily::Aead => {
                iv[..4].copy_from_slice(&(seq as u32).to_be_bytes());
                iv[4..8].copy_from_slice(&((seq >> 32) as u32).to_be_bytes());
            }
        }
    }

    fn ctr_block(salt: &[u8; SALT_LEN], iv: &[u8]) -> [u8; 16] {
        let mut block = [0u8; 16];
        block[..4].copy_from_slice(salt);
        block[4..12].copy_from_slice(iv);
        block[12..].copy_from_slice(&1u32.to_be_bytes());
        block
    }

    fn gcm_nonce(salt: &[u8; SALT_LEN], iv: &[u8]) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(salt);
        nonce[4..].copy_from_slice(iv);
        nonce
    }

    /// Encrypt `data` in place
    ///
    /// `aad` is only consumed by AEAD algorithms, which also write their
    /// authentication tag into `tag` (16 bytes). Other families leave `tag`
    /// untouched.
    pub fn encrypt(&self, iv: &[u8], aad: &[u8], data: &mut [u8], tag: &mut [u8]) -> Result<()> {
        match &self.engine {
            Engine::Null => Ok(()),
            Engine::Cbc(key) => match key {
                BlockKey::Des(c) => cbc_encrypt(c, iv, data),
                BlockKey::Tdes(c) => cbc_encrypt(c, iv, data),
                BlockKey::Aes128(c) => cbc_encrypt(c, iv, data),
                BlockKey::Aes192(c) => cbc_encrypt(c, iv, data),
                BlockKey::Aes256(c) => cbc_encrypt(c, iv, data),
            },
            Engine::Ctr { key, salt } => {
                let block = Self::ctr_block(salt, iv);
                ctr_apply(key, &block, data)
            }
            Engine::Gcm { key, salt } => {
                if tag.len() != GCM_TAG_LEN {
                    return Err(Error::BufferTooShort {
                        required: GCM_TAG_LEN,
                        available: tag.len(),
                    });
                }
                let nonce = Self::gcm_nonce(salt, iv);
                let nonce = GenericArray::from_slice(&nonce);
                let computed = match key {
                    GcmKey::Aes128(c) => c.encrypt_in_place_detached(nonce, aad, data),
                    GcmKey::Aes192(c) => c.encrypt_in_place_detached(nonce, aad, data),
                    GcmKey::Aes256(c) => c.encrypt_in_place_detached(nonce, aad, data),
                }
                .map_err(|_| Error::CryptoError("AES-GCM encryption failed".into()))?;
                tag.copy_from_slice(&computed);
                Ok(())
            }
        }
    }

    /// Decrypt `data` in place
    ///
    /// For AEAD algorithms `tag` is verified against `aad` and the
    /// ciphertext. A mismatch yields [`Error::Integrity`] and leaves the
    /// plaintext unusable.
    pub fn decrypt(&self, iv: &[u8], aad: &[u8], data: &mut [u8], tag: &[u8]) -> Result<()> {
        match &self.engine {
            Engine::Null => Ok(()),
            Engine::Cbc(key) => match key {
                BlockKey::Des(c) => cbc_decrypt(c, iv, data),
                BlockKey::Tdes(c) => cbc_decrypt(c, iv, data),
                BlockKey::Aes128(c) => cbc_decrypt(c, iv, data),
                BlockKey::Aes192(c) => cbc_decrypt(c, iv, data),
                BlockKey::Aes256(c) => cbc_decrypt(c, iv, data),
            },
            Engine::Ctr { key, salt } => {
                let block = Self::ctr_block(salt, iv);
                ctr_apply(key, &block, data)
            }
            Engine::Gcm { key, salt } => {
                if tag.len() != GCM_TAG_LEN {
                    return Err(Error::Integrity);
                }
                let nonce = Self::gcm_nonce(salt, iv);
                let nonce = GenericArray::from_slice(&nonce);
                let tag = GenericArray::from_slice(tag);
                match key {
                    GcmKey::Aes128(c) => c.decrypt_in_place_detached(nonce, aad, data, tag),
                    GcmKey::Aes192(c) => c.decrypt_in_place_detached(nonce, aad, data, tag),
                    GcmKey::Aes256(c) => c.decrypt_in_place_detached(nonce, aad, data, tag),
                }
                .map_err(|_| Error::Integrity)
            }
        }
    }
}
