//! Keyed ESP integrity contexts
//!
//! The ICV covers the ESP header, IV and ciphertext. With extended sequence
//! numbers the high 32 bits of the sequence are appended to the MAC input
//! but never transmitted (RFC 4303 Section 2.2.1).

use super::IntegAlg;
use crate::ipsec::{Error, Result};
use aes::Aes128;
use cmac::Cmac;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha384};
use subtle::ConstantTimeEq;

/// Longest truncated ICV produced by any supported algorithm
pub const MAX_ICV_LEN: usize = 24;

#[derive(Clone)]
enum Engine {
    None,
    Md5(Hmac<Md5>),
    Sha1(Hmac<Sha1>),
    Sha256(Hmac<Sha256>),
    Sha384(Hmac<Sha384>),
    Cmac(Box<Cmac<Aes128>>),
}

/// Keyed MAC context for one SA generation
#[derive(Clone)]
pub struct IntegSuite {
    alg: IntegAlg,
    engine: Engine,
}

impl std::fmt::Debug for IntegSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegSuite")
            .field("algorithm", &self.alg)
            .field("key", &"<redacted>")
            .finish()
    }
}

fn mac_into<M: Mac + Clone>(keyed: &M, data: &[u8], seq_hi: Option<u32>, out: &mut [u8]) {
    let mut mac = keyed.clone();
    mac.update(data);
    if let Some(hi) = seq_hi {
        mac.update(&hi.to_be_bytes());
    }
    let full = mac.finalize().into_bytes();
    let n = out.len();
    out.copy_from_slice(&full[..n]);
}

impl IntegSuite {
    /// Key the MAC for `alg`
    ///
    /// # Errors
    ///
    /// Returns `InvalidKeyLength` if the key does not match the algorithm
    pub fn new(alg: IntegAlg, key: &[u8]) -> Result<Self> {
        if key.len() != alg.key_len() {
            return Err(Error::InvalidKeyLength {
                expected: alg.key_len(),
                actual: key.len(),
            });
        }

        let rejected = |_| Error::CryptoError("MAC rejected key".into());
        let engine = match alg {
            IntegAlg::None => Engine::None,
            IntegAlg::HmacMd5_96 => Engine::Md5(Hmac::new_from_slice(key).map_err(rejected)?),
            IntegAlg::HmacSha1_96 => Engine::Sha1(Hmac::new_from_slice(key).map_err(rejected)?),
            IntegAlg::HmacSha256_96 | IntegAlg::HmacSha256_128 => {
                Engine::Sha256(Hmac::new_from_slice(key).map_err(rejected)?)
            }
            IntegAlg::HmacSha384_192 => {
                Engine::Sha384(Hmac::new_from_slice(key).map_err(rejected)?)
            }
            IntegAlg::Cmac96 => Engine::Cmac(Box::new(
                <Cmac<Aes128> as Mac>::new_from_slice(key).map_err(rejected)?,
            )),
        };

        Ok(IntegSuite { alg, engine })
    }

    /// Algorithm this context was keyed for
    pub fn alg(&self) -> IntegAlg {
        self.alg
    }

    /// Length of the ICV appended to each packet
    pub fn icv_len(&self) -> usize {
        self.alg.trunc_len()
    }

    /// Compute the truncated ICV over `data` into `out`
    ///
    /// `out` must be exactly `icv_len()` bytes.
    pub fn compute(&self, data: &[u8], seq_hi: Option<u32>, out: &mut [u8]) {
        match &self.engine {
            Engine::None => {}
            Engine::Md5(m) => mac_into(m, data, seq_hi, out),
            Engine::Sha1(m) => mac_into(m, data, seq_hi, out),
            Engine::Sha256(m) => mac_into(m, data, seq_hi, out),
            Engine::Sha384(m) => mac_into(m, data, seq_hi, out),
            Engine::Cmac(m) => mac_into(m.as_ref(), data, seq_hi, out),
        }
    }

    /// Verify `icv` against `data` in constant time
    pub fn verify(&self, data: &[u8], seq_hi: Option<u32>, icv: &[u8]) -> bool {
        let len = self.icv_len();
        if icv.len() != len {
            return false;
        }

        let mut expected = [0u8; MAX_ICV_LEN];
        self.compute(data, seq_hi, &mut expected[..len]);
        expected[..len].ct_eq(icv).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_suite(alg: IntegAlg) -> IntegSuite {
        IntegSuite::new(alg, &vec![0x0bu8; alg.key_len()]).unwrap()
    }

    #[test]
    fn test_rejects_wrong_key_length() {
        assert_eq!(
            IntegSuite::new(IntegAlg::HmacSha1_96, &[0u8; 16]).unwrap_err(),
            Error::InvalidKeyLength {
                expected: 20,
                actual: 16
            }
        );
    }

    #[test]
    fn test_compute_is_deterministic() {
        let suite = create_test_suite(IntegAlg::HmacSha256_128);
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        suite.compute(b"Hi There", None, &mut a);
        suite.compute(b"Hi There", None, &mut b);
        assert_eq!(a, b);
        assert_ne!(a, [0u8; 16]);
    }

    #[test]
    fn test_truncation_lengths() {
        for alg in [
            IntegAlg::HmacMd5_96,
            IntegAlg::HmacSha1_96,
            IntegAlg::HmacSha256_96,
            IntegAlg::HmacSha256_128,
            IntegAlg::HmacSha384_192,
            IntegAlg::Cmac96,
        ] {
            let suite = create_test_suite(alg);
            let mut icv = vec![0u8; suite.icv_len()];
            suite.compute(b"esp header and ciphertext", None, &mut icv);
            assert!(suite.verify(b"esp header and ciphertext", None, &icv), "{}", alg);
        }
    }

    #[test]
    fn test_verify_rejects_flipped_bit() {
        let suite = create_test_suite(IntegAlg::HmacSha1_96);
        let mut icv = [0u8; 12];
        suite.compute(b"payload", None, &mut icv);
        icv[11] ^= 0x80;
        assert!(!suite.verify(b"payload", None, &icv));
    }

    #[test]
    fn test_verify_rejects_wrong_length() {
        let suite = create_test_suite(IntegAlg::HmacSha1_96);
        let mut icv = [0u8; 12];
        suite.compute(b"payload", None, &mut icv);
        assert!(!suite.verify(b"payload", None, &icv[..11]));
    }

    #[test]
    fn test_esn_high_bits_are_authenticated() {
        let suite = create_test_suite(IntegAlg::HmacSha256_128);
        let mut icv = [0u8; 16];
        suite.compute(b"payload", Some(1), &mut icv);
        assert!(suite.verify(b"payload", Some(1), &icv));
        assert!(!suite.verify(b"payload", Some(2), &icv));
        assert!(!suite.verify(b"payload", None, &icv));
    }

    #[test]
    fn test_debug_redacts_key() {
        let debug = format!("{:?}", create_test_suite(IntegAlg::Cmac96));
        assert!(debug.contains("<redacted>"));
    }
}
