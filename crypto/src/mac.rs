//! HMAC-SHA256 message authentication and the HKDF steps built on it.
//!
//! `hkdf_extract` uses an all-zero salt; `hkdf_expand` produces a single
//! 32-byte block (`HMAC(key, info || 0x01)`), which is all the overlay needs.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// A 32-byte HMAC key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MacKey(pub [u8; 32]);

impl std::fmt::Debug for MacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MacKey(..)")
    }
}

/// HMAC-SHA256 of `data` under `key`.
pub fn hmac_sha256(key: &MacKey, data: &[u8]) -> [u8; 32] {
    let mut mac = new_mac(&key.0);
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Constant-time check of `tag` against HMAC-SHA256 of `data`.
pub fn hmac_sha256_verify(key: &MacKey, data: &[u8], tag: &[u8; 32]) -> bool {
    let mut mac = new_mac(&key.0);
    mac.update(data);
    mac.verify_slice(tag).is_ok()
}

/// HKDF extract step with a zero salt.
pub fn hkdf_extract(input_key_material: &[u8]) -> MacKey {
    MacKey(hmac_sha256(&MacKey([0u8; 32]), input_key_material))
}

/// Single-block HKDF expand step.
pub fn hkdf_expand(key: &MacKey, info: &[u8]) -> MacKey {
    let mut mac = new_mac(&key.0);
    mac.update(info);
    mac.update(&[1u8]);
    MacKey(mac.finalize().into_bytes().into())
}

fn new_mac(key: &[u8; 32]) -> HmacSha256 {
    <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length")
}
