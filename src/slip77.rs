//! SLIP-77 deterministic per-script blinding keys.

use hmac::{Hmac, Mac};
use sha2::Sha512;

use elements::Script;
use elements::secp256k1_zkp::{PublicKey, Secp256k1, SecretKey, Signing};

use crate::error::{Error, Result};

type HmacSha512 = Hmac<Sha512>;

const DOMAIN: &[u8] = b"Symmetric key seed";
const LABEL: &[u8] = b"SLIP-0077";

/// The wallet-wide master blinding key. Per-script blinding keys are
/// HMAC-SHA512 children of it, so the same output script always unblinds
/// with the same key.
#[derive(Clone)]
pub struct MasterBlindingKey([u8; 32]);

impl MasterBlindingKey {
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut outer = HmacSha512::new_from_slice(DOMAIN).expect("hmac accepts any key length");
        outer.update(seed);
        let root = outer.finalize().into_bytes();

        // SLIP-77: master = HMAC-SHA512(root[0..32], b"\x00" || "SLIP-0077")[32..]
        let mut inner =
            HmacSha512::new_from_slice(&root[..32]).expect("hmac accepts any key length");
        inner.update(&[0u8]);
        inner.update(LABEL);
        let derived = inner.finalize().into_bytes();

        let mut key = [0u8; 32];
        key.copy_from_slice(&derived[32..]);
        MasterBlindingKey(key)
    }

    pub fn blinding_private_key(&self, script_pubkey: &Script) -> Result<SecretKey> {
        let mut mac = HmacSha512::new_from_slice(&self.0).expect("hmac accepts any key length");
        mac.update(script_pubkey.as_bytes());
        let derived = mac.finalize().into_bytes();
        SecretKey::from_slice(&derived[32..])
            .map_err(|e| Error::Derivation(format!("slip77 child is not a valid scalar: {e}")))
    }

    pub fn blinding_public_key<C: Signing>(
        &self,
        secp: &Secp256k1<C>,
        script_pubkey: &Script,
    ) -> Result<PublicKey> {
        let private = self.blinding_private_key(script_pubkey)?;
        Ok(PublicKey::from_secret_key(secp, &private))
    }
}

impl std::fmt::Debug for MasterBlindingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the key material.
        f.write_str("MasterBlindingKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_per_script() {
        let master = MasterBlindingKey::from_seed(&[7u8; 64]);
        let script = Script::from(vec![0x51]);
        let a = master.blinding_private_key(&script).unwrap();
        let b = master.blinding_private_key(&script).unwrap();
        assert_eq!(a.secret_bytes(), b.secret_bytes());
    }

    #[test]
    fn different_scripts_different_keys() {
        let master = MasterBlindingKey::from_seed(&[7u8; 64]);
        let a = master
            .blinding_private_key(&Script::from(vec![0x51]))
            .unwrap();
        let b = master
            .blinding_private_key(&Script::from(vec![0x52]))
            .unwrap();
        assert_ne!(a.secret_bytes(), b.secret_bytes());
    }

    #[test]
    fn different_seeds_different_masters() {
        let script = Script::from(vec![0x51]);
        let a = MasterBlindingKey::from_seed(&[1u8; 64])
            .blinding_private_key(&script)
            .unwrap();
        let b = MasterBlindingKey::from_seed(&[2u8; 64])
            .blinding_private_key(&script)
            .unwrap();
        assert_ne!(a.secret_bytes(), b.secret_bytes());
    }
}
