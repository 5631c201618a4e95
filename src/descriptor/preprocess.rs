//! Substitution of extended-public-key placeholders in template text.
//!
//! Templates carry account xpubs verbatim; before parsing, every xpub is
//! replaced by the hex of the public key derived at the path its context
//! entry names. Re-running on already-substituted text is a no-op because
//! no xpub pattern remains.

use std::collections::HashMap;
use std::str::FromStr;

use elements::bitcoin::bip32::{DerivationPath, Xpub};
use elements::bitcoin::secp256k1::Secp256k1;

use crate::error::{Error, Result};

const XPUB_PREFIXES: [&str; 6] = ["xpub", "tpub", "ypub", "zpub", "upub", "vpub"];

/// How one xpub placeholder is turned into key hex.
#[derive(Debug, Clone)]
pub struct KeySubstitution {
    pub path: DerivationPath,
    /// Emit the 32-byte x-only key (taproot contexts) instead of the
    /// 33-byte compressed key.
    pub x_only: bool,
}

pub type SubstitutionContext = HashMap<String, KeySubstitution>;

fn is_base58(c: char) -> bool {
    c.is_ascii_alphanumeric() && !matches!(c, '0' | 'O' | 'I' | 'l')
}

/// Locate every xpub-looking token in `text`. Returns deduplicated tokens.
fn find_xpubs(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    for prefix in XPUB_PREFIXES {
        let mut search = 0;
        while let Some(at) = text[search..].find(prefix) {
            let start = search + at;
            // A prefix occurring mid-token is part of another key's base58
            // body, not the start of a key.
            if text[..start].chars().next_back().is_some_and(is_base58) {
                search = start + prefix.len();
                continue;
            }
            let token: String = text[start..].chars().take_while(|&c| is_base58(c)).collect();
            search = start + token.len().max(prefix.len());
            // Extended keys are 111-112 base58 chars; anything much shorter
            // is template noise, not a key.
            if token.len() >= 100 && !found.contains(&token) {
                found.push(token);
            }
        }
    }
    found
}

fn derive_hex(xpub: &str, substitution: &KeySubstitution) -> Result<String> {
    let parsed = Xpub::from_str(xpub)
        .map_err(|e| Error::Derivation(format!("cannot parse xpub {xpub}: {e}")))?;
    let secp = Secp256k1::verification_only();
    let derived = parsed
        .derive_pub(&secp, &substitution.path)
        .map_err(|e| Error::Derivation(format!("cannot derive {}: {e}", substitution.path)))?;
    let hex = if substitution.x_only {
        hex::encode(derived.public_key.x_only_public_key().0.serialize())
    } else {
        hex::encode(derived.public_key.serialize())
    };
    Ok(hex)
}

/// Replace every xpub placeholder in `text` using `context`. An xpub with no
/// context entry is a configuration error.
pub fn preprocess(context: &SubstitutionContext, text: &str) -> Result<String> {
    let mut result = text.to_string();
    for xpub in find_xpubs(text) {
        let substitution = context
            .get(&xpub)
            .ok_or_else(|| Error::MissingSubstitution(xpub.clone()))?;
        let key_hex = derive_hex(&xpub, substitution)?;
        result = result.replace(&xpub, &key_hex);
    }
    Ok(result)
}

/// Replace every xpub placeholder with a fixed key hex, regardless of
/// context. Used to validate template syntax at contract construction time.
pub fn preprocess_with_placeholder(text: &str, key_hex: &str) -> String {
    let mut result = text.to_string();
    for xpub in find_xpubs(text) {
        result = result.replace(&xpub, key_hex);
    }
    result
}
