//! Collaborator boundaries: the wallet's persisted data and app settings
//! live behind these traits; the core only reads what it needs.

use std::collections::HashMap;

use elements::bitcoin::bip32::DerivationPath;
use elements::confidential::{AssetBlindingFactor, ValueBlindingFactor};
use elements::{AssetId, OutPoint, Script};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::network::Network;

/// Unblinding data for one previous output this wallet owns.
#[derive(Debug, Clone)]
pub struct UnblindedOutput {
    pub asset: AssetId,
    pub value: u64,
    pub asset_blinding_factor: AssetBlindingFactor,
    pub value_blinding_factor: ValueBlindingFactor,
}

/// What the wallet knows about one of its own output scripts.
#[derive(Debug, Clone)]
pub struct ScriptDetails {
    pub account_name: String,
    /// Absolute path from the wallet master key.
    pub derivation_path: DerivationPath,
}

/// Account kinds this wallet can sign for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// Plain single-sig segwit (P2WPKH).
    P2wpkh,
    /// Namespaced covenant account whose addresses come from taproot
    /// templates.
    Covenant,
}

#[derive(Debug, Clone)]
pub struct AccountDetails {
    pub kind: AccountKind,
    pub base_derivation_path: DerivationPath,
}

/// Read access to wallet-owned state.
pub trait WalletRepository {
    /// Unblinding data for each outpoint, index-aligned with the request.
    /// `None` for outpoints the wallet cannot unblind.
    fn output_blinding_data(&self, outpoints: &[OutPoint]) -> Result<Vec<Option<UnblindedOutput>>>;

    /// Metadata for one of the wallet's output scripts, if it is ours.
    fn script_details(&self, script: &Script) -> Result<Option<ScriptDetails>>;

    /// All configured accounts, keyed by name.
    fn account_details(&self) -> Result<HashMap<String, AccountDetails>>;
}

/// Read access to app-level settings.
pub trait AppRepository {
    fn network(&self) -> Result<Network>;
}
