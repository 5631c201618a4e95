//! Test utilities: in-memory repository implementations and transaction
//! fixtures, enabling integration tests that cover derivation, blinding and
//! signing without a live network or a real wallet database.

use std::collections::HashMap;

use elements::bitcoin::bip32::DerivationPath;
use elements::confidential::{Asset, Nonce, Value as ConfValue};
use elements::hashes::Hash;
use elements::{AssetId, OutPoint, Script, TxOut, TxOutWitness, Txid};

use crate::error::Result;
use crate::network::Network;
use crate::repository::{
    AccountDetails, AccountKind, AppRepository, ScriptDetails, UnblindedOutput, WalletRepository,
};

/// A deterministic 64-byte test seed.
pub const TEST_SEED: [u8; 64] = [0x42; 64];

/// In-memory [`WalletRepository`] populated by hand in tests.
#[derive(Default)]
pub struct MemoryWalletRepository {
    scripts: HashMap<Vec<u8>, ScriptDetails>,
    accounts: HashMap<String, AccountDetails>,
    blinding_data: HashMap<OutPoint, UnblindedOutput>,
}

impl MemoryWalletRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_account(
        &mut self,
        name: impl Into<String>,
        kind: AccountKind,
        base_derivation_path: DerivationPath,
    ) {
        self.accounts.insert(
            name.into(),
            AccountDetails {
                kind,
                base_derivation_path,
            },
        );
    }

    pub fn insert_script(
        &mut self,
        script: &Script,
        account_name: impl Into<String>,
        derivation_path: DerivationPath,
    ) {
        self.scripts.insert(
            script.to_bytes(),
            ScriptDetails {
                account_name: account_name.into(),
                derivation_path,
            },
        );
    }

    pub fn insert_blinding_data(&mut self, outpoint: OutPoint, unblinded: UnblindedOutput) {
        self.blinding_data.insert(outpoint, unblinded);
    }
}

impl WalletRepository for MemoryWalletRepository {
    fn output_blinding_data(&self, outpoints: &[OutPoint]) -> Result<Vec<Option<UnblindedOutput>>> {
        Ok(outpoints
            .iter()
            .map(|outpoint| self.blinding_data.get(outpoint).cloned())
            .collect())
    }

    fn script_details(&self, script: &Script) -> Result<Option<ScriptDetails>> {
        Ok(self.scripts.get(script.as_bytes()).cloned())
    }

    fn account_details(&self) -> Result<HashMap<String, AccountDetails>> {
        Ok(self.accounts.clone())
    }
}

/// In-memory [`AppRepository`] pinned to one network.
pub struct MemoryAppRepository {
    pub network: Network,
}

impl AppRepository for MemoryAppRepository {
    fn network(&self) -> Result<Network> {
        Ok(self.network)
    }
}

/// A fixed regtest-style asset id for fixtures.
pub fn test_asset() -> AssetId {
    AssetId::from_slice(&[0x5a; 32]).expect("valid asset")
}

/// Build an explicit (non-confidential) TxOut for tests.
pub fn explicit_txout(asset: AssetId, amount: u64, script_pubkey: &Script) -> TxOut {
    TxOut {
        asset: Asset::Explicit(asset),
        value: ConfValue::Explicit(amount),
        nonce: Nonce::Null,
        script_pubkey: script_pubkey.clone(),
        witness: TxOutWitness::default(),
    }
}

/// A distinct dummy outpoint per index.
pub fn test_outpoint(vout: u32) -> OutPoint {
    OutPoint::new(Txid::from_slice(&[0xab; 32]).expect("valid txid"), vout)
}
