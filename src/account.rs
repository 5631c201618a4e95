//! Per-account identity: hierarchical address derivation and the
//! script-to-context cache that blinding and signing consume.

use std::collections::{BTreeMap, HashMap};

use elements::bitcoin::NetworkKind;
use elements::bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv, Xpub};
use elements::secp256k1_zkp::{Secp256k1, SecretKey, XOnlyPublicKey};
use elements::{Address, Script};

use crate::analyzer::{ScriptNeeds, analyze_taproot_tree};
use crate::contract::ContractTemplate;
use crate::descriptor::{Compiled, KeySubstitution, SubstitutionContext, evaluate};
use crate::error::{Error, Result};
use crate::network::Network;
use crate::repository::AccountKind;
use crate::slip77::MasterBlindingKey;

/// Identity lifecycle. Freshly created wallets may mark themselves ready
/// directly; wallets with on-chain history go through restoration first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    Uninitialized,
    Restoring,
    Ready,
}

/// Everything cached about one derived address, keyed by its output-script
/// hex. Never mutated after creation.
pub struct AddressContext {
    pub confidential_address: Address,
    pub blinding_private_key: SecretKey,
    /// Absolute path from the wallet master key.
    pub derivation_path: DerivationPath,
    /// The namespace key bound into the templates (covenant accounts only).
    pub public_key: Option<XOnlyPublicKey>,
    /// The full compilation, carrying the taproot tree and witness
    /// generator for covenant addresses.
    pub compiled: Compiled,
    /// Needs analysis per taproot leaf, keyed by leaf-script hex.
    pub script_needs: BTreeMap<String, ScriptNeeds>,
}

/// A freshly derived address, as handed to callers. The authoritative
/// context stays in the identity's cache.
#[derive(Debug, Clone)]
pub struct DerivedAddress {
    pub confidential_address: Address,
    pub script_pubkey: Script,
    pub derivation_path: DerivationPath,
    pub is_change: bool,
    pub index: u32,
}

/// One account's identity: key material, templates, derivation counters and
/// the address cache.
///
/// The cache is the only mutable shared structure in the core; when
/// restoration and on-demand derivation can run concurrently, wrap the
/// identity in external synchronization.
pub struct AccountIdentity {
    network: Network,
    account_name: String,
    kind: AccountKind,
    base_path: DerivationPath,
    account_xpub: Xpub,
    master_blinding: MasterBlindingKey,
    contract: Option<ContractTemplate>,
    state: IdentityState,
    next_external: u32,
    next_internal: u32,
    cache: HashMap<String, AddressContext>,
}

impl AccountIdentity {
    /// Build an identity from the wallet seed. Covenant accounts must carry
    /// a contract template; plain segwit accounts must not.
    pub fn new(
        network: Network,
        seed: &[u8],
        account_name: impl Into<String>,
        kind: AccountKind,
        base_path: DerivationPath,
        contract: Option<ContractTemplate>,
    ) -> Result<Self> {
        match (kind, &contract) {
            (AccountKind::Covenant, None) => {
                return Err(Error::InvalidContract(
                    "covenant account requires a contract template".into(),
                ));
            }
            (AccountKind::P2wpkh, Some(_)) => {
                return Err(Error::InvalidContract(
                    "p2wpkh account cannot carry a contract template".into(),
                ));
            }
            _ => {}
        }

        let network_kind = if network.is_mainnet() {
            NetworkKind::Main
        } else {
            NetworkKind::Test
        };
        let master = Xpriv::new_master(network_kind, seed)
            .map_err(|e| Error::Derivation(format!("bad seed: {e}")))?;
        let secp = Secp256k1::new();
        let account_xprv = master
            .derive_priv(&secp, &base_path)
            .map_err(|e| Error::Derivation(format!("cannot derive account node: {e}")))?;
        let account_xpub = Xpub::from_priv(&secp, &account_xprv);

        Ok(AccountIdentity {
            network,
            account_name: account_name.into(),
            kind,
            base_path,
            account_xpub,
            master_blinding: MasterBlindingKey::from_seed(seed),
            contract,
            state: IdentityState::Uninitialized,
            next_external: 0,
            next_internal: 0,
            cache: HashMap::new(),
        })
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    pub fn kind(&self) -> AccountKind {
        self.kind
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn base_path(&self) -> &DerivationPath {
        &self.base_path
    }

    pub fn xpub(&self) -> &Xpub {
        &self.account_xpub
    }

    pub fn state(&self) -> IdentityState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: IdentityState) {
        self.state = state;
    }

    /// Mark a freshly created wallet (no on-chain history) ready without a
    /// restoration scan.
    pub fn mark_ready(&mut self) {
        self.state = IdentityState::Ready;
    }

    pub fn next_index(&self, is_change: bool) -> u32 {
        if is_change {
            self.next_internal
        } else {
            self.next_external
        }
    }

    pub(crate) fn set_next_index(&mut self, is_change: bool, index: u32) {
        if is_change {
            self.next_internal = index;
        } else {
            self.next_external = index;
        }
    }

    /// Derive the receive address at the current external index and advance
    /// the counter.
    pub fn next_address(&mut self) -> Result<DerivedAddress> {
        let index = self.next_external;
        let derived = self.address_at(false, index)?;
        self.next_external = index + 1;
        Ok(derived)
    }

    /// Derive the change address at the current internal index and advance
    /// the counter.
    pub fn next_change_address(&mut self) -> Result<DerivedAddress> {
        let index = self.next_internal;
        let derived = self.address_at(true, index)?;
        self.next_internal = index + 1;
        Ok(derived)
    }

    /// Derive (and cache) the address at an explicit branch and index.
    /// Idempotent: repeated calls with the same arguments yield the same
    /// address and leave a single cache entry.
    pub fn address_at(&mut self, is_change: bool, index: u32) -> Result<DerivedAddress> {
        let context = self.derive_context(is_change, index)?;
        let script = context.compiled.redeem_script.clone();
        let derived = DerivedAddress {
            confidential_address: context.confidential_address.clone(),
            script_pubkey: script.clone(),
            derivation_path: context.derivation_path.clone(),
            is_change,
            index,
        };
        // Cache before the address is handed out: an uncached address is
        // not yet spendable or blindable.
        self.cache.insert(hex::encode(script.as_bytes()), context);
        Ok(derived)
    }

    /// Look up the cached context for one of this identity's output
    /// scripts.
    pub fn context_for_script(&self, script: &Script) -> Option<&AddressContext> {
        self.cache.get(&hex::encode(script.as_bytes()))
    }

    pub fn cached_scripts(&self) -> impl Iterator<Item = &str> {
        self.cache.keys().map(String::as_str)
    }

    /// The x-only public key at `(is_change, index)` under the account
    /// node.
    pub fn public_key_at(&self, is_change: bool, index: u32) -> Result<XOnlyPublicKey> {
        let child = self.derive_child_xpub(is_change, index)?;
        Ok(child.public_key.x_only_public_key().0)
    }

    fn branch_number(is_change: bool) -> ChildNumber {
        ChildNumber::from_normal_idx(if is_change { 1 } else { 0 })
            .expect("0 and 1 are valid child numbers")
    }

    fn derive_child_xpub(&self, is_change: bool, index: u32) -> Result<Xpub> {
        let secp = Secp256k1::verification_only();
        let steps = [
            Self::branch_number(is_change),
            ChildNumber::from_normal_idx(index)
                .map_err(|e| Error::Derivation(format!("index out of range: {e}")))?,
        ];
        self.account_xpub
            .derive_pub(&secp, &steps)
            .map_err(|e| Error::Derivation(format!("cannot derive child {index}: {e}")))
    }

    fn absolute_path(&self, is_change: bool, index: u32) -> Result<DerivationPath> {
        let steps = [
            Self::branch_number(is_change),
            ChildNumber::from_normal_idx(index)
                .map_err(|e| Error::Derivation(format!("index out of range: {e}")))?,
        ];
        Ok(self.base_path.extend(steps))
    }

    fn derive_context(&self, is_change: bool, index: u32) -> Result<AddressContext> {
        match self.kind {
            AccountKind::Covenant => self.derive_covenant_context(is_change, index),
            AccountKind::P2wpkh => self.derive_p2wpkh_context(is_change, index),
        }
    }

    fn substitution_context(&self, is_change: bool, index: u32) -> Result<SubstitutionContext> {
        let steps = [
            Self::branch_number(is_change),
            ChildNumber::from_normal_idx(index)
                .map_err(|e| Error::Derivation(format!("index out of range: {e}")))?,
        ];
        let mut context = SubstitutionContext::new();
        context.insert(
            self.account_xpub.to_string(),
            KeySubstitution {
                path: DerivationPath::from(steps.to_vec()),
                x_only: true,
            },
        );
        Ok(context)
    }

    fn derive_covenant_context(&self, is_change: bool, index: u32) -> Result<AddressContext> {
        let contract = self
            .contract
            .as_ref()
            .expect("covenant accounts always carry a contract");
        let template = if is_change {
            contract.change_template()
        } else {
            contract.receive_template()
        }
        .ok_or_else(|| Error::InvalidContract("contract has no receive template".into()))?;

        let substitutions = self.substitution_context(is_change, index)?;
        let compiled = evaluate(&substitutions, template)?;
        let script = compiled.redeem_script.clone();

        let secp = Secp256k1::new();
        let blinding_private_key = self.master_blinding.blinding_private_key(&script)?;
        let blinding_public_key = self.master_blinding.blinding_public_key(&secp, &script)?;
        let confidential_address =
            Address::from_script(&script, Some(blinding_public_key), self.network.address_params())
                .ok_or_else(|| {
                    Error::Derivation("compiled script has no address form".into())
                })?;

        let script_needs = analyze_taproot_tree(&compiled)?;

        Ok(AddressContext {
            confidential_address,
            blinding_private_key,
            derivation_path: self.absolute_path(is_change, index)?,
            public_key: Some(self.public_key_at(is_change, index)?),
            compiled,
            script_needs,
        })
    }

    fn derive_p2wpkh_context(&self, is_change: bool, index: u32) -> Result<AddressContext> {
        let child = self.derive_child_xpub(is_change, index)?;
        let public_key = elements::bitcoin::PublicKey::new(child.public_key);

        let unblinded = Address::p2wpkh(&public_key, None, self.network.address_params());
        let script = unblinded.script_pubkey();

        let secp = Secp256k1::new();
        let blinding_private_key = self.master_blinding.blinding_private_key(&script)?;
        let blinding_public_key = self.master_blinding.blinding_public_key(&secp, &script)?;
        let confidential_address = Address::p2wpkh(
            &public_key,
            Some(blinding_public_key),
            self.network.address_params(),
        );

        Ok(AddressContext {
            confidential_address,
            blinding_private_key,
            derivation_path: self.absolute_path(is_change, index)?,
            public_key: None,
            compiled: Compiled {
                redeem_script: script,
                spend: crate::descriptor::Spend::Static { witness: vec![] },
            },
            script_needs: BTreeMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const SEED: [u8; 64] = [0x42; 64];

    fn covenant_identity() -> AccountIdentity {
        let mut identity = p2wpkh_identity();
        // Rebuild as covenant with a template bound to the account xpub.
        let xpub = identity.xpub().to_string();
        let template = format!("eltr({xpub}, {{raw(51), asm({xpub} OP_CHECKSIG)}})");
        let contract = ContractTemplate::new("testns", Some(template), None).unwrap();
        identity = AccountIdentity::new(
            Network::LiquidRegtest,
            &SEED,
            "testns",
            AccountKind::Covenant,
            DerivationPath::from_str("m/84'/1'/0'").unwrap(),
            Some(contract),
        )
        .unwrap();
        identity
    }

    fn p2wpkh_identity() -> AccountIdentity {
        AccountIdentity::new(
            Network::LiquidRegtest,
            &SEED,
            "main",
            AccountKind::P2wpkh,
            DerivationPath::from_str("m/84'/1'/0'").unwrap(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn next_address_is_monotonic_and_distinct() {
        let mut identity = p2wpkh_identity();
        let mut seen = std::collections::HashSet::new();
        for i in 0..5u32 {
            let derived = identity.next_address().unwrap();
            assert_eq!(derived.index, i);
            assert!(!derived.is_change);
            assert!(derived.derivation_path.to_string().ends_with(&format!("0/{i}")));
            assert!(seen.insert(derived.confidential_address.to_string()));
        }
    }

    #[test]
    fn change_branch_is_independent() {
        let mut identity = p2wpkh_identity();
        identity.next_address().unwrap();
        identity.next_address().unwrap();
        let change = identity.next_change_address().unwrap();
        assert_eq!(change.index, 0);
        assert!(change.is_change);
        assert!(change.derivation_path.to_string().ends_with("1/0"));
    }

    #[test]
    fn address_at_is_idempotent() {
        let mut identity = p2wpkh_identity();
        let a = identity.address_at(false, 3).unwrap();
        let b = identity.address_at(false, 3).unwrap();
        assert_eq!(
            a.confidential_address.to_string(),
            b.confidential_address.to_string()
        );
        assert_eq!(identity.cached_scripts().count(), 1);
    }

    #[test]
    fn covenant_context_is_cached_with_needs() {
        let mut identity = covenant_identity();
        let derived = identity.next_address().unwrap();
        let context = identity
            .context_for_script(&derived.script_pubkey)
            .expect("derivation caches the context");
        assert!(context.public_key.is_some());
        assert_eq!(context.script_needs.len(), 2);
        assert!(
            context
                .script_needs
                .values()
                .any(|needs| needs.auto_spendable())
        );
        assert!(
            context
                .script_needs
                .values()
                .any(|needs| needs.signatures.len() == 1)
        );
    }

    #[test]
    fn covenant_addresses_are_taproot() {
        let mut identity = covenant_identity();
        let derived = identity.next_address().unwrap();
        let bytes = derived.script_pubkey.as_bytes();
        assert_eq!(bytes.len(), 34);
        assert_eq!(bytes[0], 0x51);
        assert_eq!(bytes[1], 0x20);
    }

    #[test]
    fn identity_starts_uninitialized() {
        let identity = p2wpkh_identity();
        assert_eq!(identity.state(), IdentityState::Uninitialized);
    }
}
