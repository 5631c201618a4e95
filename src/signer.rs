//! Signing orchestration over PSETs: per-input dispatch by account type,
//! taproot key-path and script-path Schnorr signing, plain segwit ECDSA,
//! and witness finalization.
//!
//! Signing is best-effort per input. Some inputs belong to co-signers this
//! wallet cannot complete alone, so a failing input is recorded in the
//! report and skipped rather than aborting the pass.

use std::collections::HashMap;

use elements::bitcoin::NetworkKind;
use elements::bitcoin::bip32::{DerivationPath, Xpriv};
use elements::hashes::{Hash, hash160};
use elements::pset::PartiallySignedTransaction;
use elements::schnorr::SchnorrSig;
use elements::script::Builder;
use elements::secp256k1_zkp::{All, Keypair, Message, Scalar, Secp256k1, XOnlyPublicKey};
use elements::sighash::{Prevouts, SighashCache};
use elements::taproot::{LeafVersion, TapLeafHash, TapTweakHash};
use elements::{BlockHash, SchnorrSighashType, Script, TxOut, opcodes::all as op};

use crate::account::{AccountIdentity, AddressContext};
use crate::analyzer::{ScriptNeeds, SignatureNeed};
use crate::descriptor::{Spend, tapscript_leaf_version};
use crate::error::{Error, Result};
use crate::repository::{AccountKind, AppRepository, WalletRepository};

/// What happened to one input during a signing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOutcome {
    /// ECDSA partial signature attached.
    SignedEcdsa,
    /// Schnorr key-path signature attached.
    SignedKeyPath,
    /// Script-path leaf selected and signed; carries the number of Schnorr
    /// signatures produced (zero for an auto-spendable leaf).
    SignedScriptPath { signatures: usize },
    /// Input does not belong to this wallet, or carries nothing to sign.
    Skipped(String),
    /// Processing this input failed; the pass continued without it.
    Failed(String),
}

/// Per-input outcomes of one signing pass, in input order.
#[derive(Debug)]
pub struct SigningReport {
    pub outcomes: Vec<InputOutcome>,
}

impl SigningReport {
    pub fn signed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o,
                    InputOutcome::SignedEcdsa
                        | InputOutcome::SignedKeyPath
                        | InputOutcome::SignedScriptPath { .. }
                )
            })
            .count()
    }
}

/// Drives signing and finalization for the accounts it was built with.
pub struct Signer<'a> {
    master: Xpriv,
    wallet: &'a dyn WalletRepository,
    identities: HashMap<String, &'a AccountIdentity>,
    genesis_hash: BlockHash,
    secp: Secp256k1<All>,
}

impl<'a> Signer<'a> {
    pub fn new(
        seed: &[u8],
        app: &dyn AppRepository,
        wallet: &'a dyn WalletRepository,
        identities: impl IntoIterator<Item = &'a AccountIdentity>,
    ) -> Result<Self> {
        let network = app.network()?;
        let network_kind = if network.is_mainnet() {
            NetworkKind::Main
        } else {
            NetworkKind::Test
        };
        let master = Xpriv::new_master(network_kind, seed)
            .map_err(|e| Error::Derivation(format!("bad seed: {e}")))?;
        Ok(Signer {
            master,
            wallet,
            identities: identities
                .into_iter()
                .map(|identity| (identity.account_name().to_string(), identity))
                .collect(),
            genesis_hash: network.genesis_hash(),
            secp: Secp256k1::new(),
        })
    }

    /// Sign every input this wallet can, recording one outcome per input.
    pub fn sign_pset(&self, pset: &mut PartiallySignedTransaction) -> Result<SigningReport> {
        let tx = pset
            .extract_tx()
            .map_err(|e| Error::Sign(format!("cannot assemble unsigned transaction: {e}")))?;
        let prevouts: Vec<Option<TxOut>> = pset
            .inputs()
            .iter()
            .map(|input| input.witness_utxo.clone())
            .collect();

        let mut outcomes = Vec::with_capacity(pset.inputs().len());
        for index in 0..pset.inputs().len() {
            let outcome = match self.sign_input(pset, &tx, &prevouts, index) {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::warn!("signing input {index} failed: {e}");
                    InputOutcome::Failed(e.to_string())
                }
            };
            outcomes.push(outcome);
        }
        Ok(SigningReport { outcomes })
    }

    fn sign_input(
        &self,
        pset: &mut PartiallySignedTransaction,
        tx: &elements::Transaction,
        prevouts: &[Option<TxOut>],
        index: usize,
    ) -> Result<InputOutcome> {
        let Some(utxo) = prevouts[index].clone() else {
            return Ok(InputOutcome::Skipped("no witness utxo".into()));
        };
        let Some(details) = self.wallet.script_details(&utxo.script_pubkey)? else {
            return Ok(InputOutcome::Skipped("script not owned".into()));
        };

        let accounts = self.wallet.account_details()?;
        let account = accounts
            .get(&details.account_name)
            .ok_or_else(|| Error::UnsupportedAccountType(details.account_name.clone()))?;

        match account.kind {
            AccountKind::P2wpkh => {
                self.sign_segwit_input(pset, tx, index, &utxo, &details.derivation_path)
            }
            AccountKind::Covenant => {
                let identity = self
                    .identities
                    .get(&details.account_name)
                    .ok_or(Error::NotRestored)?;
                let context = identity
                    .context_for_script(&utxo.script_pubkey)
                    .ok_or(Error::NotRestored)?;
                self.sign_taproot_input(
                    pset,
                    tx,
                    prevouts,
                    index,
                    context,
                    &details.derivation_path,
                )
            }
        }
    }

    fn derive_keypair(&self, path: &DerivationPath) -> Result<Keypair> {
        let xprv = self
            .master
            .derive_priv(&self.secp, path)
            .map_err(|e| Error::Derivation(format!("cannot derive signing key: {e}")))?;
        Ok(Keypair::from_secret_key(&self.secp, &xprv.private_key))
    }

    fn sign_segwit_input(
        &self,
        pset: &mut PartiallySignedTransaction,
        tx: &elements::Transaction,
        index: usize,
        utxo: &TxOut,
        path: &DerivationPath,
    ) -> Result<InputOutcome> {
        let keypair = self.derive_keypair(path)?;
        let public_key = elements::bitcoin::PublicKey::new(keypair.public_key());

        // The input may override the implicit SIGHASH_ALL default.
        let sighash_type = pset.inputs()[index]
            .ecdsa_hash_ty()
            .ok_or_else(|| Error::Sign(format!("non-standard sighash type on input {index}")))?;

        let pubkey_hash = hash160::Hash::hash(&public_key.to_bytes());
        let script_code = Builder::new()
            .push_opcode(op::OP_DUP)
            .push_opcode(op::OP_HASH160)
            .push_slice(&pubkey_hash.to_byte_array())
            .push_opcode(op::OP_EQUALVERIFY)
            .push_opcode(op::OP_CHECKSIG)
            .into_script();

        let mut cache = SighashCache::new(tx);
        let sighash = cache.segwitv0_sighash(index, &script_code, utxo.value, sighash_type);
        let message = Message::from_digest(sighash.to_byte_array());
        let signature = self.secp.sign_ecdsa(&message, &keypair.secret_key());

        let mut signature_bytes = signature.serialize_der().to_vec();
        signature_bytes.push((sighash_type as u32) as u8);
        pset.inputs_mut()[index]
            .partial_sigs
            .insert(public_key, signature_bytes);
        Ok(InputOutcome::SignedEcdsa)
    }

    fn sign_taproot_input(
        &self,
        pset: &mut PartiallySignedTransaction,
        tx: &elements::Transaction,
        prevouts: &[Option<TxOut>],
        index: usize,
        context: &AddressContext,
        path: &DerivationPath,
    ) -> Result<InputOutcome> {
        {
            let input = &pset.inputs()[index];
            let names_key_path = input.tap_key_sig.is_some() || input.tap_merkle_root.is_some();
            if names_key_path && !input.tap_scripts.is_empty() {
                return Err(Error::ContradictoryInput(index));
            }
        }

        let Spend::Taproot {
            internal_key,
            spend_info,
            ..
        } = &context.compiled.spend
        else {
            return Err(Error::Sign("owned script is not a taproot output".into()));
        };

        let all_prevouts: Option<Vec<TxOut>> = prevouts.iter().cloned().collect();
        let all_prevouts = all_prevouts
            .ok_or_else(|| Error::Sign("taproot sighash requires every witness utxo".into()))?;
        let prevouts = Prevouts::All(&all_prevouts);

        let sighash_type = pset.inputs()[index]
            .schnorr_hash_ty()
            .ok_or_else(|| Error::Sign(format!("non-standard sighash type on input {index}")))?;

        let keypair = self.derive_keypair(path)?;
        if keypair.x_only_public_key().0 == *internal_key {
            return self.sign_key_path(
                pset,
                tx,
                &prevouts,
                index,
                &keypair,
                spend_info.merkle_root(),
                sighash_type,
            );
        }

        let (leaf_script, leaf_version) = self.select_leaf(pset, index, context)?;
        let needs = context
            .script_needs
            .get(&hex::encode(leaf_script.as_bytes()))
            .cloned()
            .unwrap_or_default();

        let control_block = spend_info
            .control_block(&(leaf_script.clone(), leaf_version))
            .ok_or_else(|| Error::LeafNotFound(hex::encode(leaf_script.as_bytes())))?;
        let leaf_hash = TapLeafHash::from_script(&leaf_script, leaf_version);

        let mut cache = SighashCache::new(tx);
        let sighash = cache
            .taproot_script_spend_signature_hash(
                index,
                &prevouts,
                leaf_hash,
                sighash_type,
                self.genesis_hash,
            )
            .map_err(|e| Error::Sign(e.to_string()))?;
        let message = Message::from_digest(sighash.to_byte_array());

        let mut signatures = 0usize;
        let input = &mut pset.inputs_mut()[index];
        for need in &needs.signatures {
            let x_only = keypair.x_only_public_key().0;
            if !need_matches_key(need, &x_only) {
                continue;
            }
            let sig = self.secp.sign_schnorr_no_aux_rand(&message, &keypair);
            input.tap_script_sigs.insert(
                (x_only, leaf_hash),
                SchnorrSig {
                    sig,
                    hash_ty: sighash_type,
                },
            );
            signatures += 1;
        }

        input
            .tap_scripts
            .insert(control_block, (leaf_script, leaf_version));
        input.tap_internal_key = Some(*internal_key);
        Ok(InputOutcome::SignedScriptPath { signatures })
    }

    #[allow(clippy::too_many_arguments)]
    fn sign_key_path(
        &self,
        pset: &mut PartiallySignedTransaction,
        tx: &elements::Transaction,
        prevouts: &Prevouts<'_, TxOut>,
        index: usize,
        keypair: &Keypair,
        merkle_root: Option<elements::taproot::TapNodeHash>,
        sighash_type: SchnorrSighashType,
    ) -> Result<InputOutcome> {
        let internal_key = keypair.x_only_public_key().0;
        let tweak = TapTweakHash::from_key_and_tweak(internal_key, merkle_root);
        let tweak = Scalar::from_be_bytes(tweak.to_byte_array())
            .map_err(|e| Error::Sign(format!("invalid taproot tweak: {e}")))?;
        let tweaked = keypair
            .add_xonly_tweak(&self.secp, &tweak)
            .map_err(|e| Error::Sign(format!("cannot tweak key-path keypair: {e}")))?;

        let mut cache = SighashCache::new(tx);
        let sighash = cache
            .taproot_key_spend_signature_hash(index, prevouts, sighash_type, self.genesis_hash)
            .map_err(|e| Error::Sign(e.to_string()))?;
        let message = Message::from_digest(sighash.to_byte_array());
        let sig = self.secp.sign_schnorr_no_aux_rand(&message, &tweaked);

        let input = &mut pset.inputs_mut()[index];
        input.tap_key_sig = Some(SchnorrSig {
            sig,
            hash_ty: sighash_type,
        });
        input.tap_internal_key = Some(internal_key);
        Ok(InputOutcome::SignedKeyPath)
    }

    /// The leaf to spend: the one the input already names, or the first
    /// satisfiable leaf in the cached needs map. Map iteration order (by
    /// leaf-script hex) breaks ties.
    fn select_leaf(
        &self,
        pset: &PartiallySignedTransaction,
        index: usize,
        context: &AddressContext,
    ) -> Result<(Script, LeafVersion)> {
        if let Some((_, (script, version))) = pset.inputs()[index].tap_scripts.iter().next() {
            return Ok((script.clone(), *version));
        }

        for (leaf_hex, needs) in &context.script_needs {
            if self.satisfiable(needs, context) {
                let bytes = hex::decode(leaf_hex)
                    .map_err(|e| Error::Analysis(format!("bad cached leaf hex: {e}")))?;
                return Ok((Script::from(bytes), tapscript_leaf_version()));
            }
        }
        Err(Error::NoSpendablePath)
    }

    /// A leaf is satisfiable when it needs no introspection, no extra
    /// parameters, and every required signer key belongs to this wallet.
    fn satisfiable(&self, needs: &ScriptNeeds, context: &AddressContext) -> bool {
        if needs.has_introspection || needs.needs_extra_parameters {
            return false;
        }
        let Some(owned) = context.public_key else {
            return needs.signatures.is_empty();
        };
        needs
            .signatures
            .iter()
            .all(|need| need_matches_key(need, &owned))
    }

    /// Assemble final witnesses for every signed input and extract the
    /// network-ready transaction.
    pub fn finalize_pset(
        &self,
        pset: &mut PartiallySignedTransaction,
    ) -> Result<elements::Transaction> {
        for index in 0..pset.inputs().len() {
            let witness = self.final_witness(pset, index)?;
            if let Some(witness) = witness {
                pset.inputs_mut()[index].final_script_witness = Some(witness);
            }
        }
        pset.extract_tx()
            .map_err(|e| Error::Finalize(e.to_string()))
    }

    fn final_witness(
        &self,
        pset: &PartiallySignedTransaction,
        index: usize,
    ) -> Result<Option<Vec<Vec<u8>>>> {
        let input = &pset.inputs()[index];

        if let Some(key_sig) = &input.tap_key_sig {
            return Ok(Some(vec![key_sig.to_vec()]));
        }

        if let Some((control_block, (leaf_script, leaf_version))) =
            input.tap_scripts.iter().next()
        {
            let leaf_hash = TapLeafHash::from_script(leaf_script, *leaf_version);
            let needs = input
                .witness_utxo
                .as_ref()
                .and_then(|utxo| self.context_for(&utxo.script_pubkey))
                .and_then(|context| {
                    context
                        .script_needs
                        .get(&hex::encode(leaf_script.as_bytes()))
                        .cloned()
                })
                .unwrap_or_default();

            // Stack order: signatures for the leaf's checks in reverse
            // needs order, then the leaf script and its control block.
            let mut witness = Vec::new();
            for need in needs.signatures.iter().rev() {
                let sig = input
                    .tap_script_sigs
                    .iter()
                    .find(|((key, hash), _)| {
                        *hash == leaf_hash && need_matches_key(need, key)
                    })
                    .map(|(_, sig)| sig);
                let Some(sig) = sig else {
                    // A co-signer still owes a signature for this leaf;
                    // leave the input unfinalized rather than fail the pass.
                    log::warn!(
                        "input {index} is missing a signature for key {}; leaving it unfinalized",
                        hex::encode(&need.public_key)
                    );
                    return Ok(None);
                };
                witness.push(sig.to_vec());
            }
            witness.push(leaf_script.to_bytes());
            witness.push(control_block.serialize());
            return Ok(Some(witness));
        }

        if let Some((public_key, signature)) = input.partial_sigs.iter().next() {
            return Ok(Some(vec![signature.clone(), public_key.to_bytes()]));
        }

        Ok(None)
    }

    fn context_for(&self, script: &Script) -> Option<&AddressContext> {
        self.identities
            .values()
            .find_map(|identity| identity.context_for_script(script))
    }
}

fn need_matches_key(need: &SignatureNeed, key: &XOnlyPublicKey) -> bool {
    let serialized = key.serialize();
    match need.public_key.len() {
        32 => need.public_key == serialized,
        33 => need.public_key[1..] == serialized,
        _ => false,
    }
}
