//! Blinding passes over in-memory repositories: owned-input resolution,
//! last-blinder selection and a full blind-last round.

use std::str::FromStr;

use limpet::elements::bitcoin::bip32::DerivationPath;
use limpet::elements::confidential::{AssetBlindingFactor, ValueBlindingFactor};
use limpet::elements::pset::{Input, Output, PartiallySignedTransaction};
use limpet::elements::secp256k1_zkp::{Secp256k1, SecretKey};
use limpet::elements::{Script, TxOut};
use limpet::testing::{MemoryWalletRepository, TEST_SEED, test_asset, test_outpoint};
use limpet::{
    AccountIdentity, AccountKind, BlinderRole, Network, UnblindedOutput, blind_pset,
    owned_input_secrets,
};

fn blinding_pubkey() -> limpet::elements::bitcoin::PublicKey {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&[0x33; 32]).unwrap();
    limpet::elements::bitcoin::PublicKey::new(sk.public_key(&secp))
}

fn receive_script() -> Script {
    let mut identity = AccountIdentity::new(
        Network::LiquidRegtest,
        &TEST_SEED,
        "main",
        AccountKind::P2wpkh,
        DerivationPath::from_str("m/84'/1'/0'").unwrap(),
        None,
    )
    .unwrap();
    identity.next_address().unwrap().script_pubkey
}

fn unblinded(value: u64) -> UnblindedOutput {
    UnblindedOutput {
        asset: test_asset(),
        value,
        asset_blinding_factor: AssetBlindingFactor::zero(),
        value_blinding_factor: ValueBlindingFactor::zero(),
    }
}

#[test]
fn unresolvable_inputs_are_not_owned() {
    let mut wallet = MemoryWalletRepository::new();
    wallet.insert_blinding_data(test_outpoint(0), unblinded(10_000));

    let mut pset = PartiallySignedTransaction::new_v2();
    pset.add_input(Input::from_prevout(test_outpoint(0)));
    pset.add_input(Input::from_prevout(test_outpoint(7)));

    let owned = owned_input_secrets(&wallet, &pset).unwrap();
    assert_eq!(owned.len(), 1);
    assert!(owned.contains_key(&0));
}

#[test]
fn blind_last_round_commits_the_output() {
    let mut wallet = MemoryWalletRepository::new();
    wallet.insert_blinding_data(test_outpoint(0), unblinded(10_000));

    let mut pset = PartiallySignedTransaction::new_v2();
    let mut input = Input::from_prevout(test_outpoint(0));
    input.witness_utxo = Some(TxOut::new_fee(10_000, test_asset()));
    pset.add_input(input);

    let mut output = Output::new_explicit(
        receive_script(),
        9_000,
        test_asset(),
        Some(blinding_pubkey()),
    );
    output.blinder_index = Some(0);
    pset.add_output(output);
    pset.add_output(Output::from_txout(TxOut::new_fee(1_000, test_asset())));

    let role = blind_pset(&wallet, &mut pset).unwrap();
    assert_eq!(role, Some(BlinderRole::Last));
    assert!(pset.outputs()[0].amount_comm.is_some());
    assert!(pset.outputs()[0].asset_comm.is_some());
}

#[test]
fn fully_explicit_pset_is_left_untouched() {
    let wallet = MemoryWalletRepository::new();

    let mut pset = PartiallySignedTransaction::new_v2();
    pset.add_input(Input::from_prevout(test_outpoint(0)));
    pset.add_output(Output::new_explicit(
        receive_script(),
        9_000,
        test_asset(),
        None,
    ));
    pset.add_output(Output::from_txout(TxOut::new_fee(1_000, test_asset())));

    let role = blind_pset(&wallet, &mut pset).unwrap();
    assert_eq!(role, None);
    assert!(pset.outputs()[0].amount_comm.is_none());
}
