//! Blinding orchestration over PSETs. Resolves which inputs this wallet
//! can unblind, decides whether this party is the last blinder, and drives
//! the blinding round. Blinding errors are fatal to the whole pass: a
//! partially blinded transaction is unsafe to propagate.

use std::collections::HashMap;

use elements::pset::PartiallySignedTransaction;
use elements::secp256k1_zkp::Secp256k1;
use elements::{OutPoint, TxOutSecrets};

use crate::error::{Error, Result};
use crate::repository::WalletRepository;

/// Whether this party closes the blinding round (producing final range
/// proofs) or leaves room for another party's pass. Multi-party covenant
/// swaps blind sequentially, with no single party knowing every factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinderRole {
    Last,
    NonLast,
}

/// Resolve the previous-output secrets for every input the wallet owns,
/// keyed by input index. Inputs the repository cannot resolve are simply
/// absent (they belong to someone else).
pub fn owned_input_secrets(
    repository: &dyn WalletRepository,
    pset: &PartiallySignedTransaction,
) -> Result<HashMap<usize, TxOutSecrets>> {
    let outpoints: Vec<OutPoint> = pset
        .inputs()
        .iter()
        .map(|input| OutPoint::new(input.previous_txid, input.previous_output_index))
        .collect();

    let resolved = repository.output_blinding_data(&outpoints)?;
    let mut secrets = HashMap::new();
    for (index, data) in resolved.into_iter().enumerate() {
        if let Some(unblinded) = data {
            secrets.insert(
                index,
                TxOutSecrets {
                    asset: unblinded.asset,
                    asset_bf: unblinded.asset_blinding_factor,
                    value: unblinded.value,
                    value_bf: unblinded.value_blinding_factor,
                },
            );
        }
    }
    Ok(secrets)
}

/// Decide this party's role for the pass. `None` means no output still
/// requires blinding from us.
///
/// An output requires blinding when it carries both a blinding key and a
/// blinder-index marker and has not been blinded yet. If any such output
/// designates an input we do not own, another party must still run its own
/// round and we are not last.
pub fn blinder_role(
    pset: &PartiallySignedTransaction,
    owned: &HashMap<usize, TxOutSecrets>,
) -> Option<BlinderRole> {
    let mut saw_output_to_blind = false;
    for output in pset.outputs() {
        let Some(designated) = output.blinder_index else {
            continue;
        };
        if output.blinding_key.is_none() || output.amount_comm.is_some() {
            continue;
        }
        saw_output_to_blind = true;
        if !owned.contains_key(&(designated as usize)) {
            return Some(BlinderRole::NonLast);
        }
    }
    saw_output_to_blind.then_some(BlinderRole::Last)
}

/// Run one blinding pass over the PSET. Returns the role taken, or `None`
/// if no output needed blinding (the PSET is left untouched).
pub fn blind_pset(
    repository: &dyn WalletRepository,
    pset: &mut PartiallySignedTransaction,
) -> Result<Option<BlinderRole>> {
    let owned = owned_input_secrets(repository, pset)?;
    let Some(role) = blinder_role(pset, &owned) else {
        return Ok(None);
    };

    let secp = Secp256k1::new();
    let mut rng = rand::thread_rng();
    match role {
        BlinderRole::Last => pset
            .blind_last(&mut rng, &secp, &owned)
            .map_err(|e| Error::Blind(e.to_string()))?,
        BlinderRole::NonLast => {
            pset.blind_non_last(&mut rng, &secp, &owned)
                .map(|_| ())
                .map_err(|e| Error::Blind(e.to_string()))?;
        }
    }
    Ok(Some(role))
}

#[cfg(test)]
mod tests {
    use super::*;
    use elements::pset::Output;
    use elements::secp256k1_zkp::SecretKey;
    use elements::confidential::{AssetBlindingFactor, ValueBlindingFactor};
    use elements::{AssetId, Script};
    use std::str::FromStr;

    fn test_asset() -> AssetId {
        AssetId::from_str("5ac9f65c0efcc4775e0baec4ec03abdde22473cd3cf33c0419ca290e0751b225")
            .unwrap()
    }

    fn blinding_key() -> elements::bitcoin::PublicKey {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[0x11; 32]).unwrap();
        elements::bitcoin::PublicKey::new(sk.public_key(&secp))
    }

    fn output_to_blind(blinder_index: u32) -> Output {
        let mut output = Output::new_explicit(
            Script::new(),
            1_000,
            test_asset(),
            Some(blinding_key()),
        );
        output.blinder_index = Some(blinder_index);
        output
    }

    fn secrets_for(indices: &[usize]) -> HashMap<usize, TxOutSecrets> {
        indices
            .iter()
            .map(|&i| {
                (
                    i,
                    TxOutSecrets {
                        asset: test_asset(),
                        asset_bf: AssetBlindingFactor::zero(),
                        value: 1_000,
                        value_bf: ValueBlindingFactor::zero(),
                    },
                )
            })
            .collect()
    }

    fn pset_with_outputs(outputs: Vec<Output>) -> PartiallySignedTransaction {
        let mut pset = PartiallySignedTransaction::new_v2();
        for output in outputs {
            pset.add_output(output);
        }
        pset
    }

    #[test]
    fn no_outputs_to_blind_means_no_role() {
        let plain = Output::new_explicit(Script::new(), 500, test_asset(), None);
        let pset = pset_with_outputs(vec![plain]);
        assert_eq!(blinder_role(&pset, &secrets_for(&[0])), None);
    }

    #[test]
    fn owning_all_referenced_inputs_selects_last() {
        let pset = pset_with_outputs(vec![output_to_blind(0), output_to_blind(1)]);
        assert_eq!(
            blinder_role(&pset, &secrets_for(&[0, 1])),
            Some(BlinderRole::Last)
        );
    }

    #[test]
    fn foreign_blinder_index_selects_non_last() {
        let pset = pset_with_outputs(vec![output_to_blind(0), output_to_blind(2)]);
        assert_eq!(
            blinder_role(&pset, &secrets_for(&[0])),
            Some(BlinderRole::NonLast)
        );
    }

    #[test]
    fn owning_no_referenced_inputs_selects_non_last() {
        let pset = pset_with_outputs(vec![output_to_blind(0)]);
        assert_eq!(
            blinder_role(&pset, &secrets_for(&[])),
            Some(BlinderRole::NonLast)
        );
    }

    #[test]
    fn marker_without_blinding_key_is_ignored() {
        let mut output = Output::new_explicit(Script::new(), 500, test_asset(), None);
        output.blinder_index = Some(0);
        let pset = pset_with_outputs(vec![output]);
        assert_eq!(blinder_role(&pset, &secrets_for(&[0])), None);
    }
}
