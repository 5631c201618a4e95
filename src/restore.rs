//! Gap-limit restoration: replay an account's derivation history against a
//! chain usage oracle, or against a previously persisted snapshot.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use elements::Script;

use crate::account::{AccountIdentity, IdentityState};
use crate::error::{Error, Result};

/// BIP-44 convention: stop scanning a branch after this many consecutive
/// unused addresses.
pub const DEFAULT_GAP_LIMIT: u32 = 20;

/// Answers "has this output script ever appeared on chain".
pub trait UsageOracle {
    fn script_used(&self, script: &Script) -> Result<bool>;
}

/// Usage oracle backed by an Electrum server.
pub struct ElectrumOracle {
    electrum_url: String,
}

impl ElectrumOracle {
    pub fn new(electrum_url: &str) -> Self {
        Self {
            electrum_url: electrum_url.to_string(),
        }
    }

    fn client(&self) -> Result<electrum_client::Client> {
        electrum_client::Client::new(&self.electrum_url)
            .map_err(|e| Error::Oracle(e.to_string()))
    }

    fn script_hash_hex(script_pubkey: &[u8]) -> String {
        let mut hash = Sha256::digest(script_pubkey).to_vec();
        hash.reverse();
        hex::encode(&hash)
    }
}

impl UsageOracle for ElectrumOracle {
    fn script_used(&self, script: &Script) -> Result<bool> {
        use electrum_client::ElectrumApi;

        let client = self.client()?;
        let script_hash_hex = Self::script_hash_hex(script.as_bytes());

        // Use raw_call instead of the typed history API: the typed variants
        // deserialize as Bitcoin, which fails on Liquid/Elements data.
        let resp = client
            .raw_call(
                "blockchain.scripthash.get_history",
                [electrum_client::Param::String(script_hash_hex)],
            )
            .map_err(|e| Error::Oracle(e.to_string()))?;

        let entries = resp
            .as_array()
            .ok_or_else(|| Error::Oracle("expected array response".into()))?;
        Ok(!entries.is_empty())
    }
}

/// Snapshot of a finished restoration, suitable for persistence. Replaying
/// it with [`restore_from_state`] rebuilds the address cache without
/// touching the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorationState {
    pub account_name: String,
    pub next_external: u32,
    pub next_internal: u32,
}

/// Scan both derivation branches from index zero until `gap_limit`
/// consecutive unused addresses are seen, caching every derived address
/// along the way.
///
/// A failed scan leaves the identity `Uninitialized`; the next attempt
/// starts over from index zero rather than resuming a half-finished scan.
pub fn restore(
    identity: &mut AccountIdentity,
    oracle: &dyn UsageOracle,
    gap_limit: u32,
) -> Result<RestorationState> {
    identity.set_state(IdentityState::Restoring);

    let outcome = scan_both_branches(identity, oracle, gap_limit);
    match outcome {
        Ok((next_external, next_internal)) => {
            identity.set_next_index(false, next_external);
            identity.set_next_index(true, next_internal);
            identity.set_state(IdentityState::Ready);
            Ok(RestorationState {
                account_name: identity.account_name().to_string(),
                next_external,
                next_internal,
            })
        }
        Err(e) => {
            log::warn!(
                "restoration of account {} failed: {e}",
                identity.account_name()
            );
            identity.set_state(IdentityState::Uninitialized);
            Err(Error::Restore(e.to_string()))
        }
    }
}

fn scan_both_branches(
    identity: &mut AccountIdentity,
    oracle: &dyn UsageOracle,
    gap_limit: u32,
) -> Result<(u32, u32)> {
    let next_external = scan_branch(identity, oracle, gap_limit, false)?;
    let next_internal = scan_branch(identity, oracle, gap_limit, true)?;
    Ok((next_external, next_internal))
}

fn scan_branch(
    identity: &mut AccountIdentity,
    oracle: &dyn UsageOracle,
    gap_limit: u32,
    is_change: bool,
) -> Result<u32> {
    let mut index = 0u32;
    let mut consecutive_unused = 0u32;
    let mut next = 0u32;
    while consecutive_unused < gap_limit {
        let derived = identity.address_at(is_change, index)?;
        if oracle.script_used(&derived.script_pubkey)? {
            consecutive_unused = 0;
            next = index + 1;
        } else {
            consecutive_unused += 1;
        }
        index += 1;
    }
    Ok(next)
}

/// Rebuild the address cache from a persisted snapshot, without network
/// access. Derivation is deterministic, so replaying the counters yields
/// the same addresses the original scan found.
pub fn restore_from_state(
    identity: &mut AccountIdentity,
    state: &RestorationState,
) -> Result<()> {
    if state.account_name != identity.account_name() {
        return Err(Error::Restore(format!(
            "snapshot is for account {}, not {}",
            state.account_name,
            identity.account_name()
        )));
    }
    identity.set_state(IdentityState::Restoring);
    for index in 0..state.next_external {
        identity.address_at(false, index)?;
    }
    for index in 0..state.next_internal {
        identity.address_at(true, index)?;
    }
    identity.set_next_index(false, state.next_external);
    identity.set_next_index(true, state.next_internal);
    identity.set_state(IdentityState::Ready);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::repository::AccountKind;
    use elements::bitcoin::bip32::DerivationPath;
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::str::FromStr;

    struct ScriptedOracle {
        used: HashSet<Vec<u8>>,
        fail_after: Option<usize>,
        calls: RefCell<usize>,
    }

    impl ScriptedOracle {
        fn new(used: impl IntoIterator<Item = Script>) -> Self {
            Self {
                used: used.into_iter().map(|s| s.to_bytes()).collect(),
                fail_after: None,
                calls: RefCell::new(0),
            }
        }
    }

    impl UsageOracle for ScriptedOracle {
        fn script_used(&self, script: &Script) -> Result<bool> {
            let mut calls = self.calls.borrow_mut();
            *calls += 1;
            if let Some(limit) = self.fail_after {
                if *calls > limit {
                    return Err(Error::Oracle("connection reset".into()));
                }
            }
            Ok(self.used.contains(script.as_bytes()))
        }
    }

    fn identity() -> AccountIdentity {
        AccountIdentity::new(
            Network::LiquidRegtest,
            &[7u8; 64],
            "main",
            AccountKind::P2wpkh,
            DerivationPath::from_str("m/84'/1'/0'").unwrap(),
            None,
        )
        .unwrap()
    }

    fn script_at(is_change: bool, index: u32) -> Script {
        identity().address_at(is_change, index).unwrap().script_pubkey
    }

    #[test]
    fn empty_history_yields_zero_counters() {
        let mut identity = identity();
        let oracle = ScriptedOracle::new([]);
        let state = restore(&mut identity, &oracle, 5).unwrap();
        assert_eq!(state.next_external, 0);
        assert_eq!(state.next_internal, 0);
        assert_eq!(identity.state(), IdentityState::Ready);
    }

    #[test]
    fn scan_continues_past_gaps_smaller_than_the_limit() {
        // Used at external 0 and 3: the gap of two at 1..=2 must not stop
        // the scan, and the counter lands right after the last used index.
        let oracle = ScriptedOracle::new([script_at(false, 0), script_at(false, 3)]);
        let mut identity = identity();
        let state = restore(&mut identity, &oracle, 5).unwrap();
        assert_eq!(state.next_external, 4);
        assert_eq!(state.next_internal, 0);
        assert_eq!(identity.next_index(false), 4);
    }

    #[test]
    fn branches_are_scanned_independently() {
        let oracle = ScriptedOracle::new([script_at(true, 1)]);
        let mut identity = identity();
        let state = restore(&mut identity, &oracle, 3).unwrap();
        assert_eq!(state.next_external, 0);
        assert_eq!(state.next_internal, 2);
    }

    #[test]
    fn oracle_failure_resets_to_uninitialized() {
        let mut oracle = ScriptedOracle::new([script_at(false, 0)]);
        oracle.fail_after = Some(2);
        let mut identity = identity();
        let err = restore(&mut identity, &oracle, 5).unwrap_err();
        assert!(matches!(err, Error::Restore(_)));
        assert_eq!(identity.state(), IdentityState::Uninitialized);
    }

    #[test]
    fn restore_from_state_rebuilds_the_cache() {
        let state = RestorationState {
            account_name: "main".to_string(),
            next_external: 3,
            next_internal: 1,
        };
        let mut identity = identity();
        restore_from_state(&mut identity, &state).unwrap();
        assert_eq!(identity.state(), IdentityState::Ready);
        assert_eq!(identity.next_index(false), 3);
        assert_eq!(identity.next_index(true), 1);
        assert_eq!(identity.cached_scripts().count(), 4);
        assert!(
            identity
                .context_for_script(&script_at(false, 2))
                .is_some()
        );
    }

    #[test]
    fn restore_from_state_rejects_foreign_snapshot() {
        let state = RestorationState {
            account_name: "other".to_string(),
            next_external: 1,
            next_internal: 0,
        };
        let mut identity = identity();
        assert!(restore_from_state(&mut identity, &state).is_err());
    }

    #[test]
    fn restoration_state_roundtrips_through_json() {
        let state = RestorationState {
            account_name: "main".to_string(),
            next_external: 21,
            next_internal: 4,
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: RestorationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
