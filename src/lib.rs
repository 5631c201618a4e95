//! Wallet core for covenant accounts on Elements-based networks.
//!
//! Builds output scripts from a small descriptor language (`raw`, `asm`,
//! `elp2wsh`, `eltr`), analyzes tapscript leaves for what they need to be
//! satisfied, derives confidential addresses per account with gap-limit
//! restoration, and orchestrates multi-party blinding and best-effort
//! signing over PSETs.

pub use elements;

pub mod account;
pub mod analyzer;
pub mod blinder;
pub mod contract;
pub mod descriptor;
pub mod error;
pub mod network;
pub mod repository;
pub mod restore;
pub mod signer;
pub mod slip77;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use account::{AccountIdentity, AddressContext, DerivedAddress, IdentityState};
pub use analyzer::{ScriptNeeds, SignatureNeed, analyze, analyze_taproot_tree};
pub use blinder::{BlinderRole, blind_pset, blinder_role, owned_input_secrets};
pub use contract::ContractTemplate;
pub use descriptor::{Compiled, Spend, evaluate};
pub use error::{Error, Result};
pub use network::Network;
pub use repository::{
    AccountDetails, AccountKind, AppRepository, ScriptDetails, UnblindedOutput, WalletRepository,
};
pub use restore::{
    DEFAULT_GAP_LIMIT, ElectrumOracle, RestorationState, UsageOracle, restore,
    restore_from_state,
};
pub use signer::{InputOutcome, Signer, SigningReport};
pub use slip77::MasterBlindingKey;
