use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("template parse error: {0}")]
    Parse(String),

    #[error("template compile error: {0}")]
    Compile(String),

    #[error("taproot leaf not found: {0}")]
    LeafNotFound(String),

    #[error("script analysis error: {0}")]
    Analysis(String),

    #[error("no substitution context for extended public key {0}")]
    MissingSubstitution(String),

    #[error("invalid contract template: {0}")]
    InvalidContract(String),

    #[error("key derivation error: {0}")]
    Derivation(String),

    #[error("identity not restored")]
    NotRestored,

    #[error("restoration failed: {0}")]
    Restore(String),

    #[error("address usage oracle error: {0}")]
    Oracle(String),

    #[error("blinding error: {0}")]
    Blind(String),

    #[error("signing error: {0}")]
    Sign(String),

    #[error("PSET finalization error: {0}")]
    Finalize(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("unsupported account type for account {0}")]
    UnsupportedAccountType(String),

    #[error("no satisfiable spending path found")]
    NoSpendablePath,

    #[error("contradictory taproot input fields at index {0}")]
    ContradictoryInput(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
