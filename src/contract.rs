//! Covenant contract descriptors: a namespace plus the script templates its
//! addresses are generated from.

use serde::{Deserialize, Serialize};

use crate::descriptor::preprocess::preprocess_with_placeholder;
use crate::descriptor::{compile, parse};
use crate::error::{Error, Result};

/// A syntactically valid x-only key, substituted for xpub placeholders when
/// validating template syntax (the secp generator point's x coordinate).
const PLACEHOLDER_KEY: &str = "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

/// A covenant account's template configuration. Both templates are parsed
/// and compiled at construction; a `ContractTemplate` that exists is
/// guaranteed evaluable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractTemplate {
    namespace: String,
    receive_template: Option<String>,
    change_template: Option<String>,
}

impl ContractTemplate {
    pub fn new(
        namespace: impl Into<String>,
        receive_template: Option<String>,
        change_template: Option<String>,
    ) -> Result<Self> {
        let namespace = namespace.into();
        if namespace.is_empty() {
            return Err(Error::InvalidContract("namespace must be non-empty".into()));
        }
        if change_template.is_some() && receive_template.is_none() {
            return Err(Error::InvalidContract(
                "change template requires a receive template".into(),
            ));
        }
        for template in receive_template.iter().chain(change_template.iter()) {
            Self::validate_template(template)?;
        }
        Ok(ContractTemplate {
            namespace,
            receive_template,
            change_template,
        })
    }

    fn validate_template(template: &str) -> Result<()> {
        let substituted = preprocess_with_placeholder(template, PLACEHOLDER_KEY);
        let ast = parse(&substituted)
            .map_err(|e| Error::InvalidContract(format!("template does not parse: {e}")))?;
        compile(&ast)
            .map_err(|e| Error::InvalidContract(format!("template does not compile: {e}")))?;
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn receive_template(&self) -> Option<&str> {
        self.receive_template.as_deref()
    }

    /// The change template, defaulting to the receive template when no
    /// dedicated one is configured.
    pub fn change_template(&self) -> Option<&str> {
        self.change_template
            .as_deref()
            .or(self.receive_template.as_deref())
    }
}
