//! The output-script template language: preprocessing, parsing and
//! compilation into redeem scripts, witness stacks and taproot trees.

pub mod asm;
pub mod compiler;
pub mod parser;
pub mod preprocess;

pub use compiler::{Compiled, Spend, compile, tapscript_leaf_version};
pub use parser::parse;
pub use preprocess::{KeySubstitution, SubstitutionContext, preprocess};

use crate::error::Result;

/// AST node kinds. `Tree` and `Key` are structural: they only appear inside
/// an `ElTr` node and cannot be compiled on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Raw,
    Asm,
    ElP2wsh,
    ElTr,
    Tree,
    Key,
}

/// One parsed template node. Constructed by [`parse`], consumed by
/// [`compile`], not retained afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub value: Option<String>,
    pub children: Vec<Node>,
}

impl Node {
    pub(crate) fn leaf(kind: NodeKind, value: impl Into<String>) -> Self {
        Node {
            kind,
            value: Some(value.into()),
            children: Vec::new(),
        }
    }
}

/// Preprocess, parse and compile a template in one step. Deterministic for a
/// fixed context: the same text and context always yield the same scripts.
pub fn evaluate(context: &SubstitutionContext, text: &str) -> Result<Compiled> {
    let substituted = preprocess(context, text)?;
    let ast = parse(&substituted)?;
    compile(&ast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn evaluate_is_deterministic() {
        let ctx = HashMap::new();
        let a = evaluate(&ctx, "elp2wsh(raw(51))").unwrap();
        let b = evaluate(&ctx, "elp2wsh(raw(51))").unwrap();
        assert_eq!(a.redeem_script, b.redeem_script);
    }
}
