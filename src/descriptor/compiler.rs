//! Compilation of template ASTs into redeem scripts and witness material.

use elements::Script;
use elements::hashes::{Hash, sha256};
use elements::script::Builder;
use elements::secp256k1_zkp::{Secp256k1, XOnlyPublicKey};
use elements::taproot::{LeafVersion, TaprootBuilder, TaprootSpendInfo};

use crate::error::{Error, Result};

use super::asm;
use super::{Node, NodeKind};

/// The Elements tapscript leaf version (0xc4).
pub fn tapscript_leaf_version() -> LeafVersion {
    LeafVersion::from_u8(0xc4).expect("0xc4 is a valid leaf version")
}

/// How a compiled script is satisfied on the witness side.
pub enum Spend {
    /// A fixed witness stack (empty for bare scripts, the child redeem
    /// script for `elp2wsh`).
    Static { witness: Vec<Vec<u8>> },
    /// A taproot output whose witness depends on the leaf being spent.
    Taproot {
        internal_key: XOnlyPublicKey,
        spend_info: TaprootSpendInfo,
        /// Leaf scripts in depth-first template order.
        leaves: Vec<Script>,
    },
}

/// Result of compiling one AST node. `redeem_script` is never empty on
/// success.
pub struct Compiled {
    pub redeem_script: Script,
    pub spend: Spend,
}

impl Compiled {
    /// The static witness stack, when this compilation has one.
    pub fn static_witness(&self) -> Option<&[Vec<u8>]> {
        match &self.spend {
            Spend::Static { witness } => Some(witness),
            Spend::Taproot { .. } => None,
        }
    }

    /// Leaf scripts committed in the taproot tree, in template order.
    pub fn taproot_leaves(&self) -> &[Script] {
        match &self.spend {
            Spend::Static { .. } => &[],
            Spend::Taproot { leaves, .. } => leaves,
        }
    }

    /// Produce the script-path witness tail `[leaf_script, control_block]`
    /// for the leaf identified by its script hex. The leaf must be one of
    /// the scripts this descriptor was compiled from.
    pub fn taproot_witness(&self, leaf_hex: &str) -> Result<Vec<Vec<u8>>> {
        let (spend_info, leaves) = match &self.spend {
            Spend::Taproot {
                spend_info, leaves, ..
            } => (spend_info, leaves),
            Spend::Static { .. } => {
                return Err(Error::Compile(
                    "witness generator is only available for taproot descriptors".into(),
                ));
            }
        };
        let leaf = leaves
            .iter()
            .find(|script| hex::encode(script.as_bytes()) == leaf_hex)
            .ok_or_else(|| Error::LeafNotFound(leaf_hex.to_string()))?;
        let control_block = spend_info
            .control_block(&(leaf.clone(), tapscript_leaf_version()))
            .ok_or_else(|| Error::LeafNotFound(leaf_hex.to_string()))?;
        Ok(vec![leaf.to_bytes(), control_block.serialize()])
    }
}

/// Compile an AST into a redeem script plus witness material. Structural
/// nodes (`Tree`, `Key`) are only meaningful inside `eltr` and compiling one
/// directly is an error.
pub fn compile(node: &Node) -> Result<Compiled> {
    match node.kind {
        NodeKind::Raw => {
            let hex = node.value.as_deref().unwrap_or_default();
            let bytes =
                hex::decode(hex).map_err(|_| Error::Compile(format!("bad raw hex: {hex}")))?;
            if bytes.is_empty() {
                return Err(Error::Compile("raw script is empty".into()));
            }
            Ok(Compiled {
                redeem_script: Script::from(bytes),
                spend: Spend::Static { witness: vec![] },
            })
        }
        NodeKind::Asm => {
            let body = node.value.as_deref().unwrap_or_default();
            let script = asm::assemble(body)?;
            if script.is_empty() {
                return Err(Error::Compile("asm script is empty".into()));
            }
            Ok(Compiled {
                redeem_script: script,
                spend: Spend::Static { witness: vec![] },
            })
        }
        NodeKind::ElP2wsh => {
            let [child] = node.children.as_slice() else {
                return Err(Error::Compile(format!(
                    "elp2wsh takes exactly one child, got {}",
                    node.children.len()
                )));
            };
            let inner = compile(child)?;
            let witness_script = inner.redeem_script;
            let program = sha256::Hash::hash(witness_script.as_bytes());
            let redeem_script = Builder::new()
                .push_opcode(elements::opcodes::all::OP_PUSHBYTES_0)
                .push_slice(&program.to_byte_array())
                .into_script();
            Ok(Compiled {
                redeem_script,
                spend: Spend::Static {
                    witness: vec![witness_script.to_bytes()],
                },
            })
        }
        NodeKind::ElTr => compile_taproot(node),
        NodeKind::Tree | NodeKind::Key => Err(Error::Compile(format!(
            "{:?} node is structural and cannot be compiled directly",
            node.kind
        ))),
    }
}

fn compile_taproot(node: &Node) -> Result<Compiled> {
    let [key_node, tree_node] = node.children.as_slice() else {
        return Err(Error::Compile(format!(
            "eltr takes exactly two children, got {}",
            node.children.len()
        )));
    };
    if key_node.kind != NodeKind::Key {
        return Err(Error::Compile("eltr first child must be a key".into()));
    }
    if tree_node.kind != NodeKind::Tree {
        return Err(Error::Compile("eltr second child must be a tree".into()));
    }

    let key_hex = key_node.value.as_deref().unwrap_or_default();
    let key_bytes =
        hex::decode(key_hex).map_err(|_| Error::Compile(format!("bad key hex: {key_hex}")))?;
    let internal_key = XOnlyPublicKey::from_slice(&key_bytes)
        .map_err(|e| Error::Compile(format!("invalid taproot internal key: {e}")))?;

    let mut leaves = Vec::new();
    collect_leaves(tree_node, 0, &mut leaves)?;
    if leaves.is_empty() {
        return Err(Error::Compile("taproot tree has no leaves".into()));
    }

    let secp = Secp256k1::verification_only();
    let mut builder = TaprootBuilder::new();
    for (depth, script) in &leaves {
        builder = builder
            .add_leaf_with_ver(*depth, script.clone(), tapscript_leaf_version())
            .map_err(|e| Error::Compile(format!("taproot tree construction: {e}")))?;
    }
    let spend_info = builder
        .finalize(&secp, internal_key)
        .map_err(|_| Error::Compile("taproot tree is incomplete".into()))?;

    let output_key = spend_info.output_key();
    let mut script_bytes = Vec::with_capacity(34);
    script_bytes.push(0x51); // OP_1 (witness version 1)
    script_bytes.push(0x20); // push 32 bytes
    script_bytes.extend_from_slice(&output_key.into_inner().serialize());

    Ok(Compiled {
        redeem_script: Script::from(script_bytes),
        spend: Spend::Taproot {
            internal_key,
            spend_info,
            leaves: leaves.into_iter().map(|(_, script)| script).collect(),
        },
    })
}

/// Depth-first flattening of a tree node into `(depth, leaf_script)` pairs.
/// A `Tree` with one child is a leaf wrapper; with two children it is a
/// branch and both sides recurse one level deeper.
fn collect_leaves(node: &Node, depth: usize, out: &mut Vec<(usize, Script)>) -> Result<()> {
    match node.children.as_slice() {
        [leaf] => {
            let compiled = compile(leaf)?;
            out.push((depth, compiled.redeem_script));
            Ok(())
        }
        [left, right] => {
            collect_leaves(left, depth + 1, out)?;
            collect_leaves(right, depth + 1, out)?;
            Ok(())
        }
        other => Err(Error::Compile(format!(
            "tree node must have one or two children, got {}",
            other.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::parser::parse;

    #[test]
    fn raw_compiles_to_literal_bytes() {
        let compiled = compile(&parse("raw(51ac)").unwrap()).unwrap();
        assert_eq!(compiled.redeem_script.as_bytes(), &[0x51, 0xac]);
        assert_eq!(compiled.static_witness(), Some(&[][..]));
    }

    #[test]
    fn elp2wsh_wraps_child_hash() {
        let compiled = compile(&parse("elp2wsh(raw(51))").unwrap()).unwrap();
        let child_hash = sha256::Hash::hash(&[0x51]);
        let mut expected = vec![0x00, 0x20];
        expected.extend_from_slice(&child_hash.to_byte_array());
        assert_eq!(compiled.redeem_script.as_bytes(), expected.as_slice());
        assert_eq!(compiled.static_witness(), Some(&[vec![0x51u8]][..]));
    }

    #[test]
    fn structural_nodes_do_not_compile() {
        let node = Node::leaf(NodeKind::Key, "00".repeat(32));
        assert!(compile(&node).is_err());
    }

    #[test]
    fn empty_raw_is_rejected() {
        let node = Node::leaf(NodeKind::Raw, String::new());
        assert!(compile(&node).is_err());
    }
}
