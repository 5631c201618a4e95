//! Static analysis of tapscript leaves: what does a script require before it
//! can be satisfied?

use std::collections::BTreeMap;

use elements::Script;
use elements::opcodes::All;
use elements::opcodes::all as op;
use elements::script::Instruction;

use crate::descriptor::{Compiled, Spend};
use crate::error::{Error, Result};

/// A signature requirement discovered next to an `OP_CHECKSIG`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureNeed {
    /// The public key pushed immediately before the opcode (x-only or
    /// compressed, as the script encodes it).
    pub public_key: Vec<u8>,
}

/// What a leaf script needs to be satisfied. Merged via a commutative,
/// associative union when several opcodes contribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptNeeds {
    pub signatures: Vec<SignatureNeed>,
    pub has_introspection: bool,
    pub needs_extra_parameters: bool,
}

impl ScriptNeeds {
    pub fn merge(mut self, other: ScriptNeeds) -> ScriptNeeds {
        self.signatures.extend(other.signatures);
        self.has_introspection |= other.has_introspection;
        self.needs_extra_parameters |= other.needs_extra_parameters;
        self
    }

    /// A script needing nothing at all is spendable by construction alone.
    pub fn auto_spendable(&self) -> bool {
        self.signatures.is_empty() && !self.has_introspection && !self.needs_extra_parameters
    }
}

fn is_introspection(opcode: All) -> bool {
    matches!(
        opcode,
        op::OP_INSPECTINPUTOUTPOINT
            | op::OP_INSPECTINPUTASSET
            | op::OP_INSPECTINPUTVALUE
            | op::OP_INSPECTINPUTSCRIPTPUBKEY
            | op::OP_INSPECTINPUTSEQUENCE
            | op::OP_INSPECTINPUTISSUANCE
            | op::OP_PUSHCURRENTINPUTINDEX
            | op::OP_INSPECTOUTPUTASSET
            | op::OP_INSPECTOUTPUTVALUE
            | op::OP_INSPECTOUTPUTNONCE
            | op::OP_INSPECTOUTPUTSCRIPTPUBKEY
            | op::OP_INSPECTVERSION
            | op::OP_INSPECTLOCKTIME
            | op::OP_INSPECTNUMINPUTS
            | op::OP_INSPECTNUMOUTPUTS
            | op::OP_TXWEIGHT
    )
}

/// Opcodes whose satisfaction depends on data the wallet cannot produce on
/// its own: arithmetic (script-num and 64-bit), stack manipulation, hashing,
/// multisig, string operations, explicit pushdata and control flow.
fn needs_parameters(opcode: All) -> bool {
    matches!(
        opcode,
        // control flow
        op::OP_IF
            | op::OP_NOTIF
            | op::OP_ELSE
            | op::OP_ENDIF
            | op::OP_VERIFY
            // pushdata variants
            | op::OP_PUSHDATA1
            | op::OP_PUSHDATA2
            | op::OP_PUSHDATA4
            // stack manipulation
            | op::OP_TOALTSTACK
            | op::OP_FROMALTSTACK
            | op::OP_2DROP
            | op::OP_2DUP
            | op::OP_3DUP
            | op::OP_2OVER
            | op::OP_2ROT
            | op::OP_2SWAP
            | op::OP_IFDUP
            | op::OP_DEPTH
            | op::OP_DROP
            | op::OP_DUP
            | op::OP_NIP
            | op::OP_OVER
            | op::OP_PICK
            | op::OP_ROLL
            | op::OP_ROT
            | op::OP_SWAP
            | op::OP_TUCK
            // string ops
            | op::OP_CAT
            | op::OP_SUBSTR
            | op::OP_LEFT
            | op::OP_RIGHT
            | op::OP_SIZE
            | op::OP_AND
            | op::OP_OR
            | op::OP_XOR
            // arithmetic
            | op::OP_1ADD
            | op::OP_1SUB
            | op::OP_NEGATE
            | op::OP_ABS
            | op::OP_NOT
            | op::OP_0NOTEQUAL
            | op::OP_ADD
            | op::OP_SUB
            | op::OP_BOOLAND
            | op::OP_BOOLOR
            | op::OP_NUMEQUAL
            | op::OP_NUMEQUALVERIFY
            | op::OP_NUMNOTEQUAL
            | op::OP_LESSTHAN
            | op::OP_GREATERTHAN
            | op::OP_LESSTHANOREQUAL
            | op::OP_GREATERTHANOREQUAL
            | op::OP_MIN
            | op::OP_MAX
            | op::OP_WITHIN
            // 64-bit arithmetic
            | op::OP_ADD64
            | op::OP_SUB64
            | op::OP_MUL64
            | op::OP_DIV64
            | op::OP_NEG64
            | op::OP_LESSTHAN64
            | op::OP_LESSTHANOREQUAL64
            | op::OP_GREATERTHAN64
            | op::OP_GREATERTHANOREQUAL64
            | op::OP_SCRIPTNUMTOLE64
            | op::OP_LE64TOSCRIPTNUM
            | op::OP_LE32TOLE64
            // hashing
            | op::OP_RIPEMD160
            | op::OP_SHA1
            | op::OP_SHA256
            | op::OP_HASH160
            | op::OP_HASH256
            // multisig
            | op::OP_CHECKMULTISIG
            | op::OP_CHECKMULTISIGVERIFY
    )
}

/// Analyze one script. Walks the decompiled opcode/data stack left to right
/// and merges the needs contributed at every position.
///
/// An `OP_CHECKSIG` whose preceding element is not a data push is recorded
/// as `needs_extra_parameters` rather than rejected: the key may be
/// assembled on the stack at runtime, which this wallet cannot satisfy but
/// a co-signer might.
pub fn analyze(script: &Script) -> Result<ScriptNeeds> {
    let instructions: Vec<Instruction> = script
        .instructions()
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Analysis(format!("undecompilable script: {e}")))?;

    let mut needs = ScriptNeeds::default();
    for (position, instruction) in instructions.iter().enumerate() {
        let contribution = match instruction {
            Instruction::PushBytes(_) => ScriptNeeds::default(),
            Instruction::Op(opcode) => match *opcode {
                op::OP_CHECKSIG => match position.checked_sub(1).map(|p| &instructions[p]) {
                    Some(Instruction::PushBytes(key)) => ScriptNeeds {
                        signatures: vec![SignatureNeed {
                            public_key: key.to_vec(),
                        }],
                        ..Default::default()
                    },
                    _ => ScriptNeeds {
                        needs_extra_parameters: true,
                        ..Default::default()
                    },
                },
                other if is_introspection(other) => ScriptNeeds {
                    has_introspection: true,
                    ..Default::default()
                },
                other if needs_parameters(other) => ScriptNeeds {
                    needs_extra_parameters: true,
                    ..Default::default()
                },
                _ => ScriptNeeds::default(),
            },
        };
        needs = needs.merge(contribution);
    }
    Ok(needs)
}

/// Analyze every leaf of a compiled taproot descriptor. Non-taproot
/// compilations yield an empty map; a single broken leaf fails the whole
/// analysis.
pub fn analyze_taproot_tree(compiled: &Compiled) -> Result<BTreeMap<String, ScriptNeeds>> {
    let mut by_leaf = BTreeMap::new();
    if let Spend::Taproot { leaves, .. } = &compiled.spend {
        for leaf in leaves {
            by_leaf.insert(hex::encode(leaf.as_bytes()), analyze(leaf)?);
        }
    }
    Ok(by_leaf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::asm::assemble;

    const KEY: &str = "c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";

    #[test]
    fn pubkey_checksig_yields_one_signature_need() {
        let script = assemble(&format!("{KEY} OP_CHECKSIG")).unwrap();
        let needs = analyze(&script).unwrap();
        assert_eq!(needs.signatures.len(), 1);
        assert_eq!(needs.signatures[0].public_key, hex::decode(KEY).unwrap());
        assert!(!needs.has_introspection);
        assert!(!needs.needs_extra_parameters);
        assert!(!needs.auto_spendable());
    }

    #[test]
    fn bare_checksig_needs_extra_parameters() {
        let script = assemble("OP_CHECKSIG").unwrap();
        let needs = analyze(&script).unwrap();
        assert!(needs.signatures.is_empty());
        assert!(needs.needs_extra_parameters);
    }

    #[test]
    fn introspection_is_flagged_regardless_of_content() {
        let script = assemble(&format!("{KEY} OP_CHECKSIG OP_INSPECTLOCKTIME")).unwrap();
        let needs = analyze(&script).unwrap();
        assert!(needs.has_introspection);
        assert_eq!(needs.signatures.len(), 1);
    }

    #[test]
    fn push_only_script_is_auto_spendable() {
        let script = assemble("OP_1").unwrap();
        assert!(analyze(&script).unwrap().auto_spendable());
    }

    #[test]
    fn merge_is_commutative_and_associative() {
        let a = analyze(&assemble(&format!("{KEY} OP_CHECKSIG")).unwrap()).unwrap();
        let b = analyze(&assemble("OP_INSPECTLOCKTIME").unwrap()).unwrap();
        let c = analyze(&assemble("OP_ADD64").unwrap()).unwrap();

        let ab = a.clone().merge(b.clone());
        let ba = b.clone().merge(a.clone());
        assert_eq!(ab.has_introspection, ba.has_introspection);
        assert_eq!(ab.needs_extra_parameters, ba.needs_extra_parameters);
        assert_eq!(ab.signatures.len(), ba.signatures.len());

        let left = a.clone().merge(b.clone()).merge(c.clone());
        let right = a.merge(b.merge(c));
        assert_eq!(left, right);
    }
}
