//! Assembly of `asm(...)` template bodies into Elements scripts.

use std::collections::HashMap;
use std::sync::OnceLock;

use elements::Script;
use elements::opcodes::All;
use elements::script::Builder;

use crate::error::{Error, Result};

/// Canonical opcode-name table, derived from the opcode `Debug` rendering so
/// Elements-specific opcodes (introspection, 64-bit arithmetic) come for free.
fn opcode_table() -> &'static HashMap<String, All> {
    static TABLE: OnceLock<HashMap<String, All>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = HashMap::new();
        for byte in 0u8..=255 {
            let op = All::from(byte);
            table.insert(format!("{:?}", op), op);
        }
        table
    })
}

fn lookup_opcode(token: &str) -> Option<All> {
    use elements::opcodes::all;

    // Common aliases not covered by the canonical renderings.
    let alias = match token {
        "OP_0" | "OP_FALSE" => Some(all::OP_PUSHBYTES_0),
        "OP_1" | "OP_TRUE" => Some(all::OP_PUSHNUM_1),
        "OP_2" => Some(all::OP_PUSHNUM_2),
        "OP_3" => Some(all::OP_PUSHNUM_3),
        "OP_4" => Some(all::OP_PUSHNUM_4),
        "OP_5" => Some(all::OP_PUSHNUM_5),
        "OP_6" => Some(all::OP_PUSHNUM_6),
        "OP_7" => Some(all::OP_PUSHNUM_7),
        "OP_8" => Some(all::OP_PUSHNUM_8),
        "OP_9" => Some(all::OP_PUSHNUM_9),
        "OP_10" => Some(all::OP_PUSHNUM_10),
        "OP_11" => Some(all::OP_PUSHNUM_11),
        "OP_12" => Some(all::OP_PUSHNUM_12),
        "OP_13" => Some(all::OP_PUSHNUM_13),
        "OP_14" => Some(all::OP_PUSHNUM_14),
        "OP_15" => Some(all::OP_PUSHNUM_15),
        "OP_16" => Some(all::OP_PUSHNUM_16),
        _ => None,
    };
    alias.or_else(|| opcode_table().get(token).copied())
}

/// Assemble a whitespace-separated script listing. Tokens starting with `OP_`
/// must name an opcode; every other token must be hex data and becomes a
/// minimal push.
pub fn assemble(asm: &str) -> Result<Script> {
    let mut builder = Builder::new();
    for token in asm.split_whitespace() {
        if token.starts_with("OP_") {
            let op = lookup_opcode(token)
                .ok_or_else(|| Error::Parse(format!("unknown opcode {token}")))?;
            builder = builder.push_opcode(op);
        } else {
            let data = hex::decode(token)
                .map_err(|_| Error::Parse(format!("asm token is neither opcode nor hex: {token}")))?;
            builder = builder.push_slice(&data);
        }
    }
    Ok(builder.into_script())
}
