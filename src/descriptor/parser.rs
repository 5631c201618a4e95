//! Recursive-descent parser for the output-script template language.
//!
//! Grammar:
//!
//! ```text
//! descriptor := raw(<hex>) | asm(<script-asm>) | elp2wsh(<descriptor>) | eltr(<key-hex>, <tree>)
//! tree       := descriptor | { tree , tree }
//! ```
//!
//! Whitespace between tokens is insignificant. Alternatives are tried in
//! order and all failure messages are surfaced joined by `"; "` when none
//! matches. No partial AST is ever returned.

use crate::error::{Error, Result};

use super::{Node, NodeKind};

#[derive(Clone)]
struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Cursor { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.text.len() - trimmed.len();
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Consume a literal token, skipping leading whitespace.
    fn tag(&mut self, token: &str) -> Result<()> {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            Ok(())
        } else {
            Err(Error::Parse(format!(
                "expected `{token}` at offset {}",
                self.pos
            )))
        }
    }

    /// Consume characters until one of `stops` (not consumed) or end of input.
    fn take_until(&mut self, stops: &[char]) -> &'a str {
        let rest = self.rest();
        let end = rest.find(|c| stops.contains(&c)).unwrap_or(rest.len());
        self.pos += end;
        &rest[..end]
    }
}

fn require_hex(raw: &str, what: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::Parse(format!("empty {what}")));
    }
    hex::decode(trimmed).map_err(|_| Error::Parse(format!("malformed {what} hex: {trimmed}")))?;
    Ok(trimmed.to_lowercase())
}

fn parse_raw(c: &mut Cursor) -> Result<Node> {
    c.tag("raw(")?;
    let hex = require_hex(c.take_until(&[')']), "raw script")?;
    c.tag(")")?;
    Ok(Node::leaf(NodeKind::Raw, hex))
}

fn parse_asm(c: &mut Cursor) -> Result<Node> {
    c.tag("asm(")?;
    let body = c.take_until(&[')']).trim().to_string();
    if body.is_empty() {
        return Err(Error::Parse("empty asm body".into()));
    }
    c.tag(")")?;
    Ok(Node::leaf(NodeKind::Asm, body))
}

fn parse_elp2wsh(c: &mut Cursor) -> Result<Node> {
    c.tag("elp2wsh(")?;
    let child = parse_descriptor(c)?;
    c.tag(")")?;
    Ok(Node {
        kind: NodeKind::ElP2wsh,
        value: None,
        children: vec![child],
    })
}

fn parse_key(c: &mut Cursor) -> Result<Node> {
    c.skip_ws();
    let hex = require_hex(c.take_until(&[',', ')']), "taproot internal key")?;
    if hex.len() != 64 {
        return Err(Error::Parse(format!(
            "taproot internal key must be 32 bytes, got {} hex chars",
            hex.len()
        )));
    }
    Ok(Node::leaf(NodeKind::Key, hex))
}

fn parse_eltr(c: &mut Cursor) -> Result<Node> {
    c.tag("eltr(")?;
    let key = parse_key(c)?;
    c.tag(",")?;
    let tree = parse_tree(c)?;
    c.tag(")")?;
    Ok(Node {
        kind: NodeKind::ElTr,
        value: None,
        children: vec![key, tree],
    })
}

/// A tree is either a brace-grouped pair of trees or a single leaf
/// descriptor. Either way the result is wrapped in a `Tree` node so the
/// compiler sees a uniform shape.
fn parse_tree(c: &mut Cursor) -> Result<Node> {
    c.skip_ws();
    if c.peek() == Some('{') {
        c.tag("{")?;
        let left = parse_tree(c)?;
        c.tag(",")?;
        let right = parse_tree(c)?;
        c.tag("}")?;
        Ok(Node {
            kind: NodeKind::Tree,
            value: None,
            children: vec![left, right],
        })
    } else {
        let leaf = parse_descriptor(c)?;
        Ok(Node {
            kind: NodeKind::Tree,
            value: None,
            children: vec![leaf],
        })
    }
}

/// Try each descriptor alternative in order; first success wins and all
/// failures are reported together when nothing matches.
fn parse_descriptor(c: &mut Cursor) -> Result<Node> {
    let alternatives: [fn(&mut Cursor) -> Result<Node>; 4] =
        [parse_raw, parse_asm, parse_elp2wsh, parse_eltr];

    let mut failures = Vec::with_capacity(alternatives.len());
    for parse in alternatives {
        let mut lookahead = c.clone();
        match parse(&mut lookahead) {
            Ok(node) => {
                *c = lookahead;
                return Ok(node);
            }
            Err(e) => failures.push(e.to_string()),
        }
    }
    Err(Error::Parse(failures.join("; ")))
}

/// Parse a full template into its AST. Trailing garbage is an error.
pub fn parse(text: &str) -> Result<Node> {
    let mut cursor = Cursor::new(text);
    let node = parse_descriptor(&mut cursor)?;
    cursor.skip_ws();
    if !cursor.at_end() {
        return Err(Error::Parse(format!(
            "unexpected trailing input: {}",
            cursor.rest()
        )));
    }
    Ok(node)
}
