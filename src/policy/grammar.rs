//! Recursive-descent parser for the capability grammar (spec §4.1):
//!
//! ```text
//! caps       := grants idmap?
//! grants     := grant ( [, ;] grant )*
//! grant      := "allow" capspec match?
//! capspec    := "*" | "all" | "rwps" | "rwp" | "rws" | "rw" | "r"
//! match      := ( uid gidlist? ) | ( path uid gidlist? ) | path
//! path       := "path" "=" ( quoted | unquoted )
//! quoted     := '"' ... '"' | "'" ... "'"
//! unquoted   := [A-Za-z0-9_./-]+
//! uid        := "uid" "=" UINT
//! gidlist    := "gids" "=" UINT ("," UINT)*
//! idmap      := "idmap"
//! ```
//!
//! No parser-combinator crate is used — the grammar is small enough that a
//! hand-written recursive descent is clearer and pulls in no dependency.

use std::fmt;

use super::{CapSpec, Gid, Grant, Match, Policy, Uid};

/// A malformed capability string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// The full original input.
    pub input: String,
    /// The unconsumed suffix at the point parsing stopped.
    pub unconsumed: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "capability parse failed, stopped at '{}' of '{}'",
            self.unconsumed, self.input
        )
    }
}

impl std::error::Error for ParseError {}

/// Parse `text` into a `Policy`. See module docs for the grammar.
pub fn parse(text: &str) -> Result<Policy, ParseError> {
    // Legacy shortcut: the exact string "allow" (no grant body) is a single
    // unconstrained RWPS grant. Checked by strict equality, matching the
    // precedent this grammar was distilled from — no whitespace tolerance.
    if text == "allow" {
        return Ok(Policy {
            grants: vec![Grant::new(CapSpec::LETTER_RWPS, Match::any())],
            idmap_required: false,
            config: None,
        });
    }

    let mut cur = Cursor::new(text);
    let grants = match parse_grants(&mut cur) {
        Ok(g) => g,
        Err(()) => {
            return Err(ParseError {
                input: text.to_string(),
                unconsumed: cur.remaining().to_string(),
            })
        }
    };

    cur.skip_ws();
    // idmap := "idmap", repeated zero or more times (whitespace-separated).
    while cur.eat_literal("idmap") {
        cur.skip_ws();
    }
    cur.skip_ws();

    if !cur.is_at_end() {
        return Err(ParseError {
            input: text.to_string(),
            unconsumed: cur.remaining().to_string(),
        });
    }

    let mut grants = grants;
    for grant in &mut grants {
        grant.matcher.gids.sort_unstable();
    }

    Ok(Policy {
        grants,
        idmap_required: text.contains("idmap"),
        config: None,
    })
}

fn parse_grants(cur: &mut Cursor<'_>) -> Result<Vec<Grant>, ()> {
    let mut grants = vec![parse_grant(cur)?];
    loop {
        let checkpoint = cur.pos;
        cur.skip_ws();
        if !(cur.eat_char(',') || cur.eat_char(';')) {
            cur.pos = checkpoint;
            break;
        }
        cur.skip_ws();
        grants.push(parse_grant(cur)?);
    }
    Ok(grants)
}

fn parse_grant(cur: &mut Cursor<'_>) -> Result<Grant, ()> {
    cur.skip_ws();
    if !cur.eat_literal("allow") {
        return Err(());
    }
    cur.skip_ws();
    let spec = parse_capspec(cur)?;
    let matcher = parse_match(cur);
    Ok(Grant::new(spec, matcher))
}

fn parse_capspec(cur: &mut Cursor<'_>) -> Result<CapSpec, ()> {
    // Longest-match-first so "rwps" isn't mistaken for "rw" followed by
    // garbage.
    const ALTERNATIVES: &[(&str, CapSpec)] = &[
        ("*", CapSpec::ALL),
        ("all", CapSpec::ALL),
        ("rwps", CapSpec::LETTER_RWPS),
        ("rwp", CapSpec::LETTER_RWP),
        ("rws", CapSpec::LETTER_RWS),
        ("rw", CapSpec::LETTER_RW),
        ("r", CapSpec::LETTER_R),
    ];
    for (literal, spec) in ALTERNATIVES {
        if cur.eat_literal(literal) {
            return Ok(*spec);
        }
    }
    Err(())
}

/// `match := ( uid gidlist? ) | ( path uid gidlist? ) | path`, collapsed:
/// each of `path=`, `uid=`, `gids=` is keyword-prefixed and mutually
/// distinct, so parsing them as independent optionals in sequence accepts
/// exactly the same strings the alternation does.
fn parse_match(cur: &mut Cursor<'_>) -> Match {
    let mut m = Match::any();

    let checkpoint = cur.pos;
    cur.skip_ws();
    if let Some(path) = try_parse_path(cur) {
        m.path = Match::normalize_path(&path);
    } else {
        cur.pos = checkpoint;
    }

    let checkpoint = cur.pos;
    cur.skip_ws();
    if let Some(uid) = try_parse_uid(cur) {
        m.uid = uid;
    } else {
        cur.pos = checkpoint;
        return m;
    }

    let checkpoint = cur.pos;
    cur.skip_ws();
    if let Some(gids) = try_parse_gidlist(cur) {
        m.gids = gids;
    } else {
        cur.pos = checkpoint;
    }

    m
}

fn try_parse_path(cur: &mut Cursor<'_>) -> Option<String> {
    let checkpoint = cur.pos;
    if !cur.eat_literal("path") {
        return None;
    }
    cur.skip_ws();
    if !cur.eat_char('=') {
        cur.pos = checkpoint;
        return None;
    }
    cur.skip_ws();
    if cur.peek() == Some('"') || cur.peek() == Some('\'') {
        let quote = cur.peek().unwrap();
        cur.advance();
        let start = cur.pos;
        while cur.peek().is_some_and(|c| c != quote) {
            cur.advance();
        }
        let value = cur.input[start..cur.pos].to_string();
        if !cur.eat_char(quote) {
            cur.pos = checkpoint;
            return None;
        }
        Some(value)
    } else {
        let start = cur.pos;
        while cur
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || "_./-".contains(c))
        {
            cur.advance();
        }
        if cur.pos == start {
            cur.pos = checkpoint;
            return None;
        }
        Some(cur.input[start..cur.pos].to_string())
    }
}

fn try_parse_uid(cur: &mut Cursor<'_>) -> Option<Uid> {
    let checkpoint = cur.pos;
    if !cur.eat_literal("uid") {
        return None;
    }
    cur.skip_ws();
    if !cur.eat_char('=') {
        cur.pos = checkpoint;
        return None;
    }
    cur.skip_ws();
    match cur.eat_uint() {
        Some(v) => Some(v as Uid),
        None => {
            cur.pos = checkpoint;
            None
        }
    }
}

fn try_parse_gidlist(cur: &mut Cursor<'_>) -> Option<Vec<Gid>> {
    let checkpoint = cur.pos;
    if !cur.eat_literal("gids") {
        return None;
    }
    cur.skip_ws();
    if !cur.eat_char('=') {
        cur.pos = checkpoint;
        return None;
    }
    cur.skip_ws();
    let mut gids = Vec::new();
    match cur.eat_uint() {
        Some(v) => gids.push(v),
        None => {
            cur.pos = checkpoint;
            return None;
        }
    }
    loop {
        let inner_checkpoint = cur.pos;
        cur.skip_ws();
        if !cur.eat_char(',') {
            cur.pos = inner_checkpoint;
            break;
        }
        cur.skip_ws();
        match cur.eat_uint() {
            Some(v) => gids.push(v),
            None => {
                cur.pos = inner_checkpoint;
                break;
            }
        }
    }
    Some(gids)
}

/// A minimal parsing cursor over the input string, tolerant of ASCII
/// whitespace (space, tab, newline) between tokens.
struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn is_at_end(&self) -> bool {
        self.remaining().is_empty()
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t' | '\n' | '\r')) {
            self.advance();
        }
    }

    fn eat_char(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_literal(&mut self, literal: &str) -> bool {
        if self.remaining().starts_with(literal) {
            self.pos += literal.len();
            true
        } else {
            false
        }
    }

    fn eat_uint(&mut self) -> Option<u64> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.pos == start {
            return None;
        }
        self.input[start..self.pos].parse::<u64>().ok()
    }
}
