//! Purpose: Decode the tuples of one `VALUES` clause into typed rows.
//! Exports: `parse_values`, `ValueListParser`.
//! Role: Shared by table extraction and attachment export; the only literal decoder.
//! Invariants: Single left-to-right pass, no lookahead, never fails.
//! Invariants: A row is emitted only at its closing `)`; nothing after a top-level `;` is read.
//! Invariants: Bare empty slots are dropped, quoted `''` is kept; this fixes row arity on bad input.
use crate::core::scalar::{Row, Scalar};

/// Tokenizes a statement body such as `(1,'a'),(2,NULL)`.
pub fn parse_values(body: &str) -> Vec<Row> {
    let mut parser = ValueListParser::new();
    for ch in body.chars() {
        if !parser.feed(ch) {
            break;
        }
    }
    parser.finish()
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum CharClass {
    Normal,
    InString,
    InStringEscape,
}

/// Step-wise form of [`parse_values`]; one instance per statement body.
#[derive(Debug)]
pub struct ValueListParser {
    token: String,
    token_is_string: bool,
    pending_value: bool,
    row: Row,
    rows: Vec<Row>,
    class: CharClass,
}

impl Default for ValueListParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueListParser {
    pub fn new() -> Self {
        Self {
            token: String::new(),
            token_is_string: false,
            pending_value: false,
            row: Row::new(),
            rows: Vec::new(),
            class: CharClass::Normal,
        }
    }

    /// Consumes one character. Returns `false` once the statement-ending `;` is seen.
    pub fn feed(&mut self, ch: char) -> bool {
        match self.class {
            CharClass::InStringEscape => {
                self.token.push(unescape(ch));
                self.class = CharClass::InString;
            }
            CharClass::InString => match ch {
                '\\' => self.class = CharClass::InStringEscape,
                '\'' => {
                    self.token_is_string = true;
                    self.pending_value = true;
                    self.class = CharClass::Normal;
                }
                _ => self.token.push(ch),
            },
            CharClass::Normal => match ch {
                '(' => {
                    self.reset_token();
                    self.row.clear();
                }
                '\'' => {
                    self.token.clear();
                    self.token_is_string = true;
                    self.pending_value = false;
                    self.class = CharClass::InString;
                }
                ',' => self.commit(),
                ')' => {
                    self.commit();
                    if !self.row.is_empty() {
                        self.rows.push(std::mem::take(&mut self.row));
                    }
                }
                ';' => return false,
                _ => self.token.push(ch),
            },
        }
        true
    }

    /// Rows closed so far. An open tuple without its `)` is discarded.
    pub fn finish(self) -> Vec<Row> {
        self.rows
    }

    fn reset_token(&mut self) {
        self.token.clear();
        self.token_is_string = false;
        self.pending_value = false;
    }

    fn commit(&mut self) {
        if !self.pending_value && self.token.trim().is_empty() {
            self.reset_token();
            return;
        }
        let scalar = if self.token_is_string {
            Scalar::Text(std::mem::take(&mut self.token))
        } else {
            coerce_bare(&self.token)
        };
        self.row.push(scalar);
        self.reset_token();
    }
}

fn unescape(ch: char) -> char {
    match ch {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        '0' => '\0',
        'Z' => '\u{1a}',
        other => other,
    }
}

/// Types an unquoted literal: NULL, integer, float, else opaque text.
fn coerce_bare(token: &str) -> Scalar {
    let text = token.trim();
    if text.eq_ignore_ascii_case("NULL") {
        return Scalar::Null;
    }
    if text.is_empty() {
        return Scalar::Text(String::new());
    }
    if let Ok(value) = text.parse::<i64>() {
        return Scalar::Integer(value);
    }
    if let Ok(value) = text.parse::<f64>() {
        return Scalar::Float(value);
    }
    Scalar::Text(text.to_string())
}
