//! Escaping of values for textual SQL.
//!
//! Every value embedded in a literal statement goes through exactly one of
//! these functions. The result is a [`SqlLiteral`], which is already escaped
//! and cannot be passed back in, so a value is never escaped twice.
//!
//! Text that is entirely printable is written as a quoted string with single
//! quotes doubled. Text containing NUL or other control characters (tab,
//! newline and carriage return excepted) is written as a hex blob cast back to
//! text, so the stored value is byte-for-byte identical to the input.

use std::fmt;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// An escaped SQL literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlLiteral(String);

impl SqlLiteral {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SqlLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn null() -> SqlLiteral {
    SqlLiteral("NULL".to_string())
}

pub fn integer(value: i64) -> SqlLiteral {
    // The positive magnitude of i64::MIN does not parse as an integer.
    if value == i64::MIN {
        return SqlLiteral("(-9223372036854775807 - 1)".to_string());
    }
    SqlLiteral(value.to_string())
}

pub fn real(value: f64) -> SqlLiteral {
    if value.is_nan() {
        return null();
    }
    if value.is_infinite() {
        let sign = if value < 0.0 { "-" } else { "" };
        return SqlLiteral(format!("{sign}9e999"));
    }
    // Debug formatting is the shortest representation that parses back to
    // the same f64, and always contains a '.' or an exponent.
    SqlLiteral(format!("{value:?}"))
}

pub fn text(value: &str) -> SqlLiteral {
    if is_printable(value) {
        let mut literal = String::with_capacity(value.len() + 2);
        literal.push('\'');
        for c in value.chars() {
            if c == '\'' {
                literal.push('\'');
            }
            literal.push(c);
        }
        literal.push('\'');
        SqlLiteral(literal)
    } else {
        SqlLiteral(format!("CAST({} AS TEXT)", hex_blob(value.as_bytes())))
    }
}

pub fn bytes(value: &[u8]) -> SqlLiteral {
    SqlLiteral(hex_blob(value))
}

/// Whether `value` can be embedded as a quoted string.
pub fn is_printable(value: &str) -> bool {
    !value
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
}

fn hex_blob(value: &[u8]) -> String {
    let mut literal = String::with_capacity(value.len() * 2 + 3);
    literal.push_str("X'");
    for byte in value {
        literal.push(HEX_DIGITS[usize::from(byte >> 4)] as char);
        literal.push(HEX_DIGITS[usize::from(byte & 0x0F)] as char);
    }
    literal.push('\'');
    literal
}
