//! Parser for the textual value representation emitted by the chain API.
//!
//! The grammar is the small subset that appears in pool-relevant contract
//! events: `(tuple (key val) ...)`, `(some val)`, `none`, `u<digits>`,
//! `0x<hex>` buffers, `'<principal>`, `"<string>"` and bare tokens. An `(ok
//! val)` response wrapper is unwrapped transparently. This is not a general
//! Clarity reader; anything outside the subset is a decode error that callers
//! treat as "skip this entry".

use std::collections::BTreeMap;

use crate::error::{KeeperError, KeeperResult};

/// A decoded value-repr node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReprValue {
    Tuple(BTreeMap<String, ReprValue>),
    UInt(u128),
    /// Principals, strings, buffers (kept as `0x`-hex) and bare tokens.
    Scalar(String),
    None,
}

impl ReprValue {
    pub fn get(&self, key: &str) -> Option<&ReprValue> {
        match self {
            ReprValue::Tuple(entries) => entries.get(key),
            _ => None,
        }
    }

    pub fn as_u128(&self) -> Option<u128> {
        match self {
            ReprValue::UInt(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_u128().and_then(|n| u64::try_from(n).ok())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ReprValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ReprValue::None)
    }
}

/// Parse one value-repr expression.
pub fn parse_repr(input: &str) -> KeeperResult<ReprValue> {
    let mut cursor = Cursor::new(input);
    let value = cursor.value()?;
    cursor.skip_whitespace();
    if !cursor.at_end() {
        return Err(KeeperError::Codec(format!(
            "trailing input at byte {}",
            cursor.pos
        )));
    }
    Ok(value)
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn expect(&mut self, expected: char) -> KeeperResult<()> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(KeeperError::Codec(format!(
                "expected '{expected}' at byte {}, found '{c}'",
                self.pos
            ))),
            None => Err(KeeperError::Codec(format!(
                "expected '{expected}', found end of input"
            ))),
        }
    }

    /// A run of characters up to whitespace or a closing paren.
    fn token(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == ')' || c == '(' {
                break;
            }
            self.bump();
        }
        &self.input[start..self.pos]
    }

    fn value(&mut self) -> KeeperResult<ReprValue> {
        self.skip_whitespace();
        match self.peek() {
            Some('(') => self.form(),
            Some('\'') => {
                self.bump();
                Ok(ReprValue::Scalar(self.token().to_string()))
            }
            Some('"') => self.string(),
            Some(_) => {
                let token = self.token();
                if token.is_empty() {
                    return Err(KeeperError::Codec(format!(
                        "empty token at byte {}",
                        self.pos
                    )));
                }
                Ok(scalar_from_token(token))
            }
            None => Err(KeeperError::Codec("unexpected end of input".into())),
        }
    }

    /// A parenthesized production: tuple, optional or response wrapper.
    fn form(&mut self) -> KeeperResult<ReprValue> {
        self.expect('(')?;
        let keyword = self.token();
        match keyword {
            "tuple" => self.tuple_entries(),
            "some" | "ok" => {
                let inner = self.value()?;
                self.skip_whitespace();
                self.expect(')')?;
                Ok(inner)
            }
            other => Err(KeeperError::Codec(format!(
                "unsupported form '({other}'"
            ))),
        }
    }

    fn tuple_entries(&mut self) -> KeeperResult<ReprValue> {
        let mut entries = BTreeMap::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(')') => {
                    self.bump();
                    return Ok(ReprValue::Tuple(entries));
                }
                Some('(') => {
                    self.bump();
                    let key = self.token().to_string();
                    if key.is_empty() {
                        return Err(KeeperError::Codec(format!(
                            "empty tuple key at byte {}",
                            self.pos
                        )));
                    }
                    let value = self.value()?;
                    self.skip_whitespace();
                    self.expect(')')?;
                    entries.insert(key, value);
                }
                Some(c) => {
                    return Err(KeeperError::Codec(format!(
                        "unexpected '{c}' in tuple at byte {}",
                        self.pos
                    )))
                }
                None => {
                    return Err(KeeperError::Codec(
                        "unbalanced parentheses in tuple".into(),
                    ))
                }
            }
        }
    }

    fn string(&mut self) -> KeeperResult<ReprValue> {
        self.expect('"')?;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '"' {
                let content = self.input[start..self.pos].to_string();
                self.bump();
                return Ok(ReprValue::Scalar(content));
            }
            self.bump();
        }
        Err(KeeperError::Codec("unterminated string".into()))
    }
}

fn scalar_from_token(token: &str) -> ReprValue {
    if token == "none" {
        return ReprValue::None;
    }
    if let Some(digits) = token.strip_prefix('u') {
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = digits.parse::<u128>() {
                return ReprValue::UInt(n);
            }
        }
    }
    // Buffers stay as their 0x-hex spelling; anything else is a bare token.
    ReprValue::Scalar(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalars() {
        assert_eq!(parse_repr("u500").unwrap(), ReprValue::UInt(500));
        assert_eq!(parse_repr("none").unwrap(), ReprValue::None);
        assert_eq!(
            parse_repr("0x0a1b").unwrap(),
            ReprValue::Scalar("0x0a1b".to_string())
        );
        assert_eq!(
            parse_repr("'SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7").unwrap(),
            ReprValue::Scalar("SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7".to_string())
        );
        assert_eq!(
            parse_repr("\"delegate-stx\"").unwrap(),
            ReprValue::Scalar("delegate-stx".to_string())
        );
    }

    #[test]
    fn parses_nested_tuples() {
        let repr = "(tuple (name \"delegate-stx\") \
                    (stacker 'SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7) \
                    (data (tuple (amount-ustx u500) (start-cycle-id u8) \
                    (end-cycle-id (some u10)) (pox-addr none))))";
        let value = parse_repr(repr).unwrap();
        assert_eq!(value.get("name").unwrap().as_str(), Some("delegate-stx"));
        let data = value.get("data").unwrap();
        assert_eq!(data.get("amount-ustx").unwrap().as_u128(), Some(500));
        assert_eq!(data.get("start-cycle-id").unwrap().as_u64(), Some(8));
        // (some u10) unwraps to the inner value.
        assert_eq!(data.get("end-cycle-id").unwrap().as_u64(), Some(10));
        assert!(data.get("pox-addr").unwrap().is_none());
    }

    #[test]
    fn parses_pox_addr_tuple() {
        let repr = "(tuple (pox-addr (some (tuple (hashbytes 0x751e76e8199196d454941c45d1b3a323f1433bd6) (version 0x04)))))";
        let value = parse_repr(repr).unwrap();
        let addr = value.get("pox-addr").unwrap();
        assert_eq!(addr.get("version").unwrap().as_str(), Some("0x04"));
        assert_eq!(
            addr.get("hashbytes").unwrap().as_str(),
            Some("0x751e76e8199196d454941c45d1b3a323f1433bd6")
        );
    }

    #[test]
    fn unwraps_ok_response() {
        let value = parse_repr("(ok (tuple (a u1)))").unwrap();
        assert_eq!(value.get("a").unwrap().as_u128(), Some(1));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_repr("(tuple (a u1)").is_err());
        assert!(parse_repr("(list u1 u2)").is_err());
        assert!(parse_repr("(tuple (a u1))) extra").is_err());
        assert!(parse_repr("\"unterminated").is_err());
    }
}
