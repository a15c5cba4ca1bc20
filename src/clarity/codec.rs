//! Minimal Clarity consensus (de)serializer.
//!
//! Covers exactly what the reward-index map round trip needs: encoding a
//! `(tuple (index uint) (reward-cycle uint))` lookup key, and decoding the
//! `(optional (tuple ...))` map values the node returns. Tags outside that
//! subset are decode errors.

use std::collections::BTreeMap;

use crate::clarity::address::c32_address;
use crate::error::{KeeperError, KeeperResult};

const TAG_UINT: u8 = 0x01;
const TAG_BUFFER: u8 = 0x02;
const TAG_BOOL_TRUE: u8 = 0x03;
const TAG_BOOL_FALSE: u8 = 0x04;
const TAG_PRINCIPAL_STANDARD: u8 = 0x05;
const TAG_PRINCIPAL_CONTRACT: u8 = 0x06;
const TAG_OPTIONAL_NONE: u8 = 0x09;
const TAG_OPTIONAL_SOME: u8 = 0x0a;
const TAG_LIST: u8 = 0x0b;
const TAG_TUPLE: u8 = 0x0c;

/// A decoded binary Clarity value (wire subset).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClarityValue {
    UInt(u128),
    Buffer(Vec<u8>),
    Bool(bool),
    /// Rendered c32check form, `address.name` for contract principals.
    Principal(String),
    OptionalNone,
    OptionalSome(Box<ClarityValue>),
    List(Vec<ClarityValue>),
    Tuple(BTreeMap<String, ClarityValue>),
}

impl ClarityValue {
    pub fn as_u128(&self) -> Option<u128> {
        match self {
            ClarityValue::UInt(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&[u8]> {
        match self {
            ClarityValue::Buffer(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_option(&self) -> Option<&ClarityValue> {
        match self {
            ClarityValue::OptionalSome(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&ClarityValue> {
        match self {
            ClarityValue::Tuple(entries) => entries.get(key),
            _ => None,
        }
    }
}

/// Hex-encode the `(index, reward-cycle)` map lookup key.
pub fn encode_map_key(reward_cycle: u64, index: u64) -> String {
    let mut out = Vec::with_capacity(64);
    out.push(TAG_TUPLE);
    out.extend_from_slice(&2u32.to_be_bytes());
    // Tuple entries are serialized in lexicographic key order.
    write_clarity_name(&mut out, "index");
    write_uint(&mut out, index as u128);
    write_clarity_name(&mut out, "reward-cycle");
    write_uint(&mut out, reward_cycle as u128);
    format!("0x{}", hex::encode(out))
}

fn write_clarity_name(out: &mut Vec<u8>, name: &str) {
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
}

fn write_uint(out: &mut Vec<u8>, value: u128) {
    out.push(TAG_UINT);
    out.extend_from_slice(&value.to_be_bytes());
}

/// Decode a `0x`-prefixed hex string into a Clarity value.
pub fn decode_hex(hex_str: &str) -> KeeperResult<ClarityValue> {
    let stripped = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes =
        hex::decode(stripped).map_err(|e| KeeperError::Codec(format!("bad hex: {e}")))?;
    let mut reader = Reader::new(&bytes);
    let value = reader.value()?;
    if !reader.at_end() {
        return Err(KeeperError::Codec("trailing bytes after value".into()));
    }
    Ok(value)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos == self.bytes.len()
    }

    fn take(&mut self, n: usize) -> KeeperResult<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(KeeperError::Codec(format!(
                "truncated value: wanted {n} bytes at offset {}",
                self.pos
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn byte(&mut self) -> KeeperResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32_be(&mut self) -> KeeperResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn clarity_name(&mut self) -> KeeperResult<String> {
        let len = self.byte()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| KeeperError::Codec("non-utf8 tuple key".into()))
    }

    fn value(&mut self) -> KeeperResult<ClarityValue> {
        let tag = self.byte()?;
        match tag {
            TAG_UINT => {
                let bytes = self.take(16)?;
                let mut buf = [0u8; 16];
                buf.copy_from_slice(bytes);
                Ok(ClarityValue::UInt(u128::from_be_bytes(buf)))
            }
            TAG_BUFFER => {
                let len = self.u32_be()? as usize;
                Ok(ClarityValue::Buffer(self.take(len)?.to_vec()))
            }
            TAG_BOOL_TRUE => Ok(ClarityValue::Bool(true)),
            TAG_BOOL_FALSE => Ok(ClarityValue::Bool(false)),
            TAG_PRINCIPAL_STANDARD => {
                let version = self.byte()?;
                let hash = self.take(20)?;
                Ok(ClarityValue::Principal(c32_address(version, hash)))
            }
            TAG_PRINCIPAL_CONTRACT => {
                let version = self.byte()?;
                let hash = self.take(20)?.to_vec();
                let name = self.clarity_name()?;
                Ok(ClarityValue::Principal(format!(
                    "{}.{name}",
                    c32_address(version, &hash)
                )))
            }
            TAG_OPTIONAL_NONE => Ok(ClarityValue::OptionalNone),
            TAG_OPTIONAL_SOME => Ok(ClarityValue::OptionalSome(Box::new(self.value()?))),
            TAG_LIST => {
                let count = self.u32_be()? as usize;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(self.value()?);
                }
                Ok(ClarityValue::List(items))
            }
            TAG_TUPLE => {
                let count = self.u32_be()? as usize;
                let mut entries = BTreeMap::new();
                for _ in 0..count {
                    let key = self.clarity_name()?;
                    let value = self.value()?;
                    entries.insert(key, value);
                }
                Ok(ClarityValue::Tuple(entries))
            }
            other => Err(KeeperError::Codec(format!(
                "unsupported clarity type tag 0x{other:02x}"
            ))),
        }
    }
}
