//! Address encoding for the two chains the pool touches.
//!
//! PoX reward addresses arrive as `(version, hashbytes)` pairs and are
//! rendered as canonical BTC addresses for the configured network; principals
//! decoded from binary Clarity values are rendered with c32check.

use bech32::{ToBase32, Variant};
use sha2::{Digest, Sha256};

use crate::error::{KeeperError, KeeperResult};

const C32_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

// Single-sig c32 address versions.
const C32_VERSION_MAINNET: u8 = 22;
const C32_VERSION_TESTNET: u8 = 26;
// Multi-sig c32 address versions.
const C32_VERSION_MAINNET_MULTISIG: u8 = 20;
const C32_VERSION_TESTNET_MULTISIG: u8 = 21;

/// PoX reward address version bytes as emitted by the contract.
const POX_VERSION_P2PKH: u8 = 0x00;
const POX_VERSION_P2SH: u8 = 0x01;
const POX_VERSION_P2SH_P2WPKH: u8 = 0x02;
const POX_VERSION_P2SH_P2WSH: u8 = 0x03;
const POX_VERSION_P2WPKH: u8 = 0x04;
const POX_VERSION_P2WSH: u8 = 0x05;
const POX_VERSION_P2TR: u8 = 0x06;

/// Convert a PoX `(version, hashbytes)` pair to a BTC address string.
pub fn pox_to_btc_address(version: u8, hashbytes: &[u8], mainnet: bool) -> KeeperResult<String> {
    match version {
        POX_VERSION_P2PKH => {
            base58check(hashbytes, 20, if mainnet { 0x00 } else { 0x6f })
        }
        POX_VERSION_P2SH | POX_VERSION_P2SH_P2WPKH | POX_VERSION_P2SH_P2WSH => {
            base58check(hashbytes, 20, if mainnet { 0x05 } else { 0xc4 })
        }
        POX_VERSION_P2WPKH => segwit(hashbytes, 20, 0, mainnet, Variant::Bech32),
        POX_VERSION_P2WSH => segwit(hashbytes, 32, 0, mainnet, Variant::Bech32),
        POX_VERSION_P2TR => segwit(hashbytes, 32, 1, mainnet, Variant::Bech32m),
        other => Err(KeeperError::Codec(format!(
            "unknown pox address version 0x{other:02x}"
        ))),
    }
}

fn base58check(hashbytes: &[u8], expected_len: usize, version: u8) -> KeeperResult<String> {
    if hashbytes.len() != expected_len {
        return Err(KeeperError::Codec(format!(
            "pox hashbytes length {} (expected {expected_len})",
            hashbytes.len()
        )));
    }
    Ok(bs58::encode(hashbytes)
        .with_check_version(version)
        .into_string())
}

fn segwit(
    hashbytes: &[u8],
    expected_len: usize,
    witness_version: u8,
    mainnet: bool,
    variant: Variant,
) -> KeeperResult<String> {
    if hashbytes.len() != expected_len {
        return Err(KeeperError::Codec(format!(
            "pox hashbytes length {} (expected {expected_len})",
            hashbytes.len()
        )));
    }
    let hrp = if mainnet { "bc" } else { "tb" };
    let mut data = vec![bech32::u5::try_from_u8(witness_version)
        .map_err(|e| KeeperError::Codec(e.to_string()))?];
    data.extend(hashbytes.to_base32());
    bech32::encode(hrp, data, variant).map_err(|e| KeeperError::Codec(e.to_string()))
}

/// Whether a string decodes as a BTC address for the given network.
pub fn is_valid_btc_address(address: &str, mainnet: bool) -> bool {
    if let Ok(decoded) = bs58::decode(address).with_check(None).into_vec() {
        if decoded.len() != 21 {
            return false;
        }
        let accepted: &[u8] = if mainnet {
            &[0x00, 0x05]
        } else {
            &[0x6f, 0xc4]
        };
        return accepted.contains(&decoded[0]);
    }
    if let Ok((hrp, data, _variant)) = bech32::decode(address) {
        let expected_hrp = if mainnet { "bc" } else { "tb" };
        if hrp != expected_hrp || data.is_empty() {
            return false;
        }
        let witness_version = data[0].to_u8();
        let program: Vec<u8> = match bech32::FromBase32::from_base32(&data[1..]) {
            Ok(program) => program,
            Err(_) => return false,
        };
        return witness_version <= 1 && matches!(program.len(), 20 | 32);
    }
    false
}

/// Render a c32check address from a version byte and a hash160.
pub fn c32_address(version: u8, hash160: &[u8]) -> String {
    let mut payload = Vec::with_capacity(hash160.len() + 4);
    payload.extend_from_slice(hash160);
    payload.extend_from_slice(&c32_checksum(version, hash160));
    format!(
        "S{}{}",
        C32_ALPHABET[version as usize & 0x1f] as char,
        c32_encode(&payload)
    )
}

/// Whether a string is a well-formed c32check principal for the network.
pub fn is_valid_stacks_address(address: &str, mainnet: bool) -> bool {
    let mut chars = address.chars();
    if chars.next() != Some('S') {
        return false;
    }
    let version_char = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    let version = match C32_ALPHABET.iter().position(|&b| b as char == version_char) {
        Some(v) => v as u8,
        None => return false,
    };
    let accepted: &[u8] = if mainnet {
        &[C32_VERSION_MAINNET, C32_VERSION_MAINNET_MULTISIG]
    } else {
        &[C32_VERSION_TESTNET, C32_VERSION_TESTNET_MULTISIG]
    };
    if !accepted.contains(&version) {
        return false;
    }
    let body = chars.as_str();
    let decoded = match c32_decode(body) {
        Some(decoded) => decoded,
        None => return false,
    };
    if decoded.len() != 24 {
        return false;
    }
    let (hash160, checksum) = decoded.split_at(20);
    checksum == c32_checksum(version, hash160)
}

fn c32_checksum(version: u8, payload: &[u8]) -> [u8; 4] {
    let mut preimage = Vec::with_capacity(payload.len() + 1);
    preimage.push(version);
    preimage.extend_from_slice(payload);
    let first = Sha256::digest(&preimage);
    let second = Sha256::digest(first);
    let mut checksum = [0u8; 4];
    checksum.copy_from_slice(&second[..4]);
    checksum
}

/// Base-32 digits of the input taken as a big-endian integer, with one '0'
/// prepended per leading zero byte (the c32check convention).
fn c32_encode(data: &[u8]) -> String {
    let mut digits: Vec<u8> = Vec::new();
    let mut num: Vec<u8> = data.to_vec();
    while num.iter().any(|&b| b != 0) {
        let mut remainder: u32 = 0;
        let mut quotient = Vec::with_capacity(num.len());
        for &byte in &num {
            let acc = (remainder << 8) | byte as u32;
            quotient.push((acc / 32) as u8);
            remainder = acc % 32;
        }
        let first_nonzero = quotient
            .iter()
            .position(|&b| b != 0)
            .unwrap_or(quotient.len());
        num = quotient[first_nonzero..].to_vec();
        digits.push(remainder as u8);
    }
    let mut encoded: String = digits
        .iter()
        .rev()
        .map(|&d| C32_ALPHABET[d as usize] as char)
        .collect();
    for &byte in data {
        if byte != 0 {
            break;
        }
        encoded.insert(0, '0');
    }
    encoded
}

fn c32_decode(encoded: &str) -> Option<Vec<u8>> {
    let mut num: Vec<u8> = vec![0];
    for c in encoded.chars() {
        let digit = C32_ALPHABET.iter().position(|&b| b as char == c)? as u32;
        let mut carry = digit;
        for byte in num.iter_mut().rev() {
            let acc = (*byte as u32) * 32 + carry;
            *byte = (acc & 0xff) as u8;
            carry = acc >> 8;
        }
        while carry > 0 {
            num.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    let first_nonzero = num.iter().position(|&b| b != 0).unwrap_or(num.len());
    let mut bytes = num[first_nonzero..].to_vec();
    for c in encoded.chars() {
        if c != '0' {
            break;
        }
        bytes.insert(0, 0);
    }
    Some(bytes)
}
