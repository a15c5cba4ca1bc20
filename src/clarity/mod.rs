//! The small slice of Clarity the pool needs: the textual value-repr parser
//! for contract events, a binary codec for the reward-index map round trip,
//! and address rendering helpers.

pub mod address;
pub mod codec;
pub mod repr;

pub use address::{c32_address, is_valid_btc_address, is_valid_stacks_address, pox_to_btc_address};
pub use codec::{decode_hex, encode_map_key, ClarityValue};
pub use repr::{parse_repr, ReprValue};
