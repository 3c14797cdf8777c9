//! Radix-36 item ids.
//!
//! Upstream ids are assigned in increasing numeric order, but their string
//! order does not follow (`"z" > "10"` lexically, 35 < 36 numerically). Every
//! freshness comparison goes through [`decode_base36`].

use crate::{Error, Result};

pub fn decode_base36(raw: &str) -> Result<u64> {
    if raw.is_empty() {
        return Err(Error::Fetch("empty item id".to_string()));
    }
    if !raw.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(Error::Fetch(format!("item id {raw:?} is not base36")));
    }
    u64::from_str_radix(raw, 36)
        .map_err(|e| Error::Fetch(format!("item id {raw:?} does not fit u64: {e}")))
}
