//! Lookup of string values in a parameter file (`\0PSF` key/value table).
//!
//! Layout (little-endian): magic, version, key table start, data table
//! start, entry count, then 16-byte index entries
//! `{key_off u16, fmt u16, len u32, max_len u32, data_off u32}`.

const SFO_MAGIC: &[u8; 4] = b"\0PSF";
const HEADER_LEN: usize = 20;
const INDEX_LEN: usize = 16;
const FMT_UTF8: u16 = 0x0204;
const FMT_UTF8_SPECIAL: u16 = 0x0004;

fn le_u16(data: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes(data.get(at..at + 2)?.try_into().ok()?))
}

fn le_u32(data: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes(data.get(at..at + 4)?.try_into().ok()?))
}

fn c_str(data: &[u8]) -> &[u8] {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    &data[..end]
}

/// Returns the string stored under `key`, or None if the table is malformed,
/// the key is missing, or the value is not a string.
pub fn get_string(data: &[u8], key: &str) -> Option<String> {
    if data.len() < HEADER_LEN || &data[..4] != SFO_MAGIC {
        return None;
    }
    let key_table = le_u32(data, 8)? as usize;
    let data_table = le_u32(data, 12)? as usize;
    let count = le_u32(data, 16)? as usize;
    for i in 0..count {
        let at = HEADER_LEN + i * INDEX_LEN;
        let key_off = le_u16(data, at)? as usize;
        let fmt = le_u16(data, at + 2)?;
        let len = le_u32(data, at + 4)? as usize;
        let data_off = le_u32(data, at + 12)? as usize;
        let name = c_str(data.get(key_table + key_off..)?);
        if name != key.as_bytes() {
            continue;
        }
        if fmt != FMT_UTF8 && fmt != FMT_UTF8_SPECIAL {
            return None;
        }
        let start = data_table + data_off;
        let value = data.get(start..start + len)?;
        return Some(String::from_utf8_lossy(c_str(value)).into_owned());
    }
    None
}

/// Builds a parameter table from `(key, value)` string pairs.
#[cfg(test)]
pub(crate) fn build(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut keys = Vec::new();
    let mut values = Vec::new();
    let mut index = Vec::new();
    for (k, v) in pairs {
        let key_off = keys.len() as u16;
        keys.extend_from_slice(k.as_bytes());
        keys.push(0);
        let data_off = values.len() as u32;
        let len = v.len() as u32 + 1;
        values.extend_from_slice(v.as_bytes());
        values.push(0);
        while values.len() % 4 != 0 {
            values.push(0);
        }
        index.extend_from_slice(&key_off.to_le_bytes());
        index.extend_from_slice(&FMT_UTF8.to_le_bytes());
        index.extend_from_slice(&len.to_le_bytes());
        index.extend_from_slice(&len.to_le_bytes());
        index.extend_from_slice(&data_off.to_le_bytes());
    }
    while keys.len() % 4 != 0 {
        keys.push(0);
    }
    let key_table = (HEADER_LEN + index.len()) as u32;
    let data_table = key_table + keys.len() as u32;
    let mut out = Vec::new();
    out.extend_from_slice(SFO_MAGIC);
    out.extend_from_slice(&0x0101u32.to_le_bytes());
    out.extend_from_slice(&key_table.to_le_bytes());
    out.extend_from_slice(&data_table.to_le_bytes());
    out.extend_from_slice(&(pairs.len() as u32).to_le_bytes());
    out.extend_from_slice(&index);
    out.extend_from_slice(&keys);
    out.extend_from_slice(&values);
    out
}
