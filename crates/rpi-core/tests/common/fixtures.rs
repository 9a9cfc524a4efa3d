//! Package and zip bytes built from scratch.

use rpi_core::package::{ENTRY_ID_ICON0_PNG, ENTRY_ID_PARAM_SFO, PKG_MAGIC};

#[path = "../../src/testutil/zip_writer.rs"]
mod zip_writer;

/// A package with an empty param.sfo and a small icon, followed by
/// `body_len` bytes of a repeating pattern.
pub fn package(content_id: &str, body_len: usize) -> Vec<u8> {
    let table_offset = 0x100usize;
    let icon_offset = 0x200usize;
    let icon = b"\x89PNG icon";
    let body_offset = icon_offset + icon.len();
    let mut out = vec![0u8; body_offset + body_len];
    out[0..4].copy_from_slice(&PKG_MAGIC.to_be_bytes());
    out[0x10..0x14].copy_from_slice(&2u32.to_be_bytes());
    out[0x18..0x1C].copy_from_slice(&(table_offset as u32).to_be_bytes());
    let total = out.len() as u64;
    out[0x38..0x40].copy_from_slice(&total.to_be_bytes());
    out[0x40..0x40 + content_id.len()].copy_from_slice(content_id.as_bytes());

    let slots = [
        (ENTRY_ID_PARAM_SFO, icon_offset as u32, 0u32),
        (ENTRY_ID_ICON0_PNG, icon_offset as u32, icon.len() as u32),
    ];
    for (i, (id, offset, size)) in slots.iter().enumerate() {
        let at = table_offset + i * 32;
        out[at..at + 4].copy_from_slice(&id.to_be_bytes());
        out[at + 16..at + 20].copy_from_slice(&offset.to_be_bytes());
        out[at + 20..at + 24].copy_from_slice(&size.to_be_bytes());
    }
    out[icon_offset..body_offset].copy_from_slice(icon);
    for (i, b) in out[body_offset..].iter_mut().enumerate() {
        *b = (i % 253) as u8;
    }
    out
}

/// Plain byte pattern for objects that are not packages.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Stored (uncompressed) zip archive of `(name, data)` pairs.
pub fn stored_zip(items: &[(&str, &[u8])]) -> Vec<u8> {
    let items: Vec<_> = items
        .iter()
        .map(|&(name, data)| zip_writer::zip_file(name, data))
        .collect();
    zip_writer::zip_bytes(&items)
}
