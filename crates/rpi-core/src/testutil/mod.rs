//! Fixture builders shared by unit tests.

mod zip_writer;

pub(crate) use zip_writer::{zip_bytes, zip_file, ZipItem};

use crate::package::{sfo, ENTRY_ID_ICON0_PNG, ENTRY_ID_PARAM_SFO, PKG_MAGIC};

/// Header + table with param.sfo and icon0.png, followed by `body_len` bytes.
pub(crate) fn build_package(content_id: &str, title: Option<&str>, body_len: usize) -> Vec<u8> {
    let sfo_data = title.map(|t| sfo::build(&[("TITLE", t)])).unwrap_or_default();
    let icon = b"\x89PNG fake icon".to_vec();
    let table_offset = 0x100u32;
    let sfo_offset = 0x200u32;
    let icon_offset = sfo_offset + sfo_data.len() as u32;
    let body_offset = icon_offset + icon.len() as u32;

    let mut out = vec![0u8; body_offset as usize + body_len];
    out[0..4].copy_from_slice(&PKG_MAGIC.to_be_bytes());
    out[0x10..0x14].copy_from_slice(&2u32.to_be_bytes());
    out[0x18..0x1C].copy_from_slice(&table_offset.to_be_bytes());
    let total_len = out.len() as u64;
    out[0x38..0x40].copy_from_slice(&total_len.to_be_bytes());
    out[0x40..0x40 + content_id.len()].copy_from_slice(content_id.as_bytes());

    let mut entry = |slot: usize, id: u32, offset: u32, size: u32| {
        let at = table_offset as usize + slot * 32;
        out[at..at + 4].copy_from_slice(&id.to_be_bytes());
        out[at + 16..at + 20].copy_from_slice(&offset.to_be_bytes());
        out[at + 20..at + 24].copy_from_slice(&size.to_be_bytes());
    };
    entry(0, ENTRY_ID_PARAM_SFO, sfo_offset, sfo_data.len() as u32);
    entry(1, ENTRY_ID_ICON0_PNG, icon_offset, icon.len() as u32);

    out[sfo_offset as usize..icon_offset as usize].copy_from_slice(&sfo_data);
    out[icon_offset as usize..body_offset as usize].copy_from_slice(&icon);
    for (i, b) in out[body_offset as usize..].iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    out
}
