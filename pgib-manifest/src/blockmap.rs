//! Trailing pack-encoded block map (§3.4): every block-incremental file
//! carries its block map immediately after its content, at
//! `bundle_offset + size_repo - block_incr.map_size`.

use anyhow::Result;
use pgib_pack::{PackReader, PackWriter};

use crate::blockdelta::BlockMapEntry;
use crate::manifest::Manifest;

const FIELD_REFERENCE: u32 = 1;
const FIELD_BUNDLE_ID: u32 = 2;
const FIELD_OFFSET: u32 = 3;
const FIELD_SIZE: u32 = 4;
const FIELD_SUPER_BLOCK_SIZE: u32 = 5;
const FIELD_BLOCK_NO: u32 = 6;
const FIELD_CHECKSUM: u32 = 7;

/// Encodes a file's block map as a pack-format array of block records, one
/// entry per logical block in ascending `block_no` order.
pub fn encode(manifest: &Manifest, entries: &[BlockMapEntry]) -> Vec<u8> {
    let mut w = PackWriter::new();
    w.array_begin(0);
    for entry in entries {
        w.obj_begin(0);
        w.write_str(FIELD_REFERENCE, manifest.reference_name(entry.reference));
        w.write_u64(FIELD_BUNDLE_ID, entry.bundle_id);
        w.write_u64(FIELD_OFFSET, entry.offset);
        w.write_u32(FIELD_SIZE, entry.size);
        w.write_u32(FIELD_SUPER_BLOCK_SIZE, entry.super_block_size);
        w.write_u32(FIELD_BLOCK_NO, entry.block_no);
        w.write_bin(FIELD_CHECKSUM, &entry.checksum);
        w.obj_end();
    }
    w.array_end();
    w.end()
}

/// Decodes a block map previously written by [`encode`]. Reference labels
/// not yet known to `manifest` are interned on the fly.
pub fn decode(manifest: &mut Manifest, buf: &[u8]) -> Result<Vec<BlockMapEntry>> {
    let mut r = PackReader::new(buf);
    let mut entries = Vec::new();

    r.array_begin(0)?;
    loop {
        if !r.obj_begin(0)? {
            break;
        }
        let reference_name = r.read_str(FIELD_REFERENCE)?.unwrap_or_default();
        let reference = manifest.intern_reference(&reference_name);
        let bundle_id = r.read_u64(FIELD_BUNDLE_ID)?.unwrap_or(0);
        let offset = r.read_u64(FIELD_OFFSET)?.unwrap_or(0);
        let size = r.read_u32(FIELD_SIZE)?.unwrap_or(0);
        let super_block_size = r.read_u32(FIELD_SUPER_BLOCK_SIZE)?.unwrap_or(0);
        let block_no = r.read_u32(FIELD_BLOCK_NO)?.unwrap_or(0);
        let checksum = r.read_bin(FIELD_CHECKSUM)?.unwrap_or_default();
        r.end()?;

        entries.push(BlockMapEntry {
            reference,
            bundle_id,
            offset,
            size,
            super_block_size,
            block_no,
            checksum,
        });
    }
    r.end()?;

    Ok(entries)
}

/// The byte offset (within the file's stored representation) at which its
/// block map begins, given its repository size and the map's own size.
pub fn map_start_offset(bundle_offset: u64, size_repo: u64, map_size: u64) -> u64 {
    bundle_offset + size_repo - map_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ManifestHeader;

    fn entry(reference: crate::owner::ReferenceId, block_no: u32, offset: u64) -> BlockMapEntry {
        BlockMapEntry {
            reference,
            bundle_id: 1,
            offset,
            size: 64,
            super_block_size: 64,
            block_no,
            checksum: vec![block_no as u8; 6],
        }
    }

    #[test]
    fn block_map_round_trips_through_pack_encoding() {
        let mut m = Manifest::new(ManifestHeader::new_full(0, 1, "15", 1500, 1300, 1, true), "/data");
        let r1 = m.intern_reference("20260701-000000F");
        let entries = vec![entry(r1, 0, 0), entry(r1, 1, 64)];

        let buf = encode(&m, &entries);
        let decoded = decode(&mut m, &buf).unwrap();

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].block_no, 0);
        assert_eq!(decoded[1].offset, 64);
        assert_eq!(m.reference_name(decoded[0].reference), "20260701-000000F");
    }

    #[test]
    fn map_start_offset_accounts_for_its_own_trailing_size() {
        assert_eq!(map_start_offset(1000, 500, 40), 1460);
    }
}
