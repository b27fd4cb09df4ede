//! Block-Delta Planner (§4.5): given a file's block map and (optionally)
//! the current local checksums of its blocks, computes the minimal set of
//! prior-backup reads needed to reconstruct it.

use std::collections::BTreeMap;

use crate::owner::ReferenceId;

/// One logical block of a file's on-repository block map (§4.5 Inputs).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockMapEntry {
    pub reference: ReferenceId,
    pub bundle_id: u64,
    pub offset: u64,
    pub size: u32,
    pub super_block_size: u32,
    pub block_no: u32,
    pub checksum: Vec<u8>,
}

/// One logical block within a planned read (§4.5 step 6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedBlock {
    pub block_no: u32,
    pub file_offset: u64,
    pub checksum: Vec<u8>,
}

/// A group of contiguous logical blocks stored as one unit on repository
/// (§4.5 step 5, GLOSSARY "Super-block").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedSuperBlock {
    pub super_block_size: u32,
    /// Stored (repository) size of this super-block.
    pub size: u32,
    pub blocks: Vec<PlannedBlock>,
}

/// A coalesced read against one prior-backup reference (§4.5 step 4).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedRead {
    pub reference: ReferenceId,
    pub bundle_id: u64,
    pub offset: u64,
    pub size: u64,
    pub super_blocks: Vec<PlannedSuperBlock>,
}

/// Computes which block indices need restoring: `i` is needed when there's
/// no local checksum for it at all, or the stored checksum differs from
/// the local one (§4.5 step 1-2, testable property 4).
fn needed_blocks(
    block_map: &[BlockMapEntry],
    checksum_size: usize,
    block_checksum: Option<&[u8]>,
) -> Vec<usize> {
    let local_count = match block_checksum {
        Some(buf) if checksum_size > 0 => buf.len() / checksum_size,
        _ => 0,
    };

    (0..block_map.len())
        .filter(|&i| {
            if i >= local_count {
                return true;
            }
            let local = &block_checksum.unwrap()[i * checksum_size..(i + 1) * checksum_size];
            block_map[i].checksum != local
        })
        .collect()
}

/// Runs the full planning algorithm (§4.5 steps 1-6).
///
/// `block_size` is the logical block size; each block's file offset is
/// `index * block_size` regardless of its on-repository `offset`/`size`
/// (which addresses the *stored*, possibly compressed, super-block).
pub fn plan_block_delta(
    block_map: &[BlockMapEntry],
    block_size: u64,
    checksum_size: usize,
    block_checksum: Option<&[u8]>,
) -> Vec<PlannedRead> {
    let needed = needed_blocks(block_map, checksum_size, block_checksum);

    // Bucket by reference, ascending (§4.5 step 3; Open Question: ascending
    // order chosen for determinism since the source leaves it unspecified).
    let mut by_reference: BTreeMap<ReferenceId, Vec<usize>> = BTreeMap::new();
    for i in needed {
        by_reference.entry(block_map[i].reference).or_default().push(i);
    }

    let mut reads = Vec::new();

    for (reference, indices) in by_reference {
        // Indices were pushed in ascending file-index order already since
        // `needed_blocks` iterates 0..len ascending.
        let mut current_read: Option<PlannedRead> = None;
        let mut prior_offset: Option<u64> = None;
        let mut prior_size: Option<u32> = None;

        for i in indices {
            let entry = &block_map[i];
            let contiguous = prior_offset
                .zip(prior_size)
                .map(|(off, size)| entry.offset == off + size as u64)
                .unwrap_or(false);
            let same_super_block = prior_offset == Some(entry.offset);

            if current_read.is_none() || !(same_super_block || contiguous) {
                if let Some(read) = current_read.take() {
                    reads.push(read);
                }
                current_read = Some(PlannedRead {
                    reference,
                    bundle_id: entry.bundle_id,
                    offset: entry.offset,
                    size: 0,
                    super_blocks: Vec::new(),
                });
            }

            let read = current_read.as_mut().unwrap();
            read.size = entry.offset + entry.size as u64 - read.offset;

            let needs_new_super_block = match read.super_blocks.last() {
                Some(sb) => prior_offset != Some(entry.offset) || sb.blocks.is_empty(),
                None => true,
            };
            if needs_new_super_block {
                read.super_blocks.push(PlannedSuperBlock {
                    super_block_size: entry.super_block_size,
                    size: entry.size,
                    blocks: Vec::new(),
                });
            }

            read.super_blocks.last_mut().unwrap().blocks.push(PlannedBlock {
                block_no: entry.block_no,
                file_offset: i as u64 * block_size,
                checksum: entry.checksum.clone(),
            });

            prior_offset = Some(entry.offset);
            prior_size = Some(entry.size);
        }

        if let Some(read) = current_read.take() {
            reads.push(read);
        }
    }

    reads
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgib_tools::intern::InternTable;

    fn refs() -> (InternTable, ReferenceId, ReferenceId) {
        let mut t = InternTable::new();
        let r3 = ReferenceId(t.intern("backup-3"));
        let r5 = ReferenceId(t.intern("backup-5"));
        (t, r3, r5)
    }

    fn entry(reference: ReferenceId, bundle_id: u64, offset: u64, size: u32, block_no: u32) -> BlockMapEntry {
        BlockMapEntry {
            reference,
            bundle_id,
            offset,
            size,
            super_block_size: size,
            block_no,
            checksum: vec![block_no as u8; 4],
        }
    }

    /// Scenario E from the spec.
    #[test]
    fn scenario_e_coalesces_contiguous_super_blocks_and_splits_on_gap() {
        let (_t, r3, r5) = refs();
        let block_map = vec![
            entry(r3, 1, 0, 100, 0),
            entry(r3, 1, 100, 100, 0),
            entry(r5, 2, 500, 200, 0),
            entry(r3, 1, 800, 100, 0),
        ];
        // all four differ locally: pass no local checksums at all.
        let reads = plan_block_delta(&block_map, 100, 4, None);

        assert_eq!(reads.len(), 3);

        let r3_reads: Vec<_> = reads.iter().filter(|r| r.reference == r3).collect();
        assert_eq!(r3_reads.len(), 2);
        assert_eq!(r3_reads[0].offset, 0);
        assert_eq!(r3_reads[0].size, 200);
        assert_eq!(r3_reads[0].super_blocks.len(), 2);
        assert_eq!(r3_reads[1].offset, 800);
        assert_eq!(r3_reads[1].size, 100);

        let r5_reads: Vec<_> = reads.iter().filter(|r| r.reference == r5).collect();
        assert_eq!(r5_reads.len(), 1);
        assert_eq!(r5_reads[0].offset, 500);
        assert_eq!(r5_reads[0].size, 200);
    }

    #[test]
    fn matching_local_checksum_excludes_block_from_plan() {
        let (_t, r3, _r5) = refs();
        let block_map = vec![entry(r3, 1, 0, 100, 0)];
        let local = block_map[0].checksum.clone();
        let reads = plan_block_delta(&block_map, 100, 4, Some(&local));
        assert!(reads.is_empty());
    }

    #[test]
    fn shorter_local_checksum_buffer_marks_tail_blocks_needed() {
        let (_t, r3, _r5) = refs();
        let block_map = vec![entry(r3, 1, 0, 100, 0), entry(r3, 1, 100, 100, 1)];
        // only one local checksum entry exists -> block 1 has no local state
        let local = block_map[0].checksum.clone();
        let reads = plan_block_delta(&block_map, 100, 4, Some(&local));
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].super_blocks[0].blocks.len(), 1);
        assert_eq!(reads[0].super_blocks[0].blocks[0].block_no, 1);
    }

    #[test]
    fn reads_within_one_reference_never_overlap_or_touch() {
        let (_t, r3, _r5) = refs();
        let block_map = vec![
            entry(r3, 1, 0, 100, 0),
            entry(r3, 1, 100, 100, 0),
            entry(r3, 1, 800, 100, 0),
        ];
        let reads = plan_block_delta(&block_map, 100, 4, None);
        for w in reads.windows(2) {
            assert!(w[0].offset + w[0].size < w[1].offset);
        }
    }
}
