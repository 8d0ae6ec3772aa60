//! Two-pass parser for the serialized directory image.
//!
//! The image that follows the root header is a run of group records, each
//! trailed by its entry records, and then a blob of null-terminated
//! filenames the entries point into. The destination size is unknown until
//! the records are walked, so parsing happens in two passes:
//! [`compute_layout`] walks the records without building anything and
//! [`materialize`] re-walks them producing normalized [`Group`]s. Both
//! passes share a [`LayoutPlan`] so the walk arithmetic cannot diverge; a
//! re-walk that ends anywhere other than the planned name blob start is a
//! structural bug, not bad input.

use std::io::Cursor;

use binrw::BinRead;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::directory::{Directory, Entry, Group};
use crate::error::{Error, Result};
use crate::types::{
    DirectoryKind, FileEntry, FileGroupHeader, DECOMP_MASK, DECOMP_SHIFT, HIGH_MEMORY,
    LEGACY_DECOMP_MASK, LEGACY_DECOMP_SHIFT, LEGACY_FIXED, LEGACY_OFFSET_MASK, NAME_OFFSET_MASK,
};

/// Byte size of a new-format group record
const GROUP_RECORD_SIZE: usize = 8;

/// Byte size of a new-format entry record
const ENTRY_RECORD_SIZE: usize = 16;

/// Byte size of a legacy group record (`{type, base, count}`)
const LEGACY_GROUP_RECORD_SIZE: usize = 12;

/// Byte size of a legacy entry record
const LEGACY_ENTRY_RECORD_SIZE: usize = 12;

/// Legacy group type remapped into the 5000 number range
///
/// Sound resources of one legacy title ("Killing Time") were typed rather
/// than renumbered. The remap is a compatibility behavior and is preserved
/// verbatim.
const LEGACY_SOUND_TYPE: u32 = 5;

/// Walk measurements shared by both parse passes
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LayoutPlan {
    /// Total entry records across every group
    pub entry_total: usize,

    /// Byte offset in the raw image where the filename blob begins
    pub names_start: usize,
}

fn read_word(raw: &[u8], position: usize, swap: bool) -> Result<u32> {
    let bytes = raw
        .get(position..position + 4)
        .ok_or(Error::InvalidArchive)?;
    Ok(if swap {
        BigEndian::read_u32(bytes)
    } else {
        LittleEndian::read_u32(bytes)
    })
}

/// Pull a null-terminated filename out of the trailing name blob
///
/// A masked offset of zero means the entry is unnamed. Any other offset
/// must land inside the blob proper, never back into the records.
fn read_name(raw: &[u8], names_start: usize, offset: usize) -> Result<Option<Box<str>>> {
    if offset == 0 {
        return Ok(None);
    }
    if offset < names_start || offset >= raw.len() {
        return Err(Error::InvalidArchive);
    }
    let tail = &raw[offset..];
    let end = tail.iter().position(|&b| b == 0).ok_or(Error::InvalidArchive)?;
    let name = std::str::from_utf8(&tail[..end]).map_err(|_| Error::InvalidArchive)?;
    Ok(Some(name.into()))
}

/// First pass: measure the record walk.
///
/// Returns the total entry count and where the filename blob begins.
/// Truncated or overflowing record counts are [`Error::InvalidArchive`].
pub fn compute_layout(raw: &[u8], group_count: u32, kind: DirectoryKind) -> Result<LayoutPlan> {
    let (header_size, entry_size, count_offset, swap) = match kind {
        DirectoryKind::New => (GROUP_RECORD_SIZE, ENTRY_RECORD_SIZE, 4, false),
        DirectoryKind::Legacy { swap } => {
            (LEGACY_GROUP_RECORD_SIZE, LEGACY_ENTRY_RECORD_SIZE, 8, swap)
        }
    };

    let mut position = 0usize;
    let mut entry_total = 0usize;
    for _ in 0..group_count {
        let count = read_word(raw, position + count_offset, swap)? as usize;
        entry_total = entry_total.checked_add(count).ok_or(Error::InvalidArchive)?;
        position = count
            .checked_mul(entry_size)
            .and_then(|bytes| bytes.checked_add(header_size))
            .and_then(|bytes| position.checked_add(bytes))
            .ok_or(Error::InvalidArchive)?;
    }
    if position > raw.len() {
        return Err(Error::InvalidArchive);
    }
    Ok(LayoutPlan {
        entry_total,
        names_start: position,
    })
}

/// Second pass: build the normalized groups.
///
/// Re-walks the records with the same arithmetic as [`compute_layout`] and
/// requires the walk to land exactly on `plan.names_start`. Entry file
/// offsets are rebased by `start_offset` so they address the underlying
/// reader directly even when the archive is embedded in a larger file.
pub fn materialize(
    raw: &[u8],
    plan: &LayoutPlan,
    group_count: u32,
    kind: DirectoryKind,
    start_offset: u32,
) -> Result<Vec<Group>> {
    let mut groups: Vec<Group> = Vec::with_capacity(group_count as usize);
    let mut cursor = Cursor::new(raw);

    for _ in 0..group_count {
        let group = match kind {
            DirectoryKind::New => {
                let header = FileGroupHeader::read(&mut cursor)?;
                let mut entries = Vec::with_capacity(header.count as usize);
                for _ in 0..header.count {
                    let record = FileEntry::read(&mut cursor)?;
                    entries.push(Entry {
                        file_offset: record.file_offset.wrapping_add(start_offset),
                        length: record.length,
                        compressed_length: record.compressed_length,
                        name: read_name(
                            raw,
                            plan.names_start,
                            (record.name_offset & NAME_OFFSET_MASK) as usize,
                        )?,
                        codec: ((record.name_offset & DECOMP_MASK) >> DECOMP_SHIFT) as u8,
                        high_memory: record.name_offset & HIGH_MEMORY != 0,
                        ..Entry::default()
                    });
                }
                Group {
                    base: header.base,
                    entries,
                }
            }
            DirectoryKind::Legacy { swap } => {
                let position = cursor.position() as usize;
                let group_type = read_word(raw, position, swap)?;
                let mut base = read_word(raw, position + 4, swap)?;
                let count = read_word(raw, position + 8, swap)?;
                if group_type == LEGACY_SOUND_TYPE {
                    base += 5000;
                }

                let mut entries = Vec::with_capacity(count as usize);
                let mut record_at = position + LEGACY_GROUP_RECORD_SIZE;
                for _ in 0..count {
                    let file_offset = read_word(raw, record_at, swap)?;
                    let length = read_word(raw, record_at + 4, swap)?;
                    let name_offset = read_word(raw, record_at + 8, swap)?;
                    record_at += LEGACY_ENTRY_RECORD_SIZE;

                    let codec = ((file_offset & LEGACY_DECOMP_MASK) >> LEGACY_DECOMP_SHIFT) as u8;
                    // A compressed legacy entry stores the compressed size
                    // here; the decompressed size is an inline word before
                    // the payload and is filled in at load time.
                    let (length, compressed_length) = if codec != 0 { (0, length) } else { (length, 0) };
                    entries.push(Entry {
                        file_offset: (file_offset & LEGACY_OFFSET_MASK).wrapping_add(start_offset),
                        length,
                        compressed_length,
                        name: read_name(raw, plan.names_start, name_offset as usize)?,
                        codec,
                        high_memory: file_offset & LEGACY_FIXED != 0,
                        ..Entry::default()
                    });
                }
                cursor.set_position(record_at as u64);
                Group { base, entries }
            }
        };
        if !group.entries.is_empty() {
            groups.push(group);
        }
    }

    // Both passes walk the same records; disagreement is a parser bug
    debug_assert_eq!(cursor.position() as usize, plan.names_start);
    if cursor.position() as usize != plan.names_start {
        return Err(Error::InvalidArchive);
    }
    Ok(groups)
}

/// Run both passes and index the result
pub(crate) fn parse_directory(
    raw: &[u8],
    group_count: u32,
    kind: DirectoryKind,
    start_offset: u32,
) -> Result<Directory> {
    let plan = compute_layout(raw, group_count, kind)?;
    let groups = materialize(raw, &plan, group_count, kind, start_offset)?;
    Ok(Directory::from_groups(groups))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{compute_layout, materialize, parse_directory, LayoutPlan};
    use crate::directory::Probe;
    use crate::types::{
        DirectoryKind, DECOMP_SHIFT, HIGH_MEMORY, LEGACY_DECOMP_SHIFT, LEGACY_FIXED,
    };

    fn words_le(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn words_be(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    // base 1, two entries: "one" compressed with codec 1,
    // "two" uncompressed in high memory. Names begin at byte 40.
    fn new_format_image() -> Vec<u8> {
        let mut image = words_le(&[
            1, 2, // group: base, count
            0x100, 11, 40 | (1 << DECOMP_SHIFT), 7, // entry "one"
            0x200, 5, 44 | HIGH_MEMORY, 0, // entry "two"
        ]);
        image.extend_from_slice(b"one\0two\0");
        image
    }

    #[test]
    fn layout_of_a_new_format_image() {
        let image = new_format_image();
        let plan = compute_layout(&image, 1, DirectoryKind::New).unwrap();
        assert_eq!(
            plan,
            LayoutPlan {
                entry_total: 2,
                names_start: 40
            }
        );
    }

    #[test]
    fn materialize_a_new_format_image() {
        let image = new_format_image();
        let kind = DirectoryKind::New;
        let plan = compute_layout(&image, 1, kind).unwrap();
        let groups = materialize(&image, &plan, 1, kind, 0x20).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].base, 1);
        assert_eq!(groups[0].entries.len(), 2);

        let one = &groups[0].entries[0];
        assert_eq!(one.file_offset, 0x120);
        assert_eq!(one.length, 11);
        assert_eq!(one.compressed_length, 7);
        assert_eq!(one.codec, 1);
        assert!(!one.high_memory);
        assert_eq!(one.name.as_deref(), Some("one"));
        assert_eq!(one.probe, Probe::Untested);
        assert_eq!(one.refs, 0);

        let two = &groups[0].entries[1];
        assert_eq!(two.file_offset, 0x220);
        assert_eq!(two.length, 5);
        assert_eq!(two.compressed_length, 0);
        assert_eq!(two.codec, 0);
        assert!(two.high_memory);
        assert_eq!(two.name.as_deref(), Some("two"));
    }

    // Legacy "type 5" groups are sound resources renumbered into the
    // 5000 range, and compressed entries stash the decompressed size
    // inline with the payload instead of the directory.
    #[test]
    fn materialize_a_legacy_image() {
        let mut image = words_le(&[
            5, 1, 2, // group: type, base, count
            0x40 | LEGACY_FIXED, 9, 36, // entry "a.s", uncompressed
            0x60 | (1 << LEGACY_DECOMP_SHIFT), 13, 40, // entry "b.s", codec 1
        ]);
        image.extend_from_slice(b"a.s\0b.s\0");

        let kind = DirectoryKind::Legacy { swap: false };
        let plan = compute_layout(&image, 1, kind).unwrap();
        assert_eq!(plan.names_start, 36);
        let groups = materialize(&image, &plan, 1, kind, 0).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].base, 5001);

        let a = &groups[0].entries[0];
        assert_eq!(a.file_offset, 0x40);
        assert_eq!(a.length, 9);
        assert_eq!(a.compressed_length, 0);
        assert_eq!(a.codec, 0);
        assert!(a.high_memory);
        assert_eq!(a.name.as_deref(), Some("a.s"));

        let b = &groups[0].entries[1];
        assert_eq!(b.file_offset, 0x60);
        assert_eq!(b.length, 0);
        assert_eq!(b.compressed_length, 13);
        assert_eq!(b.codec, 1);
        assert!(!b.high_memory);
        assert_eq!(b.name.as_deref(), Some("b.s"));
    }

    #[test]
    fn materialize_a_byte_swapped_legacy_image() {
        let mut image = words_be(&[
            0, 10, 1, // group: type, base, count
            0x80, 6, 24, // single entry
        ]);
        image.extend_from_slice(b"swap\0");

        let kind = DirectoryKind::Legacy { swap: true };
        let plan = compute_layout(&image, 1, kind).unwrap();
        let groups = materialize(&image, &plan, 1, kind, 0).unwrap();

        assert_eq!(groups[0].base, 10);
        assert_eq!(groups[0].entries[0].file_offset, 0x80);
        assert_eq!(groups[0].entries[0].length, 6);
        assert_eq!(groups[0].entries[0].name.as_deref(), Some("swap"));
    }

    #[test]
    fn zero_groups_is_an_empty_directory() {
        let directory = parse_directory(&[], 0, DirectoryKind::New, 0).unwrap();
        assert!(directory.is_empty());
    }

    #[test]
    fn unnamed_entries_stay_unnamed() {
        let image = words_le(&[
            7, 1, // group: base, count
            0x10, 4, 0, 0, // name offset zero
        ]);
        let directory = parse_directory(&image, 1, DirectoryKind::New, 0).unwrap();
        assert_eq!(directory.find(7).unwrap().name, None);
        assert!(directory.names().is_empty());
    }

    #[test]
    fn truncated_images_are_rejected() {
        let image = new_format_image();
        // chop inside the second entry record
        assert!(parse_directory(&image[..30], 1, DirectoryKind::New, 0).is_err());
        // chop the name blob out from under the offsets
        assert!(parse_directory(&image[..40], 1, DirectoryKind::New, 0).is_err());
    }

    #[test]
    fn name_offsets_inside_the_records_are_rejected() {
        let mut image = words_le(&[
            1, 1, // group: base, count
            0x10, 4, 4, 0, // name offset points at the records
        ]);
        image.extend_from_slice(b"x\0");
        assert!(parse_directory(&image, 1, DirectoryKind::New, 0).is_err());
    }

    #[test]
    fn parsed_names_are_indexed() {
        let directory = parse_directory(&new_format_image(), 1, DirectoryKind::New, 0).unwrap();
        assert_eq!(directory.rez_num("one"), Some(1));
        assert_eq!(directory.rez_num("TWO"), Some(2));
        assert_eq!(directory.len(), 2);
    }
}
