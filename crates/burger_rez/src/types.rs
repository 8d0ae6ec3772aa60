//! Base types for the on-disk structure of a rez file.

use binrw::BinRead;

/// Number of compression codec slots an archive can reference
pub const MAX_CODECS: usize = 3;

/// Size of [`RootHeader`] on disk, in bytes
pub const ROOT_HEADER_SIZE: usize = 4 + 4 + 4 + MAX_CODECS * 4;

/// Size of the legacy root header on disk, in bytes
///
/// Legacy archives stop after `mem_size`; the codec id table does not
/// exist and its bytes are actually the start of the directory image.
pub const LEGACY_ROOT_HEADER_SIZE: usize = 12;

/// Mask for the filename offset bits of [`FileEntry::name_offset`]
pub const NAME_OFFSET_MASK: u32 = 0x0007_FFFF;

/// Mask for the codec id bits of [`FileEntry::name_offset`] (2 bits)
pub const DECOMP_MASK: u32 = 0x0018_0000;

/// Shift to extract the codec id from [`FileEntry::name_offset`]
pub const DECOMP_SHIFT: u32 = 19;

/// Set in [`FileEntry::name_offset`] when the resource loads into fixed/high memory
pub const HIGH_MEMORY: u32 = 0x0020_0000;

/// Legacy `file_offset` bit marking a fixed/high memory load
pub const LEGACY_FIXED: u32 = 0x8000_0000;

/// Legacy `file_offset` codec id bits (2 bits)
pub const LEGACY_DECOMP_MASK: u32 = 0x6000_0000;

/// Shift to extract the codec id from a legacy `file_offset`
pub const LEGACY_DECOMP_SHIFT: u32 = 29;

/// Mask for the offset bits of a legacy `file_offset`
pub const LEGACY_OFFSET_MASK: u32 = 0x1FFF_FFFF;

/// Upper bound on the temporary decompression chunk buffer, in bytes
pub const MAX_CHUNK: usize = 65536;

/// Which generation of the directory image follows the root header
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DirectoryKind {
    /// Current format: `{base, count}` group records with 16 byte entries
    New,
    /// Original format: `{type, base, count}` group records with 12 byte
    /// entries, optionally stored big-endian
    Legacy {
        /// Multi-byte fields need a byte swap
        swap: bool,
    },
}

/// Rez file root header
///
/// Every rez file starts with the magic "BRGR" followed by the group count,
/// the size in bytes of the serialized directory, and a table naming the
/// compression codecs the archive uses. All fields are little endian.
#[derive(BinRead, Debug, Copy, Clone, PartialEq)]
#[br(magic = b"BRGR", little)]
pub struct RootHeader {
    /// The number of resource groups stored in the directory
    pub group_count: u32,

    /// The size in bytes of the serialized directory image
    pub mem_size: u32,

    /// Four character codes of the codecs used by the archive
    pub codec_ids: [[u8; 4]; MAX_CODECS],
}

impl RootHeader {
    /// Detect which directory generation follows this header, fixing up the
    /// header fields for a byte-swapped legacy file.
    ///
    /// Legacy files have no codec id table, so the bytes read into
    /// `codec_ids` are really the first group record. The discriminator
    /// inspects byte 3 of the first table slot: a value below 32 (not a
    /// printable character) means the bytes are binary record data rather
    /// than a codec four character code. A legacy file additionally stores
    /// `mem_size`/`group_count` big-endian when the loaded `mem_size`
    /// compares greater or equal to its own byte swap.
    ///
    /// Both tests are historical heuristics carried over from the original
    /// file format and are preserved verbatim.
    pub fn detect(&mut self) -> DirectoryKind {
        if self.codec_ids[0][3] < 32 {
            let swap = self.mem_size >= self.mem_size.swap_bytes();
            if swap {
                self.mem_size = self.mem_size.swap_bytes();
                self.group_count = self.group_count.swap_bytes();
            }
            DirectoryKind::Legacy { swap }
        } else {
            DirectoryKind::New
        }
    }
}

/// Group record as stored in a new-format directory
///
/// Followed on disk by `count` [`FileEntry`] records.
#[derive(BinRead, Debug, Default, Copy, Clone, PartialEq)]
#[br(little)]
pub struct FileGroupHeader {
    /// Resource number of the group's first entry
    pub base: u32,

    /// Number of entries in the group
    pub count: u32,
}

/// Resource entry record as stored in a new-format directory
#[derive(BinRead, Debug, Default, Copy, Clone, PartialEq)]
#[br(little)]
pub struct FileEntry {
    /// Byte offset of the resource data in the rez file
    pub file_offset: u32,

    /// Size of the data once decompressed
    pub length: u32,

    /// Offset to the filename in the trailing name blob, with the entry
    /// flags overlaid above [`NAME_OFFSET_MASK`]
    pub name_offset: u32,

    /// Size of the data as stored in the rez file, zero if uncompressed
    pub compressed_length: u32,
}
