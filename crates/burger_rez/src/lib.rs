//! This library handles reading resources from **rez** archive files used by *Burgerlib* games.
//!
//! # Rez Archive Format Documentation
//!
//! This crate provides utilities to read and cache resources from the **rez** archive format used
//! by Burgerlib based games. The rez format is a custom binary container that packs many
//! optionally-compressed resources within a single file. Rez files are typically identified with
//! the `.rez` extension and may be embedded at an offset inside a larger file.
//!
//! ## File Structure
//!
//! A rez file consists of a root header, a serialized resource directory, and then the packed
//! resource payloads.
//!
//! | Offset (bytes) | Field                  | Description                                              |
//! |----------------|------------------------|----------------------------------------------------------|
//! | 0x0000         | Magic number           | 4 bytes: "BRGR"                                          |
//! | 0x0004         | Group Count            | 4 bytes: Number of resource groups in the directory      |
//! | 0x0008         | Directory Size         | 4 bytes: Size in bytes of the serialized directory       |
//! | 0x000C         | Codec Id Table         | 12 bytes: Up to 3 four-character codec codes             |
//!
//! Legacy files stop after **Directory Size**; the codec id table does not exist and the
//! directory begins at offset `0x000C`. The two generations are told apart by inspecting whether
//! byte 3 of the first codec table slot is a printable character. Legacy files may additionally
//! store their multi-byte fields big-endian, detected by comparing **Directory Size** against its
//! own byte swap.
//!
//! ### Resource Directory
//!
//! The directory is a run of group records, each followed by its entry records, with a name blob
//! at the end. Resources are addressed by *resource number*; a group covers the contiguous range
//! `base .. base + count`.
//!
//! New-format group record, all fields little-endian:
//!
//! | Offset (bytes) | Field                  | Description                                              |
//! |----------------|------------------------|----------------------------------------------------------|
//! | 0x0000         | Base Number            | 4 bytes: Resource number of the first entry              |
//! | 0x0004         | Count                  | 4 bytes: Number of entries that follow                   |
//!
//! New-format entry record:
//!
//! | Offset (bytes) | Field                  | Description                                              |
//! |----------------|------------------------|----------------------------------------------------------|
//! | 0x0000         | Data Offset            | 4 bytes: Offset of the payload from the archive start    |
//! | 0x0004         | Uncompressed Size      | 4 bytes: Size of the data once decompressed              |
//! | 0x0008         | Name Offset / Flags    | 4 bytes: Offset into the name blob, flags in high bits   |
//! | 0x000C         | Compressed Size        | 4 bytes: Stored size, zero when uncompressed             |
//!
//! Bits `19..21` of **Name Offset / Flags** select the compression codec (zero for none) and bit
//! `21` requests a fixed/high memory load. A masked name offset of zero means the entry has no
//! name.
//!
//! Legacy group records carry a leading 4-byte type field and 12-byte entries without the
//! compressed size; the codec and fixed-memory flags live in the high bits of **Data Offset**
//! instead, and a compressed entry stores its decompressed size as a word directly ahead of the
//! payload. Legacy groups of type 5 are sound resources renumbered into the 5000 range.
//!
//! ### Name Blob
//!
//! The names are stored sequentially as null terminated strings at the end of the directory
//! image. The offsets within the entry records point to positions within the whole directory
//! image. Name lookup is case-insensitive, and a leading `"<digits>:"` prefix on a queried name
//! is ignored.
//!
//! ## Resource Cache
//!
//! [`RezArchive`] keeps loaded resources in reference-counted, purgeable allocations obtained
//! from a [`HandleMemory`] manager. Releasing the last reference marks the allocation purgeable
//! instead of freeing it, so the next load is a cache hit unless the manager reclaimed the
//! space. When loose-file overrides are enabled, a resource whose name matches a file on disk is
//! satisfied from that file instead of the archive.
//!
//! ## Additional Information
//!
//! - **File Extension**: `.rez`
//! - **Endianness**: Little-endian, except detected big-endian legacy files
//! - **Compression**: Up to three pluggable codec slots; a zlib codec ships as [`ZlibCodec`]
//!

pub mod decompress;
pub mod directory;
pub mod error;
pub mod memory;
pub mod parse;
pub mod read;
pub mod stream;
pub mod types;

pub use decompress::{Decompress, ZlibCodec};
pub use directory::{Directory, Entry, Group, Probe};
pub use memory::{Handle, HandleMemory, HeapHandles};
pub use read::{LoadState, RezArchive, RezOptions};
pub use stream::RezStream;
