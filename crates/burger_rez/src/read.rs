//! Types for reading rez archives
//!

use binrw::BinRead;
use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt::{self, Debug};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bon::Builder;

use crate::decompress::Decompress;
use crate::directory::{Directory, Probe};
use crate::error::{Error, ResourceNotFoundError, Result};
use crate::memory::{Handle, HandleMemory, HeapHandles};
use crate::parse::parse_directory;
use crate::types::{
    DirectoryKind, RootHeader, LEGACY_ROOT_HEADER_SIZE, MAX_CHUNK, MAX_CODECS, ROOT_HEADER_SIZE,
};

/// Options for how a rez archive should be opened
#[derive(Debug, Clone, Builder)]
pub struct RezOptions {
    /// Byte offset of the archive within the underlying file
    ///
    /// Allows an archive appended to another file to be opened in place.
    #[builder(default = 0)]
    pub start_offset: u32,

    /// Probe the filesystem for loose files that override archived resources
    #[builder(default = true)]
    pub external_files: bool,

    /// Directory searched for loose override files
    ///
    /// The current working directory when unset.
    #[builder(into)]
    pub external_root: Option<PathBuf>,
}

impl Default for RezOptions {
    fn default() -> Self {
        RezOptions::builder().build()
    }
}

/// How a [`RezArchive::load`] request was satisfied
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoadState {
    /// The data was already resident; only the reference count changed
    Cached,
    /// The data was read (and decompressed) into a fresh allocation
    Fresh,
}

/// Rez archive reader with a reference-counted resource cache
///
/// ```no_run
/// use std::io::Read;
///
/// fn dump_resource() -> burger_rez::error::Result<()> {
///     let mut rez = burger_rez::RezArchive::open("art.rez", Default::default())?;
///     rez.log_decompressor(1, Box::new(burger_rez::ZlibCodec::new()));
///
///     let (handle, _) = rez.load_name("title.tga")?;
///     println!("{} bytes", rez.bytes(handle).map_or(0, |b| b.len()));
///     rez.release_name("title.tga");
///
///     Ok(())
/// }
/// ```
pub struct RezArchive<R: Read + Seek, M: HandleMemory = HeapHandles> {
    reader: Option<R>,
    memory: M,
    directory: Directory,
    codecs: [Option<Box<dyn Decompress>>; MAX_CODECS],
    codec_ids: [[u8; 4]; MAX_CODECS],
    external_files: bool,
    external_root: Option<PathBuf>,
}

impl<R: Read + Seek, M: HandleMemory> Debug for RezArchive<R, M> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RezArchive({} resources)", self.directory.len())
    }
}

impl RezArchive<File> {
    /// Open a rez file from disk with a heap-backed memory manager
    pub fn open<P: AsRef<Path>>(path: P, options: RezOptions) -> Result<RezArchive<File>> {
        let mut archive = RezArchive::new(HeapHandles::new());
        archive.init(File::open(path)?, options)?;
        Ok(archive)
    }
}

impl<R: Read + Seek, M: HandleMemory> RezArchive<R, M> {
    /// Create an empty archive backed by `memory`
    ///
    /// Call [`RezArchive::init`] to attach a rez file.
    pub fn new(memory: M) -> RezArchive<R, M> {
        RezArchive {
            reader: None,
            memory,
            directory: Directory::default(),
            codecs: std::array::from_fn(|_| None),
            codec_ids: [[0; 4]; MAX_CODECS],
            external_files: true,
            external_root: None,
        }
    }

    /// Read and index a rez file.
    ///
    /// Validates the signature, detects the directory generation (old or
    /// new, byte-swapped or not), parses the directory and builds the name
    /// index. Any previously attached file is shut down first. On failure
    /// the archive is left empty, never half-initialized.
    pub fn init(&mut self, mut reader: R, options: RezOptions) -> Result<()> {
        self.shutdown();

        reader.seek(SeekFrom::Start(options.start_offset as u64))?;
        let mut header = RootHeader::read(&mut reader)?;
        let kind = header.detect();

        // Legacy headers are only 12 bytes, the directory starts where the
        // codec id table was read from
        let image_start = options.start_offset as u64
            + match kind {
                DirectoryKind::New => ROOT_HEADER_SIZE as u64,
                DirectoryKind::Legacy { .. } => LEGACY_ROOT_HEADER_SIZE as u64,
            };
        let mut raw = vec![0u8; header.mem_size as usize];
        reader.seek(SeekFrom::Start(image_start))?;
        reader.read_exact(&mut raw)?;

        self.directory = parse_directory(&raw, header.group_count, kind, options.start_offset)?;
        self.codec_ids = match kind {
            DirectoryKind::New => header.codec_ids,
            DirectoryKind::Legacy { .. } => [[0; 4]; MAX_CODECS],
        };
        self.external_files = options.external_files;
        self.external_root = options.external_root;
        self.reader = Some(reader);
        tracing::debug!("indexed rez archive with {} resources", self.directory.len());
        Ok(())
    }

    /// Free every cached handle, drop the directory and close the file.
    ///
    /// Safe to call on an archive that is already empty.
    pub fn shutdown(&mut self) {
        for (rez_num, entry) in self.directory.entries_mut() {
            if let Some(handle) = entry.data.take() {
                tracing::trace!("freeing cached resource {rez_num}");
                #[cfg(debug_assertions)]
                if entry.refs != 0 {
                    tracing::warn!(
                        "shutting down while resource {rez_num} holds {} references",
                        entry.refs
                    );
                }
                entry.refs = 0;
                self.memory.free(handle);
            }
        }
        self.directory = Directory::default();
        self.reader = None;
    }

    /// Install a decompressor for a codec slot.
    ///
    /// Slot ids run from 1 to [`MAX_CODECS`]; anything else is ignored.
    pub fn log_decompressor(&mut self, id: u8, codec: Box<dyn Decompress>) {
        match id {
            1..=3 => self.codecs[id as usize - 1] = Some(codec),
            _ => {
                #[cfg(debug_assertions)]
                tracing::warn!("decompressor id {id} is out of range, ignored");
            }
        }
    }

    /// Four character codes of the codecs named by the archive header
    pub fn codec_ids(&self) -> &[[u8; 4]; MAX_CODECS] {
        &self.codec_ids
    }

    /// The resource directory
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Number of resources in the archive
    pub fn len(&self) -> usize {
        self.directory.len()
    }

    /// Whether the archive holds no resources
    pub fn is_empty(&self) -> bool {
        self.directory.is_empty()
    }

    /// Lowest valid resource number
    pub fn lowest(&self) -> Option<u32> {
        self.directory.lowest()
    }

    /// Highest valid resource number
    pub fn highest(&self) -> Option<u32> {
        self.directory.highest()
    }

    /// Resolve a filename to its resource number
    pub fn rez_num(&self, name: &str) -> Option<u32> {
        self.directory.rez_num(name)
    }

    /// Filename of a resource, if it has one
    pub fn name_of(&self, rez_num: u32) -> Option<&str> {
        self.directory.name_of(rez_num)
    }

    /// Size of a resource once decompressed, in bytes
    pub fn size(&self, rez_num: u32) -> Option<u32> {
        self.directory.find(rez_num).map(|e| e.length)
    }

    /// Size of a resource as stored in the archive, zero if uncompressed
    pub fn compressed_size(&self, rez_num: u32) -> Option<u32> {
        self.directory.find(rez_num).map(|e| e.compressed_length)
    }

    /// The sorted name index
    pub fn names(&self) -> &[crate::directory::NameToRezNum] {
        self.directory.names()
    }

    /// Resource number a cached handle belongs to, if any
    pub fn id_of(&self, handle: Handle) -> Option<u32> {
        self.directory
            .entries()
            .find(|(_, entry)| entry.data == Some(handle))
            .map(|(rez_num, _)| rez_num)
    }

    /// Whether loose-file overrides are enabled
    pub fn external_flag(&self) -> bool {
        self.external_files
    }

    /// Enable or disable loose-file overrides, returning the previous state
    pub fn set_external_flag(&mut self, enable: bool) -> bool {
        std::mem::replace(&mut self.external_files, enable)
    }

    /// The backing memory manager
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// The backing memory manager, mutably
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    /// Payload bytes of a loaded resource handle
    ///
    /// `None` if the handle is unknown or its payload was purged.
    pub fn bytes(&self, handle: Handle) -> Option<&[u8]> {
        self.memory.bytes(handle)
    }

    /// Register a filename, returning its resource number.
    ///
    /// Idempotent for already-known names. The resource starts with no
    /// archive backing; a loose file with that name satisfies loads.
    pub fn add_name(&mut self, name: &str) -> u32 {
        self.directory.add_name(name)
    }

    /// Remove a resource, freeing any cached data first
    pub fn remove(&mut self, rez_num: u32) {
        self.kill(rez_num);
        self.directory.remove(rez_num);
    }

    /// Remove a resource by name
    pub fn remove_name(&mut self, name: &str) {
        if let Some(rez_num) = self.directory.rez_num(name) {
            self.remove(rez_num);
        }
    }

    /// Load a resource, returning a handle to its decompressed bytes.
    ///
    /// The reference count is raised on success, so every load must be
    /// paired with a [`RezArchive::release`]. A cache hit only touches the
    /// count; a handle whose payload the memory manager purged is freed and
    /// reloaded transparently. Loose-file overrides are probed before the
    /// archive when enabled. On any failure the reference count is restored
    /// and no handle leaks.
    pub fn load(&mut self, rez_num: u32) -> Result<(Handle, LoadState)> {
        let entry = self
            .directory
            .find_mut(rez_num)
            .ok_or(ResourceNotFoundError::Number(rez_num))?;
        bump(&mut entry.refs, rez_num);

        if let Some(handle) = entry.data {
            if !self.memory.is_purged(handle) {
                self.memory.set_purge_flag(handle, false);
                return Ok((handle, LoadState::Cached));
            }
            tracing::trace!("resource {rez_num} was purged, reloading");
            self.memory.free(handle);
            entry.data = None;
        }

        match self.load_fresh(rez_num) {
            Ok(handle) => Ok((handle, LoadState::Fresh)),
            Err(error) => {
                if let Some(entry) = self.directory.find_mut(rez_num) {
                    entry.refs = entry.refs.saturating_sub(1);
                }
                Err(error)
            }
        }
    }

    /// Load a resource by name.
    ///
    /// Unknown names are registered first; they may exist as loose files
    /// even though the archive has never heard of them.
    pub fn load_name(&mut self, name: &str) -> Result<(Handle, LoadState)> {
        let rez_num = match self.directory.rez_num(name) {
            Some(rez_num) => rez_num,
            None => self.directory.add_name(name),
        };
        self.load(rez_num)
    }

    /// Copy a resource's bytes into a caller buffer.
    ///
    /// Loads the resource, copies it and releases it again, returning the
    /// number of bytes copied. A buffer smaller than the resource still
    /// receives as much as it can hold, but the call is [`Error::Truncated`].
    pub fn read(&mut self, rez_num: u32, buf: &mut [u8]) -> Result<usize> {
        let (handle, _) = self.load(rez_num)?;
        let result = match self.bytes(handle) {
            Some(bytes) if bytes.len() <= buf.len() => {
                buf[..bytes.len()].copy_from_slice(bytes);
                Ok(bytes.len())
            }
            Some(bytes) => {
                buf.copy_from_slice(&bytes[..buf.len()]);
                Err(Error::Truncated {
                    needed: bytes.len(),
                    buffer: buf.len(),
                })
            }
            None => Err(Error::Corrupt),
        };
        self.release(rez_num);
        result
    }

    /// [`RezArchive::read`] by name, registering unknown names
    pub fn read_name(&mut self, name: &str, buf: &mut [u8]) -> Result<usize> {
        let rez_num = match self.directory.rez_num(name) {
            Some(rez_num) => rez_num,
            None => self.directory.add_name(name),
        };
        self.read(rez_num, buf)
    }

    /// Load a resource into the cache and immediately release it.
    ///
    /// The data stays resident (purgeable) so a later load is a cache hit.
    pub fn preload(&mut self, rez_num: u32) -> Result<()> {
        self.load(rez_num)?;
        self.release(rez_num);
        Ok(())
    }

    /// [`RezArchive::preload`] by name, registering unknown names
    pub fn preload_name(&mut self, name: &str) -> Result<()> {
        self.load_name(name)?;
        self.release_name(name);
        Ok(())
    }

    /// Drop one reference to a loaded resource.
    ///
    /// When the last reference goes away the cached data is marked
    /// purgeable rather than freed, so it can be reclaimed under memory
    /// pressure but reused for free until then.
    pub fn release(&mut self, rez_num: u32) {
        let Some(entry) = self.directory.find_mut(rez_num) else {
            return;
        };
        let Some(handle) = entry.data else {
            #[cfg(debug_assertions)]
            tracing::warn!("releasing resource {rez_num} that was never loaded");
            return;
        };
        match entry.refs {
            0 => {
                #[cfg(debug_assertions)]
                tracing::warn!("resource {rez_num} released more times than loaded");
            }
            1 => {
                entry.refs = 0;
                self.memory.set_purge_flag(handle, true);
            }
            _ => entry.refs -= 1,
        }
    }

    /// [`RezArchive::release`] by name
    pub fn release_name(&mut self, name: &str) {
        if let Some(rez_num) = self.directory.rez_num(name) {
            self.release(rez_num);
        }
    }

    /// Free a resource's cached data immediately, ignoring references
    pub fn kill(&mut self, rez_num: u32) {
        if let Some(entry) = self.directory.find_mut(rez_num) {
            if let Some(handle) = entry.data.take() {
                #[cfg(debug_assertions)]
                if entry.refs >= 2 {
                    tracing::warn!(
                        "killing resource {rez_num} while it holds {} references",
                        entry.refs
                    );
                }
                entry.refs = 0;
                self.memory.free(handle);
            }
        }
    }

    /// [`RezArchive::kill`] by name
    pub fn kill_name(&mut self, name: &str) {
        if let Some(rez_num) = self.directory.rez_num(name) {
            self.kill(rez_num);
        }
    }

    /// Hand ownership of a cached handle to the caller.
    ///
    /// The cache forgets the resource and clears the purge flag; freeing
    /// the handle is now the caller's job.
    pub fn detach(&mut self, rez_num: u32) -> Option<Handle> {
        let entry = self.directory.find_mut(rez_num)?;
        let handle = entry.data.take()?;
        #[cfg(debug_assertions)]
        if entry.refs >= 2 {
            tracing::warn!(
                "detaching resource {rez_num} while it holds {} references",
                entry.refs
            );
        }
        entry.refs = 0;
        self.memory.set_purge_flag(handle, false);
        Some(handle)
    }

    /// [`RezArchive::detach`] by name
    pub fn detach_name(&mut self, name: &str) -> Option<Handle> {
        let rez_num = self.directory.rez_num(name)?;
        self.detach(rez_num)
    }

    /// Free every cached handle that holds no references
    pub fn purge_cache(&mut self) {
        for (rez_num, entry) in self.directory.entries_mut() {
            if entry.refs == 0 {
                if let Some(handle) = entry.data.take() {
                    tracing::trace!("purging cached resource {rez_num}");
                    self.memory.free(handle);
                }
            }
        }
    }

    /// Unwrap and return the inner reader object, leaving the archive empty
    pub fn into_inner(mut self) -> Option<R> {
        let reader = self.reader.take();
        self.shutdown();
        reader
    }

    fn load_fresh(&mut self, rez_num: u32) -> Result<Handle> {
        if self.external_files {
            if let Some(handle) = self.load_external(rez_num)? {
                return Ok(handle);
            }
        }
        self.load_archived(rez_num)
    }

    /// Satisfy a load from a loose file named after the resource.
    ///
    /// `Ok(None)` means no override exists and the archive should be used;
    /// the probe result is remembered so the filesystem is only consulted
    /// once per resource.
    fn load_external(&mut self, rez_num: u32) -> Result<Option<Handle>> {
        let entry = self
            .directory
            .find_mut(rez_num)
            .ok_or(ResourceNotFoundError::Number(rez_num))?;
        if entry.probe == Probe::Missing {
            return Ok(None);
        }
        let Some(name) = entry.name.as_deref() else {
            return Ok(None);
        };

        let path = match &self.external_root {
            Some(root) => root.join(name),
            None => PathBuf::from(name),
        };
        let data = match std::fs::read(&path) {
            Ok(data) if !data.is_empty() => data,
            _ => {
                entry.probe = Probe::Missing;
                return Ok(None);
            }
        };
        tracing::debug!("resource {rez_num} overridden by {}", path.display());
        // the directory keeps the archive's length; the handle knows the
        // override's size
        entry.probe = Probe::Found;

        let handle = self
            .memory
            .alloc(data.len(), entry.high_memory)
            .ok_or(Error::OutOfMemory(data.len()))?;
        if let Some(bytes) = self.memory.bytes_mut(handle) {
            bytes.copy_from_slice(&data);
        }
        self.finish_load(rez_num, handle);
        Ok(Some(handle))
    }

    fn load_archived(&mut self, rez_num: u32) -> Result<Handle> {
        let entry = self
            .directory
            .find_mut(rez_num)
            .ok_or(ResourceNotFoundError::Number(rez_num))?;
        if entry.file_offset == 0 {
            return Err(Error::NoBackingData(rez_num));
        }
        let Some(reader) = self.reader.as_mut() else {
            return Err(Error::NoBackingData(rez_num));
        };

        let handle = if entry.codec != 0 {
            let codec = self
                .codecs
                .get_mut(entry.codec as usize - 1)
                .and_then(Option::as_mut)
                .ok_or(Error::MissingCodec(entry.codec))?;

            let mut offset = entry.file_offset as u64;
            let mut compressed = entry.compressed_length as usize;
            if entry.length == 0 {
                // Legacy entry: the decompressed size is a word ahead of
                // the payload instead of in the directory. It is always
                // little-endian, even when the directory is byte swapped.
                if compressed < 4 {
                    return Err(Error::Corrupt);
                }
                reader.seek(SeekFrom::Start(offset))?;
                entry.length = reader.read_u32::<LittleEndian>()?;
                offset += 4;
                compressed -= 4;
            }

            let length = entry.length as usize;
            let handle = self
                .memory
                .alloc(length, entry.high_memory)
                .ok_or(Error::OutOfMemory(length))?;
            if let Err(error) = fill_compressed(
                reader,
                codec.as_mut(),
                &mut self.memory,
                handle,
                offset,
                compressed,
            ) {
                self.memory.free(handle);
                return Err(error);
            }
            handle
        } else {
            let length = entry.length as usize;
            let handle = self
                .memory
                .alloc(length, entry.high_memory)
                .ok_or(Error::OutOfMemory(length))?;
            if let Err(error) = fill_plain(
                reader,
                &mut self.memory,
                handle,
                entry.file_offset as u64,
            ) {
                self.memory.free(handle);
                return Err(error);
            }
            handle
        };

        tracing::trace!("resource {rez_num} loaded from the archive");
        self.finish_load(rez_num, handle);
        Ok(handle)
    }

    fn finish_load(&mut self, rez_num: u32, handle: Handle) {
        self.memory.set_id(handle, rez_num);
        self.memory.set_purge_flag(handle, false);
        if let Some(entry) = self.directory.find_mut(rez_num) {
            entry.data = Some(handle);
        }
    }
}

impl<R: Read + Seek, M: HandleMemory> Drop for RezArchive<R, M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Raise a reference count, saturating instead of wrapping
#[cfg_attr(not(debug_assertions), allow(unused_variables))]
fn bump(refs: &mut u8, rez_num: u32) {
    #[cfg(debug_assertions)]
    if *refs == u8::MAX {
        tracing::warn!("reference count of resource {rez_num} is saturated");
    }
    *refs = refs.saturating_add(1);
}

fn fill_plain<R: Read + Seek, M: HandleMemory>(
    reader: &mut R,
    memory: &mut M,
    handle: Handle,
    offset: u64,
) -> Result<()> {
    reader.seek(SeekFrom::Start(offset))?;
    let dst = memory.bytes_mut(handle).ok_or(Error::Corrupt)?;
    reader.read_exact(dst)?;
    Ok(())
}

fn fill_compressed<R: Read + Seek, M: HandleMemory>(
    reader: &mut R,
    codec: &mut dyn Decompress,
    memory: &mut M,
    handle: Handle,
    offset: u64,
    compressed: usize,
) -> Result<()> {
    reader.seek(SeekFrom::Start(offset))?;
    let dst = memory.bytes_mut(handle).ok_or(Error::Corrupt)?;
    decompress_into(reader, codec, dst, compressed)
}

/// Stream a compressed payload through a codec in bounded chunks.
///
/// The whole payload never has to be resident; at most [`MAX_CHUNK`] bytes
/// are staged at a time. A stream that ends without filling `dst` exactly,
/// or fills it without reaching a verified end of stream, is corrupt.
fn decompress_into<R: Read>(
    reader: &mut R,
    codec: &mut dyn Decompress,
    dst: &mut [u8],
    compressed: usize,
) -> Result<()> {
    codec.reset();
    let mut chunk = vec![0u8; MAX_CHUNK.min(compressed)];
    let mut remaining = compressed;
    let mut produced = 0usize;
    while remaining > 0 {
        let take = remaining.min(chunk.len());
        reader.read_exact(&mut chunk[..take])?;
        codec.process(&mut dst[produced..], &chunk[..take])?;
        produced += codec.output_size();
        remaining -= take;
    }
    let complete = produced == dst.len() && codec.finished();
    codec.reset();
    if !complete {
        return Err(Error::Corrupt);
    }
    Ok(())
}
