//! Read-only stream view over a loaded resource.
//!
//! [`RezStream`] borrows the archive, pins one resource in the cache and
//! exposes its decompressed bytes through [`std::io::Read`] and
//! [`std::io::Seek`]. Dropping the stream releases the cache reference, so
//! the resource stays resident exactly as long as the stream lives.

use std::io::{self, Read, Seek, SeekFrom};

use crate::error::Result;
use crate::memory::{Handle, HandleMemory};
use crate::read::RezArchive;

/// Seekable read-only view of one loaded resource
pub struct RezStream<'a, R: Read + Seek, M: HandleMemory> {
    archive: Option<&'a mut RezArchive<R, M>>,
    handle: Handle,
    rez_num: u32,
    length: usize,
    position: usize,
}

impl<R: Read + Seek, M: HandleMemory> RezArchive<R, M> {
    /// Load a resource and wrap it in a stream.
    ///
    /// The load reference is held for the stream's lifetime and dropped
    /// with it.
    pub fn stream(&mut self, rez_num: u32) -> Result<RezStream<'_, R, M>> {
        let (handle, _) = self.load(rez_num)?;
        let length = self.bytes(handle).map_or(0, |b| b.len());
        Ok(RezStream {
            archive: Some(self),
            handle,
            rez_num,
            length,
            position: 0,
        })
    }

    /// [`RezArchive::stream`] by name, registering unknown names
    pub fn stream_name(&mut self, name: &str) -> Result<RezStream<'_, R, M>> {
        let rez_num = match self.rez_num(name) {
            Some(rez_num) => rez_num,
            None => self.add_name(name),
        };
        self.stream(rez_num)
    }
}

impl<R: Read + Seek, M: HandleMemory> RezStream<'_, R, M> {
    /// Size of the resource, in bytes
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the resource is empty
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Current read position, in bytes from the start
    pub fn position(&self) -> usize {
        self.position
    }

    /// Resource number the stream is pinned to
    pub fn rez_num(&self) -> u32 {
        self.rez_num
    }

    fn backing(&self) -> io::Result<&[u8]> {
        self.archive
            .as_deref()
            .and_then(|archive| archive.bytes(self.handle))
            .ok_or_else(|| io::Error::other("resource data was discarded"))
    }
}

impl<R: Read + Seek, M: HandleMemory> Read for RezStream<'_, R, M> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = self.backing()?;
        let take = buf.len().min(self.length - self.position);
        buf[..take].copy_from_slice(&bytes[self.position..self.position + take]);
        self.position += take;
        Ok(take)
    }
}

impl<R: Read + Seek, M: HandleMemory> Seek for RezStream<'_, R, M> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.length as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before the start of the resource",
            ));
        }
        // seeking past the end is allowed, reads there return nothing
        self.position = (target as usize).min(self.length);
        Ok(self.position as u64)
    }
}

impl<R: Read + Seek, M: HandleMemory> Drop for RezStream<'_, R, M> {
    fn drop(&mut self) {
        if let Some(archive) = self.archive.take() {
            archive.release(self.rez_num);
        }
    }
}
