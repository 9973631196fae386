//! Byte-stream adapter: the contract the engine expects from the host
//! stream, concrete adapters for files and in-memory buffers, and the
//! single exclusive token that serialises all stream I/O.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::ops::{Deref, DerefMut};

use parking_lot::{Mutex, MutexGuard};

/// Random-access byte stream the database lives on.
///
/// Writes that seek beyond `len` extend the stream with zero-filled bytes.
/// Read-only streams must fail writes with `PermissionDenied`, which the
/// engine reports as `ReadOnlyStream`.
pub trait ByteStream: Send {
    fn seek(&mut self, pos: u64) -> io::Result<()>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> io::Result<()>;
    fn len(&mut self) -> io::Result<u64>;
    fn flush(&mut self) -> io::Result<()>;

    fn is_empty(&mut self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    fn read_exact(&mut self, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let n = self.read(buf)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended mid-read",
                ));
            }
            buf = &mut buf[n..];
        }
        Ok(())
    }
}

/// Adapter for any seekable reader/writer (e.g. `Cursor<Vec<u8>>`).
/// `flush` is the writer's flush; use [`FileStream`] when durability
/// requires `sync_data`.
#[derive(Debug)]
pub struct IoStream<T>(pub T);

impl<T: Read + Write + Seek + Send> ByteStream for IoStream<T> {
    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.0.seek(SeekFrom::Start(pos)).map(|_| ())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf)
    }

    fn len(&mut self) -> io::Result<u64> {
        let here = self.0.stream_position()?;
        let end = self.0.seek(SeekFrom::End(0))?;
        self.0.seek(SeekFrom::Start(here))?;
        Ok(end)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// A fresh in-memory stream.
#[must_use]
pub fn memory() -> IoStream<Cursor<Vec<u8>>> {
    IoStream(Cursor::new(Vec::new()))
}

/// An in-memory stream over existing bytes.
#[must_use]
pub fn memory_from(bytes: Vec<u8>) -> IoStream<Cursor<Vec<u8>>> {
    IoStream(Cursor::new(bytes))
}

/// File-backed stream whose `flush` is `sync_data`, so a flushed commit is
/// durable rather than merely buffered.
#[derive(Debug)]
pub struct FileStream {
    file: File,
}

impl FileStream {
    #[must_use]
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

impl ByteStream for FileStream {
    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(pos)).map(|_| ())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf)
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }
}

/// Wrapper that refuses writes. Reads and seeks pass through.
#[derive(Debug)]
pub struct ReadOnly<S>(pub S);

impl<S: ByteStream> ByteStream for ReadOnly<S> {
    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.0.seek(pos)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn write(&mut self, _buf: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "stream is read-only",
        ))
    }

    fn len(&mut self) -> io::Result<u64> {
        self.0.len()
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The single exclusive token over the host stream. Reader and writer
/// leases are mutually exclusive; callers block until the token is free.
#[derive(Debug)]
pub struct SharedStream<S> {
    inner: Mutex<S>,
}

impl<S: ByteStream> SharedStream<S> {
    pub fn new(stream: S) -> Self {
        Self { inner: Mutex::new(stream) }
    }

    pub fn read_lease(&self) -> ReadLease<'_, S> {
        ReadLease { guard: self.inner.lock() }
    }

    pub fn write_lease(&self) -> WriteLease<'_, S> {
        WriteLease { guard: self.inner.lock() }
    }

    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}

pub struct ReadLease<'a, S: ByteStream> {
    guard: MutexGuard<'a, S>,
}

impl<S: ByteStream> Deref for ReadLease<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.guard
    }
}

impl<S: ByteStream> DerefMut for ReadLease<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.guard
    }
}

/// Write lease; releasing it flushes the stream so buffered writers do not
/// hold committed pages hostage.
pub struct WriteLease<'a, S: ByteStream> {
    guard: MutexGuard<'a, S>,
}

impl<S: ByteStream> Deref for WriteLease<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.guard
    }
}

impl<S: ByteStream> DerefMut for WriteLease<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.guard
    }
}

impl<S: ByteStream> Drop for WriteLease<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.guard.flush() {
            log::warn!("flush on lease release failed: {e}");
        }
    }
}
