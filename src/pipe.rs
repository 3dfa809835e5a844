//! Named pipe primitives shared by the workers and the tail helper.
//!
//! Both ends are opened non-blocking through tokio, so neither an empty
//! producer pipe nor a consumer pipe without a reader ever stalls the
//! scheduler.

use std::fs::File;
use std::io;
use std::os::fd::AsFd;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use bytes::BytesMut;
use nix::libc;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tokio::net::unix::pipe;

use crate::registry::EntryId;

/// Outcome of one attempt to open a consumer pipe for writing.
#[derive(Debug)]
pub enum Connection {
    /// A reader is attached and the pipe is the one that was registered.
    Open(pipe::Sender),
    /// The pipe exists but nobody is reading it yet.
    NoReader,
    /// The registered pipe is gone or was replaced under the same name.
    Gone,
}

/// Outcome of opening a producer pipe.
#[derive(Debug)]
pub enum Producer {
    Open(pipe::Receiver),
    Gone,
}

/// True for the "pipe has no reader" error of a non-blocking write open.
pub fn is_no_reader(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENXIO)
}

/// Identity of an open descriptor.
pub fn identity(fd: &impl AsFd) -> io::Result<EntryId> {
    let meta = File::from(fd.as_fd().try_clone_to_owned()?).metadata()?;
    Ok(EntryId::new(meta.dev(), meta.ino()))
}

/// Open a producer pipe for reading, checking it is still the registered one.
pub fn open_producer(path: &Path, expected: EntryId) -> io::Result<Producer> {
    let receiver = match pipe::OpenOptions::new().open_receiver(path) {
        Ok(receiver) => receiver,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Producer::Gone),
        Err(e) => return Err(e),
    };

    if identity(&receiver)? != expected {
        return Ok(Producer::Gone);
    }
    Ok(Producer::Open(receiver))
}

/// Attempt to open a consumer pipe for writing.
pub fn connect_consumer(path: &Path, expected: EntryId) -> io::Result<Connection> {
    let sender = match pipe::OpenOptions::new().open_sender(path) {
        Ok(sender) => sender,
        // ENXIO = no reader yet, retry later
        Err(e) if is_no_reader(&e) => return Ok(Connection::NoReader),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Connection::Gone),
        Err(e) => return Err(e),
    };

    if identity(&sender)? != expected {
        return Ok(Connection::Gone);
    }
    Ok(Connection::Open(sender))
}

/// Read everything currently buffered in the pipe.
///
/// Reads `chunk_size` bytes at a time until a read comes back short, would
/// block, or reports end-of-file. Never suspends.
pub fn drain(receiver: &pipe::Receiver, chunk_size: usize) -> io::Result<BytesMut> {
    let mut out = BytesMut::new();
    let mut buf = vec![0u8; chunk_size];

    loop {
        match receiver.try_read(&mut buf) {
            Ok(n) => {
                out.extend_from_slice(&buf[..n]);
                if n < chunk_size {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(out)
}

/// Create a named pipe readable and writable by the owner.
pub fn create_fifo(path: &Path) -> io::Result<()> {
    mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(io::Error::from)
}

/// A listed pipe plus a handle that keeps its inode allocated.
///
/// While the handle is alive the filesystem cannot give the same inode
/// number to a pipe recreated under the same name, so `(dev, ino)` alone
/// tells the old and new pipe apart.
#[derive(Debug)]
pub struct Pinned {
    id: EntryId,
    _handle: Option<File>,
}

impl Pinned {
    pub fn id(&self) -> EntryId {
        self.id
    }
}

/// Pin the FIFO at `path` without becoming a reader or writer of it.
///
/// Returns `None` if the entry vanished or is not a FIFO.
pub fn pin(path: &Path) -> io::Result<Option<Pinned>> {
    let (meta, handle) = match pin_handle(path) {
        Ok(pinned) => pinned,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    if !meta.file_type().is_fifo() {
        return Ok(None);
    }
    Ok(Some(Pinned {
        id: EntryId::new(meta.dev(), meta.ino()),
        _handle: handle,
    }))
}

// O_PATH references the inode only; pipe reader/writer counts are untouched.
#[cfg(target_os = "linux")]
fn pin_handle(path: &Path) -> io::Result<(std::fs::Metadata, Option<File>)> {
    use std::os::unix::fs::OpenOptionsExt;

    let handle = std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_PATH | libc::O_NOFOLLOW)
        .open(path)?;
    Ok((handle.metadata()?, Some(handle)))
}

// No inode-only open elsewhere: identity falls back to a plain lstat.
#[cfg(not(target_os = "linux"))]
fn pin_handle(path: &Path) -> io::Result<(std::fs::Metadata, Option<File>)> {
    Ok((std::fs::symlink_metadata(path)?, None))
}
