//! Consumer side of the broadcast: one pipe under a resource's output
//! directory, streamed to a writer until the process goes away.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::unix::pipe;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pipe::create_fifo;

/// Consumer name that will not collide with other tails.
pub fn unique_name() -> String {
    format!("tail-{}", Uuid::new_v4())
}

/// A consumer pipe owned by this process. Removed on drop.
#[derive(Debug)]
pub struct ConsumerPipe {
    path: PathBuf,
}

impl ConsumerPipe {
    /// Create `<output_dir>/<resource>/<name>` as a FIFO.
    ///
    /// The resource directory is created if the daemon has not done so yet.
    /// Fails if the name is already taken.
    pub async fn create(output_dir: &Path, resource: &str, name: &str) -> io::Result<Self> {
        let dir = output_dir.join(resource);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(name);
        create_fifo(&path)?;
        info!(resource = %resource, consumer = %name, path = %path.display(), "Consumer pipe created");

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy everything arriving on the pipe into `out`.
    ///
    /// Runs until `out` is closed or an I/O error occurs. A closed `out`
    /// counts as a normal end.
    pub async fn stream_to<W>(&self, out: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            let mut receiver = open_receiver(&self.path)?;
            match tokio::io::copy(&mut receiver, out).await {
                Ok(bytes) => debug!(bytes, "Writer closed consumer pipe, reopening"),
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(()),
                Err(e) => return Err(e),
            }
            match out.flush().await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for ConsumerPipe {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "Consumer pipe removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove consumer pipe"),
        }
    }
}

/// Open the read end. On Linux the pipe is also held open for writing so
/// the daemon closing its end between drains never reads as end-of-file.
fn open_receiver(path: &Path) -> io::Result<pipe::Receiver> {
    let mut options = pipe::OpenOptions::new();
    #[cfg(target_os = "linux")]
    options.read_write(true);
    options.open_receiver(path)
}
