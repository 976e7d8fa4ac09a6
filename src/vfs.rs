//! One filesystem API over both domains.
//!
//! Callers resolve a [`PathRef`](crate::path::PathRef) and hand it here; the
//! facade dispatches to the local disk or the remote adapter, so copy and
//! sync logic never branches on location. Local metadata is folded into the
//! same shape the device reports: size plus whole-second mtime.

use std::time::UNIX_EPOCH;

use crate::error::{Error, Result};
use crate::link::Link;
use crate::path::{Context, Domain, PathRef};
use crate::remote::RemoteFs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// Metadata common to both domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub kind: EntryKind,
    pub size: u64,
    /// Seconds since the epoch; `None` when the filesystem has no usable
    /// timestamp (device without an RTC).
    pub mtime: Option<u64>,
}

impl FileStat {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// One directory entry with its metadata.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub stat: FileStat,
}

/// Domain-dispatching filesystem facade for one session.
pub struct Vfs<'a, L: Link> {
    remote: RemoteFs<'a, L>,
}

impl<'a, L: Link> Vfs<'a, L> {
    pub fn new(remote: RemoteFs<'a, L>) -> Self {
        Self { remote }
    }

    /// Directory listing, sorted by name for stable output.
    pub async fn list(&self, path: &PathRef) -> Result<Vec<Entry>> {
        let mut entries = if path.is_remote() {
            self.remote.list(path.as_str()).await?
        } else {
            local_list(path.as_str()).await?
        };
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    pub async fn stat(&self, path: &PathRef) -> Result<FileStat> {
        if path.is_remote() {
            self.remote.stat(path.as_str()).await
        } else {
            local_stat(path.as_str()).await
        }
    }

    /// As [`Vfs::stat`] but absence is `None`, not an error.
    pub async fn stat_opt(&self, path: &PathRef) -> Result<Option<FileStat>> {
        match self.stat(path).await {
            Ok(stat) => Ok(Some(stat)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn read(&self, path: &PathRef) -> Result<Vec<u8>> {
        if path.is_remote() {
            self.remote.read_file(path.as_str()).await
        } else {
            match tokio::fs::read(path.as_str()).await {
                Ok(data) => Ok(data),
                Err(e) => Err(local_err(e, path.as_str())),
            }
        }
    }

    pub async fn write(&self, path: &PathRef, data: &[u8]) -> Result<()> {
        if path.is_remote() {
            self.remote.write_file(path.as_str(), data).await
        } else {
            tokio::fs::write(path.as_str(), data)
                .await
                .map_err(|e| local_err(e, path.as_str()))
        }
    }

    pub async fn mkdir(&self, path: &PathRef) -> Result<()> {
        if path.is_remote() {
            self.remote.mkdir(path.as_str()).await
        } else {
            tokio::fs::create_dir(path.as_str())
                .await
                .map_err(|e| local_err(e, path.as_str()))
        }
    }

    /// Remove a file, or a directory and everything under it.
    pub async fn remove(&self, path: &PathRef) -> Result<()> {
        if path.is_remote() {
            return self.remote.remove(path.as_str()).await;
        }
        let stat = local_stat(path.as_str()).await?;
        let res = if stat.is_dir() {
            tokio::fs::remove_dir_all(path.as_str()).await
        } else {
            tokio::fs::remove_file(path.as_str()).await
        };
        res.map_err(|e| local_err(e, path.as_str()))
    }

    /// Change one domain's working directory. The context is updated
    /// optimistically and verified with a stat; on disagreement the previous
    /// directory is restored.
    pub async fn change_dir(&self, ctx: &mut Context, path: &PathRef) -> Result<()> {
        let slot = match path.domain {
            Domain::Local => &mut ctx.local_cwd,
            Domain::Remote => &mut ctx.remote_cwd,
        };
        let previous = std::mem::replace(slot, path.as_str().to_string());
        match self.stat(path).await {
            Ok(stat) if stat.is_dir() => Ok(()),
            Ok(_) => {
                self.restore_cwd(ctx, path.domain, previous);
                Err(Error::NotADirectory {
                    path: path.to_string(),
                })
            }
            Err(e) => {
                self.restore_cwd(ctx, path.domain, previous);
                Err(e)
            }
        }
    }

    fn restore_cwd(&self, ctx: &mut Context, domain: Domain, previous: String) {
        match domain {
            Domain::Local => ctx.local_cwd = previous,
            Domain::Remote => ctx.remote_cwd = previous,
        }
    }

    /// Rename within one domain. Cross-domain moves are a copy problem, not
    /// a rename, and are rejected here.
    pub async fn rename(&self, from: &PathRef, to: &PathRef) -> Result<()> {
        if from.domain != to.domain {
            return Err(Error::BadReply {
                op: "rename".into(),
                detail: "source and destination are in different domains".into(),
            });
        }
        if from.is_remote() {
            self.remote.rename(from.as_str(), to.as_str()).await
        } else {
            tokio::fs::rename(from.as_str(), to.as_str())
                .await
                .map_err(|e| local_err(e, from.as_str()))
        }
    }
}

async fn local_list(path: &str) -> Result<Vec<Entry>> {
    let mut dir = tokio::fs::read_dir(path)
        .await
        .map_err(|e| local_err(e, path))?;
    let mut entries = Vec::new();
    while let Some(item) = dir.next_entry().await.map_err(|e| local_err(e, path))? {
        let meta = item.metadata().await.map_err(|e| local_err(e, path))?;
        entries.push(Entry {
            name: item.file_name().to_string_lossy().into_owned(),
            stat: stat_from_metadata(&meta),
        });
    }
    Ok(entries)
}

async fn local_stat(path: &str) -> Result<FileStat> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| local_err(e, path))?;
    Ok(stat_from_metadata(&meta))
}

fn stat_from_metadata(meta: &std::fs::Metadata) -> FileStat {
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs());
    FileStat {
        kind: if meta.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        },
        size: meta.len(),
        mtime,
    }
}

fn local_err(e: std::io::Error, path: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound { path: path.into() },
        std::io::ErrorKind::NotADirectory => Error::NotADirectory { path: path.into() },
        _ => Error::Io(e),
    }
}
