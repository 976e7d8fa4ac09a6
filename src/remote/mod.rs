//! Remote filesystem adapter.
//!
//! Presents the device's filesystem as ordinary operations by rendering each
//! one to a code fragment, running it through the session, and decoding the
//! single JSON (or hex) line it prints. Reads and writes are blocked so no
//! single exchange exceeds what the raw REPL input buffer and USB CDC
//! endpoint tolerate.

pub mod fragment;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::link::Link;
use crate::repl::Output;
use crate::session::Connection;
use crate::vfs::{Entry, EntryKind, FileStat};

use fragment::Request;

/// Filesystem view of a connected board.
pub struct RemoteFs<'a, L: Link> {
    conn: &'a Connection<L>,
    block: usize,
}

/// Raw stat tuple as printed by the device: `[mode, size, mtime]`.
#[derive(Debug, Deserialize)]
struct RawStat(u32, u64, u64);

/// Raw listing row: `[name, mode, size, mtime]`.
#[derive(Debug, Deserialize)]
struct RawEntry(String, u32, u64, u64);

impl RawStat {
    fn into_stat(self) -> FileStat {
        make_stat(self.0, self.1, self.2)
    }
}

fn make_stat(mode: u32, size: u64, mtime: u64) -> FileStat {
    FileStat {
        kind: if mode & 0x4000 != 0 {
            EntryKind::Dir
        } else {
            EntryKind::File
        },
        size,
        // FAT volumes without a clock report epoch zero; treat as unknown
        mtime: if mtime == 0 { None } else { Some(mtime) },
    }
}

impl<'a, L: Link> RemoteFs<'a, L> {
    pub fn new(conn: &'a Connection<L>) -> Self {
        let block = conn.config().read_block;
        Self { conn, block }
    }

    /// List `path` with one stat per entry, unsorted as the device reports.
    pub async fn list(&self, path: &str) -> Result<Vec<Entry>> {
        let out = self.run(&Request::List { path: path.into() }).await?;
        let rows: Vec<RawEntry> = decode_json("list", &out)?;
        Ok(rows
            .into_iter()
            .map(|RawEntry(name, mode, size, mtime)| Entry {
                name,
                stat: make_stat(mode, size, mtime),
            })
            .collect())
    }

    pub async fn stat(&self, path: &str) -> Result<FileStat> {
        let out = self.run(&Request::Stat { path: path.into() }).await?;
        let raw: RawStat = decode_json("stat", &out)?;
        Ok(raw.into_stat())
    }

    /// As [`RemoteFs::stat`] but absence is `None`, not an error.
    pub async fn stat_opt(&self, path: &str) -> Result<Option<FileStat>> {
        match self.stat(path).await {
            Ok(stat) => Ok(Some(stat)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read a whole file in bounded blocks.
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let out = self
                .run(&Request::ReadBlock {
                    path: path.into(),
                    offset: data.len(),
                    len: self.block,
                })
                .await?;
            let block = hex_block(&out)?;
            let done = block.len() < self.block;
            data.extend_from_slice(&block);
            if done {
                debug!(path, len = data.len(), "remote read complete");
                return Ok(data);
            }
        }
    }

    /// Write a whole file in bounded blocks: truncate on the first block,
    /// append for the rest. An empty `data` still creates the file.
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut blocks = data.chunks(self.block);
        let first = blocks.next().unwrap_or(&[]);
        self.run(&Request::WriteNew {
            path: path.into(),
            data: first.to_vec(),
        })
        .await?;
        for block in blocks {
            self.run(&Request::WriteAppend {
                path: path.into(),
                data: block.to_vec(),
            })
            .await?;
        }
        debug!(path, len = data.len(), "remote write complete");
        Ok(())
    }

    pub async fn mkdir(&self, path: &str) -> Result<()> {
        self.run(&Request::Mkdir { path: path.into() }).await?;
        Ok(())
    }

    /// Remove a file, or a directory tree recursively.
    pub async fn remove(&self, path: &str) -> Result<()> {
        self.run(&Request::Remove { path: path.into() }).await?;
        Ok(())
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.run(&Request::Rename {
            from: from.into(),
            to: to.into(),
        })
        .await?;
        Ok(())
    }

    async fn run(&self, req: &Request) -> Result<Output> {
        let code = req.render();
        self.conn
            .exec(req.op(), req.path(), &code)
            .await
            .map_err(|e| refine(e, req.path()))
    }
}

/// Fold well-known device errnos into typed errors; everything else stays a
/// verbatim device error.
fn refine(err: Error, path: &str) -> Error {
    if let Error::Device { ref message, .. } = err {
        if message.contains("[Errno 2]") || message.contains("ENOENT") {
            return Error::NotFound { path: path.into() };
        }
        if message.contains("[Errno 20]") || message.contains("ENOTDIR") {
            return Error::NotADirectory { path: path.into() };
        }
    }
    err
}

/// Decode one read reply. Unlike the JSON replies, a blank stdout is valid
/// here: reading at or past end-of-file prints an empty hex line, which is
/// the zero-length block that terminates the read loop.
fn hex_block(out: &Output) -> Result<Vec<u8>> {
    let text = std::str::from_utf8(&out.stdout).map_err(|e| Error::BadReply {
        op: "read".into(),
        detail: format!("non-utf8 reply: {e}"),
    })?;
    let line = text
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("");
    hex::decode(line.trim()).map_err(|e| Error::BadReply {
        op: "read".into(),
        detail: format!("bad hex block: {e}"),
    })
}

/// The reply is the last non-empty stdout line; anything before it is noise
/// from the board (import warnings, stray prints from soft-reboot remnants).
fn last_line<'o>(op: &str, out: &'o Output) -> Result<&'o str> {
    let text = std::str::from_utf8(&out.stdout).map_err(|e| Error::BadReply {
        op: op.into(),
        detail: format!("non-utf8 reply: {e}"),
    })?;
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| Error::BadReply {
            op: op.into(),
            detail: "empty reply".into(),
        })
}

fn decode_json<T: serde::de::DeserializeOwned>(op: &str, out: &Output) -> Result<T> {
    let line = last_line(op, out)?;
    serde_json::from_str(line.trim()).map_err(|e| Error::BadReply {
        op: op.into(),
        detail: format!("{e}: {line:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(stdout: &[u8]) -> Output {
        Output {
            stdout: stdout.to_vec(),
            stderr: Vec::new(),
        }
    }

    #[test]
    fn decodes_last_nonempty_line() {
        let reply = out(b"stray warning\n\n[16384, 0, 0]\n");
        let raw: RawStat = decode_json("stat", &reply).unwrap();
        let stat = raw.into_stat();
        assert_eq!(stat.kind, EntryKind::Dir);
        assert_eq!(stat.mtime, None);
    }

    #[test]
    fn file_stat_keeps_size_and_mtime() {
        let raw: RawStat = decode_json("stat", &out(b"[32768, 1200, 1700000000]\n")).unwrap();
        let stat = raw.into_stat();
        assert_eq!(stat.kind, EntryKind::File);
        assert_eq!(stat.size, 1200);
        assert_eq!(stat.mtime, Some(1_700_000_000));
    }

    #[test]
    fn blank_read_reply_is_an_empty_block() {
        assert!(hex_block(&out(b"")).unwrap().is_empty());
        assert!(hex_block(&out(b"\r\n")).unwrap().is_empty());
        assert_eq!(hex_block(&out(b"68656c6c\r\n")).unwrap(), b"hell");
    }

    #[test]
    fn bad_hex_is_bad_reply() {
        assert!(matches!(
            hex_block(&out(b"zz\r\n")).unwrap_err(),
            Error::BadReply { .. }
        ));
    }

    #[test]
    fn empty_reply_is_bad_reply() {
        let err = decode_json::<RawStat>("stat", &out(b"\n\n")).unwrap_err();
        assert!(matches!(err, Error::BadReply { .. }));
    }

    #[test]
    fn errno_2_refines_to_not_found() {
        let device = Error::Device {
            op: "stat".into(),
            path: "/gone.py".into(),
            message: "Traceback (most recent call last):\nOSError: [Errno 2] ENOENT".into(),
        };
        match refine(device, "/gone.py") {
            Error::NotFound { path } => assert_eq!(path, "/gone.py"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn errno_20_refines_to_not_a_directory() {
        let device = Error::Device {
            op: "list".into(),
            path: "/code.py".into(),
            message: "OSError: [Errno 20] ENOTDIR".into(),
        };
        assert!(matches!(
            refine(device, "/code.py"),
            Error::NotADirectory { .. }
        ));
    }

    #[test]
    fn other_device_errors_pass_through() {
        let device = Error::Device {
            op: "write".into(),
            path: "/big.bin".into(),
            message: "OSError: [Errno 28] ENOSPC".into(),
        };
        assert!(matches!(refine(device, "/big.bin"), Error::Device { .. }));
    }
}
