//! Tree synchronization.
//!
//! Two phases: `plan` walks source and destination and produces an ordered
//! action list without touching anything, `apply` executes it. Ordering
//! guarantees parents exist before their contents: per directory, new
//! subdirectories first, then file copies, then recursion; mirror deletions
//! always run last. A failure aborts the remaining actions; completed ones
//! are kept, never rolled back.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::link::Link;
use crate::path::PathRef;
use crate::vfs::{FileStat, Vfs};

/// Compiler caches are never worth syncing to a board.
const ALWAYS_IGNORED: &[&str] = &["__pycache__"];

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Delete destination entries absent from the source.
    pub mirror: bool,
    /// Include dot-files and dot-directories.
    pub include_hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    MakeDir(PathRef),
    Copy { src: PathRef, dst: PathRef },
    /// Recursive removal of one destination entry.
    Delete(PathRef),
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::MakeDir(p) => write!(f, "mkdir {p}"),
            SyncAction::Copy { src, dst } => write!(f, "copy {src} -> {dst}"),
            SyncAction::Delete(p) => write!(f, "delete {p}"),
        }
    }
}

/// Ordered action list produced by [`plan`].
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub actions: Vec<SyncAction>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}

/// What [`apply`] managed to do before finishing or failing.
#[derive(Debug)]
pub struct SyncOutcome {
    pub completed: Vec<SyncAction>,
    /// Untouched actions; the first one is the action that failed.
    pub pending: Vec<SyncAction>,
    pub error: Option<Error>,
}

impl SyncOutcome {
    pub fn into_result(self) -> Result<Vec<SyncAction>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.completed),
        }
    }
}

/// Compare source and destination trees and produce the action list.
/// Read-only: nothing is created, written or deleted here.
pub async fn plan<L: Link>(
    vfs: &Vfs<'_, L>,
    src: &PathRef,
    dst: &PathRef,
    opts: &SyncOptions,
) -> Result<SyncPlan> {
    let src_stat = vfs.stat(src).await?;
    if !src_stat.is_dir() {
        return Err(Error::NotADirectory {
            path: src.to_string(),
        });
    }

    let mut actions = Vec::new();
    let mut deletes = Vec::new();
    let dst_missing = match vfs.stat_opt(dst).await? {
        Some(stat) if stat.is_dir() => false,
        Some(_) => {
            // a plain file stands where the destination tree root must go
            actions.push(SyncAction::Delete(dst.clone()));
            actions.push(SyncAction::MakeDir(dst.clone()));
            true
        }
        None => {
            actions.push(SyncAction::MakeDir(dst.clone()));
            true
        }
    };

    plan_dir(vfs, src.clone(), dst.clone(), dst_missing, opts, &mut actions, &mut deletes)
        .await?;
    actions.extend(deletes);
    debug!(actions = actions.len(), "sync plan built");
    Ok(SyncPlan { actions })
}

fn plan_dir<'f, 'a: 'f, L: Link>(
    vfs: &'f Vfs<'a, L>,
    src: PathRef,
    dst: PathRef,
    dst_missing: bool,
    opts: &'f SyncOptions,
    actions: &'f mut Vec<SyncAction>,
    deletes: &'f mut Vec<SyncAction>,
) -> Pin<Box<dyn Future<Output = Result<()>> + 'f>> {
    Box::pin(async move {
        let src_entries: Vec<_> = vfs
            .list(&src)
            .await?
            .into_iter()
            .filter(|e| !ignored(&e.name, opts))
            .collect();
        let dst_entries: BTreeMap<String, FileStat> = if dst_missing {
            BTreeMap::new()
        } else {
            vfs.list(&dst)
                .await?
                .into_iter()
                .filter(|e| !ignored(&e.name, opts))
                .map(|e| (e.name, e.stat))
                .collect()
        };

        // Pass 1: directories the destination lacks (or has as plain files).
        for entry in src_entries.iter().filter(|e| e.stat.is_dir()) {
            match dst_entries.get(&entry.name) {
                Some(existing) if existing.is_dir() => {}
                Some(_) => {
                    actions.push(SyncAction::Delete(dst.join(&entry.name)));
                    actions.push(SyncAction::MakeDir(dst.join(&entry.name)));
                }
                None => actions.push(SyncAction::MakeDir(dst.join(&entry.name))),
            }
        }

        // Pass 2: files that are new or stale.
        for entry in src_entries.iter().filter(|e| !e.stat.is_dir()) {
            let copy = SyncAction::Copy {
                src: src.join(&entry.name),
                dst: dst.join(&entry.name),
            };
            match dst_entries.get(&entry.name) {
                None => actions.push(copy),
                Some(existing) if existing.is_dir() => {
                    actions.push(SyncAction::Delete(dst.join(&entry.name)));
                    actions.push(copy);
                }
                Some(existing) => {
                    if needs_copy(&entry.stat, existing) {
                        actions.push(copy);
                    }
                }
            }
        }

        // Pass 3: descend, in the same lexical order.
        for entry in src_entries.iter().filter(|e| e.stat.is_dir()) {
            let child_missing = !matches!(dst_entries.get(&entry.name), Some(s) if s.is_dir());
            plan_dir(
                vfs,
                src.join(&entry.name),
                dst.join(&entry.name),
                child_missing,
                opts,
                actions,
                deletes,
            )
            .await?;
        }

        if opts.mirror {
            for name in dst_entries.keys() {
                if !src_entries.iter().any(|e| &e.name == name) {
                    deletes.push(SyncAction::Delete(dst.join(name)));
                }
            }
        }
        Ok(())
    })
}

/// Stale check for a file present on both sides: a size difference always
/// wins; otherwise only a strictly newer source with timestamps known on
/// both sides forces a copy. Unknown timestamps never do (boards without an
/// RTC would otherwise re-copy everything, every time).
fn needs_copy(src: &FileStat, dst: &FileStat) -> bool {
    if src.size != dst.size {
        return true;
    }
    match (src.mtime, dst.mtime) {
        (Some(s), Some(d)) => s > d,
        _ => false,
    }
}

fn ignored(name: &str, opts: &SyncOptions) -> bool {
    if ALWAYS_IGNORED.contains(&name) {
        return true;
    }
    !opts.include_hidden && name.starts_with('.')
}

/// Execute a plan in order. Stops at the first failure; earlier actions are
/// left in place.
pub async fn apply<L: Link>(vfs: &Vfs<'_, L>, plan: SyncPlan) -> SyncOutcome {
    let mut completed = Vec::new();
    let mut iter = plan.actions.into_iter();
    while let Some(action) = iter.next() {
        let result = match &action {
            SyncAction::MakeDir(path) => vfs.mkdir(path).await,
            SyncAction::Copy { src, dst } => copy_file(vfs, src, dst).await,
            SyncAction::Delete(path) => vfs.remove(path).await,
        };
        match result {
            Ok(()) => {
                info!(%action, "sync");
                completed.push(action);
            }
            Err(e) => {
                let mut pending = vec![action];
                pending.extend(iter);
                return SyncOutcome {
                    completed,
                    pending,
                    error: Some(e),
                };
            }
        }
    }
    SyncOutcome {
        completed,
        pending: Vec::new(),
        error: None,
    }
}

async fn copy_file<L: Link>(vfs: &Vfs<'_, L>, src: &PathRef, dst: &PathRef) -> Result<()> {
    let data = vfs.read(src).await?;
    vfs.write(dst, &data).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::link::mock::MockLink;
    use crate::remote::RemoteFs;
    use crate::session::Connection;
    use crate::transport::NoopPacer;
    use std::sync::Arc;
    use std::time::Duration;

    /// A connected session that never executes anything; lets the facade
    /// serve purely local paths.
    async fn offline_conn() -> Connection<MockLink> {
        let mut link = MockLink::new();
        link.expect_enter(b"soft reboot\r\n");
        let mut config = Config::new("/dev/null");
        config.locale = "en".to_string();
        config.raw_repl_timeout = Duration::from_millis(200);
        config.chunk_wait = Duration::ZERO;
        Connection::connect_with_pacer(link, config, Arc::new(NoopPacer))
            .await
            .unwrap()
    }

    fn local(path: &std::path::Path) -> PathRef {
        PathRef::local(path.to_str().unwrap())
    }

    #[test]
    fn size_difference_forces_copy() {
        let a = FileStat {
            kind: crate::vfs::EntryKind::File,
            size: 10,
            mtime: Some(100),
        };
        let b = FileStat { size: 11, ..a };
        assert!(needs_copy(&a, &b));
        assert!(needs_copy(&b, &a));
    }

    #[test]
    fn newer_source_forces_copy_only_with_both_timestamps() {
        let base = FileStat {
            kind: crate::vfs::EntryKind::File,
            size: 10,
            mtime: Some(100),
        };
        let newer = FileStat {
            mtime: Some(200),
            ..base
        };
        let unknown = FileStat { mtime: None, ..base };

        assert!(needs_copy(&newer, &base));
        assert!(!needs_copy(&base, &newer));
        assert!(!needs_copy(&base, &base));
        assert!(!needs_copy(&newer, &unknown));
        assert!(!needs_copy(&unknown, &base));
    }

    #[test]
    fn hidden_and_cache_filtering() {
        let default = SyncOptions::default();
        let with_hidden = SyncOptions {
            include_hidden: true,
            ..Default::default()
        };
        assert!(ignored(".git", &default));
        assert!(!ignored(".git", &with_hidden));
        assert!(ignored("__pycache__", &default));
        assert!(ignored("__pycache__", &with_hidden));
        assert!(!ignored("main.py", &default));
    }

    #[tokio::test]
    async fn plan_makes_dirs_before_copies_then_descends() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"A").unwrap();
        std::fs::create_dir(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub/b.txt"), b"B").unwrap();

        let conn = offline_conn().await;
        let vfs = Vfs::new(RemoteFs::new(&conn));
        let plan = plan(&vfs, &local(src.path()), &local(dst.path()), &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(
            plan.actions,
            vec![
                SyncAction::MakeDir(local(&dst.path().join("sub"))),
                SyncAction::Copy {
                    src: local(&src.path().join("a.txt")),
                    dst: local(&dst.path().join("a.txt")),
                },
                SyncAction::Copy {
                    src: local(&src.path().join("sub/b.txt")),
                    dst: local(&dst.path().join("sub/b.txt")),
                },
            ]
        );
    }

    #[tokio::test]
    async fn mirror_deletes_run_last() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("keep.txt"), b"K").unwrap();
        std::fs::write(dst.path().join("stale.txt"), b"S").unwrap();

        let conn = offline_conn().await;
        let vfs = Vfs::new(RemoteFs::new(&conn));

        let mirror = SyncOptions {
            mirror: true,
            ..Default::default()
        };
        let plan_actions = plan(&vfs, &local(src.path()), &local(dst.path()), &mirror)
            .await
            .unwrap()
            .actions;
        assert_eq!(plan_actions.len(), 2);
        assert!(matches!(plan_actions[0], SyncAction::Copy { .. }));
        assert_eq!(
            plan_actions[1],
            SyncAction::Delete(local(&dst.path().join("stale.txt")))
        );

        // without mirror the extra entry survives
        let keep = plan(
            &vfs,
            &local(src.path()),
            &local(dst.path()),
            &SyncOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(keep.len(), 1);
    }

    #[tokio::test]
    async fn trailing_separator_yields_the_same_plan() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"A").unwrap();

        let conn = offline_conn().await;
        let vfs = Vfs::new(RemoteFs::new(&conn));
        let ctx = crate::path::Context {
            local_cwd: "/".to_string(),
            remote_cwd: "/".to_string(),
        };
        let opts = SyncOptions {
            mirror: true,
            ..Default::default()
        };

        let with_slash = ctx.resolve(&format!("{}/", src.path().display()));
        let without = ctx.resolve(&src.path().display().to_string());
        assert_eq!(with_slash, without);

        let a = plan(&vfs, &with_slash, &local(dst.path()), &opts).await.unwrap();
        let b = plan(&vfs, &without, &local(dst.path()), &opts).await.unwrap();
        assert_eq!(a.actions, b.actions);
    }

    #[tokio::test]
    async fn apply_then_replan_is_empty() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"A").unwrap();
        std::fs::create_dir(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub/b.txt"), b"B").unwrap();

        let conn = offline_conn().await;
        let vfs = Vfs::new(RemoteFs::new(&conn));
        let opts = SyncOptions {
            mirror: true,
            ..Default::default()
        };

        let first = plan(&vfs, &local(src.path()), &local(dst.path()), &opts)
            .await
            .unwrap();
        let outcome = apply(&vfs, first).await;
        assert!(outcome.error.is_none());
        assert!(outcome.pending.is_empty());
        assert_eq!(
            std::fs::read(dst.path().join("sub/b.txt")).unwrap(),
            b"B"
        );

        let second = plan(&vfs, &local(src.path()), &local(dst.path()), &opts)
            .await
            .unwrap();
        assert!(second.is_empty(), "second plan not empty: {:?}", second.actions);
    }

    #[tokio::test]
    async fn apply_stops_at_first_failure() {
        let dst = tempfile::tempdir().unwrap();
        let conn = offline_conn().await;
        let vfs = Vfs::new(RemoteFs::new(&conn));

        let bad = SyncAction::Copy {
            src: PathRef::local("/definitely/not/here.txt"),
            dst: local(&dst.path().join("out.txt")),
        };
        let after = SyncAction::MakeDir(local(&dst.path().join("later")));
        let plan = SyncPlan {
            actions: vec![bad.clone(), after.clone()],
        };

        let outcome = apply(&vfs, plan).await;
        assert!(matches!(outcome.error, Some(Error::NotFound { .. })));
        assert!(outcome.completed.is_empty());
        assert_eq!(outcome.pending, vec![bad, after]);
        // the later action really did not run
        assert!(!dst.path().join("later").exists());
    }
}
