//! Command implementations.
//!
//! Each function drives one subcommand against the resolved session. This is
//! the outermost layer: typed errors from below are wrapped with operator
//! context here, and this is the only module that prints to stdout.

use std::io::Write;

use anyhow::{bail, Context as _};
use chrono::{DateTime, Local, Utc};

use crate::link::Link;
use crate::path::Context;
use crate::session::Connection;
use crate::sync::{self, SyncOptions};
use crate::vfs::{Entry, Vfs};

/// `ls [-l] [PATH...]`
pub async fn ls<L: Link>(
    vfs: &Vfs<'_, L>,
    ctx: &Context,
    paths: &[String],
    long: bool,
) -> anyhow::Result<()> {
    let defaults = [":".to_string()];
    let paths = if paths.is_empty() { &defaults[..] } else { paths };
    let mut out = std::io::stdout().lock();
    for (i, raw) in paths.iter().enumerate() {
        let path = ctx.resolve(raw);
        let stat = vfs
            .stat(&path)
            .await
            .with_context(|| format!("cannot access {path}"))?;
        if !stat.is_dir() {
            print_entry(
                &mut out,
                &Entry {
                    name: path.file_name().to_string(),
                    stat,
                },
                long,
            )?;
            continue;
        }
        if paths.len() > 1 {
            if i > 0 {
                writeln!(out)?;
            }
            writeln!(out, "{path}:")?;
        }
        for entry in vfs
            .list(&path)
            .await
            .with_context(|| format!("cannot list {path}"))?
        {
            print_entry(&mut out, &entry, long)?;
        }
    }
    Ok(())
}

fn print_entry(out: &mut impl Write, entry: &Entry, long: bool) -> anyhow::Result<()> {
    let suffix = if entry.stat.is_dir() { "/" } else { "" };
    if !long {
        writeln!(out, "{}{suffix}", entry.name)?;
        return Ok(());
    }
    let size = if entry.stat.is_dir() {
        "<dir>".to_string()
    } else {
        entry.stat.size.to_string()
    };
    writeln!(
        out,
        "{size:>9} {} {}{suffix}",
        format_mtime(entry.stat.mtime),
        entry.name
    )?;
    Ok(())
}

fn format_mtime(mtime: Option<u64>) -> String {
    match mtime.and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0)) {
        Some(ts) => ts
            .with_timezone(&Local)
            .format("%b %e %Y %H:%M")
            .to_string(),
        None => "-".to_string(),
    }
}

/// `cat PATH...`
pub async fn cat<L: Link>(vfs: &Vfs<'_, L>, ctx: &Context, paths: &[String]) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    for raw in paths {
        let path = ctx.resolve(raw);
        let data = vfs
            .read(&path)
            .await
            .with_context(|| format!("cannot read {path}"))?;
        out.write_all(&data)?;
    }
    out.flush()?;
    Ok(())
}

/// `cp [-r] SRC... DST`
pub async fn cp<L: Link>(
    vfs: &Vfs<'_, L>,
    ctx: &Context,
    paths: &[String],
    recursive: bool,
) -> anyhow::Result<()> {
    let [srcs @ .., dst_raw] = paths else {
        bail!("cp needs a source and a destination");
    };
    if srcs.is_empty() {
        bail!("cp needs a source and a destination");
    }
    let dst = ctx.resolve(dst_raw);
    let dst_stat = vfs.stat_opt(&dst).await?;
    let dst_is_dir = dst_stat.is_some_and(|s| s.is_dir());
    if srcs.len() > 1 && !dst_is_dir {
        bail!("{dst} is not a directory");
    }

    for raw in srcs {
        let src = ctx.resolve(raw);
        let stat = vfs
            .stat(&src)
            .await
            .with_context(|| format!("cannot access {src}"))?;
        let target = if dst_is_dir {
            dst.join(src.file_name())
        } else {
            dst.clone()
        };
        if stat.is_dir() {
            if !recursive {
                bail!("{src} is a directory (use -r)");
            }
            let plan = sync::plan(vfs, &src, &target, &SyncOptions::default()).await?;
            sync::apply(vfs, plan)
                .await
                .into_result()
                .with_context(|| format!("copy of {src} aborted"))?;
        } else {
            let data = vfs
                .read(&src)
                .await
                .with_context(|| format!("cannot read {src}"))?;
            vfs.write(&target, &data)
                .await
                .with_context(|| format!("cannot write {target}"))?;
        }
    }
    Ok(())
}

/// `rm [-r] PATH...`
pub async fn rm<L: Link>(
    vfs: &Vfs<'_, L>,
    ctx: &Context,
    paths: &[String],
    recursive: bool,
) -> anyhow::Result<()> {
    for raw in paths {
        let path = ctx.resolve(raw);
        let stat = vfs
            .stat(&path)
            .await
            .with_context(|| format!("cannot access {path}"))?;
        if stat.is_dir() && !recursive {
            bail!("{path} is a directory (use -r)");
        }
        vfs.remove(&path)
            .await
            .with_context(|| format!("cannot remove {path}"))?;
    }
    Ok(())
}

/// `mkdir PATH...`
pub async fn mkdir<L: Link>(
    vfs: &Vfs<'_, L>,
    ctx: &Context,
    paths: &[String],
) -> anyhow::Result<()> {
    for raw in paths {
        let path = ctx.resolve(raw);
        vfs.mkdir(&path)
            .await
            .with_context(|| format!("cannot create {path}"))?;
    }
    Ok(())
}

/// `rsync [--mirror] [-n] [--all] SRC DST`
pub async fn rsync<L: Link>(
    vfs: &Vfs<'_, L>,
    ctx: &Context,
    src_raw: &str,
    dst_raw: &str,
    opts: &SyncOptions,
    dry_run: bool,
) -> anyhow::Result<()> {
    let src = ctx.resolve(src_raw);
    let dst = ctx.resolve(dst_raw);
    let plan = sync::plan(vfs, &src, &dst, opts)
        .await
        .with_context(|| format!("cannot compare {src} with {dst}"))?;

    let mut out = std::io::stdout().lock();
    if dry_run {
        for action in &plan.actions {
            writeln!(out, "{action}")?;
        }
        writeln!(out, "{} action(s) planned, nothing applied", plan.len())?;
        return Ok(());
    }

    let total = plan.len();
    let outcome = sync::apply(vfs, plan).await;
    if let Some(err) = outcome.error {
        let failed = outcome
            .pending
            .first()
            .map(|a| a.to_string())
            .unwrap_or_default();
        return Err(err).with_context(|| {
            format!(
                "sync aborted at `{failed}` ({} of {total} action(s) applied)",
                outcome.completed.len()
            )
        });
    }
    writeln!(out, "{} action(s) applied", outcome.completed.len())?;
    Ok(())
}

/// `exec CODE` - run a code fragment on the board and print its output.
pub async fn exec<L: Link>(conn: &Connection<L>, code: &str) -> anyhow::Result<()> {
    let output = conn
        .exec("exec", "-", code.as_bytes())
        .await
        .context("execution failed")?;
    let mut out = std::io::stdout().lock();
    out.write_all(&output.stdout)?;
    out.flush()?;
    Ok(())
}
