use anyhow::Context as _;
use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use cpsh::cli::{Cli, Command};
use cpsh::error::Error;
use cpsh::link::SerialLink;
use cpsh::ops;
use cpsh::path;
use cpsh::remote::RemoteFs;
use cpsh::session::Connection;
use cpsh::sync::SyncOptions;
use cpsh::vfs::Vfs;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        eprintln!("cpsh: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "cpsh=debug",
        _ => "cpsh=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.resolve_config()?;
    debug!(port = %config.port, baud = config.baud, locale = %config.locale, "configuration resolved");
    if !cpsh::locale::is_known(&config.locale) {
        warn!(locale = %config.locale, "locale not in the banner catalog, using the English banner");
    }

    let link = SerialLink::open(&config.port, config.baud)?;
    let conn = Connection::connect(link, config)
        .await
        .context("could not establish a raw REPL session")?;

    let result = tokio::select! {
        res = dispatch(&conn, &cli.command) => res,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt requested");
            if let Err(e) = conn.interrupt().await {
                warn!(error = %e, "interrupt failed");
            }
            Err(Error::Cancelled.into())
        }
    };

    if let Err(e) = conn.disconnect().await {
        warn!(error = %e, "disconnect failed");
    }
    result
}

async fn dispatch(conn: &Connection<SerialLink>, command: &Command) -> anyhow::Result<()> {
    let ctx = path::Context::new();
    let vfs = Vfs::new(RemoteFs::new(conn));
    match command {
        Command::Ls { long, paths } => ops::ls(&vfs, &ctx, paths, *long).await,
        Command::Cat { paths } => ops::cat(&vfs, &ctx, paths).await,
        Command::Cp { recursive, paths } => ops::cp(&vfs, &ctx, paths, *recursive).await,
        Command::Rm { recursive, paths } => ops::rm(&vfs, &ctx, paths, *recursive).await,
        Command::Mkdir { paths } => ops::mkdir(&vfs, &ctx, paths).await,
        Command::Rsync {
            mirror,
            dry_run,
            all,
            src,
            dst,
        } => {
            let opts = SyncOptions {
                mirror: *mirror,
                include_hidden: *all,
            };
            ops::rsync(&vfs, &ctx, src, dst, &opts, *dry_run).await
        }
        Command::Exec { code } => ops::exec(conn, code).await,
    }
}
