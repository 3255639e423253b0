use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use muxfs::mux::MuxerFactory;
use muxfs::{MountConfig, MuxCacheConfig, MuxFs, ThreadSleeper, ToolLauncher};

/// Mirror a directory, merging external subtitles into their video
/// containers on the fly.
#[derive(Parser, Debug)]
#[command(name = "muxfs", version, about)]
struct Cli {
    /// Source directory to mirror
    source: PathBuf,

    /// Mount point
    mountpoint: PathBuf,

    /// Temporary directory under which to produce merged files
    #[arg(long, env = "MUXFS_TEMP_DIR")]
    temp_dir: PathBuf,

    /// External merge tool invoked as `<tool> -o <output> <video> <subtitle>`
    #[arg(long, default_value = "mkvmerge")]
    mux_tool: PathBuf,

    /// Extra mount option, repeatable (read-only and default_permissions
    /// are always set)
    #[arg(short = 'o', long = "option")]
    options: Vec<String>,

    /// Completed-merge cache budget, in MB of source file size
    #[arg(long, default_value_t = 10240)]
    cache_size: u32,

    /// Seconds a finished merge stays cached after its last handle closes
    #[arg(long, default_value_t = 3600)]
    cache_ttl: u32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = MountConfig {
        source: cli.source,
        mount_point: cli.mountpoint,
        temp_dir: cli.temp_dir,
        mux_tool: cli.mux_tool,
        options: cli.options,
        cache: MuxCacheConfig {
            max_size_mb: cli.cache_size,
            ttl_secs: cli.cache_ttl,
        },
    };
    config.validate()?;

    let sleeper = Arc::new(ThreadSleeper);
    let factory = MuxerFactory::new(
        config.temp_dir.clone(),
        Arc::new(ToolLauncher::new(&config.mux_tool)),
        sleeper.clone(),
    );
    let fs = Arc::new(MuxFs::new(
        config.source.clone(),
        factory,
        sleeper,
        config.cache.clone(),
    ));

    muxfs::fuse::mount(fs, &config).context("mount failed")?;
    Ok(())
}
