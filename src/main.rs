//! charon command line interface.
//!
//! charon is a tool to synchronize several types of artifacts repository
//! data to the configured object store targets and their fronting CDN.

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use charon::config::CharonConfig;
use charon::publish::{handle_maven_uploading, MavenUploadOptions};
use charon::storage::{
    CloudFrontCache, EdgeCache, ObjectStore, S3ObjectStore, DEFAULT_CONCURRENT_LIMIT,
};

#[derive(Debug, Parser)]
#[command(
    name = "charon",
    about = "charon is a tool to synchronize several types of artifacts repository data to \
             configured object store targets."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upload a Maven release archive to the configured targets
    Upload(UploadArgs),
}

#[derive(Debug, Args)]
struct UploadArgs {
    /// Path to the release archive
    archive: PathBuf,

    /// Product key identifying this release
    #[arg(short, long, env = "CHARON_PRODUCT")]
    product: String,

    /// Named target set from the configuration (can be given multiple times)
    #[arg(short, long = "target", required = true)]
    targets: Vec<String>,

    /// Directory inside the archive anchoring the repository layout
    #[arg(long, default_value = "maven-repository")]
    root: String,

    /// Path to the configuration file (default $HOME/.charon/charon.yaml)
    #[arg(long, env = "CHARON_CONFIG")]
    config: Option<PathBuf>,

    /// Base directory for the scratch extraction
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Generate and upload detached signature files
    #[arg(long)]
    contain_signature: bool,

    /// Log side-effecting calls without performing them
    #[arg(long)]
    dry_run: bool,

    /// Worker pool width per phase
    #[arg(long, default_value_t = DEFAULT_CONCURRENT_LIMIT)]
    concurrency: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = if cli.verbose {
        "charon=debug,info"
    } else {
        "charon=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();

    match cli.command {
        Commands::Upload(args) => upload(args).await,
    }
}

async fn upload(args: UploadArgs) -> Result<()> {
    let config = CharonConfig::load(args.config.as_deref()).await?;

    let store: Arc<dyn ObjectStore> =
        Arc::new(S3ObjectStore::new(&config.aws_profile, args.dry_run).await);
    let edge_cache: Option<Arc<dyn EdgeCache>> = if config.aws_cf_enable {
        Some(Arc::new(CloudFrontCache::new(&config.aws_profile).await))
    } else {
        None
    };

    let mut all_ok = true;
    for target_name in &args.targets {
        let Some(targets) = config.target(target_name) else {
            all_ok = false;
            continue;
        };
        let options = MavenUploadOptions {
            archive_path: args.archive.clone(),
            product_key: args.product.clone(),
            root: args.root.clone(),
            targets: targets.to_vec(),
            base_dir: args.base_dir.clone(),
            generate_signature: args.contain_signature,
            con_limit: args.concurrency,
        };
        let (scratch, ok) =
            handle_maven_uploading(&options, &config, store.clone(), edge_cache.clone()).await?;
        // The scratch dir is exclusively owned by this run; destroy it.
        if let Err(e) = std::fs::remove_dir_all(&scratch) {
            warn!("Can not remove scratch dir {}: {}", scratch.display(), e);
        }
        info!(
            "Uploading to target {} {}",
            target_name,
            if ok { "succeeded" } else { "finished with failures" }
        );
        all_ok = all_ok && ok;
    }

    if !all_ok {
        bail!("one or more uploads finished with failures");
    }
    Ok(())
}
