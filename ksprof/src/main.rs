//! ksprof - per-group divergence profiling
//!
//! Command surface around the profiling pipeline: load the properties
//! file, resolve groups and their plate-local controls from the metadata
//! database, dispatch one signed-KS computation per group over the
//! configured worker pool, and write the assembled profile matrix.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use ksprof::cache::{CacheHandle, Normalization};
use ksprof::controls::{ControlMap, ControlPolicy};
use ksprof::db::MetadataDb;
use ksprof::dispatch::{Dispatcher, GroupTask, PoolSpec, TaskFailure};
use ksprof::profile::Profiles;
use ksprof_common::config::Properties;

/// Command-line arguments for ksprof
#[derive(Parser, Debug)]
#[command(name = "ksprof")]
#[command(about = "Per-group signed KS divergence profiles from cached image features")]
#[command(version)]
struct Args {
    /// Properties file describing the metadata database, filters and groups
    properties_file: PathBuf,

    /// Directory holding the normalized feature cache
    cache_dir: PathBuf,

    /// Name of the group definition to profile
    group: String,

    /// Name of the filter selecting control images
    control_filter: String,

    /// Where to write the profile; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Only profile images matching this named filter
    #[arg(short = 'f', long)]
    filter: Option<String>,

    /// Worker pool size; 0 runs groups sequentially
    #[arg(long, default_value = "0", env = "KSPROF_WORKERS")]
    workers: usize,

    /// Per-group deadline in seconds; a timed-out group is reported as failed
    #[arg(long)]
    task_timeout: Option<u64>,

    /// Normalization strategy applied to every cache load
    #[arg(long, value_enum, default_value_t = NormalizationArg::RobustLinear)]
    normalization: NormalizationArg,

    /// How controls gathered across a group's images are combined
    #[arg(long, value_enum, default_value_t = ControlPolicyArg::Repeat)]
    control_policy: ControlPolicyArg,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum NormalizationArg {
    RobustLinear,
    Raw,
}

impl From<NormalizationArg> for Normalization {
    fn from(arg: NormalizationArg) -> Self {
        match arg {
            NormalizationArg::RobustLinear => Normalization::RobustLinear,
            NormalizationArg::Raw => Normalization::Raw,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ControlPolicyArg {
    /// Repeat a plate's controls once per treatment image on it
    Repeat,
    /// Use each control image at most once per group
    Dedup,
}

impl From<ControlPolicyArg> for ControlPolicy {
    fn from(arg: ControlPolicyArg) -> Self {
        match arg {
            ControlPolicyArg::Repeat => ControlPolicy::PerImageRepeat,
            ControlPolicyArg::Dedup => ControlPolicy::Deduplicate,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    info!("Starting ksprof v{}", env!("CARGO_PKG_VERSION"));

    let props = Properties::load(&args.properties_file)
        .context("failed to load properties file")?;
    if !args.cache_dir.is_dir() {
        bail!("cache directory not found: {}", args.cache_dir.display());
    }

    // The cache's schema is the schema of the run; reading it up front
    // fails fast on an unusable cache and gives assembly its reference.
    let cache = CacheHandle::new(&args.cache_dir);
    let feature_names = cache
        .feature_names()
        .context("cache has no usable feature-name list")?;
    info!(
        "Cache {} holds {} features",
        args.cache_dir.display(),
        feature_names.len()
    );

    let db = MetadataDb::connect(&props)
        .await
        .context("failed to open metadata database")?;

    let groups = db
        .group_map(&args.group, args.filter.as_deref())
        .await
        .context("failed to resolve group definition")?;
    info!("Grouping '{}' resolved {} groups", args.group, groups.len());

    // Built once, before any group is resolved; shared by value with
    // every task.
    let control_map = ControlMap::new(
        db.plate_by_image().await.context("failed to map plates")?,
        db.control_images_by_plate(&args.control_filter)
            .await
            .context("failed to resolve control filter")?,
    );

    let policy = ControlPolicy::from(args.control_policy);
    let mut tasks = Vec::new();
    let mut failures: Vec<TaskFailure> = Vec::new();
    for (key, treatment) in groups {
        match control_map.resolve(&treatment, policy) {
            Ok(controls) => tasks.push(GroupTask {
                key,
                treatment,
                controls,
            }),
            Err(e) => {
                warn!(group = %key, "control resolution failed: {e}");
                failures.push(TaskFailure::from_error(key, &e));
            }
        }
    }

    let pool = if args.workers == 0 {
        PoolSpec::Sequential
    } else {
        PoolSpec::Local {
            workers: args.workers,
        }
    };
    let dispatcher = Dispatcher::new(
        &args.cache_dir,
        Normalization::from(args.normalization),
        pool,
        args.task_timeout.map(Duration::from_secs),
    );
    let outcome = dispatcher.run_all(tasks).await;

    failures.extend(outcome.failures);
    failures.sort_by(|a, b| a.key.cmp(&b.key));
    for failure in &failures {
        warn!(
            "group {} failed [{}]: {}",
            failure.key, failure.class, failure.reason
        );
    }
    for key in outcome.completed.keys() {
        info!("group {key} succeeded");
    }
    info!(
        "{} groups succeeded, {} failed",
        outcome.completed.len(),
        failures.len()
    );

    let profiles = Profiles::assemble(&args.group, feature_names, outcome.completed)
        .context("profile assembly failed")?;
    match &args.output {
        Some(path) => {
            profiles
                .save(path)
                .with_context(|| format!("failed to write profile to {}", path.display()))?;
            info!("Profile written to {}", path.display());
        }
        None => profiles
            .save_to(std::io::stdout().lock())
            .context("failed to write profile to stdout")?,
    }

    Ok(())
}
