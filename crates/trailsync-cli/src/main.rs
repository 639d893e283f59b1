use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use trailsync_catalog::kind;
use trailsync_core::{format_duration_minutes, whole_kilometres, EntityKind, KindId};
use trailsync_sync::{
    build_pipeline, build_survey_pipeline, logging, run_kinds, TrailsyncConfig,
    DEFAULT_CONFIG_PATH,
};

#[derive(Debug, Parser)]
#[command(name = "trailsync")]
#[command(about = "Synchronize outdoor catalog content into a datastore")]
struct Cli {
    /// YAML settings file. Without it, `trailsync.yaml` is used when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile listed entities and write today's statistic.
    Sync {
        #[arg(long, value_enum, default_value_t = KindArg::Trail)]
        kind: KindArg,
    },
    /// Total the current listing without writing anything.
    Survey {
        #[arg(long, value_enum, default_value_t = KindArg::Trail)]
        kind: KindArg,
    },
    /// Clear the `new` marker on every stored record of the project.
    ResetNew {
        #[arg(long, value_enum, default_value_t = KindArg::Trail)]
        kind: KindArg,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Trail,
    Poi,
    Event,
    Condition,
    All,
}

impl KindArg {
    fn kinds(self) -> Vec<EntityKind> {
        let ids = match self {
            KindArg::Trail => vec![KindId::Trail],
            KindArg::Poi => vec![KindId::PointOfInterest],
            KindArg::Event => vec![KindId::Event],
            KindArg::Condition => vec![KindId::Condition],
            KindArg::All => KindId::ALL.to_vec(),
        };
        ids.into_iter().map(kind).collect()
    }
}

fn load_config(explicit: Option<PathBuf>) -> Result<TrailsyncConfig> {
    let path = explicit
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    if explicit.is_none() && !path.exists() {
        let mut config = TrailsyncConfig::default();
        config.apply_env_overrides(|name| std::env::var(name).ok());
        return Ok(config);
    }
    TrailsyncConfig::read(&path).with_context(|| format!("loading {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config)?;
    logging::init(&config.log.level, config.log.file.as_deref())?;

    match cli.command.unwrap_or(Commands::Sync {
        kind: KindArg::Trail,
    }) {
        Commands::Sync { kind } => {
            let pipeline = build_pipeline(&config).await?;
            for summary in run_kinds(&pipeline, &kind.kinds()).await? {
                println!(
                    "sync complete: run_id={} kind={} listed={} inserted={} updated={} \
                     skipped={} failed={} retired={}",
                    summary.run_id,
                    summary.kind,
                    summary.listed,
                    summary.inserted,
                    summary.updated,
                    summary.skipped,
                    summary.failed,
                    summary.retired
                );
                if let Some(stat) = summary.statistic {
                    println!(
                        "daily statistic: date={} region={} total={}",
                        stat.date, stat.region, stat.total_entities
                    );
                }
            }
        }
        Commands::Survey { kind } => {
            let pipeline = build_survey_pipeline(&config)?;
            for entity in kind.kinds() {
                let report = pipeline.survey(&entity).await?;
                println!(
                    "survey: kind={} listed={} count={} kilometres={} duration={} failed={}",
                    report.kind,
                    report.listed,
                    report.aggregate.count,
                    whole_kilometres(report.aggregate.sum_distance_meters),
                    format_duration_minutes(report.aggregate.sum_duration_minutes),
                    report.failed
                );
            }
        }
        Commands::ResetNew { kind } => {
            let pipeline = build_pipeline(&config).await?;
            for entity in kind.kinds() {
                let cleared = pipeline.reset_new(&entity).await?;
                println!("reset-new: kind={} cleared={cleared}", entity.id);
            }
        }
    }

    Ok(())
}
