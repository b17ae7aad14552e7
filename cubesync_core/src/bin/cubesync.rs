//! `cubesync` command line: series updates, pinctrl and LL header
//! generation.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use cubesync_core::pinctrl::{self, PinctrlConfig};
use cubesync_core::repository::{UpstreamRepository, WorkingRepository};
use cubesync_core::sync::{SeriesUpdater, SyncConfig, SyncOutcome};
use cubesync_core::{llheaders, Serie};
use cubesync_provider_api::RetryPolicy;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(clap::Parser, Debug)]
#[command(name = "cubesync", about = "Keep Zephyr STM32 HAL modules in sync with STM32Cube")]
struct Opts {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Move series modules to a newer STM32Cube version, keeping local patches
    Update(UpdateOpts),
    /// Generate pinctrl devicetree includes from the STM32 pin database
    Pinctrl(PinctrlOpts),
    /// Generate the series independent LL headers
    Llheaders(LlheadersOpts),
}

#[derive(clap::Args, Debug)]
struct UpdateOpts {
    /// Series to update, e.g. stm32f3
    #[arg(required_unless_present = "all")]
    series: Vec<Serie>,

    /// Update every stm32*xx module found under `<hal root>/stm32cube`
    #[arg(long, conflicts_with = "series")]
    all: bool,

    /// Root of the hal_stm32 repository
    #[arg(long, env = "ZEPHYR_HAL_STM32")]
    hal_root: Utf8PathBuf,

    /// Where STM32Cube clones and temporary trees are kept
    #[arg(long, env = "CUBESYNC_CACHE_DIR")]
    cache_dir: Option<Utf8PathBuf>,

    /// STM32Cube tag to move to, the latest tag by default
    #[arg(long)]
    target_version: Option<String>,

    /// Commit the updated module to the hal_stm32 repository
    #[arg(long)]
    commit: bool,

    /// Keep the STM32Cube clone after the update
    #[arg(long)]
    no_clean: bool,

    /// Extra glob excluded from the local patch, may be repeated
    #[arg(long)]
    exclude: Vec<String>,

    /// Attempts for clone and fetch
    #[arg(long, default_value_t = 5)]
    retries: u32,

    /// Seconds between clone and fetch attempts
    #[arg(long, default_value_t = 2)]
    retry_delay: u64,
}

#[derive(clap::Args, Debug)]
struct PinctrlOpts {
    /// STM32 Open Pin Data or STM32CubeMX folder
    #[arg(short = 'p', long)]
    db_path: Utf8PathBuf,

    /// Output folder, cleared before generation
    #[arg(short = 'o', long)]
    output: Utf8PathBuf,

    /// Group rules for AF-numbered families
    #[arg(long, requires = "config_f1")]
    config: Option<Utf8PathBuf>,

    /// Group rules for the STM32F1 family
    #[arg(long, requires = "config")]
    config_f1: Option<Utf8PathBuf>,
}

#[derive(clap::Args, Debug)]
struct LlheadersOpts {
    /// Folder holding the stm32*xx modules, `<hal_stm32>/stm32cube` by default
    #[arg(short = 'p', long)]
    hal_path: Option<Utf8PathBuf>,

    /// Output folder, `<hal path>/common_ll` by default
    #[arg(short = 'o', long)]
    output: Option<Utf8PathBuf>,

    /// Root of the hal_stm32 repository
    #[arg(long, env = "ZEPHYR_HAL_STM32")]
    hal_root: Option<Utf8PathBuf>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
}

fn default_cache_dir() -> anyhow::Result<Utf8PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set, pass --cache-dir")?;
    Ok(Utf8PathBuf::from(home).join("STM32Cube_repo"))
}

fn update(opts: &UpdateOpts) -> anyhow::Result<bool> {
    let cache_dir = match &opts.cache_dir {
        Some(dir) => dir.clone(),
        None => default_cache_dir()?,
    };
    let series = if opts.all {
        let stm32cube = opts.hal_root.join("stm32cube");
        Serie::discover(stm32cube.as_std_path())
            .with_context(|| format!("failed to list modules in {stm32cube}"))?
    } else {
        opts.series.clone()
    };
    if series.is_empty() {
        bail!("no series module found under {}", opts.hal_root);
    }

    let mut clean = true;
    let mut failed = Vec::new();
    for serie in &series {
        match update_serie(opts, serie, &cache_dir) {
            Ok(serie_clean) => clean &= serie_clean,
            Err(err) => {
                error!("{err:#}");
                failed.push(serie.to_string());
            }
        }
    }
    if !failed.is_empty() {
        bail!(
            "{} of {} series failed: {}",
            failed.len(),
            series.len(),
            failed.join(", ")
        );
    }
    Ok(clean)
}

fn update_serie(opts: &UpdateOpts, serie: &Serie, cache_dir: &Utf8Path) -> anyhow::Result<bool> {
    let retry = RetryPolicy::new(opts.retries, Duration::from_secs(opts.retry_delay));
    let mut config = SyncConfig::new(
        serie.clone(),
        opts.hal_root.as_std_path(),
        cache_dir.as_std_path(),
    );
    config.version.clone_from(&opts.target_version);
    config.commit = opts.commit;
    config.no_clean = opts.no_clean;
    config.exclude.clone_from(&opts.exclude);
    config.retry = retry;

    let upstream = UpstreamRepository::new(serie.repo_url(), config.upstream_path(), retry);
    let mut updater = SeriesUpdater::new(config, upstream);
    if opts.commit {
        let working = WorkingRepository::open(opts.hal_root.as_std_path())
            .with_context(|| format!("failed to open {}", opts.hal_root))?;
        updater = updater.with_committer(Box::new(working));
    }

    let outcome = updater
        .run()
        .with_context(|| format!("failed to update {serie}"))?;
    match outcome {
        SyncOutcome::Abandoned { version } => {
            info!("{serie} already at {version}, nothing to do");
            Ok(true)
        }
        SyncOutcome::Updated(report) => {
            info!(
                "{serie} updated from {} to {}",
                report.from_version, report.to_version
            );
            if let Some(commit) = &report.commit_id {
                info!("committed as {commit}");
            }
            if report.conflicts.is_empty() {
                return Ok(true);
            }
            warn!(
                "{} file(s) need manual resolution: resolve the .rej files under {} and check the Patch List in README",
                report.conflicts.len(),
                report.module_path.display()
            );
            Ok(false)
        }
    }
}

fn generate_pinctrl(opts: &PinctrlOpts) -> anyhow::Result<()> {
    let config = match (&opts.config, &opts.config_f1) {
        (Some(standard), Some(legacy)) => {
            PinctrlConfig::from_files(standard.as_std_path(), legacy.as_std_path())
                .context("failed to load group rules")?
        }
        (None, None) => PinctrlConfig::embedded().context("embedded group rules are invalid")?,
        _ => bail!("--config and --config-f1 must be given together"),
    };
    let summary = pinctrl::generate(opts.db_path.as_std_path(), opts.output.as_std_path(), &config)
        .with_context(|| format!("failed to generate pinctrl files from {}", opts.db_path))?;
    if !summary.skipped_chips.is_empty() {
        warn!("{} chip(s) skipped", summary.skipped_chips.len());
    }
    Ok(())
}

fn generate_llheaders(opts: &LlheadersOpts) -> anyhow::Result<()> {
    let hal_path = match (&opts.hal_path, &opts.hal_root) {
        (Some(path), _) => path.clone(),
        (None, Some(root)) => root.join("stm32cube"),
        (None, None) => bail!("pass --hal-path or set ZEPHYR_HAL_STM32"),
    };
    let output = opts
        .output
        .clone()
        .unwrap_or_else(|| hal_path.join("common_ll"));
    ensure_dir(&hal_path)?;
    llheaders::generate(hal_path.as_std_path(), output.as_std_path())
        .with_context(|| format!("failed to generate LL headers into {output}"))?;
    Ok(())
}

fn ensure_dir(path: &Utf8Path) -> anyhow::Result<()> {
    if !path.is_dir() {
        bail!("{path} is not a directory");
    }
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    let opts = Opts::parse();

    let result = match &opts.command {
        Command::Update(update_opts) => update(update_opts).map(|clean| {
            if !clean {
                warn!("README file: please check that the Patch List is still valid");
            }
        }),
        Command::Pinctrl(pinctrl_opts) => generate_pinctrl(pinctrl_opts),
        Command::Llheaders(llheaders_opts) => generate_llheaders(llheaders_opts),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Opts, clap::Error> {
        Opts::try_parse_from(std::iter::once("cubesync").chain(args.iter().copied()))
    }

    #[test]
    fn update_takes_series_or_all() {
        let Ok(Opts { command: Command::Update(opts) }) =
            parse(&["update", "--hal-root", "/hal", "--all"])
        else {
            panic!("--all should parse");
        };
        assert!(opts.all);
        assert!(opts.series.is_empty());

        let Ok(Opts { command: Command::Update(opts) }) =
            parse(&["update", "--hal-root", "/hal", "stm32f3", "STM32L4"])
        else {
            panic!("explicit series should parse");
        };
        let names: Vec<_> = opts.series.iter().map(Serie::name).collect();
        assert_eq!(names, vec!["stm32f3", "stm32l4"]);

        assert!(parse(&["update", "--hal-root", "/hal"]).is_err());
        assert!(parse(&["update", "--hal-root", "/hal", "--all", "stm32f3"]).is_err());
    }
}
