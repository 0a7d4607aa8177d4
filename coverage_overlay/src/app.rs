use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::ConfigError;
use crate::extract;
use crate::manifest;
use crate::overlay::{apply_overlay, FsPageStore, OverlayOptions, PatchOutcome};
use crate::paths::absolutize;
use crate::resolve::{PageResolver, DEFAULT_PAGE_SUFFIX};

const LOG_PREFIX: &str = "[coverage-overlay]";

// LCOV_EXCL_START - Struct field definitions
/// Mark zero-hit lines as not covered in generated HTML coverage pages.
///
/// Legacy form:
///   coverage_overlay coverage.txt report/
///
/// Manifest form:
///   coverage_overlay --report-dir html --fixed-text coverage.utf8.txt \
///       --repo-root . --manifest lcov.info
#[derive(Parser, Debug, Clone)]
#[command(name = "coverage_overlay", author, version, verbatim_doc_comment)]
pub struct Args {
    /// Coverage dump text (legacy form)
    #[arg(value_name = "COVERAGE_DUMP")]
    pub coverage_dump: Option<PathBuf>,

    /// Directory holding flattened report pages (legacy form)
    #[arg(value_name = "REPORT_DIRECTORY")]
    pub report_directory: Option<PathBuf>,

    /// genhtml output directory
    #[arg(long, value_name = "DIR", alias = "genhtml-dir")]
    pub report_dir: Option<PathBuf>,

    /// Coverage dump text, already converted to UTF-8
    #[arg(long, value_name = "FILE", alias = "fixed-txt")]
    pub fixed_text: Option<PathBuf>,

    /// Repository root, used when a source is outside the manifest base
    #[arg(long, value_name = "ROOT")]
    pub repo_root: Option<PathBuf>,

    /// lcov tracefile listing every tracked source
    #[arg(long, value_name = "FILE", alias = "lcov-info")]
    pub manifest: Option<PathBuf>,

    /// Suffix genhtml appends to source file names
    #[arg(long, value_name = "SUFFIX", default_value = DEFAULT_PAGE_SUFFIX)]
    pub page_suffix: String,

    /// Minimum seconds between progress lines
    #[arg(long, value_name = "SECS", default_value_t = 2)]
    pub progress_interval: u64,

    /// Summary output format
    #[arg(short, long, value_enum, default_value_t = SummaryFormat::Text)]
    pub format: SummaryFormat,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}
// LCOV_EXCL_STOP

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SummaryFormat {
    Text,
    Json,
}

/// How report pages are located, fixed once the arguments are validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveMode {
    Direct {
        report_dir: PathBuf,
    },
    Manifest {
        report_dir: PathBuf,
        repo_root: PathBuf,
        manifest: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub coverage_dump: PathBuf,
    pub mode: ResolveMode,
    pub page_suffix: String,
    pub progress_interval: Duration,
    pub format: SummaryFormat,
    pub verbose: bool,
}

impl AppConfig {
    /// Validate `args`, making every path absolute against `cwd`.
    pub fn from_args(args: Args, cwd: &Path) -> Result<Self, ConfigError> {
        let flagged = [
            ("--report-dir", &args.report_dir),
            ("--fixed-text", &args.fixed_text),
            ("--repo-root", &args.repo_root),
            ("--manifest", &args.manifest),
        ];
        let any_flagged = flagged.iter().any(|(_, value)| value.is_some());
        let any_positional = args.coverage_dump.is_some() || args.report_directory.is_some();
        if any_flagged && any_positional {
            return Err(ConfigError::MixedForms);
        }

        let abs = |path: &PathBuf| absolutize(path, cwd);
        let (coverage_dump, mode) = if any_flagged {
            let missing: Vec<&'static str> = flagged
                .iter()
                .filter(|(_, value)| value.is_none())
                .map(|(name, _)| *name)
                .collect();
            match (
                &args.report_dir,
                &args.fixed_text,
                &args.repo_root,
                &args.manifest,
            ) {
                (Some(report_dir), Some(fixed_text), Some(repo_root), Some(manifest)) => (
                    abs(fixed_text),
                    ResolveMode::Manifest {
                        report_dir: abs(report_dir),
                        repo_root: abs(repo_root),
                        manifest: abs(manifest),
                    },
                ),
                _ => return Err(ConfigError::MissingArguments(missing)),
            }
        } else {
            match (&args.coverage_dump, &args.report_directory) {
                (Some(dump), Some(report_dir)) => (
                    abs(dump),
                    ResolveMode::Direct {
                        report_dir: abs(report_dir),
                    },
                ),
                (Some(_), None) => {
                    return Err(ConfigError::MissingArguments(vec!["<REPORT_DIRECTORY>"]))
                }
                _ => {
                    return Err(ConfigError::MissingArguments(vec![
                        "<COVERAGE_DUMP>",
                        "<REPORT_DIRECTORY>",
                    ]))
                }
            }
        };

        Ok(Self {
            coverage_dump,
            mode,
            page_suffix: args.page_suffix,
            progress_interval: Duration::from_secs(args.progress_interval),
            format: args.format,
            verbose: args.verbose,
        })
    }

    pub fn report_dir(&self) -> &Path {
        match &self.mode {
            ResolveMode::Direct { report_dir } | ResolveMode::Manifest { report_dir, .. } => {
                report_dir
            }
        }
    }

    /// Build the resolver; reads the manifest in manifest mode.
    pub fn resolver(&self) -> PageResolver {
        match &self.mode {
            ResolveMode::Direct { report_dir } => {
                PageResolver::direct(report_dir, self.page_suffix.as_str())
            }
            ResolveMode::Manifest {
                report_dir,
                repo_root,
                manifest,
            } => {
                let base = manifest::load_base_dir(manifest, repo_root);
                PageResolver::context_aware(
                    report_dir,
                    base,
                    repo_root,
                    self.page_suffix.as_str(),
                )
            }
        }
    }
}

impl TryFrom<Args> for AppConfig {
    type Error = ConfigError;

    fn try_from(value: Args) -> Result<Self, Self::Error> {
        let cwd = std::env::current_dir().map_err(|err| ConfigError::CurrentDir(err.to_string()))?;
        Self::from_args(value, &cwd)
    }
}

/// Logs go to stderr when stdout carries the JSON summary.
pub fn init_tracing(verbose: bool, format: SummaryFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);
    let _ = match format {
        SummaryFormat::Text => builder.try_init(),
        SummaryFormat::Json => builder.with_writer(std::io::stderr).try_init(),
    };
}

pub fn run(config: &AppConfig) -> Result<PatchOutcome> {
    let misses = extract::read_dump(&config.coverage_dump).with_context(|| {
        format!(
            "failed to read coverage dump {}",
            config.coverage_dump.display()
        )
    })?;

    let resolver = config.resolver();
    info!(
        report_dir = %config.report_dir().display(),
        strategy = resolver.strategy_name(),
        sources = misses.len(),
        "Starting coverage overlay"
    );
    if let PageResolver::ContextAware(context) = &resolver {
        info!(base = %context.base_dir().display(), "Using manifest base directory");
    }

    let options = OverlayOptions {
        progress_interval: config.progress_interval,
    };
    Ok(apply_overlay(&misses, &resolver, &FsPageStore, &options))
}

pub fn print_summary(outcome: &PatchOutcome, format: SummaryFormat) -> Result<()> {
    match format {
        SummaryFormat::Json => {
            println!("{}", serde_json::to_string_pretty(outcome)?);
        }
        SummaryFormat::Text => {
            for line in summary_lines(outcome) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

fn summary_lines(outcome: &PatchOutcome) -> Vec<String> {
    let mut lines = vec![
        format!(
            "{LOG_PREFIX} files_with_zeros that exist in HTML = {} / {}",
            outcome.files_resolved, outcome.files_with_zeros
        ),
        format!(
            "{LOG_PREFIX} patch done: pages={}, lines_set_to_zero={}, lines_not_found={}",
            outcome.pages_patched, outcome.lines_marked, outcome.lines_not_found
        ),
    ];
    for warning in outcome.warnings() {
        lines.push(format!("{LOG_PREFIX} warning: {warning}"));
    }
    for failure in &outcome.failures {
        lines.push(format!(
            "{LOG_PREFIX}   skipped {}: {}",
            failure.page.display(),
            failure.reason
        ));
    }
    lines
}
