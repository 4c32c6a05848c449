use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use dicom_indexer::app::App;
use dicom_indexer::config::IndexerConfig;
use dicom_indexer::dataset::DataladEngine;
use dicom_indexer::domain::SessionKey;
use dicom_indexer::error::IndexerError;
use dicom_indexer::gitlab::GitlabHttpClient;
use dicom_indexer::metadata::DcmdumpExtractor;
use dicom_indexer::output::{JsonOutput, LogProgress};

#[derive(Parser)]
#[command(name = "dicom-indexer")]
#[command(about = "Index incoming DICOM sessions into datalad datasets", long_about = None)]
#[command(version, author)]
struct Cli {
    /// Local directory, archive file, or http(s)/s3 URL of the session.
    input: String,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    gitlab_url: Option<String>,

    #[arg(long, env = "GITLAB_TOKEN", hide_env_values = true)]
    gitlab_token: Option<String>,

    #[arg(long)]
    bot_username: Option<String>,

    /// Group path template, e.g. "{ReferringPhysicianName}/{StudyDescription}".
    #[arg(long)]
    group_template: Option<String>,

    #[arg(long)]
    session_tag: Option<String>,

    #[arg(long, overrides_with = "no_sort_series")]
    sort_series: bool,

    #[arg(long, overrides_with = "sort_series")]
    no_sort_series: bool,

    #[arg(long)]
    fake_dates: bool,

    /// Extra options handed to 7z, whitespace separated.
    #[arg(long, allow_hyphen_values = true)]
    p7z_opts: Option<String>,

    #[arg(long)]
    storage_remote: Option<String>,

    #[arg(long)]
    force_export: bool,

    /// Keep working directories for inspection.
    #[arg(long)]
    keep_workdir: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<IndexerError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &IndexerError) -> u8 {
    match error {
        IndexerError::MissingMetadataField(_) | IndexerError::NoParsableMetadata(_) => 2,
        IndexerError::AmbiguousName { .. } | IndexerError::PathCollision(_) => 4,
        IndexerError::Configuration(_)
        | IndexerError::ConfigRead(_)
        | IndexerError::ConfigParse(_)
        | IndexerError::UnknownIdentity(_)
        | IndexerError::UnsupportedScheme(_)
        | IndexerError::MissingTool(_) => 5,
        error if error.is_retryable() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = IndexerConfig::load(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli)?;
    config.validate()?;

    let directory = GitlabHttpClient::new(&config.gitlab_base_url()?, config.token()?)?;
    let extractor = DcmdumpExtractor::new()?;
    let app = App::new(config, directory, DataladEngine::new(), extractor);

    match app.process(&cli.input, &LogProgress) {
        Ok(report) => {
            JsonOutput::print_report(&report).into_diagnostic()?;
            Ok(())
        }
        Err(failure) => {
            JsonOutput::print_report(&failure.report).into_diagnostic()?;
            Err(failure.error.into())
        }
    }
}

fn apply_overrides(config: &mut IndexerConfig, cli: &Cli) -> Result<(), IndexerError> {
    if let Some(url) = &cli.gitlab_url {
        config.gitlab_url = Some(url.clone());
    }
    if let Some(token) = &cli.gitlab_token {
        config.gitlab_token = Some(token.clone());
    }
    if let Some(bot) = &cli.bot_username {
        config.bot_username = Some(bot.clone());
    }
    if let Some(template) = &cli.group_template {
        config.group_template = template.clone();
    }
    if let Some(tag) = &cli.session_tag {
        config.session_tag = tag.parse::<SessionKey>()?;
    }
    if cli.sort_series {
        config.sort_series = true;
    }
    if cli.no_sort_series {
        config.sort_series = false;
    }
    if cli.fake_dates {
        config.fake_dates = true;
    }
    if let Some(options) = &cli.p7z_opts {
        config.compression.options = options.split_whitespace().map(str::to_string).collect();
    }
    if let Some(remote) = &cli.storage_remote {
        config.storage_remote = Some(remote.clone());
    }
    if cli.force_export {
        config.force_export = true;
    }
    if cli.keep_workdir {
        config.keep_workdir = true;
    }
    Ok(())
}
