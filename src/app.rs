use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::bootstrap::{BootstrapOutcome, StudyBootstrapper};
use crate::config::IndexerConfig;
use crate::dataset::{CreateOptions, DatasetEngine, WorkingDataset};
use crate::domain::{DataMode, InputSource, StorageRemote};
use crate::error::IndexerError;
use crate::export::{ExportPipeline, ExportRecord, ExportScope};
use crate::fs_util;
use crate::gitlab::RemoteDirectory;
use crate::ingest::{ArchiveArtifact, ArchiveIngester, compressor_for};
use crate::linker::{DatasetLinker, LinkOutcome};
use crate::metadata::MetadataExtractor;
use crate::privilege::{BotPrivilegeManager, GrantOutcome};
use crate::provision::HierarchyProvisioner;
use crate::resolve::SessionLayout;
use crate::workdir::ScopedWorkdir;

const ORIGIN: &str = "origin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Ingest,
    Metadata,
    Resolve,
    SessionProject,
    SessionPush,
    Export,
    StudyProject,
    Bootstrap,
    Link,
    StudyStore,
    Privilege,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Ingest => "ingest",
            Stage::Metadata => "metadata",
            Stage::Resolve => "resolve",
            Stage::SessionProject => "session_project",
            Stage::SessionPush => "session_push",
            Stage::Export => "export",
            Stage::StudyProject => "study_project",
            Stage::Bootstrap => "bootstrap",
            Stage::Link => "link",
            Stage::StudyStore => "study_store",
            Stage::Privilege => "privilege",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    CompleteUnverified {
        remote: String,
    },
    Failed {
        stage: Stage,
        kind: String,
        retryable: bool,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub input: String,
    pub session_id: Option<String>,
    pub study_path: Option<String>,
    pub session_project: Option<String>,
    pub study_project: Option<String>,
    pub artifact: Option<ArchiveArtifact>,
    pub export: Option<ExportRecord>,
    pub bootstrap: Option<BootstrapOutcome>,
    pub link: Option<LinkOutcome>,
    pub bot_access: Option<GrantOutcome>,
    pub completed: Vec<Stage>,
    #[serde(flatten)]
    pub status: RunStatus,
}

impl RunReport {
    fn new(input: &str) -> Self {
        Self {
            input: input.to_string(),
            session_id: None,
            study_path: None,
            session_project: None,
            study_project: None,
            artifact: None,
            export: None,
            bootstrap: None,
            link: None,
            bot_access: None,
            completed: Vec::new(),
            status: RunStatus::Complete,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.status, RunStatus::Complete)
    }
}

#[derive(Debug)]
pub struct RunFailure {
    pub report: RunReport,
    pub error: IndexerError,
}

struct StageTracker<'s> {
    sink: &'s dyn ProgressSink,
    current: Stage,
    report: RunReport,
}

impl<'s> StageTracker<'s> {
    fn run<T>(
        &mut self,
        stage: Stage,
        detail: &str,
        step: impl FnOnce() -> Result<T, IndexerError>,
    ) -> Result<T, IndexerError> {
        self.current = stage;
        self.sink.event(ProgressEvent {
            stage,
            message: format!("phase={stage}; {detail}"),
            elapsed: None,
        });
        let started = Instant::now();
        let value = step()?;
        self.report.completed.push(stage);
        self.sink.event(ProgressEvent {
            stage,
            message: format!("phase={stage}; done"),
            elapsed: Some(started.elapsed()),
        });
        Ok(value)
    }

    fn fail(mut self, error: IndexerError) -> RunFailure {
        self.report.status = RunStatus::Failed {
            stage: self.current,
            kind: error.kind().to_string(),
            retryable: error.is_retryable(),
            message: error.to_string(),
        };
        RunFailure {
            report: self.report,
            error,
        }
    }
}

pub struct App<D: RemoteDirectory, E: DatasetEngine, M: MetadataExtractor> {
    config: IndexerConfig,
    directory: D,
    engine: E,
    extractor: M,
}

impl<D: RemoteDirectory, E: DatasetEngine, M: MetadataExtractor> App<D, E, M> {
    pub fn new(config: IndexerConfig, directory: D, engine: E, extractor: M) -> Self {
        Self {
            config,
            directory,
            engine,
            extractor,
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    // local steps run before the first remote mutation
    pub fn process(&self, input: &str, sink: &dyn ProgressSink) -> Result<RunReport, RunFailure> {
        let mut tracker = StageTracker {
            sink,
            current: Stage::Validate,
            report: RunReport::new(input),
        };
        match self.run(input, &mut tracker) {
            Ok(()) => {
                let mut report = tracker.report;
                if let Some(export) = report.export.as_ref().filter(|export| !export.verified) {
                    warn!(remote = %export.remote, "export content not verified");
                    report.status = RunStatus::CompleteUnverified {
                        remote: export.remote.clone(),
                    };
                }
                Ok(report)
            }
            Err(error) => Err(tracker.fail(error)),
        }
    }

    fn run(&self, input: &str, tracker: &mut StageTracker<'_>) -> Result<(), IndexerError> {
        let config = &self.config;
        let (source, storage, bot) = tracker.run(Stage::Validate, "checking configuration", || {
            config.validate()?;
            let storage = config.storage()?;
            let bot = config.bot_identity()?.to_string();
            Ok((InputSource::from_str(input)?, storage, bot))
        })?;

        let (_workdir, dataset, artifact) = tracker.run(Stage::Ingest, &source.describe(), || {
            let workdir = ScopedWorkdir::acquire("dicom-indexer-session", config.keep_workdir)?;
            let (dataset, artifact) = self.ingest(&workdir, &source)?;
            Ok((workdir, dataset, artifact))
        })?;
        tracker.report.artifact = Some(artifact);

        let metadata = tracker.run(Stage::Metadata, "reading session attributes", || {
            let files =
                fs_util::walk_files(dataset.path().as_std_path(), &fs_util::DATASET_META_DIRS)?;
            self.extractor.extract(&files)
        })?;

        let layout = tracker.run(Stage::Resolve, "deriving hierarchy paths", || {
            SessionLayout::derive(config, &metadata)
        })?;
        tracker.report.session_id = Some(layout.session_id.clone());
        tracker.report.study_path = Some(layout.study_group.to_string());

        let provisioner = HierarchyProvisioner::new(&self.directory);
        let linker = DatasetLinker::new(&self.engine);

        let session_project = tracker.run(Stage::SessionProject, &layout.session_project.to_string(), || {
            provisioner.ensure_project(&layout.session_project)
        })?;
        let session_url = session_project.clone_url(config.use_ssh_urls).to_string();
        tracker.report.session_project = Some(session_project.path_with_namespace.clone());

        tracker.run(Stage::SessionPush, &config.gitlab_remote_name, || {
            linker.configure_sibling(&dataset, &config.gitlab_remote_name, &session_url)?;
            self.engine
                .push(&dataset, &config.gitlab_remote_name, DataMode::Nothing)
        })?;

        if let Some(storage) = &storage {
            let push_content = source.is_local() || config.force_export;
            let record = tracker.run(Stage::Export, &storage.name(), || {
                let scope = ExportScope {
                    study_path: layout.study_group.to_string(),
                    session_id: layout.session_id.clone(),
                };
                ExportPipeline::new(&self.engine, &config.s3).export(
                    &dataset,
                    storage,
                    &scope,
                    push_content,
                )
            })?;
            tracker.report.export = Some(record);
        }

        let (study_project, _study_workdir, study) =
            tracker.run(Stage::StudyProject, &layout.study_project.to_string(), || {
                let project = provisioner.ensure_project(&layout.study_project)?;
                let workdir = ScopedWorkdir::acquire("dicom-indexer-study", config.keep_workdir)?;
                let study = self
                    .engine
                    .install(project.clone_url(config.use_ssh_urls), &workdir.join("study"))?;
                Ok((project, workdir, study))
            })?;
        let study_url = study_project.clone_url(config.use_ssh_urls).to_string();
        tracker.report.study_project = Some(study_project.path_with_namespace.clone());

        let outcome = tracker.run(Stage::Bootstrap, &layout.study_project.to_string(), || {
            StudyBootstrapper::new(&self.directory, &self.engine, config).bootstrap(
                &study,
                &layout,
                &study_url,
            )
        })?;
        tracker.report.bootstrap = Some(outcome);

        let link = tracker.run(Stage::Link, layout.session_subpath.as_str(), || {
            let outcome = linker.ensure_linked(&study, &session_url, &layout.session_subpath)?;
            if outcome == LinkOutcome::Linked {
                let message = format!("add session {}", layout.session_id);
                self.engine
                    .save(&study, &[layout.session_subpath.clone()], &message)?;
                self.engine.push(&study, ORIGIN, DataMode::Nothing)?;
            }
            Ok(outcome)
        })?;
        tracker.report.link = Some(link);

        if let Some(url) = &config.study_store_url {
            tracker.run(Stage::StudyStore, url, || {
                let StorageRemote::Store { url, name } = url.parse::<StorageRemote>()? else {
                    return Err(IndexerError::Configuration(
                        "study_store_url must be a ria+ store URL".to_string(),
                    ));
                };
                let alias = layout.study_group.segments().join("_");
                self.engine.create_store_sibling(&study, &url, &name, &alias)?;
                self.engine.push(&study, &name, DataMode::Nothing)
            })?;
        }

        let access = tracker.run(Stage::Privilege, &bot, || {
            let group = provisioner.ensure_group_path(&layout.study_group)?;
            BotPrivilegeManager::new(&self.directory).ensure_maintainer(&group, &bot)
        })?;
        tracker.report.bot_access = Some(access);

        info!(
            session = %layout.session_project,
            study = %layout.study_project,
            "session indexed"
        );
        Ok(())
    }

    fn ingest(
        &self,
        workdir: &ScopedWorkdir,
        source: &InputSource,
    ) -> Result<(WorkingDataset, ArchiveArtifact), IndexerError> {
        let dataset = self.engine.create(
            &workdir.join("session"),
            CreateOptions {
                fake_dates: self.config.fake_dates,
                force: false,
            },
        )?;
        let mut ingester =
            ArchiveIngester::new(&self.engine, compressor_for(&self.config.compression));
        if self.config.sort_series {
            ingester = ingester.with_series_sorting(&self.extractor);
        }
        let artifact = ingester.ingest(&dataset, source)?;
        ingester.index_archive(&dataset, &artifact)?;
        Ok((dataset, artifact))
    }
}
