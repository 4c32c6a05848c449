use std::fs::{self, OpenOptions};
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::info;

use crate::config::IndexerConfig;
use crate::dataset::{CreateOptions, DatasetEngine, WorkingDataset};
use crate::domain::DataMode;
use crate::error::IndexerError;
use crate::fs_util;
use crate::gitlab::RemoteDirectory;
use crate::provision::HierarchyProvisioner;
use crate::resolve::{SOURCEDATA_SEGMENTS, SessionLayout};
use crate::workdir::ScopedWorkdir;

pub const STUDY_CONFIG_FILE: &str = ".dicom-study.json";
pub const STUDY_INIT_MESSAGE: &str = "initialize study dataset";
pub const BIDS_INIT_MESSAGE: &str = "initialize BIDS dataset";
const ORIGIN: &str = "origin";

const ANNEX_TEXT_RULES: &[(&str, &str)] = &[
    ("*", "((mimeencoding=binary)and(largerthan=0))"),
    (".gitignore", "nothing"),
    (".gitmodules", "nothing"),
    (".gitlab-ci.yml", "nothing"),
    (".all-contributorsrc", "nothing"),
    (".bidsignore", "nothing"),
    ("*.json", "nothing"),
    ("*.txt", "nothing"),
    ("*.tsv", "nothing"),
    ("*.nii.gz", "anything"),
    ("*.tgz", "anything"),
    ("*_scans.tsv", "anything"),
    ("sub-*/**/*_events.tsv", "anything"),
    ("*.bk2", "anything"),
    ("*.html", "anything"),
    ("*.svg", "anything"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BootstrapOutcome {
    AlreadyInitialized { commits: usize },
    Bootstrapped {
        bids_project: String,
        shared_groups: Vec<String>,
        protected_branches: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct StudyConfigFile {
    pub study_path: String,
    pub dicom_study_path: String,
    pub bids_path: String,
    pub created_at: String,
    pub generator: String,
}

pub struct StudyBootstrapper<'a, D: RemoteDirectory, E: DatasetEngine> {
    directory: &'a D,
    engine: &'a E,
    config: &'a IndexerConfig,
}

impl<'a, D: RemoteDirectory, E: DatasetEngine> StudyBootstrapper<'a, D, E> {
    pub fn new(directory: &'a D, engine: &'a E, config: &'a IndexerConfig) -> Self {
        Self {
            directory,
            engine,
            config,
        }
    }

    pub fn bootstrap(
        &self,
        study: &WorkingDataset,
        layout: &SessionLayout,
        study_url: &str,
    ) -> Result<BootstrapOutcome, IndexerError> {
        let commits = self.engine.commit_count(study)?;
        if commits > 0 {
            info!(study = %layout.study_project, commits, "study already initialized");
            return Ok(BootstrapOutcome::AlreadyInitialized { commits });
        }

        self.engine.create(study.path(), self.create_options())?;
        seed_study_template(study.path(), layout, self.config.study_template_dir.as_deref())?;
        self.engine.save(study, &[], STUDY_INIT_MESSAGE)?;
        self.engine.push(study, ORIGIN, DataMode::Nothing)?;
        info!(study = %layout.study_project, "study dataset initialized");

        let provisioner = HierarchyProvisioner::new(self.directory);
        let mut shared_groups = Vec::new();
        for path in &layout.shared_groups {
            let group = provisioner.ensure_group_path(path)?;
            shared_groups.push(group.full_path);
        }

        let bids = provisioner.ensure_project(&layout.bids_project)?;
        let bids_url = bids.clone_url(self.config.use_ssh_urls).to_string();

        let workdir = ScopedWorkdir::acquire("dicom-indexer-bids", self.config.keep_workdir)?;
        let dataset = self.engine.install(&bids_url, &workdir.join("bids"))?;
        if self.engine.commit_count(&dataset)? == 0 {
            self.engine.create(dataset.path(), self.create_options())?;
            seed_bids_template(dataset.path(), layout, self.config.bids_template_dir.as_deref())?;
            let sourcedata = Utf8PathBuf::from(SOURCEDATA_SEGMENTS.join("/"));
            self.engine.install_subdataset(&dataset, study_url, &sourcedata)?;
            self.engine.save(&dataset, &[], BIDS_INIT_MESSAGE)?;
            self.engine.push(&dataset, ORIGIN, DataMode::Nothing)?;

            self.engine
                .checkout_branch(&dataset, &self.config.integration_branch, true)?;
            self.engine.push(&dataset, ORIGIN, DataMode::Nothing)?;
        }

        let protected_branches = vec![
            self.config.integration_branch.clone(),
            self.config.conversion_branch_pattern.clone(),
        ];
        for pattern in &protected_branches {
            self.directory.protect_branch(bids.id, pattern)?;
        }
        info!(bids = %bids.path_with_namespace, "BIDS dataset initialized");

        Ok(BootstrapOutcome::Bootstrapped {
            bids_project: bids.path_with_namespace,
            shared_groups,
            protected_branches,
        })
    }

    fn create_options(&self) -> CreateOptions {
        CreateOptions {
            fake_dates: self.config.fake_dates,
            force: true,
        }
    }
}

pub fn seed_study_template(
    root: &Utf8Path,
    layout: &SessionLayout,
    template: Option<&Utf8Path>,
) -> Result<(), IndexerError> {
    match template {
        Some(dir) => fs_util::copy_dir_recursive(dir.as_std_path(), root.as_std_path())?,
        None => write_file(
            &root.join("README.md"),
            &format!(
                "# {}\n\nRaw DICOM sessions of this study, one subdataset per session.\n",
                layout.study_group
            ),
        )?,
    }
    append_annex_rules(root)?;

    let config = StudyConfigFile {
        study_path: layout.study_group.to_string(),
        dicom_study_path: layout.study_project.to_string(),
        bids_path: layout.bids_project.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
        generator: format!("dicom-indexer {}", env!("CARGO_PKG_VERSION")),
    };
    let json = serde_json::to_string_pretty(&config)
        .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
    write_file(&root.join(STUDY_CONFIG_FILE), &format!("{json}\n"))
}

pub fn seed_bids_template(
    root: &Utf8Path,
    layout: &SessionLayout,
    template: Option<&Utf8Path>,
) -> Result<(), IndexerError> {
    if let Some(dir) = template {
        fs_util::copy_dir_recursive(dir.as_std_path(), root.as_std_path())?;
        return append_annex_rules(root);
    }

    let description = serde_json::json!({
        "Name": layout.study_group.to_string(),
        "BIDSVersion": "1.8.0",
        "DatasetType": "raw",
    });
    let description = serde_json::to_string_pretty(&description)
        .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
    write_file(&root.join("dataset_description.json"), &format!("{description}\n"))?;
    write_file(
        &root.join("README"),
        &format!("BIDS conversion of {}.\n", layout.study_group),
    )?;
    write_file(&root.join("CHANGES"), "")?;
    write_file(&root.join("participants.tsv"), "participant_id\n")?;
    write_file(&root.join(".bidsignore"), "sourcedata/\n")?;
    append_annex_rules(root)
}

fn append_annex_rules(root: &Utf8Path) -> Result<(), IndexerError> {
    let path = root.join(".gitattributes");
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_std_path())
        .map_err(|err| IndexerError::Filesystem(format!("open {path}: {err}")))?;
    let mut rules = String::new();
    for (pattern, largefiles) in ANNEX_TEXT_RULES {
        rules.push_str(&format!("{pattern} annex.largefiles={largefiles}\n"));
    }
    file.write_all(rules.as_bytes())
        .map_err(|err| IndexerError::Filesystem(format!("write {path}: {err}")))
}

fn write_file(path: &Utf8Path, content: &str) -> Result<(), IndexerError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
    }
    fs::write(path.as_std_path(), content)
        .map_err(|err| IndexerError::Filesystem(format!("write {path}: {err}")))
}
