use std::path::PathBuf;
use std::process::{Command, Output};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{DataMode, Sibling};
use crate::error::IndexerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkingDataset {
    path: Utf8PathBuf,
}

impl WorkingDataset {
    pub fn at(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn join(&self, relative: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.path.join(relative)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    pub fake_dates: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FsckReport {
    pub checked: usize,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContentFilter {
    pub patterns: Vec<String>,
}

impl ContentFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn archives() -> Self {
        Self {
            patterns: vec!["*.7z".to_string(), "*.tar.gz".to_string(), "*.zip".to_string()],
        }
    }

    pub fn preferred_content(&self) -> String {
        if self.patterns.is_empty() {
            return "anything".to_string();
        }
        self.patterns
            .iter()
            .map(|pattern| format!("include={pattern}"))
            .collect::<Vec<_>>()
            .join(" or ")
    }

    fn matching_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (idx, pattern) in self.patterns.iter().enumerate() {
            if idx > 0 {
                args.push("--or".to_string());
            }
            args.push(format!("--include={pattern}"));
        }
        args
    }
}

pub trait DatasetEngine: Send + Sync {
    fn create(&self, path: &Utf8Path, options: CreateOptions)
    -> Result<WorkingDataset, IndexerError>;
    fn install(&self, source: &str, path: &Utf8Path) -> Result<WorkingDataset, IndexerError>;
    fn install_subdataset(
        &self,
        parent: &WorkingDataset,
        source: &str,
        relative: &Utf8Path,
    ) -> Result<WorkingDataset, IndexerError>;
    fn subdataset_source(
        &self,
        parent: &WorkingDataset,
        relative: &Utf8Path,
    ) -> Result<Option<String>, IndexerError>;
    fn save(
        &self,
        dataset: &WorkingDataset,
        paths: &[Utf8PathBuf],
        message: &str,
    ) -> Result<(), IndexerError>;
    fn commit_count(&self, dataset: &WorkingDataset) -> Result<usize, IndexerError>;
    fn configure_sibling(
        &self,
        dataset: &WorkingDataset,
        sibling: &Sibling,
    ) -> Result<(), IndexerError>;
    fn push(
        &self,
        dataset: &WorkingDataset,
        remote: &str,
        data: DataMode,
    ) -> Result<(), IndexerError>;
    fn create_store_sibling(
        &self,
        dataset: &WorkingDataset,
        url: &str,
        name: &str,
        alias: &str,
    ) -> Result<(), IndexerError>;
    fn init_special_remote(
        &self,
        dataset: &WorkingDataset,
        name: &str,
        params: &[(String, String)],
    ) -> Result<(), IndexerError>;
    fn set_wanted(
        &self,
        dataset: &WorkingDataset,
        remote: &str,
        expression: &str,
    ) -> Result<(), IndexerError>;
    fn add_url_source(
        &self,
        dataset: &WorkingDataset,
        relative: &Utf8Path,
        url: &str,
    ) -> Result<(), IndexerError>;
    fn add_archive_content(
        &self,
        dataset: &WorkingDataset,
        archive: &Utf8Path,
    ) -> Result<(), IndexerError>;
    fn checkout_branch(
        &self,
        dataset: &WorkingDataset,
        name: &str,
        create: bool,
    ) -> Result<(), IndexerError>;
    fn housekeeping(&self, dataset: &WorkingDataset) -> Result<(), IndexerError>;
    // forced, non-cached check of which keys `remote` really holds
    fn verify_remote(
        &self,
        dataset: &WorkingDataset,
        remote: &str,
        filter: &ContentFilter,
    ) -> Result<FsckReport, IndexerError>;
    fn present_content(
        &self,
        dataset: &WorkingDataset,
        filter: &ContentFilter,
    ) -> Result<usize, IndexerError>;
}

#[derive(Clone)]
pub struct DataladEngine {
    datalad: Option<PathBuf>,
    git: Option<PathBuf>,
}

impl DataladEngine {
    pub fn new() -> Self {
        Self {
            datalad: find_in_path("datalad"),
            git: find_in_path("git"),
        }
    }

    fn require(&self, tool: &'static str) -> Result<&PathBuf, IndexerError> {
        let found = match tool {
            "datalad" => self.datalad.as_ref(),
            _ => self.git.as_ref(),
        };
        found.ok_or_else(|| IndexerError::MissingTool(tool.to_string()))
    }

    fn output(&self, tool: &'static str, args: &[String]) -> Result<Output, IndexerError> {
        let program = self.require(tool)?;
        debug!(tool, ?args, "running");
        Command::new(program)
            .args(args)
            .output()
            .map_err(|err| IndexerError::ToolFailed {
                tool: tool.to_string(),
                message: err.to_string(),
            })
    }

    fn run(&self, tool: &'static str, args: &[String]) -> Result<String, IndexerError> {
        let output = self.output(tool, args)?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {tool} {}", args.join(" "))
        } else {
            stderr
        };
        Err(IndexerError::ToolFailed {
            tool: tool.to_string(),
            message,
        })
    }

    fn datalad(&self, dataset: &Utf8Path, args: &[&str]) -> Result<String, IndexerError> {
        self.run("datalad", &in_dir(dataset, args))
    }

    fn git(&self, dataset: &WorkingDataset, args: &[&str]) -> Result<String, IndexerError> {
        self.run("git", &in_dir(dataset.path(), args))
    }
}

impl Default for DataladEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetEngine for DataladEngine {
    fn create(
        &self,
        path: &Utf8Path,
        options: CreateOptions,
    ) -> Result<WorkingDataset, IndexerError> {
        let mut args = vec!["create".to_string()];
        if options.fake_dates {
            args.push("--fake-dates".to_string());
        }
        if options.force {
            args.push("--force".to_string());
        }
        args.push(path.to_string());
        self.run("datalad", &args)?;
        Ok(WorkingDataset::at(path))
    }

    fn install(&self, source: &str, path: &Utf8Path) -> Result<WorkingDataset, IndexerError> {
        let args = vec![
            "install".to_string(),
            "--source".to_string(),
            source.to_string(),
            path.to_string(),
        ];
        self.run("datalad", &args).map_err(transport_failure)?;
        Ok(WorkingDataset::at(path))
    }

    fn install_subdataset(
        &self,
        parent: &WorkingDataset,
        source: &str,
        relative: &Utf8Path,
    ) -> Result<WorkingDataset, IndexerError> {
        self.datalad(
            parent.path(),
            &["install", "--dataset", ".", "--source", source, relative.as_str()],
        )
        .map_err(transport_failure)?;
        Ok(WorkingDataset::at(parent.join(relative)))
    }

    fn subdataset_source(
        &self,
        parent: &WorkingDataset,
        relative: &Utf8Path,
    ) -> Result<Option<String>, IndexerError> {
        if !parent.join(".gitmodules").as_std_path().exists() {
            return Ok(None);
        }
        let key = format!("submodule.{relative}.url");
        // exit status 1 means the key is unset
        match self.git(parent, &["config", "--file", ".gitmodules", "--get", &key]) {
            Ok(url) => Ok(Some(url.trim().to_string()).filter(|url| !url.is_empty())),
            Err(IndexerError::ToolFailed { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn save(
        &self,
        dataset: &WorkingDataset,
        paths: &[Utf8PathBuf],
        message: &str,
    ) -> Result<(), IndexerError> {
        let mut args = vec!["save", "--message", message];
        args.extend(paths.iter().map(|path| path.as_str()));
        self.datalad(dataset.path(), &args).map(|_| ())
    }

    fn commit_count(&self, dataset: &WorkingDataset) -> Result<usize, IndexerError> {
        let check = self.output(
            "git",
            &in_dir(dataset.path(), &["rev-parse", "--verify", "--quiet", "HEAD"]),
        )?;
        let stderr = String::from_utf8_lossy(&check.stderr);
        if !head_exists(check.status.code(), &stderr)? {
            return Ok(0);
        }
        let out = self.git(dataset, &["rev-list", "--count", "HEAD"])?;
        out.trim()
            .parse()
            .map_err(|_| IndexerError::Dataset(format!("unexpected rev-list output: {out}")))
    }

    fn configure_sibling(
        &self,
        dataset: &WorkingDataset,
        sibling: &Sibling,
    ) -> Result<(), IndexerError> {
        self.datalad(
            dataset.path(),
            &["siblings", "configure", "--name", &sibling.name, "--url", &sibling.url],
        )
        .map(|_| ())
        .map_err(|err| match err {
            IndexerError::ToolFailed { message, .. } => IndexerError::Dataset(message),
            other => other,
        })
    }

    fn push(
        &self,
        dataset: &WorkingDataset,
        remote: &str,
        data: DataMode,
    ) -> Result<(), IndexerError> {
        self.datalad(
            dataset.path(),
            &["push", "--to", remote, "--data", data.as_str()],
        )
        .map(|_| ())
        .map_err(transport_failure)
    }

    fn create_store_sibling(
        &self,
        dataset: &WorkingDataset,
        url: &str,
        name: &str,
        alias: &str,
    ) -> Result<(), IndexerError> {
        self.datalad(
            dataset.path(),
            &[
                "create-sibling-ria",
                "--name",
                name,
                "--alias",
                alias,
                "--existing",
                "reconfigure",
                url,
            ],
        )
        .map(|_| ())
        .map_err(transport_failure)
    }

    fn init_special_remote(
        &self,
        dataset: &WorkingDataset,
        name: &str,
        params: &[(String, String)],
    ) -> Result<(), IndexerError> {
        let params = params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>();
        let mut args = vec!["annex", "initremote", name];
        args.extend(params.iter().map(String::as_str));
        match self.git(dataset, &args) {
            Ok(_) => Ok(()),
            Err(IndexerError::ToolFailed { message, .. }) if message.contains("already exists") => {
                let mut args = vec!["annex", "enableremote", name];
                args.extend(params.iter().map(String::as_str));
                self.git(dataset, &args).map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    fn set_wanted(
        &self,
        dataset: &WorkingDataset,
        remote: &str,
        expression: &str,
    ) -> Result<(), IndexerError> {
        self.git(dataset, &["annex", "wanted", remote, expression])
            .map(|_| ())
    }

    fn add_url_source(
        &self,
        dataset: &WorkingDataset,
        relative: &Utf8Path,
        url: &str,
    ) -> Result<(), IndexerError> {
        let file_arg = format!("--file={relative}");
        self.git(dataset, &["annex", "addurl", "--relaxed", &file_arg, url])
            .map(|_| ())
    }

    fn add_archive_content(
        &self,
        dataset: &WorkingDataset,
        archive: &Utf8Path,
    ) -> Result<(), IndexerError> {
        self.datalad(
            dataset.path(),
            &[
                "add-archive-content",
                "--strip-leading-dirs",
                "--no-commit",
                archive.as_str(),
            ],
        )
        .map(|_| ())
    }

    fn checkout_branch(
        &self,
        dataset: &WorkingDataset,
        name: &str,
        create: bool,
    ) -> Result<(), IndexerError> {
        if create {
            self.git(dataset, &["checkout", "-b", name]).map(|_| ())
        } else {
            self.git(dataset, &["checkout", name]).map(|_| ())
        }
    }

    fn housekeeping(&self, dataset: &WorkingDataset) -> Result<(), IndexerError> {
        self.git(dataset, &["gc", "--aggressive", "--quiet"])
            .map(|_| ())
    }

    fn verify_remote(
        &self,
        dataset: &WorkingDataset,
        remote: &str,
        filter: &ContentFilter,
    ) -> Result<FsckReport, IndexerError> {
        let from = format!("--from={remote}");
        let matching = filter.matching_args();
        let mut args = vec!["annex", "fsck", "--fast", "--json", from.as_str()];
        args.extend(matching.iter().map(String::as_str));

        // fsck exits non-zero when keys are missing; the JSON lines still describe them
        let output = self.output("git", &in_dir(dataset.path(), &args))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() && stdout.trim().is_empty() {
            return Err(IndexerError::ToolFailed {
                tool: "git".to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_fsck_json(&stdout)
    }

    fn present_content(
        &self,
        dataset: &WorkingDataset,
        filter: &ContentFilter,
    ) -> Result<usize, IndexerError> {
        let matching = filter.matching_args();
        let mut args = vec!["annex", "find"];
        args.extend(matching.iter().map(String::as_str));
        let out = self.git(dataset, &args)?;
        Ok(out.lines().filter(|line| !line.trim().is_empty()).count())
    }
}

// push, install and sibling creation talk to a remote
fn transport_failure(err: IndexerError) -> IndexerError {
    match err {
        IndexerError::ToolFailed { tool, message } => {
            IndexerError::RemoteUnavailable(format!("{tool}: {message}"))
        }
        other => other,
    }
}

// `rev-parse --verify --quiet` exits 1 with no output on an unborn HEAD
fn head_exists(code: Option<i32>, stderr: &str) -> Result<bool, IndexerError> {
    match code {
        Some(0) => Ok(true),
        Some(1) if stderr.trim().is_empty() => Ok(false),
        _ => Err(IndexerError::Dataset(format!(
            "cannot read HEAD ({code:?}): {}",
            stderr.trim()
        ))),
    }
}

fn in_dir(dir: &Utf8Path, args: &[&str]) -> Vec<String> {
    let mut full = vec!["-C".to_string(), dir.to_string()];
    full.extend(args.iter().map(|arg| arg.to_string()));
    full
}

#[derive(Debug, Deserialize)]
struct FsckLine {
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    key: Option<String>,
    success: bool,
}

pub fn parse_fsck_json(output: &str) -> Result<FsckReport, IndexerError> {
    let mut report = FsckReport::default();
    for line in output.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let record: FsckLine = serde_json::from_str(line)
            .map_err(|err| IndexerError::Dataset(format!("unparsable fsck record: {err}")))?;
        report.checked += 1;
        if !record.success {
            report.failed.push(
                record
                    .file
                    .or(record.key)
                    .unwrap_or_else(|| "<unknown>".to_string()),
            );
        }
    }
    Ok(report)
}

pub(crate) fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
