#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

use dicom_indexer::config::{ArchiveFormat, IndexerConfig};
use dicom_indexer::dataset::{ContentFilter, CreateOptions, DatasetEngine, FsckReport, WorkingDataset};
use dicom_indexer::domain::{DataMode, SessionKey, SessionMetadata, Sibling};
use dicom_indexer::error::IndexerError;
use dicom_indexer::gitlab::{
    AccessLevel, GroupMember, RemoteDirectory, RemoteGroup, RemoteProject, RemoteUser,
};
use dicom_indexer::metadata::MetadataExtractor;

pub const BOT: &str = "indexer-bot";

pub fn config(storage: Option<&str>) -> IndexerConfig {
    let mut config = IndexerConfig::default();
    config.gitlab_url = Some("https://gitlab.example.org".to_string());
    config.gitlab_token = Some("glpat-test".to_string());
    config.bot_username = Some(BOT.to_string());
    config.storage_remote = storage.map(str::to_string);
    config.compression.format = ArchiveFormat::Zip;
    config.sort_series = false;
    config
}

pub fn session_metadata() -> SessionMetadata {
    SessionMetadata::new()
        .with(SessionKey::ReferringPhysicianName, "Smith^Jane")
        .with(SessionKey::StudyDescription, "Brain")
        .with(SessionKey::StudyInstanceUID, "1.2.840.113619.2.55")
        .with(SessionKey::PatientID, "P001")
        .with(SessionKey::PatientName, "Doe^John")
        .with(SessionKey::StudyDate, "20240117")
}

#[derive(Default)]
struct DirectoryState {
    next_id: u64,
    groups: Vec<RemoteGroup>,
    projects: Vec<RemoteProject>,
    members: HashMap<u64, Vec<GroupMember>>,
    users: Vec<RemoteUser>,
    protected: Vec<(u64, String)>,
    group_creates: usize,
    project_creates: usize,
    stale_lookups: usize,
    lookups: usize,
}

impl DirectoryState {
    fn id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

// In-memory remote directory enforcing unique full paths on create.
#[derive(Default)]
pub struct MockDirectory {
    state: Mutex<DirectoryState>,
}

impl MockDirectory {
    pub fn new() -> Self {
        let directory = Self::default();
        directory.add_user(BOT);
        directory
    }

    pub fn add_user(&self, username: &str) -> u64 {
        let mut state = self.state.lock().unwrap();
        let id = state.id();
        state.users.push(RemoteUser {
            id,
            username: username.to_string(),
        });
        id
    }

    // The next `count` list calls see nothing, as if another run had not
    // yet become visible.
    pub fn stale_lookups(&self, count: usize) {
        self.state.lock().unwrap().stale_lookups = count;
    }

    // Inserts a group without the uniqueness check.
    pub fn seed_group(&self, full_path: &str) -> RemoteGroup {
        let mut state = self.state.lock().unwrap();
        let id = state.id();
        let leaf = full_path.rsplit('/').next().unwrap_or(full_path).to_string();
        let group = RemoteGroup {
            id,
            name: leaf.clone(),
            path: leaf,
            full_path: full_path.to_string(),
        };
        state.groups.push(group.clone());
        group
    }

    pub fn add_member(&self, group_id: u64, username: &str, access_level: u32) {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .iter()
            .find(|user| user.username == username)
            .cloned()
            .unwrap();
        state.members.entry(group_id).or_default().push(GroupMember {
            id: user.id,
            username: user.username,
            access_level,
        });
    }

    pub fn groups_at(&self, full_path: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .groups
            .iter()
            .filter(|group| group.full_path == full_path)
            .count()
    }

    pub fn group_paths(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut paths = state
            .groups
            .iter()
            .map(|group| group.full_path.clone())
            .collect::<Vec<_>>();
        paths.sort();
        paths
    }

    pub fn project_paths(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut paths = state
            .projects
            .iter()
            .map(|project| project.path_with_namespace.clone())
            .collect::<Vec<_>>();
        paths.sort();
        paths
    }

    pub fn group_creates(&self) -> usize {
        self.state.lock().unwrap().group_creates
    }

    pub fn project_creates(&self) -> usize {
        self.state.lock().unwrap().project_creates
    }

    pub fn lookups(&self) -> usize {
        self.state.lock().unwrap().lookups
    }

    pub fn members(&self, group_id: u64) -> Vec<GroupMember> {
        let state = self.state.lock().unwrap();
        state.members.get(&group_id).cloned().unwrap_or_default()
    }

    pub fn protected(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .protected
            .iter()
            .map(|(_, pattern)| pattern.clone())
            .collect()
    }

    pub fn group(&self, full_path: &str) -> Option<RemoteGroup> {
        let state = self.state.lock().unwrap();
        state
            .groups
            .iter()
            .find(|group| group.full_path == full_path)
            .cloned()
    }

    fn stale(state: &mut DirectoryState) -> bool {
        state.lookups += 1;
        if state.stale_lookups > 0 {
            state.stale_lookups -= 1;
            return true;
        }
        false
    }
}

impl RemoteDirectory for MockDirectory {
    fn list_groups(&self, search: &str) -> Result<Vec<RemoteGroup>, IndexerError> {
        let mut state = self.state.lock().unwrap();
        if Self::stale(&mut state) {
            return Ok(Vec::new());
        }
        let search = search.to_lowercase();
        Ok(state
            .groups
            .iter()
            .filter(|group| group.path.to_lowercase().contains(&search))
            .cloned()
            .collect())
    }

    fn create_group(
        &self,
        name: &str,
        path: &str,
        parent_id: Option<u64>,
    ) -> Result<RemoteGroup, IndexerError> {
        let mut state = self.state.lock().unwrap();
        let full_path = match parent_id {
            Some(parent_id) => {
                let parent = state
                    .groups
                    .iter()
                    .find(|group| group.id == parent_id)
                    .ok_or_else(|| IndexerError::RemoteStatus {
                        status: 404,
                        message: "parent not found".to_string(),
                    })?;
                format!("{}/{path}", parent.full_path)
            }
            None => path.to_string(),
        };
        if state.groups.iter().any(|group| group.full_path == full_path) {
            return Err(IndexerError::AlreadyExists(format!(
                "{{\"message\":{{\"path\":[\"{full_path} has already been taken\"]}}}}"
            )));
        }
        let id = state.id();
        let group = RemoteGroup {
            id,
            name: name.to_string(),
            path: path.to_string(),
            full_path,
        };
        state.group_creates += 1;
        state.groups.push(group.clone());
        Ok(group)
    }

    fn list_projects(&self, search: &str) -> Result<Vec<RemoteProject>, IndexerError> {
        let mut state = self.state.lock().unwrap();
        if Self::stale(&mut state) {
            return Ok(Vec::new());
        }
        let search = search.to_lowercase();
        Ok(state
            .projects
            .iter()
            .filter(|project| project.path.to_lowercase().contains(&search))
            .cloned()
            .collect())
    }

    fn create_project(
        &self,
        name: &str,
        namespace_id: u64,
    ) -> Result<RemoteProject, IndexerError> {
        let mut state = self.state.lock().unwrap();
        let namespace = state
            .groups
            .iter()
            .find(|group| group.id == namespace_id)
            .cloned()
            .ok_or_else(|| IndexerError::RemoteStatus {
                status: 404,
                message: "namespace not found".to_string(),
            })?;
        let full_path = format!("{}/{name}", namespace.full_path);
        if state
            .projects
            .iter()
            .any(|project| project.path_with_namespace == full_path)
        {
            return Err(IndexerError::AlreadyExists(format!(
                "{full_path} has already been taken"
            )));
        }
        let id = state.id();
        let project = RemoteProject {
            id,
            name: name.to_string(),
            path: name.to_string(),
            ssh_url_to_repo: format!("git@gitlab.example.org:{full_path}.git"),
            http_url_to_repo: format!("https://gitlab.example.org/{full_path}.git"),
            path_with_namespace: full_path,
        };
        state.project_creates += 1;
        state.projects.push(project.clone());
        Ok(project)
    }

    fn list_group_members(&self, group_id: u64) -> Result<Vec<GroupMember>, IndexerError> {
        Ok(self.members(group_id))
    }

    fn add_group_member(
        &self,
        group_id: u64,
        user_id: u64,
        access: AccessLevel,
    ) -> Result<(), IndexerError> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .iter()
            .find(|user| user.id == user_id)
            .cloned()
            .ok_or_else(|| IndexerError::RemoteStatus {
                status: 404,
                message: "user not found".to_string(),
            })?;
        let members = state.members.entry(group_id).or_default();
        if !members.iter().any(|member| member.id == user_id) {
            members.push(GroupMember {
                id: user.id,
                username: user.username,
                access_level: access.value(),
            });
        }
        Ok(())
    }

    fn update_group_member(
        &self,
        group_id: u64,
        user_id: u64,
        access: AccessLevel,
    ) -> Result<(), IndexerError> {
        let mut state = self.state.lock().unwrap();
        if let Some(member) = state
            .members
            .entry(group_id)
            .or_default()
            .iter_mut()
            .find(|member| member.id == user_id)
        {
            member.access_level = access.value();
        }
        Ok(())
    }

    fn lookup_user(&self, username: &str) -> Result<Option<RemoteUser>, IndexerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .find(|user| user.username == username)
            .cloned())
    }

    fn protect_branch(&self, project_id: u64, pattern: &str) -> Result<(), IndexerError> {
        let mut state = self.state.lock().unwrap();
        let entry = (project_id, pattern.to_string());
        if !state.protected.contains(&entry) {
            state.protected.push(entry);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct RepoState {
    commits: Vec<String>,
    subdatasets: BTreeMap<Utf8PathBuf, String>,
}

#[derive(Debug, Default)]
struct EngineState {
    local: HashMap<Utf8PathBuf, RepoState>,
    siblings: HashMap<(Utf8PathBuf, String), String>,
    remotes: HashMap<String, RepoState>,
    pushes: Vec<(String, DataMode)>,
    store_siblings: Vec<(String, String, String)>,
    special_remotes: Vec<(String, Vec<(String, String)>)>,
    wanted: Vec<(String, String)>,
    url_sources: Vec<(Utf8PathBuf, String)>,
    branches: Vec<String>,
    created: Vec<Utf8PathBuf>,
    present: usize,
    verify: Option<FsckReport>,
}

// Dataset engine keeping history in memory and files on disk.
// Pushing to a sibling publishes the local history under the sibling URL;
// installing from a URL starts from whatever was published there.
pub struct MockEngine {
    state: Mutex<EngineState>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            state: Mutex::new(EngineState {
                present: 1,
                ..EngineState::default()
            }),
        }
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    // Number of annexed files reported present locally.
    pub fn set_present(&self, present: usize) {
        self.state.lock().unwrap().present = present;
    }

    // Replaces the remote check result, e.g. to simulate a skipped check.
    pub fn set_verification(&self, report: FsckReport) {
        self.state.lock().unwrap().verify = Some(report);
    }

    pub fn publish(&self, url: &str, commits: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.remotes.insert(
            url.to_string(),
            RepoState {
                commits: commits.iter().map(|c| c.to_string()).collect(),
                subdatasets: BTreeMap::new(),
            },
        );
    }

    pub fn remote_commits(&self, url: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .remotes
            .get(url)
            .map(|repo| repo.commits.clone())
            .unwrap_or_default()
    }

    pub fn remote_subdatasets(&self, url: &str) -> BTreeMap<Utf8PathBuf, String> {
        let state = self.state.lock().unwrap();
        state
            .remotes
            .get(url)
            .map(|repo| repo.subdatasets.clone())
            .unwrap_or_default()
    }

    pub fn commits(&self, dataset: &WorkingDataset) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .local
            .get(dataset.path())
            .map(|repo| repo.commits.clone())
            .unwrap_or_default()
    }

    pub fn pushes(&self) -> Vec<(String, DataMode)> {
        self.state.lock().unwrap().pushes.clone()
    }

    pub fn store_siblings(&self) -> Vec<(String, String, String)> {
        self.state.lock().unwrap().store_siblings.clone()
    }

    pub fn special_remotes(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.state.lock().unwrap().special_remotes.clone()
    }

    pub fn wanted(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().wanted.clone()
    }

    pub fn url_sources(&self) -> Vec<(Utf8PathBuf, String)> {
        self.state.lock().unwrap().url_sources.clone()
    }

    pub fn branches(&self) -> Vec<String> {
        self.state.lock().unwrap().branches.clone()
    }

    pub fn created(&self) -> Vec<Utf8PathBuf> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn sibling(&self, dataset: &WorkingDataset, name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .siblings
            .get(&(dataset.path().to_path_buf(), name.to_string()))
            .cloned()
    }

    pub fn init_local(&self, dataset: &WorkingDataset, commits: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.local.insert(
            dataset.path().to_path_buf(),
            RepoState {
                commits: commits.iter().map(|c| c.to_string()).collect(),
                subdatasets: BTreeMap::new(),
            },
        );
    }
}

fn mkdir(path: &Utf8Path) -> Result<(), IndexerError> {
    fs::create_dir_all(path.as_std_path()).map_err(|err| IndexerError::Filesystem(err.to_string()))
}

impl DatasetEngine for MockEngine {
    fn create(
        &self,
        path: &Utf8Path,
        options: CreateOptions,
    ) -> Result<WorkingDataset, IndexerError> {
        mkdir(path)?;
        let mut state = self.state.lock().unwrap();
        let exists = state.local.contains_key(path);
        if exists && !options.force {
            return Err(IndexerError::Dataset(format!("{path} already a dataset")));
        }
        state.local.entry(path.to_path_buf()).or_default();
        state.created.push(path.to_path_buf());
        Ok(WorkingDataset::at(path))
    }

    fn install(&self, source: &str, path: &Utf8Path) -> Result<WorkingDataset, IndexerError> {
        mkdir(path)?;
        let mut state = self.state.lock().unwrap();
        let repo = state.remotes.get(source).cloned().unwrap_or_default();
        for relative in repo.subdatasets.keys() {
            // unpopulated submodules show up as empty directories
            mkdir(&path.join(relative))?;
        }
        state.local.insert(path.to_path_buf(), repo);
        state
            .siblings
            .insert((path.to_path_buf(), "origin".to_string()), source.to_string());
        Ok(WorkingDataset::at(path))
    }

    fn install_subdataset(
        &self,
        parent: &WorkingDataset,
        source: &str,
        relative: &Utf8Path,
    ) -> Result<WorkingDataset, IndexerError> {
        let child = self.install(source, &parent.join(relative))?;
        let mut state = self.state.lock().unwrap();
        state
            .local
            .entry(parent.path().to_path_buf())
            .or_default()
            .subdatasets
            .insert(relative.to_path_buf(), source.to_string());
        Ok(child)
    }

    fn subdataset_source(
        &self,
        parent: &WorkingDataset,
        relative: &Utf8Path,
    ) -> Result<Option<String>, IndexerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .local
            .get(parent.path())
            .and_then(|repo| repo.subdatasets.get(relative))
            .cloned())
    }

    fn save(
        &self,
        dataset: &WorkingDataset,
        _paths: &[Utf8PathBuf],
        message: &str,
    ) -> Result<(), IndexerError> {
        let mut state = self.state.lock().unwrap();
        state
            .local
            .entry(dataset.path().to_path_buf())
            .or_default()
            .commits
            .push(message.to_string());
        Ok(())
    }

    fn commit_count(&self, dataset: &WorkingDataset) -> Result<usize, IndexerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .local
            .get(dataset.path())
            .map(|repo| repo.commits.len())
            .unwrap_or(0))
    }

    fn configure_sibling(
        &self,
        dataset: &WorkingDataset,
        sibling: &Sibling,
    ) -> Result<(), IndexerError> {
        let mut state = self.state.lock().unwrap();
        state.siblings.insert(
            (dataset.path().to_path_buf(), sibling.name.clone()),
            sibling.url.clone(),
        );
        Ok(())
    }

    fn push(
        &self,
        dataset: &WorkingDataset,
        remote: &str,
        data: DataMode,
    ) -> Result<(), IndexerError> {
        let mut state = self.state.lock().unwrap();
        state.pushes.push((remote.to_string(), data));
        let url = state
            .siblings
            .get(&(dataset.path().to_path_buf(), remote.to_string()))
            .cloned();
        if let Some(url) = url {
            let repo = state.local.get(dataset.path()).cloned().unwrap_or_default();
            state.remotes.insert(url, repo);
        }
        Ok(())
    }

    fn create_store_sibling(
        &self,
        dataset: &WorkingDataset,
        url: &str,
        name: &str,
        alias: &str,
    ) -> Result<(), IndexerError> {
        let mut state = self.state.lock().unwrap();
        state
            .store_siblings
            .push((url.to_string(), name.to_string(), alias.to_string()));
        state.siblings.insert(
            (dataset.path().to_path_buf(), name.to_string()),
            format!("{url}#{alias}"),
        );
        Ok(())
    }

    fn init_special_remote(
        &self,
        _dataset: &WorkingDataset,
        name: &str,
        params: &[(String, String)],
    ) -> Result<(), IndexerError> {
        let mut state = self.state.lock().unwrap();
        state
            .special_remotes
            .push((name.to_string(), params.to_vec()));
        Ok(())
    }

    fn set_wanted(
        &self,
        _dataset: &WorkingDataset,
        remote: &str,
        expression: &str,
    ) -> Result<(), IndexerError> {
        let mut state = self.state.lock().unwrap();
        state
            .wanted
            .push((remote.to_string(), expression.to_string()));
        Ok(())
    }

    fn add_url_source(
        &self,
        dataset: &WorkingDataset,
        relative: &Utf8Path,
        url: &str,
    ) -> Result<(), IndexerError> {
        // stands in for the annex pointer file
        fs::write(dataset.join(relative).as_std_path(), url)
            .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
        let mut state = self.state.lock().unwrap();
        state
            .url_sources
            .push((relative.to_path_buf(), url.to_string()));
        Ok(())
    }

    fn add_archive_content(
        &self,
        _dataset: &WorkingDataset,
        _archive: &Utf8Path,
    ) -> Result<(), IndexerError> {
        Ok(())
    }

    fn checkout_branch(
        &self,
        _dataset: &WorkingDataset,
        name: &str,
        _create: bool,
    ) -> Result<(), IndexerError> {
        self.state.lock().unwrap().branches.push(name.to_string());
        Ok(())
    }

    fn housekeeping(&self, _dataset: &WorkingDataset) -> Result<(), IndexerError> {
        Ok(())
    }

    fn verify_remote(
        &self,
        _dataset: &WorkingDataset,
        _remote: &str,
        _filter: &ContentFilter,
    ) -> Result<FsckReport, IndexerError> {
        let state = self.state.lock().unwrap();
        Ok(state.verify.clone().unwrap_or(FsckReport {
            checked: state.present,
            failed: Vec::new(),
        }))
    }

    fn present_content(
        &self,
        _dataset: &WorkingDataset,
        _filter: &ContentFilter,
    ) -> Result<usize, IndexerError> {
        Ok(self.state.lock().unwrap().present)
    }
}

// Returns fixed metadata whenever at least one file is offered.
pub struct MockExtractor {
    metadata: SessionMetadata,
}

impl MockExtractor {
    pub fn new(metadata: SessionMetadata) -> Self {
        Self { metadata }
    }
}

impl MetadataExtractor for MockExtractor {
    fn extract(&self, files: &[PathBuf]) -> Result<SessionMetadata, IndexerError> {
        if files.is_empty() {
            return Err(IndexerError::NoParsableMetadata("<no files>".to_string()));
        }
        Ok(self.metadata.clone())
    }

    fn series_uid(&self, _file: &Path) -> Option<String> {
        None
    }
}

pub fn write_session_dir(root: &Path) -> PathBuf {
    let dir = root.join("incoming");
    fs::create_dir_all(dir.join("series1")).unwrap();
    fs::write(dir.join("series1").join("0001.dcm"), b"DICM slice one").unwrap();
    fs::write(dir.join("series1").join("0002.dcm"), b"DICM slice two").unwrap();
    dir
}
