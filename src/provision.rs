use tracing::{debug, info, warn};

use crate::domain::HierarchyPath;
use crate::error::IndexerError;
use crate::gitlab::{RemoteDirectory, RemoteGroup, RemoteProject};

pub struct HierarchyProvisioner<'a, D: RemoteDirectory> {
    directory: &'a D,
}

impl<'a, D: RemoteDirectory> HierarchyProvisioner<'a, D> {
    pub fn new(directory: &'a D) -> Self {
        Self { directory }
    }

    pub fn find_group(&self, full_path: &str) -> Result<Option<RemoteGroup>, IndexerError> {
        let leaf = full_path.rsplit('/').next().unwrap_or(full_path);
        let mut matches = self
            .directory
            .list_groups(leaf)?
            .into_iter()
            .filter(|group| group.full_path.eq_ignore_ascii_case(full_path))
            .collect::<Vec<_>>();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            count => Err(IndexerError::AmbiguousName {
                path: full_path.to_string(),
                matches: count,
            }),
        }
    }

    pub fn find_project(&self, path: &HierarchyPath) -> Result<Option<RemoteProject>, IndexerError> {
        let full_path = path.to_string();
        let mut matches = self
            .directory
            .list_projects(path.leaf())?
            .into_iter()
            .filter(|project| project.path_with_namespace.eq_ignore_ascii_case(&full_path))
            .collect::<Vec<_>>();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            count => Err(IndexerError::AmbiguousName {
                path: full_path,
                matches: count,
            }),
        }
    }

    pub fn ensure_group_path(&self, path: &HierarchyPath) -> Result<RemoteGroup, IndexerError> {
        let segments = path.segments();

        let mut existing = 0usize;
        let mut parent: Option<RemoteGroup> = None;
        for keep in (1..=segments.len()).rev() {
            let prefix = path.prefix_string(keep);
            if let Some(group) = self.find_group(&prefix)? {
                debug!(prefix = %prefix, id = group.id, "found existing group prefix");
                existing = keep;
                parent = Some(group);
                break;
            }
        }

        for depth in existing..segments.len() {
            let name = &segments[depth];
            let full_path = path.prefix_string(depth + 1);
            let group = self.get_or_create_group(name, &full_path, parent.as_ref())?;
            parent = Some(group);
        }

        parent.ok_or_else(|| IndexerError::InvalidPath(path.to_string()))
    }

    pub fn ensure_project(&self, path: &HierarchyPath) -> Result<RemoteProject, IndexerError> {
        if let Some(project) = self.find_project(path)? {
            debug!(path = %path, id = project.id, "reusing existing project");
            return Ok(project);
        }

        let parent_path = path.parent().ok_or_else(|| {
            IndexerError::InvalidPath(format!("project {path} needs a parent group"))
        })?;
        let namespace = self.ensure_group_path(&parent_path)?;

        match self.directory.create_project(path.leaf(), namespace.id) {
            Ok(project) => {
                info!(path = %path, id = project.id, "created project");
                Ok(project)
            }
            Err(IndexerError::AlreadyExists(message)) => {
                warn!(path = %path, reason = %message, "project created concurrently, re-fetching");
                self.find_project(path)?.ok_or_else(|| {
                    IndexerError::RemoteUnavailable(format!(
                        "project {path} reported as existing but not visible"
                    ))
                })
            }
            Err(err) => Err(err),
        }
    }

    fn get_or_create_group(
        &self,
        name: &str,
        full_path: &str,
        parent: Option<&RemoteGroup>,
    ) -> Result<RemoteGroup, IndexerError> {
        let parent_id = parent.map(|group| group.id);
        match self.directory.create_group(name, name, parent_id) {
            Ok(group) => {
                info!(full_path, id = group.id, "created group");
                Ok(group)
            }
            Err(IndexerError::AlreadyExists(message)) => {
                warn!(full_path, reason = %message, "group created concurrently, re-fetching");
                self.find_group(full_path)?.ok_or_else(|| {
                    IndexerError::RemoteUnavailable(format!(
                        "group {full_path} reported as existing but not visible"
                    ))
                })
            }
            Err(err) => Err(err),
        }
    }
}
