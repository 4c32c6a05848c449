use camino::Utf8Path;
use serde::Serialize;
use tracing::{debug, info};

use crate::dataset::{DatasetEngine, WorkingDataset};
use crate::domain::Sibling;
use crate::error::IndexerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOutcome {
    Linked,
    AlreadyLinked,
}

pub struct DatasetLinker<'a, E: DatasetEngine> {
    engine: &'a E,
}

impl<'a, E: DatasetEngine> DatasetLinker<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self { engine }
    }

    // never overwrites: an occupied `relative` is a `PathCollision`
    pub fn link_child(
        &self,
        parent: &WorkingDataset,
        child_url: &str,
        relative: &Utf8Path,
    ) -> Result<WorkingDataset, IndexerError> {
        let target = parent.join(relative);
        if target.as_std_path().exists() {
            return Err(IndexerError::PathCollision(format!(
                "{relative} in {}",
                parent.path()
            )));
        }
        let child = self.engine.install_subdataset(parent, child_url, relative)?;
        info!(child = child_url, path = %relative, "linked child dataset");
        Ok(child)
    }

    pub fn ensure_linked(
        &self,
        parent: &WorkingDataset,
        child_url: &str,
        relative: &Utf8Path,
    ) -> Result<LinkOutcome, IndexerError> {
        match self.engine.subdataset_source(parent, relative)? {
            Some(source) if source == child_url => {
                debug!(path = %relative, "child dataset already linked");
                Ok(LinkOutcome::AlreadyLinked)
            }
            Some(source) => Err(IndexerError::PathCollision(format!(
                "{relative} already registered from {source}"
            ))),
            None => {
                self.link_child(parent, child_url, relative)?;
                Ok(LinkOutcome::Linked)
            }
        }
    }

    pub fn configure_sibling(
        &self,
        dataset: &WorkingDataset,
        name: &str,
        url: &str,
    ) -> Result<(), IndexerError> {
        self.engine
            .configure_sibling(dataset, &Sibling::new(name, url))?;
        debug!(name, url, "sibling configured");
        Ok(())
    }
}
