use serde::Serialize;
use tracing::info;

use crate::error::IndexerError;
use crate::gitlab::{AccessLevel, RemoteDirectory, RemoteGroup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantOutcome {
    AlreadyMember,
    Granted,
    Upgraded,
}

pub struct BotPrivilegeManager<'a, D: RemoteDirectory> {
    directory: &'a D,
}

impl<'a, D: RemoteDirectory> BotPrivilegeManager<'a, D> {
    pub fn new(directory: &'a D) -> Self {
        Self { directory }
    }

    pub fn ensure_maintainer(
        &self,
        group: &RemoteGroup,
        identity: &str,
    ) -> Result<GrantOutcome, IndexerError> {
        let user = self
            .directory
            .lookup_user(identity)?
            .ok_or_else(|| IndexerError::UnknownIdentity(identity.to_string()))?;

        let members = self.directory.list_group_members(group.id)?;
        if let Some(member) = members.iter().find(|member| member.id == user.id) {
            if member.access_level >= AccessLevel::Maintainer.value() {
                return Ok(GrantOutcome::AlreadyMember);
            }
            self.directory
                .update_group_member(group.id, user.id, AccessLevel::Maintainer)?;
            info!(group = %group.full_path, identity, "raised access to maintainer");
            return Ok(GrantOutcome::Upgraded);
        }

        self.directory
            .add_group_member(group.id, user.id, AccessLevel::Maintainer)?;
        info!(group = %group.full_path, identity, "granted maintainer access");
        Ok(GrantOutcome::Granted)
    }
}
