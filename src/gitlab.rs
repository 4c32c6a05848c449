use std::thread;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::IndexerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteGroup {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub full_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProject {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub path_with_namespace: String,
    pub ssh_url_to_repo: String,
    pub http_url_to_repo: String,
}

impl RemoteProject {
    pub fn clone_url(&self, ssh: bool) -> &str {
        if ssh {
            &self.ssh_url_to_repo
        } else {
            &self.http_url_to_repo
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: u64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub id: u64,
    pub username: String,
    pub access_level: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessLevel {
    Developer,
    Maintainer,
    Owner,
}

impl AccessLevel {
    pub fn value(&self) -> u32 {
        match self {
            AccessLevel::Developer => 30,
            AccessLevel::Maintainer => 40,
            AccessLevel::Owner => 50,
        }
    }
}

pub trait RemoteDirectory: Send + Sync {
    fn list_groups(&self, search: &str) -> Result<Vec<RemoteGroup>, IndexerError>;
    // `AlreadyExists` when the path is taken
    fn create_group(
        &self,
        name: &str,
        path: &str,
        parent_id: Option<u64>,
    ) -> Result<RemoteGroup, IndexerError>;
    fn list_projects(&self, search: &str) -> Result<Vec<RemoteProject>, IndexerError>;
    // `AlreadyExists` when the path is taken
    fn create_project(&self, name: &str, namespace_id: u64)
    -> Result<RemoteProject, IndexerError>;
    fn list_group_members(&self, group_id: u64) -> Result<Vec<GroupMember>, IndexerError>;
    fn add_group_member(
        &self,
        group_id: u64,
        user_id: u64,
        access: AccessLevel,
    ) -> Result<(), IndexerError>;
    fn update_group_member(
        &self,
        group_id: u64,
        user_id: u64,
        access: AccessLevel,
    ) -> Result<(), IndexerError>;
    fn lookup_user(&self, username: &str) -> Result<Option<RemoteUser>, IndexerError>;
    fn protect_branch(&self, project_id: u64, pattern: &str) -> Result<(), IndexerError>;
}

#[derive(Clone)]
pub struct GitlabHttpClient {
    client: Client,
    api_base: String,
}

impl GitlabHttpClient {
    pub fn new(base_url: &Url, token: &str) -> Result<Self, IndexerError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("dicom-indexer/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| IndexerError::Configuration(err.to_string()))?,
        );
        let mut token_value = HeaderValue::from_str(token)
            .map_err(|_| IndexerError::Configuration("gitlab token is not a valid header".to_string()))?;
        token_value.set_sensitive(true);
        headers.insert("PRIVATE-TOKEN", token_value);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| IndexerError::RemoteUnavailable(err.to_string()))?;
        Ok(Self {
            client,
            api_base: format!("{}/api/v4", base_url.as_str().trim_end_matches('/')),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    fn handle_status(response: Response) -> Result<Response, IndexerError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "gitlab request failed".to_string());
        Err(classify_status(status, message))
    }

    fn send(request: RequestBuilder) -> Result<Response, IndexerError> {
        let response = request
            .send()
            .map_err(|err| IndexerError::RemoteUnavailable(err.to_string()))?;
        Self::handle_status(response)
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, IndexerError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Self::handle_status(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(IndexerError::RemoteUnavailable(err.to_string()));
                }
            }
        }
    }

    fn get_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, IndexerError> {
        let url = self.endpoint(path);
        let mut items = Vec::new();
        let mut page = "1".to_string();
        loop {
            let response = self.send_with_retries(|| {
                self.client
                    .get(&url)
                    .query(query)
                    .query(&[("per_page", "100"), ("page", page.as_str())])
            })?;
            let next = response
                .headers()
                .get("x-next-page")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string);
            let batch: Vec<T> = response
                .json()
                .map_err(|err| IndexerError::RemoteUnavailable(err.to_string()))?;
            items.extend(batch);
            match next {
                Some(next) => page = next,
                None => break,
            }
        }
        Ok(items)
    }
}

impl RemoteDirectory for GitlabHttpClient {
    fn list_groups(&self, search: &str) -> Result<Vec<RemoteGroup>, IndexerError> {
        debug!(search, "listing groups");
        self.get_all("groups", &[("search", search), ("all_available", "true")])
    }

    fn create_group(
        &self,
        name: &str,
        path: &str,
        parent_id: Option<u64>,
    ) -> Result<RemoteGroup, IndexerError> {
        let mut body = json!({ "name": name, "path": path });
        if let Some(parent_id) = parent_id {
            body["parent_id"] = json!(parent_id);
        }
        let response = Self::send(self.client.post(self.endpoint("groups")).json(&body))?;
        response
            .json()
            .map_err(|err| IndexerError::RemoteUnavailable(err.to_string()))
    }

    fn list_projects(&self, search: &str) -> Result<Vec<RemoteProject>, IndexerError> {
        debug!(search, "listing projects");
        self.get_all("projects", &[("search", search), ("simple", "true")])
    }

    fn create_project(
        &self,
        name: &str,
        namespace_id: u64,
    ) -> Result<RemoteProject, IndexerError> {
        let body = json!({ "name": name, "path": name, "namespace_id": namespace_id });
        let response = Self::send(self.client.post(self.endpoint("projects")).json(&body))?;
        response
            .json()
            .map_err(|err| IndexerError::RemoteUnavailable(err.to_string()))
    }

    fn list_group_members(&self, group_id: u64) -> Result<Vec<GroupMember>, IndexerError> {
        self.get_all(&format!("groups/{group_id}/members"), &[])
    }

    fn add_group_member(
        &self,
        group_id: u64,
        user_id: u64,
        access: AccessLevel,
    ) -> Result<(), IndexerError> {
        let body = json!({ "user_id": user_id, "access_level": access.value() });
        let request = self
            .client
            .post(self.endpoint(&format!("groups/{group_id}/members")))
            .json(&body);
        match Self::send(request) {
            Ok(_) | Err(IndexerError::AlreadyExists(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn update_group_member(
        &self,
        group_id: u64,
        user_id: u64,
        access: AccessLevel,
    ) -> Result<(), IndexerError> {
        let body = json!({ "access_level": access.value() });
        let request = self
            .client
            .put(self.endpoint(&format!("groups/{group_id}/members/{user_id}")))
            .json(&body);
        Self::send(request).map(|_| ())
    }

    fn lookup_user(&self, username: &str) -> Result<Option<RemoteUser>, IndexerError> {
        let users: Vec<RemoteUser> = self.get_all("users", &[("username", username)])?;
        Ok(users.into_iter().find(|user| user.username == username))
    }

    fn protect_branch(&self, project_id: u64, pattern: &str) -> Result<(), IndexerError> {
        let body = json!({
            "name": pattern,
            "push_access_level": AccessLevel::Maintainer.value(),
            "merge_access_level": AccessLevel::Developer.value(),
        });
        let request = self
            .client
            .post(self.endpoint(&format!("projects/{project_id}/protected_branches")))
            .json(&body);
        match Self::send(request) {
            Ok(_) | Err(IndexerError::AlreadyExists(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

pub fn classify_status(status: u16, message: String) -> IndexerError {
    let lowered = message.to_lowercase();
    match status {
        401 | 403 => IndexerError::RemoteUnavailable(format!("authentication failed ({status}): {message}")),
        400 | 409
            if lowered.contains("has already been taken") || lowered.contains("already exists") =>
        {
            IndexerError::AlreadyExists(message)
        }
        500..=599 => IndexerError::RemoteUnavailable(format!("server error ({status}): {message}")),
        _ => IndexerError::RemoteStatus { status, message },
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
