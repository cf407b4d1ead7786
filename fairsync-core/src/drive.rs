use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("drive api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveErrorClass {
    Auth,
    RateLimit,
    Conflict,
    Transient,
    Permanent,
}

/// Client for the drive's node API. Everything on the drive is a node: a
/// folder, a file, or a shortcut referencing another node by id.
#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DriveClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    /// One page of the node listing; pass the previous page's token to
    /// continue.
    pub async fn list_nodes(&self, page_token: Option<&str>) -> Result<NodePage, DriveError> {
        let mut url = self.endpoint("/v1/nodes")?;
        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair("page_token", token);
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Walks every page of the node listing.
    pub async fn list_nodes_all(&self) -> Result<Vec<NodeInfo>, DriveError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list_nodes(page_token.as_deref()).await?;
            items.extend(page.items);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(items)
    }

    /// `parent_id = None` creates directly under the drive root.
    pub async fn create_folder(
        &self,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<NodeInfo, DriveError> {
        self.create_node(&CreateNodeBody {
            name,
            parent_id,
            kind: NodeKind::Folder,
            target_id: None,
        })
        .await
    }

    pub async fn create_shortcut(
        &self,
        parent_id: Option<&str>,
        name: &str,
        target_id: &str,
    ) -> Result<NodeInfo, DriveError> {
        self.create_node(&CreateNodeBody {
            name,
            parent_id,
            kind: NodeKind::Shortcut,
            target_id: Some(target_id),
        })
        .await
    }

    /// Registers a new file node and returns the slot its content must be
    /// streamed to.
    pub async fn create_file_slot(
        &self,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<UploadSlot, DriveError> {
        let url = self.endpoint("/v1/files")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&CreateNodeBody {
                name,
                parent_id,
                kind: NodeKind::File,
                target_id: None,
            })
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Issues a fresh upload slot for an existing file node, replacing its
    /// content in place once the slot is written.
    pub async fn refresh_file_slot(&self, node_id: &str) -> Result<UploadSlot, DriveError> {
        let url = self.endpoint(&format!("/v1/files/{node_id}/content"))?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn create_node(&self, body: &CreateNodeBody<'_>) -> Result<NodeInfo, DriveError> {
        let url = self.endpoint("/v1/nodes")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DriveError::Api { status, body })
        }
    }
}

impl DriveError {
    pub fn classification(&self) -> Option<DriveErrorClass> {
        match self {
            DriveError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    /// Duplicate-create races surface as conflicts; callers re-list and treat
    /// the existing node as success.
    pub fn is_conflict(&self) -> bool {
        matches!(self.classification(), Some(DriveErrorClass::Conflict))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(DriveErrorClass::RateLimit | DriveErrorClass::Transient)
        )
    }
}

fn classify_api_status(status: StatusCode) -> DriveErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        DriveErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        DriveErrorClass::RateLimit
    } else if status == StatusCode::CONFLICT {
        DriveErrorClass::Conflict
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        DriveErrorClass::Transient
    } else {
        DriveErrorClass::Permanent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    File,
    Shortcut,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NodeInfo {
    pub id: String,
    /// Absent on nodes sitting directly under the drive root.
    #[serde(default)]
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub target_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct NodePage {
    pub items: Vec<NodeInfo>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UploadSlot {
    pub node: NodeInfo,
    pub upload_url: Url,
}

#[derive(Serialize)]
struct CreateNodeBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<&'a str>,
    #[serde(rename = "type")]
    kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_id: Option<&'a str>,
}
