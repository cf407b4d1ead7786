use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::record::{RecordMap, RemoteRef};

/// The portal expects a browser-looking agent on every call.
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) fairsync/0.1";

/// Server-side directory milestone uploads are served from.
const MILESTONE_UPLOAD_DIR: &str = "/srv/portal/public/assets/milestone_uploads";

const MILESTONE_PROJECT_TAB: u32 = 1335;
const MILESTONE_FILES_FORMS_TAB: u32 = 1337;
const MILESTONE_JUDGES_TAB: u32 = 3153;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("portal returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("portal session is not authenticated")]
    NotAuthenticated,
    #[error("no CSRF token on the session")]
    MissingCsrf,
}

impl PortalError {
    /// True for responses that mean the session (or its CSRF token) went
    /// stale and one re-login is worth attempting.
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            PortalError::Api { status, .. }
                if matches!(*status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        )
    }
}

/// Cookie-holding session against the fair portal.
///
/// Lifecycle: construct, `login`, then any number of fetch/download calls.
/// The CSRF token rides along on every state-changing request and is fetched
/// lazily once per session.
pub struct PortalClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
    csrf: Option<String>,
    authenticated: bool,
}

impl PortalClient {
    pub fn for_domain(
        domain: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, PortalError> {
        Self::with_base_url(&format!("https://{domain}.stemportal.com"), username, password)
    }

    pub fn with_base_url(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, PortalError> {
        Ok(Self {
            http: Client::builder()
                .cookie_store(true)
                .user_agent(USER_AGENT)
                .build()?,
            base_url: Url::parse(base_url)?,
            username: username.into(),
            password: password.into(),
            csrf: None,
            authenticated: false,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Authenticates the session. Returns `Ok(false)` on a rejected login so
    /// callers can decide whether that is fatal; transport failures error.
    ///
    /// Any held CSRF token is dropped first, so re-logging-in after a stale
    /// session also renews the token.
    pub async fn login(&mut self) -> Result<bool, PortalError> {
        self.csrf = None;
        let url = self.base_url.join("/admin/authenticate")?;
        let response = self
            .http
            .post(url)
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;
        self.authenticated = response.status().is_success();
        if self.authenticated {
            self.ensure_csrf().await?;
        }
        Ok(self.authenticated)
    }

    /// Fetches the CSRF token if the session does not hold one yet.
    pub async fn ensure_csrf(&mut self) -> Result<(), PortalError> {
        if self.csrf.is_some() {
            return Ok(());
        }
        let url = self.base_url.join("/fairadmin/csrfToken")?;
        let response = self.http.get(url).send().await?;
        let reply: CsrfReply = Self::handle_response(response).await?;
        self.csrf = Some(reply.csrf_token);
        Ok(())
    }

    /// Project-info milestone: canonical scalar fields per entity.
    pub async fn fetch_project_tab(&mut self) -> Result<RecordMap, PortalError> {
        self.fetch_milestone(MILESTONE_PROJECT_TAB).await
    }

    /// Judges-materials milestone: the visual artifacts reviewers need.
    pub async fn fetch_files_tab(&mut self) -> Result<RecordMap, PortalError> {
        self.fetch_milestone(MILESTONE_JUDGES_TAB).await
    }

    /// Files-and-forms milestone: the compliance paperwork.
    pub async fn fetch_forms_tab(&mut self) -> Result<RecordMap, PortalError> {
        self.fetch_milestone(MILESTONE_FILES_FORMS_TAB).await
    }

    async fn fetch_milestone(&mut self, milestone_id: u32) -> Result<RecordMap, PortalError> {
        if !self.authenticated {
            return Err(PortalError::NotAuthenticated);
        }
        self.ensure_csrf().await?;
        let csrf = self.csrf.clone().ok_or(PortalError::MissingCsrf)?;
        let url = self
            .base_url
            .join("/fairadmin/getstudentCustomMilestoneDetailView")?;
        let milestone = milestone_id.to_string();
        let response = self
            .http
            .post(url)
            .header("X-CSRF-TOKEN", csrf)
            .form(&[
                ("page", "1"),
                ("per_page", "999"),
                ("st_stmile_id", milestone.as_str()),
                ("student_activation_status", "1"),
            ])
            .send()
            .await?;
        let reply: MilestoneReply = Self::handle_response(response).await?;
        Ok(reply.rows)
    }

    /// Per-student file rows from the detailed files-and-forms view. The
    /// milestone tabs collapse team members into one row; this view does not.
    pub async fn fetch_student_detail(
        &mut self,
        student_id: &str,
    ) -> Result<Vec<DetailRow>, PortalError> {
        if !self.authenticated {
            return Err(PortalError::NotAuthenticated);
        }
        self.ensure_csrf().await?;
        let csrf = self.csrf.clone().ok_or(PortalError::MissingCsrf)?;
        let url = self
            .base_url
            .join("/filesAndForms/studentFormsAndFilesDetailedView")?;
        let referer = self.base_url.join("/filesAndForms")?;
        let response = self
            .http
            .post(url)
            .header("X-CSRF-TOKEN", csrf)
            .header("Referer", referer.as_str())
            .header("X-Requested-With", "XMLHttpRequest")
            .form(&[("studentId", student_id)])
            .send()
            .await?;
        let reply: DetailReply = Self::handle_response(response).await?;
        Ok(reply.rows)
    }

    /// Plain GET against an object-storage URL, through the session.
    pub async fn download_bucket(&self, url: &str) -> Result<Response, PortalError> {
        let url = Url::parse(url)?;
        let response = self.http.get(url).send().await?;
        Self::ok_status(response).await
    }

    /// Fetches a portal-held file through the form-POST download endpoint.
    pub async fn download_milestone_file(&self, file_name: &str) -> Result<Response, PortalError> {
        if !self.authenticated {
            return Err(PortalError::NotAuthenticated);
        }
        let csrf = self.csrf.clone().ok_or(PortalError::MissingCsrf)?;
        let url = self.base_url.join("/fairadmin/fileDownload")?;
        let referer = self.base_url.join("/fairadmin/FilesAndForms")?;
        let response = self
            .http
            .post(url)
            .header("X-CSRF-TOKEN", csrf)
            .header("Referer", referer.as_str())
            .form(&[
                ("download_filen_path", MILESTONE_UPLOAD_DIR),
                ("download_hideData", file_name),
            ])
            .send()
            .await?;
        Self::ok_status(response).await
    }

    async fn ok_status(response: Response) -> Result<Response, PortalError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(PortalError::Api { status, body })
        }
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: Response,
    ) -> Result<T, PortalError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(PortalError::Api { status, body })
        }
    }
}

/// One file row from the detailed per-student view.
#[derive(Debug, Clone, Deserialize)]
pub struct DetailRow {
    pub file_type: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub remote_filename: Option<String>,
}

impl DetailRow {
    pub fn remote_ref(&self) -> Option<RemoteRef> {
        if let Some(url) = &self.url {
            return Some(RemoteRef::Bucket(url.clone()));
        }
        self.remote_filename
            .as_ref()
            .map(|name| RemoteRef::Portal(name.clone()))
    }
}

#[derive(Debug, Deserialize)]
struct CsrfReply {
    csrf_token: String,
}

#[derive(Debug, Deserialize)]
struct MilestoneReply {
    rows: RecordMap,
}

#[derive(Debug, Deserialize)]
struct DetailReply {
    rows: Vec<DetailRow>,
}
