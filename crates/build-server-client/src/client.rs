//! REST client for the build server.
//!
//! Three endpoints are used:
//!
//! - `POST /uploadChanges.html?userId=..&description=..&commitType=0` with
//!   the raw patch as body; the response body is the changelist id.
//! - `POST /app/rest/buildQueue` with a JSON personal-build request; the
//!   response carries the queued build id.
//! - `GET /app/rest/builds/id:<id>` returning the build's `state` and
//!   `status`.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use remote_run_core::{
    BuildConfig, BuildId, BuildInfo, BuildServer, ChangeListId, Credentials,
};
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, Response, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::{ClientError, Result};

pub const UPLOAD_PATH: &str = "/uploadChanges.html";
pub const BUILD_QUEUE_PATH: &str = "/app/rest/buildQueue";
pub const BUILDS_PATH: &str = "/app/rest/builds";

/// Build server reached over HTTP.
///
/// Credentials travel with each call, so one client can serve several
/// servers or accounts.
pub struct RestBuildServer {
    http: Client,
    user_agent: String,
}

impl RestBuildServer {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .build()?;

        Ok(RestBuildServer {
            http,
            user_agent: config.user_agent.clone(),
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(&ServerConfig::from_env())
    }

    async fn upload(
        &self,
        credentials: &Credentials,
        patch: &Path,
        message: &str,
    ) -> Result<ChangeListId> {
        let url = upload_url(&credentials.server_url, &credentials.user_id, message)?;
        let file = tokio::fs::File::open(patch).await?;
        let length = file.metadata().await?.len();
        info!(url = %url, bytes = length, "uploading patch");

        let response = self
            .http
            .post(url)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, length)
            .body(Body::from(file))
            .send()
            .await?;
        let text = check_status(response).await?.text().await?;

        let id = text.trim();
        if id.is_empty() {
            return Err(ClientError::Decode("empty changelist id".to_string()));
        }
        Ok(ChangeListId(id.to_string()))
    }

    async fn trigger(
        &self,
        credentials: &Credentials,
        change_list: &ChangeListId,
        config: &BuildConfig,
    ) -> Result<BuildId> {
        let url = endpoint(&credentials.server_url, BUILD_QUEUE_PATH)?;
        let request = TriggerRequest::new(change_list, config);
        debug!(url = %url, build_config = %config.id, "queueing personal build");

        let response = self
            .http
            .post(url)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .header(ACCEPT, "application/json")
            .json(&request)
            .send()
            .await?;
        let queued: QueuedResponse = check_status(response).await?.json().await?;
        Ok(queued.id.into_build_id())
    }

    async fn info(&self, credentials: &Credentials, build: &BuildId) -> Result<BuildInfo> {
        let url = build_url(&credentials.server_url, build)?;
        let response = self
            .http
            .get(url)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }
}

impl fmt::Debug for RestBuildServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestBuildServer")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

#[async_trait]
impl BuildServer for RestBuildServer {
    async fn upload_changes(
        &self,
        credentials: &Credentials,
        patch: &Path,
        message: &str,
    ) -> remote_run_core::Result<ChangeListId> {
        Ok(self.upload(credentials, patch, message).await?)
    }

    async fn trigger_build(
        &self,
        credentials: &Credentials,
        change_list: &ChangeListId,
        config: &BuildConfig,
    ) -> remote_run_core::Result<BuildId> {
        Ok(self.trigger(credentials, change_list, config).await?)
    }

    async fn build_info(
        &self,
        credentials: &Credentials,
        build: &BuildId,
    ) -> remote_run_core::Result<BuildInfo> {
        Ok(self.info(credentials, build).await?)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

fn endpoint(server_url: &str, path: &str) -> Result<Url> {
    let raw = format!("{}{}", server_url.trim_end_matches('/'), path);
    Url::parse(&raw).map_err(|e| ClientError::InvalidUrl {
        url: server_url.to_string(),
        reason: e.to_string(),
    })
}

/// Upload endpoint with the owner and description in the query string.
pub fn upload_url(server_url: &str, user_id: &str, message: &str) -> Result<Url> {
    let mut url = endpoint(server_url, UPLOAD_PATH)?;
    url.query_pairs_mut()
        .append_pair("userId", user_id)
        .append_pair("description", message)
        .append_pair("commitType", "0");
    Ok(url)
}

pub fn build_url(server_url: &str, build: &BuildId) -> Result<Url> {
    endpoint(server_url, &format!("{BUILDS_PATH}/id:{build}"))
}

// ── Wire types ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TriggerRequest<'a> {
    personal: bool,
    build_type: BuildTypeRef<'a>,
    last_changes: LastChanges<'a>,
    properties: Properties,
}

#[derive(Debug, Serialize)]
struct BuildTypeRef<'a> {
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct LastChanges<'a> {
    change: Vec<ChangeRef<'a>>,
}

#[derive(Debug, Serialize)]
struct ChangeRef<'a> {
    id: &'a str,
    personal: bool,
}

#[derive(Debug, Serialize)]
struct Properties {
    property: Vec<Property>,
}

#[derive(Debug, Serialize)]
struct Property {
    name: String,
    value: String,
}

impl<'a> TriggerRequest<'a> {
    fn new(change_list: &'a ChangeListId, config: &'a BuildConfig) -> Self {
        TriggerRequest {
            personal: true,
            build_type: BuildTypeRef { id: &config.id },
            last_changes: LastChanges {
                change: vec![ChangeRef {
                    id: &change_list.0,
                    personal: true,
                }],
            },
            properties: Properties {
                property: config
                    .parameters
                    .iter()
                    .map(|p| Property {
                        name: p.qualified_name(),
                        value: p.value.clone(),
                    })
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueuedResponse {
    id: WireId,
}

/// Build ids come back as numbers from some servers and strings from others.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(u64),
    Text(String),
}

impl WireId {
    fn into_build_id(self) -> BuildId {
        match self {
            WireId::Number(n) => BuildId(n.to_string()),
            WireId::Text(s) => BuildId(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote_run_core::{BuildParameter, ParameterKind};

    #[test]
    fn test_upload_url_encodes_query() {
        let url = upload_url("https://ci.example.com/", "17", "fix bug & more").unwrap();
        assert_eq!(url.path(), "/uploadChanges.html");
        assert_eq!(
            url.query(),
            Some("userId=17&description=fix+bug+%26+more&commitType=0")
        );
    }

    #[test]
    fn test_build_url() {
        let url = build_url("https://ci.example.com", &BuildId("42".to_string())).unwrap();
        assert_eq!(url.as_str(), "https://ci.example.com/app/rest/builds/id:42");
    }

    #[test]
    fn test_invalid_server_url() {
        let err = upload_url("not a url", "1", "m").unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl { .. }));
    }

    #[test]
    fn test_trigger_request_shape() {
        let change_list = ChangeListId("cl-9".to_string());
        let config = BuildConfig::new("App_Test")
            .with_parameter(BuildParameter::new(ParameterKind::Env, "CI", "true"))
            .with_parameter(BuildParameter::new(ParameterKind::Config, "branch", "main"));

        let json = serde_json::to_value(TriggerRequest::new(&change_list, &config)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "personal": true,
                "buildType": { "id": "App_Test" },
                "lastChanges": { "change": [{ "id": "cl-9", "personal": true }] },
                "properties": { "property": [
                    { "name": "env.CI", "value": "true" },
                    { "name": "branch", "value": "main" }
                ] }
            })
        );
    }

    #[test]
    fn test_queued_response_accepts_numeric_and_text_ids() {
        let numeric: QueuedResponse =
            serde_json::from_str(r#"{"id": 1234, "state": "queued"}"#).unwrap();
        assert_eq!(numeric.id.into_build_id(), BuildId("1234".to_string()));

        let text: QueuedResponse = serde_json::from_str(r#"{"id": "b-7"}"#).unwrap();
        assert_eq!(text.id.into_build_id(), BuildId("b-7".to_string()));
    }

    #[test]
    fn test_build_info_response_ignores_extra_fields() {
        let info: BuildInfo = serde_json::from_str(
            r#"{"id": 5, "state": "finished", "status": "FAILURE", "webUrl": "https://ci/5"}"#,
        )
        .unwrap();
        assert_eq!(info.terminal_status(), Some("FAILURE"));

        let running: BuildInfo = serde_json::from_str(r#"{"id": 5, "state": "running"}"#).unwrap();
        assert_eq!(running.terminal_status(), None);
    }

    #[test]
    fn test_client_builds_from_config() {
        let server = RestBuildServer::new(&ServerConfig::new("https://ci")).unwrap();
        assert!(format!("{server:?}").contains("remote-run/"));
    }
}
