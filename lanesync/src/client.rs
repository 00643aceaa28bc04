//! HTTP client for the remote lane registry.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    Client as ReqwestClient, Method, Response,
    header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Default registry base URL.
pub const DEFAULT_API_URL: &str = "https://sandbox.tripleplaypay.com/api";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response envelope shared by every registry endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub id: Option<String>,
    pub status: bool,
    #[serde(default)]
    pub method: Option<String>,
    pub message: T,
}

/// A lane as the registry knows it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RemoteLane {
    #[serde(default)]
    pub id: Option<String>,
    pub lane_id: String,
    #[serde(default)]
    pub terminal_type: Option<String>,
    #[serde(rename = "terminal_ip_address")]
    pub ip_address: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tpn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_id: Option<String>,
}

/// Body for lane create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneRegistration {
    pub lane_id: String,
    #[serde(rename = "terminal_ip_address")]
    pub ip_address: String,
}

impl LaneRegistration {
    pub fn new(lane_id: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            lane_id: lane_id.into(),
            ip_address: ip_address.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PingReply {
    #[serde(alias = "Result")]
    result: String,
}

#[derive(Debug, Deserialize)]
struct DeleteReply {
    #[serde(rename = "deleted_id", alias = "DeletedId")]
    deleted_id: String,
}

/// Remote lane registry operations.
#[async_trait]
pub trait LaneRegistry: Send + Sync {
    /// Checks that the access key is accepted.
    async fn ping(&self) -> Result<bool>;

    /// Lists every lane registered for the merchant.
    async fn list_lanes(&self) -> Result<Vec<RemoteLane>>;

    /// Fetches one lane.
    async fn get_lane(&self, lane_id: &str) -> Result<RemoteLane>;

    /// Registers a new lane.
    async fn create_lane(&self, lane: &LaneRegistration) -> Result<()>;

    /// Changes the address of a registered lane.
    async fn update_lane(&self, lane: &LaneRegistration) -> Result<()>;

    /// Deletes a lane, returning the id the registry removed.
    async fn delete_lane(&self, lane_id: &str) -> Result<String>;
}

/// Lane registry client authenticated with the merchant access key.
pub struct RegistryClient {
    client: ReqwestClient,
    base_url: String,
    access_key: String,
}

impl RegistryClient {
    /// Creates a client for `base_url`.
    pub fn new(base_url: impl Into<String>, access_key: impl Into<String>) -> Result<Self> {
        let client = ReqwestClient::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_key: access_key.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.access_key)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    async fn request<T, R>(&self, method: Method, path: &str, body: Option<&T>) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "registry request");

        let mut request = self
            .client
            .request(method.clone(), &url)
            .headers(self.default_headers());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        self.handle_response(method, response).await
    }

    async fn handle_response<R: DeserializeOwned>(
        &self,
        method: Method,
        response: Response,
    ) -> Result<R> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "registry request failed");
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: ApiEnvelope<serde_json::Value> = serde_json::from_str(&body)?;
        if !envelope.status {
            return Err(Error::Api {
                method: envelope.method.unwrap_or_else(|| method.to_string()),
                message: envelope.message.to_string(),
            });
        }
        Ok(serde_json::from_value(envelope.message)?)
    }
}

#[async_trait]
impl LaneRegistry for RegistryClient {
    async fn ping(&self) -> Result<bool> {
        let reply: PingReply = self.request::<(), _>(Method::GET, "/ping", None).await?;
        Ok(reply.result == "pong")
    }

    async fn list_lanes(&self) -> Result<Vec<RemoteLane>> {
        self.request::<(), _>(Method::GET, "/terminal/pax-terminals", None)
            .await
    }

    async fn get_lane(&self, lane_id: &str) -> Result<RemoteLane> {
        let path = format!("/terminal/get-pax/{}", lane_id);
        self.request::<(), _>(Method::GET, &path, None).await
    }

    async fn create_lane(&self, lane: &LaneRegistration) -> Result<()> {
        let _: serde_json::Value = self
            .request(Method::POST, "/terminal/add-pax", Some(lane))
            .await?;
        Ok(())
    }

    // The registry upserts on add-pax, so updates share the endpoint.
    async fn update_lane(&self, lane: &LaneRegistration) -> Result<()> {
        let _: serde_json::Value = self
            .request(Method::POST, "/terminal/add-pax", Some(lane))
            .await?;
        Ok(())
    }

    async fn delete_lane(&self, lane_id: &str) -> Result<String> {
        let path = format!("/terminal/delete-pax/{}", lane_id);
        let reply: DeleteReply = self.request::<(), _>(Method::DELETE, &path, None).await?;
        Ok(reply.deleted_id)
    }
}
