//! REST client for the chat server's key endpoints.

use async_trait::async_trait;
use chatapp_crypto::{PublicKey, WrappedBlob, WrappedIdentity};
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use super::{
    GroupPublicKeyRequest, GroupPublicKeyResponse, IdentityBundle, KeyDirectory,
    MemberKeyRequest, MemberKeyResponse, RegisterIdentityRequest,
};
use crate::config::DirectoryConfig;
use crate::error::{Error, Result};
use crate::logging::SUBSYSTEM_E2EE;

/// [`KeyDirectory`] backed by the chat server's `/keys/...` REST API.
pub struct HttpKeyDirectory {
    client: Client,
    config: DirectoryConfig,
}

impl HttpKeyDirectory {
    /// Create a new client with the given configuration.
    pub fn new(config: DirectoryConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Directory(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = SUBSYSTEM_E2EE,
            component = "directory",
            base_url = %config.base_url,
            api_prefix = %config.api_prefix,
            "Initializing key directory client"
        );

        Ok(Self { client, config })
    }

    /// Get the current configuration.
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Build `base_url + api_prefix + /keys/<segments...>` with each segment
    /// percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let base = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_prefix.trim_end_matches('/')
        );
        let mut url = Url::parse(&base)
            .map_err(|e| Error::Directory(format!("Invalid directory URL {}: {}", base, e)))?;

        url.path_segments_mut()
            .map_err(|_| Error::Directory(format!("Directory URL cannot be a base: {}", base)))?
            .pop_if_empty()
            .push("keys")
            .extend(segments);

        Ok(url)
    }

    /// Build a POST request with authentication if configured.
    fn build_request(&self, url: Url) -> reqwest::RequestBuilder {
        let mut req = self.client.post(url);

        if let Some(ref token) = self.config.auth_token {
            req = req.bearer_auth(token);
        }

        req
    }

    /// Build a GET request with authentication if configured.
    fn build_get_request(&self, url: Url) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url);

        if let Some(ref token) = self.config.auth_token {
            req = req.bearer_auth(token);
        }

        req
    }

    async fn post_json<B: serde::Serialize + ?Sized>(&self, segments: &[&str], body: &B) -> Result<()> {
        let url = self.url(segments)?;
        let response = self
            .build_request(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Directory(format!("Request failed: {}", e)))?;

        check_status(response).await?;
        Ok(())
    }

    /// GET a JSON document; a 404 means the record does not exist.
    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<Option<T>> {
        let url = self.url(segments)?;
        let response = self
            .build_get_request(url)
            .send()
            .await
            .map_err(|e| Error::Directory(format!("Request failed: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = check_status(response).await?;
        let parsed = response
            .json()
            .await
            .map_err(|e| Error::Directory(format!("Failed to parse response: {}", e)))?;
        Ok(Some(parsed))
    }
}

async fn check_status(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body.chars().take(200).collect::<String>())
    };
    if status == StatusCode::CONFLICT {
        return Err(Error::Conflict(format!("Key directory returned {}", detail)));
    }
    Err(Error::Directory(format!("Key directory returned {}", detail)))
}

#[async_trait]
impl KeyDirectory for HttpKeyDirectory {
    #[instrument(skip(self, identity), fields(subsystem = SUBSYSTEM_E2EE, component = "directory", op = "register_identity"))]
    async fn register_identity(&self, user_id: &str, identity: &WrappedIdentity) -> Result<()> {
        let body = RegisterIdentityRequest {
            user_id,
            identity,
            nonce: identity.encrypted_private_key.nonce_base64(),
        };
        self.post_json(&["user"], &body).await?;
        debug!("Identity registered");
        Ok(())
    }

    #[instrument(skip(self), fields(subsystem = SUBSYSTEM_E2EE, component = "directory", op = "fetch_identity"))]
    async fn fetch_identity(&self, user_id: &str) -> Result<Option<IdentityBundle>> {
        self.get_json(&["user", user_id]).await
    }

    #[instrument(skip(self, public_key), fields(subsystem = SUBSYSTEM_E2EE, component = "directory", op = "publish_group_public_key"))]
    async fn publish_group_public_key(
        &self,
        group_id: &str,
        public_key: &PublicKey,
    ) -> Result<()> {
        let body = GroupPublicKeyRequest {
            group_id,
            group_public_key: public_key,
        };
        self.post_json(&["group-public"], &body).await
    }

    #[instrument(skip(self), fields(subsystem = SUBSYSTEM_E2EE, component = "directory", op = "fetch_group_public_key"))]
    async fn fetch_group_public_key(&self, group_id: &str) -> Result<Option<PublicKey>> {
        let response: Option<GroupPublicKeyResponse> =
            self.get_json(&["group-public", group_id]).await?;
        Ok(response.map(|r| r.group_public_key))
    }

    #[instrument(skip(self, wrapped), fields(subsystem = SUBSYSTEM_E2EE, component = "directory", op = "publish_member_key"))]
    async fn publish_member_key(
        &self,
        group_id: &str,
        member_id: &str,
        wrapped: &WrappedBlob,
    ) -> Result<()> {
        let body = MemberKeyRequest {
            group_id,
            user_id: member_id,
            encrypted_group_private_key: wrapped.to_string(),
            nonce: wrapped.nonce_base64(),
        };
        self.post_json(&["group-member"], &body).await
    }

    #[instrument(skip(self), fields(subsystem = SUBSYSTEM_E2EE, component = "directory", op = "fetch_member_key"))]
    async fn fetch_member_key(&self, group_id: &str, member_id: &str) -> Result<Option<String>> {
        let response: Option<MemberKeyResponse> =
            self.get_json(&["group-member", group_id, member_id]).await?;
        Ok(response.map(|r| r.encrypted_group_private_key))
    }
}
