//! HTTP API client.

use crate::error::{ClientError, ClientResult};
use bytes::Bytes;
use driftsync_core::protocol::{
    ChangesResponse, CreateUploadRequest, CreateUploadResponse, FinalizeUploadResponse,
    PushEventResponse, PutContentResponse, UploadChunkResponse,
};
use driftsync_core::{ClientId, ContentHash, OwnerId, SyncEvent, chunk_data};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

/// Authenticated client for the sync server API.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
    chunk_threshold: u64,
    chunk_size: u64,
}

#[derive(Debug, Deserialize)]
struct WhoAmIResponse {
    owner_id: OwnerId,
}

impl ApiClient {
    /// Create a client against the given base URL.
    pub fn new(
        base_url: &str,
        token: &str,
        chunk_threshold: u64,
        chunk_size: u64,
    ) -> ClientResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Internal(format!("invalid server URL: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            base_url,
            token: token.to_string(),
            chunk_threshold,
            chunk_size,
        })
    }

    fn url(&self, path: &str) -> ClientResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::Internal(format!("failed to build API URL: {e}")))
    }

    async fn check(&self, response: reqwest::Response) -> ClientResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Auth(body));
        }
        Err(ClientError::Api {
            status: status.as_u16(),
            message: body,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> ClientResult<T> {
        let response = req.bearer_auth(&self.token).send().await?;
        let response = self.check(response).await?;
        Ok(response.json().await?)
    }

    /// Ask the server which owner the token authenticates as.
    pub async fn whoami(&self) -> ClientResult<OwnerId> {
        let url = self.url("/v1/auth/whoami")?;
        let response: WhoAmIResponse = self.send_json(self.http.get(url)).await?;
        Ok(response.owner_id)
    }

    /// Push one sync event for resolution.
    pub async fn push_event(&self, event: &SyncEvent) -> ClientResult<PushEventResponse> {
        let url = self.url("/v1/sync/events")?;
        self.send_json(self.http.post(url).json(event)).await
    }

    /// Records changed since the given high-water mark.
    pub async fn get_changes(
        &self,
        since: Option<OffsetDateTime>,
    ) -> ClientResult<ChangesResponse> {
        let mut url = self.url("/v1/sync/changes")?;
        if let Some(since) = since {
            let raw = since
                .format(&Rfc3339)
                .map_err(|e| ClientError::Internal(e.to_string()))?;
            url.query_pairs_mut().append_pair("since", &raw);
        }
        self.send_json(self.http.get(url)).await
    }

    /// Upload file content, chunked above the configured threshold.
    ///
    /// Returns the server-assigned content hash, verified against the
    /// local hash of the uploaded bytes.
    pub async fn upload_content(&self, data: Bytes) -> ClientResult<ContentHash> {
        let local_hash = ContentHash::compute(&data);

        let remote_hash = if (data.len() as u64) < self.chunk_threshold {
            let url = self.url("/v1/content")?;
            let response: PutContentResponse = self
                .send_json(self.http.put(url).body(data))
                .await?;
            response.content_hash
        } else {
            self.upload_chunked(data).await?
        };

        if remote_hash != local_hash {
            return Err(ClientError::ChecksumMismatch {
                expected: local_hash.to_hex(),
                actual: remote_hash.to_hex(),
            });
        }
        Ok(remote_hash)
    }

    async fn upload_chunked(&self, data: Bytes) -> ClientResult<ContentHash> {
        let chunks = chunk_data(&data, self.chunk_size);
        debug!(size = data.len(), total_chunks = chunks.len(), "starting chunked upload");

        let url = self.url("/v1/uploads")?;
        let created: CreateUploadResponse = self
            .send_json(self.http.post(url).json(&CreateUploadRequest {
                total_chunks: chunks.len() as u32,
            }))
            .await?;
        let upload_id = created.upload_id;

        for info in &chunks {
            let start = (info.number as usize) * self.chunk_size as usize;
            let chunk = data.slice(start..start + info.size as usize);

            let url = self.url(&format!(
                "/v1/uploads/{upload_id}/chunks/{}",
                info.number
            ))?;
            let staged: UploadChunkResponse = self
                .send_json(self.http.put(url).body(chunk))
                .await?;
            if staged.chunk_hash != info.hash {
                return Err(ClientError::ChecksumMismatch {
                    expected: info.hash.to_hex(),
                    actual: staged.chunk_hash.to_hex(),
                });
            }
        }

        let url = self.url(&format!("/v1/uploads/{upload_id}/finalize"))?;
        let finalized: FinalizeUploadResponse = self.send_json(self.http.post(url)).await?;
        Ok(finalized.content_hash)
    }

    /// Download a blob, verifying its bytes hash to the requested key.
    ///
    /// A mismatch discards the downloaded data.
    pub async fn download_content(&self, hash: &ContentHash) -> ClientResult<Bytes> {
        let url = self.url(&format!("/v1/content/{}", hash.to_hex()))?;
        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        let response = self.check(response).await?;
        let data = response.bytes().await?;

        let actual = ContentHash::compute(&data);
        if &actual != hash {
            return Err(ClientError::ChecksumMismatch {
                expected: hash.to_hex(),
                actual: actual.to_hex(),
            });
        }
        Ok(data)
    }

    /// Per-cycle liveness probe.
    pub async fn heartbeat(&self, client_id: &ClientId) -> ClientResult<()> {
        let url = self.url("/v1/sync/heartbeat")?;
        let response = self
            .http
            .post(url)
            .json(&json!({ "client_id": client_id }))
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    /// The websocket URL for the push channel.
    pub fn push_channel_url(&self, client_id: &ClientId) -> ClientResult<Url> {
        let mut url = self.url("/v1/sync/ws")?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(ClientError::Internal(format!(
                    "unsupported server URL scheme: {other}"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Internal("failed to set websocket scheme".to_string()))?;
        url.query_pairs_mut()
            .append_pair("client_id", &client_id.to_string());
        Ok(url)
    }

    /// Bearer token, for the push channel handshake.
    pub fn token(&self) -> &str {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_channel_url() {
        let client = ApiClient::new("http://localhost:8080", "t", 1024, 512).unwrap();
        let client_id = ClientId::new();
        let url = client.push_channel_url(&client_id).unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), "/v1/sync/ws");
        assert!(
            url.query()
                .unwrap()
                .contains(&format!("client_id={client_id}"))
        );
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(ApiClient::new("not a url", "t", 1024, 512).is_err());
    }
}
