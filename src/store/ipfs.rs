//! IPFS-backed content store
//!
//! Uses the daemon's RPC API (`/api/v0/...`, every call is a POST) for
//! identity, adds, name publication and bootstrap management, and the HTTP
//! gateway (`/ipns/<name>`) for downloads.

use super::{ContentId, ContentStore, PeerIdentity};
use crate::utils::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;

/// `/api/v0/id` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdOutput {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    agent_version: Option<String>,
}

/// `/api/v0/add` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddOutput {
    hash: String,
}

/// `/api/v0/name/publish` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PublishOutput {
    name: String,
    value: String,
}

/// Client for a local IPFS node
#[derive(Debug, Clone)]
pub struct IpfsStore {
    client: Client,
    api_url: String,
    gateway_url: String,
}

impl IpfsStore {
    /// Create a store for the daemon at `api_url`, downloading through `gateway_url`
    pub fn new(api_url: impl Into<String>, gateway_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            gateway_url: gateway_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn api(&self, endpoint: &str) -> String {
        format!("{}/api/v0/{}", self.api_url, endpoint)
    }

    /// URL a name is downloaded from
    pub fn gateway_url_for(&self, name: &str) -> String {
        format!("{}/ipns/{}", self.gateway_url, urlencoding::encode(name))
    }

    /// Replace the node's bootstrap peers with `peers`
    pub async fn set_bootstrap_list(&self, peers: &[String]) -> AppResult<()> {
        self.clear_bootstrap_list().await?;

        for peer in peers {
            let response = self
                .client
                .post(self.api("bootstrap/add"))
                .query(&[("arg", peer.as_str())])
                .send()
                .await
                .map_err(|e| AppError::Config(format!("Failed to add bootstrap peer {}: {}", peer, e)))?;
            if !response.status().is_success() {
                return Err(AppError::Config(format!(
                    "Failed to add bootstrap peer {}: status {}",
                    peer,
                    response.status()
                )));
            }
        }

        tracing::info!("Bootstrap list set to {} peers", peers.len());
        Ok(())
    }

    /// Remove every bootstrap peer from the node
    pub async fn clear_bootstrap_list(&self) -> AppResult<()> {
        let response = self
            .client
            .post(self.api("bootstrap/rm/all"))
            .send()
            .await
            .map_err(|e| AppError::Config(format!("Failed to clear bootstrap list: {}", e)))?;
        if !response.status().is_success() {
            return Err(AppError::Config(format!(
                "Failed to clear bootstrap list: status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for IpfsStore {
    async fn identify(&self) -> AppResult<PeerIdentity> {
        let response = self
            .client
            .post(self.api("id"))
            .send()
            .await
            .map_err(|e| AppError::Identity(format!("IPFS node unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Identity(format!(
                "IPFS id request failed with status {}",
                response.status()
            )));
        }

        let output: IdOutput = response
            .json()
            .await
            .map_err(|e| AppError::Identity(format!("Unexpected id response: {}", e)))?;

        Ok(PeerIdentity {
            id: output.id,
            agent: output.agent_version,
        })
    }

    async fn upload(&self, path: &Path) -> AppResult<ContentId> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::Upload(format!("Failed to open file {:?}: {}", path, e)))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());

        let form = Form::new().part("file", Part::bytes(data).file_name(file_name));

        let response = self
            .client
            .post(self.api("add"))
            .query(&[("pin", "true")])
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::Upload(format!("Failed to add {:?} to IPFS: {}", path, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upload(format!(
                "Failed to add {:?} to IPFS: status {}: {}",
                path, status, body
            )));
        }

        let output: AddOutput = response
            .json()
            .await
            .map_err(|e| AppError::Upload(format!("Unexpected add response: {}", e)))?;

        Ok(ContentId::new(output.hash))
    }

    async fn publish(&self, key: &str, content: &ContentId) -> AppResult<()> {
        let target = format!("/ipfs/{}", content);
        let response = self
            .client
            .post(self.api("name/publish"))
            .query(&[("arg", target.as_str()), ("key", key)])
            .send()
            .await
            .map_err(|e| AppError::Publish(format!("Failed to publish {}: {}", content, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Publish(format!(
                "Failed to publish {}: status {}: {}",
                content, status, body
            )));
        }

        let output: PublishOutput = response
            .json()
            .await
            .map_err(|e| AppError::Publish(format!("Unexpected publish response: {}", e)))?;
        tracing::debug!("Published {} as {}", output.value, output.name);

        Ok(())
    }

    async fn download(&self, name: &str, dest: &Path) -> AppResult<()> {
        let url = self.gateway_url_for(name);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Resolution(format!("Failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(AppError::Resolution(format!(
                "Failed to download the file, response code {}",
                response.status().as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Resolution(format!("Failed to read {}: {}", url, e)))?;
        tokio::fs::write(dest, &bytes).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_are_normalized() {
        let store = IpfsStore::new("http://127.0.0.1:5001/", "http://127.0.0.1:8080/");

        assert_eq!(store.api("id"), "http://127.0.0.1:5001/api/v0/id");
        assert_eq!(
            store.gateway_url_for("k51qzi5uqu5d"),
            "http://127.0.0.1:8080/ipns/k51qzi5uqu5d"
        );
    }

    #[test]
    fn test_gateway_url_escapes_name() {
        let store = IpfsStore::new("http://localhost:5001", "http://localhost:8080");
        assert_eq!(
            store.gateway_url_for("a b/c"),
            "http://localhost:8080/ipns/a%20b%2Fc"
        );
    }

    #[test]
    fn test_parse_rpc_responses() {
        let id: IdOutput =
            serde_json::from_str(r#"{"ID":"12D3KooW","AgentVersion":"kubo/0.29.0","Addresses":[]}"#)
                .unwrap();
        assert_eq!(id.id, "12D3KooW");
        assert_eq!(id.agent_version.as_deref(), Some("kubo/0.29.0"));

        let add: AddOutput =
            serde_json::from_str(r#"{"Name":"sample_0.mp4","Hash":"QmHash","Size":"12"}"#).unwrap();
        assert_eq!(add.hash, "QmHash");

        let publish: PublishOutput =
            serde_json::from_str(r#"{"Name":"k51","Value":"/ipfs/QmHash"}"#).unwrap();
        assert_eq!(publish.value, "/ipfs/QmHash");
    }

    #[tokio::test]
    async fn test_unreachable_node_is_identity_error() {
        // Port 9 (discard) is closed on test machines
        let store = IpfsStore::new("http://127.0.0.1:9", "http://127.0.0.1:9");
        let err = store.identify().await.unwrap_err();
        assert!(matches!(err, AppError::Identity(_)));
    }
}
