use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::VaultApi;
use crate::error::{VaultError, VaultResult};
use crate::models::{
    ItemFilter, NewVaultItem, SetupVaultRequest, VaultItem, VaultItemPatch, VaultMeta,
    VaultMetaPatch,
};
use crate::settings::ApiSettings;

/// REST client for the vault store.
#[derive(Clone)]
pub struct HttpVaultApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpVaultApi {
    pub fn new(settings: &ApiSettings) -> VaultResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("passlock/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> VaultResult<Response> {
        self.authed(builder)
            .send()
            .await
            .map_err(|e| VaultError::Network(e.to_string()))
    }
}

async fn parse<T: DeserializeOwned>(res: Response) -> VaultResult<T> {
    let body = res.bytes().await.map_err(|e| VaultError::Network(e.to_string()))?;
    Ok(serde_json::from_slice(&body)?)
}

async fn rejected(res: Response) -> VaultError {
    let status = res.status().as_u16();
    let message = res.text().await.unwrap_or_default();
    VaultError::Api { status, message }
}

#[async_trait]
impl VaultApi for HttpVaultApi {
    async fn get_meta(&self) -> VaultResult<Option<VaultMeta>> {
        let res = self.send(self.client.get(self.url("/meta"))).await?;
        match res.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(parse(res).await?)),
            _ => Err(rejected(res).await),
        }
    }

    async fn setup(&self, request: &SetupVaultRequest) -> VaultResult<VaultMeta> {
        let res = self
            .send(self.client.post(self.url("/setup")).json(request))
            .await?;
        match res.status() {
            StatusCode::CONFLICT => Err(VaultError::AlreadyInitialised),
            s if s.is_success() => parse(res).await,
            _ => Err(rejected(res).await),
        }
    }

    async fn patch_meta(&self, patch: &VaultMetaPatch) -> VaultResult<VaultMeta> {
        let res = self
            .send(self.client.patch(self.url("/meta")).json(patch))
            .await?;
        match res.status() {
            StatusCode::CONFLICT => Err(VaultError::VersionConflict {
                expected: patch.expected_version,
            }),
            StatusCode::NOT_FOUND => Err(VaultError::NotInitialised),
            s if s.is_success() => parse(res).await,
            _ => Err(rejected(res).await),
        }
    }

    async fn list_items(&self, filter: &ItemFilter) -> VaultResult<Vec<VaultItem>> {
        let res = self
            .send(
                self.client
                    .get(self.url("/items"))
                    .query(&filter.query_pairs()),
            )
            .await?;
        if !res.status().is_success() {
            return Err(rejected(res).await);
        }
        let mut items: Vec<VaultItem> = parse(res).await?;
        items.retain(|item| filter.matches_query(item));
        debug!(count = items.len(), "listed vault items");
        Ok(items)
    }

    async fn get_item(&self, id: &str) -> VaultResult<VaultItem> {
        let res = self
            .send(self.client.get(self.url(&format!("/items/{id}"))))
            .await?;
        match res.status() {
            StatusCode::NOT_FOUND => Err(VaultError::NotFound(id.to_string())),
            s if s.is_success() => parse(res).await,
            _ => Err(rejected(res).await),
        }
    }

    async fn create_item(&self, item: &NewVaultItem) -> VaultResult<VaultItem> {
        let res = self
            .send(self.client.post(self.url("/items")).json(item))
            .await?;
        if !res.status().is_success() {
            return Err(rejected(res).await);
        }
        parse(res).await
    }

    async fn update_item(&self, id: &str, patch: &VaultItemPatch) -> VaultResult<VaultItem> {
        let res = self
            .send(
                self.client
                    .patch(self.url(&format!("/items/{id}")))
                    .json(patch),
            )
            .await?;
        match res.status() {
            StatusCode::NOT_FOUND => Err(VaultError::NotFound(id.to_string())),
            s if s.is_success() => parse(res).await,
            _ => Err(rejected(res).await),
        }
    }

    async fn delete_item(&self, id: &str) -> VaultResult<()> {
        let res = self
            .send(self.client.delete(self.url(&format!("/items/{id}"))))
            .await?;
        match res.status() {
            StatusCode::NOT_FOUND => Err(VaultError::NotFound(id.to_string())),
            s if s.is_success() => Ok(()),
            _ => Err(rejected(res).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves exactly one canned response and returns the raw request text.
    async fn one_shot(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = stream.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (format!("http://{addr}/vault"), handle)
    }

    fn api(base_url: String) -> HttpVaultApi {
        HttpVaultApi::new(&ApiSettings {
            base_url,
            token: Some("t0ken".into()),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn missing_meta_is_none() {
        let (url, server) = one_shot("404 Not Found", r#"{"detail":"Vault not initialized"}"#).await;
        assert!(api(url).get_meta().await.unwrap().is_none());
        let request = server.await.unwrap();
        assert!(request.starts_with("GET /vault/meta"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer t0ken"));
    }

    #[tokio::test]
    async fn meta_conflict_maps_to_version_conflict() {
        let (url, server) = one_shot("409 Conflict", r#"{"detail":"conflict"}"#).await;
        let patch = VaultMetaPatch {
            kdf_algorithm: "argon2id".into(),
            kdf_params: Default::default(),
            salt: vec![0; 16],
            wrapped_vault_key: vec![1; 48],
            wrap_nonce: vec![2; 12],
            expected_version: 4,
        };
        let err = api(url).patch_meta(&patch).await.unwrap_err();
        assert!(matches!(err, VaultError::VersionConflict { expected: 4 }));
        assert!(server.await.unwrap().starts_with("PATCH /vault/meta"));
    }

    #[tokio::test]
    async fn setup_conflict_is_already_initialised() {
        let (url, server) = one_shot("409 Conflict", "{}").await;
        let req = SetupVaultRequest::argon2id(Default::default(), &[0; 16], &[0; 12], &[0; 48]);
        let err = api(url).setup(&req).await.unwrap_err();
        assert!(matches!(err, VaultError::AlreadyInitialised));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn list_sends_filter_query() {
        let (url, server) = one_shot("200 OK", "[]").await;
        let filter = ItemFilter {
            folder: Some("Work".into()),
            favorite: Some(true),
            query: None,
        };
        assert!(api(url).list_items(&filter).await.unwrap().is_empty());
        let request = server.await.unwrap();
        assert!(request.starts_with("GET /vault/items?folder=Work&favorite=true"));
    }

    #[tokio::test]
    async fn search_query_is_applied_locally() {
        let body = r#"[
            {"id":"1","name":"GitHub","username":"octocat","favorite":false,
             "ciphertext":"AQID","iv":"BAUG",
             "createdAt":"2026-01-01T00:00:00Z","updatedAt":"2026-01-01T00:00:00Z"},
            {"id":"2","name":"Bank","favorite":false,
             "ciphertext":"AQID","iv":"BAUG",
             "createdAt":"2026-01-01T00:00:00Z","updatedAt":"2026-01-01T00:00:00Z"}
        ]"#;
        let (url, server) = one_shot("200 OK", body).await;
        let filter = ItemFilter {
            query: Some("Octo".into()),
            ..ItemFilter::default()
        };
        let items = api(url).list_items(&filter).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "1");
        assert!(server.await.unwrap().starts_with("GET /vault/items HTTP/1.1"));
    }

    #[tokio::test]
    async fn unreachable_server_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = api(format!("http://{addr}/vault")).get_meta().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
