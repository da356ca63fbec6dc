//! WebDAV implementation of [`RemoteStore`]
//!
//! `GET`, `PROPFIND` (depth 0) and `MKCOL` go through plain reqwest so the
//! status code decides between "missing" and "broken". Directory listings and
//! uploads use reqwest_dav, which parses multistatus responses for us.

use crate::models::{RemoteEntry, WebDavConfig};
use crate::{RemoteError, RemoteResult, RemoteStore};
use reqwest::{Method, StatusCode};

/// WebDAV client bound to one base URL and one set of credentials
pub struct WebDavStore {
    config: WebDavConfig,
    http: reqwest::Client,
    dav: reqwest_dav::Client,
}

impl WebDavStore {
    /// Create a new store for the given server
    pub fn new(config: WebDavConfig) -> RemoteResult<Self> {
        if config.base_url.trim().is_empty() || config.username.is_empty() {
            return Err(RemoteError::Transport(
                "WebDAV configuration incomplete".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RemoteError::Transport(format!("HTTP client error: {}", e)))?;

        let dav = reqwest_dav::ClientBuilder::new()
            .set_host(config.base_url.trim().trim_end_matches('/').to_string())
            .set_auth(reqwest_dav::Auth::Basic(
                config.username.clone(),
                config.password.clone(),
            ))
            .build()
            .map_err(|e| RemoteError::Transport(format!("WebDAV client error: {:?}", e)))?;

        Ok(Self { config, http, dav })
    }

    /// Checks that the base URL answers a depth-0 PROPFIND
    pub async fn test_connection(&self) -> RemoteResult<bool> {
        self.exists("").await
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.config.url_for(path))
            .basic_auth(&self.config.username, Some(&self.config.password))
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> RemoteResult<reqwest::Response> {
        builder
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))
    }
}

fn dav_method(name: &'static [u8]) -> RemoteResult<Method> {
    Method::from_bytes(name).map_err(|e| RemoteError::Transport(format!("Invalid method: {}", e)))
}

fn status_error(status: StatusCode, path: &str) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RemoteError::Unauthorized(path.to_string())
        }
        other => RemoteError::Http {
            status: other.as_u16(),
            path: path.to_string(),
        },
    }
}

impl RemoteStore for WebDavStore {
    async fn exists(&self, path: &str) -> RemoteResult<bool> {
        let response = self
            .send(self.request(dav_method(b"PROPFIND")?, path).header("Depth", "0"))
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(status_error(status, path)),
        }
    }

    async fn list(&self, path: &str) -> RemoteResult<Option<Vec<RemoteEntry>>> {
        // The listing call cannot tell "missing" from "failed", so ask first
        if !self.exists(path).await? {
            return Ok(None);
        }

        let items = self
            .dav
            .list(path, reqwest_dav::Depth::Number(1))
            .await
            .map_err(|e| RemoteError::Transport(format!("PROPFIND '{}' failed: {:?}", path, e)))?;

        // hrefs are server-absolute paths; the collection itself is part of a depth-1 answer
        let own_href = reqwest::Url::parse(&self.config.url_for(path))
            .map(|url| url.path().trim_end_matches('/').to_string())
            .unwrap_or_default();
        let mut entries = Vec::new();

        for item in items {
            let (href, is_dir) = match item {
                reqwest_dav::list_cmd::ListEntity::File(file) => (file.href, false),
                reqwest_dav::list_cmd::ListEntity::Folder(folder) => (folder.href, true),
            };

            if is_dir && href.trim_end_matches('/') == own_href {
                continue;
            }

            let name = crate::file_name(&href);
            if !name.is_empty() {
                entries.push(RemoteEntry {
                    name: name.to_string(),
                    is_dir,
                });
            }
        }

        entries.sort();
        Ok(Some(entries))
    }

    async fn mkcol(&self, path: &str) -> RemoteResult<()> {
        let response = self.send(self.request(dav_method(b"MKCOL")?, path)).await?;

        match response.status() {
            // 405: collection already exists
            StatusCode::METHOD_NOT_ALLOWED => {
                log::debug!("MKCOL '{}' note: already exists", path);
                Ok(())
            }
            status if status.is_success() => Ok(()),
            status => Err(status_error(status, path)),
        }
    }

    async fn get(&self, path: &str) -> RemoteResult<Option<Vec<u8>>> {
        let response = self.send(self.request(Method::GET, path)).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| RemoteError::Transport(format!("Read response failed: {}", e)))?;
                Ok(Some(bytes.to_vec()))
            }
            status => Err(status_error(status, path)),
        }
    }

    async fn put(&self, path: &str, body: Vec<u8>) -> RemoteResult<()> {
        self.dav
            .put(path, body)
            .await
            .map_err(|e| RemoteError::Transport(format!("PUT '{}' failed: {:?}", path, e)))?;

        log::debug!("Uploaded {}", path);
        Ok(())
    }
}
