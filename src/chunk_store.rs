//! Object storage for chunks and combined recordings.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid object path: {0}")]
    InvalidPath(String),
    #[error("io error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("request for '{path}' failed: {source}")]
    Http {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("storage responded {status} for '{path}': {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Write an object. With `upsert = false` an existing object is an error.
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<(), StoreError>;
}

/// Objects stored as plain files under a root directory
#[derive(Debug, Clone)]
pub struct LocalChunkStore {
    root: PathBuf,
}

impl LocalChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an object path to a file below the root, rejecting anything that escapes it
    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path);
        let is_plain = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !is_plain {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ChunkStore for LocalChunkStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let file = self.resolve(path)?;
        match tokio::fs::read(&file).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.to_string()))
            }
            Err(source) => Err(StoreError::Io {
                path: path.to_string(),
                source,
            }),
        }
    }

    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
        upsert: bool,
    ) -> Result<(), StoreError> {
        let file = self.resolve(path)?;
        let io_err = |source| StoreError::Io {
            path: path.to_string(),
            source,
        };

        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        // Write to a sibling temp file then move it into place so readers never see a
        // partial object
        let tmp = file.with_extension(format!("part-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;

        // hard_link refuses an existing target, so concurrent creates cannot overwrite
        let placed = if upsert {
            tokio::fs::rename(&tmp, &file).await
        } else {
            let linked = tokio::fs::hard_link(&tmp, &file).await;
            let _ = tokio::fs::remove_file(&tmp).await;
            linked
        };
        match placed {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists(path.to_string()))
            }
            Err(source) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(io_err(source))
            }
        }
    }
}

/// Client for a Supabase-style storage HTTP API
///
/// `GET {base_url}/object/{bucket}/{path}` and `POST {base_url}/object/{bucket}/{path}`
/// with an `x-upsert` header, authenticated with a bearer service key.
#[derive(Debug, Clone)]
pub struct HttpChunkStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    api_key: String,
}

impl HttpChunkStore {
    pub fn new(
        base_url: &str,
        bucket: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| StoreError::Http {
                path: base_url.to_string(),
                source,
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn object_url(&self, path: &str) -> String {
        let encoded: Vec<String> = path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!(
            "{}/object/{}/{}",
            self.base_url,
            urlencoding::encode(&self.bucket),
            encoded.join("/")
        )
    }
}

async fn error_for_status(path: &str, response: reqwest::Response) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::NOT_FOUND
        || (status == reqwest::StatusCode::BAD_REQUEST && body.contains("not_found"))
    {
        return StoreError::NotFound(path.to_string());
    }
    if status == reqwest::StatusCode::CONFLICT {
        return StoreError::AlreadyExists(path.to_string());
    }
    StoreError::Status {
        path: path.to_string(),
        status: status.as_u16(),
        body,
    }
}

#[async_trait]
impl ChunkStore for HttpChunkStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let http_err = |source| StoreError::Http {
            path: path.to_string(),
            source,
        };
        let response = self
            .client
            .get(self.object_url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(http_err)?;

        if !response.status().is_success() {
            return Err(error_for_status(path, response).await);
        }
        let bytes = response.bytes().await.map_err(http_err)?;
        Ok(bytes.to_vec())
    }

    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.object_url(path))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", if upsert { "true" } else { "false" })
            .body(bytes)
            .send()
            .await
            .map_err(|source| StoreError::Http {
                path: path.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(error_for_status(path, response).await);
        }
        Ok(())
    }
}
