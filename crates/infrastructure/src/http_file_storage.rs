use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use milagro_application::FileStorage;
use milagro_core::AppResult;
use milagro_domain::StorageBucket;

use crate::remote_endpoint::{RemoteEndpoint, decode, send};

const LIST_PAGE_SIZE: usize = 100;
const CACHE_CONTROL_SECONDS: u32 = 3600;

/// Object storage over the hosted backend's storage HTTP API.
#[derive(Clone)]
pub struct HttpFileStorage {
    endpoint: RemoteEndpoint,
}

impl HttpFileStorage {
    /// Creates a storage adapter on top of a configured endpoint.
    #[must_use]
    pub fn new(endpoint: RemoteEndpoint) -> Self {
        Self { endpoint }
    }

    fn object_url(&self, prefix: &[&str], bucket: StorageBucket, path: &str) -> url::Url {
        self.endpoint.url(
            prefix
                .iter()
                .copied()
                .chain([bucket.as_str()])
                .chain(path.split('/').filter(|segment| !segment.is_empty())),
        )
    }

    async fn list_folder(&self, bucket: StorageBucket, folder: &str) -> AppResult<Vec<String>> {
        let url = self
            .endpoint
            .url(["storage", "v1", "object", "list", bucket.as_str()]);
        let mut paths = Vec::new();
        let mut offset = 0;

        loop {
            let request = self
                .endpoint
                .service_request(Method::POST, url.clone())
                .json(&json!({
                    "prefix": folder,
                    "limit": LIST_PAGE_SIZE,
                    "offset": offset,
                }));
            let response = send(request, "list storage objects").await?;
            let page: Vec<ListedObject> = decode(response, "list storage objects").await?;
            let page_len = page.len();

            // Entries without an id are nested folders.
            paths.extend(
                page.into_iter()
                    .filter(|object| object.id.is_some())
                    .map(|object| join_path(folder, object.name.as_str())),
            );

            if page_len < LIST_PAGE_SIZE {
                return Ok(paths);
            }
            offset += page_len;
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
    id: Option<String>,
}

fn join_path(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        name.to_owned()
    } else {
        format!("{folder}/{name}")
    }
}

#[async_trait]
impl FileStorage for HttpFileStorage {
    async fn upload(
        &self,
        bucket: StorageBucket,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> AppResult<String> {
        let url = self.object_url(&["storage", "v1", "object"], bucket, path);
        let request = self
            .endpoint
            .service_request(Method::POST, url)
            .header("content-type", content_type)
            .header("cache-control", format!("max-age={CACHE_CONTROL_SECONDS}"))
            .header("x-upsert", "true")
            .body(bytes);

        send(request, "upload object").await?;
        debug!(bucket = %bucket, path, "uploaded object");
        Ok(self.public_url(bucket, path))
    }

    fn public_url(&self, bucket: StorageBucket, path: &str) -> String {
        self.object_url(&["storage", "v1", "object", "public"], bucket, path)
            .to_string()
    }

    async fn remove(&self, bucket: StorageBucket, paths: &[String]) -> AppResult<()> {
        if paths.is_empty() {
            return Ok(());
        }

        let url = self
            .endpoint
            .url(["storage", "v1", "object", bucket.as_str()]);
        let request = self
            .endpoint
            .service_request(Method::DELETE, url)
            .json(&json!({ "prefixes": paths }));

        send(request, "remove objects").await?;
        Ok(())
    }

    async fn remove_prefix(&self, bucket: StorageBucket, prefix: &str) -> AppResult<()> {
        let folder = prefix.trim_end_matches('/');
        let paths = self.list_folder(bucket, folder).await?;
        debug!(bucket = %bucket, prefix, count = paths.len(), "removing objects under prefix");
        self.remove(bucket, &paths).await
    }
}
