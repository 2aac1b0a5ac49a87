//! Object-store client abstraction.
//!
//! The object-store storage backend only needs four calls. [`BlobStore`]
//! names them so the backend can be driven by S3 in production and by an
//! in-memory map in tests.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("{op} {key} failed: {message}")]
    Backend {
        op: &'static str,
        key: String,
        message: String,
    },
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Listing entry for a single object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub etag: String,
    pub size: Option<i64>,
}

#[async_trait]
pub trait BlobStore: Send + Sync + fmt::Debug {
    /// Fetch the full body of `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Upload `body` to `key`, returning the ETag the store assigned.
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<String, BlobError>;

    /// List every object whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<HashMap<String, ObjectInfo>, BlobError>;

    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}

/// Strip surrounding double quotes, as stores disagree on whether ETags carry them.
pub fn normalize_etag(etag: &str) -> &str {
    etag.trim_matches('"')
}

/// One page of a paginated listing.
#[derive(Debug, Default)]
pub struct ListPage {
    pub objects: Vec<(String, ObjectInfo)>,
    pub truncated: bool,
    pub next_token: Option<String>,
}

/// Drive a paginated listing to the end, calling `fetch_page` with the
/// continuation token of the previous page.
///
/// A truncated page without a fresh token is an error rather than a restart
/// from the first page.
pub async fn collect_pages<F, Fut>(
    prefix: &str,
    mut fetch_page: F,
) -> Result<HashMap<String, ObjectInfo>, BlobError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<ListPage, BlobError>>,
{
    let mut objects = HashMap::new();
    let mut token: Option<String> = None;

    loop {
        let page = fetch_page(token.clone()).await?;
        objects.extend(page.objects);
        if !page.truncated {
            return Ok(objects);
        }

        match page.next_token {
            Some(next) if token.as_deref() != Some(next.as_str()) => token = Some(next),
            Some(_) => {
                return Err(BlobError::Backend {
                    op: "LIST",
                    key: prefix.to_string(),
                    message: "listing repeated its continuation token".to_string(),
                });
            }
            None => {
                return Err(BlobError::Backend {
                    op: "LIST",
                    key: prefix.to_string(),
                    message: "listing truncated without a continuation token".to_string(),
                });
            }
        }
    }
}

#[cfg(feature = "s3")]
pub use s3_store::S3BlobStore;

#[cfg(feature = "s3")]
mod s3_store {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use aws_config::BehaviorVersion;
    use aws_sdk_s3 as s3;
    use s3::config::Region;
    use s3::primitives::ByteStream;
    use tracing::debug;

    use super::{BlobError, BlobStore, ListPage, ObjectInfo, collect_pages};

    const DEFAULT_REGION: &str = "us-east-1";

    /// [`BlobStore`] backed by S3 or an S3-compatible service.
    ///
    /// Credentials come from the default AWS provider chain.
    #[derive(Debug, Clone)]
    pub struct S3BlobStore {
        client: s3::Client,
        bucket: String,
    }

    impl S3BlobStore {
        pub async fn new(bucket: &str, endpoint: Option<&str>, region: Option<&str>) -> Self {
            let region = Region::new(region.unwrap_or(DEFAULT_REGION).to_string());
            let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                .region(region)
                .load()
                .await;

            let mut builder = s3::config::Builder::from(&sdk_config);
            if let Some(endpoint_url) = endpoint {
                debug!(endpoint = endpoint_url, "Using custom S3 endpoint");
                builder = builder.endpoint_url(endpoint_url).force_path_style(true);
            }

            Self {
                client: s3::Client::from_conf(builder.build()),
                bucket: bucket.to_string(),
            }
        }

        fn backend(op: &'static str, key: &str, err: impl std::fmt::Display) -> BlobError {
            BlobError::Backend {
                op,
                key: key.to_string(),
                message: err.to_string(),
            }
        }
    }

    #[async_trait]
    impl BlobStore for S3BlobStore {
        async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
            let resp = match self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    let service_error = e.into_service_error();
                    if service_error.is_no_such_key() {
                        return Err(BlobError::NotFound(key.to_string()));
                    }
                    return Err(Self::backend("GET", key, service_error));
                }
            };

            let bytes = resp
                .body
                .collect()
                .await
                .map_err(|e| Self::backend("GET", key, e))?;
            Ok(bytes.to_vec())
        }

        async fn put(
            &self,
            key: &str,
            body: Vec<u8>,
            content_type: Option<&str>,
        ) -> Result<String, BlobError> {
            let resp = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(body))
                .set_content_type(content_type.map(str::to_string))
                .send()
                .await
                .map_err(|e| Self::backend("PUT", key, e.into_service_error()))?;

            Ok(resp.e_tag.unwrap_or_default())
        }

        async fn list(&self, prefix: &str) -> Result<HashMap<String, ObjectInfo>, BlobError> {
            let objects = collect_pages(prefix, |token| {
                let request = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(prefix)
                    .set_continuation_token(token);
                async move {
                    let resp = request
                        .send()
                        .await
                        .map_err(|e| Self::backend("LIST", prefix, e.into_service_error()))?;

                    let objects = resp
                        .contents
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|object| {
                            let info = ObjectInfo {
                                etag: object.e_tag.unwrap_or_default(),
                                size: object.size,
                            };
                            object.key.map(|key| (key, info))
                        })
                        .collect();
                    Ok(ListPage {
                        objects,
                        truncated: resp.is_truncated == Some(true),
                        next_token: resp.next_continuation_token,
                    })
                }
            })
            .await?;

            debug!(prefix, count = objects.len(), "Listed objects");
            Ok(objects)
        }

        async fn delete(&self, key: &str) -> Result<(), BlobError> {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| Self::backend("DELETE", key, e.into_service_error()))?;
            Ok(())
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_quotes_are_ignored() {
        assert_eq!(normalize_etag("\"abc\""), "abc");
        assert_eq!(normalize_etag("abc"), "abc");
        assert_eq!(normalize_etag(""), "");
    }

    fn page(keys: &[&str], next: Option<&str>) -> ListPage {
        ListPage {
            objects: keys
                .iter()
                .map(|k| {
                    let info = ObjectInfo {
                        etag: format!("\"{k}\""),
                        size: Some(1),
                    };
                    (k.to_string(), info)
                })
                .collect(),
            truncated: next.is_some(),
            next_token: next.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn pages_are_followed_by_token() {
        let mut seen = Vec::new();
        let objects = collect_pages("p/", |token| {
            seen.push(token.clone());
            let served = match token.as_deref() {
                None => page(&["p/a", "p/b"], Some("t1")),
                Some("t1") => page(&["p/c"], Some("t2")),
                Some("t2") => page(&["p/d"], None),
                Some(other) => panic!("unexpected token {other}"),
            };
            async move { Ok(served) }
        })
        .await
        .unwrap();

        assert_eq!(objects.len(), 4);
        assert_eq!(objects["p/c"].etag, "\"p/c\"");
        assert_eq!(
            seen,
            vec![None, Some("t1".to_string()), Some("t2".to_string())]
        );
    }

    #[tokio::test]
    async fn truncated_page_without_token_stops() {
        let mut calls = 0;
        let err = collect_pages("p/", |_| {
            calls += 1;
            async {
                Ok(ListPage {
                    objects: Vec::new(),
                    truncated: true,
                    next_token: None,
                })
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls, 1);
        assert!(err.to_string().contains("without a continuation token"), "{err}");
    }

    #[tokio::test]
    async fn repeated_token_stops() {
        let mut calls = 0;
        let err = collect_pages("p/", |_| {
            calls += 1;
            async { Ok(page(&["p/a"], Some("same"))) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls, 2);
        assert!(err.to_string().contains("repeated"), "{err}");
    }

    #[tokio::test]
    async fn memory_store_lists_by_prefix() {
        let store = memory::MemoryBlobStore::default();
        store.put("a/one", b"1".to_vec(), None).await.unwrap();
        store.put("b/two", b"2".to_vec(), None).await.unwrap();

        let listed = store.list("a/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed.contains_key("a/one"));

        store.delete("a/one").await.unwrap();
        assert!(store.get("a/one").await.unwrap_err().is_not_found());
    }
}
