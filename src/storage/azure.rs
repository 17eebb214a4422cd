//! Azure Blob Storage backend.
//!
//! Talks to the Blob REST API with `reqwest`.  Containers and blob names
//! are passed through unchanged; the block-blob primitives map one to one:
//!   `stage_block()`       -> Put Block
//!   `commit_block_list()` -> Put Block List (`<Latest>` ids)
//!   `put_blob()`          -> Put Blob (`x-ms-blob-type: BlockBlob`)
//!   `issue_signed_url()`  -> locally signed service SAS
//!
//! Credentials are resolved via:
//!   - `AZURE_STORAGE_KEY` environment variable (Shared Key auth)
//!   - `AZURE_STORAGE_CONNECTION_STRING` environment variable
//!   - `AZURE_STORAGE_SAS_TOKEN` environment variable (SAS token auth)
//!   - the emulator's well-known key when `use_emulator` is set
//!
//! SAS token auth can do everything except mint new signatures.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::utf8_percent_encode;
use reqwest::{Method, StatusCode};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::backend::{BlobContent, BlobItem, BlobProperties, ObjectStore, StoreError, StoreFuture};
use super::sas::{sign_blob_sas, BlobSasRequest, SasPermissions, QUERY_ENCODE_SET};
use crate::config::AzureStorageConfig;
use crate::xml;

/// Azure REST API version used for all requests.
const AZURE_API_VERSION: &str = "2023-11-03";

/// Account name and key published for the local storage emulator.
const EMULATOR_ACCOUNT: &str = "devstoreaccount1";
const EMULATOR_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const EMULATOR_ENDPOINT: &str = "http://127.0.0.1:10000";

/// Percent-encoding set for container and blob path segments: encode
/// everything except unreserved characters and '/'.
const AZURE_BLOB_ENCODE_SET: &percent_encoding::AsciiSet = &percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Object store backed by an Azure storage account.
pub struct AzureBlobStore {
    /// HTTP client for Blob REST API calls.
    client: reqwest::Client,
    /// Storage account name.
    account: String,
    /// Service root, e.g. `https://acct.blob.core.windows.net`.
    base_url: String,
    /// `/{account}` plus any path component of the endpoint; prefix of
    /// every canonicalized resource.
    canonical_prefix: String,
    /// Authentication method.
    auth: AzureAuth,
}

/// Azure authentication method.
enum AzureAuth {
    /// Shared Key authentication using the storage account key.
    SharedKey { key_bytes: Vec<u8> },
    /// SAS token authentication (appended as query parameter).
    SasToken { token: String },
}

/// One Blob REST call, before signing.
struct AzureRequest<'a> {
    operation: &'static str,
    method: Method,
    container: &'a str,
    blob: Option<&'a str>,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    content_type: &'a str,
    body: Option<Bytes>,
}

impl<'a> AzureRequest<'a> {
    fn new(operation: &'static str, method: Method, container: &'a str, blob: Option<&'a str>) -> Self {
        Self {
            operation,
            method,
            container,
            blob,
            query: Vec::new(),
            headers: Vec::new(),
            content_type: "",
            body: None,
        }
    }

    fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    fn body(mut self, content_type: &'a str, body: Bytes) -> Self {
        self.content_type = content_type;
        self.body = Some(body);
        self
    }
}

impl AzureBlobStore {
    /// Create a backend for the account described by `config`.
    ///
    /// Credentials are resolved from the environment (see module docs);
    /// with `use_emulator` and no environment credentials the emulator's
    /// published key is used.
    pub fn new(config: &AzureStorageConfig) -> anyhow::Result<Self> {
        let auth = match Self::resolve_auth()? {
            Some(auth) => auth,
            None if config.use_emulator => AzureAuth::SharedKey {
                key_bytes: BASE64_STANDARD.decode(EMULATOR_KEY)?,
            },
            None => {
                return Err(anyhow::anyhow!(
                    "No Azure credentials found. Set AZURE_STORAGE_KEY, \
                     AZURE_STORAGE_CONNECTION_STRING, or AZURE_STORAGE_SAS_TOKEN."
                ))
            }
        };

        let account = if config.account.is_empty() && config.use_emulator {
            EMULATOR_ACCOUNT.to_string()
        } else {
            config.account.clone()
        };
        if account.is_empty() {
            anyhow::bail!("storage.azure.account must be set");
        }

        let endpoint = if !config.endpoint.is_empty() {
            config.endpoint.clone()
        } else if config.use_emulator {
            format!("{EMULATOR_ENDPOINT}/{account}")
        } else {
            format!("https://{account}.blob.core.windows.net")
        };

        let store = Self::build(
            account,
            &endpoint,
            Duration::from_secs(config.request_timeout_seconds),
            auth,
        )?;

        info!(
            "Azure blob store initialized: account={} endpoint={}",
            store.account, store.base_url
        );
        Ok(store)
    }

    fn build(account: String, endpoint: &str, timeout: Duration, auth: AzureAuth) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        let base_url = endpoint.trim_end_matches('/').to_string();
        let canonical_prefix = format!("/{}{}", account, endpoint_path(&base_url));

        Ok(Self {
            client,
            account,
            base_url,
            canonical_prefix,
            auth,
        })
    }

    /// Resolve Azure authentication from environment variables.
    fn resolve_auth() -> anyhow::Result<Option<AzureAuth>> {
        // 1. Try AZURE_STORAGE_KEY
        if let Ok(key) = std::env::var("AZURE_STORAGE_KEY") {
            let key_bytes = BASE64_STANDARD.decode(&key).map_err(|e| {
                anyhow::anyhow!("Invalid AZURE_STORAGE_KEY (not valid base64): {}", e)
            })?;
            return Ok(Some(AzureAuth::SharedKey { key_bytes }));
        }

        // 2. Try AZURE_STORAGE_CONNECTION_STRING (extract AccountKey)
        if let Ok(conn_str) = std::env::var("AZURE_STORAGE_CONNECTION_STRING") {
            if let Some(key_val) = connection_string_key(&conn_str) {
                let key_bytes = BASE64_STANDARD.decode(key_val).map_err(|e| {
                    anyhow::anyhow!("Invalid AccountKey in connection string: {}", e)
                })?;
                return Ok(Some(AzureAuth::SharedKey { key_bytes }));
            }
        }

        // 3. Try AZURE_STORAGE_SAS_TOKEN
        if let Ok(sas) = std::env::var("AZURE_STORAGE_SAS_TOKEN") {
            return Ok(Some(AzureAuth::SasToken {
                token: strip_sas_prefix(&sas),
            }));
        }

        Ok(None)
    }

    /// Encoded `/{container}[/{blob}]` path.
    fn resource_path(container: &str, blob: Option<&str>) -> String {
        let mut path = format!("/{}", utf8_percent_encode(container, AZURE_BLOB_ENCODE_SET));
        if let Some(blob) = blob {
            path.push('/');
            path.push_str(&utf8_percent_encode(blob, AZURE_BLOB_ENCODE_SET).to_string());
        }
        path
    }

    /// Build the full request URL, appending the SAS token under SAS auth.
    fn request_url(&self, path: &str, query: &[(String, String)]) -> String {
        let mut url = format!("{}{}", self.base_url, path);
        let mut pairs: Vec<String> = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, utf8_percent_encode(v, QUERY_ENCODE_SET)))
            .collect();
        if let AzureAuth::SasToken { token } = &self.auth {
            pairs.push(token.clone());
        }
        if !pairs.is_empty() {
            url.push('?');
            url.push_str(&pairs.join("&"));
        }
        url
    }

    /// Sign a request using Azure Shared Key authentication and return
    /// the Authorization header value.
    ///
    /// The string-to-sign format:
    /// ```text
    /// VERB\n
    /// Content-Encoding\n
    /// Content-Language\n
    /// Content-Length\n
    /// Content-MD5\n
    /// Content-Type\n
    /// Date\n
    /// If-Modified-Since\n
    /// If-Match\n
    /// If-None-Match\n
    /// If-Unmodified-Since\n
    /// Range\n
    /// CanonicalizedHeaders\n
    /// CanonicalizedResource
    /// ```
    fn sign_request(
        &self,
        key_bytes: &[u8],
        method: &Method,
        path: &str,
        content_length: usize,
        content_type: &str,
        date: &str,
        extra_headers: &[(String, String)],
        query_params: &[(String, String)],
    ) -> Result<String, StoreError> {
        let string_to_sign = string_to_sign(
            method.as_str(),
            &format!("{}{}", self.canonical_prefix, path),
            content_length,
            content_type,
            date,
            extra_headers,
            query_params,
        );

        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(key_bytes)
            .map_err(|e| StoreError::Credentials(format!("HMAC key error: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

        Ok(format!("SharedKey {}:{}", self.account, signature))
    }

    /// Get the current UTC date in RFC 1123 format for Azure headers.
    fn rfc1123_date() -> String {
        httpdate::fmt_http_date(std::time::SystemTime::now())
    }

    /// Sign and send `request`.  Transport failures become
    /// [`StoreError::Unavailable`]; the status is left to the caller.
    async fn send(&self, request: AzureRequest<'_>) -> Result<reqwest::Response, StoreError> {
        let path = Self::resource_path(request.container, request.blob);
        let url = self.request_url(&path, &request.query);
        let date = Self::rfc1123_date();
        let body = request.body.unwrap_or_default();

        let mut req = self
            .client
            .request(request.method.clone(), &url)
            .header("x-ms-date", &date)
            .header("x-ms-version", AZURE_API_VERSION);
        for (k, v) in &request.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if !request.content_type.is_empty() {
            req = req.header("Content-Type", request.content_type);
        }

        if let AzureAuth::SharedKey { key_bytes } = &self.auth {
            let auth_header = self.sign_request(
                key_bytes,
                &request.method,
                &path,
                body.len(),
                request.content_type,
                &date,
                &request.headers,
                &request.query,
            )?;
            req = req.header("Authorization", auth_header);
        }
        if request.method == Method::PUT {
            req = req.body(body);
        }

        debug!(
            "Azure {}: {} {}",
            request.operation,
            request.method,
            path
        );

        req.send().await.map_err(|e| {
            StoreError::Unavailable(format!("Azure {} request failed: {}", request.operation, e))
        })
    }

    /// Map a non-success response to a [`StoreError`].
    async fn into_error(
        operation: &'static str,
        container: &str,
        blob: Option<&str>,
        resp: reqwest::Response,
    ) -> StoreError {
        let status = resp.status();
        let error_code = resp
            .headers()
            .get("x-ms-error-code")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = resp.text().await.unwrap_or_default();
        map_azure_error(operation, status, &error_code, &body, container, blob)
    }

    /// Send `request` and turn any non-success status into an error.
    async fn execute(&self, request: AzureRequest<'_>) -> Result<reqwest::Response, StoreError> {
        let operation = request.operation;
        let container = request.container;
        let blob = request.blob;
        let resp = self.send(request).await?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(Self::into_error(operation, container, blob, resp).await)
        }
    }
}

impl ObjectStore for AzureBlobStore {
    fn create_container_if_absent(&self, container: &str) -> StoreFuture<'_, ()> {
        let container = container.to_string();
        Box::pin(async move {
            let req = AzureRequest::new("create_container", Method::PUT, &container, None)
                .query("restype", "container");
            let resp = self.send(req).await?;
            match resp.status() {
                s if s.is_success() => {
                    info!("Azure container created: {}", container);
                    Ok(())
                }
                StatusCode::CONFLICT => Ok(()),
                _ => Err(Self::into_error("create_container", &container, None, resp).await),
            }
        })
    }

    fn put_blob(
        &self,
        container: &str,
        blob: &str,
        data: Bytes,
        content_type: &str,
    ) -> StoreFuture<'_, ()> {
        let container = container.to_string();
        let blob = blob.to_string();
        let content_type = content_type.to_string();
        Box::pin(async move {
            let req = AzureRequest::new("put_blob", Method::PUT, &container, Some(&blob))
                .header("x-ms-blob-type", "BlockBlob")
                .body(&content_type, data);
            self.execute(req).await?;
            Ok(())
        })
    }

    fn stage_block(
        &self,
        container: &str,
        blob: &str,
        block_id: &str,
        data: Bytes,
    ) -> StoreFuture<'_, ()> {
        let container = container.to_string();
        let blob = blob.to_string();
        let block_id = block_id.to_string();
        Box::pin(async move {
            let req = AzureRequest::new("put_block", Method::PUT, &container, Some(&blob))
                .query("comp", "block")
                .query("blockid", &block_id)
                .body("application/octet-stream", data);
            self.execute(req).await?;
            Ok(())
        })
    }

    fn commit_block_list(
        &self,
        container: &str,
        blob: &str,
        block_ids: &[String],
        content_type: &str,
    ) -> StoreFuture<'_, ()> {
        let container = container.to_string();
        let blob = blob.to_string();
        let content_type = content_type.to_string();
        let body = Bytes::from(xml::render_block_list(block_ids));
        Box::pin(async move {
            let req = AzureRequest::new("put_block_list", Method::PUT, &container, Some(&blob))
                .query("comp", "blocklist")
                .header("x-ms-blob-content-type", &content_type)
                .body("application/xml", body);
            self.execute(req).await?;
            Ok(())
        })
    }

    fn get_blob(&self, container: &str, blob: &str) -> StoreFuture<'_, BlobContent> {
        let container = container.to_string();
        let blob = blob.to_string();
        Box::pin(async move {
            let req = AzureRequest::new("get_blob", Method::GET, &container, Some(&blob));
            let resp = self.execute(req).await?;
            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();
            let data = resp.bytes().await.map_err(|e| {
                StoreError::Unavailable(format!("Azure get_blob body read failed: {}", e))
            })?;
            Ok(BlobContent { data, content_type })
        })
    }

    fn get_properties(&self, container: &str, blob: &str) -> StoreFuture<'_, BlobProperties> {
        let container = container.to_string();
        let blob = blob.to_string();
        Box::pin(async move {
            let req = AzureRequest::new("get_properties", Method::HEAD, &container, Some(&blob));
            let resp = self.execute(req).await?;
            Ok(properties_from_headers(resp.headers()))
        })
    }

    fn delete_blob(&self, container: &str, blob: &str) -> StoreFuture<'_, ()> {
        let container = container.to_string();
        let blob = blob.to_string();
        Box::pin(async move {
            let req = AzureRequest::new("delete_blob", Method::DELETE, &container, Some(&blob));
            let resp = self.send(req).await?;
            if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
                return Ok(());
            }
            Err(Self::into_error("delete_blob", &container, Some(&blob), resp).await)
        })
    }

    fn list_blobs(&self, container: &str, prefix: Option<&str>) -> StoreFuture<'_, Vec<BlobItem>> {
        let container = container.to_string();
        let prefix = prefix.map(str::to_string);
        Box::pin(async move {
            let mut items: Vec<BlobItem> = Vec::new();
            let mut marker: Option<String> = None;

            loop {
                let mut req = AzureRequest::new("list_blobs", Method::GET, &container, None)
                    .query("comp", "list")
                    .query("include", "metadata")
                    .query("restype", "container");
                if let Some(ref p) = prefix {
                    req = req.query("prefix", p);
                }
                if let Some(ref m) = marker {
                    req = req.query("marker", m);
                }

                let resp = self.execute(req).await?;
                let status = resp.status().as_u16();
                let body = resp.text().await.map_err(|e| {
                    StoreError::Unavailable(format!("Azure list_blobs body read failed: {}", e))
                })?;
                let page = xml::parse_blob_list(&body).map_err(|message| StoreError::Rejected {
                    operation: "list_blobs",
                    status,
                    message,
                })?;

                items.extend(page.items);
                match page.next_marker {
                    Some(next) => marker = Some(next),
                    None => break,
                }
            }

            debug!("Azure list_blobs: container={} count={}", container, items.len());
            Ok(items)
        })
    }

    fn issue_signed_url(
        &self,
        container: &str,
        blob: &str,
        permissions: SasPermissions,
        starts_on: DateTime<Utc>,
        expires_on: DateTime<Utc>,
    ) -> StoreFuture<'_, String> {
        let result = match &self.auth {
            AzureAuth::SharedKey { key_bytes } => {
                let request = BlobSasRequest {
                    account: &self.account,
                    container,
                    blob,
                    permissions,
                    starts_on,
                    expires_on,
                };
                sign_blob_sas(key_bytes, &request).map(|sas| {
                    format!(
                        "{}{}?{}",
                        self.base_url,
                        Self::resource_path(container, Some(blob)),
                        sas
                    )
                })
            }
            AzureAuth::SasToken { .. } => {
                warn!("Signed URL requested but only a SAS token is configured");
                Err(StoreError::Credentials(
                    "issuing signed URLs requires an account key".to_string(),
                ))
            }
        };
        Box::pin(async move { result })
    }
}

// -- Helpers -----------------------------------------------------------------

/// Path component of an endpoint URL (`""` for a bare host).
fn endpoint_path(base_url: &str) -> &str {
    let without_scheme = base_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(base_url);
    match without_scheme.find('/') {
        Some(idx) => without_scheme[idx..].trim_end_matches('/'),
        None => "",
    }
}

/// Extract `AccountKey=` from a connection string.
fn connection_string_key(conn_str: &str) -> Option<&str> {
    conn_str
        .split(';')
        .find_map(|part| part.trim().strip_prefix("AccountKey="))
}

fn strip_sas_prefix(sas: &str) -> String {
    sas.strip_prefix('?').unwrap_or(sas).to_string()
}

/// Build the Shared Key string to sign.  `resource` is the canonicalized
/// resource path (`/{account}/{container}[/{blob}]`).
fn string_to_sign(
    method: &str,
    resource: &str,
    content_length: usize,
    content_type: &str,
    date: &str,
    extra_headers: &[(String, String)],
    query_params: &[(String, String)],
) -> String {
    // Content-Length is empty for zero-length requests.
    let content_length_str = match content_length {
        0 => String::new(),
        len => len.to_string(),
    };

    // Canonicalized headers: x-ms-* only, lowercased, sorted.
    let mut ms_headers: Vec<(String, String)> = vec![
        ("x-ms-date".to_string(), date.to_string()),
        ("x-ms-version".to_string(), AZURE_API_VERSION.to_string()),
    ];
    for (k, v) in extra_headers {
        let lk = k.to_lowercase();
        if lk.starts_with("x-ms-") && lk != "x-ms-date" && lk != "x-ms-version" {
            ms_headers.push((lk, v.trim().to_string()));
        }
    }
    ms_headers.sort_by(|a, b| a.0.cmp(&b.0));
    let canonicalized_headers = ms_headers
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    let mut canonicalized_resource = resource.to_string();
    let mut sorted_params: Vec<(String, String)> = query_params
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.clone()))
        .collect();
    sorted_params.sort_by(|a, b| a.0.cmp(&b.0));
    for (k, v) in &sorted_params {
        canonicalized_resource.push_str(&format!("\n{}:{}", k, v));
    }

    format!(
        "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}\n{}",
        method, content_length_str, content_type, canonicalized_headers, canonicalized_resource
    )
}

/// Map an Azure HTTP error status to a [`StoreError`].
fn map_azure_error(
    operation: &'static str,
    status: StatusCode,
    error_code: &str,
    body: &str,
    container: &str,
    blob: Option<&str>,
) -> StoreError {
    match status {
        StatusCode::NOT_FOUND => match blob {
            Some(blob) if error_code != "ContainerNotFound" => StoreError::BlobNotFound {
                container: container.to_string(),
                blob: blob.to_string(),
            },
            _ => StoreError::ContainerNotFound {
                container: container.to_string(),
            },
        },
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => {
            StoreError::Unavailable(format!("Azure {}: HTTP {} {}", operation, status, error_code))
        }
        _ => StoreError::Rejected {
            operation,
            status: status.as_u16(),
            message: if error_code.is_empty() {
                body.to_string()
            } else {
                format!("{}: {}", error_code, body)
            },
        },
    }
}

/// Read blob properties from Get Blob Properties response headers.
fn properties_from_headers(headers: &reqwest::header::HeaderMap) -> BlobProperties {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    BlobProperties {
        content_type: header("content-type").unwrap_or_else(|| "application/octet-stream".to_string()),
        content_length: header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        content_md5: header("content-md5"),
        created_on: header("x-ms-creation-time").and_then(|v| xml::parse_http_date(&v)),
        metadata: xml::metadata_from_headers(headers),
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn store(endpoint: &str, auth: AzureAuth) -> AzureBlobStore {
        AzureBlobStore::build("acct".to_string(), endpoint, Duration::from_secs(5), auth).unwrap()
    }

    fn shared_key() -> AzureAuth {
        AzureAuth::SharedKey {
            key_bytes: b"0123456789abcdef".to_vec(),
        }
    }

    #[test]
    fn test_azure_api_version() {
        assert_eq!(AZURE_API_VERSION, "2023-11-03");
    }

    #[test]
    fn test_canonical_prefix_default_endpoint() {
        let s = store("https://acct.blob.core.windows.net", shared_key());
        assert_eq!(s.canonical_prefix, "/acct");
    }

    #[test]
    fn test_canonical_prefix_emulator_endpoint() {
        let s = store("http://127.0.0.1:10000/devstoreaccount1/", shared_key());
        assert_eq!(s.base_url, "http://127.0.0.1:10000/devstoreaccount1");
        assert_eq!(s.canonical_prefix, "/acct/devstoreaccount1");
    }

    #[test]
    fn test_resource_path_encoding() {
        let path = AzureBlobStore::resource_path("uploads", Some("dir/key with spaces.txt"));
        assert_eq!(path, "/uploads/dir/key%20with%20spaces.txt");
        assert_eq!(AzureBlobStore::resource_path("uploads", None), "/uploads");
    }

    #[test]
    fn test_request_url_appends_sas_token() {
        let s = store(
            "https://acct.blob.core.windows.net",
            AzureAuth::SasToken {
                token: "sv=2023-11-03&sig=abc".to_string(),
            },
        );
        let url = s.request_url("/uploads/a.bin", &[("comp".to_string(), "block".to_string())]);
        assert_eq!(
            url,
            "https://acct.blob.core.windows.net/uploads/a.bin?comp=block&sv=2023-11-03&sig=abc"
        );
    }

    #[test]
    fn test_request_url_encodes_block_id() {
        let s = store("https://acct.blob.core.windows.net", shared_key());
        let url = s.request_url(
            "/uploads/a.bin",
            &[("blockid".to_string(), "ab+/cd==".to_string())],
        );
        assert!(url.ends_with("?blockid=ab%2B%2Fcd%3D%3D"));
    }

    #[test]
    fn test_string_to_sign_put_block() {
        let sts = string_to_sign(
            "PUT",
            "/acct/uploads/big.iso",
            4,
            "application/octet-stream",
            "Sun, 01 Mar 2026 12:00:00 GMT",
            &[],
            &[
                ("comp".to_string(), "block".to_string()),
                ("blockid".to_string(), "MDAwMDAw".to_string()),
            ],
        );
        let expected = "PUT\n\n\n4\n\napplication/octet-stream\n\n\n\n\n\n\n\
            x-ms-date:Sun, 01 Mar 2026 12:00:00 GMT\nx-ms-version:2023-11-03\n\
            /acct/uploads/big.iso\nblockid:MDAwMDAw\ncomp:block";
        assert_eq!(sts, expected);
    }

    #[test]
    fn test_string_to_sign_sorts_ms_headers() {
        let sts = string_to_sign(
            "PUT",
            "/acct/uploads/big.iso",
            0,
            "",
            "d",
            &[
                ("x-ms-blob-type".to_string(), "BlockBlob".to_string()),
                ("Content-Language".to_string(), "en".to_string()),
            ],
            &[],
        );
        assert!(sts.starts_with("PUT\n\n\n\n\n\n"));
        assert!(sts.contains("x-ms-blob-type:BlockBlob\nx-ms-date:d\nx-ms-version:2023-11-03\n"));
        assert!(!sts.contains("content-language"));
    }

    #[test]
    fn test_sign_request_format() {
        let s = store("https://acct.blob.core.windows.net", shared_key());
        let AzureAuth::SharedKey { key_bytes } = &s.auth else {
            unreachable!()
        };
        let header = s
            .sign_request(key_bytes, &Method::GET, "/uploads/a.bin", 0, "", "d", &[], &[])
            .unwrap();
        assert!(header.starts_with("SharedKey acct:"));
    }

    #[test]
    fn test_map_azure_error() {
        let err = map_azure_error("get_blob", StatusCode::NOT_FOUND, "BlobNotFound", "", "c", Some("b"));
        assert!(matches!(err, StoreError::BlobNotFound { .. }));

        let err = map_azure_error(
            "get_blob",
            StatusCode::NOT_FOUND,
            "ContainerNotFound",
            "",
            "c",
            Some("b"),
        );
        assert!(matches!(err, StoreError::ContainerNotFound { .. }));

        let err = map_azure_error("put_block", StatusCode::SERVICE_UNAVAILABLE, "ServerBusy", "", "c", None);
        assert!(matches!(err, StoreError::Unavailable(_)));

        let err = map_azure_error(
            "put_block_list",
            StatusCode::BAD_REQUEST,
            "InvalidBlockList",
            "<Error/>",
            "c",
            Some("b"),
        );
        match err {
            StoreError::Rejected { operation, status, message } => {
                assert_eq!(operation, "put_block_list");
                assert_eq!(status, 400);
                assert!(message.starts_with("InvalidBlockList"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_connection_string_key() {
        let conn = "DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=a2V5;EndpointSuffix=core.windows.net";
        assert_eq!(connection_string_key(conn), Some("a2V5"));
        assert_eq!(connection_string_key("AccountName=acct"), None);
    }

    #[test]
    fn test_sas_token_prefix_stripped() {
        assert_eq!(strip_sas_prefix("?sv=2023-11-03&sig=x"), "sv=2023-11-03&sig=x");
        assert_eq!(strip_sas_prefix("sv=2023-11-03&ss=b"), "sv=2023-11-03&ss=b");
    }

    #[test]
    fn test_properties_from_headers() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("content-type", "video/mp4".parse().unwrap());
        headers.insert("content-length", "1024".parse().unwrap());
        headers.insert("content-md5", "1B2M2Y8AsgTpgAmY7PhCfg==".parse().unwrap());
        headers.insert("x-ms-creation-time", "Sun, 01 Mar 2026 12:00:00 GMT".parse().unwrap());
        headers.insert("x-ms-meta-origin", "chunked".parse().unwrap());

        let props = properties_from_headers(&headers);
        assert_eq!(props.content_type, "video/mp4");
        assert_eq!(props.content_length, 1024);
        assert_eq!(props.content_md5.as_deref(), Some("1B2M2Y8AsgTpgAmY7PhCfg=="));
        assert!(props.created_on.is_some());
        assert_eq!(props.metadata.get("origin").unwrap(), "chunked");
    }

    #[tokio::test]
    async fn test_issue_signed_url_shared_key() {
        let s = store("https://acct.blob.core.windows.net", shared_key());
        let start = Utc::now();
        let url = s
            .issue_signed_url("uploads", "a b.bin", SasPermissions::UPLOAD, start, start + ChronoDuration::hours(1))
            .await
            .unwrap();
        assert!(url.starts_with("https://acct.blob.core.windows.net/uploads/a%20b.bin?sv="));
        assert!(url.contains("&sp=cw&"));
    }

    #[tokio::test]
    async fn test_issue_signed_url_requires_account_key() {
        let s = store(
            "https://acct.blob.core.windows.net",
            AzureAuth::SasToken {
                token: "sv=x".to_string(),
            },
        );
        let start = Utc::now();
        let err = s
            .issue_signed_url("uploads", "a.bin", SasPermissions::READ, start, start + ChronoDuration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Credentials(_)));
    }
}
