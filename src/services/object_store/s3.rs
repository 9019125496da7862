//! S3-compatible object store client (AWS S3, Cloudflare R2, MinIO).
//!
//! Uses reqwest with manual AWS Signature V4 signing and path-style URLs
//! (`{endpoint}/{bucket}/{key}`).

use super::{ListPage, ListRequest, ObjectStore, ObjectSummary, StoreError, StoreResult};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response, StatusCode};
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, time::Duration};
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct S3Config {
    pub bucket: String,
    /// Base URL without the bucket, e.g. `https://<account>.r2.cloudflarestorage.com`.
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

pub struct S3Store {
    config: S3Config,
    client: Client,
}

impl S3Store {
    pub fn new(config: S3Config) -> StoreResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { config, client })
    }

    fn object_path(&self, key: &str) -> String {
        format!("/{}/{}", self.config.bucket, encode_key(key))
    }

    fn bucket_path(&self) -> String {
        format!("/{}", self.config.bucket)
    }

    /// Sign and send one request. `headers` must use lowercase names.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        extra_headers: &[(&str, String)],
        body: Bytes,
    ) -> StoreResult<Response> {
        let now = Utc::now();
        let date_time = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let payload_hash = hex::encode(Sha256::digest(&body));
        let query_string = canonical_query(query);

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), url_host(&self.config.endpoint));
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert("x-amz-date".to_string(), date_time.clone());
        for (name, value) in extra_headers {
            headers.insert(name.to_string(), value.clone());
        }

        let authorization = self.sign(
            method.as_str(),
            path,
            &query_string,
            &headers,
            &payload_hash,
            &date_time,
            &date,
        );

        let mut url = format!("{}{}", self.config.endpoint.trim_end_matches('/'), path);
        if !query_string.is_empty() {
            url.push('?');
            url.push_str(&query_string);
        }

        let mut request = self.client.request(method, &url);
        for (name, value) in headers.iter().filter(|(name, _)| name.as_str() != "host") {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .header("authorization", authorization)
            .body(body)
            .send()
            .await?;
        Ok(response)
    }

    /// Compute the AWS Signature V4 `Authorization` header value.
    #[allow(clippy::too_many_arguments)]
    fn sign(
        &self,
        method: &str,
        path: &str,
        query: &str,
        headers: &BTreeMap<String, String>,
        payload_hash: &str,
        date_time: &str,
        date: &str,
    ) -> String {
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();
        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, query, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            date_time,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signing_key =
            derive_signing_key(&self.config.secret_access_key, date, &self.config.region);
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        format!(
            "AWS4-HMAC-SHA256 Credential={}/{},SignedHeaders={},Signature={}",
            self.config.access_key_id, credential_scope, signed_headers, signature
        )
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> StoreResult<()> {
        let response = self
            .send(
                Method::PUT,
                &self.object_path(key),
                &[],
                &[("content-type", content_type.to_string())],
                body,
            )
            .await?;
        expect_success("PutObject", response).await?;
        debug!(key, "S3 put complete");
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let response = self
            .send(Method::GET, &self.object_path(key), &[], &[], Bytes::new())
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = expect_success("GetObject", response).await?;
        Ok(Some(response.bytes().await?))
    }

    async fn head(&self, key: &str) -> StoreResult<bool> {
        let response = self
            .send(Method::HEAD, &self.object_path(key), &[], &[], Bytes::new())
            .await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(StoreError::Status {
                operation: "HeadObject",
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }

    async fn list_page(&self, request: &ListRequest) -> StoreResult<ListPage> {
        let mut query: Vec<(&str, &str)> = vec![("list-type", "2"), ("prefix", request.prefix.as_str())];
        if let Some(delimiter) = &request.delimiter {
            query.push(("delimiter", delimiter.as_str()));
        }
        if let Some(token) = &request.continuation_token {
            query.push(("continuation-token", token.as_str()));
        }

        let response = self
            .send(Method::GET, &self.bucket_path(), &query, &[], Bytes::new())
            .await?;
        let body = expect_success("ListObjectsV2", response).await?.text().await?;
        parse_list_response(&body)
    }

    async fn copy(&self, source: &str, destination: &str) -> StoreResult<()> {
        let copy_source = format!("{}/{}", self.config.bucket, encode_key(source));
        let response = self
            .send(
                Method::PUT,
                &self.object_path(destination),
                &[],
                &[("x-amz-copy-source", copy_source)],
                Bytes::new(),
            )
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(source.to_string()));
        }
        // CopyObject can report failure inside a 200 response.
        let body = expect_success("CopyObject", response).await?.text().await?;
        if body.contains("<Error>") {
            return Err(StoreError::Status {
                operation: "CopyObject",
                status: 200,
                body,
            });
        }
        Ok(())
    }

    async fn delete_batch(&self, keys: &[String]) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let body = Bytes::from(build_delete_xml(keys));
        let content_md5 = general_purpose::STANDARD.encode(md5::compute(&body).0);
        let response = self
            .send(
                Method::POST,
                &self.bucket_path(),
                &[("delete", "")],
                &[
                    ("content-md5", content_md5),
                    ("content-type", "application/xml".to_string()),
                ],
                body,
            )
            .await?;
        let result = expect_success("DeleteObjects", response).await?.text().await?;
        let failed = xml_blocks(&result, "Error").len();
        if failed > 0 {
            return Err(StoreError::PartialDelete {
                requested: keys.len(),
                failed,
            });
        }
        debug!(count = keys.len(), "S3 batch delete complete");
        Ok(())
    }
}

async fn expect_success(operation: &'static str, response: Response) -> StoreResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        operation,
        status,
        body,
    })
}

fn derive_signing_key(secret: &str, date: &str, region: &str) -> Vec<u8> {
    let key = format!("AWS4{}", secret);
    let k_date = hmac_sha256(key.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key length ok");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// URI-encode each `/`-separated segment of an object key.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Sorted, encoded query string as required by SigV4 (and sent verbatim).
fn canonical_query(params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            (
                urlencoding::encode(k).into_owned(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect();
    encoded.sort();
    encoded
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn url_host(url: &str) -> String {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_string()
}

fn build_delete_xml(keys: &[String]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Delete><Quiet>true</Quiet>"#);
    for key in keys {
        xml.push_str("<Object><Key>");
        xml.push_str(&xml_escape(key));
        xml.push_str("</Key></Object>");
    }
    xml.push_str("</Delete>");
    xml
}

fn parse_list_response(xml: &str) -> StoreResult<ListPage> {
    let mut objects = Vec::new();
    for block in xml_blocks(xml, "Contents") {
        let key = xml_text(block, "Key")
            .ok_or_else(|| StoreError::Parse("<Contents> without <Key>".into()))?;
        let size_bytes = match xml_text(block, "Size") {
            Some(size) => size
                .parse()
                .map_err(|_| StoreError::Parse(format!("invalid <Size> `{}`", size)))?,
            None => 0,
        };
        objects.push(ObjectSummary { key, size_bytes });
    }

    let common_prefixes = xml_blocks(xml, "CommonPrefixes")
        .into_iter()
        .filter_map(|block| xml_text(block, "Prefix"))
        .collect();

    let truncated = xml_text(xml, "IsTruncated").as_deref() == Some("true");
    let continuation_token = if truncated {
        xml_text(xml, "NextContinuationToken")
    } else {
        None
    };

    Ok(ListPage {
        objects,
        common_prefixes,
        continuation_token,
    })
}

/// Inner text of every `<tag>…</tag>` element, in document order.
fn xml_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut blocks = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find(&open) {
        remaining = &remaining[start + open.len()..];
        match remaining.find(&close) {
            Some(end) => {
                blocks.push(&remaining[..end]);
                remaining = &remaining[end + close.len()..];
            }
            None => break,
        }
    }
    blocks
}

fn xml_text(xml: &str, tag: &str) -> Option<String> {
    xml_blocks(xml, tag).first().map(|text| xml_unescape(text))
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
