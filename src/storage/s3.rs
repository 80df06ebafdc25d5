// src/storage/s3.rs
//! Minimal S3 REST client (path-style addressing, AWS Signature Version 4).
//!
//! Covers what the remote backend needs: HEAD bucket, GET/PUT/DELETE object and
//! ListObjectsV2 with pagination. Works against AWS S3, Cloudflare R2, MinIO and
//! other S3-compatible endpoints.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone)]
pub struct S3Client {
    http: Client,
    endpoint: Url,
    bucket: String,
    region: String,
    access_key: String,
    secret_key: String,
}

impl std::fmt::Debug for S3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Client")
            .field("endpoint", &self.endpoint.as_str())
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Keys and common prefixes from a ListObjectsV2 walk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Listing {
    pub keys: Vec<String>,
    pub prefixes: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ListBucketResult {
    #[serde(rename = "IsTruncated", default)]
    is_truncated: bool,
    #[serde(rename = "NextContinuationToken", default)]
    next_continuation_token: Option<String>,
    #[serde(rename = "Contents", default)]
    contents: Vec<ListedObject>,
    #[serde(rename = "CommonPrefixes", default)]
    common_prefixes: Vec<CommonPrefix>,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    #[serde(rename = "Key")]
    key: String,
}

#[derive(Debug, Deserialize)]
struct CommonPrefix {
    #[serde(rename = "Prefix")]
    prefix: String,
}

/// The object operations the remote backend relies on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Verifies the bucket exists and the credentials are accepted.
    async fn head_bucket(&self) -> Result<()>;

    /// `Ok(None)` when the object does not exist.
    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    /// Deleting a missing object succeeds.
    async fn delete_object(&self, key: &str) -> Result<()>;

    /// Every key and common prefix under `prefix`, across all pages.
    async fn list(&self, prefix: &str, delimiter: Option<&str>) -> Result<Listing>;
}

impl S3Client {
    pub fn new(
        endpoint: &str,
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        timeout: Duration,
    ) -> Result<Self> {
        if bucket.is_empty() || access_key.is_empty() || secret_key.is_empty() {
            return Err(anyhow!("incomplete S3 credentials"));
        }
        let endpoint = Url::parse(endpoint).with_context(|| format!("invalid S3 endpoint `{endpoint}`"))?;
        if endpoint.host_str().is_none() {
            return Err(anyhow!("S3 endpoint has no host"));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("build S3 http client")?;
        Ok(Self {
            http,
            endpoint,
            bucket: bucket.to_string(),
            region: if region.is_empty() {
                DEFAULT_REGION.to_string()
            } else {
                region.to_string()
            },
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    async fn send(
        &self,
        method: Method,
        key: Option<&str>,
        query: &[(String, String)],
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response> {
        let canonical_uri = self.canonical_uri(key);
        let canonical_query = canonical_query(query);
        let payload_hash = hex::encode(Sha256::digest(&body));
        let amz_date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();

        let headers = vec![
            ("host".to_string(), self.host_header()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        let authorization = authorization_header(&SigningInput {
            method: method.as_str(),
            canonical_uri: &canonical_uri,
            canonical_query: &canonical_query,
            headers: &headers,
            payload_hash: &payload_hash,
            amz_date: &amz_date,
            region: &self.region,
            access_key: &self.access_key,
            secret_key: &self.secret_key,
        });

        let mut url = format!(
            "{}://{}{}",
            self.endpoint.scheme(),
            self.host_header(),
            canonical_uri
        );
        if !canonical_query.is_empty() {
            url.push('?');
            url.push_str(&canonical_query);
        }

        let mut req = self
            .http
            .request(method, &url)
            .header("x-amz-date", amz_date)
            .header("x-amz-content-sha256", payload_hash)
            .header("authorization", authorization);
        if let Some(ct) = content_type {
            req = req.header("content-type", ct);
        }
        req.body(body).send().await.context("S3 request")
    }

    fn host_header(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    fn canonical_uri(&self, key: Option<&str>) -> String {
        let base = self.endpoint.path().trim_end_matches('/');
        let mut uri = format!("{base}/{}", uri_encode(&self.bucket));
        if let Some(key) = key {
            for segment in key.split('/') {
                uri.push('/');
                uri.push_str(&uri_encode(segment));
            }
        }
        uri
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn head_bucket(&self) -> Result<()> {
        let rsp = self.send(Method::HEAD, None, &[], Vec::new(), None).await?;
        if rsp.status().is_success() {
            Ok(())
        } else {
            Err(anyhow!("HEAD bucket `{}` returned {}", self.bucket, rsp.status()))
        }
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let rsp = self.send(Method::GET, Some(key), &[], Vec::new(), None).await?;
        if rsp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let rsp = rsp
            .error_for_status()
            .with_context(|| format!("GET {key}"))?;
        Ok(Some(rsp.bytes().await.context("read object body")?.to_vec()))
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.send(Method::PUT, Some(key), &[], body, Some(content_type))
            .await?
            .error_for_status()
            .with_context(|| format!("PUT {key}"))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let rsp = self.send(Method::DELETE, Some(key), &[], Vec::new(), None).await?;
        if rsp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        rsp.error_for_status()
            .with_context(|| format!("DELETE {key}"))?;
        Ok(())
    }

    async fn list(&self, prefix: &str, delimiter: Option<&str>) -> Result<Listing> {
        let mut out = Listing::default();
        let mut token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("prefix".to_string(), prefix.to_string()),
            ];
            if let Some(d) = delimiter {
                query.push(("delimiter".to_string(), d.to_string()));
            }
            if let Some(t) = &token {
                query.push(("continuation-token".to_string(), t.clone()));
            }

            let body = self
                .send(Method::GET, None, &query, Vec::new(), None)
                .await?
                .error_for_status()
                .context("ListObjectsV2")?
                .text()
                .await
                .context("read listing body")?;
            let page = parse_listing(&body)?;

            out.keys.extend(page.contents.into_iter().map(|o| o.key));
            out.prefixes
                .extend(page.common_prefixes.into_iter().map(|p| p.prefix));

            match (page.is_truncated, page.next_continuation_token) {
                (true, Some(next)) => token = Some(next),
                _ => break,
            }
        }
        Ok(out)
    }
}

fn parse_listing(xml: &str) -> Result<ListBucketResult> {
    quick_xml::de::from_str(xml).context("parse ListObjectsV2 xml")
}

fn uri_encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Query string sorted by key then value, both percent-encoded.
fn canonical_query(params: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

pub(crate) struct SigningInput<'a> {
    pub method: &'a str,
    pub canonical_uri: &'a str,
    pub canonical_query: &'a str,
    /// Lower-case names; signed in sorted order.
    pub headers: &'a [(String, String)],
    pub payload_hash: &'a str,
    /// `YYYYMMDDTHHMMSSZ`
    pub amz_date: &'a str,
    pub region: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
}

pub(crate) fn authorization_header(input: &SigningInput<'_>) -> String {
    let mut headers: Vec<(&str, &str)> = input
        .headers
        .iter()
        .map(|(k, v)| (k.as_str(), v.trim()))
        .collect();
    headers.sort_by(|a, b| a.0.cmp(b.0));

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(k, _)| *k)
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        input.method,
        input.canonical_uri,
        input.canonical_query,
        canonical_headers,
        signed_headers,
        input.payload_hash
    );

    let date = &input.amz_date[..8.min(input.amz_date.len())];
    let scope = format!("{date}/{}/s3/aws4_request", input.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        input.amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac(format!("AWS4{}", input.secret_key).as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, input.region.as_bytes());
    let k_service = hmac(&k_region, b"s3");
    let k_signing = hmac(&k_service, b"aws4_request");
    let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{scope},SignedHeaders={signed_headers},Signature={signature}",
        input.access_key
    )
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(m) => m,
        Err(_) => unreachable!("hmac key length is unrestricted"),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
