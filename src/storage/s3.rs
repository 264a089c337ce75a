//! S3 REST client signed with AWS Signature Version 4
//!
//! Path-style addressing (`<endpoint>/<bucket>/<key>`) so S3-compatible
//! stores work with a custom endpoint. Uploads stream the file with an
//! unsigned payload; the stored size is read back with a HEAD request.

use super::object_store::{ObjectStoreClient, ObjectVersion, PutOptions};
use crate::config::S3BackendConfig;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use reqwest::blocking::{Body, Client, RequestBuilder};
use reqwest::{Method, StatusCode, Url};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const SERVICE: &str = "s3";

pub struct S3Client {
    http: Client,
    endpoint: Url,
    host: String,
    bucket: String,
    region: String,
    access_key: String,
    secret_key: String,
}

impl S3Client {
    pub fn new(config: &S3BackendConfig) -> Result<Self> {
        let raw = config
            .endpoint
            .clone()
            .unwrap_or_else(|| default_endpoint(&config.region));
        let endpoint = Url::parse(raw.trim_end_matches('/'))
            .with_context(|| format!("Invalid S3 endpoint: {}", raw))?;
        let host = host_header(&endpoint)?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            endpoint,
            host,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn bucket_path(&self) -> String {
        format!(
            "{}/{}",
            self.endpoint.path().trim_end_matches('/'),
            utf8_percent_encode(&self.bucket, URI_ENCODE_SET)
        )
    }

    fn object_path(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_path(), encode_object_key(key))
    }

    fn signed_request(
        &self,
        method: Method,
        uri_path: &str,
        query: &[(&str, &str)],
        extra_headers: &[(String, String)],
        payload_hash: &str,
    ) -> Result<RequestBuilder> {
        let now = Utc::now();
        let mut headers: BTreeMap<String, String> = extra_headers.iter().cloned().collect();
        headers.insert("host".to_string(), self.host.clone());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.to_string());
        headers.insert("x-amz-date".to_string(), now.format("%Y%m%dT%H%M%SZ").to_string());

        let canonical_query = canonical_query(query);
        let authorization = build_sigv4_authorization(
            method.as_str(),
            uri_path,
            &canonical_query,
            &headers,
            payload_hash,
            &self.access_key,
            &self.secret_key,
            &self.region,
            now,
        );

        let mut url = self.endpoint.clone();
        url.set_path(uri_path);
        url.set_query(if canonical_query.is_empty() {
            None
        } else {
            Some(&canonical_query)
        });
        debug!("{} {}", method, url);

        let mut request = self.http.request(method, url);
        for (name, value) in headers.iter().filter(|(name, _)| name.as_str() != "host") {
            request = request.header(name.as_str(), value.as_str());
        }
        Ok(request.header("authorization", authorization))
    }

    fn head_size(&self, key: &str) -> Result<u64> {
        let response = self
            .signed_request(Method::HEAD, &self.object_path(key), &[], &[], &hex_sha256(b""))?
            .send()
            .with_context(|| format!("HEAD {} failed", key))?;
        if !response.status().is_success() {
            bail!("HEAD {} returned {}", key, response.status());
        }
        response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .with_context(|| format!("HEAD {} returned no content length", key))
    }
}

impl ObjectStoreClient for S3Client {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn put_file(&self, key: &str, local: &Path, options: &PutOptions) -> Result<u64> {
        let file = File::open(local).with_context(|| format!("Failed to open {:?}", local))?;
        let len = file
            .metadata()
            .with_context(|| format!("Failed to stat {:?}", local))?
            .len();

        let response = self
            .signed_request(
                Method::PUT,
                &self.object_path(key),
                &[],
                &options.headers(),
                UNSIGNED_PAYLOAD,
            )?
            .body(Body::sized(file, len))
            .send()
            .with_context(|| format!("PUT {} failed", key))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("PUT {} returned {}: {}", key, status, body.trim());
        }

        self.head_size(key)
    }

    fn get_to_file(&self, key: &str, dest: &Path) -> Result<Option<u64>> {
        let mut response = self
            .signed_request(Method::GET, &self.object_path(key), &[], &[], &hex_sha256(b""))?
            .send()
            .with_context(|| format!("GET {} failed", key))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            bail!("GET {} returned {}", key, status);
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        let mut file = File::create(dest).with_context(|| format!("Failed to create {:?}", dest))?;
        match response.copy_to(&mut file) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) => {
                drop(file);
                let _ = std::fs::remove_file(dest);
                Err(e).with_context(|| format!("Failed to stream {} to {:?}", key, dest))
            }
        }
    }

    fn list_versions(&self, key: &str) -> Result<Vec<ObjectVersion>> {
        let mut versions = Vec::new();
        let mut markers: Option<(String, String)> = None;

        loop {
            let mut query: Vec<(&str, &str)> = vec![("prefix", key), ("versions", "")];
            if let Some((ref key_marker, ref version_marker)) = markers {
                query.push(("key-marker", key_marker));
                query.push(("version-id-marker", version_marker));
            }

            let response = self
                .signed_request(Method::GET, &self.bucket_path(), &query, &[], &hex_sha256(b""))?
                .send()
                .with_context(|| format!("Listing versions of {} failed", key))?;
            let status = response.status();
            let body = response.text().context("Failed to read version listing")?;
            if !status.is_success() {
                bail!("Listing versions of {} returned {}: {}", key, status, body.trim());
            }

            versions.extend(parse_versions(&body, key));

            if xml_field(&body, "IsTruncated").as_deref() != Some("true") {
                break;
            }
            match (xml_field(&body, "NextKeyMarker"), xml_field(&body, "NextVersionIdMarker")) {
                (Some(k), Some(v)) => markers = Some((k, v)),
                _ => break,
            }
        }

        Ok(versions)
    }
}

fn default_endpoint(region: &str) -> String {
    if region == "us-east-1" {
        "https://s3.amazonaws.com".to_string()
    } else {
        format!("https://s3.{}.amazonaws.com", region)
    }
}

fn host_header(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .with_context(|| format!("S3 endpoint has no host: {}", url))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Percent-encode each path segment of a key, keeping the slashes
pub fn encode_object_key(key: &str) -> String {
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, URI_ENCODE_SET).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            (
                utf8_percent_encode(k, URI_ENCODE_SET).to_string(),
                utf8_percent_encode(v, URI_ENCODE_SET).to_string(),
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

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// `headers` must have lowercase names; all of them are signed
#[allow(clippy::too_many_arguments)]
fn build_sigv4_authorization(
    method: &str,
    uri_path: &str,
    canonical_query: &str,
    headers: &BTreeMap<String, String>,
    payload_hash: &str,
    access_key: &str,
    secret_key: &str,
    region: &str,
    now: DateTime<Utc>,
) -> String {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let scope = format!("{}/{}/{}/aws4_request", date_stamp, region, SERVICE);

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();
    let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method, uri_path, canonical_query, canonical_headers, signed_headers, payload_hash
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let key = derive_signing_key(secret_key, &date_stamp, region, SERVICE);
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        access_key, scope, signed_headers, signature
    )
}

fn version_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<Version>(.*?)</Version>").expect("static regex"))
}

fn xml_field(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml_unescape(&xml[start..end]))
}

fn xml_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Versions of exactly `key` from a ListObjectVersions response
pub fn parse_versions(xml: &str, key: &str) -> Vec<ObjectVersion> {
    version_block_regex()
        .captures_iter(xml)
        .filter_map(|caps| {
            let block = caps.get(1)?.as_str();
            if xml_field(block, "Key")? != key {
                return None;
            }
            Some(ObjectVersion {
                version_id: xml_field(block, "VersionId")?,
                is_latest: xml_field(block, "IsLatest").as_deref() == Some("true"),
                last_modified: xml_field(block, "LastModified").unwrap_or_default(),
            })
        })
        .collect()
}
