//! S3 `PutObject` client signed with AWS Signature Version 4.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use pcm_courier_core::{CourierError, Credentials, ObjectStore, StorageClass};

type HmacSha256 = Hmac<Sha256>;

const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date;x-amz-storage-class";

/// Object store backed by Amazon S3 or an S3-compatible endpoint.
///
/// Without an endpoint, requests go to the virtual-hosted AWS URL
/// `https://<bucket>.s3.<region>.amazonaws.com/<key>`; with one, path style
/// `<endpoint>/<bucket>/<key>` is used.
pub struct S3Store {
    client: reqwest::blocking::Client,
    credentials: Credentials,
    region: String,
    endpoint: Option<reqwest::Url>,
}

impl S3Store {
    pub fn new(credentials: Credentials, region: impl Into<String>, endpoint: Option<&str>) -> Result<Self, CourierError> {
        let endpoint = endpoint
            .map(|e| {
                reqwest::Url::parse(e)
                    .map_err(|err| CourierError::ConfigurationFailed(format!("invalid S3 endpoint `{}`: {}", e, err)))
            })
            .transpose()?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| CourierError::ConfigurationFailed(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            credentials,
            region: region.into(),
            endpoint,
        })
    }

    /// Request URL, host header and canonical URI for `bucket`/`key`.
    fn locate(&self, bucket: &str, key: &str) -> (String, String, String) {
        let encoded_key = uri_encode(key, false);
        match &self.endpoint {
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", bucket, self.region);
                let path = format!("/{}", encoded_key);
                (format!("https://{}{}", host, path), host, path)
            }
            Some(endpoint) => {
                let host = match (endpoint.host_str(), endpoint.port()) {
                    (Some(host), Some(port)) => format!("{}:{}", host, port),
                    (Some(host), None) => host.to_string(),
                    (None, _) => String::new(),
                };
                let base = endpoint.path().trim_end_matches('/');
                let path = format!("{}/{}/{}", base, uri_encode(bucket, false), encoded_key);
                (format!("{}://{}{}", endpoint.scheme(), host, path), host, path)
            }
        }
    }
}

impl ObjectStore for S3Store {
    fn put(&self, bucket: &str, key: &str, payload: &[u8], storage_class: StorageClass) -> Result<(), CourierError> {
        let (url, host, canonical_uri) = self.locate(bucket, key);
        let request = SignedPut::new(
            &self.credentials,
            &self.region,
            &host,
            &canonical_uri,
            storage_class,
            payload,
            Utc::now(),
        );

        let response = self
            .client
            .put(&url)
            .header("x-amz-date", &request.amz_date)
            .header("x-amz-content-sha256", &request.payload_hash)
            .header("x-amz-storage-class", storage_class.as_str())
            .header("authorization", request.authorization())
            .body(payload.to_vec())
            .send()
            .map_err(|e| CourierError::Store(format!("PUT {} failed: {}", url, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().unwrap_or_default();
        let detail = body.chars().take(300).collect::<String>();
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CourierError::Credentials(format!("S3 rejected the request ({}): {}", status, detail)));
        }
        Err(CourierError::Store(format!("PUT {} returned {}: {}", key, status, detail)))
    }
}

/// The pieces of a SigV4-signed `PutObject` request.
struct SignedPut {
    amz_date: String,
    payload_hash: String,
    credential: String,
    signature: String,
}

impl SignedPut {
    fn new(
        credentials: &Credentials,
        region: &str,
        host: &str,
        canonical_uri: &str,
        storage_class: StorageClass,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Self {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let payload_hash = hex(&Sha256::digest(payload));

        let canonical = canonical_request(canonical_uri, host, &payload_hash, &amz_date, storage_class.as_str());
        let scope = format!("{}/{}/s3/aws4_request", date, region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex(&Sha256::digest(canonical.as_bytes()))
        );
        let signing_key = signing_key(&credentials.secret_key, &date, region, "s3");
        let signature = hex(&hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        Self {
            amz_date,
            payload_hash,
            credential: format!("{}/{}", credentials.access_key, scope),
            signature,
        }
    }

    fn authorization(&self) -> String {
        format!(
            "AWS4-HMAC-SHA256 Credential={}, SignedHeaders={}, Signature={}",
            self.credential, SIGNED_HEADERS, self.signature
        )
    }
}

fn canonical_request(uri: &str, host: &str, payload_hash: &str, amz_date: &str, storage_class: &str) -> String {
    format!(
        "PUT\n{}\n\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\nx-amz-storage-class:{}\n\n{}\n{}",
        uri, host, payload_hash, amz_date, storage_class, SIGNED_HEADERS, payload_hash
    )
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Percent-encode everything but RFC 3986 unreserved characters; `/` is
/// kept unless `encode_slash`.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
