//! AWS Signature Version 4 query-string presigning.

use chrono::{DateTime, Utc};
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Everything except the unreserved characters `A-Z a-z 0-9 - _ . ~`
const AWS_URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub fn uri_encode(value: &str) -> String {
    utf8_percent_encode(value, AWS_URI_ENCODE_SET).to_string()
}

/// Encode an object key segment by segment, keeping the slashes
pub fn encode_path(path: &str) -> String {
    path.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

pub struct SigningCredentials<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub session_token: Option<&'a str>,
}

pub struct PresignRequest<'a> {
    pub method: &'a str,
    pub scheme: &'a str,
    /// Host header value, including a port when not the default
    pub host: &'a str,
    /// Canonical (already encoded) path starting with `/`
    pub path: &'a str,
    pub region: &'a str,
    pub service: &'a str,
    pub issued_at: DateTime<Utc>,
    pub expires_in: u64,
    /// Additional unencoded query parameters that become part of the signature
    pub extra_query: Vec<(String, String)>,
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Produce a presigned URL for `request`
pub fn presign(
    request: &PresignRequest<'_>,
    credentials: &SigningCredentials<'_>,
) -> Result<String, InvalidLength> {
    let amz_date = request.issued_at.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = &amz_date[..8];
    let scope = format!(
        "{}/{}/{}/aws4_request",
        date_stamp, request.region, request.service
    );

    let mut query: Vec<(String, String)> = vec![
        ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
        (
            "X-Amz-Credential".to_string(),
            format!("{}/{}", credentials.access_key_id, scope),
        ),
        ("X-Amz-Date".to_string(), amz_date.clone()),
        ("X-Amz-Expires".to_string(), request.expires_in.to_string()),
        ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
    ];
    if let Some(token) = credentials.session_token {
        query.push(("X-Amz-Security-Token".to_string(), token.to_string()));
    }
    query.extend(request.extra_query.iter().cloned());

    // Encode keys and values, then sort by encoded key and encoded value
    let mut encoded: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    encoded.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    let canonical_query = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let canonical_headers = format!("host:{}\n", request.host);
    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method, request.path, canonical_query, canonical_headers, "host", UNSIGNED_PAYLOAD
    );

    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let k_date = hmac(
        format!("AWS4{}", credentials.secret_access_key).as_bytes(),
        date_stamp.as_bytes(),
    )?;
    let k_region = hmac(&k_date, request.region.as_bytes())?;
    let k_service = hmac(&k_region, request.service.as_bytes())?;
    let k_signing = hmac(&k_service, b"aws4_request")?;
    let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes())?);

    Ok(format!(
        "{}://{}{}?{}&X-Amz-Signature={}",
        request.scheme, request.host, request.path, canonical_query, signature
    ))
}
