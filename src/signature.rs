// Author: Jacques Murray

//! Request signing for BCA business endpoints.
//!
//! Every business call carries an `X-BCA-Signature` header: the lowercase hex
//! HMAC-SHA256, keyed with the API secret, of
//!
//! ```text
//! METHOD:relative_url:access_token:hex(sha256(body)):timestamp
//! ```
//!
//! where `relative_url` has its query parameters sorted by name and `body` is
//! the minified JSON body (empty for `GET`).

use chrono::{DateTime, FixedOffset};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Formats a timestamp the way the `X-BCA-Timestamp` header expects,
/// e.g. `2016-02-03T10:00:00.000+07:00`.
pub fn timestamp(at: DateTime<FixedOffset>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string()
}

/// Builds the relative URL that is both signed and requested: `path`
/// followed by the query parameters sorted by name, form-encoded.
pub fn relative_url(path: &str, query: &[(&str, &str)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }

    let mut sorted = query.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(sorted)
        .finish();
    format!("{path}?{encoded}")
}

pub fn string_to_sign(
    method: &str,
    relative_url: &str,
    access_token: &str,
    body: &[u8],
    timestamp: &str,
) -> String {
    let body_digest = hex::encode(Sha256::digest(body));
    format!(
        "{}:{}:{}:{}:{}",
        method.to_ascii_uppercase(),
        relative_url,
        access_token,
        body_digest,
        timestamp
    )
}

/// Lowercase hex HMAC-SHA256 of `string_to_sign` keyed with `api_secret`.
pub fn sign(api_secret: &str, string_to_sign: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(api_secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
    };
    mac.update(string_to_sign.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "lIWOt2p29grUo59bedBUrBY3pnzqQX544LzYPohcGHOuwn8AUEdUKS";
    const SECRET: &str = "22a2d25e-765d-41e1-8d29-da68dcb5698b";
    const TIMESTAMP: &str = "2016-02-03T10:00:00.000+07:00";

    #[test]
    fn test_timestamp_format() {
        let at = DateTime::parse_from_rfc3339("2016-02-03T10:00:00.123+07:00").unwrap();
        assert_eq!(timestamp(at), "2016-02-03T10:00:00.123+07:00");
    }

    #[test]
    fn test_relative_url_sorts_and_encodes_query() {
        assert_eq!(relative_url("/banking/accounts", &[]), "/banking/accounts");
        assert_eq!(
            relative_url(
                "/banking/statements",
                &[("StartDate", "2016-09-01"), ("EndDate", "2016-09-01"), ("Note", "a b")]
            ),
            "/banking/statements?EndDate=2016-09-01&Note=a+b&StartDate=2016-09-01"
        );
    }

    #[test]
    fn test_get_signature() {
        let relative = "/banking/v3/corporates/BCAAPI2016/accounts/0201245680";
        let payload = string_to_sign("get", relative, TOKEN, b"", TIMESTAMP);
        assert_eq!(
            payload,
            format!(
                "GET:{relative}:{TOKEN}:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855:{TIMESTAMP}"
            )
        );
        assert_eq!(
            sign(SECRET, &payload),
            "2984022c684aa5371370cccd86ff48433f64ab85e057d62eb09f42d2e89f63a9"
        );
    }

    #[test]
    fn test_post_signature_hashes_body() {
        let body = br#"{"Amount":"100000.00","CurrencyCode":"IDR"}"#;
        let payload = string_to_sign("POST", "/banking/corporates/transfers", TOKEN, body, TIMESTAMP);
        assert!(payload.contains("015f47bc18aaccb681cc5541e493fa0a6a6b2c8c86de387a34c1051b8e391dc5"));
        assert_eq!(
            sign(SECRET, &payload),
            "925b1045a00a77314888a2a769ff70e7dc1d35ccf67152637cf23f48402e10d9"
        );
    }
}
