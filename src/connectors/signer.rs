// src/connectors/signer.rs
use crate::config::KucoinConfig;
use crate::error::{ExchangeError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use percent_encoding::percent_decode_str;
use reqwest::RequestBuilder;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_API_KEY: &str = "KC-API-KEY";
pub const HEADER_SIGN: &str = "KC-API-SIGN";
pub const HEADER_TIMESTAMP: &str = "KC-API-TIMESTAMP";
pub const HEADER_PASSPHRASE: &str = "KC-API-PASSPHRASE";
pub const HEADER_KEY_VERSION: &str = "KC-API-KEY-VERSION";
pub const KEY_VERSION: &str = "2";

/// The five authentication headers of a KuCoin private request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub api_key: String,
    pub signature: String,
    pub timestamp: String,
    pub passphrase: String,
    pub key_version: &'static str,
}

impl SignedHeaders {
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(HEADER_API_KEY, &self.api_key)
            .header(HEADER_SIGN, &self.signature)
            .header(HEADER_TIMESTAMP, &self.timestamp)
            .header(HEADER_PASSPHRASE, &self.passphrase)
            .header(HEADER_KEY_VERSION, self.key_version)
    }
}

#[derive(Clone)]
pub struct RequestSigner {
    api_key: Option<String>,
    api_secret: Option<String>,
    api_passphrase: Option<String>,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    pub fn new(config: &KucoinConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            api_passphrase: config.api_passphrase.clone(),
        }
    }

    /// Signs with the current time. `path_and_query` is e.g. `/api/v1/position?symbol=XBTUSDTM`.
    pub fn sign(&self, method: &str, path_and_query: &str, body: &str) -> Result<SignedHeaders> {
        self.sign_at(Utc::now().timestamp_millis(), method, path_and_query, body)
    }

    pub fn sign_at(
        &self,
        timestamp_ms: i64,
        method: &str,
        path_and_query: &str,
        body: &str,
    ) -> Result<SignedHeaders> {
        let api_key = required(&self.api_key, "api_key")?;
        let api_secret = required(&self.api_secret, "api_secret")?;
        let api_passphrase = required(&self.api_passphrase, "api_passphrase")?;

        let timestamp = timestamp_ms.to_string();
        let payload = signature_payload(&timestamp, method, path_and_query, body);

        Ok(SignedHeaders {
            api_key: api_key.to_string(),
            signature: create_signature(&payload, api_secret)?,
            timestamp,
            passphrase: create_signature(api_passphrase, api_secret)?,
            key_version: KEY_VERSION,
        })
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ExchangeError::Configuration(format!("missing credential: {}", name))),
    }
}

/// `timestamp + METHOD + unescaped(path?query) + body`
pub fn signature_payload(timestamp: &str, method: &str, path_and_query: &str, body: &str) -> String {
    let unescaped = percent_decode_str(path_and_query).decode_utf8_lossy();
    format!("{}{}{}{}", timestamp, method.to_uppercase(), unescaped, body)
}

/// base64(HMAC-SHA256(payload, secret))
pub fn create_signature(payload: &str, secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.trim().as_bytes())
        .map_err(|e| ExchangeError::Configuration(format!("invalid api secret: {}", e)))?;
    mac.update(payload.trim().as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: Option<&str>) -> KucoinConfig {
        KucoinConfig {
            api_key: Some("test-key".into()),
            api_secret: secret.map(String::from),
            api_passphrase: Some("test-passphrase".into()),
            base_url: "https://api.kucoin.com".into(),
            futures_base_url: "https://api-futures.kucoin.com".into(),
        }
    }

    #[test]
    fn known_signature_vector() {
        let signer = RequestSigner::new(&config(Some("test-secret")));
        let headers = signer
            .sign_at(1_700_000_000_000, "GET", "/api/v1/position?symbol=XBTUSDTM", "")
            .unwrap();

        assert_eq!(headers.signature, "tlf9koc0ACQKfvZOsmuUZ5XsYKO/TS4AxzaHR3Z3ZPI=");
        assert_eq!(headers.passphrase, "UbgWiL7WdjQOVBl1OLuMgUbTl9VlKFsjFbLedtCDPrY=");
        assert_eq!(headers.timestamp, "1700000000000");
        assert_eq!(headers.api_key, "test-key");
        assert_eq!(headers.key_version, "2");
    }

    #[test]
    fn body_is_part_of_the_payload() {
        let signer = RequestSigner::new(&config(Some("test-secret")));
        let headers = signer
            .sign_at(1_700_000_000_000, "post", "/api/v1/orders", r#"{"side":"buy"}"#)
            .unwrap();
        assert_eq!(headers.signature, "tl1GMC7r5egklnMzWKk4eWLzvL21to+qC95629r41Gw=");
    }

    #[test]
    fn signing_is_deterministic() {
        let signer = RequestSigner::new(&config(Some("test-secret")));
        let a = signer.sign_at(42, "GET", "/api/v1/accounts", "").unwrap();
        let b = signer.sign_at(42, "GET", "/api/v1/accounts", "").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn payload_is_unescaped() {
        let payload = signature_payload(
            "1",
            "GET",
            "/api/v1/kline/query?symbol=XBTUSDTM&note=a%3Ab%20c",
            "",
        );
        assert_eq!(payload, "1GET/api/v1/kline/query?symbol=XBTUSDTM&note=a:b c");
    }

    #[test]
    fn missing_secret_fails_fast() {
        let signer = RequestSigner::new(&config(None));
        let err = signer.sign("GET", "/api/v1/accounts", "").unwrap_err();
        assert!(matches!(err, ExchangeError::Configuration(_)));
        assert!(!err.is_transient_http());
    }

    #[test]
    fn blank_secret_counts_as_missing() {
        let signer = RequestSigner::new(&config(Some("   ")));
        assert!(matches!(
            signer.sign("GET", "/api/v1/accounts", ""),
            Err(ExchangeError::Configuration(_))
        ));
    }
}
