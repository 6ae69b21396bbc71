//! PayFast wire protocol: request signing and server-to-server ITN validation.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use md5::{Digest, Md5};

pub const SANDBOX_PROCESS_URL: &str = "https://sandbox.payfast.co.za/eng/process";
pub const SANDBOX_VALIDATE_URL: &str = "https://sandbox.payfast.co.za/eng/query/validate";

#[derive(Debug, Clone)]
pub struct PayFastConfig {
    pub merchant_id: String,
    pub merchant_key: String,
    pub passphrase: Option<String>,
    pub return_url: String,
    pub cancel_url: String,
    pub notify_url: String,
    pub process_url: String,
    pub validate_url: String,
    pub validate_timeout: Duration,
}

impl Default for PayFastConfig {
    fn default() -> Self {
        Self {
            merchant_id: String::new(),
            merchant_key: String::new(),
            passphrase: None,
            return_url: String::new(),
            cancel_url: String::new(),
            notify_url: String::new(),
            process_url: SANDBOX_PROCESS_URL.into(),
            validate_url: SANDBOX_VALIDATE_URL.into(),
            validate_timeout: Duration::from_secs(10),
        }
    }
}

/// Trimmed, form-encoded value with spaces as `+`. `*` is escaped too, as
/// the processor's encoder does.
pub fn encode_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.trim().as_bytes())
        .collect::<String>()
        .replace('*', "%2A")
}

/// `key=value` pairs in key order, empty values dropped, joined with `&`.
pub fn canonical_string(params: &BTreeMap<&str, String>) -> String {
    params
        .iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(k, v)| format!("{}={}", k, encode_value(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// MD5 over the canonical string, with the passphrase appended when set.
/// The passphrase is part of the digest only and never goes on the wire.
pub fn signature(canonical: &str, passphrase: Option<&str>) -> String {
    let mut input = canonical.to_string();
    if let Some(passphrase) = passphrase.filter(|p| !p.trim().is_empty()) {
        input.push_str("&passphrase=");
        input.push_str(&encode_value(passphrase));
    }
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Signed redirect to the processor's hosted payment page.
pub fn payment_url(config: &PayFastConfig, params: &BTreeMap<&str, String>) -> String {
    let canonical = canonical_string(params);
    let signature = signature(&canonical, config.passphrase.as_deref());
    format!("{}?{}&signature={}", config.process_url, canonical, signature)
}

/// First value for `name` in a received form payload.
pub fn field<'a>(payload: &'a [(String, String)], name: &str) -> Option<&'a str> {
    payload
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// Asks the processor whether a notification it supposedly sent is genuine.
#[async_trait]
pub trait ItnValidator: Send + Sync {
    async fn validate(&self, payload: &[(String, String)]) -> anyhow::Result<bool>;
}

/// Posts the payload back to the processor's validation endpoint, which
/// answers with the literal body `VALID` or `INVALID`.
pub struct HttpItnValidator {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpItnValidator {
    pub fn new(client: reqwest::Client, config: &PayFastConfig) -> Self {
        Self {
            client,
            url: config.validate_url.clone(),
            timeout: config.validate_timeout,
        }
    }
}

#[async_trait]
impl ItnValidator for HttpItnValidator {
    async fn validate(&self, payload: &[(String, String)]) -> anyhow::Result<bool> {
        let body = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .form(payload)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(body.trim() == "VALID")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("merchant_id", "10000100".to_string()),
            ("merchant_key", "46f0cd694581a".to_string()),
            ("return_url", "https://example.com/return".to_string()),
            ("cancel_url", String::new()),
            ("name_first", "Buyer".to_string()),
            ("email_address", "buyer@example.com".to_string()),
            ("m_payment_id", "abc".to_string()),
            ("amount", "100.00".to_string()),
            ("item_name", " widget & gadget ".to_string()),
        ])
    }

    const CANONICAL: &str = "amount=100.00&email_address=buyer%40example.com&item_name=widget+%26+gadget\
        &m_payment_id=abc&merchant_id=10000100&merchant_key=46f0cd694581a&name_first=Buyer\
        &return_url=https%3A%2F%2Fexample.com%2Freturn";

    #[test]
    fn canonical_string_is_sorted_encoded_and_skips_blanks() {
        assert_eq!(canonical_string(&sample()), CANONICAL);
    }

    #[test]
    fn spaces_encode_as_plus() {
        assert_eq!(encode_value("a b"), "a+b");
        assert_eq!(encode_value("100%"), "100%25");
        assert_eq!(encode_value("a*b"), "a%2Ab");
    }

    #[test]
    fn signature_matches_reference_digest() {
        assert_eq!(signature(CANONICAL, None), "4bb466f21f7eebe7f554d7275dca8d81");
        assert_eq!(
            signature(CANONICAL, Some("jt7NOE43FZPn")),
            "1104e9ed2fcb4082e82d00411e31d357"
        );
        assert_eq!(signature(CANONICAL, Some("  ")), signature(CANONICAL, None));
    }

    #[test]
    fn payment_url_carries_signature_but_not_passphrase() {
        let config = PayFastConfig {
            passphrase: Some("jt7NOE43FZPn".into()),
            ..PayFastConfig::default()
        };
        let url = payment_url(&config, &sample());
        assert!(url.starts_with(SANDBOX_PROCESS_URL));
        assert!(url.ends_with("&signature=1104e9ed2fcb4082e82d00411e31d357"));
        assert!(!url.contains("passphrase"));
    }

    #[test]
    fn field_finds_first_value() {
        let payload = vec![
            ("m_payment_id".to_string(), "abc".to_string()),
            ("payment_status".to_string(), "COMPLETE".to_string()),
        ];
        assert_eq!(field(&payload, "payment_status"), Some("COMPLETE"));
        assert_eq!(field(&payload, "amount_gross"), None);
    }

    async fn validation_endpoint(answer: &'static str, delay: Duration) -> String {
        use axum::{Router, routing::post};

        let app = Router::new().route(
            "/validate",
            post(move || async move {
                tokio::time::sleep(delay).await;
                answer
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/validate", addr)
    }

    fn validator_for(url: String, timeout: Duration) -> HttpItnValidator {
        let config = PayFastConfig {
            validate_url: url,
            validate_timeout: timeout,
            ..PayFastConfig::default()
        };
        HttpItnValidator::new(reqwest::Client::new(), &config)
    }

    fn itn_payload() -> Vec<(String, String)> {
        vec![
            ("m_payment_id".to_string(), "abc".to_string()),
            ("payment_status".to_string(), "COMPLETE".to_string()),
        ]
    }

    #[tokio::test]
    async fn processor_answers_decide_validity() {
        let url = validation_endpoint("VALID", Duration::ZERO).await;
        let validator = validator_for(url, Duration::from_secs(5));
        assert!(validator.validate(&itn_payload()).await.unwrap());

        let url = validation_endpoint("INVALID", Duration::ZERO).await;
        let validator = validator_for(url, Duration::from_secs(5));
        assert!(!validator.validate(&itn_payload()).await.unwrap());
    }

    #[tokio::test]
    async fn slow_processor_times_out() {
        let url = validation_endpoint("VALID", Duration::from_secs(2)).await;
        let validator = validator_for(url, Duration::from_millis(100));
        assert!(validator.validate(&itn_payload()).await.is_err());
    }
}
