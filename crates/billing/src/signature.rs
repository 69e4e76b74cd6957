//! Webhook signature verification
//!
//! Both payment processors sign the raw request body with HMAC-SHA256 and send
//! the timestamp and hex digest in a comma separated header:
//!
//! - MercadoPago: `x-signature: ts=<unix-seconds>,v1=<hex>` over `ts:<ts>.<body>`
//! - Stripe: `stripe-signature: t=<unix-seconds>,v1=<hex>[,v0=...]` over `<t>.<body>`
//!
//! Requests older (or newer) than the tolerance window are rejected to stop
//! replays, and digests are compared in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::{Duration, OffsetDateTime};

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Default replay window (5 minutes)
pub const SIGNATURE_TOLERANCE: Duration = Duration::minutes(5);

/// Header layout and signed-payload format of a payment processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    MercadoPago,
    Stripe,
}

impl SignatureScheme {
    fn timestamp_key(&self) -> &'static str {
        match self {
            SignatureScheme::MercadoPago => "ts",
            SignatureScheme::Stripe => "t",
        }
    }

    fn signed_payload(&self, timestamp: &str, body: &str) -> String {
        match self {
            SignatureScheme::MercadoPago => format!("ts:{}.{}", timestamp, body),
            SignatureScheme::Stripe => format!("{}.{}", timestamp, body),
        }
    }
}

/// Parsed signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Timestamp exactly as received; it is part of the signed payload
    pub raw_timestamp: String,
    pub timestamp: i64,
    /// Every `v1` digest in the header (Stripe sends one per active secret)
    pub digests: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(scheme: SignatureScheme, header: &str) -> BillingResult<Self> {
        let mut raw_timestamp: Option<String> = None;
        let mut digests = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            let value = value.trim();
            if key == scheme.timestamp_key() {
                raw_timestamp = Some(value.to_string());
            } else if key == "v1" {
                let digest = hex::decode(value).map_err(|_| {
                    BillingError::WebhookSignatureMalformed("v1 digest is not hex".to_string())
                })?;
                digests.push(digest);
            }
        }

        let raw_timestamp = raw_timestamp.ok_or_else(|| {
            BillingError::WebhookSignatureMalformed("missing timestamp".to_string())
        })?;
        let timestamp: i64 = raw_timestamp.parse().map_err(|_| {
            BillingError::WebhookSignatureMalformed(format!(
                "timestamp is not an integer: {}",
                raw_timestamp
            ))
        })?;

        if digests.is_empty() {
            return Err(BillingError::WebhookSignatureMalformed(
                "missing v1 digest".to_string(),
            ));
        }

        Ok(Self {
            raw_timestamp,
            timestamp,
            digests,
        })
    }
}

/// Verifies signed webhook bodies for one processor
#[derive(Clone)]
pub struct WebhookVerifier {
    scheme: SignatureScheme,
    secret: String,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("scheme", &self.scheme)
            .field("secret", &"[redacted]")
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(scheme: SignatureScheme, secret: impl Into<String>) -> BillingResult<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(BillingError::Config(format!(
                "webhook secret for {:?} is empty",
                scheme
            )));
        }
        Ok(Self {
            scheme,
            secret,
            tolerance: SIGNATURE_TOLERANCE,
        })
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    /// Verify a webhook body against its signature header using the current time
    pub fn verify(&self, body: &str, header: Option<&str>) -> BillingResult<()> {
        self.verify_at(body, header, OffsetDateTime::now_utc())
    }

    /// Verify a webhook body against its signature header at `now`
    pub fn verify_at(&self, body: &str, header: Option<&str>, now: OffsetDateTime) -> BillingResult<()> {
        let header = header
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(BillingError::WebhookSignatureMissing)?;

        let parsed = SignatureHeader::parse(self.scheme, header)?;

        // Header timestamps are untrusted and may sit at the ends of the i64 range
        let age_secs = now.unix_timestamp().saturating_sub(parsed.timestamp);
        if age_secs.unsigned_abs() > self.tolerance.whole_seconds().unsigned_abs() {
            tracing::warn!(
                scheme = ?self.scheme,
                timestamp = parsed.timestamp,
                now = now.unix_timestamp(),
                age_secs = age_secs,
                "Webhook timestamp outside tolerance, possible replay"
            );
            return Err(BillingError::WebhookTimestampExpired { age_secs });
        }

        let expected = self.digest(&parsed.raw_timestamp, body)?;
        let matched = parsed
            .digests
            .iter()
            .any(|received| bool::from(expected.as_slice().ct_eq(received.as_slice())));

        if !matched {
            tracing::warn!(
                scheme = ?self.scheme,
                body_len = body.len(),
                "Webhook signature mismatch"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        Ok(())
    }

    /// Build the header value a processor would send for `body` at `timestamp`
    pub fn sign(&self, body: &str, timestamp: i64) -> BillingResult<String> {
        let raw_timestamp = timestamp.to_string();
        let digest = hex::encode(self.digest(&raw_timestamp, body)?);
        Ok(format!(
            "{}={},v1={}",
            self.scheme.timestamp_key(),
            raw_timestamp,
            digest
        ))
    }

    fn digest(&self, raw_timestamp: &str, body: &str) -> BillingResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| BillingError::Config("invalid webhook secret key".to_string()))?;
        mac.update(self.scheme.signed_payload(raw_timestamp, body).as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
