//! AWS Signature Version 4 for JSON-over-POST requests.
//!
//! Kinesis accepts every operation as `POST /` with an `X-Amz-Target`
//! header, so the canonical request always has an empty query string and
//! path `/`. Signed headers: `content-type`, `host`, `x-amz-date`,
//! `x-amz-target` and `x-amz-security-token` when a session token is set.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use stream_api::StreamError;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

pub(crate) const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Signing inputs that stay fixed for the lifetime of a transport.
pub(crate) struct RequestSigner<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub session_token: Option<&'a str>,
    pub region: &'a str,
    pub service: &'a str,
}

/// Header values to attach to the outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SignedHeaders {
    pub amz_date: String,
    pub authorization: String,
}

impl RequestSigner<'_> {
    pub fn sign(
        &self,
        host: &str,
        target: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<SignedHeaders, StreamError> {
        let date = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);

        let mut headers: Vec<(&str, &str)> = vec![
            ("content-type", CONTENT_TYPE),
            ("host", host),
            ("x-amz-date", &amz_date),
            ("x-amz-target", target),
        ];
        if let Some(token) = self.session_token {
            headers.push(("x-amz-security-token", token));
        }
        headers.sort_unstable_by(|a, b| a.0.cmp(b.0));

        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{name}:{}\n", value.trim()))
            .collect();
        let signed_headers = headers.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(";");

        let canonical_request = format!(
            "POST\n/\n\n{canonical_headers}\n{signed_headers}\n{}",
            hex_sha256(payload)
        );
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            hex_sha256(canonical_request.as_bytes())
        );

        let key = signing_key(self.secret_access_key, &date, self.region, self.service)?;
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

        Ok(SignedHeaders {
            authorization: format!(
                "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
                self.access_key_id
            ),
            amz_date,
        })
    }
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, StreamError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| StreamError::config(format!("HMAC key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>, StreamError> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    fn signer(session_token: Option<&str>) -> RequestSigner<'_> {
        RequestSigner {
            access_key_id: "AKIDEXAMPLE",
            secret_access_key: SECRET,
            session_token,
            region: "us-east-1",
            service: "kinesis",
        }
    }

    #[test]
    fn test_signing_key_matches_published_vector() {
        let key = signing_key(SECRET, "20150830", "us-east-1", "iam").unwrap();
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn test_list_shards_request_signature() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let signed = signer(None).sign(
            "kinesis.us-east-1.amazonaws.com",
            "Kinesis_20131202.ListShards",
            br#"{"StreamName":"ticks"}"#,
            now,
        )
        .unwrap();

        assert_eq!(signed.amz_date, "20240115T120000Z");
        assert_eq!(
            signed.authorization,
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240115/us-east-1/kinesis/aws4_request, \
             SignedHeaders=content-type;host;x-amz-date;x-amz-target, \
             Signature=49bf8a98aa38c6e30954d803facb0f4cc6b9697b77156f31270a9cd8132b9ea3"
        );
    }

    #[test]
    fn test_session_token_is_signed() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let signed = signer(Some("session-token-example")).sign(
            "kinesis.us-east-1.amazonaws.com",
            "Kinesis_20131202.ListShards",
            br#"{"StreamName":"ticks"}"#,
            now,
        )
        .unwrap();

        assert!(signed.authorization.contains(
            "SignedHeaders=content-type;host;x-amz-date;x-amz-security-token;x-amz-target"
        ));
        assert!(signed.authorization.ends_with(
            "Signature=67c58f3ab30f30c0e7e4d54316a08a6b020efa07b0dfb53272a2d95f5645e396"
        ));
    }

    #[test]
    fn test_payload_hash() {
        assert_eq!(
            hex_sha256(br#"{"StreamName":"ticks"}"#),
            "a5fa3e172d7be7d25142fec71f7b12fb5846a478d76e0153fe038e1b9f354f0c"
        );
    }
}
