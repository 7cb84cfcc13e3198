//! Webhook signature verification (`X-Hub-Signature: sha1=<hex>`)

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use tracing::{self, debug, warn};

use crate::error::SignatureError;

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature";
const SIGNATURE_PREFIX: &str = "sha1=";

/// Computes the header value a provider sends for `body` signed with `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verifies the raw request body against the provider's signature header.
pub fn validate(
    secret: &str,
    raw_body: &[u8],
    header_signature: Option<&str>,
) -> Result<(), SignatureError> {
    let Some(provided) = header_signature else {
        warn!("Secret configured but no {} header supplied", SIGNATURE_HEADER);
        return Err(SignatureError::Missing);
    };

    let Some(expected) = sign(secret, raw_body) else {
        warn!("Could not initialise HMAC for webhook secret");
        return Err(SignatureError::Mismatch);
    };

    // Constant-time for equal lengths. Only the length can leak.
    if bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
        debug!("Webhook signature validated");
        Ok(())
    } else {
        warn!("Webhook signature mismatch");
        Err(SignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        // RFC 2202, test case 2
        let sig = sign("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(sig, "sha1=effcdf6ae5eb2fa2d27416d5f184df9c259a7c79");
    }

    #[test]
    fn accepts_matching_signature() {
        let body = br#"{"ref":"main"}"#;
        let sig = sign("s3cr3t", body).unwrap();
        assert_eq!(validate("s3cr3t", body, Some(&sig)), Ok(()));
    }

    #[test]
    fn missing_header() {
        assert_eq!(
            validate("s3cr3t", b"{}", None),
            Err(SignatureError::Missing)
        );
    }

    #[test]
    fn rejects_other_values() {
        let body = br#"{"ref":"main"}"#;
        let sig = sign("s3cr3t", body).unwrap();
        assert_eq!(
            validate("s3cr3t", body, Some("thisisabadsignature")),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            validate("other", body, Some(&sig)),
            Err(SignatureError::Mismatch)
        );
        // raw bytes matter: re-encoded whitespace changes the digest
        assert_eq!(
            validate("s3cr3t", br#"{ "ref": "main" }"#, Some(&sig)),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            validate("s3cr3t", body, Some(&sig.to_uppercase())),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(validate("s3cr3t", body, Some("")), Err(SignatureError::Mismatch));
    }
}
