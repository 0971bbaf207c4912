//! # Webhook Secret Validation
//!
//! Each code host proves knowledge of the registration secret differently:
//!
//! - GitHub and Bitbucket Server sign the raw body with HMAC and send
//!   `algorithm=hexdigest` in `X-Hub-Signature-256` (SHA-256) or
//!   `X-Hub-Signature` (SHA-1).
//! - GitLab echoes the secret verbatim in `X-Gitlab-Token`.
//! - Bitbucket Cloud appends it as a `secret` query parameter.
//! - Azure DevOps does not sign deliveries.
//!
//! All comparisons are constant-time.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::webhooks::CodeHostKind;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_256_HEADER: &str = "x-hub-signature-256";
pub const SIGNATURE_HEADER: &str = "x-hub-signature";
pub const GITLAB_TOKEN_HEADER: &str = "x-gitlab-token";
pub const SECRET_QUERY_PARAM: &str = "secret";

/// Bitbucket Server sends this event unsigned when an admin presses "Test".
pub const BITBUCKET_SERVER_PING: &str = "diagnostics:ping";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("missing required signature header: {header}")]
    MissingSignature { header: &'static str },

    #[error("invalid signature format: {reason}")]
    InvalidSignatureFormat { reason: &'static str },

    #[error("signature verification failed")]
    VerificationFailed,
}

pub type VerificationResult<T> = Result<T, VerificationError>;

/// The parts of an inbound request that carry credentials.
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    pub event_type: &'a str,
    pub headers: &'a HeaderMap,
    pub query_secret: Option<&'a str>,
    pub body: &'a [u8],
}

/// Secret material available for one request.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretSet<'a> {
    /// The addressed registration's own secret.
    pub own: Option<&'a str>,
    /// Every secret registered for the same (kind, url). Only Bitbucket Cloud
    /// consults this.
    pub peers: &'a [String],
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    left.ct_eq(right).into()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// Verify an `algorithm=hexdigest` HMAC signature over `body`.
pub fn verify_hub_signature(body: &[u8], signature: &str, secret: &str) -> VerificationResult<()> {
    let (algorithm, digest_hex) =
        signature
            .split_once('=')
            .ok_or(VerificationError::InvalidSignatureFormat {
                reason: "expected algorithm=hexdigest",
            })?;

    let provided = hex::decode(digest_hex).map_err(|_| VerificationError::InvalidSignatureFormat {
        reason: "digest is not valid hex",
    })?;

    let expected = match algorithm {
        "sha256" => {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .map_err(|_| VerificationError::VerificationFailed)?;
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
        "sha1" => {
            let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
                .map_err(|_| VerificationError::VerificationFailed)?;
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
        _ => {
            return Err(VerificationError::InvalidSignatureFormat {
                reason: "unsupported algorithm",
            });
        }
    };

    if constant_time_eq(&expected, &provided) {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

/// Pick the strongest signature header present.
pub fn hub_signature(headers: &HeaderMap) -> Option<&str> {
    header(headers, SIGNATURE_256_HEADER).or_else(|| header(headers, SIGNATURE_HEADER))
}

/// GitHub and Bitbucket Server. No configured secret means deliveries are
/// accepted unsigned.
pub fn verify_signed_body(
    request: &SignedRequest<'_>,
    secret: Option<&str>,
) -> VerificationResult<()> {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return Ok(());
    };
    let signature = hub_signature(request.headers).ok_or(VerificationError::MissingSignature {
        header: "X-Hub-Signature-256",
    })?;
    verify_hub_signature(request.body, signature, secret)
}

/// GitLab sends the secret itself rather than a signature.
pub fn verify_gitlab_token(headers: &HeaderMap, secret: Option<&str>) -> VerificationResult<()> {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return Ok(());
    };
    let token = header(headers, GITLAB_TOKEN_HEADER).ok_or(VerificationError::MissingSignature {
        header: "X-Gitlab-Token",
    })?;
    if constant_time_eq(token.as_bytes(), secret.as_bytes()) {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

/// Bitbucket Cloud: the query secret must match any secret registered for the
/// same code host. Every candidate is compared so timing does not reveal
/// which one matched.
pub fn verify_query_secret(
    query_secret: Option<&str>,
    candidates: &[String],
) -> VerificationResult<()> {
    let configured: Vec<&String> = candidates.iter().filter(|s| !s.is_empty()).collect();
    if configured.is_empty() {
        return Ok(());
    }
    let provided = query_secret.ok_or(VerificationError::MissingSignature {
        header: "secret query parameter",
    })?;

    let mut matched = subtle::Choice::from(0u8);
    for candidate in configured {
        matched |= provided.as_bytes().ct_eq(candidate.as_bytes());
    }
    if bool::from(matched) {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

/// Validate a request for a registration of the given kind.
pub fn validate(
    kind: CodeHostKind,
    request: &SignedRequest<'_>,
    secrets: SecretSet<'_>,
) -> VerificationResult<()> {
    debug!(code_host = %kind, event_type = request.event_type, body_size = request.body.len(), "Validating webhook secret");
    match kind {
        CodeHostKind::GitHub => verify_signed_body(request, secrets.own),
        CodeHostKind::BitbucketServer => {
            if request.event_type == BITBUCKET_SERVER_PING && hub_signature(request.headers).is_none()
            {
                warn!("Accepting unsigned Bitbucket Server diagnostics ping");
                return Ok(());
            }
            verify_signed_body(request, secrets.own)
        }
        CodeHostKind::GitLab => verify_gitlab_token(request.headers, secrets.own),
        CodeHostKind::BitbucketCloud => {
            let mut candidates: Vec<String> = secrets.peers.to_vec();
            if let Some(own) = secrets.own {
                candidates.push(own.to_string());
            }
            verify_query_secret(request.query_secret, &candidates)
        }
        CodeHostKind::AzureDevOps => Ok(()),
    }
}

#[cfg(test)]
pub(crate) fn sign_sha256(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_sha1(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn request<'a>(event_type: &'a str, headers: &'a HeaderMap, body: &'a [u8]) -> SignedRequest<'a> {
        SignedRequest {
            event_type,
            headers,
            query_secret: None,
            body,
        }
    }

    #[test]
    fn github_sha256_signature_verifies() {
        let body = br#"{"zen":"Keep it logically awesome."}"#;
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_256_HEADER, sign_sha256("s3cret", body).parse().unwrap());
        let secrets = SecretSet {
            own: Some("s3cret"),
            ..Default::default()
        };
        assert!(validate(CodeHostKind::GitHub, &request("ping", &headers, body), secrets).is_ok());
    }

    #[test]
    fn github_sha1_signature_verifies() {
        let body = b"payload";
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, sign_sha1("s3cret", body).parse().unwrap());
        let secrets = SecretSet {
            own: Some("s3cret"),
            ..Default::default()
        };
        assert!(validate(CodeHostKind::GitHub, &request("push", &headers, body), secrets).is_ok());
    }

    #[test]
    fn tampered_body_fails() {
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_256_HEADER, sign_sha256("s3cret", b"a").parse().unwrap());
        let secrets = SecretSet {
            own: Some("s3cret"),
            ..Default::default()
        };
        assert_eq!(
            validate(CodeHostKind::GitHub, &request("push", &headers, b"b"), secrets),
            Err(VerificationError::VerificationFailed)
        );
    }

    #[test]
    fn missing_signature_with_secret_is_rejected() {
        let headers = HeaderMap::new();
        let secrets = SecretSet {
            own: Some("s3cret"),
            ..Default::default()
        };
        assert!(matches!(
            validate(CodeHostKind::GitHub, &request("push", &headers, b"{}"), secrets),
            Err(VerificationError::MissingSignature { .. })
        ));
    }

    #[test]
    fn unsigned_delivery_without_secret_is_accepted() {
        let headers = HeaderMap::new();
        assert!(
            validate(
                CodeHostKind::GitHub,
                &request("push", &headers, b"{}"),
                SecretSet::default()
            )
            .is_ok()
        );
    }

    #[test]
    fn malformed_signature_header_is_rejected() {
        assert!(matches!(
            verify_hub_signature(b"x", "deadbeef", "s"),
            Err(VerificationError::InvalidSignatureFormat { .. })
        ));
        assert!(matches!(
            verify_hub_signature(b"x", "md5=deadbeef", "s"),
            Err(VerificationError::InvalidSignatureFormat { .. })
        ));
        assert!(matches!(
            verify_hub_signature(b"x", "sha256=zz", "s"),
            Err(VerificationError::InvalidSignatureFormat { .. })
        ));
    }

    #[test]
    fn bitbucket_server_ping_is_accepted_unsigned() {
        let headers = HeaderMap::new();
        let secrets = SecretSet {
            own: Some("s3cret"),
            ..Default::default()
        };
        assert!(
            validate(
                CodeHostKind::BitbucketServer,
                &request(BITBUCKET_SERVER_PING, &headers, b"{}"),
                secrets
            )
            .is_ok()
        );
        assert!(
            validate(
                CodeHostKind::BitbucketServer,
                &request("pr:opened", &headers, b"{}"),
                secrets
            )
            .is_err()
        );
    }

    #[test]
    fn gitlab_token_must_match_exactly() {
        let mut headers = HeaderMap::new();
        headers.insert(GITLAB_TOKEN_HEADER, "token".parse().unwrap());
        assert!(verify_gitlab_token(&headers, Some("token")).is_ok());
        assert_eq!(
            verify_gitlab_token(&headers, Some("token2")),
            Err(VerificationError::VerificationFailed)
        );
        assert!(verify_gitlab_token(&HeaderMap::new(), Some("token")).is_err());
    }

    #[test]
    fn bitbucket_cloud_matches_any_peer_secret() {
        let peers = vec!["first".to_string(), "second".to_string()];
        assert!(verify_query_secret(Some("second"), &peers).is_ok());
        assert_eq!(
            verify_query_secret(Some("wrong"), &peers),
            Err(VerificationError::VerificationFailed)
        );
        assert!(verify_query_secret(None, &peers).is_err());
        assert!(verify_query_secret(None, &[]).is_ok());
    }

    #[test]
    fn azure_devops_is_unsigned() {
        let headers = HeaderMap::new();
        let secrets = SecretSet {
            own: Some("ignored"),
            ..Default::default()
        };
        assert!(
            validate(
                CodeHostKind::AzureDevOps,
                &request("git.pullrequest.merged", &headers, b"{}"),
                secrets
            )
            .is_ok()
        );
    }
}
