// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    cryptographic_message_syntax::CmsError, thiserror::Error,
    x509_certificate::X509CertificateError,
};

/// Unified error type for provisioning and trust checking.
#[derive(Debug, Error)]
pub enum AppleProvisionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("X.509 certificate handler error: {0}")]
    X509(#[from] X509CertificateError),

    #[error("CMS error: {0}")]
    Cms(#[from] CmsError),

    #[error("bad API key material: {0}")]
    ApiKey(String),

    /// 401 from the developer account API. Credentials are bad or expired;
    /// retrying without new credentials will not help.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// 403 from the developer account API. The account lacks the entitlement
    /// for the attempted operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// 409 from the developer account API. A resource with the same identity
    /// already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// 400 from the developer account API, carrying the issuer-supplied detail.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Any other non-2xx response. Carries enough context to diagnose.
    /// Request headers are intentionally not captured: the only interesting
    /// one holds the bearer token, which must never end up in logs.
    #[error("[{status}] {method} {url} failed: {body}")]
    Api {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("developer account response missing expected field: {0}")]
    ApiResponseShape(&'static str),

    #[error("key generation error: {0}")]
    KeyGeneration(String),

    #[error("malformed certificate: {0}")]
    MalformedCertificate(String),

    #[error("malformed artifact: {0}")]
    MalformedArtifact(String),

    #[error("error parsing plist: {0}")]
    PlistParse(#[from] plist::Error),

    #[error("unable to create credential bundle: {0}")]
    BundleCreation(String),

    #[error("incorrect password given when decrypting credential bundle")]
    BundleBadPassword,

    #[error("error parsing credential bundle: {0}")]
    BundleParse(String),

    #[error("unknown certificate authority: {0}")]
    UnknownAuthority(String),

    #[error("OCSP responder unavailable: {0}")]
    OcspUnavailable(String),

    #[error("malformed OCSP response: {0}")]
    OcspMalformed(String),
}
