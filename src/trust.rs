// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolving the live trust status of a signed artifact.
//!
//! The leaf certificate is pulled out of the artifact, its OCSP responder
//! located, and each Apple CA from the fixed registry is tried in turn as
//! the presumed issuer. The first definitive answer wins; individual CA
//! failures are recorded and the walk continues.

use {
    crate::{
        app_store_connect::default_client,
        artifact::{self, CertificateRecord},
        authority::CertificateAuthorityResolver,
        entitlements::{self, EntitlementSet},
        ocsp::{self, OcspCertStatus},
        AppleProvisionError,
    },
    log::warn,
    reqwest::blocking::Client,
    std::fmt::{Display, Formatter},
    x509_certificate::CapturedX509Certificate,
};

/// A signed artifact whose trust status can be resolved.
pub enum SignedArtifact<'a> {
    /// A CMS-wrapped provisioning profile.
    ProvisioningProfile(&'a [u8]),

    /// A password-encrypted PKCS#12 credential bundle.
    CredentialBundle { data: &'a [u8], password: &'a str },
}

/// Live status of a certificate, as resolved via OCSP.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrustStatus {
    /// A responder vouched for the certificate.
    Enabled,

    /// A responder reported the certificate revoked.
    Revoked,

    /// No CA produced a definitive answer. Carries the last per-CA error
    /// when the walk ended on a failure.
    Unknown { last_error: Option<String> },
}

impl Display for TrustStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enabled => f.write_str("ENABLED"),
            Self::Revoked => f.write_str("REVOKED"),
            Self::Unknown { .. } => f.write_str("UNKNOWN"),
        }
    }
}

/// Outcome of consulting one candidate issuing CA.
pub enum OcspAttempt {
    /// The responder answered for this issuer.
    Definitive(OcspCertStatus),

    /// The CA fetch or the OCSP exchange failed.
    Failed(String),
}

/// Fold per-CA attempts into a final status.
///
/// `Good` and `Revoked` short-circuit. A responder-reported `unknown` is not
/// definitive; it clears any earlier error and the walk continues. Errors
/// are retained so an exhausted walk can say why.
pub fn fold_attempts<I>(attempts: I) -> TrustStatus
where
    I: IntoIterator<Item = OcspAttempt>,
{
    let mut last_error = None;

    for attempt in attempts {
        match attempt {
            OcspAttempt::Definitive(OcspCertStatus::Good) => return TrustStatus::Enabled,
            OcspAttempt::Definitive(OcspCertStatus::Revoked) => return TrustStatus::Revoked,
            OcspAttempt::Definitive(OcspCertStatus::Unknown) => {
                last_error = None;
            }
            OcspAttempt::Failed(error) => {
                last_error = Some(error);
            }
        }
    }

    TrustStatus::Unknown { last_error }
}

/// How to present an artifact, given the issuer-reported device status.
///
/// The issuer's own lifecycle states gate the OCSP check: only a device the
/// issuer already reports `ENABLED`, with a profile in hand, has a live
/// trust status worth resolving.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayState {
    /// Issuer is still processing the registration.
    Processing,

    /// Issuer reports the device can never be enabled.
    Ineligible,

    /// Administratively disabled on the issuer side.
    Disabled,

    /// Issuer-side expiry.
    Expired,

    /// Enabled, but no profile exists yet; nothing to check.
    AwaitingProfile,

    /// Enabled with a profile; resolve the live status via OCSP.
    CheckTrust,

    /// An issuer status this crate does not recognize, surfaced verbatim.
    Other(String),
}

/// Classify an issuer-reported device status string.
pub fn classify_display_state(issuer_status: &str, has_profile: bool) -> DisplayState {
    match issuer_status {
        "PROCESSING" => DisplayState::Processing,
        "INELIGIBLE" => DisplayState::Ineligible,
        "DISABLED" => DisplayState::Disabled,
        "EXPIRED" => DisplayState::Expired,
        "ENABLED" if has_profile => DisplayState::CheckTrust,
        "ENABLED" => DisplayState::AwaitingProfile,
        other => DisplayState::Other(other.to_string()),
    }
}

/// The result of a trust check.
pub struct TrustReport {
    pub certificate: CertificateRecord,
    pub status: TrustStatus,

    /// Present for provisioning profiles only.
    pub entitlements: Option<EntitlementSet>,
}

/// Resolves artifact trust status against the Apple CA registry.
pub struct TrustStatusChecker<'a> {
    client: Client,
    resolver: &'a CertificateAuthorityResolver,
}

impl<'a> TrustStatusChecker<'a> {
    pub fn new(resolver: &'a CertificateAuthorityResolver) -> Result<Self, AppleProvisionError> {
        Ok(Self {
            client: default_client()?,
            resolver,
        })
    }

    /// Resolve the live trust status of an artifact.
    ///
    /// Artifact and certificate parse failures are fatal; OCSP and CA fetch
    /// failures degrade the status to `Unknown` instead.
    pub fn check(&self, artifact: &SignedArtifact<'_>) -> Result<TrustReport, AppleProvisionError> {
        let (certificate_der, entitlements_dict) = match artifact {
            SignedArtifact::ProvisioningProfile(data) => {
                let content = artifact::extract_from_provisioning_profile(data)?;
                (content.certificate_der, content.entitlements)
            }
            SignedArtifact::CredentialBundle { data, password } => {
                (artifact::extract_from_bundle(data, password)?, None)
            }
        };

        let leaf = CapturedX509Certificate::from_der(certificate_der)
            .map_err(|e| AppleProvisionError::MalformedCertificate(format!("{}", e)))?;

        let certificate = artifact::describe_parsed_certificate(&leaf)?;

        let status = self.resolve_status(&leaf, &certificate.ocsp_url);

        let entitlements = entitlements_dict
            .as_ref()
            .map(entitlements::evaluate);

        Ok(TrustReport {
            certificate,
            status,
            entitlements,
        })
    }

    fn resolve_status(&self, leaf: &CapturedX509Certificate, ocsp_url: &str) -> TrustStatus {
        let attempts = self
            .resolver
            .names()
            .iter()
            .map(|name| self.attempt(name, leaf, ocsp_url));

        fold_attempts(attempts)
    }

    fn attempt(
        &self,
        ca_name: &str,
        leaf: &CapturedX509Certificate,
        ocsp_url: &str,
    ) -> OcspAttempt {
        let issuer = match self.resolver.fetch(ca_name) {
            Ok(cert) => cert,
            Err(e) => {
                warn!("failed to obtain CA certificate {}: {}", ca_name, e);
                return OcspAttempt::Failed(e.to_string());
            }
        };

        match ocsp::query(&self.client, ocsp_url, leaf, &issuer) {
            Ok(status) => OcspAttempt::Definitive(status),
            Err(e) => {
                warn!("OCSP check against {} failed: {}", ca_name, e);
                OcspAttempt::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_then_revoked_is_revoked() {
        let status = fold_attempts(vec![
            OcspAttempt::Failed("connection refused".to_string()),
            OcspAttempt::Definitive(OcspCertStatus::Revoked),
        ]);

        assert_eq!(status, TrustStatus::Revoked);
    }

    #[test]
    fn all_failures_keep_last_error() {
        let status = fold_attempts(vec![
            OcspAttempt::Failed("first".to_string()),
            OcspAttempt::Failed("second".to_string()),
        ]);

        assert_eq!(
            status,
            TrustStatus::Unknown {
                last_error: Some("second".to_string())
            }
        );
    }

    #[test]
    fn definitive_answer_short_circuits() {
        let mut evaluated = 0;

        let status = fold_attempts((0..6).map(|i| {
            evaluated += 1;
            if i == 1 {
                OcspAttempt::Definitive(OcspCertStatus::Good)
            } else {
                OcspAttempt::Failed("unreachable".to_string())
            }
        }));

        assert_eq!(status, TrustStatus::Enabled);
        assert_eq!(evaluated, 2);
    }

    #[test]
    fn responder_unknown_is_not_definitive() {
        let status = fold_attempts(vec![
            OcspAttempt::Failed("transient".to_string()),
            OcspAttempt::Definitive(OcspCertStatus::Unknown),
        ]);

        // The unknown answer supersedes the earlier error.
        assert_eq!(status, TrustStatus::Unknown { last_error: None });

        let status = fold_attempts(vec![
            OcspAttempt::Definitive(OcspCertStatus::Unknown),
            OcspAttempt::Definitive(OcspCertStatus::Revoked),
        ]);
        assert_eq!(status, TrustStatus::Revoked);
    }

    #[test]
    fn display_state_classification() {
        assert_eq!(
            classify_display_state("PROCESSING", false),
            DisplayState::Processing
        );
        assert_eq!(
            classify_display_state("INELIGIBLE", true),
            DisplayState::Ineligible
        );
        assert_eq!(
            classify_display_state("DISABLED", true),
            DisplayState::Disabled
        );
        assert_eq!(
            classify_display_state("EXPIRED", true),
            DisplayState::Expired
        );
        assert_eq!(
            classify_display_state("ENABLED", false),
            DisplayState::AwaitingProfile
        );
        assert_eq!(
            classify_display_state("ENABLED", true),
            DisplayState::CheckTrust
        );
        assert_eq!(
            classify_display_state("SOMETHING_NEW", true),
            DisplayState::Other("SOMETHING_NEW".to_string())
        );
    }

    #[test]
    fn trust_status_display() {
        assert_eq!(TrustStatus::Enabled.to_string(), "ENABLED");
        assert_eq!(TrustStatus::Revoked.to_string(), "REVOKED");
        assert_eq!(
            TrustStatus::Unknown { last_error: None }.to_string(),
            "UNKNOWN"
        );
    }
}
