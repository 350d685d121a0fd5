// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fetching Apple certificate authority certificates.
//!
//! Apple publishes its WWDR root and generational intermediates at
//! well-known URLs. The trust checker tries each in turn as the presumed
//! issuer of a leaf certificate, so downloads are cached for a while to keep
//! repeated checks cheap.

use {
    crate::{app_store_connect::default_client, AppleProvisionError},
    reqwest::blocking::Client,
    std::{
        collections::HashMap,
        sync::Mutex,
        time::{Duration, Instant},
    },
    x509_certificate::CapturedX509Certificate,
};

/// Known certificate authorities, in the order the trust checker tries them.
pub const CERTIFICATE_AUTHORITIES: &[&str] = &[
    "AppleWWDRCA",
    "AppleWWDRCAG2",
    "AppleWWDRCAG3",
    "AppleWWDRCAG4",
    "AppleWWDRCAG5",
    "AppleWWDRCAG6",
];

/// How long a downloaded CA certificate stays cached.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Download URL for a known CA name.
///
/// The original WWDR root lives on developer.apple.com; the generational
/// intermediates live on www.apple.com.
fn authority_url(name: &str) -> Option<String> {
    if !CERTIFICATE_AUTHORITIES.contains(&name) {
        return None;
    }

    Some(if name == "AppleWWDRCA" {
        "https://developer.apple.com/certificationauthority/AppleWWDRCA.cer".to_string()
    } else {
        format!("https://www.apple.com/certificateauthority/{}.cer", name)
    })
}

/// Downloads and caches CA certificates from the fixed registry.
///
/// Construct one per process and share it by reference. The cache tolerates
/// concurrent population races; the last writer wins, which is harmless
/// because every writer stores the same certificate.
pub struct CertificateAuthorityResolver {
    client: Client,
    ttl: Duration,
    cache: Mutex<HashMap<String, (CapturedX509Certificate, Instant)>>,
}

impl CertificateAuthorityResolver {
    pub fn new() -> Result<Self, AppleProvisionError> {
        Ok(Self::with_client(default_client()?, DEFAULT_CACHE_TTL))
    }

    pub fn with_client(client: Client, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The registry names, in stable checking order.
    pub fn names(&self) -> &'static [&'static str] {
        CERTIFICATE_AUTHORITIES
    }

    /// Obtain a CA certificate by registry name, downloading if the cache
    /// has no fresh copy.
    ///
    /// Download or parse failures propagate and leave the cache untouched,
    /// so the next call retries instead of serving a cached error.
    pub fn fetch(&self, name: &str) -> Result<CapturedX509Certificate, AppleProvisionError> {
        let url = authority_url(name)
            .ok_or_else(|| AppleProvisionError::UnknownAuthority(name.to_string()))?;

        if let Some((cert, fetched_at)) = self.cache.lock().unwrap().get(name) {
            if fetched_at.elapsed() < self.ttl {
                return Ok(cert.clone());
            }
        }

        let data = self.client.get(url).send()?.error_for_status()?.bytes()?;

        let cert = CapturedX509Certificate::from_der(data.as_ref()).map_err(|e| {
            AppleProvisionError::MalformedCertificate(format!(
                "CA certificate {} failed to parse: {}",
                name, e
            ))
        })?;

        self.cache
            .lock()
            .unwrap()
            .insert(name.to_string(), (cert.clone(), Instant::now()));

        Ok(cert)
    }

    #[cfg(test)]
    fn store(&self, name: &str, cert: CapturedX509Certificate) {
        self.cache
            .lock()
            .unwrap()
            .insert(name.to_string(), (cert, Instant::now()));
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        x509_certificate::{EcdsaCurve, KeyAlgorithm, X509CertificateBuilder},
    };

    fn dummy_cert() -> CapturedX509Certificate {
        let mut builder =
            X509CertificateBuilder::new(KeyAlgorithm::Ecdsa(EcdsaCurve::Secp256r1));
        builder
            .subject()
            .append_common_name_utf8_string("cache fixture")
            .unwrap();
        builder.validity_duration(chrono::Duration::hours(1));

        builder.create_with_random_keypair().unwrap().0
    }

    #[test]
    fn url_registry() {
        assert_eq!(
            authority_url("AppleWWDRCA").unwrap(),
            "https://developer.apple.com/certificationauthority/AppleWWDRCA.cer"
        );

        for name in &CERTIFICATE_AUTHORITIES[1..] {
            assert_eq!(
                authority_url(name).unwrap(),
                format!("https://www.apple.com/certificateauthority/{}.cer", name)
            );
        }

        assert!(authority_url("AppleWWDRCAG7").is_none());
    }

    #[test]
    fn unknown_name_is_an_error() {
        let resolver = CertificateAuthorityResolver::new().unwrap();

        assert!(matches!(
            resolver.fetch("NotARealAuthority"),
            Err(AppleProvisionError::UnknownAuthority(_))
        ));
    }

    #[test]
    fn fresh_cache_entries_are_served() {
        let resolver = CertificateAuthorityResolver::new().unwrap();
        let cert = dummy_cert();

        resolver.store("AppleWWDRCAG3", cert.clone());

        // No network involved; a fresh entry short-circuits the download.
        let fetched = resolver.fetch("AppleWWDRCAG3").unwrap();
        assert_eq!(fetched, cert);
    }

    #[test]
    fn registry_order_is_stable() {
        let resolver = CertificateAuthorityResolver::new().unwrap();
        assert_eq!(resolver.names()[0], "AppleWWDRCA");
        assert_eq!(resolver.names().len(), 6);
    }
}
