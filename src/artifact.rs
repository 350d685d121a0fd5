// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inspecting signed artifacts.
//!
//! Provisioning profiles are CMS-wrapped plists carrying the signing
//! certificate and entitlement declarations; credential bundles are PKCS#12
//! containers. This module digs the leaf certificate and entitlements out of
//! both and summarizes certificates for trust checking. The CMS signature on
//! profiles is deliberately not verified here: trust is established by the
//! live OCSP check, not by the wrapper.

use {
    crate::{key_material, AppleProvisionError},
    bcder::{
        encode::{PrimitiveContent, Values},
        ConstOid, Mode, Oid,
    },
    chrono::{DateTime, Utc},
    cryptographic_message_syntax::SignedData,
    std::io::Cursor,
    x509_certificate::{asn1time::Time, CapturedX509Certificate, X509Certificate},
};

/// Authority Information Access extension (1.3.6.1.5.5.7.1.1).
const OID_AUTHORITY_INFO_ACCESS: ConstOid = Oid(&[43, 6, 1, 5, 5, 7, 1, 1]);

/// id-ad-ocsp access method (1.3.6.1.5.5.7.48.1), as yasna components.
const OID_ACCESS_METHOD_OCSP: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 48, 1];

/// Payload recovered from a provisioning profile.
pub struct ProfileContent {
    /// DER of the first (leaf) entry in `DeveloperCertificates`.
    pub certificate_der: Vec<u8>,

    /// The profile's `Entitlements` dictionary, when present.
    pub entitlements: Option<plist::Dictionary>,
}

/// Summary of an inspected certificate.
#[derive(Clone, Debug)]
pub struct CertificateRecord {
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Hex encoded serial number.
    pub serial_number: String,
    /// OCSP responder URL from the AIA extension.
    pub ocsp_url: String,
}

/// Extract the leaf certificate and entitlements from a provisioning profile.
pub fn extract_from_provisioning_profile(
    data: &[u8],
) -> Result<ProfileContent, AppleProvisionError> {
    let signed_data = SignedData::parse_ber(data).map_err(|e| {
        AppleProvisionError::MalformedArtifact(format!(
            "data does not appear to be a signed profile: {}",
            e
        ))
    })?;

    let content = signed_data.signed_content().ok_or_else(|| {
        AppleProvisionError::MalformedArtifact("profile has no embedded content".to_string())
    })?;

    let value = plist::Value::from_reader(Cursor::new(content))?;

    let dict = value.as_dictionary().ok_or_else(|| {
        AppleProvisionError::MalformedArtifact("profile payload is not a plist dictionary".to_string())
    })?;

    let certificate_der = dict
        .get("DeveloperCertificates")
        .and_then(|v| v.as_array())
        .and_then(|certs| certs.first())
        .and_then(|v| v.as_data())
        .ok_or_else(|| {
            AppleProvisionError::MalformedArtifact(
                "profile is missing DeveloperCertificates".to_string(),
            )
        })?
        .to_vec();

    let entitlements = dict
        .get("Entitlements")
        .and_then(|v| v.as_dictionary())
        .cloned();

    Ok(ProfileContent {
        certificate_der,
        entitlements,
    })
}

/// Extract the certificate from a password-encrypted credential bundle.
///
/// The private key in the bundle is ignored; inspection only cares about the
/// public half.
pub fn extract_from_bundle(data: &[u8], password: &str) -> Result<Vec<u8>, AppleProvisionError> {
    let (certificate, _) = key_material::parse_bundle(data, password)?;

    Ok(certificate.encode_der()?)
}

/// The full DER TLV of a certificate's serial number.
pub(crate) fn certificate_serial_der(cert: &CapturedX509Certificate) -> Vec<u8> {
    let x509: &X509Certificate = cert;
    let raw: &x509_certificate::rfc5280::Certificate = x509.as_ref();

    (&raw.tbs_certificate.serial_number)
        .encode()
        .to_captured(Mode::Der)
        .as_slice()
        .to_vec()
}

/// Content octets of a single DER TLV.
pub(crate) fn der_primitive_content(data: &[u8]) -> Option<&[u8]> {
    if data.len() < 2 {
        return None;
    }

    let length_octet = data[1] as usize;
    if length_octet & 0x80 == 0 {
        data.get(2..2 + length_octet)
    } else {
        let count = length_octet & 0x7f;
        if count == 0 || count > std::mem::size_of::<usize>() || data.len() < 2 + count {
            return None;
        }

        let mut length = 0usize;
        for octet in &data[2..2 + count] {
            length = (length << 8) | *octet as usize;
        }

        let start = 2 + count;
        let end = start.checked_add(length)?;

        data.get(start..end)
    }
}

fn time_to_chrono(time: &Time) -> DateTime<Utc> {
    match time.clone() {
        Time::UtcTime(utc) => *utc,
        Time::GeneralTime(gt) => gt.into(),
    }
}

/// Find the OCSP responder URL in a certificate's AIA extension.
fn find_ocsp_url(cert: &CapturedX509Certificate) -> Option<String> {
    let x509: &X509Certificate = cert;
    let raw: &x509_certificate::rfc5280::Certificate = x509.as_ref();

    raw.iter_extensions().find_map(|extension| {
        if extension.id.as_ref() != OID_AUTHORITY_INFO_ACCESS.as_ref() {
            return None;
        }

        let access_data = extension.value.to_bytes();

        // AuthorityInfoAccessSyntax ::= SEQUENCE OF AccessDescription
        // AccessDescription ::= SEQUENCE { accessMethod OID, accessLocation GeneralName }
        let descriptions = yasna::parse_der(access_data.as_ref(), |reader| {
            reader.collect_sequence_of(|reader| {
                reader.read_sequence(|reader| {
                    let method = reader.next().read_oid()?;
                    let location = reader.next().read_der()?;
                    Ok((method, location))
                })
            })
        })
        .ok()?;

        let ocsp = yasna::models::ObjectIdentifier::from_slice(OID_ACCESS_METHOD_OCSP);

        descriptions.into_iter().find_map(|(method, location)| {
            // accessLocation must be a [6] IMPLICIT uniformResourceIdentifier.
            if method == ocsp && location.first() == Some(&0x86) {
                let content = der_primitive_content(&location)?;
                String::from_utf8(content.to_vec()).ok()
            } else {
                None
            }
        })
    })
}

/// Summarize a DER certificate into a [CertificateRecord].
///
/// A certificate without an OCSP responder URL in its AIA extension is
/// rejected because the trust check cannot proceed without one.
pub fn describe_certificate(der: &[u8]) -> Result<CertificateRecord, AppleProvisionError> {
    let cert = CapturedX509Certificate::from_der(der)
        .map_err(|e| AppleProvisionError::MalformedCertificate(format!("{}", e)))?;

    describe_parsed_certificate(&cert)
}

pub fn describe_parsed_certificate(
    cert: &CapturedX509Certificate,
) -> Result<CertificateRecord, AppleProvisionError> {
    let subject = cert
        .subject_name()
        .user_friendly_str()
        .map_err(|e| AppleProvisionError::MalformedCertificate(format!("{:?}", e)))?;

    let issuer = cert
        .issuer_name()
        .user_friendly_str()
        .map_err(|e| AppleProvisionError::MalformedCertificate(format!("{:?}", e)))?;

    let x509: &X509Certificate = cert;
    let raw: &x509_certificate::rfc5280::Certificate = x509.as_ref();
    let validity = &raw.tbs_certificate.validity;

    let serial_der = certificate_serial_der(cert);
    let serial_number = hex::encode(der_primitive_content(&serial_der).ok_or_else(|| {
        AppleProvisionError::MalformedCertificate("unreadable serial number".to_string())
    })?);

    let ocsp_url = find_ocsp_url(cert).ok_or_else(|| {
        AppleProvisionError::MalformedCertificate(
            "certificate has no OCSP responder in its AIA extension".to_string(),
        )
    })?;

    Ok(CertificateRecord {
        subject,
        issuer,
        not_before: time_to_chrono(&validity.not_before),
        not_after: time_to_chrono(&validity.not_after),
        serial_number,
        ocsp_url,
    })
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::key_material,
        bytes::Bytes,
        cryptographic_message_syntax::{SignedDataBuilder, SignerBuilder},
        x509_certificate::{
            EcdsaCurve, InMemorySigningKeyPair, KeyAlgorithm, X509CertificateBuilder,
        },
    };

    const TEST_OCSP_URL: &str = "http://ocsp.example.com/status";

    fn aia_extension_der(url: &str) -> Vec<u8> {
        yasna::construct_der(|writer| {
            writer.write_sequence(|writer| {
                writer.next().write_sequence(|writer| {
                    writer
                        .next()
                        .write_oid(&yasna::models::ObjectIdentifier::from_slice(
                            OID_ACCESS_METHOD_OCSP,
                        ));
                    writer
                        .next()
                        .write_tagged_implicit(yasna::Tag::context(6), |writer| {
                            writer.write_ia5_string(url)
                        });
                });
            });
        })
    }

    fn cert_with_ocsp_responder(
        common_name: &str,
    ) -> (CapturedX509Certificate, InMemorySigningKeyPair) {
        let mut builder =
            X509CertificateBuilder::new(KeyAlgorithm::Ecdsa(EcdsaCurve::Secp256r1));
        builder
            .subject()
            .append_common_name_utf8_string(common_name)
            .unwrap();
        builder.validity_duration(chrono::Duration::hours(2));
        builder.add_extension_der_data(
            Oid(Bytes::copy_from_slice(OID_AUTHORITY_INFO_ACCESS.as_ref())),
            false,
            aia_extension_der(TEST_OCSP_URL),
        );

        let (cert, key_pair, _) = builder.create_with_random_keypair().unwrap();

        (cert, key_pair)
    }

    fn profile_plist(cert_der: &[u8]) -> Vec<u8> {
        let mut dict = plist::Dictionary::new();

        let mut entitlements = plist::Dictionary::new();
        entitlements.insert("aps-environment".to_string(), plist::Value::Boolean(true));

        dict.insert(
            "DeveloperCertificates".to_string(),
            plist::Value::Array(vec![plist::Value::Data(cert_der.to_vec())]),
        );
        dict.insert(
            "Entitlements".to_string(),
            plist::Value::Dictionary(entitlements),
        );

        let mut buffer = Vec::new();
        plist::Value::Dictionary(dict)
            .to_writer_xml(&mut buffer)
            .unwrap();

        buffer
    }

    #[test]
    fn profile_extraction() {
        let (cert, key_pair) = cert_with_ocsp_responder("profile signer");
        let cert_der = cert.encode_der().unwrap();

        let cms = SignedDataBuilder::default()
            .certificate(cert.clone())
            .content_inline(profile_plist(&cert_der))
            .signer(SignerBuilder::new(&key_pair, cert.clone()))
            .build_der()
            .unwrap();

        let content = extract_from_provisioning_profile(&cms).unwrap();
        assert_eq!(content.certificate_der, cert_der);

        let entitlements = content.entitlements.unwrap();
        assert_eq!(
            entitlements.get("aps-environment"),
            Some(&plist::Value::Boolean(true))
        );
    }

    #[test]
    fn profile_rejects_garbage() {
        assert!(matches!(
            extract_from_provisioning_profile(b"not a profile"),
            Err(AppleProvisionError::MalformedArtifact(_))
        ));
    }

    #[test]
    fn bundle_extraction() {
        let mut builder =
            X509CertificateBuilder::new(KeyAlgorithm::Ecdsa(EcdsaCurve::Secp256r1));
        builder
            .subject()
            .append_common_name_utf8_string("bundle cert")
            .unwrap();
        builder.validity_duration(chrono::Duration::hours(2));
        let (cert, _, document) = builder.create_with_random_keypair().unwrap();

        let key_pem = pem::encode(&pem::Pem {
            tag: "PRIVATE KEY".to_string(),
            contents: document.as_ref().to_vec(),
        });

        let bundle =
            key_material::package_bundle(&key_pem, &cert.encode_pem(), "swordfish").unwrap();

        let extracted = extract_from_bundle(&bundle, "swordfish").unwrap();
        assert_eq!(extracted, cert.encode_der().unwrap());

        assert!(matches!(
            extract_from_bundle(&bundle, "wrong"),
            Err(AppleProvisionError::BundleBadPassword)
        ));
    }

    #[test]
    fn describe_reads_aia_and_serial() {
        let (cert, _) = cert_with_ocsp_responder("describe me");
        let der = cert.encode_der().unwrap();

        let record = describe_certificate(&der).unwrap();
        assert!(record.subject.contains("describe me"));
        assert_eq!(record.ocsp_url, TEST_OCSP_URL);
        assert!(!record.serial_number.is_empty());
        assert!(record.not_after > record.not_before);
    }

    #[test]
    fn describe_requires_ocsp_responder() {
        let mut builder =
            X509CertificateBuilder::new(KeyAlgorithm::Ecdsa(EcdsaCurve::Secp256r1));
        builder
            .subject()
            .append_common_name_utf8_string("no aia")
            .unwrap();
        builder.validity_duration(chrono::Duration::hours(1));

        let (cert, _, _) = builder.create_with_random_keypair().unwrap();

        assert!(matches!(
            describe_certificate(&cert.encode_der().unwrap()),
            Err(AppleProvisionError::MalformedCertificate(_))
        ));
    }

    #[test]
    fn der_content_length_forms() {
        // Short form.
        assert_eq!(der_primitive_content(&[0x02, 0x01, 0x2a]), Some(&[0x2a][..]));

        // Long form: 0x81 prefix with a one-octet length.
        let mut data = vec![0x04, 0x81, 0x80];
        data.extend(std::iter::repeat(0xab).take(128));
        assert_eq!(der_primitive_content(&data).map(|c| c.len()), Some(128));

        // Truncated data.
        assert_eq!(der_primitive_content(&[0x02, 0x05, 0x01]), None);
        assert_eq!(der_primitive_content(&[0x02]), None);

        // Length octets summing past usize::MAX must not panic.
        let huge = [
            0x04, 0x88, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        ];
        assert_eq!(der_primitive_content(&huge), None);
    }
}
