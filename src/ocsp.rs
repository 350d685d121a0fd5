// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! OCSP request construction and response parsing (RFC 6960).
//!
//! Requests are unsigned single-certificate queries. Responses are parsed
//! only as far as the first `SingleResponse`'s certificate status; responder
//! signatures are not validated because the issuer certificate used for the
//! query is itself fetched out-of-band from Apple.

use {
    crate::{artifact, AppleProvisionError},
    bcder::{encode::Values, Mode},
    reqwest::blocking::Client,
    ring::digest,
    x509_certificate::{CapturedX509Certificate, X509Certificate},
    yasna::{models::ObjectIdentifier, Tag},
};

/// SHA-1, the hash OCSP CertIDs conventionally use.
const OID_SHA1: &[u64] = &[1, 3, 14, 3, 2, 26];

/// id-pkix-ocsp-basic (1.3.6.1.5.5.7.48.1.1).
const OID_OCSP_BASIC: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 48, 1, 1];

/// Certificate status as reported by a responder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OcspCertStatus {
    Good,
    Revoked,
    Unknown,
}

fn sha1(data: &[u8]) -> Vec<u8> {
    // OCSP CertID hashes are identifiers, not a security boundary.
    digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, data)
        .as_ref()
        .to_vec()
}

/// Build a DER encoded OCSP request for `leaf`, presuming `issuer` signed it.
///
/// The CertID names the issuer by SHA-1 of its subject Name and public key,
/// per RFC 6960 §4.1.1. The request is unsigned and carries no extensions.
pub fn build_request(
    leaf: &CapturedX509Certificate,
    issuer: &CapturedX509Certificate,
) -> Result<Vec<u8>, AppleProvisionError> {
    let x509: &X509Certificate = issuer;
    let raw: &x509_certificate::rfc5280::Certificate = x509.as_ref();

    let mut issuer_name_der = Vec::new();
    raw.tbs_certificate
        .subject
        .encode_ref()
        .write_encoded(Mode::Der, &mut issuer_name_der)?;

    let issuer_name_hash = sha1(&issuer_name_der);
    let issuer_key_hash = sha1(issuer.public_key_data().as_ref());
    let serial = artifact::certificate_serial_der(leaf);

    Ok(yasna::construct_der(|writer| {
        // OCSPRequest ::= SEQUENCE { tbsRequest TBSRequest }
        writer.write_sequence(|writer| {
            // TBSRequest, version defaulted, no requestor name or extensions.
            writer.next().write_sequence(|writer| {
                // requestList ::= SEQUENCE OF Request
                writer.next().write_sequence(|writer| {
                    writer.next().write_sequence(|writer| {
                        // CertID
                        writer.next().write_sequence(|writer| {
                            writer.next().write_sequence(|writer| {
                                writer
                                    .next()
                                    .write_oid(&ObjectIdentifier::from_slice(OID_SHA1));
                                writer.next().write_null();
                            });
                            writer.next().write_bytes(&issuer_name_hash);
                            writer.next().write_bytes(&issuer_key_hash);
                            writer.next().write_der(&serial);
                        });
                    });
                });
            });
        });
    }))
}

/// Split a DER SEQUENCE into the raw TLVs of its elements.
///
/// OCSP response internals mix OPTIONAL, DEFAULT, and CHOICE fields; working
/// on raw elements and discriminating by tag octet sidesteps that ambiguity.
fn raw_sequence_elements(data: &[u8]) -> Result<Vec<Vec<u8>>, AppleProvisionError> {
    yasna::parse_der(data, |reader| {
        reader.read_sequence(|reader| {
            let mut elements = Vec::new();
            while let Some(raw) = reader.read_optional(|reader| reader.read_der())? {
                elements.push(raw);
            }
            Ok(elements)
        })
    })
    .map_err(|e| AppleProvisionError::OcspMalformed(format!("{}", e)))
}

/// Parse an OCSP response down to the leaf's certificate status.
///
/// A responder status other than `successful` is an availability failure,
/// letting the caller move on to the next candidate issuer.
pub fn parse_response(data: &[u8]) -> Result<OcspCertStatus, AppleProvisionError> {
    let (status, response_bytes) = yasna::parse_der(data, |reader| {
        reader.read_sequence(|reader| {
            let status = reader.next().read_enum()?;

            let response_bytes = reader.read_optional(|reader| {
                reader.read_tagged(Tag::context(0), |reader| {
                    reader.read_sequence(|reader| {
                        let response_type = reader.next().read_oid()?;
                        let response = reader.next().read_bytes()?;
                        Ok((response_type, response))
                    })
                })
            })?;

            Ok((status, response_bytes))
        })
    })
    .map_err(|e| AppleProvisionError::OcspMalformed(format!("{}", e)))?;

    if status != 0 {
        return Err(AppleProvisionError::OcspUnavailable(format!(
            "responder refused the request (status {})",
            status
        )));
    }

    let (response_type, basic) = response_bytes.ok_or_else(|| {
        AppleProvisionError::OcspMalformed("successful response carries no responseBytes".to_string())
    })?;

    if response_type != ObjectIdentifier::from_slice(OID_OCSP_BASIC) {
        return Err(AppleProvisionError::OcspMalformed(format!(
            "unrecognized response type {}",
            response_type
        )));
    }

    // BasicOCSPResponse ::= SEQUENCE { tbsResponseData, signatureAlgorithm,
    // signature, certs OPTIONAL }. Only tbsResponseData matters here.
    let tbs = raw_sequence_elements(&basic)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            AppleProvisionError::OcspMalformed("empty BasicOCSPResponse".to_string())
        })?;

    // ResponseData has an optional version and a responderID CHOICE before
    // `responses`, which is the only universal SEQUENCE at this level.
    let responses = raw_sequence_elements(&tbs)?
        .into_iter()
        .find(|element| element.first() == Some(&0x30))
        .ok_or_else(|| {
            AppleProvisionError::OcspMalformed("response data has no responses".to_string())
        })?;

    let single = raw_sequence_elements(&responses)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            AppleProvisionError::OcspMalformed("responder answered for no certificates".to_string())
        })?;

    // SingleResponse ::= SEQUENCE { certID, certStatus CHOICE, thisUpdate, .. }
    let cert_status = raw_sequence_elements(&single)?
        .into_iter()
        .nth(1)
        .ok_or_else(|| {
            AppleProvisionError::OcspMalformed("single response has no status".to_string())
        })?;

    match cert_status.first().map(|tag| tag & 0x1f) {
        Some(0) => Ok(OcspCertStatus::Good),
        Some(1) => Ok(OcspCertStatus::Revoked),
        Some(2) => Ok(OcspCertStatus::Unknown),
        _ => Err(AppleProvisionError::OcspMalformed(
            "unrecognized certificate status".to_string(),
        )),
    }
}

/// POST an OCSP query for `leaf` to `url` and resolve its status.
///
/// Transport failures and non-2xx responses surface as [AppleProvisionError::OcspUnavailable]
/// so the caller can try the next candidate issuer.
pub fn query(
    client: &Client,
    url: &str,
    leaf: &CapturedX509Certificate,
    issuer: &CapturedX509Certificate,
) -> Result<OcspCertStatus, AppleProvisionError> {
    let request = build_request(leaf, issuer)?;

    let response = client
        .post(url)
        .header("Content-Type", "application/ocsp-request")
        .header("Accept", "application/ocsp-response")
        .body(request)
        .send()
        .map_err(|e| AppleProvisionError::OcspUnavailable(e.to_string()))?;

    if !response.status().is_success() {
        return Err(AppleProvisionError::OcspUnavailable(format!(
            "responder returned HTTP {}",
            response.status()
        )));
    }

    let body = response
        .bytes()
        .map_err(|e| AppleProvisionError::OcspUnavailable(e.to_string()))?;

    parse_response(&body)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        x509_certificate::{EcdsaCurve, KeyAlgorithm, X509CertificateBuilder},
    };

    fn self_signed(common_name: &str) -> CapturedX509Certificate {
        let mut builder =
            X509CertificateBuilder::new(KeyAlgorithm::Ecdsa(EcdsaCurve::Secp256r1));
        builder
            .subject()
            .append_common_name_utf8_string(common_name)
            .unwrap();
        builder.validity_duration(chrono::Duration::hours(1));

        builder.create_with_random_keypair().unwrap().0
    }

    // GeneralizedTime TLV for a fixed instant.
    const PRODUCED_AT: &[u8] = b"\x18\x0f20260101000000Z";

    fn response_fixture(cert_status: &[u8]) -> Vec<u8> {
        let response_data = yasna::construct_der(|writer| {
            writer.write_sequence(|writer| {
                // responderID byKey [2].
                writer
                    .next()
                    .write_tagged(Tag::context(2), |writer| writer.write_bytes(&[0u8; 20]));
                writer.next().write_der(PRODUCED_AT);
                writer.next().write_sequence(|writer| {
                    writer.next().write_sequence(|writer| {
                        // Placeholder CertID; the parser does not inspect it.
                        writer.next().write_sequence(|_writer| {});
                        writer.next().write_der(cert_status);
                        writer.next().write_der(PRODUCED_AT);
                    });
                });
            });
        });

        let basic = yasna::construct_der(|writer| {
            writer.write_sequence(|writer| {
                writer.next().write_der(&response_data);
                writer.next().write_sequence(|writer| {
                    writer
                        .next()
                        .write_oid(&ObjectIdentifier::from_slice(OID_SHA1));
                    writer.next().write_null();
                });
                writer.next().write_bitvec_bytes(&[0u8; 4], 32);
            });
        });

        yasna::construct_der(|writer| {
            writer.write_sequence(|writer| {
                writer.next().write_enum(0);
                writer.next().write_tagged(Tag::context(0), |writer| {
                    writer.write_sequence(|writer| {
                        writer
                            .next()
                            .write_oid(&ObjectIdentifier::from_slice(OID_OCSP_BASIC));
                        writer.next().write_bytes(&basic);
                    });
                });
            });
        })
    }

    #[test]
    fn request_structure() {
        let leaf = self_signed("leaf");
        let issuer = self_signed("issuer");

        let request = build_request(&leaf, &issuer).unwrap();

        let (name_hash, key_hash, serial) = yasna::parse_der(&request, |reader| {
            reader.read_sequence(|reader| {
                reader.next().read_sequence(|reader| {
                    reader.next().read_sequence(|reader| {
                        reader.next().read_sequence(|reader| {
                            reader.next().read_sequence(|reader| {
                                reader.next().read_sequence(|reader| {
                                    let oid = reader.next().read_oid()?;
                                    assert_eq!(oid, ObjectIdentifier::from_slice(OID_SHA1));
                                    reader.next().read_null()
                                })?;
                                let name_hash = reader.next().read_bytes()?;
                                let key_hash = reader.next().read_bytes()?;
                                let serial = reader.next().read_der()?;
                                Ok((name_hash, key_hash, serial))
                            })
                        })
                    })
                })
            })
        })
        .unwrap();

        assert_eq!(name_hash.len(), 20);
        assert_eq!(key_hash, sha1(issuer.public_key_data().as_ref()));
        assert_eq!(serial, crate::artifact::certificate_serial_der(&leaf));
    }

    #[test]
    fn parse_good_revoked_unknown() {
        // good [0] IMPLICIT NULL
        assert_eq!(
            parse_response(&response_fixture(&[0x80, 0x00])).unwrap(),
            OcspCertStatus::Good
        );

        // revoked [1] IMPLICIT RevokedInfo { revocationTime }
        let mut revoked = vec![0xa1, PRODUCED_AT.len() as u8];
        revoked.extend_from_slice(PRODUCED_AT);
        assert_eq!(
            parse_response(&response_fixture(&revoked)).unwrap(),
            OcspCertStatus::Revoked
        );

        // unknown [2] IMPLICIT NULL
        assert_eq!(
            parse_response(&response_fixture(&[0x82, 0x00])).unwrap(),
            OcspCertStatus::Unknown
        );
    }

    #[test]
    fn responder_refusal_is_unavailable() {
        // responseStatus tryLater(3), no responseBytes.
        let response = yasna::construct_der(|writer| {
            writer.write_sequence(|writer| {
                writer.next().write_enum(3);
            });
        });

        assert!(matches!(
            parse_response(&response),
            Err(AppleProvisionError::OcspUnavailable(_))
        ));
    }

    #[test]
    fn malformed_response_is_rejected() {
        assert!(matches!(
            parse_response(b"junk"),
            Err(AppleProvisionError::OcspMalformed(_))
        ));

        // Successful status but missing responseBytes.
        let response = yasna::construct_der(|writer| {
            writer.write_sequence(|writer| {
                writer.next().write_enum(0);
            });
        });

        assert!(matches!(
            parse_response(&response),
            Err(AppleProvisionError::OcspMalformed(_))
        ));
    }
}
