// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Key pairs, signing requests, and credential bundles.
//!
//! The developer account API issues certificates against a PKCS#10
//! certificate signing request. This module generates the RSA key material
//! backing those requests and packages issued certificates with their
//! private keys into password-protected PKCS#12 bundles.

use {
    crate::AppleProvisionError,
    bcder::{decode::Constructed, encode::Values, BitString, Mode},
    pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding},
    rsa::{RsaPrivateKey, RsaPublicKey},
    x509_certificate::{
        rfc2986::{CertificationRequest, CertificationRequestInfo, Version},
        rfc3280::Name,
        rfc5280::SubjectPublicKeyInfo,
        rfc5958::Attributes,
        CapturedX509Certificate, InMemorySigningKeyPair, Sign,
    },
    zeroize::Zeroizing,
};

/// RSA modulus size for generated signing keys.
///
/// The developer account API only accepts RSA-2048 signing requests.
const RSA_KEY_SIZE: usize = 2048;

/// Subject Common Name placed in generated signing requests.
///
/// The issuer ignores the requested subject and derives the certificate
/// subject from the account, so a fixed placeholder is used.
const CSR_COMMON_NAME: &str = "CSR File";

/// A freshly generated RSA key pair and its certificate signing request.
pub struct GeneratedKeyPair {
    /// PKCS#8 PEM encoding of the private key. Unencrypted; must not leave
    /// the issuance flow except inside an encrypted bundle.
    pub private_key_pem: Zeroizing<String>,

    /// PEM encoded PKCS#10 certificate signing request.
    pub csr_pem: String,
}

/// Generate a new RSA-2048 key pair and a signing request for it.
///
/// The request carries a fixed placeholder subject and is signed with
/// SHA-256. Key generation failures are fatal to the calling issuance
/// attempt.
pub fn generate_key_pair() -> Result<GeneratedKeyPair, AppleProvisionError> {
    let mut rng = rand::thread_rng();

    let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_SIZE)
        .map_err(|e| AppleProvisionError::KeyGeneration(format!("generating RSA key: {}", e)))?;

    let private_key_der = private_key
        .to_pkcs8_der()
        .map_err(|e| AppleProvisionError::KeyGeneration(format!("encoding private key: {}", e)))?;

    let private_key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AppleProvisionError::KeyGeneration(format!("encoding private key: {}", e)))?;

    let spki_der = RsaPublicKey::from(&private_key)
        .to_public_key_der()
        .map_err(|e| AppleProvisionError::KeyGeneration(format!("encoding public key: {}", e)))?;

    let spki = Constructed::decode(spki_der.as_ref(), Mode::Der, |cons| {
        SubjectPublicKeyInfo::take_from(cons)
    })
    .map_err(|e| AppleProvisionError::KeyGeneration(format!("decoding public key info: {}", e)))?;

    let mut subject = Name::default();
    subject
        .append_common_name_utf8_string(CSR_COMMON_NAME)
        .map_err(|e| AppleProvisionError::KeyGeneration(format!("building CSR subject: {:?}", e)))?;

    let csr_info = CertificationRequestInfo {
        version: Version::V1,
        subject,
        subject_public_key_info: spki,
        attributes: Attributes::default(),
    };

    let mut tbs_der = Vec::new();
    csr_info.write_encoded(Mode::Der, &mut tbs_der)?;

    let key_pair = InMemorySigningKeyPair::from_pkcs8_der(private_key_der.as_ref())?;
    let (signature, signature_algorithm) = key_pair.sign(&tbs_der)?;

    let csr = CertificationRequest {
        certificate_request_info: csr_info,
        signature_algorithm: signature_algorithm.into(),
        signature: BitString::new(0, signature.into()),
    };

    let mut csr_der = Vec::new();
    csr.write_encoded(Mode::Der, &mut csr_der)?;

    let csr_pem = pem::encode(&pem::Pem {
        tag: "CERTIFICATE REQUEST".to_string(),
        contents: csr_der,
    });

    Ok(GeneratedKeyPair {
        private_key_pem: Zeroizing::new(private_key_pem.to_string()),
        csr_pem,
    })
}

/// Convert a DER encoded X.509 certificate to PEM.
pub fn convert_der_to_pem(der: &[u8]) -> Result<String, AppleProvisionError> {
    let cert = CapturedX509Certificate::from_der(der)
        .map_err(|e| AppleProvisionError::MalformedCertificate(format!("{}", e)))?;

    Ok(cert.encode_pem())
}

/// Serialize a private key and its issued certificate into a
/// password-encrypted PKCS#12 bundle.
///
/// The key and certificate must belong together; a mismatched pair is
/// rejected before any packaging happens, since the resulting bundle would
/// be useless for code signing. No CA chain certificates are attached.
pub fn package_bundle(
    private_key_pem: &str,
    certificate_pem: &str,
    password: &str,
) -> Result<Vec<u8>, AppleProvisionError> {
    let key_pair = InMemorySigningKeyPair::from_pkcs8_pem(private_key_pem.as_bytes())?;

    let cert = CapturedX509Certificate::from_pem(certificate_pem.as_bytes())
        .map_err(|e| AppleProvisionError::MalformedCertificate(format!("{}", e)))?;

    if cert.public_key_data() != key_pair.public_key_data() {
        return Err(AppleProvisionError::BundleCreation(
            "private key does not match certificate public key".to_string(),
        ));
    }

    let key_der = pem::parse(private_key_pem)
        .map_err(|e| AppleProvisionError::BundleCreation(format!("parsing private key: {}", e)))?
        .contents;

    let cert_der = cert.encode_der()?;

    let pfx = p12::PFX::new(&cert_der, &key_der, None, password, "Credential Bundle")
        .ok_or_else(|| {
            AppleProvisionError::BundleCreation("failed to serialize PKCS#12 structure".to_string())
        })?;

    Ok(pfx.to_der())
}

fn bmp_string(s: &str) -> Vec<u8> {
    let utf16: Vec<u16> = s.encode_utf16().collect();

    let mut bytes = Vec::with_capacity(utf16.len() * 2 + 2);
    for c in utf16 {
        bytes.push((c / 256) as u8);
        bytes.push((c % 256) as u8);
    }
    bytes.push(0x00);
    bytes.push(0x00);

    bytes
}

/// Open a password-encrypted credential bundle.
///
/// Yields the embedded certificate and private key. The password must be
/// the exact password the bundle was created with; there is no recovery
/// path for a lost password.
pub fn parse_bundle(
    data: &[u8],
    password: &str,
) -> Result<(CapturedX509Certificate, InMemorySigningKeyPair), AppleProvisionError> {
    let pfx = p12::PFX::parse(data).map_err(|e| {
        AppleProvisionError::BundleParse(format!("data does not appear to be PKCS#12: {:?}", e))
    })?;

    if !pfx.verify_mac(password) {
        return Err(AppleProvisionError::BundleBadPassword);
    }

    let data = match pfx.auth_safe {
        p12::ContentInfo::Data(data) => data,
        _ => {
            return Err(AppleProvisionError::BundleParse(
                "unexpected PKCS#12 content info".to_string(),
            ));
        }
    };

    let content_infos = yasna::parse_der(&data, |reader| {
        reader.collect_sequence_of(p12::ContentInfo::parse)
    })
    .map_err(|e| {
        AppleProvisionError::BundleParse(format!("failed parsing inner ContentInfo: {:?}", e))
    })?;

    let bmp_password = bmp_string(password);

    let mut certificate = None;
    let mut signing_key = None;

    for content in content_infos {
        let bags_data = match content {
            p12::ContentInfo::Data(inner) => inner,
            p12::ContentInfo::EncryptedData(encrypted) => {
                encrypted.data(&bmp_password).ok_or_else(|| {
                    AppleProvisionError::BundleParse(
                        "failed decrypting inner EncryptedData".to_string(),
                    )
                })?
            }
            p12::ContentInfo::OtherContext(_) => {
                return Err(AppleProvisionError::BundleParse(
                    "unexpected content in inner PKCS#12 data".to_string(),
                ));
            }
        };

        let bags = yasna::parse_ber(&bags_data, |reader| {
            reader.collect_sequence_of(p12::SafeBag::parse)
        })
        .map_err(|e| {
            AppleProvisionError::BundleParse(format!("failed parsing SafeBag: {:?}", e))
        })?;

        for bag in bags {
            match bag.bag {
                p12::SafeBagKind::CertBag(cert_bag) => match cert_bag {
                    p12::CertBag::X509(cert_data) => {
                        certificate = Some(CapturedX509Certificate::from_der(cert_data)?);
                    }
                    p12::CertBag::SDSI(_) => {
                        return Err(AppleProvisionError::BundleParse(
                            "unexpected SDSI certificate data".to_string(),
                        ));
                    }
                },
                p12::SafeBagKind::Pkcs8ShroudedKeyBag(key_bag) => {
                    let decrypted = key_bag.decrypt(&bmp_password).ok_or_else(|| {
                        AppleProvisionError::BundleParse(
                            "error decrypting shrouded key bag; is the password correct?"
                                .to_string(),
                        )
                    })?;

                    signing_key = Some(InMemorySigningKeyPair::from_pkcs8_der(&decrypted)?);
                }
                p12::SafeBagKind::OtherBagKind(_) => {
                    return Err(AppleProvisionError::BundleParse(
                        "unexpected bag type in inner PKCS#12 content".to_string(),
                    ));
                }
            }
        }
    }

    match (certificate, signing_key) {
        (Some(certificate), Some(signing_key)) => Ok((certificate, signing_key)),
        (None, Some(_)) => Err(AppleProvisionError::BundleParse(
            "failed to find x509 certificate in PKCS#12 data".to_string(),
        )),
        (_, None) => Err(AppleProvisionError::BundleParse(
            "failed to find signing key in PKCS#12 data".to_string(),
        )),
    }
}
