// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Apple developer account provisioning and live trust checking.
//!
//! This crate automates the certificate half of distributing iOS apps
//! outside the App Store:
//!
//! * Mint RSA key pairs and certificate signing requests, and package
//!   issued certificates into password-protected PKCS#12 bundles. (See
//!   [generate_key_pair] and [package_bundle].)
//! * Drive the App Store Connect API with short-lived ES256 JWTs: rotate
//!   signing certificates, register app identifiers and devices, and issue
//!   device-scoped provisioning profiles. (See [AppStoreConnectClient].)
//! * Inspect issued artifacts (provisioning profiles and credential
//!   bundles) to recover the embedded certificate and entitlements. (See
//!   [extract_from_provisioning_profile] and [describe_certificate].)
//! * Resolve a certificate's live status by querying its OCSP responder
//!   against Apple's published WWDR certificate authorities, falling back
//!   across the CA generations. (See [TrustStatusChecker].)
//!
//! The crate is deliberately un-opinionated about orchestration: it performs
//! single blocking operations and leaves scheduling, retry policy, and
//! persistence to the caller.

pub mod app_store_connect;
pub use app_store_connect::{
    AppStoreConnectClient, CapabilityProgress, CertificateRotation, ConnectTokenEncoder,
    DeviceRecord, DeviceType, UnifiedApiKey,
};
mod artifact;
pub use artifact::*;
mod authority;
pub use authority::*;
mod entitlements;
pub use entitlements::*;
mod error;
pub use error::*;
mod key_material;
pub use key_material::*;
pub mod ocsp;
mod trust;
pub use trust::*;
