// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interacting with the App Store Connect API.
//!
//! Covers JWT token minting, certificate issuance and rotation, app and
//! device registration, and provisioning profile creation. See
//! <https://developer.apple.com/documentation/appstoreconnectapi> for the
//! server side of this contract.

use {
    crate::{key_material, AppleProvisionError},
    jsonwebtoken::{Algorithm, EncodingKey, Header},
    log::{error, info, warn},
    reqwest::{blocking::Client, Method},
    serde::{Deserialize, Serialize},
    serde_json::{json, Value},
    std::{collections::BTreeMap, path::Path, sync::Mutex, time::SystemTime},
};

pub const API_ENDPOINT: &str = "https://api.appstoreconnect.apple.com/v1";

/// Lifetime of minted API tokens, in seconds.
///
/// The service rejects tokens valid for longer than 20 minutes.
pub const TOKEN_DURATION: u64 = 20 * 60;

/// Capabilities enabled on newly registered app identifiers, in order.
///
/// See <https://developer.apple.com/documentation/appstoreconnectapi/capabilitytype>
/// for the full menu.
pub const APP_CAPABILITIES: &[&str] = &[
    "ACCESS_WIFI_INFORMATION",
    "APP_GROUPS",
    "ASSOCIATED_DOMAINS",
    "AUTOFILL_CREDENTIAL_PROVIDER",
    "CLASSKIT",
    "GAME_CENTER",
    "HEALTHKIT",
    "HOMEKIT",
    "IN_APP_PURCHASE",
    "INTER_APP_AUDIO",
    "MULTIPATH",
    "NETWORK_EXTENSIONS",
    "NFC_TAG_READING",
    "PERSONAL_VPN",
    "PUSH_NOTIFICATIONS",
    "SIRIKIT",
    "WALLET",
    "WIRELESS_ACCESSORY_CONFIGURATION",
];

/// Emit a capability progress event after every this many capabilities.
pub const DEFAULT_PROGRESS_INTERVAL: usize = 5;

/// Fixed page size for device listings.
pub const DEVICE_PAGE_LIMIT: usize = 200;

/// Obtain an HTTP client suitable for talking to Apple servers.
pub fn default_client() -> Result<Client, AppleProvisionError> {
    Ok(Client::builder()
        .user_agent("apple-provision crate (https://crates.io/crates/apple-provision)")
        .build()?)
}

/// Represents all metadata for an App Store Connect API Key.
///
/// This is a convenience type to aid in the generic representation of all the
/// components of an App Store Connect API Key. The type supports serialization
/// so the whole key can travel as a single payload.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UnifiedApiKey {
    /// Who issued the key.
    ///
    /// Likely a UUID.
    issuer_id: String,

    /// Key identifier.
    ///
    /// An alphanumeric string like `DEADBEEF42`.
    key_id: String,

    /// Base64 encoded DER of ECDSA private key material.
    private_key: String,
}

impl UnifiedApiKey {
    /// Construct an instance from constituent parts and a PEM encoded ECDSA private key.
    ///
    /// This is what you want to use if importing a private key from the `.p8` file
    /// downloaded from the App Store Connect web interface.
    pub fn from_ecdsa_pem_path(
        issuer_id: impl ToString,
        key_id: impl ToString,
        path: impl AsRef<Path>,
    ) -> Result<Self, AppleProvisionError> {
        let pem_data = std::fs::read(path.as_ref())?;

        let parsed = pem::parse(pem_data)
            .map_err(|e| AppleProvisionError::ApiKey(format!("error parsing PEM: {}", e)))?;

        if parsed.tag != "PRIVATE KEY" {
            return Err(AppleProvisionError::ApiKey(
                "does not look like a PRIVATE KEY".to_string(),
            ));
        }

        let private_key = base64::encode(parsed.contents);

        Ok(Self {
            issuer_id: issuer_id.to_string(),
            key_id: key_id.to_string(),
            private_key,
        })
    }

    /// Construct an instance from serialized JSON.
    pub fn from_json(data: impl AsRef<[u8]>) -> Result<Self, AppleProvisionError> {
        Ok(serde_json::from_slice(data.as_ref())?)
    }

    /// Construct an instance from a JSON file.
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, AppleProvisionError> {
        let data = std::fs::read(path.as_ref())?;

        Self::from_json(data)
    }

    /// Serialize this instance to a JSON object.
    pub fn to_json_string(&self) -> Result<String, AppleProvisionError> {
        Ok(serde_json::to_string_pretty(&self)?)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ConnectTokenRequest {
    iss: String,
    iat: u64,
    exp: u64,
    aud: String,
    jti: String,
}

/// A JWT Token for use with the App Store Connect API.
pub type AppStoreConnectToken = String;

/// Represents a private key used to create JWT tokens for use with App Store Connect.
///
/// App Store Connect API tokens/JWTs are derived from:
///
/// * A key identifier. This is a short alphanumeric string like `DEADBEEF42`.
/// * An issuer ID. This is likely a UUID.
/// * A private key. Likely ECDSA.
///
/// All these are issued by Apple. You can log in to App Store Connect and
/// see/manage your keys at <https://appstoreconnect.apple.com/access/api>.
#[derive(Clone)]
pub struct ConnectTokenEncoder {
    key_id: String,
    issuer_id: String,
    encoding_key: EncodingKey,
}

impl TryFrom<UnifiedApiKey> for ConnectTokenEncoder {
    type Error = AppleProvisionError;

    fn try_from(value: UnifiedApiKey) -> Result<Self, Self::Error> {
        let der = base64::decode(value.private_key).map_err(|e| {
            AppleProvisionError::ApiKey(format!("failed to base64 decode private key: {}", e))
        })?;

        Self::from_ecdsa_der(value.key_id, value.issuer_id, &der)
    }
}

impl ConnectTokenEncoder {
    /// Construct an instance from an [EncodingKey] instance.
    ///
    /// This is the lowest level API and ultimately what all constructors use.
    pub fn from_jwt_encoding_key(
        key_id: String,
        issuer_id: String,
        encoding_key: EncodingKey,
    ) -> Self {
        Self {
            key_id,
            issuer_id,
            encoding_key,
        }
    }

    /// Construct an instance from a DER encoded ECDSA private key.
    pub fn from_ecdsa_der(
        key_id: String,
        issuer_id: String,
        der_data: &[u8],
    ) -> Result<Self, AppleProvisionError> {
        let encoding_key = EncodingKey::from_ec_der(der_data);

        Ok(Self::from_jwt_encoding_key(key_id, issuer_id, encoding_key))
    }

    /// Construct an instance from a PEM encoded ECDSA private key.
    pub fn from_ecdsa_pem(
        key_id: String,
        issuer_id: String,
        pem_data: &[u8],
    ) -> Result<Self, AppleProvisionError> {
        let encoding_key = EncodingKey::from_ec_pem(pem_data)?;

        Ok(Self::from_jwt_encoding_key(key_id, issuer_id, encoding_key))
    }

    /// Construct an instance from a PEM encoded ECDSA private key in a filesystem path.
    pub fn from_ecdsa_pem_path(
        key_id: String,
        issuer_id: String,
        path: impl AsRef<Path>,
    ) -> Result<Self, AppleProvisionError> {
        let data = std::fs::read(path.as_ref())?;

        Self::from_ecdsa_pem(key_id, issuer_id, &data)
    }

    /// Mint a new JWT token.
    ///
    /// Using the private key and key metadata bound to this instance, we issue
    /// a new JWT for the requested duration. Every token carries a unique `jti`
    /// claim so the service can de-duplicate replays.
    pub fn new_token(&self, duration: u64) -> Result<AppStoreConnectToken, AppleProvisionError> {
        let header = Header {
            kid: Some(self.key_id.clone()),
            alg: Algorithm::ES256,
            ..Default::default()
        };

        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("calculating UNIX time should never fail")
            .as_secs();

        let claims = ConnectTokenRequest {
            iss: self.issuer_id.clone(),
            iat: now,
            exp: now + duration,
            aud: "appstoreconnect-v1".to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let token = jsonwebtoken::encode(&header, &claims, &self.encoding_key)?;

        Ok(token)
    }
}

/// Device platform, as the service spells it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceType {
    Ios,
    MacOs,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ios => "IOS",
            Self::MacOs => "MAC_OS",
        }
    }
}

/// The kinds of signing certificates we mint and revoke.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertificateType {
    IosDistribution,
    IosDevelopment,
}

impl CertificateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IosDistribution => "IOS_DISTRIBUTION",
            Self::IosDevelopment => "IOS_DEVELOPMENT",
        }
    }
}

/// A single JSON:API resource.
#[derive(Clone, Debug, Deserialize)]
pub struct Resource<A> {
    pub id: String,
    pub r#type: String,
    pub attributes: A,
}

#[derive(Clone, Debug, Deserialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Clone, Debug, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

/// Attributes of a signing certificate resource.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAttributes {
    pub certificate_type: Option<String>,
    /// Base64 encoded DER of the issued certificate.
    pub certificate_content: Option<String>,
    pub display_name: Option<String>,
    pub name: Option<String>,
    pub serial_number: Option<String>,
    pub expiration_date: Option<Value>,
}

/// Attributes of a registered device resource.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAttributes {
    pub name: String,
    pub udid: String,
    pub platform: String,
    /// Issuer-reported lifecycle state. `PROCESSING`, `ENABLED`,
    /// `INELIGIBLE`, `DISABLED`, or `EXPIRED`.
    pub status: String,
    pub added_date: Option<String>,
    pub device_class: Option<String>,
    pub model: Option<String>,
}

/// A registered device as the service reports it.
pub type DeviceRecord = Resource<DeviceAttributes>;

/// Attributes of a provisioning profile resource.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileAttributes {
    pub name: String,
    pub profile_type: Option<String>,
    /// Base64 encoded CMS payload of the profile.
    pub profile_content: Option<String>,
    pub uuid: Option<String>,
    pub platform: Option<String>,
    pub created_date: Option<String>,
    pub expiration_date: Option<String>,
    pub profile_state: Option<String>,
}

/// Attributes of a user resource, from the account info probe.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAttributes {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub roles: Option<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleIdAttributes {
    pub identifier: String,
    pub name: String,
    pub platform: Option<String>,
}

/// A freshly issued signing certificate and its packaged credentials.
pub struct IssuedCertificate {
    /// Issuer-assigned certificate resource id.
    pub certificate_id: String,

    /// Password-encrypted PKCS#12 bundle holding the certificate and its
    /// private key.
    pub bundle: Vec<u8>,
}

/// Result of a full certificate rotation.
pub struct CertificateRotation {
    pub distribution: IssuedCertificate,
    pub development: IssuedCertificate,
}

/// A newly registered app identifier.
pub struct RegisteredApp {
    /// Resource id of the bundle id registration.
    pub app_id: String,

    /// The random bundle identifier string we registered.
    pub bundle_identifier: String,
}

/// Observer for capability enablement progress during app registration.
///
/// Implementations receive the cumulative enabled/pending map. Errors from
/// the observer are logged and swallowed; they never abort registration.
pub trait CapabilityProgress {
    fn capabilities_enabled(&self, status: &BTreeMap<&'static str, bool>) -> anyhow::Result<()>;
}

/// Whether to emit a progress event after enabling capability number `index`.
///
/// `index` is 1-based. Events fire on every `every`-th capability and always
/// on the final one.
fn should_notify(index: usize, total: usize, every: usize) -> bool {
    (every > 0 && index % every == 0) || index == total
}

/// Derive a random name for a new provisioning profile.
fn generate_profile_name() -> String {
    let mut name = uuid::Uuid::new_v4().to_string().replace('-', "0");
    name.truncate(16);
    name
}

/// Pull the human-oriented error detail out of an API error body.
///
/// The service wraps errors in a `{"errors": [{"detail": ...}]}` envelope.
/// Bodies that do not match fall back to the raw text.
fn extract_error_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(detail) = value
            .get("errors")
            .and_then(|errors| errors.get(0))
            .and_then(|error| error.get("detail"))
            .and_then(|detail| detail.as_str())
        {
            return detail.to_string();
        }
    }

    if body.is_empty() {
        "failed to retrieve error message".to_string()
    } else {
        body.to_string()
    }
}

/// A client for the App Store Connect API.
///
/// The client isn't generic. Don't get any ideas.
pub struct AppStoreConnectClient {
    client: Client,
    connect_token: ConnectTokenEncoder,
    base_url: String,
    token: Mutex<Option<(AppStoreConnectToken, u64)>>,
}

impl AppStoreConnectClient {
    pub fn new(connect_token: ConnectTokenEncoder) -> Result<Self, AppleProvisionError> {
        Self::with_base_url(connect_token, API_ENDPOINT)
    }

    /// Construct a client talking to an alternate API endpoint.
    ///
    /// Useful for API-compatible proxies and mock servers. The URL should
    /// include the version path component and no trailing slash, like
    /// [API_ENDPOINT].
    pub fn with_base_url(
        connect_token: ConnectTokenEncoder,
        base_url: impl ToString,
    ) -> Result<Self, AppleProvisionError> {
        Ok(Self {
            client: default_client()?,
            connect_token,
            base_url: base_url.to_string(),
            token: Mutex::new(None),
        })
    }

    /// Obtain a bearer token, minting a fresh one if the cached token expired.
    fn get_token(&self) -> Result<String, AppleProvisionError> {
        let mut token = self.token.lock().unwrap();

        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("calculating UNIX time should never fail")
            .as_secs();

        let expired = match token.as_ref() {
            Some((_, expires_at)) => now >= *expires_at,
            None => true,
        };

        if expired {
            token.replace((
                self.connect_token.new_token(TOKEN_DURATION)?,
                now + TOKEN_DURATION,
            ));
        }

        Ok(token.as_ref().unwrap().0.clone())
    }

    fn request(
        &self,
        method: Method,
        url: impl AsRef<str>,
    ) -> Result<reqwest::blocking::RequestBuilder, AppleProvisionError> {
        let token = self.get_token()?;

        Ok(self
            .client
            .request(method, url.as_ref())
            .bearer_auth(token)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json"))
    }

    /// Send a prepared request and apply the API's error contract.
    ///
    /// Successful PUT and DELETE responses carry no body and yield `None`;
    /// every other success is parsed as JSON. 400/401/403/409 map to their
    /// dedicated error variants with the issuer-supplied detail; any other
    /// failure keeps the full request context for diagnosis.
    fn send(
        &self,
        req: reqwest::blocking::RequestBuilder,
    ) -> Result<Option<Value>, AppleProvisionError> {
        let request = req.build()?;
        let method = request.method().clone();
        let url = request.url().to_string();

        let response = self.client.execute(request)?;
        let status = response.status();

        if status.is_success() {
            if method == Method::PUT || method == Method::DELETE {
                return Ok(None);
            }

            return Ok(Some(response.json::<Value>()?));
        }

        let body = response.text().unwrap_or_default();
        let detail = extract_error_detail(&body);
        error!("developer account API error ({} {}): {}", method, url, detail);

        Err(match status.as_u16() {
            400 => AppleProvisionError::BadRequest(detail),
            401 => AppleProvisionError::Unauthorized(detail),
            403 => AppleProvisionError::Forbidden(detail),
            409 => AppleProvisionError::Conflict(detail),
            code => AppleProvisionError::Api {
                method: method.to_string(),
                url,
                status: code,
                body,
            },
        })
    }

    fn send_expecting_body(
        &self,
        req: reqwest::blocking::RequestBuilder,
    ) -> Result<Value, AppleProvisionError> {
        self.send(req)?
            .ok_or(AppleProvisionError::ApiResponseShape("response body"))
    }

    /// List all certificates on the account.
    pub fn list_certificates(
        &self,
    ) -> Result<Vec<Resource<CertificateAttributes>>, AppleProvisionError> {
        let url = format!("{}/certificates", self.base_url);
        let value = self.send_expecting_body(self.request(Method::GET, url)?)?;

        Ok(serde_json::from_value::<ListResponse<Resource<CertificateAttributes>>>(value)?.data)
    }

    /// Fetch a single certificate by resource id.
    pub fn get_certificate(
        &self,
        certificate_id: &str,
    ) -> Result<Resource<CertificateAttributes>, AppleProvisionError> {
        let url = format!("{}/certificates/{}", self.base_url, certificate_id);
        let value = self.send_expecting_body(self.request(Method::GET, url)?)?;

        Ok(serde_json::from_value::<DataResponse<Resource<CertificateAttributes>>>(value)?.data)
    }

    /// Revoke a certificate by resource id.
    pub fn revoke_certificate(&self, certificate_id: &str) -> Result<(), AppleProvisionError> {
        let url = format!("{}/certificates/{}", self.base_url, certificate_id);
        self.send(self.request(Method::DELETE, url)?)?;

        Ok(())
    }

    /// Revoke all iOS distribution and development certificates on the account.
    ///
    /// Best effort: individual revocation failures are logged and skipped so a
    /// single stuck certificate cannot wedge a rotation.
    pub fn revoke_signing_certificates(&self) -> Result<(), AppleProvisionError> {
        for cert in self.list_certificates()? {
            let revocable = matches!(
                cert.attributes.certificate_type.as_deref(),
                Some("IOS_DISTRIBUTION") | Some("IOS_DEVELOPMENT")
            );

            if revocable {
                if let Err(e) = self.revoke_certificate(&cert.id) {
                    warn!("failed to revoke certificate {}: {}", cert.id, e);
                }
            }
        }

        Ok(())
    }

    /// Submit a certificate signing request for issuance.
    pub fn submit_signing_request(
        &self,
        certificate_type: CertificateType,
        csr_pem: &str,
    ) -> Result<Resource<CertificateAttributes>, AppleProvisionError> {
        let url = format!("{}/certificates", self.base_url);
        let body = json!({
            "data": {
                "type": "certificates",
                "attributes": {
                    "certificateType": certificate_type.as_str(),
                    "csrContent": csr_pem,
                },
            }
        });

        let value = self.send_expecting_body(self.request(Method::POST, url)?.json(&body))?;

        Ok(serde_json::from_value::<DataResponse<Resource<CertificateAttributes>>>(value)?.data)
    }

    fn issue_certificate(
        &self,
        certificate_type: CertificateType,
        password: &str,
    ) -> Result<IssuedCertificate, AppleProvisionError> {
        let generated = key_material::generate_key_pair()?;

        let cert = self.submit_signing_request(certificate_type, &generated.csr_pem)?;

        let content = cert
            .attributes
            .certificate_content
            .ok_or(AppleProvisionError::ApiResponseShape("certificateContent"))?;

        let der = base64::decode(content).map_err(|e| {
            AppleProvisionError::MalformedCertificate(format!(
                "issued certificate is not valid base64: {}",
                e
            ))
        })?;

        let cert_pem = key_material::convert_der_to_pem(&der)?;
        let bundle = key_material::package_bundle(&generated.private_key_pem, &cert_pem, password)?;

        Ok(IssuedCertificate {
            certificate_id: cert.id,
            bundle,
        })
    }

    /// Revoke existing signing certificates and mint a fresh
    /// distribution/development pair.
    ///
    /// Not transactional: a failure partway leaves the account with whatever
    /// subset of the work completed. Callers retry by rotating again.
    pub fn rotate_certificates(
        &self,
        password: &str,
    ) -> Result<CertificateRotation, AppleProvisionError> {
        self.revoke_signing_certificates()?;

        let distribution = self.issue_certificate(CertificateType::IosDistribution, password)?;
        let development = self.issue_certificate(CertificateType::IosDevelopment, password)?;

        Ok(CertificateRotation {
            distribution,
            development,
        })
    }

    fn post_bundle_id(&self, identifier: &str) -> Result<Value, AppleProvisionError> {
        let url = format!("{}/bundleIds", self.base_url);
        let body = json!({
            "data": {
                "type": "bundleIds",
                "attributes": {
                    "identifier": identifier,
                    "name": identifier,
                    "platform": "IOS",
                },
            }
        });

        self.send_expecting_body(self.request(Method::POST, url)?.json(&body))
    }

    /// Register a new app identifier and enable the standard capability set.
    ///
    /// The bundle identifier is a random UUID, which makes identifier
    /// collisions practically impossible. If the service still reports a
    /// conflict, existing bundle ids matching `account_name` are deleted and
    /// the registration is retried once.
    ///
    /// Capability enablement emits progress events through `progress` after
    /// every `every`-th capability and after the final one. Passing 0 selects
    /// [DEFAULT_PROGRESS_INTERVAL].
    pub fn create_app(
        &self,
        account_name: &str,
        progress: Option<&dyn CapabilityProgress>,
        every: usize,
    ) -> Result<RegisteredApp, AppleProvisionError> {
        let every = if every == 0 {
            DEFAULT_PROGRESS_INTERVAL
        } else {
            every
        };

        let identifier = uuid::Uuid::new_v4().to_string();

        let response = match self.post_bundle_id(&identifier) {
            Ok(response) => response,
            Err(AppleProvisionError::Conflict(_)) => {
                let url = format!("{}/bundleIds", self.base_url);
                let existing = self.send_expecting_body(
                    self.request(Method::GET, &url)?
                        .query(&[("filter[name]", account_name)]),
                )?;

                let existing =
                    serde_json::from_value::<ListResponse<Resource<BundleIdAttributes>>>(existing)?;

                for app in existing.data {
                    info!("deleting existing app id: {}", app.id);
                    let delete_url = format!("{}/{}", url, app.id);
                    self.send(self.request(Method::DELETE, delete_url)?)?;
                }

                self.post_bundle_id(&identifier)?
            }
            Err(e) => return Err(e),
        };

        let app_id = response
            .get("data")
            .and_then(|data| data.get("id"))
            .and_then(|id| id.as_str())
            .ok_or(AppleProvisionError::ApiResponseShape("bundle id"))?
            .to_string();

        let capability_url = format!("{}/bundleIdCapabilities", self.base_url);
        let mut status: BTreeMap<&'static str, bool> =
            APP_CAPABILITIES.iter().map(|c| (*c, false)).collect();

        let total = APP_CAPABILITIES.len();
        for (no, capability) in APP_CAPABILITIES.iter().enumerate() {
            let body = json!({
                "data": {
                    "type": "bundleIdCapabilities",
                    "attributes": {"capabilityType": capability, "settings": []},
                    "relationships": {
                        "bundleId": {"data": {"type": "bundleIds", "id": &app_id}}
                    },
                }
            });

            self.send(self.request(Method::POST, &capability_url)?.json(&body))?;
            status.insert(*capability, true);

            if let Some(progress) = progress {
                if should_notify(no + 1, total, every) {
                    if let Err(e) = progress.capabilities_enabled(&status) {
                        warn!("error in capability progress observer: {}", e);
                    }
                }
            }
        }

        Ok(RegisteredApp {
            app_id,
            bundle_identifier: identifier,
        })
    }

    /// Register a device by UDID.
    ///
    /// The device name is set to the UDID itself. An already registered UDID
    /// surfaces as a conflict for the caller to handle.
    pub fn register_device(
        &self,
        udid: &str,
        platform: DeviceType,
    ) -> Result<DeviceRecord, AppleProvisionError> {
        let url = format!("{}/devices", self.base_url);
        let body = json!({
            "data": {
                "type": "devices",
                "attributes": {
                    "name": udid,
                    "platform": platform.as_str(),
                    "udid": udid,
                }
            }
        });

        let value = self.send_expecting_body(self.request(Method::POST, url)?.json(&body))?;

        Ok(serde_json::from_value::<DataResponse<DeviceRecord>>(value)?.data)
    }

    /// Ask the issuer to move a device to the `ENABLED` state.
    pub fn enable_device(&self, device_id: &str) -> Result<DeviceRecord, AppleProvisionError> {
        let url = format!("{}/devices/{}", self.base_url, device_id);
        let body = json!({
            "data": {
                "id": device_id,
                "type": "devices",
                "attributes": {
                    "status": "ENABLED",
                }
            }
        });

        let value = self.send_expecting_body(self.request(Method::PATCH, url)?.json(&body))?;

        Ok(serde_json::from_value::<DataResponse<DeviceRecord>>(value)?.data)
    }

    /// Fetch a single device by resource id.
    pub fn get_device(&self, device_id: &str) -> Result<DeviceRecord, AppleProvisionError> {
        let url = format!("{}/devices/{}", self.base_url, device_id);
        let value = self.send_expecting_body(self.request(Method::GET, url)?)?;

        Ok(serde_json::from_value::<DataResponse<DeviceRecord>>(value)?.data)
    }

    /// List registered devices for a platform.
    ///
    /// Uses a fixed page size of 200; accounts with more devices than that
    /// need pagination, which is out of scope here.
    pub fn list_devices(
        &self,
        platform: DeviceType,
    ) -> Result<Vec<DeviceRecord>, AppleProvisionError> {
        let url = format!("{}/devices", self.base_url);
        let value = self.send_expecting_body(
            self.request(Method::GET, url)?.query(&[
                ("filter[platform]", platform.as_str()),
                ("limit", &DEVICE_PAGE_LIMIT.to_string()),
            ]),
        )?;

        Ok(serde_json::from_value::<ListResponse<DeviceRecord>>(value)?.data)
    }

    /// List the users on the account. Doubles as a cheap credentials probe.
    pub fn list_users(&self) -> Result<Vec<Resource<UserAttributes>>, AppleProvisionError> {
        let url = format!("{}/users", self.base_url);
        let value = self.send_expecting_body(self.request(Method::GET, url)?)?;

        Ok(serde_json::from_value::<ListResponse<Resource<UserAttributes>>>(value)?.data)
    }

    /// Create a provisioning profile binding one certificate and one device
    /// to an app identifier.
    ///
    /// Profiles get a fresh random name each time; they are re-created, never
    /// updated in place.
    pub fn create_profile(
        &self,
        certificate_id: &str,
        device_id: &str,
        app_id: &str,
        adhoc: bool,
    ) -> Result<Resource<ProfileAttributes>, AppleProvisionError> {
        let url = format!("{}/profiles", self.base_url);

        let profile_type = if adhoc {
            "IOS_APP_ADHOC"
        } else {
            "IOS_APP_DEVELOPMENT"
        };

        let body = json!({
            "data": {
                "type": "profiles",
                "attributes": {
                    "name": generate_profile_name(),
                    "profileType": profile_type,
                },
                "relationships": {
                    "bundleId": {
                        "data": {"id": app_id, "type": "bundleIds"}
                    },
                    "certificates": {
                        "data": [{"id": certificate_id, "type": "certificates"}]
                    },
                    "devices": {
                        "data": [{"id": device_id, "type": "devices"}]
                    },
                }
            }
        });

        let value = self.send_expecting_body(self.request(Method::POST, url)?.json(&body))?;

        Ok(serde_json::from_value::<DataResponse<Resource<ProfileAttributes>>>(value)?.data)
    }
}
