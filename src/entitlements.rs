// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Evaluating entitlement declarations from signed artifacts.

/// Entitlement keys we know how to interpret, in report order.
///
/// Keys outside this list are ignored during evaluation rather than flagged:
/// profiles routinely carry issuer-internal keys that say nothing about what
/// the app may do.
pub const RECOGNIZED_ENTITLEMENTS: &[&str] = &[
    "application-identifier",
    "aps-environment",
    "beta-reports-active",
    "com.apple.developer.associated-domains",
    "com.apple.developer.healthkit",
    "com.apple.developer.homekit",
    "com.apple.developer.icloud-container-identifiers",
    "com.apple.developer.in-app-payments",
    "com.apple.developer.networking.vpn.api",
    "com.apple.developer.nfc.readersession.formats",
    "com.apple.developer.siri",
    "com.apple.developer.team-identifier",
    "get-task-allow",
    "keychain-access-groups",
];

/// Ordered entitlement key to granted/denied mapping.
pub type EntitlementSet = Vec<(String, bool)>;

/// Cross-reference an artifact's entitlement dictionary against the
/// recognized list.
///
/// Yields one entry per recognized key present in the dictionary, in
/// [RECOGNIZED_ENTITLEMENTS] order. A key is granted unless it is declared
/// with an explicit boolean `false`; non-boolean values (identifiers, string
/// lists) count as granted because their presence is the grant.
pub fn evaluate(entitlements: &plist::Dictionary) -> EntitlementSet {
    RECOGNIZED_ENTITLEMENTS
        .iter()
        .filter_map(|key| {
            entitlements.get(key).map(|value| {
                let granted = !matches!(value, plist::Value::Boolean(false));
                (key.to_string(), granted)
            })
        })
        .collect()
}
