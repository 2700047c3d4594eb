/* Copyright 2025 The GeoDelta Contributors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Implementation of the types that describe a time-bounded, permission-scoped credential and the
//! storage resource it grants access to.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};

use crate::error::{GeoDeltaCredentialsError, Result};

/// Format of the signed expiry `se` in a shared access signature.
const SAS_EXPIRY_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// An operation a [`Credential`] can grant. The variants are ordered as the characters in the
/// permission string of a shared access signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    Read,
    Create,
    Write,
    Delete,
    List,
}

impl Permission {
    /// Return the character used for `self` in a shared access signature.
    pub fn as_char(&self) -> char {
        match self {
            Permission::Read => 'r',
            Permission::Create => 'c',
            Permission::Write => 'w',
            Permission::Delete => 'd',
            Permission::List => 'l',
        }
    }
}

impl TryFrom<char> for Permission {
    type Error = GeoDeltaCredentialsError;

    fn try_from(value: char) -> Result<Self> {
        match value {
            'r' => Ok(Permission::Read),
            'c' => Ok(Permission::Create),
            'w' => Ok(Permission::Write),
            'd' => Ok(Permission::Delete),
            'l' => Ok(Permission::List),
            _ => Err(GeoDeltaCredentialsError::InvalidArgument(format!(
                "'{value}' is not a supported permission."
            ))),
        }
    }
}

/// A set of [`Permissions`](Permission) requested for or granted by a [`Credential`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn new(permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self(permissions.into_iter().collect())
    }

    /// Return the permissions required to read a Delta Lake table, i.e., read and list.
    pub fn read_list() -> Self {
        Self::new([Permission::Read, Permission::List])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    /// Return `true` if every permission in `other` is also in `self`.
    pub fn is_superset(&self, other: &PermissionSet) -> bool {
        self.0.is_superset(&other.0)
    }
}

impl Display for PermissionSet {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        for permission in &self.0 {
            write!(f, "{}", permission.as_char())?;
        }
        Ok(())
    }
}

impl FromStr for PermissionSet {
    type Err = GeoDeltaCredentialsError;

    /// Parse a permission string such as `rl` into a [`PermissionSet`]. Characters may be given in
    /// any order, but an unknown character is rejected.
    fn from_str(value: &str) -> Result<Self> {
        value
            .chars()
            .map(Permission::try_from)
            .collect::<Result<BTreeSet<Permission>>>()
            .map(Self)
    }
}

/// Identifies the storage resource a [`Credential`] is scoped to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    /// Name of the storage account.
    pub account_name: String,
    /// Name of the container in the storage account.
    pub container_name: String,
    /// Path of the resource inside the container. May be empty if the whole container is used.
    pub path: String,
}

impl ResourceKey {
    pub fn new(
        account_name: impl Into<String>,
        container_name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            account_name: account_name.into(),
            container_name: container_name.into(),
            path: path.into(),
        }
    }

    /// Return `true` if the key does not identify a resource, i.e., if the account name or the
    /// container name is empty.
    pub fn is_empty(&self) -> bool {
        self.account_name.is_empty() || self.container_name.is_empty()
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.account_name, self.container_name)?;
        if !self.path.is_empty() {
            write!(f, "/{}", self.path)?;
        }
        Ok(())
    }
}

/// A signed token that grants `permissions` until `expires_at`. The token itself is opaque.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: DateTime<Utc>,
    permissions: PermissionSet,
}

impl Credential {
    /// Create a new [`Credential`]. If `token` is empty, return
    /// [`GeoDeltaCredentialsError::InvalidArgument`].
    pub fn try_new(
        token: String,
        expires_at: DateTime<Utc>,
        permissions: PermissionSet,
    ) -> Result<Self> {
        if token.is_empty() {
            return Err(GeoDeltaCredentialsError::InvalidArgument(
                "A credential token cannot be empty.".to_owned(),
            ));
        }

        Ok(Self {
            token,
            expires_at,
            permissions,
        })
    }

    /// Create a new [`Credential`] from a shared access signature. The expiry is read from the
    /// signed expiry parameter `se` which is percent-decoded and parsed as UTC, and the granted
    /// permissions are read from the signed permissions parameter `sp`. If `sas_token` is empty or
    /// does not contain valid `se` and `sp` parameters, return
    /// [`GeoDeltaCredentialsError::InvalidArgument`].
    pub fn try_from_sas_token(sas_token: &str) -> Result<Self> {
        let sas_token = sas_token.trim().trim_start_matches('?');

        let signed_expiry = sas_parameter(sas_token, "se", "signed expiry")?;
        let expires_at = NaiveDateTime::parse_from_str(&signed_expiry, SAS_EXPIRY_FORMAT)
            .map_err(|error| {
                GeoDeltaCredentialsError::InvalidArgument(format!(
                    "The signed expiry '{signed_expiry}' is not valid: {error}"
                ))
            })?
            .and_utc();

        let permissions = sas_parameter(sas_token, "sp", "signed permissions")?.parse()?;

        Self::try_new(sas_token.to_owned(), expires_at, permissions)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    /// Return `true` if `self` is still valid for more than `min_validity` after `now`. If
    /// `now + min_validity` cannot be represented, no credential is valid for that long.
    pub fn is_valid_for(&self, now: DateTime<Utc>, min_validity: TimeDelta) -> bool {
        now.checked_add_signed(min_validity)
            .is_some_and(|valid_until| self.expires_at > valid_until)
    }
}

/// Return the percent-decoded value of the parameter `key` in `sas_token`. `description` is used in
/// the error returned if the parameter is missing.
fn sas_parameter(sas_token: &str, key: &str, description: &str) -> Result<String> {
    url::form_urlencoded::parse(sas_token.as_bytes())
        .find(|(parameter, _value)| parameter == key)
        .map(|(_parameter, value)| value.into_owned())
        .ok_or_else(|| {
            GeoDeltaCredentialsError::InvalidArgument(format!(
                "The shared access signature does not contain the {description} '{key}'."
            ))
        })
}

// The token is a secret, so it is never included in logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("expires_at", &self.expires_at)
            .field("permissions", &self.permissions.to_string())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    // Tests for PermissionSet.
    #[test]
    fn test_permission_set_is_displayed_in_sas_order() {
        let permissions = PermissionSet::new([
            Permission::List,
            Permission::Delete,
            Permission::Read,
            Permission::Write,
            Permission::Create,
        ]);

        assert_eq!(permissions.to_string(), "rcwdl");
    }

    #[test]
    fn test_permission_set_from_str() {
        let permissions: PermissionSet = "lr".parse().unwrap();
        assert_eq!(permissions, PermissionSet::read_list());
    }

    #[test]
    fn test_permission_set_from_str_with_unknown_permission() {
        let result = "rx".parse::<PermissionSet>();
        assert!(matches!(
            result,
            Err(GeoDeltaCredentialsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_permission_set_is_superset() {
        let all: PermissionSet = "rcwdl".parse().unwrap();
        assert!(all.is_superset(&PermissionSet::read_list()));
        assert!(!PermissionSet::read_list().is_superset(&all));
    }

    // Tests for ResourceKey.
    #[test]
    fn test_resource_key_without_container_is_empty() {
        assert!(ResourceKey::new("account", "", "path").is_empty());
        assert!(ResourceKey::new("", "container", "path").is_empty());
        assert!(!ResourceKey::new("account", "container", "").is_empty());
    }

    #[test]
    fn test_resource_key_display() {
        let resource_key = ResourceKey::new("account", "silver", "spire/ais/delta");
        assert_eq!(resource_key.to_string(), "account/silver/spire/ais/delta");
    }

    // Tests for Credential.
    #[test]
    fn test_credential_with_empty_token() {
        let result = Credential::try_new(String::new(), Utc::now(), PermissionSet::read_list());
        assert!(matches!(
            result,
            Err(GeoDeltaCredentialsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_credential_from_percent_encoded_sas_token() {
        let sas_token = "skoid=abc&sv=2021-08-06&se=2024-03-01T12%3A05%3A00Z&sr=c&sp=rl&sig=x%2By";
        let credential = Credential::try_from_sas_token(sas_token).unwrap();

        assert_eq!(
            credential.expires_at(),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 0).unwrap()
        );
        assert_eq!(credential.permissions(), &PermissionSet::read_list());
        assert_eq!(credential.token(), sas_token);
    }

    #[test]
    fn test_credential_from_sas_token_with_leading_question_mark() {
        let credential =
            Credential::try_from_sas_token("?sp=rl&se=2024-03-01T12:05:00Z&sig=abc\n").unwrap();

        assert_eq!(credential.token(), "sp=rl&se=2024-03-01T12:05:00Z&sig=abc");
        assert_eq!(
            credential.expires_at(),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 0).unwrap()
        );
    }

    #[test]
    fn test_credential_from_sas_token_without_signed_expiry() {
        let result = Credential::try_from_sas_token("sp=rl&sig=abc");
        assert!(matches!(
            result,
            Err(GeoDeltaCredentialsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_credential_from_sas_token_with_invalid_signed_expiry() {
        let result = Credential::try_from_sas_token("sp=rl&se=tomorrow&sig=abc");
        assert!(matches!(
            result,
            Err(GeoDeltaCredentialsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_credential_from_sas_token_uses_signed_permissions() {
        let credential =
            Credential::try_from_sas_token("sp=r&se=2024-03-01T12:05:00Z&sig=abc").unwrap();

        assert_eq!(
            credential.permissions(),
            &PermissionSet::new([Permission::Read])
        );
        assert!(!credential.permissions().is_superset(&PermissionSet::read_list()));
    }

    #[test]
    fn test_credential_from_sas_token_without_signed_permissions() {
        let result = Credential::try_from_sas_token("se=2024-03-01T12:05:00Z&sig=abc");
        assert!(matches!(
            result,
            Err(GeoDeltaCredentialsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_credential_is_valid_for() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let credential = Credential::try_new(
            "token".to_owned(),
            now + TimeDelta::minutes(5),
            PermissionSet::read_list(),
        )
        .unwrap();

        assert!(credential.is_valid_for(now, TimeDelta::minutes(1)));
        assert!(!credential.is_valid_for(now, TimeDelta::minutes(5)));
        assert!(!credential.is_valid_for(now + TimeDelta::minutes(4), TimeDelta::minutes(1)));
    }

    #[test]
    fn test_credential_is_not_valid_for_unrepresentable_duration() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let credential = Credential::try_new(
            "token".to_owned(),
            DateTime::<Utc>::MAX_UTC,
            PermissionSet::read_list(),
        )
        .unwrap();

        assert!(!credential.is_valid_for(now, TimeDelta::days(100_000_000)));
        assert!(!credential.is_valid_for(DateTime::<Utc>::MAX_UTC, TimeDelta::seconds(1)));
    }

    #[test]
    fn test_credential_debug_does_not_contain_token() {
        let credential =
            Credential::try_new("secret".to_owned(), Utc::now(), PermissionSet::read_list())
                .unwrap();

        assert!(!format!("{credential:?}").contains("secret"));
    }
}
