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

//! Implementation of [`CredentialCache`] which hands out cached credentials while they are valid
//! for long enough and only asks the [`CredentialGenerator`] for a new credential when they are
//! not. Each resource and permission set has its own slot that is protected by an asynchronous
//! mutex, so at most one credential is generated at a time for each slot and concurrent callers
//! wait for and share its result.

use std::sync::Arc;

use chrono::TimeDelta;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::credential::{Credential, PermissionSet, ResourceKey};
use crate::error::{GeoDeltaCredentialsError, Result};
use crate::generator::CredentialGenerator;
use crate::time_source::TimeSource;

/// The lifetime of generated credentials if no other lifetime is configured.
pub const DEFAULT_CREDENTIAL_LIFETIME: TimeDelta = TimeDelta::minutes(5);

/// Slot holding the credential for one resource and permission set. [`None`] until the first
/// credential has been generated.
type CredentialSlot = Arc<Mutex<Option<Credential>>>;

/// Cache of at most one credential for each resource and permission set.
pub struct CredentialCache {
    /// Authority used to generate credentials when none are cached or they are stale.
    generator: Arc<dyn CredentialGenerator>,
    /// Clock used for every expiry comparison.
    time_source: Arc<dyn TimeSource>,
    /// Lifetime requested for each generated credential.
    lifetime: TimeDelta,
    /// The slots with credentials indexed by the resource and the permissions they grant.
    slots: DashMap<(ResourceKey, PermissionSet), CredentialSlot>,
}

impl CredentialCache {
    /// Create a new [`CredentialCache`] that generates credentials with
    /// [`DEFAULT_CREDENTIAL_LIFETIME`].
    pub fn new(
        generator: Arc<dyn CredentialGenerator>,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            generator,
            time_source,
            lifetime: DEFAULT_CREDENTIAL_LIFETIME,
            slots: DashMap::new(),
        }
    }

    /// Create a new [`CredentialCache`] that generates credentials with `lifetime`. If `lifetime`
    /// is not positive or too large to add to the current time,
    /// [`GeoDeltaCredentialsError::InvalidArgument`] is returned.
    pub fn try_with_lifetime(
        generator: Arc<dyn CredentialGenerator>,
        time_source: Arc<dyn TimeSource>,
        lifetime: TimeDelta,
    ) -> Result<Self> {
        if lifetime <= TimeDelta::zero() {
            return Err(GeoDeltaCredentialsError::InvalidArgument(format!(
                "The credential lifetime must be positive, not {lifetime}."
            )));
        }

        if time_source.now()?.checked_add_signed(lifetime).is_none() {
            return Err(GeoDeltaCredentialsError::InvalidArgument(format!(
                "The credential lifetime {lifetime} is too large to compute an expiry from."
            )));
        }

        let mut credential_cache = Self::new(generator, time_source);
        credential_cache.lifetime = lifetime;
        Ok(credential_cache)
    }

    pub fn lifetime(&self) -> TimeDelta {
        self.lifetime
    }

    /// Return a credential that grants `permissions` to `resource_key` and is valid for more than
    /// `min_validity`. The cached credential is returned if it is valid for long enough, otherwise
    /// a new credential is generated, cached, and returned. If `resource_key` or `permissions` is
    /// empty or `min_validity` is not positive or too large to add to the current time,
    /// [`GeoDeltaCredentialsError::InvalidArgument`] is returned. If the generator fails or returns a credential that is not valid for long enough,
    /// [`GeoDeltaCredentialsError::CredentialGeneration`] is returned and the cached credential is
    /// left unchanged.
    pub async fn get_or_refresh(
        &self,
        resource_key: &ResourceKey,
        permissions: &PermissionSet,
        min_validity: TimeDelta,
    ) -> Result<Credential> {
        if resource_key.is_empty() {
            return Err(GeoDeltaCredentialsError::InvalidArgument(format!(
                "The resource key '{resource_key}' must contain an account and a container name."
            )));
        }

        if permissions.is_empty() {
            return Err(GeoDeltaCredentialsError::InvalidArgument(
                "At least one permission must be requested.".to_owned(),
            ));
        }

        if min_validity <= TimeDelta::zero() {
            return Err(GeoDeltaCredentialsError::InvalidArgument(format!(
                "The minimum validity must be positive, not {min_validity}."
            )));
        }

        // The map's shard lock is released at the end of the statement so it is never held while
        // waiting for the slot or the generator.
        let slot = Arc::clone(
            &self
                .slots
                .entry((resource_key.clone(), permissions.clone()))
                .or_default(),
        );

        let mut cached_credential = slot.lock().await;

        let now = self.time_source.now()?;
        if now.checked_add_signed(min_validity).is_none() {
            return Err(GeoDeltaCredentialsError::InvalidArgument(format!(
                "The minimum validity {min_validity} is too large to compute an expiry from."
            )));
        }

        if let Some(credential) = cached_credential.as_ref() {
            if credential.is_valid_for(now, min_validity) {
                debug!(
                    %resource_key,
                    %permissions,
                    expires_at = %credential.expires_at(),
                    "Using cached credential."
                );
                return Ok(credential.clone());
            }
        }

        debug!(
            %resource_key,
            %permissions,
            lifetime = %self.lifetime,
            "Generating credential."
        );

        let credential = self
            .generator
            .generate(resource_key, permissions, self.lifetime)
            .await
            .map_err(GeoDeltaCredentialsError::into_credential_generation)?;

        // Time has passed while generating, so the credential is checked against a new now.
        let now = self.time_source.now()?;
        if !credential.is_valid_for(now, min_validity) {
            warn!(
                %resource_key,
                expires_at = %credential.expires_at(),
                "Rejected credential that expires too soon."
            );
            return Err(GeoDeltaCredentialsError::CredentialGeneration(format!(
                "The credential for '{resource_key}' expires at {} which is not more than \
                 {min_validity} after {now}.",
                credential.expires_at()
            )));
        }

        if !credential.permissions().is_superset(permissions) {
            warn!(
                %resource_key,
                granted = %credential.permissions(),
                "Rejected credential with missing permissions."
            );
            return Err(GeoDeltaCredentialsError::CredentialGeneration(format!(
                "The credential for '{resource_key}' grants '{}' but '{permissions}' was requested.",
                credential.permissions()
            )));
        }

        *cached_credential = Some(credential.clone());
        Ok(credential)
    }
}
