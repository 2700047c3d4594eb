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

//! The [`CredentialGenerator`] trait implemented by the authorities that can issue credentials and
//! an implementation that derives user delegation shared access signatures through the Azure CLI.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use tokio::process::Command;
use tracing::debug;

use crate::credential::{Credential, PermissionSet, ResourceKey};
use crate::error::{GeoDeltaCredentialsError, Result};
use crate::time_source::TimeSource;

/// Format of the expiry passed to the Azure CLI.
const AZURE_CLI_EXPIRY_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// An authority that can issue a [`Credential`] for a resource. Generating a credential is assumed
/// to be expensive, e.g., it may require multiple requests to an identity provider.
#[async_trait]
pub trait CredentialGenerator: Send + Sync {
    /// Return a new [`Credential`] that grants `permissions` to `resource_key` for `lifetime`, or
    /// an error if the authority rejected the request or could not be reached.
    async fn generate(
        &self,
        resource_key: &ResourceKey,
        permissions: &PermissionSet,
        lifetime: TimeDelta,
    ) -> Result<Credential>;
}

/// [`CredentialGenerator`] that runs `az storage container generate-sas --as-user` to sign a
/// container shared access signature with a user delegation key. The CLI authenticates with the
/// identity of the logged in user, a managed identity, or a service principal.
pub struct AzureCliSasGenerator {
    /// Path to the `az` executable.
    az_path: String,
    /// Clock used to compute the expiry sent to Azure.
    time_source: Arc<dyn TimeSource>,
}

impl AzureCliSasGenerator {
    pub fn new(az_path: impl Into<String>, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            az_path: az_path.into(),
            time_source,
        }
    }

    /// Return the arguments to pass to the Azure CLI to generate a shared access signature for
    /// `resource_key` with `permissions` that expires at `expiry`.
    fn arguments(
        resource_key: &ResourceKey,
        permissions: &PermissionSet,
        expiry: &str,
    ) -> Vec<String> {
        let permissions = permissions.to_string();
        let arguments: [&str; 17] = [
            "storage",
            "container",
            "generate-sas",
            "--account-name",
            &resource_key.account_name,
            "--name",
            &resource_key.container_name,
            "--permissions",
            &permissions,
            "--expiry",
            expiry,
            "--auth-mode",
            "login",
            "--as-user",
            "--https-only",
            "--output",
            "tsv",
        ];

        arguments.iter().map(|argument| (*argument).to_owned()).collect()
    }
}

#[async_trait]
impl CredentialGenerator for AzureCliSasGenerator {
    async fn generate(
        &self,
        resource_key: &ResourceKey,
        permissions: &PermissionSet,
        lifetime: TimeDelta,
    ) -> Result<Credential> {
        let now = self.time_source.now()?;
        let expiry = now
            .checked_add_signed(lifetime)
            .ok_or_else(|| {
                GeoDeltaCredentialsError::CredentialGeneration(format!(
                    "A credential with a lifetime of {lifetime} from {now} cannot be represented."
                ))
            })?
            .format(AZURE_CLI_EXPIRY_FORMAT)
            .to_string();

        debug!(%resource_key, %permissions, %expiry, "Generating user delegation SAS.");

        let output = Command::new(&self.az_path)
            .args(Self::arguments(resource_key, permissions, &expiry))
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(GeoDeltaCredentialsError::CredentialGeneration(format!(
                "'{} storage container generate-sas' failed with {}: {}",
                self.az_path,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let sas_token = String::from_utf8(output.stdout)
            .map_err(|error| GeoDeltaCredentialsError::CredentialGeneration(error.to_string()))?;

        // The granted permissions are read from the token so the cache can check them.
        Credential::try_from_sas_token(&sas_token)
    }
}
