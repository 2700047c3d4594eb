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

//! Implementation of [`DeltaTableSource`] which opens a Delta Lake table with a shared access
//! signature from a [`CredentialCache`] and reopens it when the signature is renewed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use deltalake::DeltaTable;
use geodelta_credentials::{CredentialCache, PermissionSet};
use tokio::sync::Mutex;
use tracing::info;

use crate::configuration::TableLocation;
use crate::error::Result;

/// Storage option used by Delta Lake to authenticate to Azure with a shared access signature.
const AZURE_STORAGE_SAS_TOKEN: &str = "azure_storage_sas_token";

/// Functionality for opening a Delta Lake table at a URI with storage options.
#[async_trait]
pub trait DeltaTableOpener: Send + Sync {
    /// Open the latest version of the Delta Lake table at `table_uri` using `storage_options`.
    async fn open(
        &self,
        table_uri: &str,
        storage_options: HashMap<String, String>,
    ) -> Result<DeltaTable>;
}

/// [`DeltaTableOpener`] that opens tables using Delta Lake's storage handlers.
pub struct DeltaLakeOpener;

#[async_trait]
impl DeltaTableOpener for DeltaLakeOpener {
    async fn open(
        &self,
        table_uri: &str,
        storage_options: HashMap<String, String>,
    ) -> Result<DeltaTable> {
        // Register the Azure storage handlers so abfss:// URIs can be opened. The handlers are
        // simply overwritten if they have already been registered.
        deltalake::azure::register_handlers(None);

        let delta_table =
            deltalake::open_table_with_storage_options(table_uri, storage_options).await?;

        Ok(delta_table)
    }
}

/// A Delta Lake table that has been opened with the token in `sas_token`.
struct OpenedTable {
    sas_token: Option<String>,
    delta_table: DeltaTable,
}

/// Opens the Delta Lake table at `location` and keeps it open while the credential used to open it
/// is still handed out by the [`CredentialCache`].
pub struct DeltaTableSource {
    /// Where the Delta Lake table is stored.
    location: TableLocation,
    /// Cache of the credentials used to access tables in Azure.
    credential_cache: Arc<CredentialCache>,
    /// How long a credential must at least be valid when a table is read.
    min_validity: TimeDelta,
    /// Opens the table when it has not been opened or its credential has been renewed.
    opener: Arc<dyn DeltaTableOpener>,
    /// The currently opened table, if any.
    opened_table: Mutex<Option<OpenedTable>>,
}

impl DeltaTableSource {
    pub fn new(
        location: TableLocation,
        credential_cache: Arc<CredentialCache>,
        min_validity: TimeDelta,
    ) -> Self {
        Self::with_opener(
            location,
            credential_cache,
            min_validity,
            Arc::new(DeltaLakeOpener),
        )
    }

    pub fn with_opener(
        location: TableLocation,
        credential_cache: Arc<CredentialCache>,
        min_validity: TimeDelta,
        opener: Arc<dyn DeltaTableOpener>,
    ) -> Self {
        Self {
            location,
            credential_cache,
            min_validity,
            opener,
            opened_table: Mutex::new(None),
        }
    }

    pub fn location(&self) -> &TableLocation {
        &self.location
    }

    /// Return the latest version of the Delta Lake table. If the table is stored in Azure, a
    /// credential that is valid for at least `min_validity` is retrieved from the cache and the
    /// table is reopened if the credential differs from the one it was opened with. Returns
    /// [`GeoDeltaStorageError`](crate::error::GeoDeltaStorageError) if a credential cannot be
    /// retrieved or the table cannot be opened.
    pub async fn delta_table(&self) -> Result<DeltaTable> {
        // The token is retrieved while holding the lock so concurrent callers open the table with
        // the same or a newer token.
        let mut opened_table = self.opened_table.lock().await;
        let sas_token = self.sas_token().await?;

        if let Some(opened_table) = opened_table.as_mut() {
            if opened_table.sas_token == sas_token {
                opened_table.delta_table.load().await?;
                return Ok(opened_table.delta_table.clone());
            }
        }

        let delta_table = self.open(sas_token.as_deref()).await?;

        *opened_table = Some(OpenedTable {
            sas_token,
            delta_table: delta_table.clone(),
        });

        Ok(delta_table)
    }

    /// Return the token of a read and list credential for the table if it is stored in Azure,
    /// otherwise return [`None`].
    async fn sas_token(&self) -> Result<Option<String>> {
        match &self.location {
            TableLocation::Azure(resource_key) => {
                let credential = self
                    .credential_cache
                    .get_or_refresh(resource_key, &PermissionSet::read_list(), self.min_validity)
                    .await?;

                Ok(Some(credential.token().to_owned()))
            }
            TableLocation::Url(_) => Ok(None),
        }
    }

    /// Open the Delta Lake table authenticated with `sas_token` if it is stored in Azure.
    async fn open(&self, sas_token: Option<&str>) -> Result<DeltaTable> {
        let table_uri = self.location.table_uri();

        let storage_options = match sas_token {
            Some(sas_token) => {
                HashMap::from([(AZURE_STORAGE_SAS_TOKEN.to_owned(), sas_token.to_owned())])
            }
            None => HashMap::new(),
        };

        info!(%table_uri, "Opening Delta Lake table.");

        self.opener.open(&table_uri, storage_options).await
    }
}
