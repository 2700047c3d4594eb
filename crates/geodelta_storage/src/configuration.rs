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

//! Definition of a provider as read from its configuration file, i.e., where the Delta Lake table
//! is stored and which of its columns contain the geometry.

use geodelta_credentials::ResourceKey;
use serde::Deserialize;

use crate::error::{GeoDeltaStorageError, Result};

/// The configuration of a provider. The table is stored in Azure if `delta_account_name` and
/// `delta_container_name` are set, otherwise it is read from `data`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProviderDefinition {
    /// URL or path of the Delta Lake table if it is not stored in Azure.
    pub data: Option<String>,
    /// Name of the Azure storage account with the Delta Lake table.
    pub delta_account_name: Option<String>,
    /// Name of the container in the Azure storage account with the Delta Lake table.
    pub delta_container_name: Option<String>,
    /// Path of the Delta Lake table inside the container.
    pub delta_path: Option<String>,
    /// Name of the column with geometries encoded as WKT.
    pub geometry_col_name: Option<String>,
    /// Columns with the coordinates of point geometries. Only used if `geometry_col_name` is not set.
    pub geometry: Option<GeometryFields>,
    /// Name of the column that identifies each item. If not set, items are identified by row index.
    pub id_field: Option<String>,
}

/// Columns with the x and y coordinates of point geometries.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GeometryFields {
    pub x_field: String,
    pub y_field: String,
}

impl ProviderDefinition {
    /// Parse a [`ProviderDefinition`] from the TOML in `toml`. If `toml` is not a valid provider
    /// definition, [`GeoDeltaStorageError`] is returned.
    pub fn from_toml(toml: &str) -> Result<Self> {
        Ok(toml::from_str(toml)?)
    }

    /// Return where the Delta Lake table is stored. If neither an Azure location nor `data` is set,
    /// [`GeoDeltaStorageError::InvalidArgument`] is returned.
    pub fn table_location(&self) -> Result<TableLocation> {
        match (
            &self.delta_account_name,
            &self.delta_container_name,
            &self.data,
        ) {
            (Some(account_name), Some(container_name), _) => {
                Ok(TableLocation::Azure(ResourceKey::new(
                    account_name,
                    container_name,
                    self.delta_path.clone().unwrap_or_default(),
                )))
            }
            (None, None, Some(data)) => Ok(TableLocation::Url(data.clone())),
            _ => Err(GeoDeltaStorageError::InvalidArgument(
                "Either delta_account_name and delta_container_name or data must be set."
                    .to_owned(),
            )),
        }
    }

    /// Return which columns contain the geometry. If neither `geometry_col_name` nor `geometry` is
    /// set, [`GeoDeltaStorageError::InvalidArgument`] is returned.
    pub fn geometry_source(&self) -> Result<GeometrySource> {
        match (&self.geometry_col_name, &self.geometry) {
            (Some(column_name), _) => Ok(GeometrySource::WktColumn(column_name.clone())),
            (None, Some(fields)) => Ok(GeometrySource::Coordinates {
                x_field: fields.x_field.clone(),
                y_field: fields.y_field.clone(),
            }),
            (None, None) => Err(GeoDeltaStorageError::InvalidArgument(
                "Either geometry_col_name or geometry.x_field and geometry.y_field must be set."
                    .to_owned(),
            )),
        }
    }
}

/// Where a Delta Lake table is stored.
#[derive(Clone, Debug, PartialEq)]
pub enum TableLocation {
    /// Table in Azure Data Lake Storage that is accessed with a shared access signature.
    Azure(ResourceKey),
    /// Table at a URL or local path that is accessed without credentials.
    Url(String),
}

impl TableLocation {
    /// Return the URI used to open the Delta Lake table.
    pub fn table_uri(&self) -> String {
        match self {
            TableLocation::Azure(resource_key) => format!(
                "abfss://{}@{}.dfs.core.windows.net/{}",
                resource_key.container_name,
                resource_key.account_name,
                resource_key.path.trim_start_matches('/')
            ),
            TableLocation::Url(url) => url.clone(),
        }
    }
}

/// Where the geometry of each item is read from.
#[derive(Clone, Debug, PartialEq)]
pub enum GeometrySource {
    /// A column with geometries encoded as WKT.
    WktColumn(String),
    /// Two columns with the coordinates of a point.
    Coordinates { x_field: String, y_field: String },
}
