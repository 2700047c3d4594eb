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

//! The [`Error`] and [`Result`] types used throughout `geodelta_storage`.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::Error as IoError;
use std::result::Result as StdResult;

use arrow::error::ArrowError;
use datafusion::error::DataFusionError;
use datafusion::parquet::errors::ParquetError;
use deltalake::errors::DeltaTableError;
use geodelta_credentials::error::GeoDeltaCredentialsError;
use object_store::Error as ObjectStoreError;
use serde_json::Error as SerdeJsonError;
use toml::de::Error as TomlDeserializeError;

/// Result type used throughout `geodelta_storage`.
pub type Result<T> = StdResult<T, GeoDeltaStorageError>;

/// Error type used throughout `geodelta_storage`.
#[derive(Debug)]
pub enum GeoDeltaStorageError {
    /// Error returned by Apache Arrow.
    Arrow(ArrowError),
    /// Error returned by Apache DataFusion.
    DataFusion(DataFusionError),
    /// Error returned by Delta Lake.
    DeltaLake(DeltaTableError),
    /// Error returned by geodelta_credentials.
    GeoDeltaCredentials(GeoDeltaCredentialsError),
    /// Error returned when an invalid argument was passed.
    InvalidArgument(String),
    /// Error returned from IO operations.
    Io(IoError),
    /// Error returned when a requested item does not exist.
    NotFound(String),
    /// Error returned by ObjectStore.
    ObjectStore(ObjectStoreError),
    /// Error returned by Apache Parquet.
    Parquet(ParquetError),
    /// Error returned by serde_json.
    SerdeJson(SerdeJsonError),
    /// Error returned by TOML when deserializing a provider definition.
    TomlDeserialize(TomlDeserializeError),
}

impl Display for GeoDeltaStorageError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::Arrow(reason) => write!(f, "Arrow Error: {reason}"),
            Self::DataFusion(reason) => write!(f, "DataFusion Error: {reason}"),
            Self::DeltaLake(reason) => write!(f, "Delta Lake Error: {reason}"),
            Self::GeoDeltaCredentials(reason) => write!(f, "GeoDelta Credentials Error: {reason}"),
            Self::InvalidArgument(reason) => write!(f, "Invalid Argument Error: {reason}"),
            Self::Io(reason) => write!(f, "Io Error: {reason}"),
            Self::NotFound(reason) => write!(f, "Not Found Error: {reason}"),
            Self::ObjectStore(reason) => write!(f, "Object Store Error: {reason}"),
            Self::Parquet(reason) => write!(f, "Parquet Error: {reason}"),
            Self::SerdeJson(reason) => write!(f, "Serde JSON Error: {reason}"),
            Self::TomlDeserialize(reason) => write!(f, "TOML Deserialize Error: {reason}"),
        }
    }
}

impl Error for GeoDeltaStorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        // Return the error that caused self to occur if one exists.
        match self {
            Self::Arrow(reason) => Some(reason),
            Self::DataFusion(reason) => Some(reason),
            Self::DeltaLake(reason) => Some(reason),
            Self::GeoDeltaCredentials(reason) => Some(reason),
            Self::InvalidArgument(_reason) => None,
            Self::Io(reason) => Some(reason),
            Self::NotFound(_reason) => None,
            Self::ObjectStore(reason) => Some(reason),
            Self::Parquet(reason) => Some(reason),
            Self::SerdeJson(reason) => Some(reason),
            Self::TomlDeserialize(reason) => Some(reason),
        }
    }
}

impl From<ArrowError> for GeoDeltaStorageError {
    fn from(error: ArrowError) -> Self {
        Self::Arrow(error)
    }
}

impl From<DataFusionError> for GeoDeltaStorageError {
    fn from(error: DataFusionError) -> Self {
        Self::DataFusion(error)
    }
}

impl From<DeltaTableError> for GeoDeltaStorageError {
    fn from(error: DeltaTableError) -> Self {
        Self::DeltaLake(error)
    }
}

impl From<GeoDeltaCredentialsError> for GeoDeltaStorageError {
    fn from(error: GeoDeltaCredentialsError) -> Self {
        Self::GeoDeltaCredentials(error)
    }
}

impl From<IoError> for GeoDeltaStorageError {
    fn from(error: IoError) -> Self {
        Self::Io(error)
    }
}

impl From<ObjectStoreError> for GeoDeltaStorageError {
    fn from(error: ObjectStoreError) -> Self {
        Self::ObjectStore(error)
    }
}

impl From<ParquetError> for GeoDeltaStorageError {
    fn from(error: ParquetError) -> Self {
        Self::Parquet(error)
    }
}

impl From<SerdeJsonError> for GeoDeltaStorageError {
    fn from(error: SerdeJsonError) -> Self {
        Self::SerdeJson(error)
    }
}

impl From<TomlDeserializeError> for GeoDeltaStorageError {
    fn from(error: TomlDeserializeError) -> Self {
        Self::TomlDeserialize(error)
    }
}
