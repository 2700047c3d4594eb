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

//! Access to geospatial data stored in Delta Lake tables, either as GeoJSON features through
//! [`DeltaProvider`](provider::DeltaProvider) or as Apache Parquet files through
//! [`Delta2ParquetProcessor`](process::Delta2ParquetProcessor).

pub mod configuration;
pub mod error;
pub mod geojson;
pub mod process;
pub mod provider;
pub mod table;

use std::fs;
use std::path::Path as StdPath;

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use bytes::Bytes;
use datafusion::execution::session_state::SessionStateBuilder;
use datafusion::parquet::arrow::AsyncArrowWriter;
use datafusion::parquet::basic::{Compression, ZstdLevel};
use datafusion::parquet::format::KeyValue;
use datafusion::parquet::file::properties::WriterProperties;
use datafusion::prelude::SessionContext;
use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use object_store::path::Path;

use crate::error::{GeoDeltaStorageError, Result};

/// Create a new [`SessionContext`] for querying Delta Lake tables using Apache DataFusion.
pub fn create_session_context() -> SessionContext {
    let session_state = SessionStateBuilder::new().with_default_features().build();
    SessionContext::new_with_state(session_state)
}

/// Write the rows in `record_batches` with `schema` to an Apache Parquet file at `file_path` on
/// the local file system with `key_value_metadata` added to the file metadata. `file_path` must
/// use the extension `.parquet` and missing parent folders are created. Return [`Ok`] if the file
/// was written successfully, otherwise return [`GeoDeltaStorageError`].
pub async fn write_record_batches_to_apache_parquet_file(
    file_path: &StdPath,
    schema: SchemaRef,
    record_batches: &[RecordBatch],
    key_value_metadata: Option<Vec<KeyValue>>,
) -> Result<()> {
    let file_name = file_path
        .file_name()
        .and_then(|file_name| file_name.to_str())
        .filter(|_file_name| file_path.extension().is_some_and(|extension| extension == "parquet"))
        .ok_or_else(|| {
            GeoDeltaStorageError::InvalidArgument(format!(
                "'{}' is not a valid file path for an Apache Parquet file.",
                file_path.display()
            ))
        })?;

    let folder_path = match file_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => StdPath::new("."),
    };
    fs::create_dir_all(folder_path)?;

    // Write the record batches to a buffer before storing it as the file.
    let mut buffer = Vec::new();
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .set_key_value_metadata(key_value_metadata)
        .build();
    let mut writer = AsyncArrowWriter::try_new(&mut buffer, schema, Some(props))?;
    for record_batch in record_batches {
        writer.write(record_batch).await?;
    }
    writer.close().await?;

    let object_store = LocalFileSystem::new_with_prefix(folder_path)?;
    object_store
        .put(&Path::from(file_name), Bytes::from(buffer).into())
        .await?;

    Ok(())
}
