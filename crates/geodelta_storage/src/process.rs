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

//! Implementation of the `Delta2Parquet` process which copies a Delta Lake table in Azure to a
//! single GeoParquet file. The WKT geometry column of the table is stored as WKB and described by
//! the `geo` file metadata.

use std::collections::BTreeSet;
use std::path::Path as StdPath;
use std::sync::{Arc, LazyLock};

use arrow::array::{Array, AsArray, BinaryBuilder, RecordBatch};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, FieldRef, Schema, SchemaRef};
use chrono::TimeDelta;
use datafusion::parquet::format::KeyValue;
use geo_types::Geometry;
use geodelta_credentials::{CredentialCache, ResourceKey};
use geozero::{CoordDimensions, ToWkb};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::configuration::TableLocation;
use crate::error::{GeoDeltaStorageError, Result};
use crate::geojson::parse_wkt;
use crate::table::DeltaTableSource;

/// Column with WKT geometries that is exported if the inputs do not name one.
pub const DEFAULT_GEOMETRY_COLUMN: &str = "position";

/// Key of the Apache Parquet file metadata that describes the geometry columns.
const GEOPARQUET_METADATA_KEY: &str = "geo";

/// Version of the GeoParquet specification the exported files follow.
const GEOPARQUET_VERSION: &str = "1.0.0";

/// Description of the process, its inputs, and its outputs.
pub static PROCESS_METADATA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "id": "Delta2Parquet",
        "title": "Parquet Update From Delta",
        "description": "Updates the data from the delta lake.",
        "version": "1.0.0",
        "jobControlOptions": ["async-execute"],
        "outputTransmission": ["value", "reference"],
        "inputs": {
            "deltaAccount": string_input(
                "Delta Account Name",
                "Azure account name where the delta table resides."
            ),
            "deltaContainer": string_input(
                "Delta Container Name",
                "Azure container name where the delta table resides."
            ),
            "deltaBlobPath": string_input(
                "Delta Blob Path Name",
                "Azure blob path where the delta table resides."
            ),
            "parquetPath": string_input(
                "Parquet Path",
                "Path of the GeoParquet file the delta table is written to."
            ),
            "geometryColumn": {
                "title": "Geometry Column",
                "description": "Column with WKT geometries. Defaults to position.",
                "minOccurs": 0,
                "maxOccurs": 1,
                "schema": {"type": "string"}
            },
        },
        "outputs": {
            "status": {"schema": {"type": "string"}}
        },
        "example": {
            "inputs": {
                "deltaAccount": "account",
                "deltaContainer": "silver",
                "deltaBlobPath": "spire/ais/delta",
                "parquetPath": "test/test.parquet",
            }
        }
    })
});

/// Return the description of a required input of type string.
fn string_input(title: &str, description: &str) -> Value {
    json!({
        "title": title,
        "description": description,
        "minOccurs": 1,
        "maxOccurs": 1,
        "schema": {"type": "string"}
    })
}

/// The inputs of the process as received from the caller.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Delta2ParquetInputs {
    delta_account: Option<String>,
    delta_container: Option<String>,
    delta_blob_path: Option<String>,
    parquet_path: Option<String>,
    geometry_column: Option<String>,
}

/// Executes the `Delta2Parquet` process using credentials from a shared [`CredentialCache`].
pub struct Delta2ParquetProcessor {
    credential_cache: Arc<CredentialCache>,
    /// How long a credential must at least be valid when the table is read.
    min_validity: TimeDelta,
}

impl Delta2ParquetProcessor {
    pub fn new(credential_cache: Arc<CredentialCache>, min_validity: TimeDelta) -> Self {
        Self {
            credential_cache,
            min_validity,
        }
    }

    pub fn metadata(&self) -> &'static Value {
        &PROCESS_METADATA
    }

    /// Copy the Delta Lake table given by `inputs` to the Apache Parquet file given by `inputs` and
    /// return the MIME type and the outputs of the process. Returns
    /// [`GeoDeltaStorageError::InvalidArgument`] if an input is missing or empty, and
    /// [`GeoDeltaStorageError`] if the table cannot be read or the file cannot be written.
    pub async fn execute(&self, inputs: &Value) -> Result<(&'static str, Value)> {
        let inputs: Delta2ParquetInputs = serde_json::from_value(inputs.clone())?;

        let (Some(account_name), Some(container_name), Some(path), Some(parquet_path)) = (
            non_empty(inputs.delta_account),
            non_empty(inputs.delta_container),
            non_empty(inputs.delta_blob_path),
            non_empty(inputs.parquet_path),
        ) else {
            return Err(GeoDeltaStorageError::InvalidArgument(
                "Cannot run process without delta and parquet paths specified.".to_owned(),
            ));
        };

        let geometry_column = non_empty(inputs.geometry_column)
            .unwrap_or_else(|| DEFAULT_GEOMETRY_COLUMN.to_owned());

        let location =
            TableLocation::Azure(ResourceKey::new(account_name, container_name, path));
        self.export(&location, &geometry_column, StdPath::new(&parquet_path))
            .await?;

        Ok(("application/json", json!({"status": "ok"})))
    }

    /// Write all rows in the Delta Lake table at `location` to the GeoParquet file at
    /// `parquet_path` and return the number of rows written. The WKT in `geometry_column` is
    /// written as WKB. Returns [`GeoDeltaStorageError::InvalidArgument`] if `geometry_column` is
    /// not a string column in the table or contains malformed WKT.
    pub async fn export(
        &self,
        location: &TableLocation,
        geometry_column: &str,
        parquet_path: &StdPath,
    ) -> Result<usize> {
        let table_source = DeltaTableSource::new(
            location.clone(),
            self.credential_cache.clone(),
            self.min_validity,
        );
        let delta_table = table_source.delta_table().await?;

        let data_frame = crate::create_session_context().read_table(Arc::new(delta_table))?;
        let schema = data_frame.schema().as_arrow().clone();
        let record_batches = data_frame.collect().await?;

        let (schema, record_batches, geometry_types) =
            encode_geometry_column(&schema, &record_batches, geometry_column)?;

        let geo_metadata = json!({
            "version": GEOPARQUET_VERSION,
            "primary_column": geometry_column,
            "columns": {
                geometry_column: {
                    "encoding": "WKB",
                    "geometry_types": geometry_types,
                }
            }
        });
        let key_value_metadata = vec![KeyValue {
            key: GEOPARQUET_METADATA_KEY.to_owned(),
            value: Some(geo_metadata.to_string()),
        }];

        crate::write_record_batches_to_apache_parquet_file(
            parquet_path,
            schema,
            &record_batches,
            Some(key_value_metadata),
        )
        .await?;

        let row_count = record_batches
            .iter()
            .map(|record_batch| record_batch.num_rows())
            .sum();

        info!(
            "Exported {row_count} rows from '{}' to '{}'.",
            location.table_uri(),
            parquet_path.display()
        );

        Ok(row_count)
    }
}

fn non_empty(input: Option<String>) -> Option<String> {
    input.filter(|input| !input.trim().is_empty())
}

/// Replace the WKT column `geometry_column` in `record_batches` with a column of WKB. Null and
/// empty geometries are written as null. Return the schema of the new record batches, the new
/// record batches, and the GeoParquet names of the geometry types in the column.
fn encode_geometry_column(
    schema: &Schema,
    record_batches: &[RecordBatch],
    geometry_column: &str,
) -> Result<(SchemaRef, Vec<RecordBatch>, BTreeSet<&'static str>)> {
    let column_index = schema
        .index_of(geometry_column)
        .ok()
        .filter(|index| {
            matches!(
                schema.field(*index).data_type(),
                DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View
            )
        })
        .ok_or_else(|| {
            GeoDeltaStorageError::InvalidArgument(format!(
                "The table does not have a WKT geometry column named '{geometry_column}'."
            ))
        })?;

    let mut fields: Vec<FieldRef> = schema.fields().iter().cloned().collect();
    fields[column_index] = Arc::new(Field::new(geometry_column, DataType::Binary, true));
    let wkb_schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));

    let mut geometry_types = BTreeSet::new();
    let mut wkb_record_batches = Vec::with_capacity(record_batches.len());

    for record_batch in record_batches {
        let wkt_array = cast(record_batch.column(column_index), &DataType::Utf8)?;
        let wkt_array = wkt_array.as_string_opt::<i32>().ok_or_else(|| {
            GeoDeltaStorageError::InvalidArgument(format!(
                "The column '{geometry_column}' could not be read as WKT."
            ))
        })?;

        let mut wkb_builder = BinaryBuilder::with_capacity(wkt_array.len(), 0);
        for wkt in wkt_array {
            match wkt.map(parse_wkt).transpose()?.flatten() {
                Some(geometry) => {
                    geometry_types.insert(geoparquet_geometry_type(&geometry));

                    let wkb = geometry.to_wkb(CoordDimensions::xy()).map_err(|error| {
                        GeoDeltaStorageError::InvalidArgument(format!(
                            "The geometry in '{geometry_column}' cannot be encoded as WKB: \
                             {error}"
                        ))
                    })?;
                    wkb_builder.append_value(wkb);
                }
                None => wkb_builder.append_null(),
            }
        }

        let mut columns = record_batch.columns().to_vec();
        columns[column_index] = Arc::new(wkb_builder.finish());
        wkb_record_batches.push(RecordBatch::try_new(wkb_schema.clone(), columns)?);
    }

    Ok((wkb_schema, wkb_record_batches, geometry_types))
}

/// Return the name GeoParquet uses for the type of `geometry`.
fn geoparquet_geometry_type(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) | Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs::File;

    use datafusion::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::TempDir;

    use crate::test;

    #[test]
    fn test_process_metadata() {
        let metadata = &*PROCESS_METADATA;

        assert_eq!(metadata["id"], "Delta2Parquet");
        assert_eq!(metadata["jobControlOptions"], json!(["async-execute"]));
        for input in ["deltaAccount", "deltaContainer", "deltaBlobPath", "parquetPath"] {
            assert_eq!(metadata["inputs"][input]["minOccurs"], 1);
        }
        assert_eq!(metadata["inputs"]["geometryColumn"]["minOccurs"], 0);
        assert_eq!(metadata["outputs"]["status"]["schema"]["type"], "string");
    }

    #[tokio::test]
    async fn test_export_local_table() {
        let temp_dir = TempDir::new().unwrap();
        let table_path = temp_dir.path().join("ais");
        test::write_ais_delta_table(&table_path).await;

        let parquet_path = temp_dir.path().join("export").join("ais.parquet");
        let processor = create_processor();
        let location = TableLocation::Url(table_path.to_str().unwrap().to_owned());

        let row_count = processor
            .export(&location, DEFAULT_GEOMETRY_COLUMN, &parquet_path)
            .await
            .unwrap();
        assert_eq!(row_count, test::AIS_ROW_COUNT);

        let builder =
            ParquetRecordBatchReaderBuilder::try_new(File::open(parquet_path).unwrap()).unwrap();

        let geo_metadata = geo_metadata(&builder);
        assert_eq!(geo_metadata["version"], "1.0.0");
        assert_eq!(geo_metadata["primary_column"], "position");
        assert_eq!(
            geo_metadata["columns"]["position"],
            json!({"encoding": "WKB", "geometry_types": ["Point"]})
        );

        let record_batches: Vec<RecordBatch> =
            builder.build().unwrap().map(|batch| batch.unwrap()).collect();
        let read_rows: usize = record_batches.iter().map(|batch| batch.num_rows()).sum();
        assert_eq!(read_rows, test::AIS_ROW_COUNT);

        // Little-endian WKB of POINT (10.5 55.25) followed by two rows without a position.
        let positions = record_batches[0]
            .column_by_name("position")
            .unwrap()
            .as_binary::<i32>();
        let wkb = positions.value(0);
        assert_eq!(wkb.len(), 21);
        assert_eq!(wkb[0], 1);
        assert_eq!(u32::from_le_bytes(wkb[1..5].try_into().unwrap()), 1);
        assert_eq!(f64::from_le_bytes(wkb[5..13].try_into().unwrap()), 10.5);
        assert_eq!(f64::from_le_bytes(wkb[13..21].try_into().unwrap()), 55.25);
        assert!(positions.is_null(2));
        assert_eq!(record_batches[0].num_columns(), 5);
    }

    #[tokio::test]
    async fn test_export_local_table_with_polygon_and_multipoint() {
        let temp_dir = TempDir::new().unwrap();
        let table_path = temp_dir.path().join("shapes");
        test::write_delta_table(&table_path, test::shapes_record_batch()).await;

        let parquet_path = temp_dir.path().join("shapes.parquet");
        let processor = create_processor();
        let location = TableLocation::Url(table_path.to_str().unwrap().to_owned());

        processor
            .export(&location, "shape", &parquet_path)
            .await
            .unwrap();

        let builder =
            ParquetRecordBatchReaderBuilder::try_new(File::open(parquet_path).unwrap()).unwrap();
        let geo_metadata = geo_metadata(&builder);

        assert_eq!(geo_metadata["primary_column"], "shape");
        assert_eq!(
            geo_metadata["columns"]["shape"]["geometry_types"],
            json!(["MultiPoint", "Polygon"])
        );
    }

    #[tokio::test]
    async fn test_export_local_table_without_geometry_column() {
        let temp_dir = TempDir::new().unwrap();
        let table_path = temp_dir.path().join("ais");
        test::write_ais_delta_table(&table_path).await;

        let parquet_path = temp_dir.path().join("ais.parquet");
        let processor = create_processor();
        let location = TableLocation::Url(table_path.to_str().unwrap().to_owned());

        // The column exists but does not contain WKT.
        for geometry_column in ["geometry", "lon"] {
            let result = processor
                .export(&location, geometry_column, &parquet_path)
                .await;

            assert!(matches!(
                result,
                Err(GeoDeltaStorageError::InvalidArgument(_))
            ));
        }
        assert!(!parquet_path.exists());
    }

    #[tokio::test]
    async fn test_export_to_path_without_parquet_extension() {
        let temp_dir = TempDir::new().unwrap();
        let table_path = temp_dir.path().join("ais");
        test::write_ais_delta_table(&table_path).await;

        let processor = create_processor();
        let location = TableLocation::Url(table_path.to_str().unwrap().to_owned());
        let result = processor
            .export(
                &location,
                DEFAULT_GEOMETRY_COLUMN,
                &temp_dir.path().join("ais.csv"),
            )
            .await;

        assert!(matches!(
            result,
            Err(GeoDeltaStorageError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_with_missing_inputs() {
        let processor = create_processor();
        let inputs = json!({
            "deltaAccount": "account",
            "deltaContainer": "silver",
            "parquetPath": "test/test.parquet",
        });

        let result = processor.execute(&inputs).await;
        assert!(matches!(
            result,
            Err(GeoDeltaStorageError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_with_empty_input() {
        let processor = create_processor();
        let inputs = json!({
            "deltaAccount": "account",
            "deltaContainer": " ",
            "deltaBlobPath": "spire/ais/delta",
            "parquetPath": "test/test.parquet",
        });

        let result = processor.execute(&inputs).await;
        assert!(matches!(
            result,
            Err(GeoDeltaStorageError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_without_credential() {
        let processor = create_processor();
        let inputs = json!({
            "deltaAccount": "account",
            "deltaContainer": "silver",
            "deltaBlobPath": "spire/ais/delta",
            "parquetPath": "test/test.parquet",
        });

        let result = processor.execute(&inputs).await;
        assert!(matches!(
            result,
            Err(GeoDeltaStorageError::GeoDeltaCredentials(_))
        ));
    }

    /// Return the `geo` metadata of the Apache Parquet file read by `builder`.
    fn geo_metadata(builder: &ParquetRecordBatchReaderBuilder<File>) -> Value {
        let key_value = builder
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .unwrap()
            .iter()
            .find(|key_value| key_value.key == "geo")
            .unwrap();

        serde_json::from_str(key_value.value.as_ref().unwrap()).unwrap()
    }

    fn create_processor() -> Delta2ParquetProcessor {
        Delta2ParquetProcessor::new(test::failing_credential_cache(), TimeDelta::minutes(1))
    }
}
