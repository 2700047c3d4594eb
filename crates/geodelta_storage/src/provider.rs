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

//! Implementation of [`DeltaProvider`] which exposes the rows in a Delta Lake table as GeoJSON
//! features that can be listed, paged through, and retrieved by id.

use std::sync::Arc;

use arrow::datatypes::{DataType, SchemaRef};
use chrono::TimeDelta;
use datafusion::catalog::TableProvider;
use datafusion::dataframe::DataFrame;
use datafusion::logical_expr::{cast, ident, lit};
use datafusion::prelude::SessionContext;
use geodelta_credentials::CredentialCache;
use serde_json::{Map, Value, json};
use tracing::{debug, error};

use crate::configuration::{GeometrySource, ProviderDefinition};
use crate::error::{GeoDeltaStorageError, Result};
use crate::geojson::{self, FeatureOptions};
use crate::table::DeltaTableSource;

/// Whether a query returns the matching features or only the number of them.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum ResultType {
    #[default]
    Results,
    Hits,
}

/// Parameters of [`DeltaProvider::query()`].
#[derive(Clone, Debug, PartialEq)]
pub struct QueryParameters {
    /// Number of rows to skip.
    pub offset: usize,
    /// Maximum number of features to return.
    pub limit: usize,
    pub result_type: ResultType,
    /// Properties to include in each feature. If empty, all properties are included.
    pub select_properties: Vec<String>,
    /// If `true`, the geometry of each feature is `null`.
    pub skip_geometry: bool,
}

impl Default for QueryParameters {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 10,
            result_type: ResultType::Results,
            select_properties: vec![],
            skip_geometry: false,
        }
    }
}

/// Provider of the rows in a Delta Lake table as GeoJSON features.
pub struct DeltaProvider {
    /// Source of the latest version of the Delta Lake table.
    table_source: DeltaTableSource,
    /// Where the geometry of each feature is read from.
    geometry: GeometrySource,
    /// Column used as the id of each feature. If [`None`], the row index is used.
    id_field: Option<String>,
    /// Session context used to query the table using Apache DataFusion.
    session_context: SessionContext,
}

impl DeltaProvider {
    /// Create a new [`DeltaProvider`] for the table in `provider_definition` that is accessed with
    /// credentials from `credential_cache` that are valid for at least `min_validity`. The table
    /// is opened to check that it exists and that the columns in `provider_definition` are in it.
    /// Returns [`GeoDeltaStorageError`] if `provider_definition` is invalid or the table cannot be
    /// opened.
    pub async fn try_new(
        provider_definition: &ProviderDefinition,
        credential_cache: Arc<CredentialCache>,
        min_validity: TimeDelta,
    ) -> Result<Self> {
        let table_source = DeltaTableSource::new(
            provider_definition.table_location()?,
            credential_cache,
            min_validity,
        );

        let delta_provider = Self {
            table_source,
            geometry: provider_definition.geometry_source()?,
            id_field: provider_definition.id_field.clone(),
            session_context: crate::create_session_context(),
        };

        let schema = delta_provider.schema().await?;
        let mut required_columns = match &delta_provider.geometry {
            GeometrySource::WktColumn(column_name) => vec![column_name],
            GeometrySource::Coordinates { x_field, y_field } => vec![x_field, y_field],
        };
        required_columns.extend(delta_provider.id_field.as_ref());

        for column_name in required_columns {
            if schema.field_with_name(column_name).is_err() {
                let reason = format!(
                    "The column '{column_name}' is not in '{}'.",
                    delta_provider.table_source.location().table_uri()
                );
                error!("{reason}");
                return Err(GeoDeltaStorageError::InvalidArgument(reason));
            }
        }

        Ok(delta_provider)
    }

    /// Return the type of each property as a JSON object with the property names as keys. The
    /// column with WKT geometries is not a property and is thus not included.
    pub async fn fields(&self) -> Result<Map<String, Value>> {
        debug!("Fetching schema for Delta Lake table.");

        let schema = self.schema().await?;
        let fields = schema
            .fields()
            .iter()
            .filter(|field| !self.is_wkt_column(field.name()))
            .map(|field| (field.name().clone(), field_type(field.data_type())))
            .collect();

        Ok(fields)
    }

    /// Return a GeoJSON feature collection with the rows selected by `query_parameters`. If an id
    /// field is configured, the rows are paged through in ascending order of it. Otherwise, the
    /// rows and their row index ids follow the order the table is scanned in, which is only stable
    /// while the table is not changed. Returns [`GeoDeltaStorageError`] if a selected property does
    /// not exist or the table cannot be read.
    pub async fn query(&self, query_parameters: &QueryParameters) -> Result<Value> {
        let data_frame = self.data_frame().await?;

        for property in &query_parameters.select_properties {
            if data_frame.schema().field_with_unqualified_name(property).is_err() {
                return Err(GeoDeltaStorageError::InvalidArgument(format!(
                    "The property '{property}' does not exist."
                )));
            }
        }

        let number_matched = data_frame.clone().count().await?;
        if query_parameters.result_type == ResultType::Hits {
            return Ok(geojson::feature_collection(vec![], number_matched));
        }

        let data_frame = match &self.id_field {
            Some(id_field) => data_frame.sort(vec![ident(id_field).sort(true, false)])?,
            None => data_frame,
        };

        let record_batches = data_frame
            .limit(query_parameters.offset, Some(query_parameters.limit))?
            .collect()
            .await?;

        let features = geojson::record_batches_to_features(
            &record_batches,
            &FeatureOptions {
                geometry: &self.geometry,
                id_field: self.id_field.as_deref(),
                first_row_index: query_parameters.offset,
                skip_geometry: query_parameters.skip_geometry,
                select_properties: &query_parameters.select_properties,
            },
        )?;

        Ok(geojson::feature_collection(features, number_matched))
    }

    /// Return the GeoJSON feature with `identifier`. If an id field is configured, the feature is
    /// found by comparing `identifier` to the id field as text, otherwise `identifier` is the row
    /// index in the order the table is scanned in. Returns [`GeoDeltaStorageError::NotFound`] if
    /// no such feature exists.
    pub async fn get(&self, identifier: &str) -> Result<Value> {
        let not_found = || {
            let reason = format!("item {identifier} not found");
            error!("{reason}");
            GeoDeltaStorageError::NotFound(reason)
        };

        let data_frame = self.data_frame().await?;
        let (data_frame, row_index) = match &self.id_field {
            Some(id_field) => {
                let predicate = cast(ident(id_field), DataType::Utf8).eq(lit(identifier));
                (data_frame.filter(predicate)?.limit(0, Some(1))?, 0)
            }
            None => {
                let row_index: usize = identifier.parse().map_err(|_error| not_found())?;
                (data_frame.limit(row_index, Some(1))?, row_index)
            }
        };

        let record_batches = data_frame.collect().await?;
        let features = geojson::record_batches_to_features(
            &record_batches,
            &FeatureOptions {
                geometry: &self.geometry,
                id_field: self.id_field.as_deref(),
                first_row_index: row_index,
                skip_geometry: false,
                select_properties: &[],
            },
        )?;

        features.into_iter().next().ok_or_else(not_found)
    }

    /// Return a [`DataFrame`] with the latest version of the table.
    async fn data_frame(&self) -> Result<DataFrame> {
        let delta_table = self.table_source.delta_table().await?;
        Ok(self.session_context.read_table(Arc::new(delta_table))?)
    }

    /// Return the Apache Arrow schema of the latest version of the table.
    async fn schema(&self) -> Result<SchemaRef> {
        let delta_table = self.table_source.delta_table().await?;
        Ok(TableProvider::schema(&delta_table))
    }

    fn is_wkt_column(&self, column_name: &str) -> bool {
        matches!(&self.geometry, GeometrySource::WktColumn(wkt_column) if wkt_column == column_name)
    }
}

/// Return the JSON schema type of a property with `data_type`.
fn field_type(data_type: &DataType) -> Value {
    match data_type {
        DataType::Boolean => json!({"type": "boolean"}),
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => json!({"type": "integer"}),
        DataType::Float16
        | DataType::Float32
        | DataType::Float64
        | DataType::Decimal128(_, _)
        | DataType::Decimal256(_, _) => json!({"type": "number"}),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => json!({"type": "string"}),
        DataType::Date32 | DataType::Date64 => json!({"type": "string", "format": "date"}),
        DataType::Timestamp(_, _) => json!({"type": "string", "format": "date-time"}),
        _ => json!({"type": "object"}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::configuration::GeometryFields;
    use crate::test;

    // Tests for DeltaProvider.
    #[tokio::test]
    async fn test_try_new_with_missing_geometry_column() {
        let temp_dir = TempDir::new().unwrap();
        test::write_ais_delta_table(temp_dir.path()).await;

        let mut provider_definition = wkt_provider_definition(&temp_dir);
        provider_definition.geometry_col_name = Some("geom".to_owned());

        let result = DeltaProvider::try_new(
            &provider_definition,
            test::failing_credential_cache(),
            TimeDelta::minutes(1),
        )
        .await;

        assert!(matches!(
            result,
            Err(GeoDeltaStorageError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_fields() {
        let (_temp_dir, delta_provider) = create_wkt_provider().await;
        let fields = delta_provider.fields().await.unwrap();

        assert_eq!(
            Value::Object(fields),
            json!({
                "mmsi": {"type": "integer"},
                "name": {"type": "string"},
                "lon": {"type": "number"},
                "lat": {"type": "number"},
            })
        );
    }

    #[tokio::test]
    async fn test_query_with_default_parameters() {
        let (_temp_dir, delta_provider) = create_wkt_provider().await;
        let feature_collection = delta_provider
            .query(&QueryParameters::default())
            .await
            .unwrap();

        assert_eq!(feature_collection["type"], "FeatureCollection");
        assert_eq!(feature_collection["numberMatched"], test::AIS_ROW_COUNT);
        assert_eq!(feature_collection["numberReturned"], test::AIS_ROW_COUNT);
    }

    #[tokio::test]
    async fn test_query_with_offset_and_limit() {
        let (_temp_dir, delta_provider) = create_coordinates_provider().await;
        let query_parameters = QueryParameters {
            offset: 1,
            limit: 1,
            ..Default::default()
        };

        let feature_collection = delta_provider.query(&query_parameters).await.unwrap();
        let features = feature_collection["features"].as_array().unwrap();

        assert_eq!(feature_collection["numberMatched"], test::AIS_ROW_COUNT);
        assert_eq!(features.len(), 1);
        assert_eq!(features[0]["id"], 1);
        assert_eq!(features[0]["geometry"]["type"], "Point");
    }

    #[tokio::test]
    async fn test_query_pages_in_order_of_id_field() {
        let (temp_dir, delta_provider) = create_wkt_provider().await;
        test::write_delta_table(
            temp_dir.path(),
            test::ais_record_batch_with_mmsis([219000006, 219000004, 219000005]),
        )
        .await;

        let mut ids = vec![];
        for offset in [0, 2, 4] {
            let query_parameters = QueryParameters {
                offset,
                limit: 2,
                ..Default::default()
            };

            let feature_collection = delta_provider.query(&query_parameters).await.unwrap();
            assert_eq!(feature_collection["numberMatched"], 2 * test::AIS_ROW_COUNT);

            let features = feature_collection["features"].as_array().unwrap();
            ids.extend(features.iter().map(|feature| feature["id"].clone()));
        }

        let expected_ids: Vec<Value> = (219000001..=219000006).map(|id| json!(id)).collect();
        assert_eq!(ids, expected_ids);
    }

    #[tokio::test]
    async fn test_query_with_offset_past_last_row() {
        let (_temp_dir, delta_provider) = create_wkt_provider().await;
        let query_parameters = QueryParameters {
            offset: 10,
            ..Default::default()
        };

        let feature_collection = delta_provider.query(&query_parameters).await.unwrap();
        assert_eq!(feature_collection["numberReturned"], 0);
        assert_eq!(feature_collection["features"], json!([]));
    }

    #[tokio::test]
    async fn test_query_hits() {
        let (_temp_dir, delta_provider) = create_wkt_provider().await;
        let query_parameters = QueryParameters {
            result_type: ResultType::Hits,
            ..Default::default()
        };

        let feature_collection = delta_provider.query(&query_parameters).await.unwrap();
        assert_eq!(feature_collection["numberMatched"], test::AIS_ROW_COUNT);
        assert_eq!(feature_collection["numberReturned"], 0);
    }

    #[tokio::test]
    async fn test_query_with_unknown_property() {
        let (_temp_dir, delta_provider) = create_wkt_provider().await;
        let query_parameters = QueryParameters {
            select_properties: vec!["speed".to_owned()],
            ..Default::default()
        };

        let result = delta_provider.query(&query_parameters).await;
        assert!(matches!(
            result,
            Err(GeoDeltaStorageError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_get_by_id_field() {
        let (_temp_dir, delta_provider) = create_wkt_provider().await;
        let feature = delta_provider.get("219000002").await.unwrap();

        assert_eq!(feature["id"], 219000002);
        assert_eq!(feature["properties"]["name"], "Bravo");
        assert_eq!(
            feature["geometry"],
            json!({"type": "Point", "coordinates": [11.0, 56.0]})
        );
    }

    #[tokio::test]
    async fn test_get_by_row_index() {
        let (_temp_dir, delta_provider) = create_coordinates_provider().await;
        let feature = delta_provider.get("2").await.unwrap();

        assert_eq!(feature["id"], 2);
        assert_eq!(feature["properties"]["mmsi"], 219000003);
    }

    #[tokio::test]
    async fn test_get_missing_item() {
        let (_temp_dir, delta_provider) = create_wkt_provider().await;
        let result = delta_provider.get("1").await;

        assert!(matches!(result, Err(GeoDeltaStorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_with_invalid_row_index() {
        let (_temp_dir, delta_provider) = create_coordinates_provider().await;
        let result = delta_provider.get("first").await;

        assert!(matches!(result, Err(GeoDeltaStorageError::NotFound(_))));
    }

    fn wkt_provider_definition(temp_dir: &TempDir) -> ProviderDefinition {
        ProviderDefinition {
            data: Some(temp_dir.path().to_str().unwrap().to_owned()),
            geometry_col_name: Some("position".to_owned()),
            id_field: Some("mmsi".to_owned()),
            ..Default::default()
        }
    }

    async fn create_wkt_provider() -> (TempDir, DeltaProvider) {
        let temp_dir = TempDir::new().unwrap();
        test::write_ais_delta_table(temp_dir.path()).await;

        let delta_provider = DeltaProvider::try_new(
            &wkt_provider_definition(&temp_dir),
            test::failing_credential_cache(),
            TimeDelta::minutes(1),
        )
        .await
        .unwrap();

        (temp_dir, delta_provider)
    }

    async fn create_coordinates_provider() -> (TempDir, DeltaProvider) {
        let temp_dir = TempDir::new().unwrap();
        test::write_ais_delta_table(temp_dir.path()).await;

        let provider_definition = ProviderDefinition {
            data: Some(temp_dir.path().to_str().unwrap().to_owned()),
            geometry: Some(GeometryFields {
                x_field: "lon".to_owned(),
                y_field: "lat".to_owned(),
            }),
            ..Default::default()
        };

        let delta_provider = DeltaProvider::try_new(
            &provider_definition,
            test::failing_credential_cache(),
            TimeDelta::minutes(1),
        )
        .await
        .unwrap();

        (temp_dir, delta_provider)
    }
}
