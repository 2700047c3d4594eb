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

//! Conversion of [`RecordBatches`](RecordBatch) to GeoJSON features. Each row becomes a feature
//! with its columns as properties and a geometry read from either a WKT column or two coordinate
//! columns.

use arrow::array::RecordBatch;
use arrow::json::ArrayWriter;
use geo_types::Geometry;
use serde_json::{Map, Value, json};
use wkt::TryFromWkt;

use crate::configuration::GeometrySource;
use crate::error::{GeoDeltaStorageError, Result};

/// Options controlling how rows are converted to features.
pub struct FeatureOptions<'a> {
    /// Where the geometry of each feature is read from.
    pub geometry: &'a GeometrySource,
    /// Column used as the id of each feature. If [`None`], the row index is used.
    pub id_field: Option<&'a str>,
    /// Row index of the first row in the record batches.
    pub first_row_index: usize,
    /// If `true`, the geometry of each feature is `null`.
    pub skip_geometry: bool,
    /// Properties to include. If empty, all properties are included.
    pub select_properties: &'a [String],
}

/// Convert each row in `record_batches` to a GeoJSON feature as described by `options`. Returns
/// [`GeoDeltaStorageError`] if the rows cannot be converted to JSON or a geometry is invalid.
pub fn record_batches_to_features(
    record_batches: &[RecordBatch],
    options: &FeatureOptions,
) -> Result<Vec<Value>> {
    record_batches_to_rows(record_batches)?
        .into_iter()
        .enumerate()
        .map(|(index, row)| row_to_feature(row, options.first_row_index + index, options))
        .collect()
}

/// Return a GeoJSON feature collection with `features`. `number_matched` is the number of rows
/// that could have been returned.
pub fn feature_collection(features: Vec<Value>, number_matched: usize) -> Value {
    json!({
        "type": "FeatureCollection",
        "features": features,
        "numberMatched": number_matched,
        "numberReturned": features.len(),
    })
}

/// Convert the rows in `record_batches` to JSON objects. Null values are omitted.
fn record_batches_to_rows(record_batches: &[RecordBatch]) -> Result<Vec<Map<String, Value>>> {
    let mut writer = ArrayWriter::new(Vec::new());
    writer.write_batches(&record_batches.iter().collect::<Vec<&RecordBatch>>())?;
    writer.finish()?;

    let buffer = writer.into_inner();
    if buffer.is_empty() {
        Ok(vec![])
    } else {
        Ok(serde_json::from_slice(&buffer)?)
    }
}

/// Convert `row` at `row_index` to a GeoJSON feature.
fn row_to_feature(
    mut row: Map<String, Value>,
    row_index: usize,
    options: &FeatureOptions,
) -> Result<Value> {
    let geometry = match options.geometry {
        GeometrySource::WktColumn(column_name) => match row.remove(column_name) {
            Some(Value::String(wkt)) if !options.skip_geometry => wkt_to_geometry(&wkt)?,
            _ => Value::Null,
        },
        GeometrySource::Coordinates { x_field, y_field } if !options.skip_geometry => {
            match (row.get(x_field), row.get(y_field)) {
                (Some(x), Some(y)) => json!({
                    "type": "Point",
                    "coordinates": [coordinate(x_field, x)?, coordinate(y_field, y)?],
                }),
                _ => Value::Null,
            }
        }
        GeometrySource::Coordinates { .. } => Value::Null,
    };

    let id = match options.id_field {
        Some(id_field) => row.get(id_field).cloned().unwrap_or(Value::Null),
        None => Value::from(row_index),
    };

    if !options.select_properties.is_empty() {
        row.retain(|name, _value| options.select_properties.contains(name));
    }

    Ok(json!({
        "type": "Feature",
        "id": id,
        "geometry": geometry,
        "properties": row,
    }))
}

/// Return the coordinate in `value` from the column `field` as a number.
fn coordinate(field: &str, value: &Value) -> Result<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(string) => string.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| {
        GeoDeltaStorageError::InvalidArgument(format!(
            "The value {value} in {field} is not a coordinate."
        ))
    })
}

/// Parse `wkt` to a [`Geometry`]. Empty geometries such as `POINT EMPTY` are returned as
/// [`None`]. Returns [`GeoDeltaStorageError::InvalidArgument`] if `wkt` is malformed.
pub(crate) fn parse_wkt(wkt: &str) -> Result<Option<Geometry<f64>>> {
    let wkt = wkt.trim();
    if wkt.to_ascii_uppercase().ends_with("EMPTY") {
        return Ok(None);
    }

    let geometry = Geometry::try_from_wkt_str(wkt).map_err(|error| {
        GeoDeltaStorageError::InvalidArgument(format!("'{wkt}' is not valid WKT: {error}"))
    })?;

    Ok(Some(geometry))
}

/// Convert `wkt` to a GeoJSON geometry. Empty geometries are converted to `null`. Only the x and y
/// coordinates are kept. Returns [`GeoDeltaStorageError::InvalidArgument`] if `wkt` is malformed.
pub fn wkt_to_geometry(wkt: &str) -> Result<Value> {
    match parse_wkt(wkt)? {
        Some(geometry) => {
            let geometry = ::geojson::Geometry::new(::geojson::Value::from(&geometry));
            Ok(serde_json::to_value(geometry)?)
        }
        None => Ok(Value::Null),
    }
}
