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

//! Implementation of `geodelta`, a command line interface for reading geospatial data from Delta
//! Lake tables as GeoJSON and exporting them to Apache Parquet.

mod configuration;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use geodelta_credentials::{AzureCliSasGenerator, CredentialCache, SystemTimeSource};
use geodelta_storage::configuration::ProviderDefinition;
use geodelta_storage::process::Delta2ParquetProcessor;
use geodelta_storage::provider::{DeltaProvider, QueryParameters};
use serde_json::{Value, json};
use tokio::runtime::Runtime;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::configuration::Configuration;

/// The maximum number of arguments of any command.
const MAXIMUM_ARGUMENTS: usize = 5;

/// A command parsed from the command line arguments.
#[derive(Debug, PartialEq)]
enum Command {
    /// Print the properties of the provider and their types.
    Fields { provider_path: PathBuf },
    /// Print a page of features from the provider.
    Query {
        provider_path: PathBuf,
        query_parameters: QueryParameters,
    },
    /// Print the feature with `identifier` from the provider.
    Get {
        provider_path: PathBuf,
        identifier: String,
    },
    /// Export a Delta Lake table in Azure to an Apache Parquet file.
    Export { inputs: Value },
}

/// Setup tracing that prints to stdout, read the [`Configuration`] from the environment, parse the
/// command line arguments to a [`Command`], execute it, and print its result as JSON. Returns
/// [`String`] if the configuration or arguments are invalid or if the command fails.
fn main() -> Result<(), String> {
    // Initialize a tracing layer that logs events to stdout.
    let stdout_log = tracing_subscriber::fmt::layer();
    tracing_subscriber::registry().with(stdout_log).init();

    let runtime =
        Runtime::new().map_err(|error| format!("Unable to create a Tokio Runtime: {error}"))?;

    let configuration = Configuration::from_env()?;

    let arguments = collect_command_line_arguments(MAXIMUM_ARGUMENTS);
    let arguments: Vec<&str> = arguments.iter().map(|arg| arg.as_str()).collect();
    let command = parse_command_line_arguments(&arguments)?;

    let credential_cache = create_credential_cache(&configuration)?;
    let output = runtime.block_on(execute_command(command, credential_cache, &configuration))?;

    let output = serde_json::to_string_pretty(&output).map_err(|error| error.to_string())?;
    println!("{output}");

    Ok(())
}

/// Collect the command line arguments that this program was started with. At most
/// `maximum_arguments` plus one are collected so too many arguments can be detected.
fn collect_command_line_arguments(maximum_arguments: usize) -> Vec<String> {
    let mut args = std::env::args();
    args.next(); // Skip the executable.

    args.by_ref().take(maximum_arguments + 1).collect()
}

/// Parse the command line arguments into a [`Command`]. If the arguments do not match any command
/// or are malformed, [`String`] is returned.
fn parse_command_line_arguments(arguments: &[&str]) -> Result<Command, String> {
    match arguments {
        &["fields", provider_path] => Ok(Command::Fields {
            provider_path: PathBuf::from(provider_path),
        }),
        &["query", provider_path, ref page @ ..] if page.len() <= 2 => {
            let mut query_parameters = QueryParameters::default();
            if let Some(offset) = page.first() {
                query_parameters.offset = parse_argument("offset", offset)?;
            }
            if let Some(limit) = page.get(1) {
                query_parameters.limit = parse_argument("limit", limit)?;
            }

            Ok(Command::Query {
                provider_path: PathBuf::from(provider_path),
                query_parameters,
            })
        }
        &["get", provider_path, identifier] => Ok(Command::Get {
            provider_path: PathBuf::from(provider_path),
            identifier: identifier.to_owned(),
        }),
        &["export", account_name, container_name, path, parquet_path] => Ok(Command::Export {
            inputs: json!({
                "deltaAccount": account_name,
                "deltaContainer": container_name,
                "deltaBlobPath": path,
                "parquetPath": parquet_path,
            }),
        }),
        _ => {
            let binary_name = std::env::current_exe()
                .ok()
                .and_then(|binary_path| {
                    binary_path
                        .file_name()
                        .and_then(|file_name| file_name.to_str().map(str::to_owned))
                })
                .unwrap_or_else(|| "geodelta".to_owned());

            Err(format!(
                "Usage: {binary_name} fields provider.toml\n       \
                 {binary_name} query provider.toml [offset] [limit]\n       \
                 {binary_name} get provider.toml identifier\n       \
                 {binary_name} export account container path parquet_path"
            ))
        }
    }
}

/// Parse `value` of the argument `name` as a non-negative integer.
fn parse_argument(name: &str, value: &str) -> Result<usize, String> {
    value
        .parse()
        .map_err(|_error| format!("The {name} must be a non-negative integer, not '{value}'."))
}

/// Create a [`CredentialCache`] that generates shared access signatures using the Azure CLI.
fn create_credential_cache(configuration: &Configuration) -> Result<Arc<CredentialCache>, String> {
    let time_source = Arc::new(SystemTimeSource);
    let generator = Arc::new(AzureCliSasGenerator::new(
        configuration.az_path.clone(),
        time_source.clone(),
    ));

    let credential_cache = CredentialCache::try_with_lifetime(
        generator,
        time_source,
        configuration.credential_lifetime,
    )
    .map_err(|error| error.to_string())?;

    Ok(Arc::new(credential_cache))
}

/// Execute `command` with credentials from `credential_cache` and return its result as JSON.
async fn execute_command(
    command: Command,
    credential_cache: Arc<CredentialCache>,
    configuration: &Configuration,
) -> Result<Value, String> {
    debug!("Executing {command:?}.");

    match command {
        Command::Fields { provider_path } => {
            let provider =
                create_provider(&provider_path, credential_cache, configuration).await?;
            let fields = provider.fields().await.map_err(|error| error.to_string())?;

            Ok(Value::Object(fields))
        }
        Command::Query {
            provider_path,
            query_parameters,
        } => {
            let provider =
                create_provider(&provider_path, credential_cache, configuration).await?;

            provider
                .query(&query_parameters)
                .await
                .map_err(|error| error.to_string())
        }
        Command::Get {
            provider_path,
            identifier,
        } => {
            let provider =
                create_provider(&provider_path, credential_cache, configuration).await?;

            provider
                .get(&identifier)
                .await
                .map_err(|error| error.to_string())
        }
        Command::Export { inputs } => {
            let processor =
                Delta2ParquetProcessor::new(credential_cache, configuration.min_validity);

            let (_mime_type, outputs) = processor
                .execute(&inputs)
                .await
                .map_err(|error| error.to_string())?;

            Ok(outputs)
        }
    }
}

/// Read the provider definition at `provider_path` and create a [`DeltaProvider`] from it.
async fn create_provider(
    provider_path: &Path,
    credential_cache: Arc<CredentialCache>,
    configuration: &Configuration,
) -> Result<DeltaProvider, String> {
    let toml = fs::read_to_string(provider_path).map_err(|error| {
        format!(
            "Unable to read provider definition '{}': {error}",
            provider_path.display()
        )
    })?;

    let provider_definition =
        ProviderDefinition::from_toml(&toml).map_err(|error| error.to_string())?;

    DeltaProvider::try_new(
        &provider_definition,
        credential_cache,
        configuration.min_validity,
    )
    .await
    .map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use geodelta_storage::provider::ResultType;

    // Tests for parse_command_line_arguments().
    #[test]
    fn test_parse_empty_command_line_arguments() {
        assert!(parse_command_line_arguments(&[]).is_err());
    }

    #[test]
    fn test_parse_fields_command_line_arguments() {
        assert_eq!(
            parse_command_line_arguments(&["fields", "ais.toml"]).unwrap(),
            Command::Fields {
                provider_path: PathBuf::from("ais.toml")
            }
        );
    }

    #[test]
    fn test_parse_query_command_line_arguments_without_page() {
        let Command::Query {
            query_parameters, ..
        } = parse_command_line_arguments(&["query", "ais.toml"]).unwrap()
        else {
            panic!("Expected a query command.");
        };

        assert_eq!(query_parameters, QueryParameters::default());
        assert_eq!(query_parameters.result_type, ResultType::Results);
    }

    #[test]
    fn test_parse_query_command_line_arguments_with_page() {
        let Command::Query {
            query_parameters, ..
        } = parse_command_line_arguments(&["query", "ais.toml", "20", "5"]).unwrap()
        else {
            panic!("Expected a query command.");
        };

        assert_eq!(query_parameters.offset, 20);
        assert_eq!(query_parameters.limit, 5);
    }

    #[test]
    fn test_parse_query_command_line_arguments_with_negative_offset() {
        assert!(parse_command_line_arguments(&["query", "ais.toml", "-1"]).is_err());
    }

    #[test]
    fn test_parse_query_command_line_arguments_with_too_many_arguments() {
        assert!(parse_command_line_arguments(&["query", "ais.toml", "0", "10", "20"]).is_err());
    }

    #[test]
    fn test_parse_get_command_line_arguments() {
        assert_eq!(
            parse_command_line_arguments(&["get", "ais.toml", "219000001"]).unwrap(),
            Command::Get {
                provider_path: PathBuf::from("ais.toml"),
                identifier: "219000001".to_owned()
            }
        );
    }

    #[test]
    fn test_parse_export_command_line_arguments() {
        let command = parse_command_line_arguments(&[
            "export",
            "account",
            "silver",
            "spire/ais/delta",
            "ais.parquet",
        ])
        .unwrap();

        let Command::Export { inputs } = command else {
            panic!("Expected an export command.");
        };
        assert_eq!(inputs["deltaContainer"], "silver");
        assert_eq!(inputs["parquetPath"], "ais.parquet");
    }

    #[test]
    fn test_parse_incomplete_export_command_line_arguments() {
        assert!(parse_command_line_arguments(&["export", "account", "silver"]).is_err());
    }

    // Tests for execute_command().
    #[tokio::test]
    async fn test_execute_fields_with_missing_provider_definition() {
        let configuration = Configuration {
            credential_lifetime: chrono::TimeDelta::minutes(5),
            min_validity: chrono::TimeDelta::minutes(1),
            az_path: "az".to_owned(),
        };
        let credential_cache = create_credential_cache(&configuration).unwrap();
        let command = Command::Fields {
            provider_path: PathBuf::from("does/not/exist.toml"),
        };

        let result = execute_command(command, credential_cache, &configuration).await;
        assert!(result.unwrap_err().contains("Unable to read provider definition"));
    }
}
