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

//! Configuration of `geodelta` read from environment variables.

use std::env;

use chrono::TimeDelta;
use geodelta_credentials::DEFAULT_CREDENTIAL_LIFETIME;

/// Environment variable with the lifetime of generated credentials in seconds.
const CREDENTIAL_LIFETIME_VARIABLE: &str = "GEODELTA_CREDENTIAL_LIFETIME_IN_SECONDS";

/// Environment variable with how long a credential must at least be valid when used in seconds.
const MIN_VALIDITY_VARIABLE: &str = "GEODELTA_MIN_VALIDITY_IN_SECONDS";

/// Environment variable with the path of the Azure CLI.
const AZ_PATH_VARIABLE: &str = "GEODELTA_AZ_PATH";

/// Settings that control how credentials are generated and cached.
#[derive(Clone, Debug, PartialEq)]
pub struct Configuration {
    /// Lifetime of the credentials generated by the Azure CLI.
    pub credential_lifetime: TimeDelta,
    /// How long a credential must at least be valid when a table is read.
    pub min_validity: TimeDelta,
    /// Path of the Azure CLI executable.
    pub az_path: String,
}

impl Configuration {
    /// Read the [`Configuration`] from the environment variables and use the defaults for those
    /// that are not set. Returns [`String`] if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read the [`Configuration`] using `lookup` to retrieve the value of each variable.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let credential_lifetime = lookup(CREDENTIAL_LIFETIME_VARIABLE)
            .map_or(Ok(DEFAULT_CREDENTIAL_LIFETIME), |value| {
                parse_seconds(CREDENTIAL_LIFETIME_VARIABLE, &value)
            })?;

        let min_validity = lookup(MIN_VALIDITY_VARIABLE)
            .map_or(Ok(TimeDelta::minutes(1)), |value| {
                parse_seconds(MIN_VALIDITY_VARIABLE, &value)
            })?;

        if min_validity >= credential_lifetime {
            return Err(format!(
                "{MIN_VALIDITY_VARIABLE} must be less than {CREDENTIAL_LIFETIME_VARIABLE}."
            ));
        }

        let az_path = lookup(AZ_PATH_VARIABLE).unwrap_or_else(|| "az".to_owned());

        Ok(Self {
            credential_lifetime,
            min_validity,
            az_path,
        })
    }
}

/// Parse `value` of the environment variable `name` as a positive number of seconds.
fn parse_seconds(name: &str, value: &str) -> Result<TimeDelta, String> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|seconds| *seconds > 0)
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| {
            format!("{name} must be a positive number of seconds, not '{value}'.")
        })
}
