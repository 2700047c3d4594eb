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

//! Time-bounded, permission-scoped credentials for storage access and a cache that only renews
//! them when they are about to expire.

pub mod cache;
pub mod credential;
pub mod error;
pub mod generator;
pub mod time_source;

pub use cache::{CredentialCache, DEFAULT_CREDENTIAL_LIFETIME};
pub use credential::{Credential, Permission, PermissionSet, ResourceKey};
pub use generator::{AzureCliSasGenerator, CredentialGenerator};
pub use time_source::{ManualTimeSource, SystemTimeSource, TimeSource};
