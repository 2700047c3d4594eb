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

//! The [`Error`] and [`Result`] types used throughout `geodelta_credentials`.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::Error as IoError;
use std::result::Result as StdResult;

/// Result type used throughout `geodelta_credentials`.
pub type Result<T> = StdResult<T, GeoDeltaCredentialsError>;

/// Error type used throughout `geodelta_credentials`.
#[derive(Debug)]
pub enum GeoDeltaCredentialsError {
    /// Error returned when a clock could not provide the current time.
    Clock(String),
    /// Error returned when a credential could not be generated or the generated credential was
    /// not valid for long enough.
    CredentialGeneration(String),
    /// Error returned when an invalid argument was passed.
    InvalidArgument(String),
    /// Error returned from IO operations.
    Io(IoError),
}

impl GeoDeltaCredentialsError {
    /// Wrap `self` in [`CredentialGeneration`](GeoDeltaCredentialsError::CredentialGeneration)
    /// unless it already is one.
    pub(crate) fn into_credential_generation(self) -> Self {
        match self {
            Self::CredentialGeneration(_) => self,
            other => Self::CredentialGeneration(other.to_string()),
        }
    }
}

impl Display for GeoDeltaCredentialsError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::Clock(reason) => write!(f, "Clock Error: {reason}"),
            Self::CredentialGeneration(reason) => {
                write!(f, "Credential Generation Error: {reason}")
            }
            Self::InvalidArgument(reason) => write!(f, "Invalid Argument Error: {reason}"),
            Self::Io(reason) => write!(f, "Io Error: {reason}"),
        }
    }
}

impl Error for GeoDeltaCredentialsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        // Return the error that caused self to occur if one exists.
        match self {
            Self::Clock(_reason) => None,
            Self::CredentialGeneration(_reason) => None,
            Self::InvalidArgument(_reason) => None,
            Self::Io(reason) => Some(reason),
        }
    }
}

impl From<IoError> for GeoDeltaCredentialsError {
    fn from(error: IoError) -> Self {
        Self::Io(error)
    }
}
