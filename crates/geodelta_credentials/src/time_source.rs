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

//! Clocks used to decide when a credential expires. All clocks return UTC so expiry times from
//! different sources can be compared directly.

use std::sync::RwLock;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{GeoDeltaCredentialsError, Result};

/// Source of the current time.
pub trait TimeSource: Send + Sync {
    /// Return the current time in UTC, or [`GeoDeltaCredentialsError::Clock`] if it is not
    /// available.
    fn now(&self) -> Result<DateTime<Utc>>;
}

/// [`TimeSource`] that reads the system's wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Result<DateTime<Utc>> {
        Ok(Utc::now())
    }
}

/// [`TimeSource`] that only moves when it is told to. Used to control expiry in tests.
#[derive(Debug)]
pub struct ManualTimeSource {
    now: RwLock<DateTime<Utc>>,
}

impl ManualTimeSource {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Set the current time to `now`.
    pub fn set(&self, now: DateTime<Utc>) -> Result<()> {
        let mut current = self
            .now
            .write()
            .map_err(|error| GeoDeltaCredentialsError::Clock(error.to_string()))?;

        *current = now;
        Ok(())
    }

    /// Move the current time `time_delta` forward. If the new time cannot be represented,
    /// [`GeoDeltaCredentialsError::Clock`] is returned and the time is not changed.
    pub fn advance(&self, time_delta: TimeDelta) -> Result<()> {
        let mut current = self
            .now
            .write()
            .map_err(|error| GeoDeltaCredentialsError::Clock(error.to_string()))?;

        *current = current.checked_add_signed(time_delta).ok_or_else(|| {
            GeoDeltaCredentialsError::Clock(format!(
                "Advancing {} by {time_delta} overflows.",
                *current
            ))
        })?;
        Ok(())
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Result<DateTime<Utc>> {
        self.now
            .read()
            .map(|now| *now)
            .map_err(|error| GeoDeltaCredentialsError::Clock(error.to_string()))
    }
}
