// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A human-readable byte size, usable in configuration structs and files.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use snafu::Snafu;

pub const B: u64 = 1;
pub const KIB: u64 = 1024 * B;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;
pub const PIB: u64 = 1024 * TIB;

#[derive(Debug, Snafu)]
#[snafu(display("invalid readable size: {input}"))]
pub struct ParseReadableSizeError {
    input: String,
}

/// A byte count that renders and parses as `4KiB`-style strings.
///
/// The inner value is the exact number of bytes; the unit suffix is only a
/// presentation concern.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReadableSize(pub u64);

impl ReadableSize {
    #[must_use]
    pub const fn kb(count: u64) -> Self { Self(count * KIB) }

    #[must_use]
    pub const fn mb(count: u64) -> Self { Self(count * MIB) }

    #[must_use]
    pub const fn gb(count: u64) -> Self { Self(count * GIB) }

    #[must_use]
    pub const fn as_bytes(self) -> u64 { self.0 }

    #[must_use]
    pub const fn as_mb(self) -> u64 { self.0 / MIB }
}

impl fmt::Display for ReadableSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = self.0;
        if size == 0 {
            return write!(f, "{size}B");
        }

        for (unit, suffix) in [(PIB, "PiB"), (TIB, "TiB"), (GIB, "GiB"), (MIB, "MiB"), (KIB, "KiB")]
        {
            if size % unit == 0 {
                return write!(f, "{}{suffix}", size / unit);
            }
        }
        write!(f, "{size}B")
    }
}

impl FromStr for ReadableSize {
    type Err = ParseReadableSizeError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let value = input.trim();
        let err = || ParseReadableSizeError {
            input: input.to_string(),
        };

        let split = value
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(value.len());
        let (number, suffix) = value.split_at(split);
        let number: f64 = number.parse().map_err(|_| err())?;

        let unit = match suffix.trim() {
            "" | "B" | "b" => B,
            "K" | "KB" | "KiB" | "k" | "kb" => KIB,
            "M" | "MB" | "MiB" | "m" | "mb" => MIB,
            "G" | "GB" | "GiB" | "g" | "gb" => GIB,
            "T" | "TB" | "TiB" | "t" | "tb" => TIB,
            "P" | "PB" | "PiB" | "p" | "pb" => PIB,
            _ => return Err(err()),
        };

        if number < 0.0 || !number.is_finite() {
            return Err(err());
        }

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        #[allow(clippy::cast_sign_loss)]
        let bytes = (number * unit as f64).round() as u64;
        Ok(Self(bytes))
    }
}

impl Serialize for ReadableSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ReadableSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SizeVisitor;

        impl de::Visitor<'_> for SizeVisitor {
            type Value = ReadableSize;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a byte count or a size string like \"4MiB\"")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                Ok(ReadableSize(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                u64::try_from(value)
                    .map(ReadableSize)
                    .map_err(|_| E::custom(format!("size must be non-negative: {value}")))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                value.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(SizeVisitor)
    }
}
