use std::fmt;

use serde::Serialize;

use super::ConfigError;

/// Tensor compression applied to expert inputs/outputs on the wire.
///
/// The discriminants are the numeric codes the serving engine puts on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[allow(non_camel_case_types)]
pub enum CompressionMode {
    #[default]
    NONE = 0,
    MEANSTD_LAST_AXIS_FLOAT16 = 1,
    FLOAT16 = 2,
    QUANTILE_8BIT = 3,
    UNIFORM_8BIT = 4,
}

/// Names accepted on the command line, checked top to bottom.
///
/// The first row is an alias: `MEANSTD` is spelled differently from the
/// constant it selects. Every other row is the constant's own identifier.
pub const COMPRESSION_TABLE: &[(&str, CompressionMode)] = &[
    ("MEANSTD", CompressionMode::MEANSTD_LAST_AXIS_FLOAT16),
    ("NONE", CompressionMode::NONE),
    (
        "MEANSTD_LAST_AXIS_FLOAT16",
        CompressionMode::MEANSTD_LAST_AXIS_FLOAT16,
    ),
    ("FLOAT16", CompressionMode::FLOAT16),
    ("QUANTILE_8BIT", CompressionMode::QUANTILE_8BIT),
    ("UNIFORM_8BIT", CompressionMode::UNIFORM_8BIT),
];

impl CompressionMode {
    /// Resolve a user-supplied name. Matching is exact and case-sensitive.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        COMPRESSION_TABLE
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, mode)| *mode)
            .ok_or_else(|| ConfigError::UnknownCompressionMode(name.to_string()))
    }

    /// Numeric code used by the wire format
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Canonical identifier of the constant
    pub fn name(self) -> &'static str {
        match self {
            CompressionMode::NONE => "NONE",
            CompressionMode::MEANSTD_LAST_AXIS_FLOAT16 => "MEANSTD_LAST_AXIS_FLOAT16",
            CompressionMode::FLOAT16 => "FLOAT16",
            CompressionMode::QUANTILE_8BIT => "QUANTILE_8BIT",
            CompressionMode::UNIFORM_8BIT => "UNIFORM_8BIT",
        }
    }
}

impl fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
