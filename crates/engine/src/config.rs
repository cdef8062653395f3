// Engine configuration
// Loaded from TOML; every field has a default so an empty file is valid.

use std::path::Path;

use cellgraph_core::Axis;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// What to do when a formula's new result is a runtime or propagated error
/// but the cell already holds a good value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorFallback {
    /// Always store the new error.
    #[default]
    Never,
    /// Keep the previous non-error value for `#ERROR` results.
    /// `#CYCLE`, `#REF`, `#BAD_EXPR` and `#N/A` are always stored.
    RetainOnRuntimeError,
}

/// Sheet defaults used when a command does not give explicit dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetDefaults {
    pub rows: usize,
    pub cols: usize,
    /// Row height in pixels.
    pub row_size: u32,
    /// Column width in pixels.
    pub col_size: u32,
    /// Name given to the sheet of a fresh workbook.
    pub first_sheet_name: String,
    /// Largest row count a sheet may grow to.
    pub max_rows: usize,
    /// Largest column count a sheet may grow to.
    pub max_cols: usize,
}

impl Default for SheetDefaults {
    fn default() -> Self {
        Self {
            rows: 100,
            cols: 26,
            row_size: 23,
            col_size: 96,
            first_sheet_name: "Sheet1".to_string(),
            max_rows: 1_048_576,
            max_cols: 16_384,
        }
    }
}

impl SheetDefaults {
    pub fn max_len(&self, axis: Axis) -> usize {
        match axis {
            Axis::Col => self.max_cols,
            Axis::Row => self.max_rows,
        }
    }

    /// True if a sheet of `cols` x `rows` is allowed.
    pub fn fits(&self, cols: usize, rows: usize) -> bool {
        cols >= 1 && rows >= 1 && cols <= self.max_cols && rows <= self.max_rows
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationSettings {
    pub error_fallback: ErrorFallback,
    /// Number of distinct formula texts kept in the compile cache.
    pub compile_cache_capacity: usize,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            error_fallback: ErrorFallback::Never,
            compile_cache_capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Maximum number of undo records; `None` keeps everything.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_undo: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sheet: SheetDefaults,
    pub evaluation: EvaluationSettings,
    pub history: HistorySettings,
}

impl EngineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("loaded engine config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, EngineError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.sheet.rows == 0 || self.sheet.cols == 0 {
            return Err(EngineError::InvalidConfig(
                "sheet.rows and sheet.cols must be at least 1".to_string(),
            ));
        }
        if !self.sheet.fits(self.sheet.cols, self.sheet.rows) {
            return Err(EngineError::InvalidConfig(
                "sheet.rows and sheet.cols must not exceed sheet.max_rows and sheet.max_cols".to_string(),
            ));
        }
        if self.sheet.first_sheet_name.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "sheet.first_sheet_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.evaluation.error_fallback, ErrorFallback::Never);
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            [sheet]
            rows = 500

            [evaluation]
            error_fallback = "retain_on_runtime_error"

            [history]
            max_undo = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.sheet.rows, 500);
        assert_eq!(config.sheet.cols, 26);
        assert_eq!(config.evaluation.error_fallback, ErrorFallback::RetainOnRuntimeError);
        assert_eq!(config.history.max_undo, Some(50));
    }

    #[test]
    fn test_rejects_zero_dimensions() {
        let err = EngineConfig::from_toml_str("[sheet]\ncols = 0").unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_dimensions_over_limit() {
        let err = EngineConfig::from_toml_str("[sheet]\nrows = 50\nmax_rows = 10").unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
        let sheet = EngineConfig::default().sheet;
        assert!(sheet.fits(16_384, 1_048_576));
        assert!(!sheet.fits(16_385, 1));
        assert_eq!(sheet.max_len(Axis::Row), 1_048_576);
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = EngineConfig::default();
        config.history.max_undo = Some(10);
        let text = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }
}
