use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures outside the command pipeline: configuration and snapshot I/O.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("snapshot encoding error: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a command was not applied.
///
/// Closed set: every validator answers with one of these, and a rejected
/// command leaves the workbook and its history untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum Rejection {
    // Sheets
    #[error("invalid sheet id")]
    InvalidSheetId,
    #[error("a sheet with this id already exists")]
    DuplicatedSheetId,
    #[error("invalid sheet name")]
    InvalidSheetName,
    #[error("a sheet with this name already exists")]
    DuplicatedSheetName,
    #[error("a workbook needs at least one sheet")]
    NotEnoughSheets,

    // Targets
    #[error("invalid range")]
    InvalidRange,
    #[error("target is outside the sheet")]
    TargetOutOfSheet,
    #[error("empty target")]
    EmptyTarget,
    #[error("targets are not one continuous block")]
    NonContinuousTargets,
    #[error("selection is out of bound")]
    SelectionOutOfBound,
    #[error("operation would leave no visible or remaining elements")]
    NotEnoughElements,
    #[error("quantity must be at least 1 and keep the sheet within its size limit")]
    InvalidQuantity,
    #[error("anchor is not inside the target zone")]
    InvalidAnchorZone,

    // Merges
    #[error("merging would destroy content")]
    MergeIsDestructive,
    #[error("merging would remove an existing merge")]
    WillRemoveExistingMerge,
    #[error("merge overlaps another merge")]
    MergeOverlap,

    // Tables and filters
    #[error("table or filter overlaps a merge")]
    FilterMergeOverlap,
    #[error("table overlaps another table")]
    TableOverlap,
    #[error("no table at this position")]
    NoTableAtPosition,

    // Rules
    #[error("unknown data validation rule type")]
    UnknownDataValidationRuleType,
    #[error("invalid number of criterion values")]
    InvalidNumberOfCriterionValues,
    #[error("invalid criterion value")]
    InvalidCriterionValue,
    #[error("unknown rule id")]
    UnknownRuleId,
    #[error("value rejected by a blocking validation rule")]
    BlockingValidationRule,

    // History
    #[error("nothing to undo")]
    EmptyUndoStack,
    #[error("nothing to redo")]
    EmptyRedoStack,
}
