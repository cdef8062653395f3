//! Commands: the only way to change a workbook.
//!
//! A command is plain data. It serializes as a JSON object tagged by its
//! `type`, so a log of commands can be stored and replayed:
//!
//! ```json
//! {"type": "SetCellContent", "sheet_id": 1, "col": 0, "row": 0, "content": "=B1+1"}
//! ```

use cellgraph_core::{Axis, SheetId, Zone};
use serde::{Deserialize, Serialize};

use crate::rules::CriterionSpec;
use crate::style::{Border, Style};

/// Where inserted rows/columns go relative to `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertPosition {
    #[default]
    Before,
    After,
}

/// How a border applies over a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BorderPosition {
    /// Every cell of the target gets the full border.
    #[default]
    All,
    /// Only the outline of the target; the target must be one block.
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub col: usize,
    pub row: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    // Sheets
    CreateSheet {
        sheet_id: SheetId,
        name: String,
        /// Index in the sheet list; appended when absent.
        #[serde(default)]
        position: Option<usize>,
        #[serde(default)]
        cols: Option<usize>,
        #[serde(default)]
        rows: Option<usize>,
    },
    DeleteSheet {
        sheet_id: SheetId,
    },
    DuplicateSheet {
        sheet_id: SheetId,
        new_sheet_id: SheetId,
        /// Defaults to "Copy of <name>".
        #[serde(default)]
        name: Option<String>,
    },
    RenameSheet {
        sheet_id: SheetId,
        name: String,
    },
    ActivateSheet {
        sheet_id: SheetId,
    },

    // Rows and columns
    AddColumnsRows {
        sheet_id: SheetId,
        dimension: Axis,
        base: usize,
        quantity: usize,
        #[serde(default)]
        position: InsertPosition,
    },
    RemoveColumnsRows {
        sheet_id: SheetId,
        dimension: Axis,
        elements: Vec<usize>,
    },
    ResizeColumnsRows {
        sheet_id: SheetId,
        dimension: Axis,
        elements: Vec<usize>,
        size: u32,
    },
    HideColumnsRows {
        sheet_id: SheetId,
        dimension: Axis,
        elements: Vec<usize>,
    },
    UnhideColumnsRows {
        sheet_id: SheetId,
        dimension: Axis,
        elements: Vec<usize>,
    },

    // Merges
    AddMerge {
        sheet_id: SheetId,
        target: Vec<Zone>,
        /// Allow dropping content outside the anchors and replacing
        /// intersecting merges.
        #[serde(default)]
        force: bool,
    },
    RemoveMerge {
        sheet_id: SheetId,
        target: Vec<Zone>,
    },

    // Content and formatting
    SetCellContent {
        sheet_id: SheetId,
        col: usize,
        row: usize,
        content: String,
    },
    DeleteContent {
        sheet_id: SheetId,
        target: Vec<Zone>,
    },
    SetFormatting {
        sheet_id: SheetId,
        target: Vec<Zone>,
        #[serde(default)]
        style: Option<Style>,
        #[serde(default)]
        format: Option<String>,
    },
    SetBorder {
        sheet_id: SheetId,
        target: Vec<Zone>,
        border: Border,
        #[serde(default)]
        position: BorderPosition,
    },
    ClearFormatting {
        sheet_id: SheetId,
        target: Vec<Zone>,
    },

    // Rules
    AddConditionalFormat {
        sheet_id: SheetId,
        id: String,
        ranges: Vec<Zone>,
        criterion: CriterionSpec,
        style: Style,
    },
    RemoveConditionalFormat {
        sheet_id: SheetId,
        id: String,
    },
    AddDataValidationRule {
        sheet_id: SheetId,
        id: String,
        ranges: Vec<Zone>,
        criterion: CriterionSpec,
        #[serde(default)]
        blocking: bool,
    },
    RemoveDataValidationRule {
        sheet_id: SheetId,
        id: String,
    },

    // Tables
    CreateTable {
        sheet_id: SheetId,
        zone: Zone,
        #[serde(default = "default_true")]
        has_header: bool,
    },
    RemoveTable {
        sheet_id: SheetId,
        col: usize,
        row: usize,
    },
    UpdateFilter {
        sheet_id: SheetId,
        col: usize,
        row: usize,
        hidden_values: Vec<String>,
    },

    // Selection
    SetSelection {
        sheet_id: SheetId,
        zones: Vec<Zone>,
        anchor: Position,
    },
}

fn default_true() -> bool {
    true
}

impl Command {
    /// The `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateSheet { .. } => "CreateSheet",
            Command::DeleteSheet { .. } => "DeleteSheet",
            Command::DuplicateSheet { .. } => "DuplicateSheet",
            Command::RenameSheet { .. } => "RenameSheet",
            Command::ActivateSheet { .. } => "ActivateSheet",
            Command::AddColumnsRows { .. } => "AddColumnsRows",
            Command::RemoveColumnsRows { .. } => "RemoveColumnsRows",
            Command::ResizeColumnsRows { .. } => "ResizeColumnsRows",
            Command::HideColumnsRows { .. } => "HideColumnsRows",
            Command::UnhideColumnsRows { .. } => "UnhideColumnsRows",
            Command::AddMerge { .. } => "AddMerge",
            Command::RemoveMerge { .. } => "RemoveMerge",
            Command::SetCellContent { .. } => "SetCellContent",
            Command::DeleteContent { .. } => "DeleteContent",
            Command::SetFormatting { .. } => "SetFormatting",
            Command::SetBorder { .. } => "SetBorder",
            Command::ClearFormatting { .. } => "ClearFormatting",
            Command::AddConditionalFormat { .. } => "AddConditionalFormat",
            Command::RemoveConditionalFormat { .. } => "RemoveConditionalFormat",
            Command::AddDataValidationRule { .. } => "AddDataValidationRule",
            Command::RemoveDataValidationRule { .. } => "RemoveDataValidationRule",
            Command::CreateTable { .. } => "CreateTable",
            Command::RemoveTable { .. } => "RemoveTable",
            Command::UpdateFilter { .. } => "UpdateFilter",
            Command::SetSelection { .. } => "SetSelection",
        }
    }

    /// Sheet the command must find in the workbook. `CreateSheet` names a
    /// sheet that must not exist yet, so it has none.
    pub fn target_sheet(&self) -> Option<SheetId> {
        match self {
            Command::CreateSheet { .. } => None,
            Command::DeleteSheet { sheet_id }
            | Command::DuplicateSheet { sheet_id, .. }
            | Command::RenameSheet { sheet_id, .. }
            | Command::ActivateSheet { sheet_id }
            | Command::AddColumnsRows { sheet_id, .. }
            | Command::RemoveColumnsRows { sheet_id, .. }
            | Command::ResizeColumnsRows { sheet_id, .. }
            | Command::HideColumnsRows { sheet_id, .. }
            | Command::UnhideColumnsRows { sheet_id, .. }
            | Command::AddMerge { sheet_id, .. }
            | Command::RemoveMerge { sheet_id, .. }
            | Command::SetCellContent { sheet_id, .. }
            | Command::DeleteContent { sheet_id, .. }
            | Command::SetFormatting { sheet_id, .. }
            | Command::SetBorder { sheet_id, .. }
            | Command::ClearFormatting { sheet_id, .. }
            | Command::AddConditionalFormat { sheet_id, .. }
            | Command::RemoveConditionalFormat { sheet_id, .. }
            | Command::AddDataValidationRule { sheet_id, .. }
            | Command::RemoveDataValidationRule { sheet_id, .. }
            | Command::CreateTable { sheet_id, .. }
            | Command::RemoveTable { sheet_id, .. }
            | Command::UpdateFilter { sheet_id, .. }
            | Command::SetSelection { sheet_id, .. } => Some(*sheet_id),
        }
    }

    /// Commands that change nothing undoable.
    pub fn is_transient(&self) -> bool {
        matches!(self, Command::SetSelection { .. })
    }
}
