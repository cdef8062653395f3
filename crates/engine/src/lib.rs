//! Spreadsheet computation engine.
//!
//! A [`Workbook`] owns ordered sheets of sparse cells, compiles formulas,
//! tracks dependencies between cells and keeps every value current. It is
//! mutated only through [`Command`]s passed to [`Workbook::dispatch`], and
//! through [`Workbook::undo`] / [`Workbook::redo`].

pub mod adjust;
pub mod cell;
pub mod cell_id;
pub mod command;
pub mod config;
pub mod dep_graph;
pub mod error;
pub mod filter;
pub mod formula;
pub mod handlers;
pub mod history;
pub mod recalc;
pub mod rules;
pub mod sheet;
pub mod snapshot;
pub mod style;
pub mod workbook;

#[cfg(test)]
pub mod harness;

pub use cell::{Cell, CellContent, ContentKind};
pub use cell_id::CellId;
pub use command::{BorderPosition, Command, InsertPosition, Position};
pub use config::EngineConfig;
pub use error::{EngineError, Rejection};
pub use formula::{CellError, ErrorKind, FunctionRegistry, Value};
pub use recalc::RecalcReport;
pub use snapshot::WorkbookSnapshot;
pub use workbook::{Selection, Workbook};

pub use cellgraph_core::{Axis, SheetId, Zone};
