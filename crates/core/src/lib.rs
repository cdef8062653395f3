//! Core value types shared by the engine: sheet identity, zones, A1 text
//! and formula references, plus the pure arithmetic used to shift them when
//! rows or columns are inserted or deleted.

pub mod adjust;
pub mod reference;
pub mod sheet_id;
pub mod xc;
pub mod zone;

pub use adjust::{Axis, GridEdit};
pub use reference::{AbsFlags, RefSlot, Reference, SheetRef, UnboundSheetRef};
pub use sheet_id::SheetId;
pub use xc::XcError;
pub use zone::Zone;
