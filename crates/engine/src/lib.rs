pub mod cell;
pub mod cell_ref;
pub mod conditional;
pub mod engine;
pub mod error;
pub mod format;
pub mod formula;
pub mod label;
pub mod propagation;
pub mod store;

pub use cell::{Alignment, Cell, FormatPattern, Formula, Outcome, Rendered, Style, StylePatch};
pub use cell_ref::{CellRange, CellRef};
pub use conditional::ConditionalRule;
pub use engine::{Engine, StructuralChange};
pub use error::{CellError, EngineError, ErrorKind};
pub use formula::eval::Value;
pub use label::{LabelMapping, LabelTarget};
pub use propagation::{ChangeSet, EvalMode};
