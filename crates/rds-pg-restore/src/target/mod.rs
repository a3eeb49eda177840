//! The PostgreSQL target side: identifiers, cell values, the CSV bridge, and
//! the transactional table writer.

pub mod csv;
pub mod identifier;
pub mod plan;
pub mod queries;
pub mod value;
pub mod writer;

pub use plan::{SkipReason, TablePlan};
pub use value::PgValue;
pub use writer::{ConstraintInfo, DbWriter, FkRelation, IndexInfo};
