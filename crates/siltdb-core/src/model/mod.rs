pub mod entity;
pub mod field;
pub mod index;

pub use entity::{EntityModel, ModelError, RowError};
pub use field::{FieldKind, FieldModel};
pub use index::IndexModel;
