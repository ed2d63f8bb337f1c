use crate::{error::InternalError, row::Row, value::EntityId};
use std::fmt::Debug;

///
/// EntityKind
///
/// Binds a Rust type to a registered entity model. Implementations are
/// written explicitly next to the model declaration; there is no derive or
/// scanning layer.
///
/// ## Semantics
/// - `ENTITY` must match the name the model was registered under.
/// - `id()` is `None` while the instance is transient; repositories assign
///   an id at first save via `with_id`.
/// - `to_row` must include the primary-key field whenever `id()` is `Some`.
/// - `from_row` decodes a stored row; it may rely on `validate_row` having
///   passed at save time.
///

pub trait EntityKind: Clone + Debug + Sized + 'static {
    /// Stable entity name, as registered.
    const ENTITY: &'static str;

    fn id(&self) -> Option<EntityId>;

    #[must_use]
    fn with_id(self, id: EntityId) -> Self;

    fn to_row(&self) -> Row;

    fn from_row(row: &Row) -> Result<Self, InternalError>;
}
