///
/// IndexModel
///
/// Uniqueness constraint over an ordered set of fields. Field order is
/// significant for the composite key encoding. Query acceleration is out of
/// scope; indexes exist to enforce uniqueness at commit time.
///
/// Rows with a Null component are not indexed, so a nullable unique field
/// admits any number of absent values.
///

#[derive(Clone, Debug)]
pub struct IndexModel {
    /// Constraint name reported on violation (e.g. `partner.email`).
    pub name: String,
    /// Ordered component fields.
    pub fields: Vec<String>,
}

impl IndexModel {
    #[must_use]
    pub fn unique(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(ToString::to_string).collect(),
        }
    }
}
