//! Mapper results and control sentinels.

/// What a stage mapper produced for one item.
///
/// - [`Mapped::Value`]: emit downstream (subject to the stage's predicate)
/// - [`Mapped::Skip`]: emit nothing for this item; not a failure
/// - [`Mapped::End`]: stop reading upstream; already admitted items still finish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mapped<O> {
    Value(O),
    Skip,
    End,
}

impl<O> Mapped<O> {
    /// True for the two sentinels.
    pub fn is_sentinel(&self) -> bool {
        !matches!(self, Mapped::Value(_))
    }
}

impl<O> From<O> for Mapped<O> {
    fn from(value: O) -> Self {
        Mapped::Value(value)
    }
}
