//! Typed ids

use std::{fmt::Debug, hash::Hash};

/// Marks that the type acts like an usize
pub trait Id: Into<usize> + From<usize> + Copy + Default + Debug + Ord + Hash + 'static {}
impl<T: Into<usize> + From<usize> + Copy + Default + Debug + Ord + Hash + 'static> Id for T {}

macro_rules! id_wrap {
    ($i:ident, $dbg_prefix:literal, $doc:literal) => {
        #[doc=$doc]
        #[must_use]
        #[derive(Default, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
        pub struct $i(pub usize);
        impl From<usize> for $i {
            fn from(x: usize) -> Self {
                $i(x)
            }
        }
        impl From<$i> for usize {
            fn from($i(x): $i) -> usize {
                x
            }
        }
        impl std::fmt::Debug for $i {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{self}")
            }
        }
        impl std::fmt::Display for $i {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                if self.0 == usize::MAX {
                    write!(f, "{}_bogus", $dbg_prefix)
                } else {
                    write!(f, "{}{}", $dbg_prefix, self.0)
                }
            }
        }
    };
}

id_wrap!(RelId, "r", "id for a relation, encodes Full/Delta/New by range");
id_wrap!(RowVar, "x", "identity of a row bound by a loop");
id_wrap!(MemPos, "m", "memory slot of a row binder after lowering");
id_wrap!(IndexPos, "i", "physical index slot");
id_wrap!(IndexId, "ir", "index number within one relation");
id_wrap!(FunctionId, "f", "id for a host function");
id_wrap!(RamId, "n", "id for a value-producing node");
id_wrap!(BoxingPos, "b", "boxing table position");
id_wrap!(ColumnId, "c", "id for a column");
id_wrap!(
    IndexUsageId,
    "iu",
    "reference to something that requires an index"
);
id_wrap!(ObjectId, "o", "interned non-integer value");

impl RelId {
    /// Relation id of the rows produced by a host function, outside every generation range.
    pub fn functional() -> Self {
        RelId(usize::MAX)
    }
}
