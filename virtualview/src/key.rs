#[cfg(not(feature = "std"))]
use alloc::collections::BTreeMap;
#[cfg(feature = "std")]
use std::collections::HashMap;

use crate::tree::GroupKey;

/// Group key → group index, used to carry geometry across rebuilds.
#[cfg(feature = "std")]
pub(crate) type KeyIndexMap = HashMap<GroupKey, usize>;
#[cfg(not(feature = "std"))]
pub(crate) type KeyIndexMap = BTreeMap<GroupKey, usize>;
