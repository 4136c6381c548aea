//! sets of collection types, with inheritance-aware membership
use crate::type_registry::{TypeId, TypeRegistry};
use rustc_hash::FxHashSet;
use std::ops::{BitAnd, BitOr};

/// a set of collection types, used to filter which collections a step accepts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeSet {
    types: FxHashSet<TypeId>,
}

impl TypeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_single(id: TypeId) -> Self {
        let mut set = Self::new();
        set.add(id);
        set
    }

    pub fn from_list(ids: impl IntoIterator<Item = TypeId>) -> Self {
        Self {
            types: ids.into_iter().collect(),
        }
    }

    pub fn add(&mut self, id: TypeId) {
        self.types.insert(id);
    }

    pub fn remove(&mut self, id: TypeId) {
        self.types.remove(&id);
    }

    pub fn contains(&self, id: TypeId) -> bool {
        self.types.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeId> {
        self.types.iter()
    }

    /// true if `id` is in the set, or some member derives from `id`.
    ///
    /// note the direction: this asks whether `id` is an ancestor of (or equal
    /// to) a member, not whether `id` is a subtype of one.
    pub fn contains_or_derives(&self, id: TypeId, registry: &TypeRegistry) -> bool {
        self.contains(id) || self.types.iter().any(|member| registry.is_a(*member, id))
    }

    pub fn union(&self, other: &TypeSet) -> TypeSet {
        Self {
            types: self.types.union(&other.types).copied().collect(),
        }
    }

    pub fn intersection(&self, other: &TypeSet) -> TypeSet {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        Self {
            types: small
                .types
                .iter()
                .filter(|id| large.contains(**id))
                .copied()
                .collect(),
        }
    }
}

impl BitOr for &TypeSet {
    type Output = TypeSet;

    fn bitor(self, rhs: &TypeSet) -> TypeSet {
        self.union(rhs)
    }
}

impl BitAnd for &TypeSet {
    type Output = TypeSet;

    fn bitand(self, rhs: &TypeSet) -> TypeSet {
        self.intersection(rhs)
    }
}

impl FromIterator<TypeId> for TypeSet {
    fn from_iter<I: IntoIterator<Item = TypeId>>(iter: I) -> Self {
        Self::from_list(iter)
    }
}
