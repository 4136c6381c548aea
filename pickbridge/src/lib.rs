//! pickbridge - weighted entry picking over asset collections, and a 64-bit
//! identity bridge between a producer and a consumer phase
//!
//! - collection types live in an inheritance-aware `TypeRegistry`
//! - `WeightedPickCache` picks entries by order, weight order or seeded random
//! - `PickPacker` folds (collection, entry, sub-variant) into a `u64` tag plus
//!   a side-table; `PickUnpacker` turns tags back into entries later
//! - tags only mean something next to the side-table they were packed with

pub mod collection;
pub mod distribution;
pub mod manifest;
pub mod packing;
pub mod pick_cache;
pub mod pick_packer;
pub mod reader;
pub mod type_registry;
pub mod type_set;

pub use collection::{
    Collection, CollectionLibrary, CollectionProvider, CollectionResolver, Entry, EntryAccess,
    LoadingFlags, TagInheritance, Variant,
};
pub use distribution::{
    CollectionSource, Distribution, DistributionDetails, DistributionHelper, IndexSafety,
    IndexSettings, MicroDistributionDetails, MicroDistributionHelper, PickRequest, Truncate,
};
pub use manifest::Manifest;
pub use pick_cache::{Cache, Category, INVALID_PICK, IndexPickMode, MicroCache, WeightedPickCache};
pub use pick_packer::{Partition, PickPacker, PickUnpacker, ResolvedPick, SideTable, SideTableRow};
pub use type_registry::{ClassHandle, TypeId, TypeInfo, TypeRegistry};
pub use type_set::TypeSet;
