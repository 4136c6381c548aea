//! collections of weighted entries, with a lazily built pick cache
use crate::pick_cache::{Cache, IndexPickMode, MicroCache};
use crate::type_registry::{TypeId, TypeRegistry};
use bitflags::bitflags;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

bitflags! {
    /// which tags are collected while resolving an entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TagInheritance: u8 {
        /// tags of the picked entry
        const ASSET = 1;
        /// tags of sub-collection entries walked through
        const HIERARCHY = 1 << 1;
        /// collection tags of sub-collections walked through
        const COLLECTION = 1 << 2;
    }
}

/// what `Collection::asset_paths` walks into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadingFlags {
    /// this collection's own assets
    #[default]
    Default,
    /// assets of this collection and every nested sub-collection
    Recursive,
    /// only the paths of nested sub-collections
    RecursiveCollectionsOnly,
}

/// a sub-variant of an entry (e.g. a material override)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub path: String,
    #[serde(default = "default_weight")]
    pub weight: i32,
}

pub(crate) fn default_weight() -> i32 {
    1
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub weight: i32,
    pub category: String,
    pub tags: BTreeSet<String>,
    pub asset_path: String,
    pub is_sub_collection: bool,
    pub sub_collection: Option<Arc<Collection>>,
    variants: Vec<Variant>,
    micro_cache: Option<MicroCache>,
}

impl Entry {
    /// an entry pointing at a single asset
    pub fn asset(path: impl Into<String>, weight: i32) -> Self {
        Self {
            weight,
            category: String::new(),
            tags: BTreeSet::new(),
            asset_path: path.into(),
            is_sub_collection: false,
            sub_collection: None,
            variants: Vec::new(),
            micro_cache: None,
        }
    }

    /// an entry that defers to another collection
    pub fn sub_collection(collection: Arc<Collection>, weight: i32) -> Self {
        Self {
            asset_path: collection.path().to_string(),
            is_sub_collection: true,
            sub_collection: Some(collection),
            ..Self::asset(String::new(), weight)
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// set the sub-variants and rebuild the micro cache over their weights
    pub fn with_variants(mut self, variants: Vec<Variant>) -> Self {
        self.micro_cache = if variants.is_empty() || self.is_sub_collection {
            None
        } else {
            let weights: Vec<i32> = variants.iter().map(|v| v.weight).collect();
            Some(MicroCache::build_from_weights(&weights))
        };
        self.variants = variants;
        self
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// `None` when the entry has no sub-variants
    pub fn micro_cache(&self) -> Option<&MicroCache> {
        self.micro_cache.as_ref()
    }

    pub fn has_valid_sub_collection(&self) -> bool {
        self.is_sub_collection && self.sub_collection.is_some()
    }

    /// whether the entry takes part in picking
    pub fn validate(&self) -> bool {
        if self.weight <= 0 {
            return false;
        }

        if self.is_sub_collection {
            let Some(sub) = &self.sub_collection else {
                return false;
            };
            sub.load_cache();
        }
        true
    }
}

/// result of resolving an entry: the entry and the collection that holds it
#[derive(Debug, Clone, Copy)]
pub struct EntryAccess<'a> {
    pub entry: &'a Entry,
    /// raw index of `entry` in `host`
    pub index: i32,
    pub host: &'a Collection,
}

/// raw access to a collection's entries
pub trait CollectionProvider {
    fn entry_count(&self) -> usize;

    /// entry at its permanent storage position
    fn entry_raw(&self, index: i32) -> Option<&Entry>;

    /// `(index, weight)` for every entry, in storage order
    fn entry_weights(&self) -> Vec<(i32, i32)>;
}

/// turns a collection path into a live collection
pub trait CollectionResolver {
    fn resolve(&self, path: &str) -> Option<Arc<Collection>>;
}

#[derive(Debug)]
pub struct Collection {
    path: String,
    type_id: TypeId,
    pub tags: BTreeSet<String>,
    entries: Vec<Entry>,
    // `None` until first use, and again after invalidation
    cache: RwLock<Option<Arc<Cache>>>,
}

impl Collection {
    pub fn new(path: impl Into<String>, type_id: TypeId, entries: Vec<Entry>) -> Self {
        Self {
            path: path.into(),
            type_id,
            tags: BTreeSet::new(),
            entries,
            cache: RwLock::new(None),
        }
    }

    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn is_type(&self, type_id: TypeId, registry: &TypeRegistry) -> bool {
        registry.is_a(self.type_id, type_id)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// mutable entry storage. drops the pick cache.
    pub fn entries_mut(&mut self) -> &mut Vec<Entry> {
        *self.cache.get_mut() = None;
        &mut self.entries
    }

    pub fn is_valid_index(&self, index: i32) -> bool {
        self.entry_raw(index).is_some()
    }

    /// the pick cache, built on first use
    pub fn load_cache(&self) -> Arc<Cache> {
        if let Some(cache) = self.cache.read().as_ref() {
            return Arc::clone(cache);
        }

        let mut slot = self.cache.write();
        if let Some(cache) = slot.as_ref() {
            return Arc::clone(cache);
        }

        let mut cache = Cache::new();
        cache.main.reserve(self.entries.len());
        for (i, entry) in self.entries.iter().enumerate() {
            if !entry.validate() {
                log::trace!("{}: entry {} is not pickable, skipped", self.path, i);
                continue;
            }
            cache.register_entry(i as i32, entry.weight, &entry.category);
        }
        cache.compile();

        log::debug!(
            "built pick cache for {}: {} of {} entries pickable",
            self.path,
            cache.main.len(),
            self.entries.len()
        );

        let cache = Arc::new(cache);
        *slot = Some(Arc::clone(&cache));
        cache
    }

    pub fn invalidate_cache(&self) {
        *self.cache.write() = None;
    }

    /// number of entries that take part in picking
    pub fn valid_entry_count(&self) -> usize {
        self.load_cache().main.len()
    }

    /// entry at a cache-adjusted position (the n-th pickable entry)
    pub fn entry_at(&self, index: i32) -> Option<EntryAccess<'_>> {
        self.entry_at_with_tags(index, TagInheritance::empty(), &mut BTreeSet::new())
    }

    pub fn get_entry(&self, index: i32, seed: i32, mode: IndexPickMode) -> Option<EntryAccess<'_>> {
        self.get_entry_with_tags(index, seed, mode, TagInheritance::empty(), &mut BTreeSet::new())
    }

    /// uniform pick
    pub fn get_entry_random(&self, seed: i32) -> Option<EntryAccess<'_>> {
        self.get_entry_random_with_tags(seed, TagInheritance::empty(), &mut BTreeSet::new())
    }

    /// pick weighted by entry weight
    pub fn get_entry_weighted_random(&self, seed: i32) -> Option<EntryAccess<'_>> {
        self.get_entry_weighted_random_with_tags(
            seed,
            TagInheritance::empty(),
            &mut BTreeSet::new(),
        )
    }

    /// like `entry_at`. does not descend into sub-collections.
    pub fn entry_at_with_tags(
        &self,
        index: i32,
        inheritance: TagInheritance,
        tags: &mut BTreeSet<String>,
    ) -> Option<EntryAccess<'_>> {
        let picked = self.load_cache().main.pick_ascending(index);
        let entry = self.entry_raw(picked)?;

        if let Some(sub) = entry.sub_collection.as_deref().filter(|_| entry.is_sub_collection)
            && inheritance.contains(TagInheritance::COLLECTION)
        {
            tags.extend(sub.tags.iter().cloned());
        }
        if inheritance.contains(TagInheritance::ASSET) {
            tags.extend(entry.tags.iter().cloned());
        }

        Some(EntryAccess {
            entry,
            index: picked,
            host: self,
        })
    }

    pub fn get_entry_with_tags(
        &self,
        index: i32,
        seed: i32,
        mode: IndexPickMode,
        inheritance: TagInheritance,
        tags: &mut BTreeSet<String>,
    ) -> Option<EntryAccess<'_>> {
        let picked = self.load_cache().main.pick(index, mode);
        self.resolve_picked(picked, inheritance, tags, |sub, tags| {
            sub.get_entry_weighted_random_with_tags(seed, inheritance, tags)
        })
    }

    pub fn get_entry_random_with_tags(
        &self,
        seed: i32,
        inheritance: TagInheritance,
        tags: &mut BTreeSet<String>,
    ) -> Option<EntryAccess<'_>> {
        let picked = self.load_cache().main.pick_random(seed);
        self.resolve_picked(picked, inheritance, tags, |sub, tags| {
            sub.get_entry_random_with_tags(seed.wrapping_mul(2), inheritance, tags)
        })
    }

    pub fn get_entry_weighted_random_with_tags(
        &self,
        seed: i32,
        inheritance: TagInheritance,
        tags: &mut BTreeSet<String>,
    ) -> Option<EntryAccess<'_>> {
        let picked = self.load_cache().main.pick_random_weighted(seed);
        self.resolve_picked(picked, inheritance, tags, |sub, tags| {
            sub.get_entry_weighted_random_with_tags(seed.wrapping_mul(2), inheritance, tags)
        })
    }

    fn resolve_picked<'a>(
        &'a self,
        picked: i32,
        inheritance: TagInheritance,
        tags: &mut BTreeSet<String>,
        descend: impl FnOnce(&'a Collection, &mut BTreeSet<String>) -> Option<EntryAccess<'a>>,
    ) -> Option<EntryAccess<'a>> {
        let entry = self.entry_raw(picked)?;

        if let Some(sub) = entry.sub_collection.as_deref().filter(|_| entry.is_sub_collection) {
            if inheritance.contains(TagInheritance::HIERARCHY) {
                tags.extend(entry.tags.iter().cloned());
            }
            if inheritance.contains(TagInheritance::COLLECTION) {
                tags.extend(sub.tags.iter().cloned());
            }
            return descend(sub, tags);
        }

        if inheritance.contains(TagInheritance::ASSET) {
            tags.extend(entry.tags.iter().cloned());
        }
        Some(EntryAccess {
            entry,
            index: picked,
            host: self,
        })
    }

    /// whether nesting `other` inside this collection would form a loop
    pub fn has_circular_dependency(&self, other: &Collection) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        other.references(self, &mut FxHashSet::default())
    }

    fn references(&self, target: &Collection, visited: &mut FxHashSet<*const Collection>) -> bool {
        if std::ptr::eq(self, target) {
            return true;
        }
        if !visited.insert(self as *const Collection) {
            return false;
        }
        self.entries
            .iter()
            .filter_map(|entry| entry.sub_collection.as_deref())
            .any(|sub| sub.references(target, visited))
    }

    /// asset paths reachable from this collection
    pub fn asset_paths(&self, flags: LoadingFlags) -> BTreeSet<String> {
        let mut paths = BTreeSet::new();
        self.collect_asset_paths(flags, &mut paths);
        paths
    }

    fn collect_asset_paths(&self, flags: LoadingFlags, paths: &mut BTreeSet<String>) {
        let collections_only = flags == LoadingFlags::RecursiveCollectionsOnly;
        let recursive = collections_only || flags == LoadingFlags::Recursive;

        for entry in &self.entries {
            if entry.is_sub_collection {
                if recursive && let Some(sub) = &entry.sub_collection {
                    if collections_only {
                        paths.insert(sub.path().to_string());
                    }
                    sub.collect_asset_paths(flags, paths);
                }
                continue;
            }
            if collections_only {
                continue;
            }
            paths.insert(entry.asset_path.clone());
            paths.extend(entry.variants.iter().map(|v| v.path.clone()));
        }
    }
}

impl CollectionProvider for Collection {
    fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn entry_raw(&self, index: i32) -> Option<&Entry> {
        usize::try_from(index).ok().and_then(|i| self.entries.get(i))
    }

    fn entry_weights(&self) -> Vec<(i32, i32)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i as i32, entry.weight))
            .collect()
    }
}

/// in-memory path -> collection lookup
#[derive(Debug, Default, Clone)]
pub struct CollectionLibrary {
    collections: FxHashMap<String, Arc<Collection>>,
}

impl CollectionLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// add a collection under its own path, replacing any previous one
    pub fn insert(&mut self, collection: Arc<Collection>) {
        self.collections
            .insert(collection.path().to_string(), collection);
    }

    pub fn get(&self, path: &str) -> Option<&Arc<Collection>> {
        self.collections.get(path)
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

impl CollectionResolver for CollectionLibrary {
    fn resolve(&self, path: &str) -> Option<Arc<Collection>> {
        self.get(path).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rocks() -> Arc<Collection> {
        Arc::new(
            Collection::new(
                "/collections/rocks",
                TypeId::MESH,
                vec![
                    Entry::asset("/meshes/rock_a", 1).with_tags(["small"]),
                    Entry::asset("/meshes/rock_b", 3).with_tags(["large"]),
                ],
            )
            .with_tags(["mineral"]),
        )
    }

    fn scatter(rocks: Arc<Collection>) -> Collection {
        Collection::new(
            "/collections/scatter",
            TypeId::MESH,
            vec![
                Entry::asset("/meshes/tree", 2)
                    .with_category("trees")
                    .with_variants(vec![
                        Variant { path: "/materials/bark".into(), weight: 1 },
                        Variant { path: "/materials/moss".into(), weight: 5 },
                    ]),
                Entry::asset("/meshes/disabled", 0),
                Entry::sub_collection(rocks, 1)
                    .with_category("rocks")
                    .with_tags(["ground"]),
            ],
        )
    }

    #[test]
    fn test_cache_skips_invalid_entries() {
        let collection = scatter(rocks());
        assert_eq!(collection.entry_count(), 3);
        assert_eq!(collection.valid_entry_count(), 2);

        // cache-adjusted position 1 is raw entry 2
        let access = collection.entry_at(1).unwrap();
        assert!(access.entry.is_sub_collection);
        assert!(collection.entry_at(2).is_none());

        // raw access still sees the disabled entry
        assert_eq!(collection.entry_raw(1).unwrap().asset_path, "/meshes/disabled");
        assert!(collection.entry_raw(3).is_none());
        assert!(collection.entry_raw(-1).is_none());
    }

    #[test]
    fn test_cache_is_shared_until_invalidated() {
        let collection = rocks();
        let first = collection.load_cache();
        let second = collection.load_cache();
        assert!(Arc::ptr_eq(&first, &second));

        collection.invalidate_cache();
        let rebuilt = collection.load_cache();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert_eq!(rebuilt.main.len(), 2);
    }

    #[test]
    fn test_entries_mut_drops_cache() {
        let mut collection = Collection::new("/c", TypeId::BASE, vec![Entry::asset("/a", 1)]);
        assert_eq!(collection.valid_entry_count(), 1);

        collection.entries_mut().push(Entry::asset("/b", 1));
        assert_eq!(collection.valid_entry_count(), 2);
    }

    #[test]
    fn test_get_entry_descends_into_sub_collections() {
        let rocks = rocks();
        let collection = scatter(Arc::clone(&rocks));

        let access = collection
            .get_entry(1, 7, IndexPickMode::Ascending)
            .unwrap();
        assert!(std::ptr::eq(access.host, rocks.as_ref()));
        assert!(access.entry.asset_path.starts_with("/meshes/rock_"));

        let access = collection.get_entry(0, 7, IndexPickMode::Ascending).unwrap();
        assert_eq!(access.entry.asset_path, "/meshes/tree");
        assert!(collection.get_entry(5, 7, IndexPickMode::Ascending).is_none());
    }

    #[test]
    fn test_random_picks_resolve_to_assets() {
        let collection = scatter(rocks());
        for seed in 0..200 {
            let weighted = collection.get_entry_weighted_random(seed).unwrap();
            assert!(!weighted.entry.is_sub_collection);
            let uniform = collection.get_entry_random(seed).unwrap();
            assert!(!uniform.entry.is_sub_collection);
            assert_ne!(uniform.entry.asset_path, "/meshes/disabled");
        }
    }

    #[test]
    fn test_tag_inheritance() {
        let collection = scatter(rocks());

        let mut tags = BTreeSet::new();
        let access = collection
            .get_entry_with_tags(
                1,
                3,
                IndexPickMode::Ascending,
                TagInheritance::all(),
                &mut tags,
            )
            .unwrap();

        assert!(tags.contains("ground"));
        assert!(tags.contains("mineral"));
        for tag in &access.entry.tags {
            assert!(tags.contains(tag));
        }

        let mut asset_only = BTreeSet::new();
        collection.get_entry_with_tags(
            1,
            3,
            IndexPickMode::Ascending,
            TagInheritance::ASSET,
            &mut asset_only,
        );
        assert!(!asset_only.contains("ground"));
        assert!(!asset_only.contains("mineral"));
        assert_eq!(asset_only.len(), 1);

        let mut at_tags = BTreeSet::new();
        collection.entry_at_with_tags(1, TagInheritance::all(), &mut at_tags);
        assert_eq!(
            at_tags,
            BTreeSet::from(["ground".to_string(), "mineral".to_string()])
        );
    }

    #[test]
    fn test_micro_cache() {
        let collection = scatter(rocks());
        let tree = collection.entry_raw(0).unwrap();
        let micro = tree.micro_cache().unwrap();
        assert_eq!(micro.len(), 2);
        assert_eq!(micro.pick_weight_descending(0), 1);

        assert!(collection.entry_raw(1).unwrap().micro_cache().is_none());
    }

    #[test]
    fn test_circular_dependency() {
        let rocks = rocks();
        let scatter = Arc::new(scatter(Arc::clone(&rocks)));

        assert!(scatter.has_circular_dependency(&scatter));
        // rocks nesting scatter would loop, scatter already holds rocks
        assert!(rocks.has_circular_dependency(&scatter));
        assert!(!scatter.has_circular_dependency(&rocks));
    }

    #[test]
    fn test_asset_paths() {
        let collection = scatter(rocks());

        let own = collection.asset_paths(LoadingFlags::Default);
        assert!(own.contains("/meshes/tree"));
        assert!(own.contains("/materials/moss"));
        assert!(!own.contains("/meshes/rock_a"));

        let recursive = collection.asset_paths(LoadingFlags::Recursive);
        assert!(recursive.contains("/meshes/rock_a"));
        assert!(recursive.contains("/meshes/tree"));

        let nested = collection.asset_paths(LoadingFlags::RecursiveCollectionsOnly);
        assert_eq!(nested, BTreeSet::from(["/collections/rocks".to_string()]));
    }

    #[test]
    fn test_is_type() {
        let registry = TypeRegistry::new();
        registry.register_builtin_types();
        let collection = rocks();
        assert!(collection.is_type(TypeId::BASE, &registry));
        assert!(!collection.is_type(TypeId::ACTOR, &registry));
    }

    #[test]
    fn test_library_resolves_by_path() {
        let mut library = CollectionLibrary::new();
        library.insert(rocks());
        assert_eq!(library.len(), 1);
        assert!(library.resolve("/collections/rocks").is_some());
        assert!(library.resolve("/collections/missing").is_none());
    }
}
