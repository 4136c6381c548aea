//! per-request entry selection over a collection
//!
//! `DistributionHelper` picks the entry of a collection for one request,
//! `MicroDistributionHelper` picks the sub-variant of an already picked entry.
//! both are configured with serde-deserializable details so a pipeline step
//! can load them from JSON. `CollectionSource` hands out the pair of helpers
//! a request should use, from one collection or one per request.
use crate::collection::{Collection, EntryAccess, TagInheritance};
use crate::pick_cache::{Cache, INVALID_PICK, IndexPickMode, MicroCache};
use crate::type_registry::{TypeId, TypeRegistry};
use anyhow::{Result, bail};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Distribution {
    /// pick by the request's index value
    Index,
    /// uniform random
    Random,
    /// random, weighted by entry weight
    #[default]
    WeightedRandom,
}

/// what to do with an index outside `[0, max]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexSafety {
    /// 0,1,2,-1,-1,...
    Ignore,
    /// 0,1,2,0,1,2,...
    Tile,
    /// 0,1,2,2,2,...
    #[default]
    Clamp,
    /// 0,1,2,1,0,1,...
    Yoyo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Truncate {
    #[default]
    None,
    Round,
    Ceil,
    Floor,
}

impl Truncate {
    pub fn apply(self, value: f64) -> f64 {
        match self {
            Truncate::None => value,
            Truncate::Round => value.round(),
            Truncate::Ceil => value.ceil(),
            Truncate::Floor => value.floor(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub pick_mode: IndexPickMode,
    pub index_safety: IndexSafety,
    /// remap `[0, max input index]` onto `[0, collection size - 1]`
    pub remap_to_collection_size: bool,
    /// applied after remapping
    pub truncate_remap: Truncate,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionDetails {
    pub distribution: Distribution,
    pub index_settings: IndexSettings,
    /// restrict each request to the entries of its category
    pub use_categories: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MicroDistributionDetails {
    pub distribution: Distribution,
    /// only `pick_mode` applies, the request index is used as is
    pub index_settings: IndexSettings,
}

/// per-request inputs read by the helpers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PickRequest {
    /// raw index value, used by `Distribution::Index`
    pub index: f64,
    /// category name, used when categories are enabled
    pub category: Option<String>,
    pub seed: i32,
}

impl PickRequest {
    pub fn seeded(seed: i32) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    pub fn with_index(mut self, index: f64) -> Self {
        self.index = index;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// bring `index` into `[0, max_index]` according to `safety`.
/// returns `-1` for `Ignore` when out of range.
pub fn sanitize_index(index: i32, max_index: i32, safety: IndexSafety) -> i32 {
    if max_index < 0 {
        return INVALID_PICK;
    }

    match safety {
        IndexSafety::Ignore => {
            if index < 0 || index > max_index {
                INVALID_PICK
            } else {
                index
            }
        }
        IndexSafety::Tile => index.rem_euclid(max_index + 1),
        IndexSafety::Clamp => index.clamp(0, max_index),
        IndexSafety::Yoyo => {
            if max_index == 0 {
                return 0;
            }
            let period = 2 * max_index;
            let cycle = index.rem_euclid(period);
            if cycle <= max_index { cycle } else { period - cycle }
        }
    }
}

/// linear remap of `value` from `[in_min, in_max]` to `[out_min, out_max]`
pub fn remap(value: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    (value - in_min) / (in_max - in_min) * (out_max - out_min) + out_min
}

pub struct DistributionHelper {
    collection: Arc<Collection>,
    details: DistributionDetails,
    cache: Option<Arc<Cache>>,
    max_input_index: f64,
}

impl DistributionHelper {
    pub fn new(collection: Arc<Collection>, details: DistributionDetails) -> Self {
        Self {
            collection,
            details,
            cache: None,
            max_input_index: 0.0,
        }
    }

    /// load the collection cache. `max_input_index` is the largest index value
    /// any request will carry, used to remap indices.
    pub fn init(&mut self, max_input_index: f64) -> Result<()> {
        let cache = self.collection.load_cache();
        if cache.is_empty() {
            bail!(
                "distribution helper got an empty collection: {}",
                self.collection.path()
            );
        }

        self.cache = Some(cache);
        self.max_input_index = max_input_index;
        log::debug!(
            "distribution helper ready for {} ({:?})",
            self.collection.path(),
            self.details.distribution
        );
        Ok(())
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    pub fn details(&self) -> &DistributionDetails {
        &self.details
    }

    pub fn get_entry(&self, request: &PickRequest) -> Option<EntryAccess<'_>> {
        self.get_entry_with_tags(request, TagInheritance::empty(), &mut BTreeSet::new())
    }

    pub fn get_entry_with_tags(
        &self,
        request: &PickRequest,
        inheritance: TagInheritance,
        tags: &mut BTreeSet<String>,
    ) -> Option<EntryAccess<'_>> {
        let Some(cache) = &self.cache else {
            log::warn!("distribution helper used before init");
            return None;
        };

        let mut working: &Collection = &self.collection;

        if self.details.use_categories {
            let key = request.category.as_deref().unwrap_or_default();
            let category = cache.category(key).filter(|c| !c.is_empty())?;

            let picked = if category.len() == 1 {
                category.indices()[0]
            } else {
                category.pick_random_weighted(request.seed)
            };

            // `entry_at` takes a cache-adjusted position, find the raw index in main
            let position = cache.main.indices().iter().position(|&i| i == picked)?;
            let access = self
                .collection
                .entry_at_with_tags(position as i32, inheritance, tags)?;

            match access.entry.sub_collection.as_deref() {
                Some(sub) if access.entry.is_sub_collection => working = sub,
                _ => return Some(access),
            }
        }

        match self.details.distribution {
            Distribution::WeightedRandom => {
                working.get_entry_weighted_random_with_tags(request.seed, inheritance, tags)
            }
            Distribution::Random => {
                working.get_entry_random_with_tags(request.seed, inheritance, tags)
            }
            Distribution::Index => {
                let settings = &self.details.index_settings;
                let max_index = working.valid_entry_count() as i32 - 1;
                let mut picked = request.index;

                if settings.remap_to_collection_size && self.max_input_index > 0.0 {
                    picked = remap(picked, 0.0, self.max_input_index, 0.0, f64::from(max_index));
                    picked = settings.truncate_remap.apply(picked);
                }

                let sanitized = sanitize_index(picked as i32, max_index, settings.index_safety);
                working.get_entry_with_tags(
                    sanitized,
                    request.seed,
                    settings.pick_mode,
                    inheritance,
                    tags,
                )
            }
        }
    }
}

pub struct MicroDistributionHelper {
    details: MicroDistributionDetails,
}

impl MicroDistributionHelper {
    pub fn new(details: MicroDistributionDetails) -> Self {
        Self { details }
    }

    /// pick a sub-variant. `-1` when there is nothing to pick from.
    pub fn get_pick(&self, micro_cache: Option<&MicroCache>, request: &PickRequest) -> i32 {
        let Some(micro_cache) = micro_cache.filter(|m| !m.is_empty()) else {
            return INVALID_PICK;
        };

        match self.details.distribution {
            Distribution::WeightedRandom => micro_cache.pick_random_weighted(request.seed),
            Distribution::Random => micro_cache.pick_random(request.seed),
            // out of range is no pick
            Distribution::Index => micro_cache
                .pick(request.index as i32, self.details.index_settings.pick_mode),
        }
    }
}

/// helpers for the collection a request picks from. variant helpers only
/// exist for mesh collections.
pub struct CollectionSource {
    details: DistributionDetails,
    micro_details: MicroDistributionDetails,
    single: Option<(DistributionHelper, Option<MicroDistributionHelper>)>,
    helpers: Vec<DistributionHelper>,
    micro_helpers: Vec<Option<MicroDistributionHelper>>,
    /// collection path -> slot in `helpers`
    indices: FxHashMap<String, usize>,
    /// collection path per request
    keys: Vec<String>,
}

impl CollectionSource {
    pub fn new(details: DistributionDetails, micro_details: MicroDistributionDetails) -> Self {
        Self {
            details,
            micro_details,
            single: None,
            helpers: Vec::new(),
            micro_helpers: Vec::new(),
            indices: FxHashMap::default(),
            keys: Vec::new(),
        }
    }

    fn micro_helper_for(
        &self,
        collection: &Collection,
        registry: &TypeRegistry,
    ) -> Option<MicroDistributionHelper> {
        collection
            .is_type(TypeId::MESH, registry)
            .then(|| MicroDistributionHelper::new(self.micro_details.clone()))
    }

    /// every request picks from `collection`
    pub fn init_single(
        &mut self,
        collection: Arc<Collection>,
        max_input_index: f64,
        registry: &TypeRegistry,
    ) -> Result<()> {
        let micro = self.micro_helper_for(&collection, registry);
        let mut helper = DistributionHelper::new(collection, self.details.clone());
        helper.init(max_input_index)?;
        self.single = Some((helper, micro));
        Ok(())
    }

    /// request `i` picks from the collection whose path is `keys[i]`.
    /// collections that fail to init are skipped, requests keyed to them get
    /// no helpers. fails when none could be set up.
    pub fn init_keyed(
        &mut self,
        collections: impl IntoIterator<Item = Arc<Collection>>,
        keys: Vec<String>,
        max_input_index: f64,
        registry: &TypeRegistry,
    ) -> Result<()> {
        for collection in collections {
            if self.indices.contains_key(collection.path()) {
                continue;
            }

            let path = collection.path().to_string();
            let micro = self.micro_helper_for(&collection, registry);
            let mut helper = DistributionHelper::new(collection, self.details.clone());
            if let Err(err) = helper.init(max_input_index) {
                log::warn!("skipping collection source {}: {:#}", path, err);
                continue;
            }

            self.indices.insert(path, self.helpers.len());
            self.helpers.push(helper);
            self.micro_helpers.push(micro);
        }

        if self.helpers.is_empty() {
            bail!("collection source has no usable collections");
        }
        self.keys = keys;
        log::debug!(
            "collection source: {} collections over {} requests",
            self.helpers.len(),
            self.keys.len()
        );
        Ok(())
    }

    /// number of collections with a helper
    pub fn len(&self) -> usize {
        if self.single.is_some() { 1 } else { self.helpers.len() }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// helpers for request `index`. `None` before init, or when the request's
    /// collection has no helper.
    pub fn try_get_helpers(
        &self,
        index: usize,
    ) -> Option<(&DistributionHelper, Option<&MicroDistributionHelper>)> {
        if let Some((helper, micro)) = &self.single {
            return Some((helper, micro.as_ref()));
        }

        let slot = *self.indices.get(self.keys.get(index)?)?;
        Some((&self.helpers[slot], self.micro_helpers[slot].as_ref()))
    }
}
