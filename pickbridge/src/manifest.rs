//! JSON description of a set of collections
//!
//! ```json
//! { "collections": [ { "path": "/c/rocks", "type": "Mesh", "entries": [
//!     { "asset": "/m/rock", "weight": 3, "variants": [ { "path": "/mat/a" } ] },
//!     { "sub_collection": "/c/pebbles", "weight": 1 } ] } ] }
//! ```
//!
//! sub-collections may be listed in any order. they are built before the
//! collections that reference them.
use crate::collection::{Collection, CollectionLibrary, Entry, Variant, default_weight};
use crate::type_registry::{TypeId, TypeRegistry};
use anyhow::{Context, Result, bail};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub collections: Vec<ManifestCollection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestCollection {
    pub path: String,
    #[serde(rename = "type", default = "default_type")]
    pub type_name: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(default = "default_weight")]
    pub weight: i32,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub sub_collection: Option<String>,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

fn default_type() -> String {
    TypeId::BASE.as_str().to_string()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

struct Builder<'a> {
    by_path: FxHashMap<&'a str, &'a ManifestCollection>,
    registry: &'a TypeRegistry,
    state: FxHashMap<&'a str, Visit>,
    library: CollectionLibrary,
}

impl<'a> Builder<'a> {
    fn build(&mut self, path: &'a str) -> Result<Arc<Collection>> {
        match self.state.get(path) {
            Some(Visit::Done) => {
                if let Some(collection) = self.library.get(path) {
                    return Ok(Arc::clone(collection));
                }
            }
            Some(Visit::InProgress) => bail!("collection {} contains itself", path),
            None => {}
        }

        let Some(&source) = self.by_path.get(path) else {
            bail!("unknown collection: {}", path);
        };
        self.state.insert(path, Visit::InProgress);

        let type_id = TypeId::new(&source.type_name);
        if self.registry.find(type_id).is_none() {
            bail!("collection {} has unregistered type {}", path, source.type_name);
        }

        let mut entries = Vec::with_capacity(source.entries.len());
        for (i, item) in source.entries.iter().enumerate() {
            let entry = match (&item.asset, &item.sub_collection) {
                (Some(asset), None) => Entry::asset(asset.as_str(), item.weight),
                (None, Some(sub_path)) => {
                    let sub = self
                        .build(sub_path)
                        .with_context(|| format!("entry {} of {}", i, path))?;
                    if let Some(info) = self.registry.find(sub.type_id())
                        && !info.can_be_subcollection
                    {
                        log::warn!("{} nests {}, whose type is not meant to be nested", path, sub_path);
                    }
                    Entry::sub_collection(sub, item.weight)
                }
                _ => bail!(
                    "entry {} of {} needs exactly one of `asset` or `sub_collection`",
                    i,
                    path
                ),
            };

            entries.push(
                entry
                    .with_category(item.category.as_str())
                    .with_tags(item.tags.iter().cloned())
                    .with_variants(item.variants.clone()),
            );
        }

        let collection = Arc::new(
            Collection::new(path, type_id, entries).with_tags(source.tags.iter().cloned()),
        );
        log::trace!("built collection {} ({} entries)", path, collection.entries().len());

        self.state.insert(path, Visit::Done);
        self.library.insert(Arc::clone(&collection));
        Ok(collection)
    }
}

impl Manifest {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("failed to parse manifest")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = crate::reader::load_file(path)?;
        Self::from_json(&data).with_context(|| format!("bad manifest: {}", path.display()))
    }

    /// build every collection, resolving sub-collection references by path
    pub fn build(&self, registry: &TypeRegistry) -> Result<CollectionLibrary> {
        let mut by_path = FxHashMap::default();
        for collection in &self.collections {
            if by_path.insert(collection.path.as_str(), collection).is_some() {
                bail!("collection {} is listed twice", collection.path);
            }
        }

        let mut builder = Builder {
            by_path,
            registry,
            state: FxHashMap::default(),
            library: CollectionLibrary::new(),
        };
        for collection in &self.collections {
            builder.build(&collection.path)?;
        }

        log::debug!("manifest built {} collections", builder.library.len());
        Ok(builder.library)
    }
}
