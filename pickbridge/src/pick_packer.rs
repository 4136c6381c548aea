//! 64-bit pick tags and the side-table that gives them meaning
//!
//! a producer run owns one `PickPacker`. each distinct collection it packs is
//! given a dense slot on first sight, and every pick becomes
//!
//! ```text
//! pack32(pack16(base_hash, dense_slot), pack16(raw_index, secondary + 1))
//! ```
//!
//! the packer's slots are exported as a `SideTable` of `(slot, path)` rows.
//! a consumer rebuilds the mapping with `PickUnpacker::unpack_table` and
//! resolves tags back to `(collection, raw index, secondary index)`.
use crate::collection::{Collection, CollectionProvider, CollectionResolver, Entry};
use crate::packing::{pack16, pack32, unpack16, unpack32};
use anyhow::{Context, Result, bail};
use bincode::Options;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

/// derive the 16-bit packer base hash from a session identifier
pub fn base_hash(session_id: &str) -> u16 {
    let bytes = bincode_options().serialize(session_id).unwrap_or_default();

    let mut hasher = FxHasher::default();
    bytes.hash(&mut hasher);
    let hash = hasher.finish();

    // fold so every input bit reaches the low 16
    let folded = (hash ^ (hash >> 32)) as u32;
    (folded ^ (folded >> 16)) as u16
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideTableRow {
    /// `pack16(base_hash, dense_slot)`
    pub slot: u32,
    pub path: String,
}

/// `(slot, collection path)` rows exported by a packer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideTable {
    pub rows: Vec<SideTableRow>,
}

impl SideTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode_options()
            .serialize(self)
            .context("failed to encode side-table")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode_options()
            .deserialize(bytes)
            .context("failed to decode side-table")
    }
}

#[derive(Default)]
struct SlotMap {
    // keyed by collection address, the Arc in `collections` keeps it alive
    by_address: FxHashMap<usize, u32>,
    collections: Vec<Arc<Collection>>,
}

/// producer side. `get_pick_index` may be called from many threads.
pub struct PickPacker {
    base_hash: u16,
    slots: RwLock<SlotMap>,
}

impl PickPacker {
    pub fn new(session_id: &str) -> Self {
        let base_hash = base_hash(session_id);
        log::debug!("pick packer for session {:?}, base hash {:#06x}", session_id, base_hash);
        Self {
            base_hash,
            slots: RwLock::new(SlotMap::default()),
        }
    }

    pub fn base_hash(&self) -> u16 {
        self.base_hash
    }

    /// number of distinct collections seen so far
    pub fn slot_count(&self) -> usize {
        self.slots.read().collections.len()
    }

    /// tag for `(collection, raw_index, secondary_index)`. `secondary_index`
    /// is `-1` when the entry has no sub-variant pick.
    ///
    /// # Panics
    ///
    /// when more than `u16::MAX + 1` distinct collections are packed by one
    /// packer, since the dense slot no longer fits its 16 bits.
    pub fn get_pick_index(
        &self,
        collection: &Arc<Collection>,
        raw_index: u16,
        secondary_index: i16,
    ) -> u64 {
        let item = pack16(raw_index, (secondary_index as u16).wrapping_add(1));
        let address = Arc::as_ptr(collection) as usize;

        if let Some(&slot) = self.slots.read().by_address.get(&address) {
            return pack32(slot, item);
        }

        let mut slots = self.slots.write();
        if let Some(&slot) = slots.by_address.get(&address) {
            return pack32(slot, item);
        }

        let dense = u16::try_from(slots.collections.len()).unwrap_or_else(|_| {
            panic!(
                "pick packer ran out of collection slots ({} max)",
                u32::from(u16::MAX) + 1
            )
        });
        let slot = pack16(self.base_hash, dense);
        slots.by_address.insert(address, slot);
        slots.collections.push(Arc::clone(collection));
        log::trace!("slot {:#010x} -> {}", slot, collection.path());

        pack32(slot, item)
    }

    /// `get_pick_index` for indices as pickers return them. `None` when
    /// `raw_index` is outside `0..=u16::MAX` or `secondary_index` is outside
    /// `-1..=i16::MAX`, since the tag would name a different entry.
    pub fn try_get_pick_index(
        &self,
        collection: &Arc<Collection>,
        raw_index: i32,
        secondary_index: i32,
    ) -> Option<u64> {
        let raw = u16::try_from(raw_index).ok()?;
        let secondary = i16::try_from(secondary_index).ok().filter(|&s| s >= -1)?;
        Some(self.get_pick_index(collection, raw, secondary))
    }

    /// flatten the slot map, in slot order. call once packing is done.
    pub fn pack_to_table(&self) -> SideTable {
        let slots = self.slots.read();
        let rows = slots
            .collections
            .iter()
            .enumerate()
            .map(|(dense, collection)| SideTableRow {
                slot: pack16(self.base_hash, dense as u16),
                path: collection.path().to_string(),
            })
            .collect::<Vec<_>>();

        log::debug!("packed side-table with {} rows", rows.len());
        SideTable { rows }
    }
}

/// a tag turned back into its parts
#[derive(Debug, Clone)]
pub struct ResolvedPick {
    pub collection: Arc<Collection>,
    pub raw_index: i32,
    /// `-1` when no sub-variant was picked
    pub secondary_index: i32,
}

impl ResolvedPick {
    pub fn entry(&self) -> Option<&Entry> {
        self.collection.entry_raw(self.raw_index)
    }
}

/// requests sharing one tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub tag: u64,
    pub indices: Vec<usize>,
}

/// split a tag into `(slot, raw_index, secondary_index)` without any lookup
pub fn split_tag(tag: u64) -> (u32, u16, i16) {
    let (slot, item) = unpack32(tag);
    let (raw_index, secondary) = unpack16(item);
    (slot, raw_index, secondary.wrapping_sub(1) as i16)
}

/// consumer side
#[derive(Default)]
pub struct PickUnpacker {
    collections: FxHashMap<u32, Arc<Collection>>,
    unique_entries: usize,
}

impl PickUnpacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// rebuild the slot map from `table`, resolving every path through
    /// `resolver`. may be called with several tables; a slot seen twice must
    /// name the same collection.
    pub fn unpack_table(
        &mut self,
        table: &SideTable,
        resolver: &impl CollectionResolver,
    ) -> Result<()> {
        if table.is_empty() {
            bail!("side-table is empty");
        }

        // nothing is committed until every row resolves
        let mut staged: FxHashMap<u32, Arc<Collection>> = FxHashMap::default();
        staged.reserve(table.len());
        let mut unique_entries = 0usize;

        for row in &table.rows {
            let collection = resolver
                .resolve(&row.path)
                .with_context(|| format!("failed to resolve collection: {}", row.path))?;

            if let Some(existing) = self.collections.get(&row.slot).or(staged.get(&row.slot)) {
                if Arc::ptr_eq(existing, &collection) {
                    continue;
                }
                bail!(
                    "slot {:#010x} maps to both {} and {}",
                    row.slot,
                    existing.path(),
                    collection.path()
                );
            }

            unique_entries += collection.valid_entry_count();
            log::trace!("slot {:#010x} <- {}", row.slot, row.path);
            staged.insert(row.slot, collection);
        }

        self.collections.extend(staged);
        self.unique_entries += unique_entries;

        log::debug!(
            "unpacked side-table: {} collections, {} unique entries",
            self.collections.len(),
            self.unique_entries
        );
        Ok(())
    }

    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }

    /// pickable entries across every unpacked collection
    pub fn unique_entry_count(&self) -> usize {
        self.unique_entries
    }

    /// `None` when the slot is unknown or the raw index is out of bounds
    pub fn resolve(&self, tag: u64) -> Option<ResolvedPick> {
        let (slot, raw_index, secondary_index) = split_tag(tag);
        let collection = self.collections.get(&slot)?;

        let raw_index = i32::from(raw_index);
        if !collection.is_valid_index(raw_index) {
            log::warn!(
                "tag {:#018x}: index {} out of bounds for {}",
                tag,
                raw_index,
                collection.path()
            );
            return None;
        }

        Some(ResolvedPick {
            collection: Arc::clone(collection),
            raw_index,
            secondary_index: i32::from(secondary_index),
        })
    }

    /// the entry a tag points at, with its secondary index
    pub fn resolve_entry(&self, tag: u64) -> Option<(&Entry, i32)> {
        let (slot, raw_index, secondary_index) = split_tag(tag);
        let entry = self.collections.get(&slot)?.entry_raw(i32::from(raw_index))?;
        Some((entry, i32::from(secondary_index)))
    }

    /// group request indices by tag, in first-seen order
    pub fn build_partitions(&self, tags: &[u64]) -> Vec<Partition> {
        let mut lookup: FxHashMap<u64, usize> = FxHashMap::default();
        let mut partitions: Vec<Partition> = Vec::new();

        for (i, &tag) in tags.iter().enumerate() {
            let at = *lookup.entry(tag).or_insert_with(|| {
                partitions.push(Partition {
                    tag,
                    indices: Vec::new(),
                });
                partitions.len() - 1
            });
            partitions[at].indices.push(i);
        }

        partitions
    }
}
