//! type registry for collection types and their inheritance
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock};

/// interned type name. `TypeId::NONE` is the "no type" sentinel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(&'static str);

static INTERNED_NAMES: LazyLock<RwLock<FxHashSet<&'static str>>> =
    LazyLock::new(|| RwLock::new(FxHashSet::default()));

impl TypeId {
    pub const NONE: TypeId = TypeId("None");
    pub const BASE: TypeId = TypeId("Base");
    pub const MESH: TypeId = TypeId("Mesh");
    pub const ACTOR: TypeId = TypeId("Actor");
    pub const PCG_DATA_ASSET: TypeId = TypeId("PCGDataAsset");

    const BUILTIN: [TypeId; 5] = [
        Self::NONE,
        Self::BASE,
        Self::MESH,
        Self::ACTOR,
        Self::PCG_DATA_ASSET,
    ];

    /// intern `name`. an empty name maps to `NONE`.
    pub fn new(name: &str) -> Self {
        if name.is_empty() {
            return Self::NONE;
        }

        if let Some(builtin) = Self::BUILTIN.iter().find(|id| id.0 == name) {
            return *builtin;
        }

        if let Some(interned) = INTERNED_NAMES.read().get(name) {
            return TypeId(interned);
        }

        let mut names = INTERNED_NAMES.write();
        if let Some(interned) = names.get(name) {
            return TypeId(interned);
        }

        // type names live for the whole process
        let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
        names.insert(leaked);
        TypeId(leaked)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl Default for TypeId {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl From<&str> for TypeId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// opaque handle to a host-native class (or entry shape), with its super-class
/// chain. two handles are equal only if they are the same node.
#[derive(Clone)]
pub struct ClassHandle(Arc<ClassNode>);

struct ClassNode {
    name: String,
    super_class: Option<ClassHandle>,
}

impl ClassHandle {
    /// a root class with no super-class
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::new(ClassNode {
            name: name.into(),
            super_class: None,
        }))
    }

    /// a class deriving from `super_class`
    pub fn derived(name: impl Into<String>, super_class: &ClassHandle) -> Self {
        Self(Arc::new(ClassNode {
            name: name.into(),
            super_class: Some(super_class.clone()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn super_class(&self) -> Option<&ClassHandle> {
        self.0.super_class.as_ref()
    }

    /// this handle, then each super-class up to the root
    pub fn ancestry(&self) -> impl Iterator<Item = &ClassHandle> {
        std::iter::successors(Some(self), |class| class.super_class())
    }
}

impl PartialEq for ClassHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ClassHandle {}

impl Hash for ClassHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for ClassHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassHandle({})", self.0.name)
    }
}

#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub id: TypeId,
    pub parent: TypeId,
    pub collection_class: Option<ClassHandle>,
    pub entry_shape: Option<ClassHandle>,
    pub display_name: String,
    pub can_be_subcollection: bool,
}

impl TypeInfo {
    pub fn new(id: TypeId, parent: TypeId) -> Self {
        Self {
            id,
            parent,
            collection_class: None,
            entry_shape: None,
            display_name: id.as_str().to_string(),
            can_be_subcollection: true,
        }
    }

    pub fn with_collection_class(mut self, class: ClassHandle) -> Self {
        self.collection_class = Some(class);
        self
    }

    pub fn with_entry_shape(mut self, shape: ClassHandle) -> Self {
        self.entry_shape = Some(shape);
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_subcollection(mut self, can_be_subcollection: bool) -> Self {
        self.can_be_subcollection = can_be_subcollection;
        self
    }
}

type Registration = Box<dyn FnOnce(&TypeRegistry) + Send>;

#[derive(Default)]
struct RegistryTables {
    types: FxHashMap<TypeId, Arc<TypeInfo>>,
    // registration order, for stable enumeration
    order: Vec<TypeId>,
    by_collection_class: FxHashMap<ClassHandle, TypeId>,
    by_entry_shape: FxHashMap<ClassHandle, TypeId>,
}

impl RegistryTables {
    fn parent_of(&self, id: TypeId) -> TypeId {
        self.types.get(&id).map(|info| info.parent).unwrap_or(TypeId::NONE)
    }

    fn is_a(&self, type_id: TypeId, base: TypeId) -> bool {
        if type_id.is_none() || base.is_none() {
            return false;
        }

        // registration rejects cycles, so this walk always terminates
        let mut current = type_id;
        while !current.is_none() {
            if current == base {
                return true;
            }
            current = self.parent_of(current);
        }
        false
    }
}

#[derive(Default)]
struct PendingQueue {
    /// set while `process_pending_registrations` drains the queue
    draining: bool,
    processed: bool,
    queue: VecDeque<Registration>,
}

/// central registry of collection types
///
/// lifecycle: `new` -> `register`* -> `process_pending_registrations` ->
/// queries. queries take a read lock, registration takes the write lock.
pub struct TypeRegistry {
    tables: RwLock<RegistryTables>,
    pending: Mutex<PendingQueue>,
}

static GLOBAL_REGISTRY: LazyLock<TypeRegistry> = LazyLock::new(|| {
    let registry = TypeRegistry::new();
    registry.register_builtin_types();
    registry
});

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(RegistryTables::default()),
            pending: Mutex::new(PendingQueue::default()),
        }
    }

    /// process-wide registry, with the builtin types already registered
    pub fn global() -> &'static TypeRegistry {
        &GLOBAL_REGISTRY
    }

    /// register `Base` and the builtin collection types deriving from it
    pub fn register_builtin_types(&self) {
        self.bulk_register([
            TypeInfo::new(TypeId::BASE, TypeId::NONE).with_display_name("Asset Collection"),
            TypeInfo::new(TypeId::MESH, TypeId::BASE).with_display_name("Mesh Collection"),
            TypeInfo::new(TypeId::ACTOR, TypeId::BASE).with_display_name("Actor Collection"),
            TypeInfo::new(TypeId::PCG_DATA_ASSET, TypeId::BASE)
                .with_display_name("PCG Data Asset Collection"),
        ]);
    }

    /// register a new type.
    ///
    /// returns `TypeId::NONE` if the id is `NONE` or the parent chain would
    /// loop back onto the id. an id that is already registered is returned
    /// as-is and the existing info is kept.
    pub fn register(&self, info: TypeInfo) -> TypeId {
        if info.id.is_none() {
            log::warn!("refusing to register a type with the None id");
            return TypeId::NONE;
        }

        let mut tables = self.tables.write();

        if tables.types.contains_key(&info.id) {
            log::warn!("type {} is already registered, keeping the first registration", info.id);
            return info.id;
        }

        let mut ancestor = info.parent;
        while !ancestor.is_none() {
            if ancestor == info.id {
                log::warn!(
                    "refusing to register type {}: parent {} leads back to it",
                    info.id,
                    info.parent
                );
                return TypeId::NONE;
            }
            ancestor = tables.parent_of(ancestor);
        }

        let id = info.id;

        if let Some(class) = &info.collection_class {
            tables.by_collection_class.insert(class.clone(), id);
        }
        if let Some(shape) = &info.entry_shape {
            tables.by_entry_shape.insert(shape.clone(), id);
        }

        log::debug!("registered type {} (parent {})", id, info.parent);

        tables.order.push(id);
        tables.types.insert(id, Arc::new(info));
        id
    }

    /// register many types at once, in order. returns the resulting ids.
    pub fn bulk_register(&self, infos: impl IntoIterator<Item = TypeInfo>) -> Vec<TypeId> {
        let ids: Vec<TypeId> = infos.into_iter().map(|info| self.register(info)).collect();
        log::debug!("bulk registered {} types", ids.len());
        ids
    }

    pub fn find(&self, id: TypeId) -> Option<Arc<TypeInfo>> {
        self.tables.read().types.get(&id).cloned()
    }

    /// find the type of a collection class, walking up its super-classes
    pub fn find_by_collection_class(&self, class: &ClassHandle) -> Option<Arc<TypeInfo>> {
        let tables = self.tables.read();
        class
            .ancestry()
            .find_map(|c| tables.by_collection_class.get(c))
            .and_then(|id| tables.types.get(id).cloned())
    }

    /// find the type of an entry shape, walking up its super-shapes
    pub fn find_by_entry_shape(&self, shape: &ClassHandle) -> Option<Arc<TypeInfo>> {
        let tables = self.tables.read();
        shape
            .ancestry()
            .find_map(|s| tables.by_entry_shape.get(s))
            .and_then(|id| tables.types.get(id).cloned())
    }

    /// true if `type_id` is `base` or derives from it. `NONE` is never a type.
    pub fn is_a(&self, type_id: TypeId, base: TypeId) -> bool {
        self.tables.read().is_a(type_id, base)
    }

    /// all registered ids, in registration order
    pub fn all_type_ids(&self) -> Vec<TypeId> {
        self.tables.read().order.clone()
    }

    pub fn for_each(&self, mut f: impl FnMut(&TypeInfo)) {
        let tables = self.tables.read();
        for id in &tables.order {
            if let Some(info) = tables.types.get(id) {
                f(info);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tables.read().types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().types.is_empty()
    }

    /// queue a registration until `process_pending_registrations` runs.
    /// once processed, `registration` runs immediately instead. while the
    /// queue is draining it is queued behind the registrations already there.
    pub fn add_pending_registration(
        &self,
        registration: impl FnOnce(&TypeRegistry) + Send + 'static,
    ) {
        let mut pending = self.pending.lock();
        if pending.processed {
            drop(pending);
            registration(self);
            return;
        }
        pending.queue.push_back(Box::new(registration));
    }

    /// run queued registrations in submission order. only the first call
    /// does anything. the lock is released around each registration so it
    /// may queue more.
    pub fn process_pending_registrations(&self) {
        {
            let mut pending = self.pending.lock();
            if pending.processed || pending.draining {
                return;
            }
            pending.draining = true;
            log::debug!("processing {} pending type registrations", pending.queue.len());
        }

        loop {
            let next = {
                let mut pending = self.pending.lock();
                let next = pending.queue.pop_front();
                if next.is_none() {
                    pending.draining = false;
                    pending.processed = true;
                }
                next
            };
            match next {
                Some(registration) => registration(self),
                None => break,
            }
        }
    }

    /// true once every queued registration has run
    pub fn is_processed(&self) -> bool {
        self.pending.lock().processed
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
