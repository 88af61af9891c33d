//! Resource types, prototype descriptors and the registry interface used to resolve them.
//!
//! A rule references a resource by `(ResourceType, index)`. The [`PrototypeRegistry`] is the
//! host's catalog of what lives at each index; tiles only know which indices they have
//! registered locally. [`PrototypeCatalog`] is a plain in-memory registry.
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use glam::Vec3;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::raster::ChannelClass;

/// Kind of content a spawn rule distributes.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Texture,
    Detail,
    Tree,
    GameObject,
    Extension,
    StampDistribution,
    Probe,
    WorldBiomeMask,
}

impl ResourceType {
    /// The instance list a placement of this type is stored in, if it is point-placed.
    pub fn instance_kind(self) -> Option<InstanceKind> {
        match self {
            ResourceType::Tree => Some(InstanceKind::Tree),
            ResourceType::GameObject => Some(InstanceKind::GameObject),
            ResourceType::Extension => Some(InstanceKind::Extension),
            ResourceType::Probe => Some(InstanceKind::Probe),
            ResourceType::StampDistribution => Some(InstanceKind::Stamp),
            ResourceType::Texture | ResourceType::Detail | ResourceType::WorldBiomeMask => None,
        }
    }

    /// Whether rules of this type place discrete instances.
    #[inline]
    pub fn is_instanced(self) -> bool {
        self.instance_kind().is_some()
    }

    /// The canvas class a rule of this type evaluates its density field on.
    pub fn channel_class(self) -> ChannelClass {
        match self {
            ResourceType::Texture => ChannelClass::Control,
            ResourceType::Detail => ChannelClass::Detail,
            _ => ChannelClass::Height,
        }
    }

    /// Whether Replace mode clears previously placed content of this type.
    #[inline]
    pub fn clears_on_replace(self) -> bool {
        self.is_instanced() || self == ResourceType::Detail
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-tile instance list.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstanceKind {
    Tree,
    GameObject,
    Extension,
    Probe,
    Stamp,
}

impl InstanceKind {
    pub const ALL: [InstanceKind; 5] = [
        InstanceKind::Tree,
        InstanceKind::GameObject,
        InstanceKind::Extension,
        InstanceKind::Probe,
        InstanceKind::Stamp,
    ];
}

/// Name-derived identity of a resource, used to key Replace-mode clearing.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceIdentity(pub u64);

impl ResourceIdentity {
    pub fn derive(resource_type: ResourceType, name: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        resource_type.hash(&mut hasher);
        name.hash(&mut hasher);
        ResourceIdentity(hasher.finish())
    }
}

/// Description of a resource as known by the host's registry.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct PrototypeDescriptor {
    pub resource_type: ResourceType,
    pub index: usize,
    /// Unique name; also the collision tag of placed instances.
    pub name: String,
    /// Footprint radius in world units used for collision and virgin-terrain checks.
    pub radius: f32,
}

impl PrototypeDescriptor {
    pub fn new(
        resource_type: ResourceType,
        index: usize,
        name: impl Into<String>,
        radius: f32,
    ) -> Self {
        Self {
            resource_type,
            index,
            name: name.into(),
            radius: radius.max(0.0),
        }
    }

    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::derive(self.resource_type, &self.name)
    }
}

/// Host-provided lookup of resource prototypes.
pub trait PrototypeRegistry {
    fn lookup(&self, resource_type: ResourceType, index: usize) -> Option<PrototypeDescriptor>;
}

/// In-memory [`PrototypeRegistry`].
#[derive(Clone, Debug, Default)]
pub struct PrototypeCatalog {
    entries: HashMap<(ResourceType, usize), PrototypeDescriptor>,
}

impl PrototypeCatalog {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registers a descriptor, replacing any previous entry at the same slot.
    pub fn register(&mut self, descriptor: PrototypeDescriptor) -> &mut Self {
        self.entries
            .insert((descriptor.resource_type, descriptor.index), descriptor);
        self
    }

    pub fn with(mut self, descriptor: PrototypeDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PrototypeRegistry for PrototypeCatalog {
    fn lookup(&self, resource_type: ResourceType, index: usize) -> Option<PrototypeDescriptor> {
        self.entries.get(&(resource_type, index)).cloned()
    }
}

/// An instance placed on a tile.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct PlacedInstance {
    pub identity: ResourceIdentity,
    pub resource_type: ResourceType,
    pub index: usize,
    /// Collision tag, the prototype name.
    pub tag: String,
    /// World position; `y` is the terrain height at placement time.
    pub position: Vec3,
    pub rotation_degrees: f32,
    pub scale: f32,
    pub radius: f32,
}
