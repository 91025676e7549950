//! Block material registry: resolves stored `(id, data)` pairs to descriptors.
//!
//! The registry is built once during startup and shared read-only. Air is
//! always `(0, 0)` so that zero-filled chunk storage is empty space. Lookups
//! never fail: an unregistered id resolves to [`BlockMaterial::unknown`].

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::MaterialError;

/// Material id of air.
pub const AIR: u16 = 0;
/// Material id of stone in the default palette.
pub const STONE: u16 = 1;
/// Material id of dirt in the default palette.
pub const DIRT: u16 = 2;
/// Material id of grass in the default palette.
pub const GRASS: u16 = 3;

/// Id reported by the unknown-material fallback.
pub const UNKNOWN_ID: u16 = u16::MAX;

/// Full descriptor for one `(id, data)` material variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockMaterial {
    /// Human-readable name (e.g. "stone", "grass").
    pub name: String,
    /// Material id stored in chunk block-id arrays.
    pub id: u16,
    /// Variant stored in chunk block-data arrays.
    pub data: u8,
    /// Whether the material blocks light and visibility.
    pub opaque: bool,
    /// Whether block updates on this material are dispatched to physics.
    pub has_physics: bool,
}

impl BlockMaterial {
    /// Creates an opaque material without physics.
    pub fn new(name: impl Into<String>, id: u16, data: u8) -> Self {
        Self {
            name: name.into(),
            id,
            data,
            opaque: true,
            has_physics: false,
        }
    }

    /// Sets the opacity flag.
    pub fn with_opaque(mut self, opaque: bool) -> Self {
        self.opaque = opaque;
        self
    }

    /// Sets the physics flag.
    pub fn with_physics(mut self, has_physics: bool) -> Self {
        self.has_physics = has_physics;
        self
    }

    /// The descriptor returned for ids with no registered material.
    pub fn unknown() -> Self {
        Self::new("unknown", UNKNOWN_ID, 0).with_opaque(false)
    }

    /// Returns `true` for the unknown-material fallback.
    pub fn is_unknown(&self) -> bool {
        self.id == UNKNOWN_ID
    }
}

/// Maps `(id, data)` to [`BlockMaterial`] with reverse lookup by name.
#[derive(Debug)]
pub struct MaterialRegistry {
    by_key: FxHashMap<(u16, u8), BlockMaterial>,
    by_name: FxHashMap<String, (u16, u8)>,
    unknown: BlockMaterial,
}

impl MaterialRegistry {
    /// Creates a registry with only air registered.
    pub fn new() -> Self {
        let mut registry = Self {
            by_key: FxHashMap::default(),
            by_name: FxHashMap::default(),
            unknown: BlockMaterial::unknown(),
        };
        registry.insert(BlockMaterial::new("air", AIR, 0).with_opaque(false));
        registry
    }

    /// Creates a registry with air, stone, dirt and grass registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.insert(BlockMaterial::new("stone", STONE, 0));
        registry.insert(BlockMaterial::new("dirt", DIRT, 0));
        registry.insert(BlockMaterial::new("grass", GRASS, 0));
        registry
    }

    fn insert(&mut self, material: BlockMaterial) {
        self.by_name
            .insert(material.name.clone(), (material.id, material.data));
        self.by_key.insert((material.id, material.data), material);
    }

    /// Registers a material.
    ///
    /// # Errors
    ///
    /// Returns [`MaterialError::DuplicateName`] or [`MaterialError::DuplicateId`]
    /// if either the name or the `(id, data)` pair is already taken, and
    /// [`MaterialError::ReservedId`] for the unknown-material id.
    pub fn register(&mut self, material: BlockMaterial) -> Result<(), MaterialError> {
        if material.id == UNKNOWN_ID {
            return Err(MaterialError::ReservedId(UNKNOWN_ID));
        }
        if self.by_name.contains_key(&material.name) {
            return Err(MaterialError::DuplicateName(material.name));
        }
        if self.by_key.contains_key(&(material.id, material.data)) {
            return Err(MaterialError::DuplicateId {
                id: material.id,
                data: material.data,
            });
        }
        self.insert(material);
        Ok(())
    }

    /// Resolves `(id, data)` to a descriptor.
    ///
    /// Falls back to the `(id, 0)` base variant, then to the unknown material.
    pub fn resolve(&self, id: u16, data: u8) -> &BlockMaterial {
        self.by_key
            .get(&(id, data))
            .or_else(|| self.by_key.get(&(id, 0)))
            .unwrap_or(&self.unknown)
    }

    /// Returns the material with the given name.
    pub fn lookup_by_name(&self, name: &str) -> Option<&BlockMaterial> {
        self.by_name.get(name).and_then(|key| self.by_key.get(key))
    }

    /// All registered materials sorted by `(id, data)`.
    pub fn materials(&self) -> Vec<&BlockMaterial> {
        let mut materials: Vec<_> = self.by_key.values().collect();
        materials.sort_unstable_by_key(|m| (m.id, m.data));
        materials
    }

    /// Number of registered variants, including air.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Returns `true` if only air is registered.
    pub fn is_empty(&self) -> bool {
        self.by_key.len() <= 1
    }
}

impl Default for MaterialRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_air_is_zero() {
        let registry = MaterialRegistry::new();
        let air = registry.resolve(0, 0);
        assert_eq!(air.name, "air");
        assert!(!air.opaque);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregistered_id_resolves_to_unknown() {
        let registry = MaterialRegistry::new();
        let material = registry.resolve(4242, 3);
        assert!(material.is_unknown());
        assert_eq!(material.name, "unknown");
    }

    #[test]
    fn test_data_variant_falls_back_to_base() {
        let mut registry = MaterialRegistry::with_defaults();
        registry
            .register(BlockMaterial::new("mossy_stone", STONE, 1))
            .unwrap();
        assert_eq!(registry.resolve(STONE, 1).name, "mossy_stone");
        assert_eq!(registry.resolve(STONE, 7).name, "stone");
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let mut registry = MaterialRegistry::with_defaults();
        assert!(matches!(
            registry.register(BlockMaterial::new("stone", 40, 0)),
            Err(MaterialError::DuplicateName(_))
        ));
        assert!(matches!(
            registry.register(BlockMaterial::new("granite", DIRT, 0)),
            Err(MaterialError::DuplicateId { id: DIRT, data: 0 })
        ));
        assert!(matches!(
            registry.register(BlockMaterial::new("void", UNKNOWN_ID, 0)),
            Err(MaterialError::ReservedId(_))
        ));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_lookup_by_name() {
        let mut registry = MaterialRegistry::with_defaults();
        registry
            .register(BlockMaterial::new("sand", 12, 0).with_physics(true))
            .unwrap();
        let sand = registry.lookup_by_name("sand").unwrap();
        assert_eq!(sand.id, 12);
        assert!(sand.has_physics);
        assert!(registry.lookup_by_name("lava").is_none());

        let names: Vec<_> = registry.materials().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["air", "stone", "dirt", "grass", "sand"]);
    }
}
