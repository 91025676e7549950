//! Shared collaborators every region of a world needs.

use std::sync::Arc;

use crate::generator::WorldGenerator;
use crate::material::{BlockMaterial, MaterialRegistry};
use crate::region::Region;
use crate::store::ChunkStore;

/// Hook invoked on the region worker for block updates on physics materials.
pub trait BlockPhysics: Send + Sync {
    /// Handles an update of the block at world position `(x, y, z)`.
    ///
    /// Runs during stage 0 of the owning region, so writes made through
    /// `region` land in the live buffer of this tick.
    fn on_update(&self, region: &Region, material: &BlockMaterial, x: i32, y: i32, z: i32);
}

/// Immutable per-world state shared by the region source and all regions.
pub struct WorldContext {
    /// World name, used in logs and thread names.
    pub name: String,
    /// Generation seed.
    pub seed: u64,
    /// Chunk persistence.
    pub store: Arc<dyn ChunkStore>,
    /// Chunk generation.
    pub generator: Arc<dyn WorldGenerator>,
    /// Material lookup.
    pub materials: Arc<MaterialRegistry>,
    /// Optional block physics hook.
    pub physics: Option<Arc<dyn BlockPhysics>>,
}

impl WorldContext {
    /// Creates a context with the default material palette and no physics.
    pub fn new(
        name: impl Into<String>,
        seed: u64,
        store: Arc<dyn ChunkStore>,
        generator: Arc<dyn WorldGenerator>,
    ) -> Self {
        Self {
            name: name.into(),
            seed,
            store,
            generator,
            materials: Arc::new(MaterialRegistry::with_defaults()),
            physics: None,
        }
    }

    /// Replaces the material registry.
    pub fn with_materials(mut self, materials: Arc<MaterialRegistry>) -> Self {
        self.materials = materials;
        self
    }

    /// Installs a block physics hook.
    pub fn with_physics(mut self, physics: Arc<dyn BlockPhysics>) -> Self {
        self.physics = Some(physics);
        self
    }
}

impl std::fmt::Debug for WorldContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldContext")
            .field("name", &self.name)
            .field("seed", &self.seed)
            .field("generator", &self.generator.name())
            .field("materials", &self.materials.len())
            .field("physics", &self.physics.is_some())
            .finish()
    }
}
