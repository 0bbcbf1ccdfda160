mod allocator;
mod directory;
mod record;

pub use allocator::{EntitySlotAllocator, SlotGeometry};
pub use directory::RemotePlayerDirectory;
pub use record::{EntityRecord, PlayerUpdate, Vec3, vec3_bytes};
