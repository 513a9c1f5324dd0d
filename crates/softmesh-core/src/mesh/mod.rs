//! Mesh geometry: resolution and decomposition, halo-backed fields, ghost
//! exchange and interpolation stencils.

pub mod exchange;
pub mod field;
pub mod stencil;
pub mod topology;

pub use exchange::GhostExchange;
pub use field::MeshField;
pub use stencil::{ParticleMeshStencil, StencilCoefficients};
pub use topology::{Brick, GridTopology, TopologyError};
