//! Mesh solver abstraction and the spectral particle-mesh implementation.
//!
//! The [`MeshSolver`] trait is the interface a host engine drives once per
//! step. The spectral implementation ([`spectral::SpectralSolver`]) spreads
//! particles onto a mesh, convolves the species densities with the pair
//! kernels in Fourier space and interpolates the resulting force fields back
//! to the particles.

pub mod spectral;

use softmesh_compute::ComputeError;
use thiserror::Error;

use crate::kernels::KernelError;
use crate::mesh::TopologyError;
use crate::types::{ComputeFlags, MeshEnergy, ParticleStore, SimulationBox};

/// Errors that can occur during setup or a force evaluation.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Particle {index} (species {species}) at {position:?}: {reason}")]
    Geometry {
        index: usize,
        species: usize,
        position: [f64; 3],
        reason: String,
    },

    #[error("{0} rank(s) failed during density assignment")]
    PeerFailure(usize),

    #[error("Mesh topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Compute backend error: {0}")]
    Compute(#[from] ComputeError),
}

/// The interface a host engine uses to evaluate mesh forces.
pub trait MeshSolver {
    /// Build the interaction kernels for the current box.
    fn setup(&mut self, sim_box: &SimulationBox) -> Result<(), SolverError>;

    /// Build the mesh topology, fields, exchange plan and transform service.
    fn setup_grid(&mut self, sim_box: &SimulationBox) -> Result<(), SolverError>;

    /// One force evaluation. Forces are added to `particles.forces`;
    /// energy and virial are computed when requested by `flags`.
    fn compute(
        &mut self,
        particles: &mut ParticleStore,
        sim_box: &SimulationBox,
        flags: ComputeFlags,
    ) -> Result<MeshEnergy, SolverError>;

    /// Human-readable name of the solver method.
    fn method_name(&self) -> &str;
}
