//! # SoftMesh Core
//!
//! Spectral particle-mesh evaluation of soft, density-based interactions
//! between particle species. Particles are spread onto a regular periodic
//! mesh, species densities are convolved with pair kernels in Fourier space,
//! and the resulting force fields are interpolated back to the particles.
//!
//! ## Architecture
//!
//! All solvers implement the [`solver::MeshSolver`] trait, which a host engine
//! drives once per step. The primary implementation is
//! [`solver::spectral::SpectralSolver`], which runs on any
//! [`softmesh_compute::Communicator`]: a single process or a group of ranks
//! each owning one brick of the mesh.
//!
//! | Stage | Module |
//! |-------|--------|
//! | Mesh resolution, bricks, halos | [`mesh::topology`] |
//! | Ghost exchange | [`mesh::exchange`] |
//! | Assignment stencils | [`mesh::stencil`] |
//! | Kernel construction and mixing | [`kernels`] |
//! | Convolution, energy, virial | [`solver::spectral::convolution`] |
//!
//! ## Modules
//!
//! - [`types`]: Core data structures (box, particles, parameters, results).
//! - [`mesh`]: Grid topology, halo fields, ghost exchange and stencils.
//! - [`kernels`]: Kernel shapes, mixing rules and the kernel library.
//! - [`solver`]: Mesh solver trait and the spectral implementation.
//! - [`snapshot`]: Per-rank density tables.
//! - [`average`]: Time-averaged density grids.

pub mod average;
pub mod kernels;
pub mod mesh;
pub mod snapshot;
pub mod solver;
pub mod types;

pub use solver::spectral::SpectralSolver;
pub use solver::{MeshSolver, SolverError};
