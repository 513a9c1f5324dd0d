//! # SoftMesh Compute
//!
//! Communication and transform backends for the SoftMesh particle-mesh
//! solver. The physics code in `softmesh-core` talks to two traits:
//!
//! - [`Communicator`](backend::Communicator): blocking collectives between
//!   the ranks that share one mesh.
//! - [`TransformService`](backend::TransformService): distributed forward and
//!   inverse 3-D FFT plus the brick ↔ pencil remap.
//!
//! ## Available backends
//!
//! | Backend | Feature flag | Status |
//! |---------|-------------|--------|
//! | Serial communicator | always | Implemented |
//! | Pencil FFT (rustfft + Rayon) | `cpu` (default) | Implemented |
//! | Threaded communicator | `distributed` (default) | Implemented |

pub mod backend;
pub mod layout;
pub mod remap;

#[cfg(feature = "cpu")]
pub mod cpu;

#[cfg(feature = "distributed")]
pub mod distributed;

pub use backend::{BackendType, CommInfo, ComputeError, Communicator, SerialComm, TransformService};
pub use layout::IndexBox;
pub use remap::RemapPlan;

#[cfg(feature = "cpu")]
pub use cpu::PencilFft;

#[cfg(feature = "distributed")]
pub use distributed::{LocalWorld, ThreadComm};
