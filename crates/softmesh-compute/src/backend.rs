//! Communication and transform backend traits.
//!
//! The [`Communicator`] trait abstracts the message-passing layer (a single
//! process, a set of threads, or an MPI world) and [`TransformService`]
//! abstracts the distributed 3-D Fourier transform, so that the mesh solver
//! in `softmesh-core` never touches transport details.

use num_complex::Complex64;
use thiserror::Error;

use crate::layout::IndexBox;

/// Errors originating from communication or transform backends.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Communication failure on rank {rank}: {message}")]
    Communication { rank: usize, message: String },

    #[error("Buffer size mismatch: expected {expected} values, got {actual}")]
    BufferMismatch { expected: usize, actual: usize },

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("Transform error: {0}")]
    Transform(String),
}

/// Describes a communicator.
#[derive(Debug, Clone)]
pub struct CommInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub rank: usize,
    pub size: usize,
}

/// The kind of communication backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Serial,
    Threaded,
}

/// Blocking collective message passing between the ranks of one run.
///
/// Every rank must call the collectives in the same order. There are no
/// timeouts; a rank that never arrives stalls the others, and a rank that
/// disappears is reported as [`ComputeError::Communication`].
pub trait Communicator: Send {
    /// Return information about the communicator.
    fn info(&self) -> CommInfo;

    /// Index of this rank in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of ranks.
    fn size(&self) -> usize;

    /// Personalised all-to-all exchange.
    ///
    /// `outgoing[r]` is delivered to rank `r`; the returned vector holds at
    /// index `r` the buffer rank `r` addressed to this rank. Buffers may be
    /// empty, which makes sparse point-to-point patterns (ghost exchange)
    /// expressible through the same primitive.
    fn all_to_all(&self, outgoing: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>, ComputeError>;

    /// Element-wise sum of `values` over all ranks, result on every rank.
    ///
    /// Contributions are added in rank order so every rank sees a
    /// bit-identical result.
    fn all_reduce_sum(&self, values: &mut [f64]) -> Result<(), ComputeError> {
        let size = self.size();
        let incoming = self.all_to_all(vec![values.to_vec(); size])?;
        for v in values.iter_mut() {
            *v = 0.0;
        }
        for contribution in &incoming {
            if contribution.len() != values.len() {
                return Err(ComputeError::BufferMismatch {
                    expected: values.len(),
                    actual: contribution.len(),
                });
            }
            for (v, c) in values.iter_mut().zip(contribution) {
                *v += c;
            }
        }
        Ok(())
    }

    /// Block until every rank has arrived.
    fn barrier(&self) -> Result<(), ComputeError> {
        self.all_to_all(vec![Vec::new(); self.size()]).map(|_| ())
    }
}

/// Single-process communicator: every collective is a local copy.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialComm;

impl SerialComm {
    pub fn new() -> Self {
        Self
    }
}

impl Communicator for SerialComm {
    fn info(&self) -> CommInfo {
        CommInfo {
            name: "serial".into(),
            backend_type: BackendType::Serial,
            rank: 0,
            size: 1,
        }
    }

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_to_all(&self, outgoing: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>, ComputeError> {
        if outgoing.len() != 1 {
            return Err(ComputeError::BufferMismatch {
                expected: 1,
                actual: outgoing.len(),
            });
        }
        Ok(outgoing)
    }

    fn all_reduce_sum(&self, _values: &mut [f64]) -> Result<(), ComputeError> {
        Ok(())
    }
}

/// Distributed forward/inverse 3-D Fourier transform of a complex field.
///
/// Data is held on the local pencil box ([`TransformService::pencil_box`]),
/// x fastest. `forward` is unnormalised; `inverse` divides by the number of
/// mesh points so that `inverse(forward(x)) == x`.
pub trait TransformService: Send {
    /// Global mesh dimensions `[nx, ny, nz]`.
    fn dims(&self) -> [usize; 3];

    /// The part of the mesh this rank holds in the transform layout.
    fn pencil_box(&self) -> IndexBox;

    /// In-place forward transform.
    fn forward(&mut self, comm: &dyn Communicator, data: &mut [Complex64])
        -> Result<(), ComputeError>;

    /// In-place inverse transform (normalised).
    fn inverse(&mut self, comm: &dyn Communicator, data: &mut [Complex64])
        -> Result<(), ComputeError>;

    /// Move owned brick data (x fastest over the owned box) into the pencil
    /// layout.
    fn brick_to_pencil(
        &self,
        comm: &dyn Communicator,
        brick: &[Complex64],
    ) -> Result<Vec<Complex64>, ComputeError>;

    /// Inverse of [`TransformService::brick_to_pencil`].
    fn pencil_to_brick(
        &self,
        comm: &dyn Communicator,
        pencil: &[Complex64],
    ) -> Result<Vec<Complex64>, ComputeError>;
}
