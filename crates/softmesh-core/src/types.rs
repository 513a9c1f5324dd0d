//! Core types shared across SoftMesh.
//!
//! This module defines the simulation box, the local particle store, the
//! solver parameters and the result containers of one mesh evaluation.

use serde::{Deserialize, Serialize};

/// Orthogonal periodic simulation cell, owned by the host engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationBox {
    /// Lower corner of the box.
    pub origin: [f64; 3],
    /// Edge lengths along x, y, z.
    pub lengths: [f64; 3],
    /// Periodicity per axis. The mesh solver requires all three.
    pub periodic: [bool; 3],
    /// Tilt factors (xy, xz, yz). Stored so triclinic cells are
    /// representable; the mesh solver rejects non-zero values.
    pub tilt: [f64; 3],
}

impl SimulationBox {
    /// Fully periodic orthogonal box.
    pub fn new(origin: [f64; 3], lengths: [f64; 3]) -> Self {
        Self {
            origin,
            lengths,
            periodic: [true; 3],
            tilt: [0.0; 3],
        }
    }

    /// Fully periodic cube of edge `side` anchored at the origin.
    pub fn cubic(side: f64) -> Self {
        Self::new([0.0; 3], [side; 3])
    }

    pub fn volume(&self) -> f64 {
        self.lengths[0] * self.lengths[1] * self.lengths[2]
    }

    pub fn is_orthogonal(&self) -> bool {
        self.tilt.iter().all(|&t| t == 0.0)
    }

    /// Map a position into the primary image `[origin, origin + L)`.
    pub fn wrap(&self, position: [f64; 3]) -> [f64; 3] {
        let mut out = position;
        for a in 0..3 {
            let rel = (position[a] - self.origin[a]).rem_euclid(self.lengths[a]);
            // rem_euclid may round up to exactly L for tiny negative inputs
            out[a] = self.origin[a] + if rel >= self.lengths[a] { 0.0 } else { rel };
        }
        out
    }
}

/// Independent components of the symmetric virial tensor, in output order
/// xx, yy, zz, xy, xz, yz.
pub const VIRIAL_COMPONENTS: [(usize, usize); 6] = [(0, 0), (1, 1), (2, 2), (0, 1), (0, 2), (1, 2)];

/// The particles owned by this rank.
///
/// Species ids are 1-based; id 0 is reserved for the aggregate density.
#[derive(Debug, Clone, Default)]
pub struct ParticleStore {
    pub positions: Vec<[f64; 3]>,
    pub species: Vec<usize>,
    /// Force accumulators. The solver adds to them; callers zero them.
    pub forces: Vec<[f64; 3]>,
}

impl ParticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            positions: Vec::with_capacity(n),
            species: Vec::with_capacity(n),
            forces: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, position: [f64; 3], species: usize) {
        self.positions.push(position);
        self.species.push(species);
        self.forces.push([0.0; 3]);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn zero_forces(&mut self) {
        for f in &mut self.forces {
            *f = [0.0; 3];
        }
    }

    /// Sum of all local force accumulators.
    pub fn total_force(&self) -> [f64; 3] {
        self.forces.iter().fold([0.0; 3], |acc, f| {
            [acc[0] + f[0], acc[1] + f[1], acc[2] + f[2]]
        })
    }

    /// Shift every particle by `delta`.
    pub fn translate(&mut self, delta: [f64; 3]) {
        for p in &mut self.positions {
            for a in 0..3 {
                p[a] += delta[a];
            }
        }
    }
}

/// How the global mesh resolution is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshSpec {
    /// Target grid spacing; dimensions are rounded up to FFT-friendly sizes.
    Spacing(f64),
    /// Explicit dimensions, which must already be FFT-friendly.
    Dims([usize; 3]),
}

/// Parameters of the particle-mesh solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshParams {
    pub mesh: MeshSpec,
    /// Requested interpolation stencil order (points per axis).
    pub order: usize,
    /// Smallest order automatic reduction may fall back to.
    pub min_order: usize,
    /// Whether the order may be reduced when the ghost halo would reach
    /// past the neighbouring brick.
    pub allow_order_reduction: bool,
    /// Distance particles may stray outside their sub-domain between
    /// re-decompositions.
    pub skin: f64,
    /// Reference background density.
    pub rho0: f64,
    /// Subtract each species' mean density before convolving.
    pub subtract_rho0: bool,
    /// Divide all pair weights by `rho0`.
    pub normalize_by_rho0: bool,
    /// Helfand compressibility κ; adds κ/ρ0 to every pair weight.
    pub compressibility: f64,
}

impl Default for MeshParams {
    fn default() -> Self {
        Self {
            mesh: MeshSpec::Spacing(1.0),
            order: 5,
            min_order: 2,
            allow_order_reduction: true,
            skin: 0.5,
            rho0: 1.0,
            subtract_rho0: false,
            normalize_by_rho0: false,
            compressibility: 0.0,
        }
    }
}

/// What a compute call should produce besides forces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComputeFlags {
    pub energy: bool,
    pub virial: bool,
}

impl ComputeFlags {
    pub fn all() -> Self {
        Self {
            energy: true,
            virial: true,
        }
    }

    pub fn forces_only() -> Self {
        Self::default()
    }
}

/// Energy of one interacting species pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairEnergy {
    pub species: (usize, usize),
    pub energy: f64,
}

/// Global results of one mesh evaluation (identical on every rank).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshEnergy {
    /// Total interaction energy (zero unless requested).
    pub energy: f64,
    /// Per-pair breakdown (empty unless energy was requested).
    pub pair_energies: Vec<PairEnergy>,
    /// Virial tensor in [`VIRIAL_COMPONENTS`] order (zero unless requested).
    pub virial: [f64; 6],
}
