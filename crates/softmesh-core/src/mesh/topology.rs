//! Global mesh resolution and its decomposition over ranks.
//!
//! Each rank owns a brick of mesh points (`owned`), stores a larger halo box
//! (`halo`) so that the interpolation stencils of its particles never leave
//! local memory, and holds an x-pencil for the Fourier transform.

use softmesh_compute::layout::{pencil_boxes, proc_grid_3d, split_range};
use softmesh_compute::IndexBox;
use thiserror::Error;

use super::stencil::{stencil_reach, MAX_ORDER, MIN_ORDER};
use crate::types::{MeshParams, MeshSpec, SimulationBox};

/// Hard ceiling on any mesh dimension.
pub const MAX_GRID_DIM: usize = 16384;

const FFT_PRIMES: [usize; 3] = [2, 3, 5];

/// Errors raised while resolving or decomposing the mesh.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Grid dimension {dim} along axis {axis} exceeds the limit of {MAX_GRID_DIM}")]
    GridTooLarge { axis: usize, dim: usize },

    #[error("Grid dimension {dim} along axis {axis} is not a product of 2, 3 and 5")]
    NotFactorable { axis: usize, dim: usize },

    #[error("Stencil order {0} outside the supported range {MIN_ORDER}..={MAX_ORDER}")]
    InvalidOrder(usize),

    #[error(
        "Ghost halo of {needed} points along axis {axis} exceeds the narrowest brick ({available} points) at order {order}"
    )]
    HaloTooWide {
        axis: usize,
        needed: usize,
        available: usize,
        order: usize,
    },

    #[error("Unsupported simulation box: {0}")]
    UnsupportedBox(String),

    #[error("Invalid mesh request: {0}")]
    InvalidRequest(String),
}

/// Whether every prime factor of `n` is 2, 3 or 5.
pub fn is_fft_friendly(n: usize) -> bool {
    if n == 0 {
        return false;
    }
    let mut rest = n;
    for p in FFT_PRIMES {
        while rest % p == 0 {
            rest /= p;
        }
    }
    rest == 1
}

/// Smallest FFT-friendly size `>= n`.
pub fn next_fft_size(n: usize) -> usize {
    let mut m = n.max(1);
    while !is_fft_friendly(m) {
        m += 1;
    }
    m
}

/// Turn a [`MeshSpec`] into concrete global dimensions for `sim_box`.
pub fn resolve_dims(spec: &MeshSpec, sim_box: &SimulationBox) -> Result<[usize; 3], TopologyError> {
    let mut dims = [0usize; 3];
    match *spec {
        MeshSpec::Spacing(h) => {
            if !(h.is_finite() && h > 0.0) {
                return Err(TopologyError::InvalidRequest(format!(
                    "grid spacing must be positive, got {}",
                    h
                )));
            }
            for a in 0..3 {
                let raw = (sim_box.lengths[a] / h).ceil();
                if raw >= MAX_GRID_DIM as f64 {
                    return Err(TopologyError::GridTooLarge {
                        axis: a,
                        dim: raw as usize,
                    });
                }
                dims[a] = next_fft_size(raw as usize);
            }
        }
        MeshSpec::Dims(requested) => {
            for a in 0..3 {
                if !is_fft_friendly(requested[a]) {
                    return Err(TopologyError::NotFactorable {
                        axis: a,
                        dim: requested[a],
                    });
                }
                dims[a] = requested[a];
            }
        }
    }
    for (axis, &dim) in dims.iter().enumerate() {
        if dim >= MAX_GRID_DIM {
            return Err(TopologyError::GridTooLarge { axis, dim });
        }
    }
    Ok(dims)
}

/// One rank's share of the mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Brick {
    /// Mesh points this rank owns.
    pub owned: IndexBox,
    /// Owned points plus ghosts reachable from local particles.
    pub halo: IndexBox,
    /// Sub-domain as fractions of the box, `[lo, hi)` per axis.
    pub sub_lo: [f64; 3],
    pub sub_hi: [f64; 3],
}

/// Mesh resolution, stencil order and the brick/pencil layouts of all ranks.
#[derive(Debug, Clone)]
pub struct GridTopology {
    pub dims: [usize; 3],
    /// Effective stencil order (may be below the requested one).
    pub order: usize,
    pub proc_grid: [usize; 3],
    pub rank: usize,
    pub bricks: Vec<Brick>,
    pub pencils: Vec<IndexBox>,
    pub origin: [f64; 3],
    pub lengths: [f64; 3],
}

impl GridTopology {
    /// Resolve the mesh and decompose it over `nprocs` ranks.
    pub fn new(
        params: &MeshParams,
        sim_box: &SimulationBox,
        rank: usize,
        nprocs: usize,
    ) -> Result<Self, TopologyError> {
        check_box(sim_box)?;
        if nprocs == 0 || rank >= nprocs {
            return Err(TopologyError::InvalidRequest(format!(
                "rank {} out of range for {} ranks",
                rank, nprocs
            )));
        }
        if !(MIN_ORDER..=MAX_ORDER).contains(&params.order) {
            return Err(TopologyError::InvalidOrder(params.order));
        }
        if !(params.skin.is_finite() && params.skin >= 0.0) {
            return Err(TopologyError::InvalidRequest(format!(
                "skin distance must be non-negative, got {}",
                params.skin
            )));
        }

        let dims = resolve_dims(&params.mesh, sim_box)?;
        let proc_grid = proc_grid_3d(nprocs, sim_box.lengths);
        for a in 0..3 {
            if proc_grid[a] > dims[a] {
                return Err(TopologyError::InvalidRequest(format!(
                    "{} ranks along axis {} but only {} mesh points",
                    proc_grid[a], a, dims[a]
                )));
            }
        }

        let floor_order = params.min_order.max(MIN_ORDER);
        let mut order = params.order;
        let bricks = loop {
            let bricks = build_bricks(dims, proc_grid, nprocs, order, params.skin, sim_box);
            match check_reach(&bricks) {
                None => break bricks,
                Some((axis, needed, available)) => {
                    if params.allow_order_reduction && order > floor_order {
                        log::warn!(
                            "Reducing stencil order {} -> {}: halo of {} points along axis {} exceeds brick width {}",
                            order,
                            order - 1,
                            needed,
                            axis,
                            available
                        );
                        order -= 1;
                    } else {
                        return Err(TopologyError::HaloTooWide {
                            axis,
                            needed,
                            available,
                            order,
                        });
                    }
                }
            }
        };

        if rank == 0 {
            log::info!(
                "Mesh {}x{}x{} on process grid {}x{}x{}, stencil order {}",
                dims[0],
                dims[1],
                dims[2],
                proc_grid[0],
                proc_grid[1],
                proc_grid[2],
                order
            );
        }

        Ok(Self {
            dims,
            order,
            proc_grid,
            rank,
            bricks,
            pencils: pencil_boxes(dims, nprocs, 0),
            origin: sim_box.origin,
            lengths: sim_box.lengths,
        })
    }

    /// This rank's brick.
    pub fn brick(&self) -> &Brick {
        &self.bricks[self.rank]
    }

    pub fn nprocs(&self) -> usize {
        self.bricks.len()
    }

    pub fn owned_boxes(&self) -> Vec<IndexBox> {
        self.bricks.iter().map(|b| b.owned).collect()
    }

    pub fn halo_boxes(&self) -> Vec<IndexBox> {
        self.bricks.iter().map(|b| b.halo).collect()
    }

    pub fn pencil(&self) -> IndexBox {
        self.pencils[self.rank]
    }

    pub fn total_points(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    pub fn spacing(&self) -> [f64; 3] {
        [
            self.lengths[0] / self.dims[0] as f64,
            self.lengths[1] / self.dims[1] as f64,
            self.lengths[2] / self.dims[2] as f64,
        ]
    }

    pub fn cell_volume(&self) -> f64 {
        let h = self.spacing();
        h[0] * h[1] * h[2]
    }

    /// Physical coordinates of a mesh point.
    pub fn position_of(&self, idx: [i64; 3]) -> [f64; 3] {
        let h = self.spacing();
        [
            self.origin[0] + idx[0] as f64 * h[0],
            self.origin[1] + idx[1] as f64 * h[1],
            self.origin[2] + idx[2] as f64 * h[2],
        ]
    }

    /// Physical bounds `[lo, hi)` of `rank`'s sub-domain.
    pub fn subdomain(&self, rank: usize) -> ([f64; 3], [f64; 3]) {
        let b = &self.bricks[rank];
        let mut lo = [0.0; 3];
        let mut hi = [0.0; 3];
        for a in 0..3 {
            lo[a] = self.origin[a] + b.sub_lo[a] * self.lengths[a];
            hi[a] = self.origin[a] + b.sub_hi[a] * self.lengths[a];
        }
        (lo, hi)
    }

    /// Rank whose sub-domain contains `position` (wrapped into the box).
    pub fn owner_of(&self, position: [f64; 3]) -> usize {
        let mut loc = [0usize; 3];
        for a in 0..3 {
            let frac = ((position[a] - self.origin[a]) / self.lengths[a]).rem_euclid(1.0);
            let p = self.proc_grid[a];
            loc[a] = ((frac * p as f64) as usize).min(p - 1);
        }
        loc[0] + self.proc_grid[0] * (loc[1] + self.proc_grid[1] * loc[2])
    }
}

fn check_box(sim_box: &SimulationBox) -> Result<(), TopologyError> {
    if sim_box.periodic.iter().any(|&p| !p) {
        return Err(TopologyError::UnsupportedBox(
            "the mesh solver requires periodic boundaries on all three axes".into(),
        ));
    }
    if !sim_box.is_orthogonal() {
        return Err(TopologyError::UnsupportedBox(format!(
            "triclinic boxes are not supported (tilt {:?})",
            sim_box.tilt
        )));
    }
    if sim_box.lengths.iter().any(|&l| !(l.is_finite() && l > 0.0)) {
        return Err(TopologyError::UnsupportedBox(format!(
            "box lengths must be positive, got {:?}",
            sim_box.lengths
        )));
    }
    Ok(())
}

fn build_bricks(
    dims: [usize; 3],
    proc_grid: [usize; 3],
    nprocs: usize,
    order: usize,
    skin: f64,
    sim_box: &SimulationBox,
) -> Vec<Brick> {
    let (nlower, nupper) = stencil_reach(order);
    // Odd orders round to the nearest point, even orders to the lower one.
    let shift = if order % 2 == 1 { 0.5 } else { 0.0 };

    (0..nprocs)
        .map(|rank| {
            let loc = [
                rank % proc_grid[0],
                (rank / proc_grid[0]) % proc_grid[1],
                rank / (proc_grid[0] * proc_grid[1]),
            ];
            let mut owned = IndexBox::empty();
            let mut halo = IndexBox::empty();
            let mut sub_lo = [0.0; 3];
            let mut sub_hi = [0.0; 3];
            for a in 0..3 {
                let (lo, hi) = split_range(dims[a], proc_grid[a], loc[a]);
                owned.lo[a] = lo;
                owned.hi[a] = hi;

                sub_lo[a] = loc[a] as f64 / proc_grid[a] as f64;
                sub_hi[a] = (loc[a] + 1) as f64 / proc_grid[a] as f64;

                let n = dims[a] as f64;
                let skin_points = skin * n / sim_box.lengths[a];
                let first = (sub_lo[a] * n - skin_points + shift).floor() as i64;
                let last = (sub_hi[a] * n + skin_points + shift).floor() as i64;
                halo.lo[a] = (first + nlower).min(lo);
                halo.hi[a] = (last + nupper).max(hi);
            }
            Brick {
                owned,
                halo,
                sub_lo,
                sub_hi,
            }
        })
        .collect()
}

/// Returns the first axis on which some halo reaches past the nearest
/// neighbouring brick, as `(axis, needed, available)`.
fn check_reach(bricks: &[Brick]) -> Option<(usize, usize, usize)> {
    for a in 0..3 {
        let available = bricks
            .iter()
            .map(|b| b.owned.extent(a))
            .min()
            .unwrap_or(0);
        for b in bricks {
            let below = (b.owned.lo[a] - b.halo.lo[a]) as usize;
            let above = (b.halo.hi[a] - b.owned.hi[a]) as usize;
            let needed = below.max(above);
            if needed > available {
                return Some((a, needed, available));
            }
        }
    }
    None
}
