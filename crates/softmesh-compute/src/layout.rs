//! Integer index boxes and process-grid partitioning.
//!
//! All mesh data in SoftMesh lives on axis-aligned boxes of global mesh
//! indices. Boxes are inclusive on both ends (`lo..=hi`), may extend below
//! zero or past the mesh size (ghost halos of periodic images), and are
//! stored x fastest, z slowest.

/// An inclusive, axis-aligned box of global mesh indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexBox {
    pub lo: [i64; 3],
    pub hi: [i64; 3],
}

impl IndexBox {
    pub fn new(lo: [i64; 3], hi: [i64; 3]) -> Self {
        Self { lo, hi }
    }

    /// The full mesh `0..=n-1` on every axis.
    pub fn from_dims(dims: [usize; 3]) -> Self {
        Self {
            lo: [0; 3],
            hi: [dims[0] as i64 - 1, dims[1] as i64 - 1, dims[2] as i64 - 1],
        }
    }

    /// A box containing no points.
    pub fn empty() -> Self {
        Self {
            lo: [0; 3],
            hi: [-1; 3],
        }
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|a| self.hi[a] < self.lo[a])
    }

    /// Number of points along `axis` (zero for an empty box).
    pub fn extent(&self, axis: usize) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.hi[axis] - self.lo[axis] + 1) as usize
        }
    }

    /// `[nx, ny, nz]` of the box.
    pub fn shape(&self) -> [usize; 3] {
        [self.extent(0), self.extent(1), self.extent(2)]
    }

    /// Total number of points.
    pub fn len(&self) -> usize {
        self.extent(0) * self.extent(1) * self.extent(2)
    }

    pub fn contains(&self, idx: [i64; 3]) -> bool {
        (0..3).all(|a| idx[a] >= self.lo[a] && idx[a] <= self.hi[a])
    }

    /// Whether `other` lies entirely within this box.
    pub fn encloses(&self, other: &IndexBox) -> bool {
        other.is_empty() || (self.contains(other.lo) && self.contains(other.hi))
    }

    /// Intersection of two boxes; empty if they do not overlap.
    pub fn intersect(&self, other: &IndexBox) -> IndexBox {
        let mut out = IndexBox::empty();
        for a in 0..3 {
            out.lo[a] = self.lo[a].max(other.lo[a]);
            out.hi[a] = self.hi[a].min(other.hi[a]);
        }
        if out.is_empty() {
            IndexBox::empty()
        } else {
            out
        }
    }

    /// Translate the box by `shift`.
    pub fn shifted(&self, shift: [i64; 3]) -> IndexBox {
        IndexBox {
            lo: [self.lo[0] + shift[0], self.lo[1] + shift[1], self.lo[2] + shift[2]],
            hi: [self.hi[0] + shift[0], self.hi[1] + shift[1], self.hi[2] + shift[2]],
        }
    }

    /// Expand by `below` points under `lo` and `above` points past `hi`.
    pub fn grown(&self, below: [i64; 3], above: [i64; 3]) -> IndexBox {
        IndexBox {
            lo: [self.lo[0] - below[0], self.lo[1] - below[1], self.lo[2] - below[2]],
            hi: [self.hi[0] + above[0], self.hi[1] + above[1], self.hi[2] + above[2]],
        }
    }

    /// Linear storage offset of a global index inside this box.
    ///
    /// The index must be contained in the box.
    #[inline]
    pub fn offset(&self, idx: [i64; 3]) -> usize {
        debug_assert!(self.contains(idx), "index {:?} outside box {:?}", idx, self);
        let nx = self.extent(0);
        let ny = self.extent(1);
        let x = (idx[0] - self.lo[0]) as usize;
        let y = (idx[1] - self.lo[1]) as usize;
        let z = (idx[2] - self.lo[2]) as usize;
        (z * ny + y) * nx + x
    }

    /// Iterate the global indices of the box in storage order.
    pub fn iter(&self) -> impl Iterator<Item = [i64; 3]> + '_ {
        let [nx, ny, _] = self.shape();
        (0..self.len()).map(move |i| {
            let x = (i % nx) as i64;
            let y = ((i / nx) % ny) as i64;
            let z = (i / (nx * ny)) as i64;
            [self.lo[0] + x, self.lo[1] + y, self.lo[2] + z]
        })
    }
}

/// Inclusive sub-range `index` of `parts` equal splits of `0..n`.
///
/// Matches the integer split used for the brick decomposition: the range
/// starts at `index * n / parts`. Ranges are empty when `parts > n` leaves a
/// part without points.
pub fn split_range(n: usize, parts: usize, index: usize) -> (i64, i64) {
    let lo = (index * n / parts) as i64;
    let hi = ((index + 1) * n / parts) as i64 - 1;
    (lo, hi)
}

/// Factor `nprocs` into a 3-D process grid minimising sub-domain surface
/// area for a box with edge `lengths`.
pub fn proc_grid_3d(nprocs: usize, lengths: [f64; 3]) -> [usize; 3] {
    let area = [
        lengths[0] * lengths[1],
        lengths[0] * lengths[2],
        lengths[1] * lengths[2],
    ];
    let mut best = [nprocs, 1, 1];
    let mut best_surf = f64::INFINITY;
    for px in 1..=nprocs {
        if nprocs % px != 0 {
            continue;
        }
        let rest = nprocs / px;
        for py in 1..=rest {
            if rest % py != 0 {
                continue;
            }
            let pz = rest / py;
            let surf = area[0] / (px * py) as f64
                + area[1] / (px * pz) as f64
                + area[2] / (py * pz) as f64;
            if surf < best_surf - 1e-12 * best_surf.abs().max(1.0) {
                best_surf = surf;
                best = [px, py, pz];
            }
        }
    }
    best
}

/// Factor `nprocs` into a 2-D grid `[p1, p2]` over axes of length `n1`,
/// `n2`, minimising the perimeter of each column block.
pub fn proc_grid_2d(nprocs: usize, n1: usize, n2: usize) -> [usize; 2] {
    let mut best = [1, nprocs];
    let mut best_perimeter = f64::INFINITY;
    for p1 in 1..=nprocs {
        if nprocs % p1 != 0 {
            continue;
        }
        let p2 = nprocs / p1;
        let perimeter = n1 as f64 / p1 as f64 + n2 as f64 / p2 as f64;
        if perimeter < best_perimeter - 1e-12 {
            best_perimeter = perimeter;
            best = [p1, p2];
        }
    }
    best
}

/// Pencil boxes for every rank: `whole_axis` is kept complete, the other
/// two axes are split on a 2-D process grid.
pub fn pencil_boxes(dims: [usize; 3], nprocs: usize, whole_axis: usize) -> Vec<IndexBox> {
    let (a, b) = match whole_axis {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    };
    let [pa, pb] = proc_grid_2d(nprocs, dims[a], dims[b]);
    (0..nprocs)
        .map(|rank| {
            let ia = rank % pa;
            let ib = rank / pa;
            let mut bx = IndexBox::from_dims(dims);
            let (lo, hi) = split_range(dims[a], pa, ia);
            bx.lo[a] = lo;
            bx.hi[a] = hi;
            let (lo, hi) = split_range(dims[b], pb, ib);
            bx.lo[b] = lo;
            bx.hi[b] = hi;
            if bx.is_empty() {
                IndexBox::empty()
            } else {
                bx
            }
        })
        .collect()
}
