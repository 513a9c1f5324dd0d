//! Particle-to-mesh interpolation stencils.
//!
//! The assignment functions are the piecewise polynomials of the standard
//! charge-assignment hierarchy (nearest grid point, cloud-in-cell, triangular
//! shaped cloud, ...). For order `p` the weight of stencil point `k` is a
//! polynomial of degree `p - 1` in the particle's fractional offset `dx`
//! from its reference mesh point; the coefficients come from a closed-form
//! recurrence on the B-spline pieces.

use softmesh_compute::IndexBox;

/// Smallest supported stencil order.
pub const MIN_ORDER: usize = 2;
/// Largest supported stencil order.
pub const MAX_ORDER: usize = 7;

/// Stencil reach `(nlower, nupper)` relative to the reference mesh point.
pub fn stencil_reach(order: usize) -> (i64, i64) {
    let p = order as i64;
    (-((p - 1) / 2), p / 2)
}

/// Polynomial coefficients of the assignment function of one order.
#[derive(Debug, Clone)]
pub struct StencilCoefficients {
    order: usize,
    /// `coeff[k][l]`: coefficient of `dx^l` for stencil point `nlower + k`.
    coeff: Vec<[f64; MAX_ORDER]>,
}

impl StencilCoefficients {
    pub fn new(order: usize) -> Self {
        let order = order.clamp(1, MAX_ORDER);
        let n = order as i64;
        let width = 2 * order + 1;
        let at = |k: i64| (k + n) as usize;

        // a[l][k]: coefficient of x^l for the piece centred at k/2.
        let mut a = vec![vec![0.0f64; width]; order];
        a[0][at(0)] = 1.0;
        for j in 1..n {
            let mut k = -j;
            while k <= j {
                let mut s = 0.0;
                for l in 0..j as usize {
                    let lf = (l + 1) as f64;
                    a[l + 1][at(k)] = (a[l][at(k + 1)] - a[l][at(k - 1)]) / lf;
                    let sign = if l % 2 == 0 { 1.0 } else { -1.0 };
                    s += 0.5f64.powi(l as i32 + 1) * (a[l][at(k - 1)] + sign * a[l][at(k + 1)]) / lf;
                }
                a[0][at(k)] = s;
                k += 2;
            }
        }

        let mut coeff = Vec::with_capacity(order);
        let mut k = -(n - 1);
        while k < n {
            let mut row = [0.0; MAX_ORDER];
            for (l, c) in row.iter_mut().enumerate().take(order) {
                *c = a[l][at(k)];
            }
            coeff.push(row);
            k += 2;
        }
        Self { order, coeff }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn nlower(&self) -> i64 {
        stencil_reach(self.order).0
    }

    pub fn nupper(&self) -> i64 {
        stencil_reach(self.order).1
    }

    /// Weights of the `order` stencil points for fractional offset `dx`.
    pub fn weights(&self, dx: f64) -> [f64; MAX_ORDER] {
        let mut w = [0.0; MAX_ORDER];
        for (k, row) in self.coeff.iter().enumerate() {
            let mut r = 0.0;
            for l in (0..self.order).rev() {
                r = row[l] + r * dx;
            }
            w[k] = r;
        }
        w
    }

    /// Reference mesh point and weights of a particle at `position`.
    ///
    /// `origin` is the physical location of mesh index 0 and `inv_spacing`
    /// the number of mesh points per unit length. Positions may lie outside
    /// the box; the returned indices are then outside `0..n` and refer to
    /// periodic images held in the ghost halo.
    pub fn locate(&self, position: [f64; 3], origin: [f64; 3], inv_spacing: [f64; 3]) -> ParticleMeshStencil {
        let odd = self.order % 2 == 1;
        let mut index = [0i64; 3];
        let mut weights = [[0.0; MAX_ORDER]; 3];
        for a in 0..3 {
            let u = (position[a] - origin[a]) * inv_spacing[a];
            let (nearest, dx) = if odd {
                let m = (u + 0.5).floor();
                (m, m - u)
            } else {
                let m = u.floor();
                (m, m + 0.5 - u)
            };
            index[a] = nearest as i64;
            weights[a] = self.weights(dx);
        }
        ParticleMeshStencil {
            index,
            weights,
            nlower: self.nlower(),
            order: self.order,
        }
    }
}

/// One particle's stencil for the current step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleMeshStencil {
    /// Reference mesh point.
    pub index: [i64; 3],
    /// Per-axis weights; entry `k` belongs to offset `nlower + k`.
    pub weights: [[f64; MAX_ORDER]; 3],
    nlower: i64,
    order: usize,
}

impl ParticleMeshStencil {
    /// Mesh points touched by the stencil.
    pub fn footprint(&self) -> IndexBox {
        let lo = [
            self.index[0] + self.nlower,
            self.index[1] + self.nlower,
            self.index[2] + self.nlower,
        ];
        let span = self.order as i64 - 1;
        IndexBox::new(lo, [lo[0] + span, lo[1] + span, lo[2] + span])
    }

    /// Visit every footprint point with its product weight, z slowest.
    pub fn for_each_point(&self, mut f: impl FnMut([i64; 3], f64)) {
        let lo = self.footprint().lo;
        for kz in 0..self.order {
            let wz = self.weights[2][kz];
            for ky in 0..self.order {
                let wyz = wz * self.weights[1][ky];
                for kx in 0..self.order {
                    let w = wyz * self.weights[0][kx];
                    f([lo[0] + kx as i64, lo[1] + ky as i64, lo[2] + kz as i64], w);
                }
            }
        }
    }
}
