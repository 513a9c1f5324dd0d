//! Multi-component scalar fields over a rank's halo box.

use ndarray::{Array4, ArrayView3, Axis};
use softmesh_compute::IndexBox;

/// Dense field of `components` scalars per mesh point over the halo box.
///
/// Storage is an `ndarray::Array4` of shape `(components, nz, ny, nx)`
/// indexed from the halo origin, so x is the fastest axis like every other
/// mesh buffer in SoftMesh.
#[derive(Debug, Clone)]
pub struct MeshField {
    owned: IndexBox,
    halo: IndexBox,
    data: Array4<f64>,
}

impl MeshField {
    pub fn new(owned: IndexBox, halo: IndexBox, components: usize) -> Self {
        let [nx, ny, nz] = halo.shape();
        Self {
            owned,
            halo,
            data: Array4::zeros((components, nz, ny, nx)),
        }
    }

    pub fn components(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn owned_box(&self) -> IndexBox {
        self.owned
    }

    pub fn halo_box(&self) -> IndexBox {
        self.halo
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    pub fn component(&self, c: usize) -> ArrayView3<'_, f64> {
        self.data.index_axis(Axis(0), c)
    }

    #[inline]
    fn local(&self, idx: [i64; 3]) -> [usize; 3] {
        debug_assert!(self.halo.contains(idx), "index {:?} outside halo {:?}", idx, self.halo);
        [
            (idx[2] - self.halo.lo[2]) as usize,
            (idx[1] - self.halo.lo[1]) as usize,
            (idx[0] - self.halo.lo[0]) as usize,
        ]
    }

    #[inline]
    pub fn get(&self, c: usize, idx: [i64; 3]) -> f64 {
        let [z, y, x] = self.local(idx);
        self.data[[c, z, y, x]]
    }

    #[inline]
    pub fn set(&mut self, c: usize, idx: [i64; 3], value: f64) {
        let [z, y, x] = self.local(idx);
        self.data[[c, z, y, x]] = value;
    }

    #[inline]
    pub fn add(&mut self, c: usize, idx: [i64; 3], value: f64) {
        let [z, y, x] = self.local(idx);
        self.data[[c, z, y, x]] += value;
    }

    /// Append all components of every point of `region`, interleaved per
    /// point, in storage order.
    pub fn pack(&self, region: &IndexBox, out: &mut Vec<f64>) {
        let ncomp = self.components();
        out.reserve(region.len() * ncomp);
        for idx in region.iter() {
            let [z, y, x] = self.local(idx);
            for c in 0..ncomp {
                out.push(self.data[[c, z, y, x]]);
            }
        }
    }

    /// Overwrite `region` from a buffer laid out as by [`MeshField::pack`].
    /// Returns the number of values consumed.
    pub fn unpack_assign(&mut self, region: &IndexBox, values: &[f64]) -> usize {
        self.unpack_with(region, values, |dst, v| *dst = v)
    }

    /// Add a buffer laid out as by [`MeshField::pack`] into `region`.
    /// Returns the number of values consumed.
    pub fn unpack_add(&mut self, region: &IndexBox, values: &[f64]) -> usize {
        self.unpack_with(region, values, |dst, v| *dst += v)
    }

    fn unpack_with(&mut self, region: &IndexBox, values: &[f64], op: impl Fn(&mut f64, f64)) -> usize {
        let ncomp = self.components();
        let mut cursor = 0;
        for idx in region.iter() {
            let [z, y, x] = self.local(idx);
            for c in 0..ncomp {
                op(&mut self.data[[c, z, y, x]], values[cursor]);
                cursor += 1;
            }
        }
        cursor
    }

    /// One component over the owned box, x fastest.
    pub fn owned_values(&self, c: usize) -> Vec<f64> {
        self.owned.iter().map(|idx| self.get(c, idx)).collect()
    }

    /// Overwrite one component over the owned box from x-fastest values.
    pub fn set_owned_values(&mut self, c: usize, values: &[f64]) {
        let owned = self.owned;
        for (idx, &v) in owned.iter().zip(values) {
            self.set(c, idx, v);
        }
    }

    /// Sum of one component over the owned box.
    pub fn owned_sum(&self, c: usize) -> f64 {
        self.owned.iter().map(|idx| self.get(c, idx)).sum()
    }

    /// Sum of one component over the whole halo box.
    pub fn halo_sum(&self, c: usize) -> f64 {
        self.component(c).sum()
    }
}
