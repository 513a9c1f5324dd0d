//! Pencil-decomposed 3-D FFT on the CPU.
//!
//! Each rank holds an x-pencil (x complete, y/z split). A forward transform
//! runs 1-D FFTs along x, remaps to y-pencils, transforms along y, remaps to
//! z-pencils, transforms along z and remaps back to x-pencils, so k-space data
//! lives on the same box as the real-space input. Line transforms within a
//! rank are parallelised with Rayon.

use std::sync::Arc;

use num_complex::Complex64;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};

use crate::backend::{ComputeError, Communicator, TransformService};
use crate::layout::{pencil_boxes, IndexBox};
use crate::remap::RemapPlan;

/// Distributed FFT service over x-, y- and z-pencil layouts.
pub struct PencilFft {
    dims: [usize; 3],
    boxes: [IndexBox; 3],
    x_to_y: RemapPlan,
    y_to_z: RemapPlan,
    z_to_x: RemapPlan,
    x_to_z: RemapPlan,
    z_to_y: RemapPlan,
    y_to_x: RemapPlan,
    brick_to_x: RemapPlan,
    x_to_brick: RemapPlan,
    forward_plans: [Arc<dyn Fft<f64>>; 3],
    inverse_plans: [Arc<dyn Fft<f64>>; 3],
}

impl PencilFft {
    /// Create the service for `rank`, given the owned brick box of every rank.
    pub fn new(dims: [usize; 3], rank: usize, bricks: &[IndexBox]) -> Result<Self, ComputeError> {
        if dims.iter().any(|&n| n == 0) {
            return Err(ComputeError::InvalidLayout(format!(
                "FFT dimensions must be positive, got {:?}",
                dims
            )));
        }
        let nprocs = bricks.len();
        let x = pencil_boxes(dims, nprocs, 0);
        let y = pencil_boxes(dims, nprocs, 1);
        let z = pencil_boxes(dims, nprocs, 2);

        let mut planner = FftPlanner::<f64>::new();
        let forward_plans = [
            planner.plan_fft_forward(dims[0]),
            planner.plan_fft_forward(dims[1]),
            planner.plan_fft_forward(dims[2]),
        ];
        let inverse_plans = [
            planner.plan_fft_inverse(dims[0]),
            planner.plan_fft_inverse(dims[1]),
            planner.plan_fft_inverse(dims[2]),
        ];

        log::debug!(
            "rank {}: pencil FFT {}x{}x{}, x-pencil {:?}",
            rank,
            dims[0],
            dims[1],
            dims[2],
            x[rank]
        );

        Ok(Self {
            dims,
            boxes: [x[rank], y[rank], z[rank]],
            x_to_y: RemapPlan::new(rank, &x, &y)?,
            y_to_z: RemapPlan::new(rank, &y, &z)?,
            z_to_x: RemapPlan::new(rank, &z, &x)?,
            x_to_z: RemapPlan::new(rank, &x, &z)?,
            z_to_y: RemapPlan::new(rank, &z, &y)?,
            y_to_x: RemapPlan::new(rank, &y, &x)?,
            brick_to_x: RemapPlan::new(rank, bricks, &x)?,
            x_to_brick: RemapPlan::new(rank, &x, bricks)?,
            forward_plans,
            inverse_plans,
        })
    }

    fn check_len(&self, data: &[Complex64]) -> Result<(), ComputeError> {
        if data.len() != self.boxes[0].len() {
            return Err(ComputeError::BufferMismatch {
                expected: self.boxes[0].len(),
                actual: data.len(),
            });
        }
        Ok(())
    }
}

/// Run 1-D transforms along every line of `axis` in a box of `shape`.
fn transform_lines(data: &mut [Complex64], shape: [usize; 3], axis: usize, fft: &Arc<dyn Fft<f64>>) {
    if data.is_empty() {
        return;
    }
    let n = shape[axis];
    if axis == 0 {
        data.par_chunks_mut(n).for_each(|line| fft.process(line));
        return;
    }

    let [nx, ny, _] = shape;
    let stride = if axis == 1 { nx } else { nx * ny };
    let base = |line: usize| -> usize {
        if axis == 1 {
            (line / nx) * nx * ny + line % nx
        } else {
            line
        }
    };

    // Gather strided lines into contiguous storage, transform, scatter back.
    let mut lines = vec![Complex64::new(0.0, 0.0); data.len()];
    {
        let src: &[Complex64] = data;
        lines.par_chunks_mut(n).enumerate().for_each(|(l, line)| {
            let b = base(l);
            for (k, v) in line.iter_mut().enumerate() {
                *v = src[b + k * stride];
            }
            fft.process(line);
        });
    }
    for (l, line) in lines.chunks(n).enumerate() {
        let b = base(l);
        for (k, v) in line.iter().enumerate() {
            data[b + k * stride] = *v;
        }
    }
}

impl TransformService for PencilFft {
    fn dims(&self) -> [usize; 3] {
        self.dims
    }

    fn pencil_box(&self) -> IndexBox {
        self.boxes[0]
    }

    fn forward(
        &mut self,
        comm: &dyn Communicator,
        data: &mut [Complex64],
    ) -> Result<(), ComputeError> {
        self.check_len(data)?;
        transform_lines(data, self.boxes[0].shape(), 0, &self.forward_plans[0]);

        let mut y = self.x_to_y.apply(comm, data)?;
        transform_lines(&mut y, self.boxes[1].shape(), 1, &self.forward_plans[1]);

        let mut z = self.y_to_z.apply(comm, &y)?;
        transform_lines(&mut z, self.boxes[2].shape(), 2, &self.forward_plans[2]);

        let back = self.z_to_x.apply(comm, &z)?;
        data.copy_from_slice(&back);
        Ok(())
    }

    fn inverse(
        &mut self,
        comm: &dyn Communicator,
        data: &mut [Complex64],
    ) -> Result<(), ComputeError> {
        self.check_len(data)?;
        transform_lines(data, self.boxes[0].shape(), 0, &self.inverse_plans[0]);

        let mut z = self.x_to_z.apply(comm, data)?;
        transform_lines(&mut z, self.boxes[2].shape(), 2, &self.inverse_plans[2]);

        let mut y = self.z_to_y.apply(comm, &z)?;
        transform_lines(&mut y, self.boxes[1].shape(), 1, &self.inverse_plans[1]);

        let back = self.y_to_x.apply(comm, &y)?;

        // rustfft is unnormalised
        let scale = 1.0 / (self.dims[0] * self.dims[1] * self.dims[2]) as f64;
        data.par_iter_mut().zip(back.par_iter()).for_each(|(d, b)| {
            *d = *b * scale;
        });
        Ok(())
    }

    fn brick_to_pencil(
        &self,
        comm: &dyn Communicator,
        brick: &[Complex64],
    ) -> Result<Vec<Complex64>, ComputeError> {
        self.brick_to_x.apply(comm, brick)
    }

    fn pencil_to_brick(
        &self,
        comm: &dyn Communicator,
        pencil: &[Complex64],
    ) -> Result<Vec<Complex64>, ComputeError> {
        self.x_to_brick.apply(comm, pencil)
    }
}
