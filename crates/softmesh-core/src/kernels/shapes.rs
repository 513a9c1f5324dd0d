//! Per-species smearing shapes and their sampled spectra.
//!
//! All kernels are normalised to unit integral, so `û(0) = 1`. The discrete
//! spectra approximate the continuous Fourier transform: a real-space sample
//! set `u(r)` maps to `û = ΔV · DFT(u)` and back via `u = IDFT(û) / ΔV`.

use std::f64::consts::{PI, TAU};

use num_complex::Complex64;
use softmesh_compute::{Communicator, IndexBox, TransformService};
use statrs::function::erf::erfc;

use super::{KernelError, KernelShape};
use crate::mesh::GridTopology;

/// `exp(-½ k² a²)`.
pub fn gaussian_spectrum(k2: f64, variance: f64) -> f64 {
    (-0.5 * k2 * variance).exp()
}

/// Unit-integral Gaussian of variance `a²` in three dimensions.
pub fn gaussian_profile(r2: f64, variance: f64) -> f64 {
    (-0.5 * r2 / variance).exp() / (TAU * variance).powf(1.5)
}

/// `(δ_ab − a² k_a k_b) exp(−½ k² a²)`.
pub fn gaussian_virial(k: [f64; 3], a: usize, b: usize, variance: f64) -> f64 {
    let k2 = k[0] * k[0] + k[1] * k[1] + k[2] * k[2];
    let delta = if a == b { 1.0 } else { 0.0 };
    (delta - variance * k[a] * k[b]) * gaussian_spectrum(k2, variance)
}

/// Unnormalised smoothed step `½ erfc((r − R) / ξ)`.
pub fn erfc_profile(r: f64, radius: f64, smoothing: f64) -> f64 {
    0.5 * erfc((r - radius) / smoothing)
}

/// Wave vectors and minimum-image displacements of the local pencil.
#[derive(Debug, Clone)]
pub struct SpectralGrid {
    pub pencil: IndexBox,
    pub cell_volume: f64,
    /// Wave vector of each pencil point.
    pub kvec: Vec<[f64; 3]>,
    /// Minimum-image displacement of each pencil point from the origin.
    pub rvec: Vec<[f64; 3]>,
    /// Whether the point lies on the Nyquist plane of each axis.
    pub nyquist: Vec<[bool; 3]>,
}

impl SpectralGrid {
    pub fn new(topology: &GridTopology, pencil: IndexBox) -> Self {
        let dims = topology.dims;
        let h = topology.spacing();
        let mut kvec = Vec::with_capacity(pencil.len());
        let mut rvec = Vec::with_capacity(pencil.len());
        let mut nyquist = Vec::with_capacity(pencil.len());
        for idx in pencil.iter() {
            let mut k = [0.0; 3];
            let mut r = [0.0; 3];
            let mut ny = [false; 3];
            for a in 0..3 {
                let n = dims[a] as i64;
                let m = idx[a];
                let signed = if m > n / 2 { m - n } else { m };
                k[a] = 2.0 * PI * signed as f64 / topology.lengths[a];
                r[a] = signed as f64 * h[a];
                ny[a] = n % 2 == 0 && m == n / 2;
            }
            kvec.push(k);
            rvec.push(r);
            nyquist.push(ny);
        }
        Self {
            pencil,
            cell_volume: topology.cell_volume(),
            kvec,
            rvec,
            nyquist,
        }
    }

    pub fn len(&self) -> usize {
        self.kvec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kvec.is_empty()
    }

    /// Continuous-normalised spectrum of one species shape.
    pub fn shape_spectrum(
        &self,
        shape: &KernelShape,
        fft: &mut dyn TransformService,
        comm: &dyn Communicator,
    ) -> Result<Vec<Complex64>, KernelError> {
        match *shape {
            KernelShape::Gaussian { variance } => Ok(self
                .kvec
                .iter()
                .map(|k| Complex64::new(gaussian_spectrum(k2(k), variance), 0.0))
                .collect()),
            KernelShape::Erfc { radius, smoothing } => {
                let samples: Vec<f64> = self
                    .rvec
                    .iter()
                    .map(|r| erfc_profile(k2(r).sqrt(), radius, smoothing))
                    .collect();
                let mut integral = [samples.iter().sum::<f64>() * self.cell_volume];
                comm.all_reduce_sum(&mut integral)?;
                if !(integral[0].is_finite() && integral[0] > 0.0) {
                    return Err(KernelError::InvalidParameters {
                        context: format!("erfc(radius={}, smoothing={})", radius, smoothing),
                        message: "profile has no weight on this mesh".into(),
                    });
                }
                let scale = 1.0 / integral[0];
                self.forward(samples.into_iter().map(|u| u * scale).collect(), fft, comm)
            }
        }
    }

    /// `ΔV · DFT(u)` of real-space samples on the pencil.
    pub fn forward(
        &self,
        real: Vec<f64>,
        fft: &mut dyn TransformService,
        comm: &dyn Communicator,
    ) -> Result<Vec<Complex64>, KernelError> {
        let mut data: Vec<Complex64> = real
            .into_iter()
            .map(|u| Complex64::new(u * self.cell_volume, 0.0))
            .collect();
        fft.forward(comm, &mut data)?;
        Ok(data)
    }

    /// Real part of `IDFT(û) / ΔV`.
    pub fn inverse(
        &self,
        spectrum: &[Complex64],
        fft: &mut dyn TransformService,
        comm: &dyn Communicator,
    ) -> Result<Vec<f64>, KernelError> {
        let mut data = spectrum.to_vec();
        fft.inverse(comm, &mut data)?;
        let scale = 1.0 / self.cell_volume;
        Ok(data.into_iter().map(|z| z.re * scale).collect())
    }

    /// `i k_a û` with the Nyquist plane of axis `a` zeroed.
    pub fn gradient(&self, spectrum: &[Complex64], axis: usize) -> Vec<Complex64> {
        spectrum
            .iter()
            .zip(self.kvec.iter().zip(&self.nyquist))
            .map(|(u, (k, ny))| {
                if ny[axis] {
                    Complex64::new(0.0, 0.0)
                } else {
                    Complex64::new(0.0, k[axis]) * *u
                }
            })
            .collect()
    }
}

#[inline]
pub(crate) fn k2(v: &[f64; 3]) -> f64 {
    v[0] * v[0] + v[1] * v[1] + v[2] * v[2]
}
