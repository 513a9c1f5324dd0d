//! Fourier-space convolution of species densities with pair kernels.
//!
//! For every interacting pair `(i, j)` with weight `w`:
//!
//! - force density on species `i`: `F̂_i = −w G ρ̂_j`, and symmetrically on
//!   `j` when `i ≠ j`,
//! - energy: `E_ij = f w ΔV Σ ρ_i · IFFT(û ρ̂_j)` with `f = ½` for `i = j`,
//! - virial: as the energy with each of the six virial kernels.
//!
//! All buffers live on the local pencil; reductions over ranks are left to
//! the caller so that energies and virials travel in one collective.

use num_complex::Complex64;
use rayon::prelude::*;
use softmesh_compute::{ComputeError, Communicator, TransformService};

use crate::kernels::{InteractionConfig, KernelLibrary};
use crate::solver::SolverError;
use crate::types::MeshParams;

/// Effective weight of one unordered species pair (`i <= j`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairWeight {
    pub i: usize,
    pub j: usize,
    pub weight: f64,
}

/// Effective weights of every pair with a non-zero interaction.
///
/// `w_ij = chi_ij + κ/ρ0`, divided by `ρ0` when `normalize_by_rho0` is set.
pub fn pair_weights(config: &InteractionConfig, params: &MeshParams) -> Result<Vec<PairWeight>, SolverError> {
    let n = config.nspecies();
    if n != config.chi.nspecies() {
        return Err(SolverError::InvalidConfig(format!(
            "{} species shapes but a {}x{} chi matrix",
            n,
            config.chi.nspecies(),
            config.chi.nspecies()
        )));
    }
    let needs_rho0 = params.normalize_by_rho0 || params.compressibility != 0.0;
    if needs_rho0 && !(params.rho0.is_finite() && params.rho0 > 0.0) {
        return Err(SolverError::InvalidConfig(format!(
            "rho0 must be positive when normalising or using compressibility, got {}",
            params.rho0
        )));
    }

    let mut weights = Vec::new();
    for i in 1..=n {
        for j in i..=n {
            let mut w = config.chi.get(i, j);
            if params.compressibility != 0.0 {
                w += params.compressibility / params.rho0;
            }
            if params.normalize_by_rho0 {
                w /= params.rho0;
            }
            if w != 0.0 {
                weights.push(PairWeight { i, j, weight: w });
            }
        }
    }
    Ok(weights)
}

/// Species referenced by at least one weight, indexed by species id.
pub fn active_species(nspecies: usize, weights: &[PairWeight]) -> Vec<bool> {
    let mut active = vec![false; nspecies + 1];
    for w in weights {
        active[w.i] = true;
        active[w.j] = true;
    }
    active
}

/// Pencil buffers for the per-species densities, spectra and force spectra.
#[derive(Debug, Clone)]
pub struct ConvolutionEngine {
    cell_volume: f64,
    densities: Vec<Vec<f64>>,
    spectra: Vec<Vec<Complex64>>,
    forces: Vec<[Vec<Complex64>; 3]>,
}

impl ConvolutionEngine {
    pub fn new(nspecies: usize, pencil_len: usize, cell_volume: f64) -> Self {
        let zero = Complex64::new(0.0, 0.0);
        Self {
            cell_volume,
            densities: vec![vec![0.0; pencil_len]; nspecies],
            spectra: vec![vec![zero; pencil_len]; nspecies],
            forces: (0..nspecies)
                .map(|_| [vec![zero; pencil_len], vec![zero; pencil_len], vec![zero; pencil_len]])
                .collect(),
        }
    }

    /// Install the real-space density of `species` (pencil layout).
    pub fn load_density(&mut self, species: usize, values: Vec<f64>) {
        self.densities[species - 1] = values;
    }

    pub fn density(&self, species: usize) -> &[f64] {
        &self.densities[species - 1]
    }

    pub fn spectrum(&self, species: usize) -> &[Complex64] {
        &self.spectra[species - 1]
    }

    /// Forward-transform the densities of all active species.
    pub fn transform(
        &mut self,
        active: &[bool],
        fft: &mut dyn TransformService,
        comm: &dyn Communicator,
    ) -> Result<(), ComputeError> {
        for s in 1..active.len() {
            if !active[s] {
                continue;
            }
            let spectrum = &mut self.spectra[s - 1];
            spectrum.clear();
            spectrum.extend(self.densities[s - 1].iter().map(|&r| Complex64::new(r, 0.0)));
            fft.forward(comm, spectrum)?;
        }
        Ok(())
    }

    /// Accumulate the k-space force densities of every species.
    pub fn accumulate_forces(&mut self, library: &KernelLibrary, weights: &[PairWeight]) -> Result<(), SolverError> {
        let zero = Complex64::new(0.0, 0.0);
        for per_axis in &mut self.forces {
            for f in per_axis.iter_mut() {
                f.iter_mut().for_each(|v| *v = zero);
            }
        }
        for pw in weights {
            let kernel = library.get(pw.i, pw.j).ok_or_else(|| {
                SolverError::InvalidConfig(format!("no kernel built for pair ({}, {})", pw.i, pw.j))
            })?;
            let w = pw.weight;
            for a in 0..3 {
                let g = &kernel.gradient[a];
                add_scaled_product(&mut self.forces[pw.i - 1][a], g, &self.spectra[pw.j - 1], -w)?;
                if pw.i != pw.j {
                    add_scaled_product(&mut self.forces[pw.j - 1][a], g, &self.spectra[pw.i - 1], -w)?;
                }
            }
        }
        Ok(())
    }

    /// Real-space force density of `species` along `axis` (pencil layout).
    pub fn force_density(
        &self,
        species: usize,
        axis: usize,
        fft: &mut dyn TransformService,
        comm: &dyn Communicator,
    ) -> Result<Vec<Complex64>, ComputeError> {
        let mut data = self.forces[species - 1][axis].clone();
        fft.inverse(comm, &mut data)?;
        Ok(data)
    }

    /// Local contribution of every pair to the energy, in `weights` order.
    pub fn pair_energies(
        &self,
        library: &KernelLibrary,
        weights: &[PairWeight],
        fft: &mut dyn TransformService,
        comm: &dyn Communicator,
    ) -> Result<Vec<f64>, SolverError> {
        let mut energies = Vec::with_capacity(weights.len());
        for pw in weights {
            let kernel = library.get(pw.i, pw.j).ok_or_else(|| {
                SolverError::InvalidConfig(format!("no kernel built for pair ({}, {})", pw.i, pw.j))
            })?;
            let sum = self.contract(pw, &kernel.kspace, fft, comm)?;
            energies.push(self.prefactor(pw) * sum);
        }
        Ok(energies)
    }

    /// Local virial summed over all pairs.
    pub fn virial(
        &self,
        library: &KernelLibrary,
        weights: &[PairWeight],
        fft: &mut dyn TransformService,
        comm: &dyn Communicator,
    ) -> Result<[f64; 6], SolverError> {
        let mut virial = [0.0; 6];
        for pw in weights {
            let kernel = library.get(pw.i, pw.j).ok_or_else(|| {
                SolverError::InvalidConfig(format!("no kernel built for pair ({}, {})", pw.i, pw.j))
            })?;
            let prefactor = self.prefactor(pw);
            for (c, v) in kernel.virial.iter().enumerate() {
                virial[c] += prefactor * self.contract(pw, v, fft, comm)?;
            }
        }
        Ok(virial)
    }

    fn prefactor(&self, pw: &PairWeight) -> f64 {
        let f = if pw.i == pw.j { 0.5 } else { 1.0 };
        f * pw.weight * self.cell_volume
    }

    /// `Σ ρ_i · IFFT(kernel ρ̂_j)` over the local pencil.
    fn contract(
        &self,
        pw: &PairWeight,
        kernel: &[Complex64],
        fft: &mut dyn TransformService,
        comm: &dyn Communicator,
    ) -> Result<f64, ComputeError> {
        check_len(self.spectra[pw.j - 1].len(), kernel.len())?;
        let mut potential: Vec<Complex64> = kernel
            .par_iter()
            .zip(self.spectra[pw.j - 1].par_iter())
            .map(|(u, r)| u * r)
            .collect();
        fft.inverse(comm, &mut potential)?;
        Ok(self.densities[pw.i - 1]
            .iter()
            .zip(&potential)
            .map(|(rho, phi)| rho * phi.re)
            .sum())
    }
}

fn check_len(expected: usize, actual: usize) -> Result<(), ComputeError> {
    if expected != actual {
        return Err(ComputeError::BufferMismatch { expected, actual });
    }
    Ok(())
}

/// `out += scale · a · b` point-wise; all three must cover the same pencil.
fn add_scaled_product(
    out: &mut [Complex64],
    a: &[Complex64],
    b: &[Complex64],
    scale: f64,
) -> Result<(), ComputeError> {
    check_len(out.len(), a.len())?;
    check_len(out.len(), b.len())?;
    out.par_iter_mut()
        .zip(a.par_iter().zip(b.par_iter()))
        .for_each(|(o, (x, y))| *o += x * y * scale);
    Ok(())
}
