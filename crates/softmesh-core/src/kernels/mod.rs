//! Interaction kernels between species.
//!
//! Each species may carry a smearing shape; the cross-kernel of a pair is
//! either the convolution of the two shapes (mixing mode) or configured
//! explicitly (define mode). For every interacting pair the
//! [`KernelLibrary`] stores the kernel in real space and k-space together
//! with its spectral gradient and virial kernels on the local pencil.
//!
//! | Pair shapes | Recipe |
//! |-------------|--------|
//! | Gaussian × Gaussian | closed form, variances add |
//! | anything × point | the shape alone |
//! | other combinations | numeric product of spectra |

pub mod mixing;
pub mod shapes;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use softmesh_compute::{ComputeError, Communicator, IndexBox, TransformService};
use thiserror::Error;

use crate::mesh::GridTopology;
use crate::types::VIRIAL_COMPONENTS;
pub use mixing::KernelRecipe;
use shapes::{gaussian_profile, gaussian_spectrum, gaussian_virial, k2, SpectralGrid};

/// Errors raised while validating or building kernels.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Invalid kernel parameters for {context}: {message}")]
    InvalidParameters { context: String, message: String },

    #[error("Species pair ({0}, {1}) interacts but neither species has a kernel shape")]
    Undefined(usize, usize),

    #[error("Species pair ({0}, {1}) interacts but no cross-kernel is defined")]
    MissingCrossKernel(usize, usize),

    #[error("Species pair ({0}, {1}) has conflicting kernel definitions")]
    Ambiguous(usize, usize),

    #[error("Species {species} out of range 1..={nspecies}")]
    UnknownSpecies { species: usize, nspecies: usize },

    #[error("Compute backend error: {0}")]
    Compute(#[from] ComputeError),
}

/// Smearing shape of one species, or an explicit cross-kernel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum KernelShape {
    /// Unit-integral Gaussian with variance `a²`.
    Gaussian {
        #[serde(alias = "width")]
        variance: f64,
    },
    /// Smoothed step `½ erfc((r − R)/ξ)`, normalised to unit integral.
    Erfc { radius: f64, smoothing: f64 },
}

impl KernelShape {
    pub fn validate(&self, context: &str) -> Result<(), KernelError> {
        let bad = |message: String| KernelError::InvalidParameters {
            context: context.to_string(),
            message,
        };
        match *self {
            KernelShape::Gaussian { variance } => {
                if !(variance.is_finite() && variance > 0.0) {
                    return Err(bad(format!("gaussian variance must be positive, got {}", variance)));
                }
            }
            KernelShape::Erfc { radius, smoothing } => {
                if !(radius.is_finite() && radius >= 0.0) {
                    return Err(bad(format!("erfc radius must be non-negative, got {}", radius)));
                }
                if !(smoothing.is_finite() && smoothing > 0.0) {
                    return Err(bad(format!("erfc smoothing must be positive, got {}", smoothing)));
                }
            }
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        match self {
            KernelShape::Gaussian { variance } => format!("gaussian(variance={})", variance),
            KernelShape::Erfc { radius, smoothing } => {
                format!("erfc(radius={}, smoothing={})", radius, smoothing)
            }
        }
    }
}

/// How cross-kernels are obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixingMode {
    /// Convolve the two species shapes.
    #[default]
    Convolution,
    /// Use explicitly configured cross-kernels.
    Define,
}

/// Symmetric species × species interaction strengths, 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChiMatrix {
    nspecies: usize,
    values: Vec<f64>,
}

impl ChiMatrix {
    /// All-zero matrix for `nspecies` species.
    pub fn new(nspecies: usize) -> Self {
        Self {
            nspecies,
            values: vec![0.0; nspecies * nspecies],
        }
    }

    /// Build from full rows; the matrix must be square and symmetric.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, KernelError> {
        let n = rows.len();
        let mut chi = Self::new(n);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n {
                return Err(KernelError::InvalidParameters {
                    context: "chi matrix".into(),
                    message: format!("row {} has {} entries, expected {}", i + 1, row.len(), n),
                });
            }
            for (j, &v) in row.iter().enumerate() {
                chi.values[i * n + j] = v;
            }
        }
        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = (chi.values[i * n + j], chi.values[j * n + i]);
                if (a - b).abs() > 1e-12 * a.abs().max(b.abs()).max(1.0) {
                    return Err(KernelError::InvalidParameters {
                        context: "chi matrix".into(),
                        message: format!("not symmetric: chi[{}][{}]={} but chi[{}][{}]={}", i + 1, j + 1, a, j + 1, i + 1, b),
                    });
                }
            }
        }
        Ok(chi)
    }

    pub fn nspecies(&self) -> usize {
        self.nspecies
    }

    /// Set `chi_ij` and `chi_ji`.
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        let n = self.nspecies;
        self.values[(i - 1) * n + (j - 1)] = value;
        self.values[(j - 1) * n + (i - 1)] = value;
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[(i - 1) * self.nspecies + (j - 1)]
    }
}

/// Explicit cross-kernel for one unordered pair (define mode).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossKernel {
    pub pair: (usize, usize),
    pub shape: KernelShape,
}

/// Species shapes, interaction strengths and the mixing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionConfig {
    /// Shape of species `s` at index `s - 1`; `None` is a point species.
    pub shapes: Vec<Option<KernelShape>>,
    pub chi: ChiMatrix,
    #[serde(default)]
    pub mixing: MixingMode,
    #[serde(default)]
    pub cross: Vec<CrossKernel>,
}

impl InteractionConfig {
    pub fn nspecies(&self) -> usize {
        self.shapes.len()
    }

    pub fn shape(&self, species: usize) -> Result<Option<KernelShape>, KernelError> {
        if species == 0 || species > self.nspecies() {
            return Err(KernelError::UnknownSpecies {
                species,
                nspecies: self.nspecies(),
            });
        }
        Ok(self.shapes[species - 1])
    }

    /// Explicit cross-kernel for `(i, j)` in either order.
    pub fn cross_kernel(&self, i: usize, j: usize) -> Option<KernelShape> {
        self.cross
            .iter()
            .find(|c| c.pair == (i, j) || c.pair == (j, i))
            .map(|c| c.shape)
    }

    /// Check shapes, species ids and the chi matrix dimensions.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.chi.nspecies() != self.nspecies() {
            return Err(KernelError::InvalidParameters {
                context: "chi matrix".into(),
                message: format!(
                    "{} species have shapes but chi is {}x{}",
                    self.nspecies(),
                    self.chi.nspecies(),
                    self.chi.nspecies()
                ),
            });
        }
        for (s, shape) in self.shapes.iter().enumerate() {
            if let Some(shape) = shape {
                shape.validate(&format!("species {}", s + 1))?;
            }
        }
        for (n, c) in self.cross.iter().enumerate() {
            let (i, j) = c.pair;
            for s in [i, j] {
                self.shape(s)?;
            }
            c.shape.validate(&format!("cross-kernel ({}, {})", i, j))?;
            let key = (i.min(j), i.max(j));
            let repeated = self.cross[..n]
                .iter()
                .any(|d| (d.pair.0.min(d.pair.1), d.pair.0.max(d.pair.1)) == key);
            if self.mixing == MixingMode::Convolution || repeated {
                return Err(KernelError::Ambiguous(i, j));
            }
        }
        Ok(())
    }
}

/// All representations of one pair kernel on the local pencil.
#[derive(Debug, Clone)]
pub struct InteractionKernel {
    /// Unordered pair, `i <= j`.
    pub pair: (usize, usize),
    pub recipe: KernelRecipe,
    /// Real-space samples at minimum-image displacements.
    pub real: Vec<f64>,
    pub kspace: Vec<Complex64>,
    /// `i k_a û` for a = x, y, z.
    pub gradient: [Vec<Complex64>; 3],
    /// Virial kernels in xx, yy, zz, xy, xz, yz order.
    pub virial: [Vec<Complex64>; 6],
}

/// Kernels of every interacting pair, built once per box geometry.
#[derive(Debug, Clone)]
pub struct KernelLibrary {
    pencil: IndexBox,
    kernels: Vec<InteractionKernel>,
}

impl KernelLibrary {
    /// Build kernels for `pairs` (unordered, `i <= j`) on this rank's pencil.
    pub fn build(
        config: &InteractionConfig,
        pairs: &[(usize, usize)],
        topology: &GridTopology,
        fft: &mut dyn TransformService,
        comm: &dyn Communicator,
    ) -> Result<Self, KernelError> {
        config.validate()?;
        let grid = SpectralGrid::new(topology, fft.pencil_box());

        let mut kernels = Vec::with_capacity(pairs.len());
        for &(i, j) in pairs {
            let recipe = mixing::resolve(config, i, j)?;
            if topology.rank == 0 {
                log::info!("Kernel ({}, {}): {}", i, j, recipe.describe());
            }
            kernels.push(build_kernel((i, j), recipe, &grid, fft, comm)?);
        }
        Ok(Self {
            pencil: grid.pencil,
            kernels,
        })
    }

    pub fn pencil(&self) -> IndexBox {
        self.pencil
    }

    pub fn kernels(&self) -> &[InteractionKernel] {
        &self.kernels
    }

    /// Kernel of the unordered pair `(i, j)`.
    pub fn get(&self, i: usize, j: usize) -> Option<&InteractionKernel> {
        let key = (i.min(j), i.max(j));
        self.kernels.iter().find(|k| k.pair == key)
    }
}

/// Build every representation of one pair kernel.
pub fn build_kernel(
    pair: (usize, usize),
    recipe: KernelRecipe,
    grid: &SpectralGrid,
    fft: &mut dyn TransformService,
    comm: &dyn Communicator,
) -> Result<InteractionKernel, KernelError> {
    let kspace = match recipe {
        KernelRecipe::Gaussian { variance } => return Ok(analytic_gaussian(pair, variance, grid)),
        KernelRecipe::Shape(shape) => grid.shape_spectrum(&shape, fft, comm)?,
        KernelRecipe::Convolved(a, b) => {
            let ua = grid.shape_spectrum(&a, fft, comm)?;
            let ub = grid.shape_spectrum(&b, fft, comm)?;
            ua.iter().zip(&ub).map(|(x, y)| x * y).collect::<Vec<_>>()
        }
    };
    let real = grid.inverse(&kspace, fft, comm)?;
    let gradient = [0, 1, 2].map(|a| grid.gradient(&kspace, a));

    // -r_a ∂_b u in real space, then back to k-space.
    let mut slopes = Vec::with_capacity(3);
    for g in &gradient {
        slopes.push(grid.inverse(g, fft, comm)?);
    }
    let mut virial: [Vec<Complex64>; 6] = Default::default();
    for (c, &(a, b)) in VIRIAL_COMPONENTS.iter().enumerate() {
        let samples = grid
            .rvec
            .iter()
            .zip(&slopes[b])
            .map(|(r, g)| -r[a] * g)
            .collect::<Vec<f64>>();
        virial[c] = grid.forward(samples, fft, comm)?;
    }

    Ok(InteractionKernel {
        pair,
        recipe,
        real,
        kspace,
        gradient,
        virial,
    })
}

fn analytic_gaussian(pair: (usize, usize), variance: f64, grid: &SpectralGrid) -> InteractionKernel {
    let zero = Complex64::new(0.0, 0.0);
    let kspace: Vec<Complex64> = grid
        .kvec
        .iter()
        .map(|k| Complex64::new(gaussian_spectrum(k2(k), variance), 0.0))
        .collect();
    let real = grid
        .rvec
        .iter()
        .map(|r| gaussian_profile(k2(r), variance))
        .collect::<Vec<f64>>();
    let gradient = [0, 1, 2].map(|a| grid.gradient(&kspace, a));
    let virial = VIRIAL_COMPONENTS.map(|(a, b)| {
        grid.kvec
            .iter()
            .zip(&grid.nyquist)
            .map(|(k, ny)| {
                if ny[a] || ny[b] {
                    zero
                } else {
                    Complex64::new(gaussian_virial(*k, a, b, variance), 0.0)
                }
            })
            .collect::<Vec<_>>()
    });
    InteractionKernel {
        pair,
        recipe: KernelRecipe::Gaussian { variance },
        real,
        kspace,
        gradient,
        virial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chi_matrix_symmetry() {
        let mut chi = ChiMatrix::new(3);
        chi.set(1, 3, 2.5);
        assert_eq!(chi.get(3, 1), 2.5);
        assert_eq!(chi.get(1, 1), 0.0);
        assert!(ChiMatrix::from_rows(&[vec![0.0, 1.0], vec![1.0, 0.0]]).is_ok());
        assert!(ChiMatrix::from_rows(&[vec![0.0, 1.0], vec![2.0, 0.0]]).is_err());
        assert!(ChiMatrix::from_rows(&[vec![0.0, 1.0], vec![1.0]]).is_err());
    }

    #[test]
    fn test_shape_validation() {
        assert!(KernelShape::Gaussian { variance: 0.0 }.validate("s").is_err());
        assert!(KernelShape::Erfc { radius: 1.0, smoothing: 0.0 }.validate("s").is_err());
        assert!(KernelShape::Erfc { radius: 0.0, smoothing: 0.1 }.validate("s").is_ok());
    }

    #[test]
    fn test_shape_serde_accepts_width_alias() {
        let s: KernelShape = serde_json::from_str(r#"{"kind":"gaussian","width":0.75}"#).unwrap();
        assert_eq!(s, KernelShape::Gaussian { variance: 0.75 });
        let e: KernelShape = serde_json::from_str(r#"{"kind":"erfc","radius":1.0,"smoothing":0.1}"#).unwrap();
        assert!(matches!(e, KernelShape::Erfc { .. }));
    }

    #[test]
    fn test_config_validation() {
        let config = InteractionConfig {
            shapes: vec![Some(KernelShape::Gaussian { variance: 1.0 }), None],
            chi: ChiMatrix::new(3),
            mixing: MixingMode::Convolution,
            cross: Vec::new(),
        };
        assert!(config.validate().is_err());
        let config = InteractionConfig {
            chi: ChiMatrix::new(2),
            cross: vec![CrossKernel {
                pair: (1, 5),
                shape: KernelShape::Gaussian { variance: 1.0 },
            }],
            ..config
        };
        assert!(matches!(
            config.validate(),
            Err(KernelError::UnknownSpecies { species: 5, nspecies: 2 })
        ));
    }

    #[test]
    fn test_conflicting_cross_kernels_rejected() {
        let gaussian = |variance| KernelShape::Gaussian { variance };
        let mut config = InteractionConfig {
            shapes: vec![None, None],
            chi: ChiMatrix::new(2),
            mixing: MixingMode::Define,
            cross: vec![
                CrossKernel {
                    pair: (1, 2),
                    shape: gaussian(1.0),
                },
                CrossKernel {
                    pair: (1, 1),
                    shape: gaussian(2.0),
                },
            ],
        };
        assert!(config.validate().is_ok());

        // The same unordered pair twice, even with the order swapped.
        config.cross.push(CrossKernel {
            pair: (2, 1),
            shape: gaussian(4.0),
        });
        assert!(matches!(config.validate(), Err(KernelError::Ambiguous(2, 1))));

        // Under mixing any explicit entry is rejected, interacting or not.
        config.cross.truncate(2);
        config.mixing = MixingMode::Convolution;
        config.shapes = vec![Some(gaussian(1.0)); 2];
        assert!(matches!(config.validate(), Err(KernelError::Ambiguous(1, 2))));
    }
}
