//! Resolution of per-pair kernel recipes from the interaction configuration.

use super::{InteractionConfig, KernelError, KernelShape, MixingMode};

/// How the cross-kernel of one species pair is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelRecipe {
    /// Closed-form Gaussian of total variance `variance`.
    Gaussian { variance: f64 },
    /// A single non-Gaussian shape, transformed numerically.
    Shape(KernelShape),
    /// Point-wise product of two shape spectra.
    Convolved(KernelShape, KernelShape),
}

impl KernelRecipe {
    /// Whether gradient and virial kernels have a closed form.
    pub fn is_analytic(&self) -> bool {
        matches!(self, KernelRecipe::Gaussian { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            KernelRecipe::Gaussian { variance } => format!("analytic gaussian (variance {})", variance),
            KernelRecipe::Shape(shape) => format!("numeric {}", shape.describe()),
            KernelRecipe::Convolved(a, b) => {
                format!("numeric convolution of {} and {}", a.describe(), b.describe())
            }
        }
    }
}

fn single(shape: KernelShape) -> KernelRecipe {
    match shape {
        KernelShape::Gaussian { variance } => KernelRecipe::Gaussian { variance },
        other => KernelRecipe::Shape(other),
    }
}

/// Choose the recipe for the unordered pair `(i, j)`.
pub fn resolve(config: &InteractionConfig, i: usize, j: usize) -> Result<KernelRecipe, KernelError> {
    let explicit = config.cross_kernel(i, j);
    match config.mixing {
        MixingMode::Define => explicit
            .map(single)
            .ok_or(KernelError::MissingCrossKernel(i, j)),
        MixingMode::Convolution => {
            if explicit.is_some() {
                return Err(KernelError::Ambiguous(i, j));
            }
            match (config.shape(i)?, config.shape(j)?) {
                (None, None) => Err(KernelError::Undefined(i, j)),
                (Some(s), None) | (None, Some(s)) => Ok(single(s)),
                (
                    Some(KernelShape::Gaussian { variance: a }),
                    Some(KernelShape::Gaussian { variance: b }),
                ) => Ok(KernelRecipe::Gaussian { variance: a + b }),
                (Some(a), Some(b)) => Ok(KernelRecipe::Convolved(a, b)),
            }
        }
    }
}
