//! TOML configuration deserialisation for solver jobs.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use softmesh_core::average::AverageSchedule;
use softmesh_core::kernels::{ChiMatrix, CrossKernel, InteractionConfig, KernelShape, MixingMode};
use softmesh_core::types::{MeshParams, SimulationBox};

/// Top-level job configuration.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    pub system: SystemConfig,
    pub species: Vec<SpeciesConfig>,
    pub interactions: InteractionsConfig,
    #[serde(default)]
    pub mesh: MeshParams,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Simulation cell and particle source.
#[derive(Debug, Deserialize)]
pub struct SystemConfig {
    /// Edge lengths of the periodic box.
    #[serde(rename = "box")]
    pub box_lengths: [f64; 3],
    #[serde(default)]
    pub origin: [f64; 3],
    /// XYZ trajectory, relative to the configuration file.
    pub trajectory: String,
    /// Number of in-process ranks (overridden by `--ranks`).
    #[serde(default = "default_ranks")]
    pub ranks: usize,
}

fn default_ranks() -> usize {
    1
}

/// One particle species. Its name matches the atom labels in the trajectory.
#[derive(Debug, Deserialize)]
pub struct SpeciesConfig {
    pub name: String,
    /// Smearing shape; omit for a point species.
    #[serde(default)]
    pub shape: Option<KernelShape>,
}

/// Interaction strengths and mixing rule.
#[derive(Debug, Deserialize)]
pub struct InteractionsConfig {
    /// Full symmetric chi matrix, rows in species order.
    pub chi: Vec<Vec<f64>>,
    #[serde(default)]
    pub mixing: MixingMode,
    #[serde(default)]
    pub cross: Vec<CrossConfig>,
}

/// Explicit cross-kernel between two named species.
#[derive(Debug, Deserialize)]
pub struct CrossConfig {
    pub pair: [String; 2],
    pub shape: KernelShape,
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output directory (default: "./output").
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// Whether to save per-frame energies as CSV (default: true).
    #[serde(default = "default_true")]
    pub save_energy: bool,
    /// Whether to also save energies as JSON (default: false).
    #[serde(default)]
    pub save_json: bool,
    /// Whether to save the forces of the last frame (default: true).
    #[serde(default = "default_true")]
    pub save_forces: bool,
    /// Whether to compute the virial tensor (default: true).
    #[serde(default = "default_true")]
    pub virial: bool,
    /// Write the species densities every this many frames.
    #[serde(default)]
    pub snapshot_every: Option<u64>,
    /// Time-averaged density grids.
    #[serde(default)]
    pub average: Option<AverageSchedule>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            save_energy: true,
            save_json: false,
            save_forces: true,
            virial: true,
            snapshot_every: None,
            average: None,
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}
fn default_true() -> bool {
    true
}

impl JobConfig {
    pub fn sim_box(&self) -> SimulationBox {
        SimulationBox::new(self.system.origin, self.system.box_lengths)
    }

    /// 1-based id of the species called `name`.
    pub fn species_id(&self, name: &str) -> Option<usize> {
        self.species.iter().position(|s| s.name == name).map(|i| i + 1)
    }

    pub fn species_name(&self, id: usize) -> &str {
        id.checked_sub(1)
            .and_then(|i| self.species.get(i))
            .map_or("?", |s| s.name.as_str())
    }

    /// Trajectory location, resolved against the directory of `config_path`.
    pub fn trajectory_path(&self, config_path: &Path) -> PathBuf {
        let path = PathBuf::from(&self.system.trajectory);
        match config_path.parent() {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        }
    }

    /// Translate the named species and chi rows into solver ids.
    pub fn interaction_config(&self) -> Result<InteractionConfig> {
        let chi = ChiMatrix::from_rows(&self.interactions.chi).context("invalid [interactions] chi")?;
        let mut cross = Vec::with_capacity(self.interactions.cross.len());
        for c in &self.interactions.cross {
            let mut ids = [0; 2];
            for (id, name) in ids.iter_mut().zip(&c.pair) {
                *id = self
                    .species_id(name)
                    .with_context(|| format!("cross-kernel names unknown species '{}'", name))?;
            }
            cross.push(CrossKernel {
                pair: (ids[0], ids[1]),
                shape: c.shape,
            });
        }
        Ok(InteractionConfig {
            shapes: self.species.iter().map(|s| s.shape).collect(),
            chi,
            mixing: self.interactions.mixing,
            cross,
        })
    }

    /// Checks that need no mesh.
    pub fn validate(&self) -> Result<()> {
        if self.species.is_empty() {
            bail!("at least one [[species]] entry is required");
        }
        for (i, s) in self.species.iter().enumerate() {
            if self.species[..i].iter().any(|t| t.name == s.name) {
                bail!("species name '{}' is used twice", s.name);
            }
        }
        if self.system.ranks == 0 {
            bail!("system.ranks must be at least 1");
        }
        if self.output.snapshot_every == Some(0) {
            bail!("output.snapshot_every must be positive");
        }
        if let Some(schedule) = &self.output.average {
            schedule.validate()?;
        }
        self.interaction_config()?.validate()?;
        Ok(())
    }
}

/// Parse a TOML job configuration.
pub fn parse_config(content: &str) -> Result<JobConfig> {
    let config: JobConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load and parse a TOML job configuration file.
pub fn load_config(path: &Path) -> Result<JobConfig> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_config(&content)
}
