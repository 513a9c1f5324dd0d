//! Spectral particle-mesh solver.
//!
//! # Step sequence
//!
//! 1. **Assign**: spread particles onto the halo-backed density field.
//! 2. **Reverse exchange**: fold ghost contributions into their owners.
//! 3. **Remap + forward FFT**: move each active species to the pencil layout
//!    and transform it.
//! 4. **Convolve**: multiply by the pair gradient kernels.
//! 5. **Inverse FFT + remap**: bring the force densities back to the bricks.
//! 6. **Forward exchange**: refresh ghost copies of the force fields.
//! 7. **Interpolate**: gather forces at the particles with the stored stencils.
//!
//! Energy and virial, when requested, are contracted on the pencil and
//! reduced over ranks in a single collective.

pub mod assign;
pub mod convolution;
pub mod interpolate;

use std::time::Instant;

use num_complex::Complex64;
use softmesh_compute::{Communicator, PencilFft, TransformService};

use self::assign::assign_density;
use self::convolution::{active_species, pair_weights, ConvolutionEngine, PairWeight};
use self::interpolate::{force_component, interpolate_forces};
use super::{MeshSolver, SolverError};
use crate::kernels::{InteractionConfig, KernelLibrary};
use crate::mesh::{GhostExchange, GridTopology, MeshField, StencilCoefficients};
use crate::types::{ComputeFlags, MeshEnergy, MeshParams, PairEnergy, ParticleStore, SimulationBox};

/// Mesh state tied to one box geometry.
pub struct GridState {
    pub topology: GridTopology,
    pub fft: Box<dyn TransformService>,
    pub exchange: GhostExchange,
    /// Component 0 aggregate, component `s` species `s`.
    pub density: MeshField,
    /// Component `3 (s - 1) + a` is axis `a` of species `s`.
    pub force: MeshField,
    pub coefficients: StencilCoefficients,
    pub engine: ConvolutionEngine,
}

impl GridState {
    pub fn new(
        params: &MeshParams,
        nspecies: usize,
        comm: &dyn Communicator,
        sim_box: &SimulationBox,
    ) -> Result<Self, SolverError> {
        let topology = GridTopology::new(params, sim_box, comm.rank(), comm.size())?;
        let fft = PencilFft::new(topology.dims, topology.rank, &topology.owned_boxes())?;
        let exchange = GhostExchange::new(&topology);
        let brick = *topology.brick();
        let pencil_len = fft.pencil_box().len();
        Ok(Self {
            exchange,
            density: MeshField::new(brick.owned, brick.halo, nspecies + 1),
            force: MeshField::new(brick.owned, brick.halo, 3 * nspecies),
            coefficients: StencilCoefficients::new(topology.order),
            engine: ConvolutionEngine::new(nspecies, pencil_len, topology.cell_volume()),
            fft: Box::new(fft),
            topology,
        })
    }
}

/// Interaction state built at setup and read by every step.
#[derive(Debug, Clone)]
pub struct SolverContext {
    pub library: KernelLibrary,
    pub weights: Vec<PairWeight>,
    /// Indexed by species id; entry 0 is unused.
    pub active: Vec<bool>,
    /// Mesh dimensions the kernels were sampled on.
    pub dims: [usize; 3],
    /// Box lengths the kernels were sampled for.
    pub lengths: [f64; 3],
}

impl SolverContext {
    pub fn new(
        interactions: &InteractionConfig,
        params: &MeshParams,
        grid: &mut GridState,
        comm: &dyn Communicator,
    ) -> Result<Self, SolverError> {
        let weights = pair_weights(interactions, params)?;
        let pairs: Vec<(usize, usize)> = weights.iter().map(|w| (w.i, w.j)).collect();
        let library = KernelLibrary::build(interactions, &pairs, &grid.topology, &mut *grid.fft, comm)?;
        Ok(Self {
            library,
            active: active_species(interactions.nspecies(), &weights),
            weights,
            dims: grid.topology.dims,
            lengths: grid.topology.lengths,
        })
    }

    /// Whether the kernels still match the mesh of `grid`.
    pub fn matches(&self, grid: &GridState) -> bool {
        self.dims == grid.topology.dims
            && self.lengths == grid.topology.lengths
            && self.library.pencil() == grid.fft.pencil_box()
    }
}

/// The spectral particle-mesh solver of one rank.
pub struct SpectralSolver {
    params: MeshParams,
    interactions: InteractionConfig,
    comm: Box<dyn Communicator>,
    grid: GridState,
    context: SolverContext,
}

impl SpectralSolver {
    /// Validate the configuration and build topology and kernels for `sim_box`.
    pub fn new(
        params: MeshParams,
        interactions: InteractionConfig,
        comm: Box<dyn Communicator>,
        sim_box: &SimulationBox,
    ) -> Result<Self, SolverError> {
        interactions.validate()?;
        if interactions.nspecies() == 0 {
            return Err(SolverError::InvalidConfig("at least one species is required".into()));
        }
        let mut grid = GridState::new(&params, interactions.nspecies(), comm.as_ref(), sim_box)?;
        let context = SolverContext::new(&interactions, &params, &mut grid, comm.as_ref())?;
        if context.weights.is_empty() && comm.rank() == 0 {
            log::warn!("No species pair has a non-zero interaction weight; mesh forces will vanish");
        }
        Ok(Self {
            params,
            interactions,
            comm,
            grid,
            context,
        })
    }

    pub fn params(&self) -> &MeshParams {
        &self.params
    }

    pub fn interactions(&self) -> &InteractionConfig {
        &self.interactions
    }

    pub fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    pub fn topology(&self) -> &GridTopology {
        &self.grid.topology
    }

    pub fn context(&self) -> &SolverContext {
        &self.context
    }

    pub fn library(&self) -> &KernelLibrary {
        &self.context.library
    }

    /// Density field of the last evaluation (owned values are complete).
    pub fn density(&self) -> &MeshField {
        &self.grid.density
    }

    /// Force fields of the last evaluation, ghosts included.
    pub fn force_field(&self) -> &MeshField {
        &self.grid.force
    }

    fn species_means(&self, particles: &ParticleStore, volume: f64) -> Result<Vec<f64>, SolverError> {
        let nspecies = self.interactions.nspecies();
        let mut counts = vec![0.0; nspecies + 1];
        for &s in &particles.species {
            if (1..=nspecies).contains(&s) {
                counts[s] += 1.0;
            }
        }
        self.comm.all_reduce_sum(&mut counts)?;
        Ok(counts.into_iter().map(|n| n / volume).collect())
    }

    fn evaluate(
        &mut self,
        particles: &mut ParticleStore,
        sim_box: &SimulationBox,
        flags: ComputeFlags,
    ) -> Result<MeshEnergy, SolverError> {
        let started = Instant::now();
        let nspecies = self.interactions.nspecies();
        let means = if self.params.subtract_rho0 {
            self.species_means(particles, sim_box.volume())?
        } else {
            vec![0.0; nspecies + 1]
        };

        let comm = self.comm.as_ref();
        let ctx = &self.context;
        let GridState {
            topology,
            fft,
            exchange,
            density,
            force,
            coefficients,
            engine,
        } = &mut self.grid;

        density.fill(0.0);
        // Agree on failure before the first exchange so no rank is left
        // waiting in a collective.
        let assigned = assign_density(particles, topology, coefficients, &ctx.active, density);
        let mut failures = [if assigned.is_err() { 1.0 } else { 0.0 }];
        comm.all_reduce_sum(&mut failures)?;
        let stencils = assigned?;
        if failures[0] > 0.0 {
            return Err(SolverError::PeerFailure(failures[0] as usize));
        }
        exchange.reverse(comm, density)?;

        for s in 1..=nspecies {
            if !ctx.active[s] {
                continue;
            }
            let brick: Vec<Complex64> = density
                .owned_values(s)
                .into_iter()
                .map(|v| Complex64::new(v, 0.0))
                .collect();
            let pencil = fft.brick_to_pencil(comm, &brick)?;
            engine.load_density(s, pencil.into_iter().map(|z| z.re - means[s]).collect());
        }
        engine.transform(&ctx.active, &mut **fft, comm)?;
        engine.accumulate_forces(&ctx.library, &ctx.weights)?;

        force.fill(0.0);
        for s in 1..=nspecies {
            if !ctx.active[s] {
                continue;
            }
            for a in 0..3 {
                let pencil = engine.force_density(s, a, &mut **fft, comm)?;
                let brick = fft.pencil_to_brick(comm, &pencil)?;
                let values: Vec<f64> = brick.iter().map(|z| z.re).collect();
                force.set_owned_values(force_component(s, a), &values);
            }
        }
        exchange.forward(comm, force)?;
        interpolate_forces(particles, &stencils, force);

        let mut result = MeshEnergy::default();
        if flags.energy || flags.virial {
            let mut reduced = Vec::new();
            if flags.energy {
                reduced.extend(engine.pair_energies(&ctx.library, &ctx.weights, &mut **fft, comm)?);
            }
            if flags.virial {
                reduced.extend(engine.virial(&ctx.library, &ctx.weights, &mut **fft, comm)?);
            }
            comm.all_reduce_sum(&mut reduced)?;

            let mut values = reduced.into_iter();
            if flags.energy {
                for pw in &ctx.weights {
                    let energy = values.next().unwrap_or(0.0);
                    result.energy += energy;
                    result.pair_energies.push(PairEnergy {
                        species: (pw.i, pw.j),
                        energy,
                    });
                }
            }
            if flags.virial {
                for v in result.virial.iter_mut() {
                    *v = values.next().unwrap_or(0.0);
                }
            }
        }

        log::debug!(
            "rank {}: mesh step with {} particles took {:.3} ms",
            topology.rank,
            particles.len(),
            started.elapsed().as_secs_f64() * 1e3
        );
        Ok(result)
    }
}

impl MeshSolver for SpectralSolver {
    fn setup(&mut self, _sim_box: &SimulationBox) -> Result<(), SolverError> {
        self.context = SolverContext::new(&self.interactions, &self.params, &mut self.grid, self.comm.as_ref())?;
        Ok(())
    }

    fn setup_grid(&mut self, sim_box: &SimulationBox) -> Result<(), SolverError> {
        self.grid = GridState::new(&self.params, self.interactions.nspecies(), self.comm.as_ref(), sim_box)?;
        if !self.context.matches(&self.grid) {
            self.setup(sim_box)?;
        }
        Ok(())
    }

    fn compute(
        &mut self,
        particles: &mut ParticleStore,
        sim_box: &SimulationBox,
        flags: ComputeFlags,
    ) -> Result<MeshEnergy, SolverError> {
        if sim_box.lengths != self.context.lengths {
            if self.comm.rank() == 0 {
                log::info!(
                    "Box lengths changed {:?} -> {:?}; rebuilding mesh and kernels",
                    self.context.lengths,
                    sim_box.lengths
                );
            }
            self.setup_grid(sim_box)?;
        } else if sim_box.origin != self.grid.topology.origin || sim_box.lengths != self.grid.topology.lengths {
            self.setup_grid(sim_box)?;
        }
        self.evaluate(particles, sim_box, flags)
    }

    fn method_name(&self) -> &str {
        "Spectral particle-mesh"
    }
}
