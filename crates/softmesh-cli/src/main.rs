//! SoftMesh command-line interface.
//!
//! Evaluate mesh forces along a trajectory from a TOML configuration file:
//! ```sh
//! softmesh run job.toml --ranks 4
//! softmesh validate job.toml
//! softmesh kernels job.toml
//! ```

mod config;
mod runner;
mod trajectory;

use anyhow::Context;
use clap::{Parser, Subcommand};
use softmesh_core::MeshSolver;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "softmesh")]
#[command(about = "SoftMesh: spectral particle-mesh solver for soft density interactions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every frame of the configured trajectory.
    Run {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Number of in-process ranks (overrides config file setting).
        #[arg(long)]
        ranks: Option<usize>,
    },
    /// Validate a configuration file and build the mesh without evaluating.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// List the kernel built for every interacting species pair.
    Kernels {
        /// Path to the job configuration file.
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, output, ranks } => {
            println!("SoftMesh Particle-Mesh Solver");
            println!("=============================");
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());

            let traj_path = job.trajectory_path(&config);
            let frames = trajectory::read_trajectory(&traj_path)
                .with_context(|| format!("reading trajectory {}", traj_path.display()))?;
            println!("Trajectory: {} ({} frames)", traj_path.display(), frames.len());

            let ranks = ranks.unwrap_or(job.system.ranks);
            let result = runner::run_job(&job, &frames, ranks)?;

            // Determine output directory
            let out_dir = output.unwrap_or_else(|| PathBuf::from(&job.output.directory));

            if job.output.save_energy {
                runner::write_energy_csv(&result, &out_dir.join("energy.csv"), &job)?;
            }
            if job.output.save_json {
                runner::write_energy_json(&result.frames, &out_dir.join("energy.json"))?;
            }
            if job.output.save_forces {
                if let Some(last) = frames.last() {
                    runner::write_forces_csv(&result, last, &out_dir.join("forces.csv"))?;
                }
            }
            runner::write_grids(&result.grids, &out_dir.join("grids"))?;

            println!("Run complete.");
            Ok(())
        }
        Commands::Validate { config } => {
            let job = config::load_config(&config)?;
            let solver = runner::build_serial(&job)?;
            let topo = solver.topology();
            println!("Configuration is valid: {}", config.display());
            println!(
                "  {}: mesh {}x{}x{}, stencil order {}, {} interacting pair(s)",
                solver.method_name(),
                topo.dims[0],
                topo.dims[1],
                topo.dims[2],
                topo.order,
                solver.context().weights.len()
            );
            Ok(())
        }
        Commands::Kernels { config } => {
            let job = config::load_config(&config)?;
            let solver = runner::build_serial(&job)?;
            println!("Interaction kernels:");
            println!();
            for pw in &solver.context().weights {
                let recipe = solver
                    .library()
                    .get(pw.i, pw.j)
                    .map_or_else(|| "missing".to_string(), |k| k.recipe.describe());
                println!(
                    "  {:>8} - {:<8} weight {:>10.4}  {}",
                    job.species_name(pw.i),
                    job.species_name(pw.j),
                    pw.weight,
                    recipe
                );
            }
            Ok(())
        }
    }
}
