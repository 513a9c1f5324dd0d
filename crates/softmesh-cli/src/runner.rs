//! Job runner: ties together the trajectory, the communicator and the solver.

use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;

use softmesh_compute::{Communicator, LocalWorld, SerialComm};
use softmesh_core::average::GridAverager;
use softmesh_core::mesh::GridTopology;
use softmesh_core::snapshot::{write_grid_table, GridTable};
use softmesh_core::types::{ComputeFlags, MeshEnergy, ParticleStore};
use softmesh_core::{MeshSolver, SpectralSolver};

use crate::config::JobConfig;
use crate::trajectory::Frame;

/// Global results of one trajectory frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameResult {
    pub step: u64,
    pub particles: usize,
    #[serde(flatten)]
    pub energy: MeshEnergy,
}

/// A density table captured on one rank.
#[derive(Debug, Clone)]
pub struct GridOutput {
    pub kind: GridKind,
    pub step: u64,
    pub samples: u64,
    pub topology: GridTopology,
    pub table: GridTable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridKind {
    Density,
    Average,
}

/// Results of a full run, gathered from all ranks.
pub struct RunOutput {
    pub frames: Vec<FrameResult>,
    /// Forces of the last frame, in trajectory order.
    pub forces: Vec<[f64; 3]>,
    pub species: Vec<usize>,
    pub grids: Vec<GridOutput>,
    pub dims: [usize; 3],
    pub order: usize,
    pub ranks: usize,
}

struct RankOutput {
    frames: Vec<FrameResult>,
    ids: Vec<usize>,
    forces: Vec<[f64; 3]>,
    grids: Vec<GridOutput>,
    dims: [usize; 3],
    order: usize,
}

/// Build a single-rank solver for the job's box (used by `validate` and `kernels`).
pub fn build_serial(job: &JobConfig) -> Result<SpectralSolver> {
    let solver = SpectralSolver::new(
        job.mesh.clone(),
        job.interaction_config()?,
        Box::new(SerialComm::new()),
        &job.sim_box(),
    )?;
    Ok(solver)
}

/// Map every frame's labels to species ids.
pub fn species_ids(job: &JobConfig, frames: &[Frame]) -> Result<Vec<Vec<usize>>> {
    frames
        .iter()
        .enumerate()
        .map(|(f, frame)| {
            frame
                .labels
                .iter()
                .enumerate()
                .map(|(i, label)| {
                    job.species_id(label)
                        .ok_or_else(|| anyhow!("frame {}, particle {}: unknown species '{}'", f, i, label))
                })
                .collect()
        })
        .collect()
}

/// Evaluate every frame on `ranks` in-process ranks.
pub fn run_job(job: &JobConfig, frames: &[Frame], ranks: usize) -> Result<RunOutput> {
    if frames.is_empty() {
        bail!("trajectory contains no frames");
    }
    if ranks == 0 {
        bail!("at least one rank is required");
    }
    let species = species_ids(job, frames)?;

    let per_rank: Vec<RankOutput> = if ranks == 1 {
        vec![run_rank(Box::new(SerialComm::new()), job, frames, &species)?]
    } else {
        let species = &species;
        let comms = LocalWorld::new(ranks);
        std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| s.spawn(move || run_rank(Box::new(comm), job, frames, species)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().map_err(|_| anyhow!("rank thread panicked")).and_then(|r| r))
                .collect::<Result<Vec<_>>>()
        })?
    };

    let last = frames.len() - 1;
    let mut forces = vec![[0.0; 3]; frames[last].len()];
    let mut grids = Vec::new();
    for rank in &per_rank {
        for (&i, f) in rank.ids.iter().zip(&rank.forces) {
            forces[i] = *f;
        }
    }
    let (dims, order) = (per_rank[0].dims, per_rank[0].order);
    let mut per_rank = per_rank.into_iter();
    let frames_out = per_rank.next().map(|r| {
        grids.extend(r.grids);
        r.frames
    });
    for r in per_rank {
        grids.extend(r.grids);
    }

    Ok(RunOutput {
        frames: frames_out.unwrap_or_default(),
        forces,
        species: species[last].clone(),
        grids,
        dims,
        order,
        ranks,
    })
}

fn run_rank(
    comm: Box<dyn Communicator>,
    job: &JobConfig,
    frames: &[Frame],
    species: &[Vec<usize>],
) -> Result<RankOutput> {
    let rank = comm.rank();
    let sim_box = job.sim_box();
    let mut solver = SpectralSolver::new(job.mesh.clone(), job.interaction_config()?, comm, &sim_box)
        .with_context(|| format!("rank {}: solver setup failed", rank))?;
    let mut averager = match job.output.average {
        Some(schedule) => Some(GridAverager::new(schedule, solver.density())?),
        None => None,
    };
    let flags = ComputeFlags {
        energy: true,
        virial: job.output.virial,
    };

    let mut results = Vec::with_capacity(frames.len());
    let mut grids = Vec::new();
    let mut ids = Vec::new();
    let mut particles = ParticleStore::new();
    for (index, (frame, kinds)) in frames.iter().zip(species).enumerate() {
        let step = index as u64;
        particles = ParticleStore::with_capacity(frame.len() / solver.topology().nprocs() + 1);
        ids.clear();
        for (i, (&position, &s)) in frame.positions.iter().zip(kinds).enumerate() {
            let position = sim_box.wrap(position);
            if solver.topology().owner_of(position) == rank {
                particles.push(position, s);
                ids.push(i);
            }
        }

        let energy = solver
            .compute(&mut particles, &sim_box, flags)
            .with_context(|| format!("rank {}: step {} failed", rank, step))?;
        if rank == 0 {
            log::info!(
                "step {} ({}): {} particles, energy {:.6e}",
                step,
                frame.comment,
                frame.len(),
                energy.energy
            );
        }
        results.push(FrameResult {
            step,
            particles: frame.len(),
            energy,
        });

        if job.output.snapshot_every.is_some_and(|every| step % every == 0) {
            grids.push(GridOutput {
                kind: GridKind::Density,
                step,
                samples: 1,
                topology: solver.topology().clone(),
                table: GridTable::species_densities(solver.density()),
            });
        }
        if let Some(averager) = averager.as_mut() {
            if let Some(avg) = averager.sample(step, solver.density())? {
                grids.push(GridOutput {
                    kind: GridKind::Average,
                    step: avg.step,
                    samples: avg.samples,
                    topology: solver.topology().clone(),
                    table: avg.table,
                });
            }
        }
    }

    Ok(RankOutput {
        frames: results,
        ids,
        forces: particles.forces,
        grids,
        dims: solver.topology().dims,
        order: solver.topology().order,
    })
}

/// Write per-frame energies and virials to a CSV file with a metadata header.
pub fn write_energy_csv(output: &RunOutput, path: &Path, job: &JobConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::File::create(path)?;

    // Metadata header
    writeln!(file, "# SoftMesh — Mesh Energies")?;
    writeln!(file, "# Version: {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(
        file,
        "# mesh: {}x{}x{}, order {}, ranks {}",
        output.dims[0], output.dims[1], output.dims[2], output.order, output.ranks
    )?;
    for (i, s) in job.species.iter().enumerate() {
        let shape = s.shape.map_or_else(|| "point".to_string(), |sh| sh.describe());
        writeln!(file, "# species {} '{}': {}", i + 1, s.name, shape)?;
    }
    writeln!(file, "#")?;

    let pairs: Vec<(usize, usize)> = output
        .frames
        .first()
        .map(|f| f.energy.pair_energies.iter().map(|p| p.species).collect())
        .unwrap_or_default();
    write!(file, "step,particles,energy,virial_xx,virial_yy,virial_zz,virial_xy,virial_xz,virial_yz")?;
    for (i, j) in &pairs {
        write!(file, ",energy_{}_{}", job.species_name(*i), job.species_name(*j))?;
    }
    writeln!(file)?;

    for frame in &output.frames {
        write!(file, "{},{},{:.6e}", frame.step, frame.particles, frame.energy.energy)?;
        for v in &frame.energy.virial {
            write!(file, ",{:.6e}", v)?;
        }
        for pair in &frame.energy.pair_energies {
            write!(file, ",{:.6e}", pair.energy)?;
        }
        writeln!(file)?;
    }

    println!("Energies written to: {}", path.display());
    Ok(())
}

/// Write per-frame energies to a JSON file.
pub fn write_energy_json(frames: &[FrameResult], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(frames).map_err(|e| anyhow!("JSON serialisation error: {}", e))?;
    std::fs::write(path, json)?;

    println!("Energies (JSON) written to: {}", path.display());
    Ok(())
}

/// Write the forces of the last frame to a CSV file.
pub fn write_forces_csv(output: &RunOutput, frame: &Frame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let step = output.frames.last().map_or(0, |f| f.step);
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "# SoftMesh — Mesh Forces")?;
    writeln!(file, "# step: {}", step)?;
    writeln!(file, "# particles: {}", frame.len())?;
    writeln!(file, "#")?;
    writeln!(file, "index,species,x,y,z,fx,fy,fz")?;

    for (i, ((pos, f), s)) in frame
        .positions
        .iter()
        .zip(&output.forces)
        .zip(&output.species)
        .enumerate()
    {
        writeln!(
            file,
            "{},{},{:.4},{:.4},{:.4},{:.6e},{:.6e},{:.6e}",
            i, s, pos[0], pos[1], pos[2], f[0], f[1], f[2]
        )?;
    }

    println!("Forces written to: {}", path.display());
    Ok(())
}

/// Write every captured density table, one file per rank and step.
pub fn write_grids(grids: &[GridOutput], dir: &Path) -> Result<()> {
    if grids.is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;
    for grid in grids {
        let (prefix, title) = match grid.kind {
            GridKind::Density => ("density", format!("Species Densities (step {})", grid.step)),
            GridKind::Average => (
                "average",
                format!("Averaged Densities (step {}, {} samples)", grid.step, grid.samples),
            ),
        };
        let path = dir.join(format!("{}_step{:06}_rank{}.csv", prefix, grid.step, grid.topology.rank));
        let mut file = std::io::BufWriter::new(std::fs::File::create(&path)?);
        write_grid_table(&mut file, &grid.table, &grid.topology, &title)
            .with_context(|| format!("writing {}", path.display()))?;
        file.flush()?;
    }
    println!("{} density grid(s) written to: {}", grids.len(), dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::trajectory::parse_trajectory;
    use approx::assert_abs_diff_eq;

    const JOB: &str = r#"
[system]
box = [10.0, 10.0, 10.0]
trajectory = "frames.xyz"

[[species]]
name = "A"
shape = { kind = "gaussian", variance = 1.0 }

[[species]]
name = "B"
shape = { kind = "gaussian", variance = 1.0 }

[interactions]
chi = [[0.0, 1.0], [1.0, 0.0]]

[mesh]
mesh = { dims = [8, 8, 8] }

[output]
snapshot_every = 2
average = { every = 1, repeat = 2, freq = 2 }
"#;

    const FRAMES: &str = "4\nframe 0\nA 4.0 4.0 5.0\nA 6.0 6.0 5.0\nB 4.0 6.0 5.0\nB 6.0 4.0 5.0\n\
                          4\nframe 1\nA 3.5 4.0 5.0\nA 6.5 6.0 5.0\nB 4.0 6.5 5.0\nB 6.0 3.5 5.0\n\
                          4\nframe 2\nA 3.0 4.0 5.0\nA 7.0 6.0 15.0\nB 4.0 7.0 5.0\nB 6.0 3.0 -5.0\n";

    #[test]
    fn test_serial_and_threaded_runs_agree() {
        let job = parse_config(JOB).unwrap();
        let frames = parse_trajectory(FRAMES).unwrap();

        let serial = run_job(&job, &frames, 1).unwrap();
        let threaded = run_job(&job, &frames, 2).unwrap();
        assert_eq!(serial.frames.len(), 3);
        assert_eq!(serial.species, vec![1, 1, 2, 2]);
        for (a, b) in serial.frames.iter().zip(&threaded.frames) {
            assert_eq!(a.step, b.step);
            assert_abs_diff_eq!(a.energy.energy, b.energy.energy, epsilon = 1e-10 * a.energy.energy.abs());
        }
        for (f, g) in serial.forces.iter().zip(&threaded.forces) {
            for a in 0..3 {
                assert_abs_diff_eq!(f[a], g[a], epsilon = 1e-10);
            }
        }

        // Snapshots on steps 0 and 2, one average at step 2, per rank.
        let count = |out: &RunOutput, kind| out.grids.iter().filter(|g| g.kind == kind).count();
        assert_eq!(count(&serial, GridKind::Density), 2);
        assert_eq!(count(&serial, GridKind::Average), 1);
        assert_eq!(count(&threaded, GridKind::Density), 4);
        assert_eq!(count(&threaded, GridKind::Average), 2);
    }

    #[test]
    fn test_unknown_label_is_rejected() {
        let job = parse_config(JOB).unwrap();
        let frames = parse_trajectory("1\nx\nC 1.0 1.0 1.0\n").unwrap();
        let err = run_job(&job, &frames, 1).err().unwrap();
        assert!(err.to_string().contains("unknown species 'C'"));
    }

    #[test]
    fn test_written_files() {
        let job = parse_config(JOB).unwrap();
        let frames = parse_trajectory(FRAMES).unwrap();
        let output = run_job(&job, &frames, 1).unwrap();

        let dir = std::env::temp_dir().join(format!("softmesh-runner-{}", std::process::id()));
        write_energy_csv(&output, &dir.join("energy.csv"), &job).unwrap();
        write_energy_json(&output.frames, &dir.join("energy.json")).unwrap();
        write_forces_csv(&output, &frames[2], &dir.join("forces.csv")).unwrap();
        write_grids(&output.grids, &dir.join("grids")).unwrap();

        let energy = std::fs::read_to_string(dir.join("energy.csv")).unwrap();
        let rows: Vec<&str> = energy.lines().filter(|l| !l.starts_with('#')).collect();
        assert!(rows[0].ends_with(",energy_A_B"));
        assert_eq!(rows.len(), 4);

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("energy.json")).unwrap()).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 3);
        assert!(json[0]["energy"].as_f64().unwrap() > 0.0);

        let forces = std::fs::read_to_string(dir.join("forces.csv")).unwrap();
        assert_eq!(forces.lines().filter(|l| !l.starts_with('#')).count(), 5);

        assert!(dir.join("grids").join("average_step000002_rank0.csv").exists());
        assert!(dir.join("grids").join("density_step000000_rank0.csv").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
