//! End-to-end checks of the spectral solver: symmetry, conservation,
//! invariance under translation and agreement between rank counts.

use approx::assert_abs_diff_eq;

use softmesh_compute::{Communicator, LocalWorld, SerialComm};
use softmesh_core::kernels::{ChiMatrix, InteractionConfig, KernelShape, MixingMode};
use softmesh_core::types::{ComputeFlags, MeshEnergy, MeshParams, MeshSpec, ParticleStore, SimulationBox};
use softmesh_core::{MeshSolver, SolverError, SpectralSolver};

const SIDE: f64 = 10.0;

fn params(n: usize) -> MeshParams {
    MeshParams {
        mesh: MeshSpec::Dims([n, n, n]),
        ..MeshParams::default()
    }
}

fn interactions() -> InteractionConfig {
    let mut chi = ChiMatrix::new(2);
    chi.set(1, 2, 1.0);
    InteractionConfig {
        shapes: vec![Some(KernelShape::Gaussian { variance: 1.0 }); 2],
        chi,
        mixing: MixingMode::Convolution,
        cross: Vec::new(),
    }
}

fn serial_solver(n: usize) -> SpectralSolver {
    SpectralSolver::new(params(n), interactions(), Box::new(SerialComm::new()), &SimulationBox::cubic(SIDE)).unwrap()
}

/// Deterministic scatter of `n` particles, species alternating 1, 2.
fn scattered(n: usize) -> ParticleStore {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    let mut particles = ParticleStore::with_capacity(n);
    for i in 0..n {
        let pos = [next() * SIDE, next() * SIDE, next() * SIDE];
        particles.push(pos, 1 + i % 2);
    }
    particles
}

fn max_force(particles: &ParticleStore) -> f64 {
    particles
        .forces
        .iter()
        .flat_map(|f| f.iter())
        .fold(0.0f64, |m, v| m.max(v.abs()))
}

fn shifted(particles: &ParticleStore, delta: [f64; 3], sim_box: &SimulationBox) -> ParticleStore {
    let mut out = particles.clone();
    out.translate(delta);
    for p in &mut out.positions {
        *p = sim_box.wrap(*p);
    }
    out.zero_forces();
    out
}

#[test]
fn test_pair_forces_are_symmetric_and_repulsive() {
    let sim_box = SimulationBox::cubic(SIDE);
    let mut solver = serial_solver(16);
    assert_eq!(solver.method_name(), "Spectral particle-mesh");

    let mut magnitudes = Vec::new();
    for separation in [1.5, 3.0] {
        let mut particles = ParticleStore::new();
        particles.push([4.0, 5.0, 5.0], 1);
        particles.push([4.0 + separation, 5.0, 5.0], 2);
        let energy = solver.compute(&mut particles, &sim_box, ComputeFlags::all()).unwrap();

        let (fa, fb) = (particles.forces[0], particles.forces[1]);
        assert!(fa[0] < 0.0, "species 1 should be pushed away, got {:?}", fa);
        assert_abs_diff_eq!(fa[0], -fb[0], epsilon = 1e-12);
        for a in 1..3 {
            assert_abs_diff_eq!(fa[a], 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(fb[a], 0.0, epsilon = 1e-12);
        }

        assert!(energy.energy > 0.0);
        assert_eq!(energy.pair_energies.len(), 1);
        assert_eq!(energy.pair_energies[0].species, (1, 2));

        // Mirror symmetry in y and z leaves only the diagonal.
        let w = energy.virial;
        assert!(w[0] > 0.0);
        assert!(w[0] > w[1].abs());
        for c in 3..6 {
            assert!(w[c].abs() < 1e-10 * w[0].abs());
        }
        magnitudes.push(fa[0].abs());
    }
    assert!(magnitudes[1] < magnitudes[0]);
}

/// Two particles of each species on the corners of a square, alternating.
fn square(half_side: f64) -> ParticleStore {
    let c = 0.5 * SIDE;
    let mut particles = ParticleStore::new();
    particles.push([c - half_side, c - half_side, c], 1);
    particles.push([c + half_side, c + half_side, c], 1);
    particles.push([c - half_side, c + half_side, c], 2);
    particles.push([c + half_side, c - half_side, c], 2);
    particles
}

#[test]
fn test_two_by_two_square_scenario() {
    let sim_box = SimulationBox::cubic(SIDE);
    let mut solver = serial_solver(8);
    assert_eq!(solver.topology().dims, [8, 8, 8]);

    let mut magnitudes = Vec::new();
    for half_side in [1.0, 2.0] {
        let mut particles = square(half_side);
        let energy = solver.compute(&mut particles, &sim_box, ComputeFlags::all()).unwrap();
        assert!(energy.energy > 0.0 && energy.energy.is_finite());

        let reference = particles.forces[0][0].abs();
        assert!(reference > 0.0);
        for (p, f) in particles.positions.iter().zip(&particles.forces) {
            assert!(f.iter().all(|v| v.is_finite()));
            assert_abs_diff_eq!(f[0].abs(), reference, epsilon = 1e-10 * reference);
            assert_abs_diff_eq!(f[1].abs(), reference, epsilon = 1e-10 * reference);
            assert_abs_diff_eq!(f[2], 0.0, epsilon = 1e-12);
            // Pushed away from the centre.
            let outward = (p[0] - 0.5 * SIDE) * f[0] + (p[1] - 0.5 * SIDE) * f[1];
            assert!(outward > 0.0);
        }
        for total in particles.total_force() {
            assert!(total.abs() < 1e-10 * reference);
        }
        magnitudes.push(reference);
    }
    assert!(magnitudes[1] < magnitudes[0]);
}

#[test]
fn test_total_force_vanishes() {
    let sim_box = SimulationBox::cubic(SIDE);
    let mut solver = serial_solver(8);
    let mut particles = scattered(24);
    solver.compute(&mut particles, &sim_box, ComputeFlags::forces_only()).unwrap();

    let scale = max_force(&particles);
    assert!(scale > 0.0);
    for total in particles.total_force() {
        assert!(total.abs() < 1e-10 * scale);
    }
}

#[test]
fn test_mixed_shapes_conserve_momentum() {
    let sim_box = SimulationBox::cubic(SIDE);
    let mut config = interactions();
    config.shapes[0] = Some(KernelShape::Erfc {
        radius: 1.0,
        smoothing: 0.3,
    });
    config.chi.set(1, 1, 0.5);
    let mut solver = SpectralSolver::new(params(16), config, Box::new(SerialComm::new()), &sim_box).unwrap();
    assert!(!solver.library().get(1, 2).unwrap().recipe.is_analytic());

    let mut particles = scattered(16);
    let energy = solver.compute(&mut particles, &sim_box, ComputeFlags::all()).unwrap();
    assert_eq!(energy.pair_energies.len(), 2);
    assert!(energy.energy.is_finite());

    let scale = max_force(&particles);
    for total in particles.total_force() {
        assert!(total.abs() < 1e-10 * scale);
    }
}

#[test]
fn test_repeated_evaluation_is_identical() {
    let sim_box = SimulationBox::cubic(SIDE);
    let mut solver = serial_solver(8);
    let mut particles = scattered(10);

    let first = solver.compute(&mut particles, &sim_box, ComputeFlags::all()).unwrap();
    let forces = particles.forces.clone();
    particles.zero_forces();
    let second = solver.compute(&mut particles, &sim_box, ComputeFlags::all()).unwrap();

    assert_eq!(first, second);
    assert_eq!(forces, particles.forces);
}

#[test]
fn test_forces_accumulate_into_existing_values() {
    let sim_box = SimulationBox::cubic(SIDE);
    let mut solver = serial_solver(8);
    let mut particles = scattered(6);
    solver.compute(&mut particles, &sim_box, ComputeFlags::forces_only()).unwrap();
    let once = particles.forces.clone();
    solver.compute(&mut particles, &sim_box, ComputeFlags::forces_only()).unwrap();
    for (twice, once) in particles.forces.iter().zip(&once) {
        for a in 0..3 {
            assert_abs_diff_eq!(twice[a], 2.0 * once[a], epsilon = 1e-14);
        }
    }
}

#[test]
fn test_translation_invariance() {
    let sim_box = SimulationBox::cubic(SIDE);
    let mut solver = serial_solver(16);
    let mut reference = scattered(12);
    let e0 = solver.compute(&mut reference, &sim_box, ComputeFlags::all()).unwrap();
    let scale = max_force(&reference);

    // Whole mesh cells: identical up to rounding.
    let h = SIDE / 16.0;
    let mut moved = shifted(&reference, [h, 2.0 * h, -3.0 * h], &sim_box);
    let e1 = solver.compute(&mut moved, &sim_box, ComputeFlags::all()).unwrap();
    assert_abs_diff_eq!(e0.energy, e1.energy, epsilon = 1e-10 * e0.energy.abs());
    for (f, g) in reference.forces.iter().zip(&moved.forces) {
        for a in 0..3 {
            assert_abs_diff_eq!(f[a], g[a], epsilon = 1e-9 * scale);
        }
    }

    // Fractional shift: only discretisation error remains.
    let mut moved = shifted(&reference, [0.37 * h, 0.61 * h, 0.13 * h], &sim_box);
    let e2 = solver.compute(&mut moved, &sim_box, ComputeFlags::all()).unwrap();
    assert!((e0.energy - e2.energy).abs() < 0.05 * e0.energy.abs());
    for (f, g) in reference.forces.iter().zip(&moved.forces) {
        for a in 0..3 {
            assert!((f[a] - g[a]).abs() < 0.05 * scale);
        }
    }
}

#[test]
fn test_mean_subtraction_keeps_forces() {
    let sim_box = SimulationBox::cubic(SIDE);
    let mut plain = serial_solver(8);
    let mut centred = SpectralSolver::new(
        MeshParams {
            subtract_rho0: true,
            ..params(8)
        },
        interactions(),
        Box::new(SerialComm::new()),
        &sim_box,
    )
    .unwrap();

    let mut a = scattered(10);
    let mut b = a.clone();
    let ea = plain.compute(&mut a, &sim_box, ComputeFlags::all()).unwrap();
    let eb = centred.compute(&mut b, &sim_box, ComputeFlags::all()).unwrap();

    let scale = max_force(&a);
    for (f, g) in a.forces.iter().zip(&b.forces) {
        for x in 0..3 {
            assert_abs_diff_eq!(f[x], g[x], epsilon = 1e-8 * scale);
        }
    }
    assert!((ea.energy - eb.energy).abs() > 1e-6);
}

#[test]
fn test_box_change_rebuilds_mesh() {
    let mut solver = SpectralSolver::new(
        MeshParams {
            mesh: MeshSpec::Spacing(1.0),
            ..MeshParams::default()
        },
        interactions(),
        Box::new(SerialComm::new()),
        &SimulationBox::cubic(SIDE),
    )
    .unwrap();
    assert_eq!(solver.topology().dims, [10, 10, 10]);

    let larger = SimulationBox::cubic(12.0);
    let mut particles = scattered(4);
    solver.compute(&mut particles, &larger, ComputeFlags::forces_only()).unwrap();
    assert_eq!(solver.topology().dims, [12, 12, 12]);
    assert_eq!(solver.topology().lengths, [12.0; 3]);

    let moved = SimulationBox::new([1.0, 0.0, 0.0], [12.0; 3]);
    particles.translate([1.0, 0.0, 0.0]);
    solver.compute(&mut particles, &moved, ComputeFlags::forces_only()).unwrap();
    assert_eq!(solver.topology().origin, [1.0, 0.0, 0.0]);
}

#[test]
fn test_setup_grid_rebuilds_kernels_for_new_box() {
    let spacing = MeshParams {
        mesh: MeshSpec::Spacing(1.0),
        ..MeshParams::default()
    };
    let larger = SimulationBox::cubic(12.0);
    let mut solver = SpectralSolver::new(
        spacing.clone(),
        interactions(),
        Box::new(SerialComm::new()),
        &SimulationBox::cubic(SIDE),
    )
    .unwrap();
    solver.setup_grid(&larger).unwrap();
    assert_eq!(solver.context().dims, [12, 12, 12]);
    assert_eq!(solver.context().lengths, [12.0; 3]);

    let mut fresh = SpectralSolver::new(spacing, interactions(), Box::new(SerialComm::new()), &larger).unwrap();
    let mut particles = scattered(6);
    let mut expected = scattered(6);
    let energy = solver.compute(&mut particles, &larger, ComputeFlags::all()).unwrap();
    let reference = fresh.compute(&mut expected, &larger, ComputeFlags::all()).unwrap();

    let scale = max_force(&expected);
    assert!(scale > 0.0);
    for (f, g) in particles.forces.iter().zip(&expected.forces) {
        for a in 0..3 {
            assert_abs_diff_eq!(f[a], g[a], epsilon = 1e-12 * scale);
        }
    }
    assert_abs_diff_eq!(energy.energy, reference.energy, epsilon = 1e-12 * reference.energy.abs());
}

/// Total mesh energy of `particles` in a fresh evaluation.
fn energy_of(solver: &mut SpectralSolver, particles: &ParticleStore, sim_box: &SimulationBox) -> f64 {
    let mut trial = particles.clone();
    trial.zero_forces();
    let flags = ComputeFlags {
        energy: true,
        virial: false,
    };
    solver.compute(&mut trial, sim_box, flags).unwrap().energy
}

/// Compare mesh forces with central differences of the energy.
fn check_forces_against_energy(config: InteractionConfig, species: [usize; 2]) {
    let sim_box = SimulationBox::cubic(SIDE);
    let mut solver = SpectralSolver::new(params(16), config, Box::new(SerialComm::new()), &sim_box).unwrap();
    let mut particles = ParticleStore::new();
    particles.push([4.03, 5.11, 4.92], species[0]);
    particles.push([5.61, 4.87, 5.24], species[1]);
    solver.compute(&mut particles, &sim_box, ComputeFlags::forces_only()).unwrap();

    let scale = max_force(&particles);
    assert!(scale > 1e-4);
    let h = 1e-4;
    for p in 0..2 {
        for a in 0..3 {
            let mut plus = particles.clone();
            plus.positions[p][a] += h;
            let mut minus = particles.clone();
            minus.positions[p][a] -= h;
            let slope =
                (energy_of(&mut solver, &plus, &sim_box) - energy_of(&mut solver, &minus, &sim_box)) / (2.0 * h);
            assert_abs_diff_eq!(particles.forces[p][a], -slope, epsilon = 1e-3 * scale);
        }
    }
}

#[test]
fn test_self_pair_forces_are_energy_gradient() {
    let mut chi = ChiMatrix::new(2);
    chi.set(1, 1, 1.0);
    let config = InteractionConfig {
        chi,
        ..interactions()
    };
    check_forces_against_energy(config, [1, 1]);
}

#[test]
fn test_cross_pair_forces_are_energy_gradient() {
    check_forces_against_energy(interactions(), [1, 2]);
}

#[test]
fn test_virial_is_strain_derivative() {
    let sim_box = SimulationBox::cubic(SIDE);
    let mut solver = serial_solver(16);
    let particles = scattered(6);
    let mut evaluated = particles.clone();
    let virial = solver.compute(&mut evaluated, &sim_box, ComputeFlags::all()).unwrap().virial;

    // Stretch one axis of box and coordinates together; the mesh keeps its
    // dimensions so only the spacing changes.
    let strained = |axis: usize, eps: f64| {
        let mut lengths = [SIDE; 3];
        lengths[axis] *= 1.0 + eps;
        let stretched_box = SimulationBox::new([0.0; 3], lengths);
        let mut stretched = particles.clone();
        for p in &mut stretched.positions {
            p[axis] *= 1.0 + eps;
        }
        let mut solver =
            SpectralSolver::new(params(16), interactions(), Box::new(SerialComm::new()), &stretched_box).unwrap();
        energy_of(&mut solver, &stretched, &stretched_box)
    };

    let eps = 1e-5;
    for axis in 0..3 {
        let slope = (strained(axis, eps) - strained(axis, -eps)) / (2.0 * eps);
        assert_abs_diff_eq!(virial[axis], -slope, epsilon = 1e-5 * virial[axis].abs().max(1e-6));
    }
}

#[test]
fn test_unknown_species_is_reported() {
    let sim_box = SimulationBox::cubic(SIDE);
    let mut solver = serial_solver(8);
    let mut particles = scattered(3);
    particles.species[2] = 7;
    match solver.compute(&mut particles, &sim_box, ComputeFlags::forces_only()) {
        Err(SolverError::Geometry { index, species, .. }) => {
            assert_eq!(index, 2);
            assert_eq!(species, 7);
        }
        other => panic!("expected a geometry error, got {:?}", other.map(|_| ())),
    }
}

/// Run `particles` on `nprocs` threaded ranks; each rank owns the particles
/// inside its sub-domain. Returns forces in input order and the energy of
/// rank 0.
fn run_ranks(nprocs: usize, particles: &ParticleStore) -> (Vec<[f64; 3]>, MeshEnergy) {
    let sim_box = SimulationBox::cubic(SIDE);
    let comms = LocalWorld::new(nprocs);
    let per_rank: Vec<(Vec<usize>, Vec<[f64; 3]>, MeshEnergy)> = std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let sim_box = sim_box.clone();
                s.spawn(move || {
                    let mut solver = SpectralSolver::new(params(16), interactions(), Box::new(comm), &sim_box).unwrap();
                    let mut local = ParticleStore::new();
                    let mut ids = Vec::new();
                    for (i, (&p, &species)) in particles.positions.iter().zip(&particles.species).enumerate() {
                        if solver.topology().owner_of(p) == solver.topology().rank {
                            local.push(p, species);
                            ids.push(i);
                        }
                    }
                    let energy = solver.compute(&mut local, &sim_box, ComputeFlags::all()).unwrap();
                    (ids, local.forces, energy)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut forces = vec![[f64::NAN; 3]; particles.len()];
    for (ids, local, _) in &per_rank {
        for (&i, f) in ids.iter().zip(local) {
            forces[i] = *f;
        }
    }
    for (_, _, energy) in &per_rank[1..] {
        assert_abs_diff_eq!(energy.energy, per_rank[0].2.energy, epsilon = 1e-12);
    }
    (forces, per_rank[0].2.clone())
}

#[test]
fn test_rank_count_does_not_change_results() {
    let particles = scattered(20);
    let (serial_forces, serial_energy) = run_ranks(1, &particles);
    let scale = serial_forces
        .iter()
        .flat_map(|f| f.iter())
        .fold(0.0f64, |m, v| m.max(v.abs()));

    for nprocs in [2, 4] {
        let (forces, energy) = run_ranks(nprocs, &particles);
        assert_abs_diff_eq!(energy.energy, serial_energy.energy, epsilon = 1e-10 * serial_energy.energy.abs());
        for c in 0..6 {
            assert_abs_diff_eq!(energy.virial[c], serial_energy.virial[c], epsilon = 1e-10 * serial_energy.energy.abs());
        }
        for (f, g) in forces.iter().zip(&serial_forces) {
            for a in 0..3 {
                assert_abs_diff_eq!(f[a], g[a], epsilon = 1e-9 * scale);
            }
        }
    }
}

#[test]
fn test_failure_on_one_rank_reaches_all_ranks() {
    let sim_box = SimulationBox::cubic(SIDE);
    let comms = LocalWorld::new(2);
    let results: Vec<Result<MeshEnergy, SolverError>> = std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let sim_box = sim_box.clone();
                s.spawn(move || {
                    let rank = comm.rank();
                    let mut solver = SpectralSolver::new(params(8), interactions(), Box::new(comm), &sim_box).unwrap();
                    let mut particles = ParticleStore::new();
                    let (lo, hi) = solver.topology().subdomain(rank);
                    let centre = [0.5 * (lo[0] + hi[0]), 0.5 * (lo[1] + hi[1]), 0.5 * (lo[2] + hi[2])];
                    particles.push(centre, if rank == 1 { 0 } else { 1 });
                    solver.compute(&mut particles, &sim_box, ComputeFlags::forces_only())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(matches!(results[0], Err(SolverError::PeerFailure(1))));
    assert!(matches!(results[1], Err(SolverError::Geometry { index: 0, species: 0, .. })));
}
