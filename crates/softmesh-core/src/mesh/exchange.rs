//! Ghost-cell exchange between neighbouring bricks.
//!
//! Halo boxes overlap the owned boxes of neighbouring ranks, or periodic
//! images of them (including this rank's own owned box seen through the
//! periodic boundary). The plan lists, per peer, the regions to pack and
//! unpack; both sides enumerate shifts in the same order so the buffers line
//! up without any metadata on the wire.

use softmesh_compute::{ComputeError, Communicator, IndexBox};

use super::field::MeshField;
use super::topology::GridTopology;

/// Precomputed swap regions of one rank.
#[derive(Debug, Clone)]
pub struct GhostExchange {
    owned: IndexBox,
    halo: IndexBox,
    /// Per peer: owned regions (this rank's coordinates) the peer holds as ghosts.
    shared: Vec<Vec<IndexBox>>,
    /// Per peer: halo regions (this rank's coordinates) the peer owns.
    ghosts: Vec<Vec<IndexBox>>,
}

fn image_shifts(dims: [usize; 3]) -> Vec<[i64; 3]> {
    let mut shifts = Vec::with_capacity(27);
    for sz in -1..=1i64 {
        for sy in -1..=1i64 {
            for sx in -1..=1i64 {
                shifts.push([sx * dims[0] as i64, sy * dims[1] as i64, sz * dims[2] as i64]);
            }
        }
    }
    shifts
}

impl GhostExchange {
    pub fn new(topology: &GridTopology) -> Self {
        let me = topology.rank;
        let shifts = image_shifts(topology.dims);
        let mine = topology.brick();
        let nprocs = topology.nprocs();

        let mut shared = vec![Vec::new(); nprocs];
        let mut ghosts = vec![Vec::new(); nprocs];
        for peer in 0..nprocs {
            let theirs = &topology.bricks[peer];
            for &shift in &shifts {
                if peer == me && shift == [0, 0, 0] {
                    continue;
                }

                // Peer's halo over an image of my owned box.
                let region = theirs.halo.intersect(&mine.owned.shifted(shift));
                if !region.is_empty() {
                    shared[peer].push(region.shifted([-shift[0], -shift[1], -shift[2]]));
                }

                // My halo over an image of the peer's owned box.
                let region = mine.halo.intersect(&theirs.owned.shifted(shift));
                if !region.is_empty() {
                    ghosts[peer].push(region);
                }
            }
        }

        let sent: usize = shared.iter().flatten().map(|b| b.len()).sum();
        log::debug!("rank {}: ghost exchange shares {} owned points", me, sent);

        Self {
            owned: mine.owned,
            halo: mine.halo,
            shared,
            ghosts,
        }
    }

    fn check(&self, field: &MeshField) -> Result<(), ComputeError> {
        if field.owned_box() != self.owned || field.halo_box() != self.halo {
            return Err(ComputeError::BufferMismatch {
                expected: self.halo.len(),
                actual: field.halo_box().len(),
            });
        }
        Ok(())
    }

    /// Copy owned values into every ghost copy on every rank.
    pub fn forward(&self, comm: &dyn Communicator, field: &mut MeshField) -> Result<(), ComputeError> {
        self.check(field)?;
        let outgoing = self
            .shared
            .iter()
            .map(|regions| {
                let mut buf = Vec::new();
                for r in regions {
                    field.pack(r, &mut buf);
                }
                buf
            })
            .collect();
        let incoming = comm.all_to_all(outgoing)?;
        for (regions, buf) in self.ghosts.iter().zip(&incoming) {
            unpack_all(field, regions, buf, false)?;
        }
        Ok(())
    }

    /// Sum every ghost copy into the owning rank's cells.
    pub fn reverse(&self, comm: &dyn Communicator, field: &mut MeshField) -> Result<(), ComputeError> {
        self.check(field)?;
        let outgoing = self
            .ghosts
            .iter()
            .map(|regions| {
                let mut buf = Vec::new();
                for r in regions {
                    field.pack(r, &mut buf);
                }
                buf
            })
            .collect();
        let incoming = comm.all_to_all(outgoing)?;
        for (regions, buf) in self.shared.iter().zip(&incoming) {
            unpack_all(field, regions, buf, true)?;
        }
        Ok(())
    }
}

fn unpack_all(field: &mut MeshField, regions: &[IndexBox], buf: &[f64], add: bool) -> Result<(), ComputeError> {
    let expected: usize = regions.iter().map(|r| r.len()).sum::<usize>() * field.components();
    if buf.len() != expected {
        return Err(ComputeError::BufferMismatch {
            expected,
            actual: buf.len(),
        });
    }
    let mut cursor = 0;
    for r in regions {
        let chunk = &buf[cursor..];
        cursor += if add {
            field.unpack_add(r, chunk)
        } else {
            field.unpack_assign(r, chunk)
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MeshParams, MeshSpec, SimulationBox};
    use softmesh_compute::SerialComm;

    fn serial_topology() -> GridTopology {
        let params = MeshParams {
            mesh: MeshSpec::Dims([6, 6, 6]),
            order: 3,
            skin: 0.0,
            ..MeshParams::default()
        };
        GridTopology::new(&params, &SimulationBox::cubic(6.0), 0, 1).unwrap()
    }

    fn wrap(idx: [i64; 3], n: i64) -> [i64; 3] {
        [idx[0].rem_euclid(n), idx[1].rem_euclid(n), idx[2].rem_euclid(n)]
    }

    #[test]
    fn test_forward_fills_periodic_images() {
        let topo = serial_topology();
        let brick = *topo.brick();
        let plan = GhostExchange::new(&topo);
        let mut field = MeshField::new(brick.owned, brick.halo, 2);
        for idx in brick.owned.iter() {
            field.set(0, idx, (idx[0] + 10 * idx[1] + 100 * idx[2]) as f64);
            field.set(1, idx, -1.0);
        }
        plan.forward(&SerialComm::new(), &mut field).unwrap();
        for idx in brick.halo.iter() {
            let w = wrap(idx, 6);
            assert_eq!(field.get(0, idx), (w[0] + 10 * w[1] + 100 * w[2]) as f64);
            assert_eq!(field.get(1, idx), -1.0);
        }
    }

    #[test]
    fn test_reverse_conserves_total() {
        let topo = serial_topology();
        let brick = *topo.brick();
        let plan = GhostExchange::new(&topo);
        let mut field = MeshField::new(brick.owned, brick.halo, 1);
        field.fill(1.0);
        let total = field.halo_sum(0);
        plan.reverse(&SerialComm::new(), &mut field).unwrap();
        assert!((field.owned_sum(0) - total).abs() < 1e-9);
        // A corner point receives contributions from all 8 images.
        assert_eq!(field.get(0, [0, 0, 0]), 8.0);
    }

    #[test]
    fn test_rejects_foreign_field() {
        let topo = serial_topology();
        let plan = GhostExchange::new(&topo);
        let mut field = MeshField::new(IndexBox::from_dims([2, 2, 2]), IndexBox::from_dims([2, 2, 2]), 1);
        assert!(matches!(
            plan.forward(&SerialComm::new(), &mut field),
            Err(ComputeError::BufferMismatch { .. })
        ));
    }
}
