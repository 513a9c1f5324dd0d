//! Per-rank tables of mesh densities.
//!
//! Each rank writes the points it owns; concatenating the tables of all
//! ranks gives the full mesh.

use std::io::{self, Write};

use softmesh_compute::IndexBox;

use crate::mesh::{GridTopology, MeshField};

/// Species densities over an owned box, interleaved per point.
#[derive(Debug, Clone, PartialEq)]
pub struct GridTable {
    pub owned: IndexBox,
    /// Number of species columns.
    pub components: usize,
    /// `values[p * components + (s - 1)]` for point `p` in storage order.
    pub values: Vec<f64>,
}

impl GridTable {
    pub fn zeros(owned: IndexBox, components: usize) -> Self {
        Self {
            owned,
            components,
            values: vec![0.0; owned.len() * components],
        }
    }

    /// Species components (1..) of a density field over its owned box.
    pub fn species_densities(field: &MeshField) -> Self {
        let owned = field.owned_box();
        let components = field.components() - 1;
        let mut values = Vec::with_capacity(owned.len() * components);
        for idx in owned.iter() {
            for s in 1..=components {
                values.push(field.get(s, idx));
            }
        }
        Self {
            owned,
            components,
            values,
        }
    }

    /// Density of `species` at storage-order point `point`.
    pub fn get(&self, point: usize, species: usize) -> f64 {
        self.values[point * self.components + species - 1]
    }
}

/// Write `table` as CSV: a `#` metadata header, a column header, then
/// `ix,iy,iz,x,y,z,rho_1..rho_n` per owned point.
pub fn write_grid_table<W: Write>(
    out: &mut W,
    table: &GridTable,
    topology: &GridTopology,
    title: &str,
) -> io::Result<()> {
    writeln!(out, "# SoftMesh — {}", title)?;
    writeln!(
        out,
        "# Mesh: {}x{}x{}, rank {} of {}",
        topology.dims[0],
        topology.dims[1],
        topology.dims[2],
        topology.rank,
        topology.nprocs()
    )?;
    writeln!(
        out,
        "# Owned: [{}..{}] x [{}..{}] x [{}..{}]",
        table.owned.lo[0], table.owned.hi[0], table.owned.lo[1], table.owned.hi[1], table.owned.lo[2], table.owned.hi[2]
    )?;
    writeln!(out, "#")?;

    write!(out, "ix,iy,iz,x,y,z")?;
    for s in 1..=table.components {
        write!(out, ",rho_{}", s)?;
    }
    writeln!(out)?;

    for (p, idx) in table.owned.iter().enumerate() {
        let pos = topology.position_of(idx);
        write!(
            out,
            "{},{},{},{:.4},{:.4},{:.4}",
            idx[0], idx[1], idx[2], pos[0], pos[1], pos[2]
        )?;
        for s in 1..=table.components {
            write!(out, ",{:.6e}", table.get(p, s))?;
        }
        writeln!(out)?;
    }
    Ok(())
}
