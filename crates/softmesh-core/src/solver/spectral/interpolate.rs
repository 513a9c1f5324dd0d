//! Mesh-to-particle force interpolation.

use crate::mesh::{MeshField, ParticleMeshStencil};
use crate::types::ParticleStore;

/// Component of `force` holding axis `axis` of species `species`.
#[inline]
pub fn force_component(species: usize, axis: usize) -> usize {
    (species - 1) * 3 + axis
}

/// Add the interpolated mesh force to every particle that has a stencil.
///
/// `force` must hold valid values over the whole halo box, i.e. a forward
/// ghost exchange has run since the owned values were written.
pub fn interpolate_forces(
    particles: &mut ParticleStore,
    stencils: &[Option<ParticleMeshStencil>],
    force: &MeshField,
) {
    for (i, stencil) in stencils.iter().enumerate() {
        let Some(stencil) = stencil else { continue };
        let species = particles.species[i];
        let c = [
            force_component(species, 0),
            force_component(species, 1),
            force_component(species, 2),
        ];
        let mut f = [0.0; 3];
        stencil.for_each_point(|idx, w| {
            for a in 0..3 {
                f[a] += w * force.get(c[a], idx);
            }
        });
        for a in 0..3 {
            particles.forces[i][a] += f[a];
        }
    }
}
