//! Time-averaged species density grids.
//!
//! With sampling interval `every` (N), sample count `repeat` (M) and output
//! interval `freq` (P), the averager samples on steps
//! `P·t − (M−1)·N, …, P·t − N, P·t` and emits the mean at `P·t`.

use serde::{Deserialize, Serialize};

use crate::mesh::MeshField;
use crate::snapshot::GridTable;
use crate::solver::SolverError;

/// Sampling schedule of a [`GridAverager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AverageSchedule {
    pub every: u64,
    pub repeat: u64,
    pub freq: u64,
}

impl AverageSchedule {
    pub fn validate(&self) -> Result<(), SolverError> {
        if self.every == 0 || self.repeat == 0 || self.freq == 0 {
            return Err(SolverError::InvalidConfig(format!(
                "averaging intervals must be positive (every={}, repeat={}, freq={})",
                self.every, self.repeat, self.freq
            )));
        }
        if self.freq % self.every != 0 {
            return Err(SolverError::InvalidConfig(format!(
                "averaging freq {} is not a multiple of every {}",
                self.freq, self.every
            )));
        }
        if self.repeat * self.every > self.freq {
            return Err(SolverError::InvalidConfig(format!(
                "averaging window repeat*every = {} exceeds freq {}",
                self.repeat * self.every,
                self.freq
            )));
        }
        Ok(())
    }

    /// Next output step at or after `step` (never step 0).
    pub fn next_output(&self, step: u64) -> u64 {
        step.div_ceil(self.freq).max(1) * self.freq
    }

    pub fn samples_on(&self, step: u64) -> bool {
        let next = self.next_output(step);
        let gap = next - step;
        gap % self.every == 0 && gap / self.every < self.repeat
    }

    pub fn emits_on(&self, step: u64) -> bool {
        step > 0 && step % self.freq == 0
    }
}

/// One emitted average.
#[derive(Debug, Clone, PartialEq)]
pub struct AveragedGrid {
    pub step: u64,
    pub samples: u64,
    pub table: GridTable,
}

/// Running sum of the species densities over the owned box.
#[derive(Debug, Clone)]
pub struct GridAverager {
    schedule: AverageSchedule,
    sum: GridTable,
    samples: u64,
}

impl GridAverager {
    pub fn new(schedule: AverageSchedule, field: &MeshField) -> Result<Self, SolverError> {
        schedule.validate()?;
        Ok(Self {
            schedule,
            sum: GridTable::zeros(field.owned_box(), field.components() - 1),
            samples: 0,
        })
    }

    pub fn schedule(&self) -> &AverageSchedule {
        &self.schedule
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Offer the density of `step`. Returns the average on output steps.
    pub fn sample(&mut self, step: u64, field: &MeshField) -> Result<Option<AveragedGrid>, SolverError> {
        if !self.schedule.samples_on(step) {
            return Ok(None);
        }
        let current = GridTable::species_densities(field);
        if current.owned != self.sum.owned || current.components != self.sum.components {
            // The mesh was rebuilt; restart the window on the new layout.
            log::warn!("Mesh layout changed at step {}; discarding {} averaging samples", step, self.samples);
            self.sum = GridTable::zeros(current.owned, current.components);
            self.samples = 0;
        }
        for (acc, v) in self.sum.values.iter_mut().zip(&current.values) {
            *acc += v;
        }
        self.samples += 1;

        if !self.schedule.emits_on(step) {
            return Ok(None);
        }
        let samples = self.samples;
        let scale = 1.0 / samples as f64;
        let mut table = GridTable::zeros(self.sum.owned, self.sum.components);
        for (out, acc) in table.values.iter_mut().zip(self.sum.values.iter_mut()) {
            *out = *acc * scale;
            *acc = 0.0;
        }
        self.samples = 0;
        Ok(Some(AveragedGrid { step, samples, table }))
    }
}
