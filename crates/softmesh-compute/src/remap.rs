//! Redistribution of a distributed complex field between two layouts.
//!
//! A layout is one [`IndexBox`] per rank. A [`RemapPlan`] records, for this
//! rank, which part of its input box every other rank needs and which part
//! of its output box every other rank supplies. Because each rank derives
//! all boxes from the same deterministic topology, send and receive regions
//! agree without any negotiation round.

use num_complex::Complex64;

use crate::backend::{ComputeError, Communicator};
use crate::layout::IndexBox;

/// Precomputed exchange pattern between two layouts.
#[derive(Debug, Clone)]
pub struct RemapPlan {
    in_box: IndexBox,
    out_box: IndexBox,
    /// Region of `in_box` sent to each rank.
    sends: Vec<IndexBox>,
    /// Region of `out_box` received from each rank.
    recvs: Vec<IndexBox>,
}

impl RemapPlan {
    /// Build the plan for `rank` given every rank's input and output box.
    pub fn new(
        rank: usize,
        in_boxes: &[IndexBox],
        out_boxes: &[IndexBox],
    ) -> Result<Self, ComputeError> {
        if in_boxes.len() != out_boxes.len() || rank >= in_boxes.len() {
            return Err(ComputeError::InvalidLayout(format!(
                "remap between {} input and {} output boxes for rank {}",
                in_boxes.len(),
                out_boxes.len(),
                rank
            )));
        }
        let in_box = in_boxes[rank];
        let out_box = out_boxes[rank];
        let sends = out_boxes.iter().map(|ob| in_box.intersect(ob)).collect();
        let recvs = in_boxes.iter().map(|ib| ib.intersect(&out_box)).collect();
        Ok(Self {
            in_box,
            out_box,
            sends,
            recvs,
        })
    }

    pub fn in_box(&self) -> IndexBox {
        self.in_box
    }

    pub fn out_box(&self) -> IndexBox {
        self.out_box
    }

    fn is_local_identity(&self) -> bool {
        self.sends.len() == 1 && self.in_box == self.out_box
    }

    /// Redistribute `input` (laid out on this rank's input box).
    pub fn apply(
        &self,
        comm: &dyn Communicator,
        input: &[Complex64],
    ) -> Result<Vec<Complex64>, ComputeError> {
        if input.len() != self.in_box.len() {
            return Err(ComputeError::BufferMismatch {
                expected: self.in_box.len(),
                actual: input.len(),
            });
        }
        if self.is_local_identity() {
            return Ok(input.to_vec());
        }

        let outgoing: Vec<Vec<f64>> = self
            .sends
            .iter()
            .map(|region| {
                let mut buf = Vec::with_capacity(2 * region.len());
                for idx in region.iter() {
                    let v = input[self.in_box.offset(idx)];
                    buf.push(v.re);
                    buf.push(v.im);
                }
                buf
            })
            .collect();

        let incoming = comm.all_to_all(outgoing)?;

        let mut output = vec![Complex64::new(0.0, 0.0); self.out_box.len()];
        for (region, buf) in self.recvs.iter().zip(&incoming) {
            if buf.len() != 2 * region.len() {
                return Err(ComputeError::BufferMismatch {
                    expected: 2 * region.len(),
                    actual: buf.len(),
                });
            }
            for (k, idx) in region.iter().enumerate() {
                output[self.out_box.offset(idx)] = Complex64::new(buf[2 * k], buf[2 * k + 1]);
            }
        }
        Ok(output)
    }
}
