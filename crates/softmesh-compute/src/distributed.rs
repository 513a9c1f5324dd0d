//! In-process multi-rank communicator backed by threads and channels.
//!
//! [`LocalWorld::new`] hands out one [`ThreadComm`] endpoint per rank; each
//! endpoint is moved into its own thread and the threads then run the same
//! SPMD program they would run under MPI. Collectives are tagged with a
//! per-endpoint sequence number so that a fast rank entering the next
//! collective never corrupts the current one.
//!
//! Gated behind the `distributed` feature flag.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};

use crate::backend::{BackendType, CommInfo, ComputeError, Communicator};

struct Envelope {
    source: usize,
    sequence: u64,
    payload: Vec<f64>,
}

/// Factory for a set of connected [`ThreadComm`] endpoints.
pub struct LocalWorld;

impl LocalWorld {
    /// Create `size` connected endpoints, index = rank.
    pub fn new(size: usize) -> Vec<ThreadComm> {
        let (senders, receivers): (Vec<Sender<Envelope>>, Vec<Receiver<Envelope>>) =
            (0..size).map(|_| channel()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| ThreadComm {
                rank,
                senders: senders.clone(),
                receiver,
                sequence: Cell::new(0),
                pending: RefCell::new(HashMap::new()),
            })
            .collect()
    }
}

/// One rank's endpoint into a [`LocalWorld`].
pub struct ThreadComm {
    rank: usize,
    senders: Vec<Sender<Envelope>>,
    receiver: Receiver<Envelope>,
    sequence: Cell<u64>,
    /// Messages that arrived early for a later collective.
    pending: RefCell<HashMap<(u64, usize), Vec<f64>>>,
}

impl ThreadComm {
    fn failure(&self, message: String) -> ComputeError {
        ComputeError::Communication {
            rank: self.rank,
            message,
        }
    }

    fn receive(&self, sequence: u64, source: usize) -> Result<Vec<f64>, ComputeError> {
        if let Some(payload) = self.pending.borrow_mut().remove(&(sequence, source)) {
            return Ok(payload);
        }
        loop {
            let envelope = self
                .receiver
                .recv()
                .map_err(|_| self.failure(format!("all peers disconnected while waiting for rank {}", source)))?;
            if envelope.sequence == sequence && envelope.source == source {
                return Ok(envelope.payload);
            }
            self.pending
                .borrow_mut()
                .insert((envelope.sequence, envelope.source), envelope.payload);
        }
    }
}

impl Communicator for ThreadComm {
    fn info(&self) -> CommInfo {
        CommInfo {
            name: format!("threads ({} ranks)", self.senders.len()),
            backend_type: BackendType::Threaded,
            rank: self.rank,
            size: self.senders.len(),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn all_to_all(&self, outgoing: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>, ComputeError> {
        let size = self.size();
        if outgoing.len() != size {
            return Err(ComputeError::BufferMismatch {
                expected: size,
                actual: outgoing.len(),
            });
        }
        let sequence = self.sequence.get();
        self.sequence.set(sequence + 1);

        let mut own = Vec::new();
        for (dest, payload) in outgoing.into_iter().enumerate() {
            if dest == self.rank {
                own = payload;
                continue;
            }
            self.senders[dest]
                .send(Envelope {
                    source: self.rank,
                    sequence,
                    payload,
                })
                .map_err(|_| self.failure(format!("rank {} has hung up", dest)))?;
        }

        let mut incoming = Vec::with_capacity(size);
        for source in 0..size {
            if source == self.rank {
                incoming.push(std::mem::take(&mut own));
            } else {
                incoming.push(self.receive(sequence, source)?);
            }
        }
        Ok(incoming)
    }
}
