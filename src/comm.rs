//! Rank communicator seam.
//!
//! Ranks share no memory and coordinate only through the collective
//! operations defined here. The engine is written against the
//! [`Communicator`] trait; an MPI binding is an external collaborator
//! behind it. [`SelfComm`] is the single-process default and
//! [`LocalComm`] is an in-process N-rank harness used to verify the
//! distributed-equivalence property.

use crate::error::{Error, Result};
use std::sync::{Arc, Condvar, Mutex};

/// Collective operations over a set of ranks.
pub trait Communicator: Send + Sync {
    /// This process's rank, `0 <= rank < size`.
    fn rank(&self) -> usize;

    /// Number of ranks.
    fn size(&self) -> usize;

    /// Broadcast `payload` from `root` to every rank.
    ///
    /// On the root the payload is the input; on every other rank it is
    /// replaced with the root's bytes.
    fn broadcast(&self, payload: &mut Vec<u8>, root: usize) -> Result<()>;

    /// Gather every rank's `payload` on `root`.
    ///
    /// Returns `Some(payloads)` ordered by rank on the root, `None`
    /// elsewhere.
    fn gather(&self, payload: Vec<u8>, root: usize) -> Result<Option<Vec<Vec<u8>>>>;
}

/// The trivial single-rank communicator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelfComm;

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast(&self, _payload: &mut Vec<u8>, _root: usize) -> Result<()> {
        Ok(())
    }

    fn gather(&self, payload: Vec<u8>, _root: usize) -> Result<Option<Vec<Vec<u8>>>> {
        Ok(Some(vec![payload]))
    }
}

struct Rendezvous {
    bcast_generation: u64,
    bcast_payload: Option<Vec<u8>>,
    bcast_consumed: usize,
    gather_generation: u64,
    gather_slots: Vec<Option<Vec<u8>>>,
    gathered: usize,
}

struct LocalCommState {
    size: usize,
    inner: Mutex<Rendezvous>,
    cond: Condvar,
}

/// An in-process communicator: `split(n)` yields one handle per rank,
/// each to be driven from its own thread.
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    // clones of a handle represent the same rank and share its cursor
    seen_bcast: Arc<Mutex<u64>>,
    state: Arc<LocalCommState>,
}

impl LocalComm {
    /// Create `n` rank handles sharing one collective state.
    pub fn split(n: usize) -> Vec<Self> {
        assert!(n > 0, "communicator needs at least one rank");
        let state = Arc::new(LocalCommState {
            size: n,
            inner: Mutex::new(Rendezvous {
                bcast_generation: 0,
                bcast_payload: None,
                bcast_consumed: 0,
                gather_generation: 0,
                gather_slots: vec![None; n],
                gathered: 0,
            }),
            cond: Condvar::new(),
        });
        (0..n)
            .map(|rank| Self {
                rank,
                seen_bcast: Arc::new(Mutex::new(0)),
                state: Arc::clone(&state),
            })
            .collect()
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.state.size
    }

    fn broadcast(&self, payload: &mut Vec<u8>, root: usize) -> Result<()> {
        if root >= self.state.size {
            return Err(Error::semantic(format!(
                "broadcast root {root} out of range for {} ranks",
                self.state.size
            )));
        }
        if self.state.size == 1 {
            return Ok(());
        }
        let mut guard = self.state.inner.lock().expect("communicator poisoned");
        if self.rank == root {
            guard.bcast_generation += 1;
            guard.bcast_payload = Some(payload.clone());
            self.state.cond.notify_all();
            // hold the collective open until every rank has a copy
            while guard.bcast_consumed < self.state.size - 1 {
                guard = self.state.cond.wait(guard).expect("communicator poisoned");
            }
            guard.bcast_payload = None;
            guard.bcast_consumed = 0;
            self.state.cond.notify_all();
        } else {
            let mut seen = self.seen_bcast.lock().expect("communicator poisoned");
            while guard.bcast_payload.is_none() || guard.bcast_generation == *seen {
                guard = self.state.cond.wait(guard).expect("communicator poisoned");
            }
            *payload = guard.bcast_payload.clone().expect("payload present");
            *seen = guard.bcast_generation;
            guard.bcast_consumed += 1;
            self.state.cond.notify_all();
        }
        Ok(())
    }

    fn gather(&self, payload: Vec<u8>, root: usize) -> Result<Option<Vec<Vec<u8>>>> {
        if root >= self.state.size {
            return Err(Error::semantic(format!(
                "gather root {root} out of range for {} ranks",
                self.state.size
            )));
        }
        if self.state.size == 1 {
            return Ok(Some(vec![payload]));
        }
        let mut guard = self.state.inner.lock().expect("communicator poisoned");
        let entry_generation = guard.gather_generation;
        guard.gather_slots[self.rank] = Some(payload);
        guard.gathered += 1;
        self.state.cond.notify_all();
        if self.rank == root {
            while guard.gathered < self.state.size {
                guard = self.state.cond.wait(guard).expect("communicator poisoned");
            }
            let out: Vec<Vec<u8>> = guard
                .gather_slots
                .iter_mut()
                .map(|slot| slot.take().expect("slot filled"))
                .collect();
            guard.gathered = 0;
            guard.gather_generation += 1;
            self.state.cond.notify_all();
            Ok(Some(out))
        } else {
            while guard.gather_generation == entry_generation {
                guard = self.state.cond.wait(guard).expect("communicator poisoned");
            }
            Ok(None)
        }
    }
}

/// Contiguous block partition of `n` indices across `size` ranks.
///
/// Rank `r` receives `[r·n/size, (r+1)·n/size)`.
pub fn block_partition(n: u64, rank: usize, size: usize) -> std::ops::Range<u64> {
    let (rank, size) = (rank as u64, size as u64);
    (rank * n / size)..((rank + 1) * n / size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_partition_covers_all_indices() {
        for n in [0u64, 1, 7, 64, 100] {
            for size in [1usize, 2, 3, 7] {
                let mut seen = Vec::new();
                for rank in 0..size {
                    seen.extend(block_partition(n, rank, size));
                }
                assert_eq!(seen, (0..n).collect::<Vec<_>>(), "n={n} size={size}");
            }
        }
    }

    #[test]
    fn test_self_comm() {
        let comm = SelfComm;
        let mut payload = vec![1u8, 2, 3];
        comm.broadcast(&mut payload, 0).unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
        assert_eq!(
            comm.gather(payload, 0).unwrap().unwrap(),
            vec![vec![1u8, 2, 3]]
        );
    }

    #[test]
    fn test_local_comm_broadcast_and_gather() {
        let ranks = LocalComm::split(3);
        let handles: Vec<_> = ranks
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let root = comm.size() - 1;
                    // two back-to-back collectives exercise the
                    // generation tracking
                    for round in 0u8..2 {
                        let mut payload = if comm.rank() == root {
                            vec![42u8 + round, 7]
                        } else {
                            Vec::new()
                        };
                        comm.broadcast(&mut payload, root).unwrap();
                        assert_eq!(payload, vec![42u8 + round, 7]);

                        let gathered = comm.gather(vec![comm.rank() as u8], 0).unwrap();
                        if comm.rank() == 0 {
                            assert_eq!(gathered.unwrap(), vec![vec![0u8], vec![1], vec![2]]);
                        } else {
                            assert!(gathered.is_none());
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
