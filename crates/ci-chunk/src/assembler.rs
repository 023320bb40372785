//! Multi-chunk PE reply reassembly.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Default per-assembly deadline for PE replies.
pub const DEFAULT_ASSEMBLY_DEADLINE: Duration = Duration::from_secs(3);

/// Default cap on a fully reassembled body.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk declared numChunks={got} but assembly for this request ID started with numChunks={expected}")]
    NumChunksMismatch { expected: u16, got: u16 },
    #[error("reassembled body of {size} bytes exceeds the {cap}-byte cap")]
    BodyTooLarge { size: usize, cap: usize },
}

/// Outcome of feeding one chunk into the assembler.
#[derive(Debug, PartialEq, Eq)]
pub enum AssembleOutcome {
    Incomplete,
    Complete { header: Vec<u8>, body: Vec<u8> },
    /// No assembly was registered for this request ID — already completed,
    /// cooled down, or never issued locally.
    UnknownRequestId,
    /// The assembly's deadline had already passed when this chunk arrived.
    Timeout { partial_body: Vec<u8> },
}

struct Entry {
    deadline: Instant,
    num_chunks: Option<u16>,
    header: Vec<u8>,
    chunks: BTreeMap<u16, Vec<u8>>,
}

impl Entry {
    fn partial_body(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for body in self.chunks.values() {
            out.extend_from_slice(body);
        }
        out
    }
}

/// Reassembles chunked PE reply bodies keyed by request ID. A request ID
/// must be `register`ed by the transaction engine before any chunk for it
/// is accepted.
pub struct ChunkAssembler {
    entries: BTreeMap<u8, Entry>,
    max_body_bytes: usize,
}

impl ChunkAssembler {
    pub fn new(max_body_bytes: usize) -> Self {
        ChunkAssembler {
            entries: BTreeMap::new(),
            max_body_bytes,
        }
    }

    /// Begin tracking a request ID so that `add_chunk` will accept chunks
    /// for it instead of reporting `UnknownRequestId`.
    pub fn register(&mut self, request_id: u8, now: Instant, deadline: Duration) {
        self.entries.insert(
            request_id,
            Entry {
                deadline: now + deadline,
                num_chunks: None,
                header: Vec::new(),
                chunks: BTreeMap::new(),
            },
        );
    }

    /// Drop tracking for `request_id` (cancellation or external cleanup),
    /// returning whatever partial body had been accumulated, if any.
    pub fn cancel(&mut self, request_id: u8) -> Option<Vec<u8>> {
        self.entries.remove(&request_id).map(|e| e.partial_body())
    }

    pub fn is_registered(&self, request_id: u8) -> bool {
        self.entries.contains_key(&request_id)
    }

    /// Feed one chunk into the assembler.
    ///
    /// Only chunk 1's header is authoritative; headers attached to other
    /// chunks are ignored. Chunks may arrive out of order and duplicates are
    /// overwritten rather than accumulated twice.
    pub fn add_chunk(
        &mut self,
        now: Instant,
        request_id: u8,
        this_chunk: u16,
        num_chunks: u16,
        header: Vec<u8>,
        body: Vec<u8>,
    ) -> Result<AssembleOutcome, ChunkError> {
        let Some(entry) = self.entries.get_mut(&request_id) else {
            return Ok(AssembleOutcome::UnknownRequestId);
        };

        if now >= entry.deadline {
            let partial = entry.partial_body();
            tracing::debug!(
                request_id,
                partial_len = partial.len(),
                "chunk arrived after assembly deadline"
            );
            self.entries.remove(&request_id);
            return Ok(AssembleOutcome::Timeout {
                partial_body: partial,
            });
        }

        match entry.num_chunks {
            None => entry.num_chunks = Some(num_chunks),
            Some(expected) if expected != num_chunks => {
                return Err(ChunkError::NumChunksMismatch {
                    expected,
                    got: num_chunks,
                });
            }
            Some(_) => {}
        }

        if this_chunk == 1 {
            entry.header = header;
        }
        entry.chunks.insert(this_chunk, body);

        let total: usize = entry.chunks.values().map(Vec::len).sum();
        if total > self.max_body_bytes {
            tracing::warn!(
                request_id,
                size = total,
                cap = self.max_body_bytes,
                "reassembled body exceeds cap, aborting assembly"
            );
            self.entries.remove(&request_id);
            return Err(ChunkError::BodyTooLarge {
                size: total,
                cap: self.max_body_bytes,
            });
        }

        let expected = entry.num_chunks.unwrap();
        if entry.chunks.len() as u16 == expected {
            let header = std::mem::take(&mut entry.header);
            let mut body = Vec::with_capacity(total);
            for idx in 1..=expected {
                if let Some(chunk) = entry.chunks.get(&idx) {
                    body.extend_from_slice(chunk);
                }
            }
            self.entries.remove(&request_id);
            return Ok(AssembleOutcome::Complete { header, body });
        }

        Ok(AssembleOutcome::Incomplete)
    }

    /// Remove and return every assembly whose deadline has passed as of
    /// `now`, for the caller to complete with `Timeout`.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<(u8, Vec<u8>)> {
        let expired: Vec<u8> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "swept expired chunk assemblies");
        }
        expired
            .into_iter()
            .map(|id| {
                let entry = self.entries.remove(&id).unwrap();
                (id, entry.partial_body())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_assembler() -> ChunkAssembler {
        ChunkAssembler::new(DEFAULT_MAX_BODY_BYTES)
    }

    #[test]
    fn single_chunk_completes_immediately() {
        let mut a = default_assembler();
        let now = Instant::now();
        a.register(0, now, DEFAULT_ASSEMBLY_DEADLINE);
        let outcome = a
            .add_chunk(now, 0, 1, 1, b"hdr".to_vec(), b"body".to_vec())
            .unwrap();
        assert_eq!(
            outcome,
            AssembleOutcome::Complete {
                header: b"hdr".to_vec(),
                body: b"body".to_vec()
            }
        );
    }

    #[test]
    fn out_of_order_chunks_are_reordered_on_completion() {
        let mut a = default_assembler();
        let now = Instant::now();
        a.register(5, now, DEFAULT_ASSEMBLY_DEADLINE);
        assert_eq!(
            a.add_chunk(now, 5, 2, 3, Vec::new(), b"B".to_vec()).unwrap(),
            AssembleOutcome::Incomplete
        );
        assert_eq!(
            a.add_chunk(now, 5, 3, 3, Vec::new(), b"C".to_vec()).unwrap(),
            AssembleOutcome::Incomplete
        );
        let outcome = a
            .add_chunk(now, 5, 1, 3, b"hdr".to_vec(), b"A".to_vec())
            .unwrap();
        assert_eq!(
            outcome,
            AssembleOutcome::Complete {
                header: b"hdr".to_vec(),
                body: b"ABC".to_vec()
            }
        );
    }

    #[test]
    fn duplicate_chunk_does_not_duplicate_body_bytes() {
        let mut a = default_assembler();
        let now = Instant::now();
        a.register(1, now, DEFAULT_ASSEMBLY_DEADLINE);
        a.add_chunk(now, 1, 1, 2, b"hdr".to_vec(), b"A".to_vec()).unwrap();
        a.add_chunk(now, 1, 1, 2, b"hdr".to_vec(), b"A".to_vec()).unwrap();
        let outcome = a.add_chunk(now, 1, 2, 2, Vec::new(), b"B".to_vec()).unwrap();
        assert_eq!(
            outcome,
            AssembleOutcome::Complete {
                header: b"hdr".to_vec(),
                body: b"AB".to_vec()
            }
        );
    }

    #[test]
    fn later_header_is_ignored() {
        let mut a = default_assembler();
        let now = Instant::now();
        a.register(1, now, DEFAULT_ASSEMBLY_DEADLINE);
        a.add_chunk(now, 1, 1, 2, b"real-header".to_vec(), b"A".to_vec())
            .unwrap();
        let outcome = a
            .add_chunk(now, 1, 2, 2, b"bogus-header".to_vec(), b"B".to_vec())
            .unwrap();
        assert_eq!(
            outcome,
            AssembleOutcome::Complete {
                header: b"real-header".to_vec(),
                body: b"AB".to_vec()
            }
        );
    }

    #[test]
    fn num_chunks_disagreement_is_rejected() {
        let mut a = default_assembler();
        let now = Instant::now();
        a.register(1, now, DEFAULT_ASSEMBLY_DEADLINE);
        a.add_chunk(now, 1, 1, 3, Vec::new(), b"A".to_vec()).unwrap();
        let err = a
            .add_chunk(now, 1, 2, 4, Vec::new(), b"B".to_vec())
            .unwrap_err();
        assert_eq!(
            err,
            ChunkError::NumChunksMismatch {
                expected: 3,
                got: 4
            }
        );
    }

    #[test]
    fn unknown_request_id_is_reported_without_error() {
        let mut a = default_assembler();
        let now = Instant::now();
        let outcome = a.add_chunk(now, 9, 1, 1, Vec::new(), b"x".to_vec()).unwrap();
        assert_eq!(outcome, AssembleOutcome::UnknownRequestId);
    }

    #[test]
    fn body_exceeding_cap_aborts_assembly() {
        let mut a = ChunkAssembler::new(4);
        let now = Instant::now();
        a.register(1, now, DEFAULT_ASSEMBLY_DEADLINE);
        let err = a
            .add_chunk(now, 1, 1, 1, Vec::new(), b"12345".to_vec())
            .unwrap_err();
        assert_eq!(err, ChunkError::BodyTooLarge { size: 5, cap: 4 });
        assert!(!a.is_registered(1));
    }

    #[test]
    fn chunk_arriving_after_deadline_returns_timeout() {
        let mut a = default_assembler();
        let now = Instant::now();
        a.register(1, now, Duration::from_millis(10));
        let later = now + Duration::from_millis(11);
        let outcome = a
            .add_chunk(later, 1, 1, 2, Vec::new(), b"late".to_vec())
            .unwrap();
        assert_eq!(
            outcome,
            AssembleOutcome::Timeout {
                partial_body: Vec::new()
            }
        );
        assert!(!a.is_registered(1));
    }

    #[test]
    fn sweep_expired_frees_stale_assemblies_with_partial_data() {
        let mut a = default_assembler();
        let now = Instant::now();
        a.register(1, now, Duration::from_millis(10));
        a.add_chunk(now, 1, 1, 2, b"hdr".to_vec(), b"A".to_vec()).unwrap();
        let later = now + Duration::from_millis(20);
        let expired = a.sweep_expired(later);
        assert_eq!(expired, vec![(1, b"A".to_vec())]);
        assert!(!a.is_registered(1));
    }

    #[test]
    fn cancel_returns_partial_body_and_stops_tracking() {
        let mut a = default_assembler();
        let now = Instant::now();
        a.register(1, now, DEFAULT_ASSEMBLY_DEADLINE);
        a.add_chunk(now, 1, 1, 2, b"hdr".to_vec(), b"A".to_vec()).unwrap();
        assert_eq!(a.cancel(1), Some(b"A".to_vec()));
        assert_eq!(a.cancel(1), None);
    }
}
