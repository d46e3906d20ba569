//! Bounded in-memory trace ring for post-mortem debugging.
//!
//! Plays the role of the teacher's `ringbuf!`/`Trace` enum, but since this is
//! a hosted process rather than firmware, it's an ordinary
//! `Mutex<VecDeque<TraceEntry>>` snapshot rather than a no_std macro.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Capacity of the per-handle trace ring.
const TRACE_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub enum TraceEntry {
    ModeSwitch { board: &'static str, mode: u8 },
    BufferSelect { board: &'static str, buffer: u8 },
    SyncCommand { opcode: u8 },
    Desync { check: &'static str },
    Calibration { attempt: u32, accepted: bool },
    Reset { kind: &'static str },
}

/// Owns the ring; cheap to construct, safe to share behind `&self` since all
/// mutation goes through the inner mutex.
pub struct Diagnostics {
    entries: Mutex<VecDeque<TraceEntry>>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self { entries: Mutex::new(VecDeque::with_capacity(TRACE_CAPACITY)) }
    }
}

impl Diagnostics {
    pub fn record(&self, entry: TraceEntry) {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if guard.len() == TRACE_CAPACITY {
            guard.pop_front();
        }
        guard.push_back(entry);
    }

    /// A point-in-time copy of the ring, oldest first.
    pub fn snapshot(&self) -> Vec<TraceEntry> {
        let guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        guard.iter().cloned().collect()
    }
}
