//! Completion signalling between the engine and hardware drivers.
//!
//! A clocked-line write is started by the engine and finished by the driver, usually from
//! its own interrupt. How the engine waits for the finish depends on where it runs:
//!
//! - in thread context it blocks on a [`Semaphore`] with a timeout,
//! - in interrupt context it must not block, so it either polls a [`PollStatus`]
//!   or hands over a callback and moves on.
//!
//! [`WriteOperation`] bundles the chosen strategy so drivers only ever call
//! [`WriteOperation::complete`], during `write` or any time after it.
use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::HwError;

/// Number of spins an interrupt-context poll waits for completion before giving up.
pub const POLL_SPIN_LIMIT: u32 = 1_000_000;

/// Execution context of a command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExecContext {
    /// Normal task context, may block.
    Thread,
    /// Interrupt context, must never block.
    Interrupt,
}

impl ExecContext {
    pub fn in_isr(&self) -> bool {
        *self == ExecContext::Interrupt
    }
}

/// How writes issued from interrupt context wait for completion.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum IsrWriteMode {
    /// Spin on a completion flag.
    #[default]
    Poll,
    /// Do not wait, the completion is only logged.
    FireAndForget,
}

/// Counting semaphore with timed waits.
#[derive(Debug, Default)]
pub struct Semaphore {
    count: Mutex<u32>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(initial: u32) -> Semaphore {
        Semaphore {
            count: Mutex::new(initial),
            available: Condvar::new(),
        }
    }

    pub fn post(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_add(1);
        self.available.notify_one();
    }

    /// Takes one unit, waiting at most `timeout`. Returns false on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.wait_until(Instant::now() + timeout)
    }

    /// Takes one unit, waiting until `deadline`. Returns false on timeout.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut count = self.count.lock();
        while *count == 0 {
            if self.available.wait_until(&mut count, deadline).timed_out() {
                break;
            }
        }
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Drops units left over from completions nobody waited for.
    pub fn drain(&self) {
        *self.count.lock() = 0;
    }
}

const PENDING: u32 = 0;
const DONE: u32 = 1;
const FAILED_TIMEOUT: u32 = 2;
const FAILED_BUSY: u32 = 3;
const FAILED_UNSUPPORTED: u32 = 4;
const FAILED: u32 = 5;

const STATE_BITS: u32 = 8;
const STATE_MASK: u32 = (1 << STATE_BITS) - 1;
const GENERATION_MASK: u32 = u32::MAX >> STATE_BITS;

fn pack(generation: u32, state: u32) -> u32 {
    (generation << STATE_BITS) | state
}

/// Lock-free completion flag of the current write.
///
/// Every write starts a new generation. A completion only lands if it carries the
/// generation that is still current, so a write finishing after its waiter gave up
/// cannot be mistaken for the completion of a later write.
#[derive(Debug, Default)]
pub struct PollStatus(AtomicU32);

impl PollStatus {
    pub fn new() -> PollStatus {
        PollStatus(AtomicU32::new(pack(0, PENDING)))
    }

    /// Starts the next generation in the pending state and returns it.
    pub fn begin(&self) -> u32 {
        let generation = ((self.0.load(Ordering::Acquire) >> STATE_BITS) + 1) & GENERATION_MASK;
        self.0.store(pack(generation, PENDING), Ordering::Release);
        generation
    }

    /// Records the result of `generation`. Returns false if that write is no longer
    /// current or was already finished.
    pub fn finish(&self, generation: u32, result: Result<(), HwError>) -> bool {
        let state = match result {
            Ok(()) => DONE,
            Err(HwError::Timeout) => FAILED_TIMEOUT,
            Err(HwError::Busy) => FAILED_BUSY,
            Err(HwError::Unsupported) => FAILED_UNSUPPORTED,
            Err(HwError::Failed) => FAILED,
        };
        self.0
            .compare_exchange(
                pack(generation, PENDING),
                pack(generation, state),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// The finished result of `generation`, or `None` while it is pending.
    pub fn result(&self, generation: u32) -> Option<Result<(), HwError>> {
        let value = self.0.load(Ordering::Acquire);
        if value >> STATE_BITS != generation {
            return None;
        }
        match value & STATE_MASK {
            PENDING => None,
            DONE => Some(Ok(())),
            FAILED_TIMEOUT => Some(Err(HwError::Timeout)),
            FAILED_BUSY => Some(Err(HwError::Busy)),
            FAILED_UNSUPPORTED => Some(Err(HwError::Unsupported)),
            _ => Some(Err(HwError::Failed)),
        }
    }
}

/// Completion primitives owned by the engine, one set per clocked line.
#[derive(Debug, Default)]
pub struct WriteSync {
    pub semaphore: Semaphore,
    pub status: PollStatus,
}

impl WriteSync {
    pub fn new() -> WriteSync {
        WriteSync::default()
    }
}

/// Callback invoked on completion of a fire-and-forget write.
/// The flag tells whether it runs in interrupt context.
pub type WriteCallback = fn(bool, Result<(), HwError>);

#[derive(Copy, Clone, Debug)]
enum Strategy {
    Block(Duration),
    Poll,
    Callback(WriteCallback),
}

/// A started write and the way its completion is awaited.
///
/// Drivers that finish the write after [`ClockedLine::write`](crate::ClockedLine::write)
/// returned keep a clone and call [`WriteOperation::complete`] on it later, for example
/// from a DMA interrupt. Cloning never allocates, and completing an interrupt-context
/// operation takes no lock.
#[derive(Clone, Debug)]
pub struct WriteOperation {
    sync: Arc<WriteSync>,
    generation: u32,
    strategy: Strategy,
}

impl WriteOperation {
    fn start(sync: &Arc<WriteSync>, strategy: Strategy) -> WriteOperation {
        let generation = sync.status.begin();
        WriteOperation {
            sync: Arc::clone(sync),
            generation,
            strategy,
        }
    }

    /// Thread context: block on the semaphore for at most `timeout`.
    pub fn blocking(sync: &Arc<WriteSync>, timeout: Duration) -> WriteOperation {
        sync.semaphore.drain();
        WriteOperation::start(sync, Strategy::Block(timeout))
    }

    /// Interrupt context: spin on the completion flag.
    pub fn polling(sync: &Arc<WriteSync>) -> WriteOperation {
        WriteOperation::start(sync, Strategy::Poll)
    }

    /// Interrupt context: do not wait, report through `callback`.
    pub fn callback(sync: &Arc<WriteSync>, callback: WriteCallback) -> WriteOperation {
        WriteOperation::start(sync, Strategy::Callback(callback))
    }

    /// Called by the driver once the write has finished. Only the first completion of
    /// the current write counts.
    pub fn complete(&self, in_isr: bool, result: Result<(), HwError>) {
        let current = self.sync.status.finish(self.generation, result);
        match self.strategy {
            Strategy::Block(_) if current => self.sync.semaphore.post(),
            Strategy::Block(_) | Strategy::Poll => {}
            Strategy::Callback(callback) => callback(in_isr, result),
        }
        if !current {
            log::trace!("Ignoring completion of stale write {}", self.generation);
        }
    }

    /// Called by the engine after the write was started.
    pub fn wait(&self) -> Result<(), HwError> {
        match self.strategy {
            Strategy::Block(timeout) => {
                let deadline = Instant::now() + timeout;
                // A unit posted by a write that finished while the next one started is
                // skipped by checking the generation.
                while self.sync.semaphore.wait_until(deadline) {
                    if let Some(result) = self.sync.status.result(self.generation) {
                        return result;
                    }
                }
                Err(HwError::Timeout)
            }
            Strategy::Poll => {
                for _ in 0..POLL_SPIN_LIMIT {
                    if let Some(result) = self.sync.status.result(self.generation) {
                        return result;
                    }
                    hint::spin_loop();
                }
                Err(HwError::Timeout)
            }
            Strategy::Callback(_) => Ok(()),
        }
    }
}
