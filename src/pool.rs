//! Recycling allocator for queue message records.

use tracing::error;

use crate::message::{Msg, ThreadId};
use crate::wake::QsFlags;

/// How many free records the pool keeps around before letting the allocator
/// reclaim them.
const POOL_DEPTH: usize = 256;

/// One posted or hardware message held on a queue FIFO.
#[derive(Debug, Default)]
pub(crate) struct MessageRecord {
    pub msg: Msg,
    /// Device-supplied extra information travelling with the message.
    pub extra_info: isize,
    /// Which wake categories this record contributed to.
    pub qs_flags: QsFlags,
    /// Queued-event marker; non-zero records may own ancillary payloads
    /// that teardown has to release.
    pub queued_event: u32,
    /// Originating thread. `None` doubles as the freed sentinel.
    pub origin: Option<ThreadId>,
}

impl MessageRecord {
    /// Stable identity cookie used by the peek re-entrancy guard.
    pub fn cookie(&self) -> usize {
        self as *const MessageRecord as usize
    }
}

/// Fixed-depth slab of message records, recycled on free.
#[derive(Default)]
pub(crate) struct MessagePool {
    free: Vec<Box<MessageRecord>>,
}

impl MessagePool {
    /// Returns a zeroed record, reusing a previously released one if any.
    pub fn acquire(&mut self, msg: &Msg) -> Box<MessageRecord> {
        let mut rec = match self.free.pop() {
            Some(mut rec) => {
                *rec = MessageRecord::default();
                rec
            }
            None => Box::default(),
        };
        rec.msg = *msg;
        rec
    }

    /// Returns a record to the pool. A record whose origin is already
    /// cleared was freed before; log and continue rather than corrupt the
    /// free list.
    pub fn release(&mut self, mut rec: Box<MessageRecord>) {
        if rec.origin.is_none() {
            error!("double free of message record {:#x}", rec.cookie());
            return;
        }
        rec.origin = None;
        if self.free.len() < POOL_DEPTH {
            self.free.push(rec);
        }
    }
}
