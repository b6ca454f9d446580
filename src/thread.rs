//! Per-thread queue state, the process-wide subsystem root and queue
//! lifecycle.
//!
//! Every operation that touches queue lists or cross-queue pointers runs
//! under one global exclusive lock (the "user lock"). Waits and window
//! procedure call-outs release the lock and re-validate on return.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use tracing::{error, trace};

use crate::keystate::KeyStateTable;
use crate::message::{Hwnd, Msg, Point, ThreadId};
use crate::pool::{MessagePool, MessageRecord};
use crate::send::SharedSentRecord;
use crate::wake::{QsFlags, QueueFlags, WakeCounts};
use crate::world::Settings;
use crate::{Queue, world};

// --- Global runtime state ---

/// Monotonic source of queue thread ids; ids are never reused.
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Handles that must stay reachable without the user lock: one entry per
/// live queue thread.
static THREADS: Lazy<DashMap<ThreadId, Arc<ThreadShared>>> = Lazy::new(DashMap::new);

/// The user lock and everything under it.
static USER: Lazy<Mutex<Core>> = Lazy::new(|| Mutex::new(Core::new()));

thread_local! {
    static CURRENT: std::cell::Cell<Option<ThreadId>> = const { std::cell::Cell::new(None) };
}

pub(crate) fn user() -> &'static Mutex<Core> {
    &USER
}

pub(crate) fn shared_handle(tid: ThreadId) -> Option<Arc<ThreadShared>> {
    THREADS.get(&tid).map(|entry| entry.value().clone())
}

pub(crate) fn current_thread() -> Option<ThreadId> {
    CURRENT.with(|cell| cell.get())
}

/// Outcome of a wait on a [`QueueEvent`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum EventWait {
    Signaled,
    TimedOut,
}

/// Auto-reset notification event: a successful wait consumes the signal.
#[derive(Default)]
pub(crate) struct QueueEvent {
    signaled: Mutex<bool>,
    cv: Condvar,
}

impl QueueEvent {
    pub fn signal(&self) {
        *self.signaled.lock() = true;
        self.cv.notify_one();
    }

    pub fn wait_deadline(&self, deadline: Option<Instant>) -> EventWait {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            match deadline {
                Some(deadline) => {
                    if self.cv.wait_until(&mut signaled, deadline).timed_out() && !*signaled {
                        return EventWait::TimedOut;
                    }
                }
                None => self.cv.wait(&mut signaled),
            }
        }
        *signaled = false;
        EventWait::Signaled
    }
}

/// The slice of per-thread state touched from outside the user lock.
pub(crate) struct ThreadShared {
    /// The thread's idle/wake event.
    pub wake: QueueEvent,
    /// Cleared when the queue enters teardown.
    pub alive: AtomicBool,
    /// Set when the thread is asked to abandon its waits.
    pub interrupt: AtomicBool,
}

impl ThreadShared {
    fn new() -> Arc<ThreadShared> {
        Arc::new(ThreadShared {
            wake: QueueEvent::default(),
            alive: AtomicBool::new(true),
            interrupt: AtomicBool::new(false),
        })
    }

    pub fn take_interrupt(&self) -> bool {
        self.interrupt.swap(false, Ordering::SeqCst)
    }
}

/// Saved double-click candidate.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct DblClk {
    pub msg: Msg,
}

/// The per-thread queue root.
pub(crate) struct ThreadInfo {
    pub id: ThreadId,
    pub process: u64,
    pub shared: Arc<ThreadShared>,
    /// Re-entrant attachment counter; teardown happens when it drains.
    pub attach_count: u32,

    // Message lists.
    pub posted: VecDeque<Box<MessageRecord>>,
    pub hardware: VecDeque<Box<MessageRecord>>,
    pub sent_inbox: VecDeque<SharedSentRecord>,
    pub local_dispatching: Vec<SharedSentRecord>,
    pub dispatching_outbox: Vec<SharedSentRecord>,

    // Wake accounting.
    pub wake_bits: QsFlags,
    pub change_bits: QsFlags,
    pub counts: WakeCounts,
    pub timers_ready: u32,
    pub paints_ready: u32,

    // Input state.
    pub key_state: KeyStateTable,
    pub cursor: Option<Arc<crate::world::Cursor>>,
    pub cursor_level: i32,
    pub dbl_clk: DblClk,
    pub extra_info: isize,
    // Consumed by the character translation layer alongside the IME.
    #[allow(dead_code)]
    pub injected_char: u16,
    pub ime_disabled: bool,

    // State windows.
    pub capture: Option<Hwnd>,
    pub active: Option<Hwnd>,
    pub focus: Option<Hwnd>,
    pub menu_owner: Option<Hwnd>,
    pub move_size: Option<Hwnd>,
    pub caret: Option<Hwnd>,

    pub flags: QueueFlags,
    /// Pins the hardware list to one thread while the cooker may re-enter.
    pub sys_lock: Option<ThreadId>,
    /// Identity cookie of the hardware record currently being cooked.
    pub id_sys_peek: usize,
    /// Stack of sent records being dispatched on this thread.
    pub current_sent: Vec<SharedSentRecord>,
    pub in_send_message: bool,

    pub quit_posted: bool,
    pub exit_code: u32,
    /// Tick of the last dispatched message, for hang detection.
    pub time_last: u32,
}

impl ThreadInfo {
    fn new(id: ThreadId, process: u64, shared: Arc<ThreadShared>, key_state: KeyStateTable) -> Self {
        ThreadInfo {
            id,
            process,
            shared,
            attach_count: 1,
            posted: VecDeque::new(),
            hardware: VecDeque::new(),
            sent_inbox: VecDeque::new(),
            local_dispatching: Vec::new(),
            dispatching_outbox: Vec::new(),
            wake_bits: QsFlags::empty(),
            change_bits: QsFlags::empty(),
            counts: WakeCounts::default(),
            timers_ready: 0,
            paints_ready: 0,
            key_state,
            cursor: None,
            cursor_level: 0,
            dbl_clk: DblClk::default(),
            extra_info: 0,
            injected_char: 0,
            ime_disabled: false,
            capture: None,
            active: None,
            focus: None,
            menu_owner: None,
            move_size: None,
            caret: None,
            flags: QueueFlags::empty(),
            sys_lock: None,
            id_sys_peek: 0,
            current_sent: Vec::new(),
            in_send_message: false,
            quit_posted: false,
            exit_code: 0,
            time_last: 0,
        }
    }

    pub fn in_destroy(&self) -> bool {
        self.flags.contains(QueueFlags::IN_DESTROY)
    }

    /// Raises wake and change bits for `mask`, bumps the per-category
    /// counters and optionally signals the thread's wake event.
    pub fn wake(&mut self, mask: QsFlags, signal: bool) {
        if self.in_destroy() {
            error!(thread = self.id.as_u64(), "waking a queue that is in teardown");
        }
        self.wake_bits |= mask;
        self.change_bits |= mask;
        self.counts.raise(mask);
        if signal {
            self.shared.wake.signal();
        }
    }

    /// Drains counters for `mask`; categories whose count reaches zero lose
    /// their summary bits.
    pub fn clear_bits(&mut self, mask: QsFlags) {
        let clear = self.counts.drain(mask, &mut self.timers_ready, &mut self.paints_ready);
        self.wake_bits &= !clear;
        self.change_bits &= !clear;
    }
}

/// Mouse-leave / hover tracking shared across queues.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TrackState {
    pub window: Option<Hwnd>,
    pub hit: i32,
    pub leave_wanted: bool,
    pub hover_wanted: bool,
    pub hover_rect: Rect,
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn centered_on(pt: Point, width: i32, height: i32) -> Rect {
        Rect {
            left: pt.x - width / 2,
            top: pt.y - height / 2,
            right: pt.x + width / 2,
            bottom: pt.y + height / 2,
        }
    }

    pub fn contains(&self, pt: Point) -> bool {
        pt.x >= self.left && pt.x < self.right && pt.y >= self.top && pt.y < self.bottom
    }
}

/// Everything under the user lock.
pub(crate) struct Core {
    pub threads: HashMap<ThreadId, ThreadInfo>,
    pub pool: MessagePool,
    pub settings: Settings,

    // Process-wide cursor state.
    pub cursor_pos: Point,
    pub cursor_owner: Option<ThreadId>,
    pub showing_cursor: i32,
    pub current_cursor: Option<Arc<crate::world::Cursor>>,

    pub foreground: Option<ThreadId>,

    // Deferred mouse move bookkeeping.
    pub mouse_move_extra: isize,
    pub mouse_move_stamp: u32,

    pub track: TrackState,
    pub click_lock_time: u32,
    pub click_lock_active: bool,

    /// Snapshot new queues copy their key state from.
    pub async_key_state: KeyStateTable,

    /// Stock arrow shape queues fall back to when the pointer crosses a
    /// queue boundary.
    pub arrow_cursor: Arc<crate::world::Cursor>,
}

impl Core {
    fn new() -> Core {
        Core {
            threads: HashMap::new(),
            pool: MessagePool::default(),
            settings: Settings::default(),
            cursor_pos: Point::ZERO,
            cursor_owner: None,
            showing_cursor: 0,
            current_cursor: None,
            foreground: None,
            mouse_move_extra: 0,
            mouse_move_stamp: 0,
            track: TrackState::default(),
            click_lock_time: 0,
            click_lock_active: false,
            async_key_state: KeyStateTable::default(),
            arrow_cursor: Arc::new(crate::world::Cursor::new(0)),
        }
    }

    pub fn thread(&self, tid: ThreadId) -> Option<&ThreadInfo> {
        self.threads.get(&tid)
    }

    pub fn thread_mut(&mut self, tid: ThreadId) -> Option<&mut ThreadInfo> {
        self.threads.get_mut(&tid)
    }
}

/// Binds the calling thread to its queue for as long as the value lives.
///
/// Attachments nest: re-attaching on an already-bound thread bumps the
/// attachment counter, and the queue is torn down when the last attachment
/// is dropped. The value is tied to the attaching thread and cannot be
/// sent elsewhere.
pub struct QueueAttachment {
    id: ThreadId,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl QueueAttachment {
    pub fn id(&self) -> ThreadId {
        self.id
    }
}

impl Drop for QueueAttachment {
    fn drop(&mut self) {
        detach(self.id);
    }
}

/// One of the six per-queue state window slots.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StateWindow {
    Capture,
    Active,
    Focus,
    MenuOwner,
    MoveSize,
    Caret,
}

impl Queue {
    /// Binds the calling thread to the subsystem, creating its queue on
    /// first entry.
    pub fn attach() -> QueueAttachment {
        Self::attach_as(std::process::id() as u64)
    }

    /// Like [`attach`](Self::attach) with an explicit process identity,
    /// which the cross-process send policy checks compare.
    pub fn attach_as(process: u64) -> QueueAttachment {
        if let Some(id) = current_thread() {
            let mut core = user().lock();
            if let Some(pti) = core.thread_mut(id) {
                pti.attach_count += 1;
                return QueueAttachment { id, _not_send: std::marker::PhantomData };
            }
        }

        let id = ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::SeqCst));
        let shared = ThreadShared::new();
        THREADS.insert(id, shared.clone());

        let mut core = user().lock();
        let key_state = core.async_key_state.clone();
        let mut pti = ThreadInfo::new(id, process, shared, key_state);
        pti.cursor = Some(core.arrow_cursor.clone());
        core.threads.insert(id, pti);
        drop(core);

        CURRENT.with(|cell| cell.set(Some(id)));
        trace!(thread = id.as_u64(), "queue attached");
        QueueAttachment { id, _not_send: std::marker::PhantomData }
    }

    /// The queue thread id of the calling thread, if attached.
    pub fn current() -> Option<ThreadId> {
        current_thread()
    }

    /// Asks a thread to abandon its current wait. Blocking sends and
    /// message waits observe this as `Interrupted`.
    pub fn interrupt(target: ThreadId) {
        let mut core = user().lock();
        crate::send::interrupt_outbox(&mut core, target);
        drop(core);
        if let Some(shared) = shared_handle(target) {
            shared.interrupt.store(true, Ordering::SeqCst);
            shared.wake.signal();
        }
    }

    /// Updates one state window slot and returns the previous occupant.
    /// Handles are validated; stale handles become `None`.
    pub fn set_state_window(kind: StateWindow, hwnd: Option<Hwnd>) -> Option<Hwnd> {
        let Some(id) = current_thread() else { return None };
        let validated = hwnd.and_then(|h| {
            let tree = world::world().tree;
            tree.validate(h).map(|info| info.hwnd)
        });
        // Menu owner and move-size track raw handles, the rest validate.
        let mut core = user().lock();
        let pti = core.thread_mut(id)?;
        let slot = match kind {
            StateWindow::Capture => &mut pti.capture,
            StateWindow::Active => &mut pti.active,
            StateWindow::Focus => &mut pti.focus,
            StateWindow::MenuOwner => &mut pti.menu_owner,
            StateWindow::MoveSize => &mut pti.move_size,
            StateWindow::Caret => &mut pti.caret,
        };
        match kind {
            StateWindow::MenuOwner | StateWindow::MoveSize | StateWindow::Caret => {
                std::mem::replace(slot, hwnd)
            }
            _ => std::mem::replace(slot, validated),
        }
    }

    /// Reads the wake/change bit summary of the calling thread's queue:
    /// `(wake, change)`.
    pub fn queue_status() -> (QsFlags, QsFlags) {
        let Some(id) = current_thread() else {
            return (QsFlags::empty(), QsFlags::empty())
        };
        let core = user().lock();
        match core.thread(id) {
            Some(pti) => (pti.wake_bits, pti.change_bits),
            None => (QsFlags::empty(), QsFlags::empty()),
        }
    }

    /// Swaps the queue's extra-info slot, returning the previous value.
    pub fn set_message_extra_info(extra: isize) -> isize {
        let Some(id) = current_thread() else { return 0 };
        let mut core = user().lock();
        match core.thread_mut(id) {
            Some(pti) => std::mem::replace(&mut pti.extra_info, extra),
            None => 0,
        }
    }

    pub fn message_extra_info() -> isize {
        let Some(id) = current_thread() else { return 0 };
        let core = user().lock();
        core.thread(id).map(|pti| pti.extra_info).unwrap_or(0)
    }

    /// Marks one more paint ready on the target queue and wakes it.
    pub fn inc_paint_count(target: ThreadId) {
        let mut core = user().lock();
        if let Some(pti) = core.thread_mut(target) {
            pti.paints_ready += 1;
            pti.wake(QsFlags::PAINT, true);
        }
    }

    /// Retires one ready paint on the target queue.
    pub fn dec_paint_count(target: ThreadId) {
        let mut core = user().lock();
        if let Some(pti) = core.thread_mut(target) {
            pti.clear_bits(QsFlags::PAINT);
        }
    }

    /// Marks one more timer ready on the target queue and wakes it.
    pub fn inc_timer_count(target: ThreadId) {
        let mut core = user().lock();
        if let Some(pti) = core.thread_mut(target) {
            pti.timers_ready += 1;
            pti.wake(QsFlags::TIMER, true);
        }
    }

    /// A queue is hung when nothing was dispatched on it for longer than
    /// the configured threshold.
    pub fn is_hung(target: ThreadId) -> bool {
        let now = world::tick_count();
        let core = user().lock();
        let threshold = core.settings.hung_threshold_ms;
        match core.thread(target) {
            Some(pti) => now.wrapping_sub(pti.time_last) > threshold,
            None => false,
        }
    }

    /// Mutates the system parameters under the user lock.
    pub fn update_settings(update: impl FnOnce(&mut Settings)) {
        let mut core = user().lock();
        update(&mut core.settings);
    }

    pub fn settings() -> Settings {
        user().lock().settings
    }

    /// Moves the process-wide cursor position; normally driven by the input
    /// entry points.
    pub fn set_cursor_pos(pt: Point) {
        user().lock().cursor_pos = pt;
    }
}

/// Releases one attachment; the last one tears the queue down.
fn detach(id: ThreadId) {
    let mut core = user().lock();
    let Some(pti) = core.thread_mut(id) else { return };
    pti.attach_count -= 1;
    if pti.attach_count > 0 {
        if pti.sys_lock == Some(id) {
            pti.sys_lock = None;
        }
        return;
    }
    destroy_queue(&mut core, id);
    drop(core);

    CURRENT.with(|cell| cell.set(None));
    THREADS.remove(&id);
}

/// Queue teardown. Drains all four lists with the termination protocol so
/// no sender stays blocked on a dead receiver, then releases cursor and
/// global slots.
fn destroy_queue(core: &mut Core, id: ThreadId) {
    let Some(pti) = core.thread_mut(id) else { return };
    pti.flags |= QueueFlags::IN_DESTROY;
    trace!(thread = id.as_u64(), "queue teardown");

    // Posted and hardware records go back to the pool. Records flagged
    // with a queued-event marker carried ancillary payloads; their storage
    // is released with the record.
    let posted: Vec<_> = pti.posted.drain(..).collect();
    let hardware: Vec<_> = pti.hardware.drain(..).collect();

    // Pending inbound sends: the receiver is going away, let every sender
    // pass with receiver-died semantics.
    let inbox: Vec<_> = pti.sent_inbox.drain(..).collect();
    let dispatching: Vec<_> = std::mem::take(&mut pti.local_dispatching);
    let outbox: Vec<_> = std::mem::take(&mut pti.dispatching_outbox);

    pti.wake_bits = QsFlags::empty();
    pti.change_bits = QsFlags::empty();
    pti.counts.reset();
    pti.timers_ready = 0;
    pti.paints_ready = 0;
    pti.quit_posted = false;

    let cursor = pti.cursor.take();
    pti.shared.alive.store(false, Ordering::SeqCst);

    for rec in posted.into_iter().chain(hardware) {
        if rec.queued_event != 0 {
            trace!(event = rec.queued_event, "releasing queued-event record");
        }
        core.pool.release(rec);
    }

    for rec in inbox.into_iter().chain(dispatching) {
        crate::send::abandon_inbound(core, &rec);
    }

    // Outbound records are owned by their receivers now; just make sure a
    // late dispatch finds the sender gone and skips signalling.
    for rec in outbox {
        crate::send::orphan_outbound(&rec);
    }

    if core.foreground == Some(id) {
        core.foreground = None;
    }
    if core.cursor_owner == Some(id) {
        core.cursor_owner = None;
    }

    if let Some(cursor) = cursor {
        let owned = core
            .current_cursor
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &cursor));
        if owned {
            // Switch the rendered cursor away before dropping the object.
            world::world().renderer.move_pointer(Point::new(-1, -1));
            core.current_cursor = None;
        }
    }

    core.threads.remove(&id);
}

/// Drops the user lock, waits on the calling thread's wake event, then
/// reacquires. Returns what ended the wait.
pub(crate) fn wait_on_wake_event(
    guard: &mut parking_lot::MutexGuard<'_, Core>,
    shared: &ThreadShared,
    timeout: Option<Duration>,
) -> EventWait {
    let deadline = timeout.map(|t| Instant::now() + t);
    parking_lot::MutexGuard::unlocked(guard, || shared.wake.wait_deadline(deadline))
}
