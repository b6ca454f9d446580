//! Cross-thread synchronous send/reply exchange.
//!
//! A sent record is co-owned by its sender and receiver: it sits on the
//! receiver's inbox, on the receiver's local-dispatching list while the
//! window procedure runs, and on the sender's dispatching outbox until the
//! reply lands. Either side may unlink it (timeout on the sender side,
//! dispatch or teardown on the receiver side), so the record carries an
//! explicit state machine instead of relying on pointer conventions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{error, trace, warn};

use crate::message::{wm, Hwnd, Msg, ThreadId};
use crate::thread::{self, Core, EventWait};
use crate::wake::QsFlags;
use crate::world;
use crate::Queue;

/// How the receiver is to interpret a sent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendClass {
    /// Deliver to the target window procedure.
    Normal,
    /// Call straight into the hook chain processor.
    Hook { hook_id: u32, code: i32 },
    /// Load a hook module into the receiving process.
    InjectModule { module: u32, hook: usize, unload: usize },
}

/// Completion-callback invoked on the sending thread once the receiver has
/// produced a result: `(hwnd, message, context, result)`.
pub type SendAsyncProc = fn(Option<Hwnd>, u32, usize, isize);

/// What a synchronous send ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Success,
    /// Refused before enqueue: dead target, policy rejection or misuse.
    Unsuccessful,
    InsufficientResources,
    Timeout,
    ReceiverDied,
    /// The sending thread was interrupted while waiting.
    Interrupted,
}

/// Ownership state of a sent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordState {
    InInbox,
    Dispatching,
    AwaitingCallback,
    Orphaned,
    Freed,
}

/// What the sender observes through its completion slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    Completed(isize),
    ReceiverDied,
    Interrupted,
}

/// Heap-allocated completion slot shared by sender and receiver. The first
/// signal wins; later ones are ignored, which makes orphaned completions
/// harmless.
#[derive(Default)]
pub(crate) struct CompletionSlot {
    state: Mutex<Option<SendOutcome>>,
    cv: Condvar,
}

impl CompletionSlot {
    pub fn signal(&self, outcome: SendOutcome) {
        let mut state = self.state.lock();
        if state.is_none() {
            *state = Some(outcome);
            self.cv.notify_one();
        }
    }

    pub fn poll(&self) -> Option<SendOutcome> {
        *self.state.lock()
    }

    /// Blocks until signalled or until the deadline passes.
    pub fn wait_deadline(&self, deadline: Option<Instant>) -> Option<SendOutcome> {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = *state {
                return Some(outcome);
            }
            match deadline {
                Some(deadline) => {
                    if self.cv.wait_until(&mut state, deadline).timed_out() {
                        return *state;
                    }
                }
                None => self.cv.wait(&mut state),
            }
        }
    }
}

/// A message sent across threads, together with its reply plumbing.
pub(crate) struct SentRecord {
    pub msg: Msg,
    pub class: SendClass,
    pub sender: Option<ThreadId>,
    pub callback_sender: Option<ThreadId>,
    pub receiver: ThreadId,
    pub completion: Option<Arc<CompletionSlot>>,
    pub callback: Option<SendAsyncProc>,
    pub callback_context: usize,
    pub result: isize,
    pub has_result: bool,
    pub qs_flags: QsFlags,
    /// Payload owned by the record; dropped when the record is retired.
    pub packed: Option<Vec<u8>>,
    pub state: RecordState,
}

pub(crate) type SharedSentRecord = Arc<Mutex<SentRecord>>;

fn unlink(list: &mut Vec<SharedSentRecord>, rec: &SharedSentRecord) -> bool {
    match list.iter().position(|r| Arc::ptr_eq(r, rec)) {
        Some(index) => {
            list.remove(index);
            true
        }
        None => false,
    }
}

/// Signals the sender's queue event so a pumping sender re-checks its slot.
fn nudge(sender: Option<ThreadId>) {
    if let Some(tid) = sender {
        if let Some(shared) = thread::shared_handle(tid) {
            if shared.alive.load(std::sync::atomic::Ordering::SeqCst) {
                shared.wake.signal();
            }
        }
    }
}

impl Queue {
    /// Fire-and-forget cross-thread send, optionally with a completion
    /// callback that later runs on the calling thread.
    ///
    /// Returns false when the target queue is gone or in teardown.
    pub fn send_async(
        target: ThreadId,
        hwnd: Option<Hwnd>,
        message: u32,
        wparam: usize,
        lparam: isize,
        callback: Option<(SendAsyncProc, usize)>,
        packed: Option<Vec<u8>>,
        class: SendClass,
    ) -> bool {
        let sender = thread::current_thread();
        let mut core = thread::user().lock();
        send_async_locked(&mut core, sender, target, hwnd, message, wparam, lparam, callback, packed, class)
    }

    /// Synchronous cross-thread send.
    ///
    /// With `block` set the caller waits only for the reply; otherwise it
    /// keeps pumping its own sent-message inbox while waiting, which is how
    /// two queues sending to each other avoid deadlock.
    pub fn send(
        target: ThreadId,
        hwnd: Option<Hwnd>,
        message: u32,
        wparam: usize,
        lparam: isize,
        timeout: Option<Duration>,
        block: bool,
        class: SendClass,
    ) -> (SendStatus, isize) {
        let Some(sender) = thread::current_thread() else {
            error!("send from a thread without a queue");
            return (SendStatus::Unsuccessful, -1);
        };
        if sender == target {
            error!("synchronous send to own queue");
            return (SendStatus::Unsuccessful, -1);
        }

        // Policy gate for plain window messages. The window snapshot is
        // taken before the lock; the handle is weak either way.
        let window = if class == SendClass::Normal {
            hwnd.and_then(|h| world::world().tree.validate(h))
        } else {
            None
        };

        let mut core = thread::user().lock();

        let receiver_ok = core.thread(target).is_some_and(|pti| !pti.in_destroy());
        let sender_dying = core.thread(sender).is_none_or(|pti| pti.in_destroy());
        if sender_dying || !receiver_ok {
            if sender_dying && receiver_ok {
                // A dying thread still gets to notify its parents, but only
                // fire-and-forget.
                trace!(code = message, "send from dying thread downgraded to async");
                send_async_locked(
                    &mut core, Some(sender), target, hwnd, message, wparam, lparam, None, None, class,
                );
            }
            return (SendStatus::Unsuccessful, -1);
        }

        if class == SendClass::Normal {
            let cross_process = {
                let sender_proc = core.thread(sender).map(|pti| pti.process);
                let receiver_proc = core.thread(target).map(|pti| pti.process);
                sender_proc != receiver_proc
            };
            if cross_process {
                if let Some(info) = &window {
                    match message {
                        // Password text never crosses a process boundary.
                        wm::EM_GETLINE | wm::EM_SETPASSWORDCHAR | wm::WM_GETTEXT
                            if info.password_edit =>
                        {
                            warn!(code = message, "cross-process password read refused");
                            return (SendStatus::Unsuccessful, -1);
                        }
                        wm::WM_NOTIFY => {
                            warn!("cross-process WM_NOTIFY refused");
                            return (SendStatus::Unsuccessful, -1);
                        }
                        _ => {}
                    }
                }
            }
            if message == wm::WM_CREATE || message == wm::WM_NCCREATE {
                warn!(code = message, "creation messages never cross threads");
                return (SendStatus::Unsuccessful, -1);
            }
        }

        let slot = Arc::new(CompletionSlot::default());
        let record: SharedSentRecord = Arc::new(Mutex::new(SentRecord {
            msg: Msg::new(hwnd, message, wparam, lparam),
            class,
            sender: Some(sender),
            callback_sender: None,
            receiver: target,
            completion: Some(slot.clone()),
            callback: None,
            callback_context: 0,
            result: 0,
            has_result: false,
            qs_flags: QsFlags::SENDMESSAGE,
            packed: None,
            state: RecordState::InInbox,
        }));

        // Link into the sender's outbox and the receiver's inbox, then wake
        // the receiver.
        if let Some(pti) = core.thread_mut(sender) {
            pti.dispatching_outbox.push(record.clone());
        }
        if let Some(pti) = core.thread_mut(target) {
            pti.sent_inbox.push_back(record.clone());
            pti.wake(QsFlags::SENDMESSAGE, true);
        }

        let sender_shared = core.thread(sender).map(|pti| pti.shared.clone());
        let deadline = timeout.map(|t| Instant::now() + t);

        let status;
        let mut result = -1;

        if block {
            let outcome = MutexGuard::unlocked(&mut core, || slot.wait_deadline(deadline));
            match outcome {
                Some(SendOutcome::Completed(r)) => {
                    status = SendStatus::Success;
                    result = r;
                }
                Some(SendOutcome::ReceiverDied) => {
                    orphan_sender_side(&mut core, sender, &record);
                    status = SendStatus::ReceiverDied;
                }
                Some(SendOutcome::Interrupted) => {
                    status = SendStatus::Interrupted;
                }
                None => {
                    cancel_after_timeout(&mut core, sender, &record);
                    status = SendStatus::Timeout;
                }
            }
            // Drain whatever piled up on our own inbox while we waited.
            while dispatch_one_sent(&mut core, sender) {}
        } else {
            let shared = match sender_shared {
                Some(shared) => shared,
                None => return (SendStatus::Unsuccessful, -1),
            };
            loop {
                if let Some(outcome) = slot.poll() {
                    match outcome {
                        SendOutcome::Completed(r) => {
                            status = SendStatus::Success;
                            result = r;
                        }
                        SendOutcome::ReceiverDied => {
                            orphan_sender_side(&mut core, sender, &record);
                            status = SendStatus::ReceiverDied;
                        }
                        SendOutcome::Interrupted => status = SendStatus::Interrupted,
                    }
                    break;
                }
                if shared.take_interrupt() {
                    status = SendStatus::Interrupted;
                    break;
                }
                let wait = thread::wait_on_wake_event(
                    &mut core,
                    &shared,
                    deadline.map(|d| d.saturating_duration_since(Instant::now())),
                );
                if wait == EventWait::TimedOut {
                    if slot.poll().is_none() {
                        cancel_after_timeout(&mut core, sender, &record);
                        status = SendStatus::Timeout;
                        break;
                    }
                    continue;
                }
                // Our own queue was woken: pump inbound sent messages, then
                // check the slot again.
                while dispatch_one_sent(&mut core, sender) {}
            }
        }

        (status, result)
    }

    /// True while the calling thread is handling a message another thread
    /// sent it.
    pub fn in_send_message() -> bool {
        let Some(id) = thread::current_thread() else { return false };
        let core = thread::user().lock();
        core.thread(id).is_some_and(|pti| pti.in_send_message)
    }

    /// Early reply from inside a window procedure handling a sent message.
    /// The stored result wins over the procedure's return value.
    pub fn reply(result: isize) -> bool {
        let Some(id) = thread::current_thread() else { return false };
        let core = thread::user().lock();
        let Some(pti) = core.thread(id) else { return false };
        let Some(record) = pti.current_sent.last().cloned() else { return false };
        drop(core);

        let mut rec = record.lock();
        if rec.has_result {
            return false;
        }
        if rec.sender.is_some() || rec.callback.is_some() {
            rec.result = result;
            rec.has_result = true;
        }
        true
    }
}

#[allow(clippy::too_many_arguments)]
fn send_async_locked(
    core: &mut Core,
    sender: Option<ThreadId>,
    target: ThreadId,
    hwnd: Option<Hwnd>,
    message: u32,
    wparam: usize,
    lparam: isize,
    callback: Option<(SendAsyncProc, usize)>,
    packed: Option<Vec<u8>>,
    class: SendClass,
) -> bool {
    let Some(pti) = core.thread_mut(target) else {
        trace!(code = message, "async send to unknown thread dropped");
        return false;
    };
    if pti.in_destroy() {
        trace!(code = message, "async send to dying queue dropped");
        return false;
    }

    let (callback, callback_context) = match callback {
        Some((f, ctx)) => (Some(f), ctx),
        None => (None, 0),
    };
    let record: SharedSentRecord = Arc::new(Mutex::new(SentRecord {
        msg: Msg::new(hwnd, message, wparam, lparam),
        class,
        sender: None,
        callback_sender: sender,
        receiver: target,
        completion: None,
        callback,
        callback_context,
        result: 0,
        has_result: false,
        qs_flags: QsFlags::SENDMESSAGE,
        packed,
        state: RecordState::InInbox,
    }));

    pti.sent_inbox.push_back(record);
    pti.wake(QsFlags::SENDMESSAGE, true);
    true
}

/// Pops and dispatches one record from the thread's sent inbox.
///
/// Returns false when the inbox is empty or the popped record was a
/// callback whose result has not landed yet (it is re-queued).
pub(crate) fn dispatch_one_sent(core: &mut MutexGuard<'_, Core>, id: ThreadId) -> bool {
    let world = world::world();

    let record = {
        let Some(pti) = core.thread_mut(id) else { return false };
        let Some(record) = pti.sent_inbox.pop_front() else { return false };

        // Mark the outer scope as handling a foreign send; re-entered
        // scopes must not clear the flag on their way out.
        {
            let rec = record.lock();
            let foreign = rec.sender.is_some_and(|s| s != id)
                || rec.callback_sender.is_some_and(|s| s != id);
            if foreign {
                pti.in_send_message = true;
            }
        }
        pti.current_sent.push(record.clone());
        pti.local_dispatching.push(record.clone());
        let qs_flags = record.lock().qs_flags;
        pti.clear_bits(qs_flags);
        record
    };

    let (msg, class, callback, callback_sender, has_result, stored_result, context) = {
        let mut rec = record.lock();
        rec.state = RecordState::Dispatching;
        (
            rec.msg,
            rec.class,
            rec.callback,
            rec.callback_sender,
            rec.has_result,
            rec.result,
            rec.callback_context,
        )
    };

    let mut requeued = false;
    let mut result = 0isize;

    match class {
        SendClass::Hook { hook_id, code } => {
            result = MutexGuard::unlocked(core, || {
                world.hooks.direct_hook(hook_id, code, msg.wparam, msg.lparam)
            });
        }
        SendClass::InjectModule { module, hook, unload } => {
            result = MutexGuard::unlocked(core, || {
                world.hooks.load_hook_module(module, hook, unload)
            });
        }
        SendClass::Normal if callback.is_some() && callback_sender == Some(id) => {
            if has_result {
                // Second pass on the original sender: run the callback.
                // Clear it first so a re-entrant dispatch cannot run it
                // twice.
                record.lock().callback = None;
                let cb = callback.expect("checked above");
                MutexGuard::unlocked(core, || {
                    cb(msg.hwnd, msg.message, context, stored_result)
                });
            } else {
                // Raced ahead of the receiver storing the result; put it
                // back and try again later.
                trace!("callback result not stored yet, requeuing");
                if let Some(pti) = core.thread_mut(id) {
                    unlink(&mut pti.local_dispatching, &record);
                    record.lock().state = RecordState::InInbox;
                    pti.sent_inbox.push_back(record.clone());
                }
                requeued = true;
            }
        }
        SendClass::Normal => {
            let hwnd = msg.hwnd.unwrap_or(Hwnd(0));
            result = MutexGuard::unlocked(core, || {
                world.tree.window_proc(hwnd, msg.message, msg.wparam, msg.lparam)
            });
        }
    }

    if !requeued {
        if let Some(pti) = core.thread_mut(id) {
            unlink(&mut pti.local_dispatching, &record);
            pti.time_last = world.clock.tick_count();
        }
        retire_dispatched(core, &record, result);
    }

    // Restore the re-entrancy bookkeeping for this nesting level.
    if let Some(pti) = core.thread_mut(id) {
        if let Some(index) = pti.current_sent.iter().rposition(|r| Arc::ptr_eq(r, &record)) {
            pti.current_sent.remove(index);
        }
        if pti.current_sent.is_empty() {
            pti.in_send_message = false;
        }
    }

    !requeued
}

/// Post-dispatch bookkeeping: route the result back to whoever wants it and
/// retire the record.
fn retire_dispatched(
    core: &mut MutexGuard<'_, Core>,
    record: &SharedSentRecord,
    result: isize,
) {
    let mut rec = record.lock();

    // Callback records make a second trip, back to the thread that sent
    // them.
    if rec.callback.is_some() {
        if let Some(cb_sender) = rec.callback_sender {
            rec.result = result;
            rec.has_result = true;
            rec.state = RecordState::AwaitingCallback;
            drop(rec);
            if let Some(pti) = core.thread_mut(cb_sender) {
                pti.sent_inbox.push_back(record.clone());
                pti.wake(QsFlags::SENDMESSAGE, true);
            } else {
                trace!("callback sender gone, dropping completion");
                record.lock().state = RecordState::Freed;
            }
            return;
        }
        rec.state = RecordState::Freed;
        return;
    }

    // Detach from the sender's outbox unless a timeout already did.
    if let Some(sender) = rec.sender {
        if let Some(sender_pti) = core.thread_mut(sender) {
            unlink(&mut sender_pti.dispatching_outbox, record);
        }
    }

    // An early reply() wins over the window procedure's return value.
    let result = if rec.has_result { rec.result } else { result };

    // Drop any packed payload travelling with the record.
    rec.packed = None;

    let completion = rec.completion.take();
    let sender = rec.sender;
    rec.state = RecordState::Freed;
    drop(rec);

    if let Some(slot) = completion {
        slot.signal(SendOutcome::Completed(result));
        nudge(sender);
    }
}

/// Sender-side cleanup once the receiver is known dead: pull the record off
/// our outbox and make sure nobody touches the completion slot again.
fn orphan_sender_side(core: &mut MutexGuard<'_, Core>, sender: ThreadId, record: &SharedSentRecord) {
    if let Some(pti) = core.thread_mut(sender) {
        unlink(&mut pti.dispatching_outbox, record);
    }
    let mut rec = record.lock();
    rec.completion = None;
    if rec.state != RecordState::Freed {
        rec.state = RecordState::Orphaned;
    }
}

/// Timeout handling per the cancellation matrix: free the record when it
/// never got dispatched, orphan it when it did.
fn cancel_after_timeout(
    core: &mut MutexGuard<'_, Core>,
    sender: ThreadId,
    record: &SharedSentRecord,
) {
    let target = record.lock().receiver;
    let still_queued = match core.thread_mut(target) {
        Some(receiver) => {
            if let Some(index) =
                receiver.sent_inbox.iter().position(|r| Arc::ptr_eq(r, record))
            {
                receiver.sent_inbox.remove(index);
                let qs_flags = record.lock().qs_flags;
                receiver.clear_bits(qs_flags);
                true
            } else {
                false
            }
        }
        None => false,
    };

    if let Some(pti) = core.thread_mut(sender) {
        unlink(&mut pti.dispatching_outbox, record);
    }

    let mut rec = record.lock();
    rec.completion = None;
    rec.state = if still_queued { RecordState::Freed } else { RecordState::Orphaned };
    trace!(queued = still_queued, "send timed out");
}

/// Receiver teardown for a record still on the inbox or mid-dispatch: let
/// the sender pass with receiver-died semantics.
pub(crate) fn abandon_inbound(core: &mut Core, record: &SharedSentRecord) {
    let mut rec = record.lock();
    if rec.state == RecordState::Freed {
        return;
    }
    if let Some(sender) = rec.sender {
        if let Some(sender_pti) = core.thread_mut(sender) {
            unlink(&mut sender_pti.dispatching_outbox, record);
        }
    }
    rec.packed = None;
    let completion = rec.completion.take();
    let sender = rec.sender;
    rec.state = RecordState::Freed;
    drop(rec);

    if let Some(slot) = completion {
        slot.signal(SendOutcome::ReceiverDied);
        nudge(sender);
    }
}

/// Sender teardown for records it is still waiting on: the receiver owns
/// them now; just make sure its dispatch cannot reach freed sender state.
pub(crate) fn orphan_outbound(record: &SharedSentRecord) {
    let mut rec = record.lock();
    rec.completion = None;
    rec.sender = None;
    if rec.state == RecordState::InInbox || rec.state == RecordState::Dispatching {
        rec.state = RecordState::Orphaned;
    }
}

/// Wakes every pending send of the thread with an interrupted outcome.
pub(crate) fn interrupt_outbox(core: &mut Core, id: ThreadId) {
    let Some(pti) = core.thread_mut(id) else { return };
    for record in &pti.dispatching_outbox {
        let rec = record.lock();
        if let Some(slot) = &rec.completion {
            slot.signal(SendOutcome::Interrupted);
        }
    }
}
