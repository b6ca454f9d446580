//! Fire-and-forget message posting and the mouse-move coalescing rules.

use parking_lot::MutexGuard;
use tracing::{error, trace};

use crate::message::{pack_point, wm, Hwnd, Msg, ThreadId};
use crate::thread::{self, Core};
use crate::wake::{QsFlags, QueueFlags};
use crate::world;
use crate::Queue;

impl Queue {
    /// Appends a message to the target thread's posted (or hardware) FIFO
    /// and wakes it.
    ///
    /// Posts to a queue in teardown are silently dropped. A zero `time`
    /// stamp is filled in from the monotonic tick source.
    pub fn post(
        target: ThreadId,
        msg: Msg,
        hardware: bool,
        wake_mask: QsFlags,
        queued_event: u32,
        extra: isize,
    ) {
        let mut core = thread::user().lock();
        post_locked(&mut core, target, msg, hardware, wake_mask, queued_event, extra);
    }

    /// Requests the target thread's message loop to quit. No record is
    /// queued; the peek path materialises WM_QUIT once both FIFOs drain.
    pub fn post_quit(target: ThreadId, exit_code: u32) {
        let mut core = thread::user().lock();
        let Some(pti) = core.thread_mut(target) else { return };
        pti.quit_posted = true;
        pti.exit_code = exit_code;
        pti.wake(QsFlags::POSTMESSAGE | QsFlags::ALLPOSTMESSAGE, true);
    }

    /// Purges a destroyed window's messages from its owning queue: posted
    /// records are freed (promoting an unseen WM_QUIT), pending sent
    /// records let their senders pass.
    pub fn remove_window_messages(hwnd: Hwnd) {
        let Some(info) = world::world().tree.validate(hwnd) else { return };
        let mut core = thread::user().lock();

        let Some(pti) = core.thread_mut(info.thread) else { return };

        let mut removed = Vec::new();
        let mut index = 0;
        while index < pti.posted.len() {
            if pti.posted[index].msg.hwnd == Some(hwnd) {
                let rec = pti.posted.remove(index).expect("index in bounds");
                if rec.msg.message == wm::WM_QUIT && !pti.quit_posted {
                    pti.quit_posted = true;
                    pti.exit_code = rec.msg.wparam as u32;
                }
                let qs_flags = rec.qs_flags;
                pti.clear_bits(qs_flags);
                removed.push(rec);
            } else {
                index += 1;
            }
        }
        for rec in removed {
            core.pool.release(rec);
        }

        let Some(pti) = core.thread_mut(info.thread) else { return };
        let mut sent = Vec::new();
        let mut i = 0;
        while i < pti.sent_inbox.len() {
            if pti.sent_inbox[i].lock().msg.hwnd == Some(hwnd) {
                let record = pti.sent_inbox.remove(i).expect("index in bounds");
                let qs_flags = record.lock().qs_flags;
                pti.clear_bits(qs_flags);
                sent.push(record);
            } else {
                i += 1;
            }
        }
        for record in sent {
            trace!("waking sender of a message removed with its window");
            crate::send::abandon_inbound(&mut core, &record);
        }
    }
}

pub(crate) fn post_locked(
    core: &mut Core,
    target: ThreadId,
    mut msg: Msg,
    hardware: bool,
    wake_mask: QsFlags,
    queued_event: u32,
    extra: isize,
) {
    if msg.time == 0 {
        msg.time = world::tick_count();
    }
    let Some(pti) = core.thread_mut(target) else {
        error!(code = msg.message, "post to unknown thread dropped");
        return;
    };
    if pti.in_destroy() {
        error!(code = msg.message, "post to dying queue dropped");
        return;
    }

    let mut wake_mask = wake_mask;
    if msg.message == wm::WM_HOTKEY {
        wake_mask |= QsFlags::HOTKEY;
    }

    let mut rec = core.pool.acquire(&msg);
    rec.extra_info = extra;
    rec.qs_flags = wake_mask;
    rec.queued_event = queued_event;
    rec.origin = Some(target);

    let pti = core.thread_mut(target).expect("checked above");
    if hardware {
        pti.hardware.push_back(rec);
    } else {
        pti.posted.push_back(rec);
    }
    pti.wake(wake_mask, true);
}

/// Posts the pending move, or refreshes the one still waiting at the tail
/// of the hardware list. The queue never holds more than one mouse move.
pub(crate) fn post_mouse_move(core: &mut Core, target: ThreadId, msg: Msg, extra: isize) {
    if let Some(pti) = core.thread_mut(target) {
        if let Some(tail) = pti.hardware.back_mut() {
            if tail.msg.message == wm::WM_MOUSEMOVE {
                // Overwrite the queued move with the fresher data.
                tail.msg = msg;
                tail.extra_info = extra;
                pti.wake(QsFlags::MOUSEMOVE, true);
                return;
            }
        }
    }
    post_locked(core, target, msg, true, QsFlags::MOUSEMOVE, 0, extra);
}

/// Materialises the deferred mouse move ahead of whatever is about to be
/// posted, keeping move-before-click ordering intact.
pub(crate) fn coalesce_mouse_move(core: &mut Core, target: ThreadId) {
    if core.mouse_move_stamp == 0 {
        core.mouse_move_stamp = world::tick_count();
    }

    let msg = Msg {
        hwnd: None,
        message: wm::WM_MOUSEMOVE,
        wparam: 0,
        lparam: pack_point(core.cursor_pos),
        time: core.mouse_move_stamp,
        pt: core.cursor_pos,
    };
    let extra = core.mouse_move_extra;
    post_mouse_move(core, target, msg, extra);

    core.mouse_move_stamp = 0;
    if let Some(pti) = core.thread_mut(target) {
        pti.flags.remove(QueueFlags::MOUSE_MOVED);
    }
}

/// Posts a message addressed at a window, routed to its owning thread.
pub(crate) fn post_to_window(
    core: &mut MutexGuard<'_, Core>,
    hwnd: Hwnd,
    message: u32,
    wparam: usize,
    lparam: isize,
) {
    let info = MutexGuard::unlocked(core, || world::world().tree.validate(hwnd));
    let Some(info) = info else { return };
    let msg = Msg::new(Some(hwnd), message, wparam, lparam);
    post_locked(core, info.thread, msg, false, QsFlags::POSTMESSAGE, 0, 0);
}
