//! Filtered message lookup and the wait handshake.

use parking_lot::MutexGuard;
use tracing::error;

use crate::message::{wm, Hwnd, Msg, ThreadId};
use crate::thread::{self, Core};
use crate::wake::QsFlags;
use crate::world;
use crate::{cooker, send, Queue};

/// Which windows a peek is interested in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WindowFilter {
    /// Any window of the thread, plus thread messages without a window.
    Any,
    /// Only thread messages without a window.
    BottomOnly,
    /// Only messages addressed at one window.
    Window(Hwnd),
}

impl WindowFilter {
    fn admits(self, hwnd: Option<Hwnd>) -> bool {
        match self {
            WindowFilter::Any => true,
            WindowFilter::BottomOnly => hwnd.is_none(),
            WindowFilter::Window(h) => hwnd == Some(h),
        }
    }
}

/// What ended a message wait.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaitStatus {
    /// The wake event fired; there may be something to peek.
    Signaled,
    /// The thread was asked to abandon its wait.
    Interrupted,
}

/// Whether a code filter can match any hardware message at all. The
/// hardware ranges are, in numerical order: non-client mouse, key, mouse.
fn filter_contains_hw_range(first: u32, mut last: u32) -> bool {
    if last == 0 {
        last = last.wrapping_sub(1);
    }
    if last < wm::WM_NCMOUSEFIRST {
        return false;
    }
    if first > wm::WM_NCMOUSELAST && last < wm::WM_KEYFIRST {
        return false;
    }
    if first > wm::WM_KEYLAST && last < wm::WM_MOUSEFIRST {
        return false;
    }
    if first > wm::WM_MOUSELAST {
        return false;
    }
    true
}

/// True when a record passes the code filter: an explicit inclusive range,
/// or any wanted queue-status category when both bounds are zero.
fn code_allows(first: u32, last: u32, qs: QsFlags, message: u32, record_qs: QsFlags) -> bool {
    if first == 0 && last == 0 {
        record_qs.intersects(qs)
    } else {
        first <= message && message <= last
    }
}

impl Queue {
    /// Filtered lookup over the calling thread's queues.
    ///
    /// Pending sent messages are dispatched first. The hardware list is
    /// scanned before the posted list; hardware candidates run through the
    /// cooker and may be dropped (and consumed) on the way. A posted quit
    /// request is delivered last, regardless of the filters.
    ///
    /// Returns the message and its extra-info value.
    pub fn peek(
        filter: WindowFilter,
        first: u32,
        last: u32,
        qs: QsFlags,
        remove: bool,
    ) -> Option<(Msg, isize)> {
        let id = thread::current_thread()?;
        let mut core = thread::user().lock();

        // Sent messages take priority over everything queued.
        let has_sent = core
            .thread(id)
            .is_some_and(|pti| pti.wake_bits.contains(QsFlags::SENDMESSAGE));
        if has_sent {
            send::dispatch_one_sent(&mut core, id);
        }

        if let Some(found) = peek_hardware(&mut core, id, filter, first, last, qs, remove) {
            if remove {
                if let Some(pti) = core.thread_mut(id) {
                    pti.time_last = world::tick_count();
                }
            }
            return Some(found);
        }
        if let Some(found) = peek_posted(&mut core, id, filter, first, last, qs, remove) {
            if remove {
                if let Some(pti) = core.thread_mut(id) {
                    pti.time_last = world::tick_count();
                }
            }
            return Some(found);
        }

        // Quit requests are always returned once the queues are empty,
        // regardless of the filter.
        let cursor_pos = core.cursor_pos;
        let pti = core.thread_mut(id)?;
        if pti.quit_posted {
            let msg = Msg {
                hwnd: None,
                message: wm::WM_QUIT,
                wparam: pti.exit_code as usize,
                lparam: 0,
                time: world::tick_count(),
                pt: cursor_pos,
            };
            if remove {
                pti.quit_posted = false;
                pti.clear_bits(QsFlags::POSTMESSAGE);
                pti.wake_bits.remove(QsFlags::ALLPOSTMESSAGE);
            }
            return Some((msg, 0));
        }

        None
    }

    /// Blocks on the thread's wake event until something arrives.
    pub fn wait_for_new_messages() -> WaitStatus {
        let Some(id) = thread::current_thread() else {
            return WaitStatus::Signaled;
        };
        let Some(shared) = thread::shared_handle(id) else {
            return WaitStatus::Signaled;
        };
        shared.wake.wait_deadline(None);
        if shared.take_interrupt() {
            WaitStatus::Interrupted
        } else {
            WaitStatus::Signaled
        }
    }

    /// The wake-mask handshake used by "wait for multiple objects" style
    /// loops: reports (and signals) when the queue already has something
    /// the mask cares about.
    pub fn set_wake_mask(mask: QsFlags, input_available: bool) -> bool {
        let Some(id) = thread::current_thread() else { return false };
        let core = thread::user().lock();
        let Some(pti) = core.thread(id) else { return false };
        if pti.change_bits.intersects(mask)
            || (input_available && pti.wake_bits.intersects(mask))
        {
            pti.shared.wake.signal();
            return true;
        }
        false
    }

    /// Zeroes the wake-bit summary. The counters stay; this only resets
    /// what the next wake-mask probe sees.
    pub fn clear_wake_mask() -> bool {
        let Some(id) = thread::current_thread() else { return false };
        let mut core = thread::user().lock();
        let Some(pti) = core.thread_mut(id) else { return false };
        pti.wake_bits = QsFlags::empty();
        true
    }
}

fn peek_hardware(
    core: &mut MutexGuard<'_, Core>,
    id: ThreadId,
    filter: WindowFilter,
    first: u32,
    last: u32,
    qs: QsFlags,
    remove: bool,
) -> Option<(Msg, isize)> {
    if !filter_contains_hw_range(first, last) {
        return None;
    }

    {
        let pti = core.thread_mut(id)?;
        if pti.hardware.is_empty() {
            return None;
        }
        // Pin the hardware list to this thread for the duration; the
        // cooker may re-enter peek from a window procedure.
        if pti.sys_lock.is_none() {
            pti.sys_lock = Some(id);
        }
        if pti.sys_lock != Some(id) {
            error!("hardware list is locked to another thread");
            return None;
        }
    }

    let mut result = None;
    let mut index = 0;

    loop {
        let (cookie, mut msg, qs_flags, extra) = {
            let Some(pti) = core.thread_mut(id) else { break };
            if index >= pti.hardware.len() {
                break;
            }
            let rec = &pti.hardware[index];
            // Skip the record another nesting level is cooking right now.
            if rec.cookie() == pti.id_sys_peek {
                index += 1;
                continue;
            }
            // Null-window mouse moves pass every window filter.
            let admits = filter.admits(rec.msg.hwnd) || rec.msg.message == wm::WM_MOUSEMOVE;
            if !admits || !code_allows(first, last, qs, rec.msg.message, rec.qs_flags) {
                index += 1;
                continue;
            }
            (rec.cookie(), rec.msg, rec.qs_flags, rec.extra_info)
        };

        let saved = {
            let Some(pti) = core.thread_mut(id) else { break };
            let saved = pti.id_sys_peek;
            pti.id_sys_peek = cookie;
            // Key state first, so GetKeyState agrees with the message the
            // window procedure is about to see.
            pti.key_state.update_from_msg(&msg);
            saved
        };

        let mut do_remove = remove;
        let accept = cooker::process_hardware_message(core, id, &mut msg, &mut do_remove, first, last);

        let mut removed_rec = None;
        {
            let Some(pti) = core.thread_mut(id) else { break };
            if do_remove {
                if let Some(pos) = pti.hardware.iter().position(|r| r.cookie() == cookie) {
                    removed_rec = pti.hardware.remove(pos);
                }
                pti.clear_bits(qs_flags);
            }
            pti.id_sys_peek = saved;
        }
        if let Some(rec) = removed_rec.take() {
            core.pool.release(rec);
            if accept {
                result = Some((msg, extra));
                break;
            }
            // The slot now holds the next record; do not advance.
            continue;
        }
        if accept {
            result = Some((msg, extra));
            break;
        }
        index += 1;
    }

    if let Some(pti) = core.thread_mut(id) {
        if pti.sys_lock == Some(id) {
            pti.sys_lock = None;
        }
    }

    result
}

fn peek_posted(
    core: &mut MutexGuard<'_, Core>,
    id: ThreadId,
    filter: WindowFilter,
    first: u32,
    last: u32,
    qs: QsFlags,
    remove: bool,
) -> Option<(Msg, isize)> {
    let mut removed_rec = None;
    let found = {
        let pti = core.thread_mut(id)?;
        let mut found = None;
        for index in 0..pti.posted.len() {
            let rec = &pti.posted[index];
            if !filter.admits(rec.msg.hwnd)
                || !code_allows(first, last, qs, rec.msg.message, rec.qs_flags)
            {
                continue;
            }
            let msg = rec.msg;
            let extra = rec.extra_info;
            let qs_flags = rec.qs_flags;
            if remove {
                removed_rec = pti.posted.remove(index);
                pti.clear_bits(qs_flags);
            }
            found = Some((msg, extra));
            break;
        }
        found
    };
    if let Some(rec) = removed_rec {
        core.pool.release(rec);
    }
    found
}
