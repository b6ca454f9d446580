//! The hardware-message cooker: turns raw device events into dispatchable
//! window messages.
//!
//! Mouse records get hit-tested, translated between client and non-client
//! variants, folded into double clicks and gated through the hook chain;
//! keyboard records get their modifiers unified and may synthesise help,
//! context-menu and app-command messages.

use parking_lot::MutexGuard;
use tracing::{error, trace, warn};

use crate::message::{
    self, hit, ma, make_long, pack_point, style, vk, wm, Hwnd, Msg, Point, ThreadId,
};
use crate::post;
use crate::thread::{self, Core, Rect};
use crate::wake::{QsFlags, QueueFlags};
use crate::world::{
    self, HookAction, ImeAction, JournalEntry, MouseHookData, WindowInfo, HOVER_TIMER_ID,
};
use crate::{Input, Queue};

impl Queue {
    /// Configures mouse tracking for the queue currently owning the
    /// pointer: whether leave messages are wanted and whether a hover
    /// region is armed.
    pub fn track_mouse(leave: bool, hover: bool) {
        let mut core = thread::user().lock();
        core.track.leave_wanted = leave;
        core.track.hover_wanted = hover;
    }
}

impl Input {
    /// Entry point for raw mouse input.
    ///
    /// Stamps the message, consults the low-level mouse hook, targets the
    /// capture window or the top-level window under the point, updates the
    /// rendered pointer, and queues the message on the owning thread with
    /// mouse moves deferred for coalescing.
    pub fn insert_mouse(mut msg: Msg, flags: u32, extra: isize, hook: bool) {
        let world = world::world();
        let mut core = thread::user().lock();

        msg.time = world.clock.tick_count();
        core.cursor_pos = msg.pt;

        let mouse_data = match msg.message {
            wm::WM_MOUSEWHEEL | wm::WM_XBUTTONDOWN | wm::WM_XBUTTONUP | wm::WM_XBUTTONDBLCLK
            | wm::WM_NCXBUTTONDOWN | wm::WM_NCXBUTTONUP | wm::WM_NCXBUTTONDBLCLK => {
                make_long(0, message::hiword(msg.wparam as u32))
            }
            _ => 0,
        };

        if hook {
            let data = MouseHookData {
                pt: msg.pt,
                hwnd: None,
                hit_test: 0,
                mouse_data,
                flags,
                time: msg.time,
                extra_info: extra,
            };
            let blocked = MutexGuard::unlocked(&mut core, || {
                world.hooks.mouse_ll(msg.message, &data)
            });
            if blocked {
                return;
            }
        }

        // Captured input goes to the capture window of the foreground
        // queue; everything else is targeted by position.
        let capture = core
            .foreground
            .and_then(|fg| core.thread(fg).and_then(|pti| pti.capture));
        let target = match capture {
            Some(hwnd) => world.tree.validate(hwnd),
            None => world.tree.top_level_at(msg.pt),
        };

        let Some(info) = target else {
            // Background: keep the pointer visible where it is.
            world.renderer.move_pointer(msg.pt);
            core.showing_cursor = 0;
            return;
        };
        msg.hwnd = Some(info.hwnd);

        let tid = info.thread;
        let (cursor, level, move_pending, dead) = match core.thread(tid) {
            Some(pti) => (
                pti.cursor.clone(),
                pti.cursor_level,
                pti.flags.contains(QueueFlags::MOUSE_MOVED),
                pti.in_destroy(),
            ),
            None => {
                error!("mouse input over a window without a queue");
                return;
            }
        };
        if dead {
            error!("mouse input over a window with a dead queue");
            return;
        }

        if msg.message == wm::WM_MOUSEMOVE {
            match cursor.as_ref().filter(|_| level >= 0) {
                Some(cursor) => {
                    // Install the queue's shape if it is not the one on
                    // screen.
                    let stale = core
                        .current_cursor
                        .as_ref()
                        .is_none_or(|current| !std::sync::Arc::ptr_eq(current, cursor));
                    if stale {
                        world.renderer.set_pointer_shape(cursor, core.cursor_pos);
                    } else {
                        world.renderer.move_pointer(msg.pt);
                    }
                }
                None => {
                    if core.showing_cursor >= 0 {
                        world.renderer.move_pointer(Point::new(-1, -1));
                    }
                }
            }

            core.showing_cursor = level;
            core.current_cursor = cursor;
            core.cursor_owner = Some(tid);
            core.mouse_move_extra = extra;
            core.mouse_move_stamp = msg.time;

            // Mouse move is a special case: mark it pending instead of
            // queueing a record per motion.
            if let Some(pti) = core.thread_mut(tid) {
                pti.flags.insert(QueueFlags::MOUSE_MOVED);
                pti.wake(QsFlags::MOUSEMOVE, true);
            }
        } else {
            // Post the pending move before the button, keeping them in
            // order.
            if move_pending {
                post::coalesce_mouse_move(&mut core, tid);
            }
            trace!(hwnd = info.hwnd.0, code = msg.message, "posting mouse message");
            post::post_locked(&mut core, tid, msg, true, QsFlags::MOUSEBUTTON, 0, extra);
        }
    }

    /// Entry point for raw keyboard input: stamps the message and queues it
    /// on the target thread's hardware FIFO.
    pub fn insert_keyboard(target: ThreadId, mut msg: Msg, extra: isize) {
        let mut core = thread::user().lock();
        msg.time = world::tick_count();
        msg.pt = core.cursor_pos;
        post::post_locked(&mut core, target, msg, true, QsFlags::KEY, 0, extra);
    }
}

/// Cooks one hardware record about to be delivered. Returns false to drop
/// it; `remove` is forced on when the record must also leave the queue.
pub(crate) fn process_hardware_message(
    core: &mut MutexGuard<'_, Core>,
    id: ThreadId,
    msg: &mut Msg,
    remove: &mut bool,
    first: u32,
    last: u32,
) -> bool {
    if message::is_mouse_message(msg.message) {
        process_mouse_message(core, id, msg, remove, first, last)
    } else if message::is_keyboard_message(msg.message) {
        process_keyboard_message(core, id, msg, remove)
    } else {
        true
    }
}

/// The permissive range test the peek filters use for cooked messages:
/// a message passes when either bound admits it.
fn range_allows(first: u32, last: u32, message: u32) -> bool {
    (first == 0 && last == 0) || (message >= first || message <= last)
}

fn process_mouse_message(
    core: &mut MutexGuard<'_, Core>,
    id: ThreadId,
    msg: &mut Msg,
    remove: &mut bool,
    first: u32,
    last: u32,
) -> bool {
    let world = world::world();
    let settings = core.settings;

    let (capture, menu_owner, move_size, active, clk_msg, down_mask) = {
        let Some(pti) = core.thread(id) else { return false };
        (
            pti.capture,
            pti.menu_owner,
            pti.move_size,
            pti.active,
            pti.dbl_clk.msg,
            pti.key_state.down_mask(settings.swap_buttons),
        )
    };

    // Find the window this mouse message is dispatched to.
    let (target, hittest) = match capture {
        Some(hwnd) => (world.tree.validate(hwnd), hit::HTCLIENT),
        None => match world.tree.window_from_point(msg.pt) {
            Some((info, hittest)) => (Some(info), hittest),
            None => (None, hit::HTNOWHERE),
        },
    };

    // Null window, or a window served by some other queue: not ours.
    let target = match target {
        Some(info) if info.thread == id => info,
        _ => {
            // Crossing a queue boundary resets the pointer to the stock
            // arrow.
            let arrow = core.arrow_cursor.clone();
            crate::cursor::set_cursor_locked(core, id, Some(arrow));
            *remove = true;
            return false;
        }
    };

    if core.cursor_owner == Some(id) {
        track_mouse_move(core, &target, msg, hittest);
    } else {
        trace!("pointer owned by another queue, skipping tracking");
    }

    msg.hwnd = Some(target.hwnd);

    let mut pt = msg.pt;
    let mut message = msg.message;

    // There is no non-client wheel message.
    if message != wm::WM_MOUSEWHEEL {
        if hittest != hit::HTCLIENT {
            message = message - wm::WM_MOUSEMOVE + wm::WM_NCMOUSEMOVE;
            msg.wparam = hittest as usize;
        } else if menu_owner.is_none() {
            // Coordinates stay in screen space while a menu is tracked.
            let desktop = world.tree.desktop_origin();
            pt.x += desktop.x - target.client_origin.x;
            pt.y += desktop.y - target.client_origin.y;
        }
    }
    msg.lparam = pack_point(pt);

    if message::is_button_down_message(msg.message) {
        let mut update = *remove;

        // Double clicks; note that mouse moves can slip in between the
        // DOWN and the DBLCLK.
        if menu_owner.is_some()
            || move_size.is_some()
            || hittest != hit::HTCLIENT
            || target.class_style & style::CS_DBLCLKS != 0
        {
            let same_xbutton = msg.message != wm::WM_XBUTTONDOWN
                || message::xbutton_from_wparam(msg.wparam)
                    == message::xbutton_from_wparam(clk_msg.wparam);
            if msg.message == clk_msg.message
                && msg.hwnd == clk_msg.hwnd
                && same_xbutton
                && msg.time.wrapping_sub(clk_msg.time) < settings.double_click_time_ms
                && (msg.pt.x - clk_msg.pt.x).abs() < settings.double_click_width / 2
                && (msg.pt.y - clk_msg.pt.y).abs() < settings.double_click_height / 2
            {
                message += wm::WM_LBUTTONDBLCLK - wm::WM_LBUTTONDOWN;
                if update {
                    if let Some(pti) = core.thread_mut(id) {
                        pti.dbl_clk.msg.message = 0;
                    }
                    update = false;
                }
            }
        }

        if !range_allows(first, last, message) {
            trace!(code = message, "cooked message out of filter range");
            return false;
        }

        // This DOWN becomes the next double-click candidate.
        if update {
            if let Some(pti) = core.thread_mut(id) {
                pti.dbl_clk.msg = *msg;
            }
        }
    } else {
        if !range_allows(first, last, message) {
            trace!(code = message, "cooked message out of filter range");
            return false;
        }

        if message == wm::WM_MOUSEMOVE {
            msg.wparam = down_mask;
        }
    }

    // Click lock turns a long press into a latched drag.
    if settings.click_lock {
        let mut locked = false;
        if msg.message == wm::WM_LBUTTONUP {
            locked = msg.time.wrapping_sub(core.click_lock_time) >= settings.click_lock_time_ms;
            if locked && !core.click_lock_active {
                core.click_lock_active = true;
            }
        } else if msg.message == wm::WM_LBUTTONDOWN {
            if core.click_lock_active {
                locked = true;
                core.click_lock_active = false;
            }
            core.click_lock_time = msg.time;
        }
        if locked {
            trace!("click lock consumed the message");
            *remove = true;
            return false;
        }
    }

    // The message is accepted now, but the hooks may still drop it.
    world.hooks.journal_record(&JournalEntry {
        message: msg.message,
        hwnd: msg.hwnd,
        time: msg.time,
        param_l: msg.pt.x as u32,
        param_h: msg.pt.y as u32,
    });

    let hook_data = MouseHookData {
        pt: msg.pt,
        hwnd: msg.hwnd,
        hit_test: hittest,
        mouse_data: 0,
        flags: 0,
        time: msg.time,
        extra_info: 0,
    };
    let action = if *remove { HookAction::Action } else { HookAction::NoRemove };
    if world.hooks.mouse(action, message, &hook_data) {
        world.hooks.click_skipped(message, &hook_data);
        warn!("mouse hook dropped the message");
        *remove = true;
        return false;
    }

    if hittest == hit::HTERROR || hittest == hit::HTNOWHERE {
        send_local(
            core,
            target.hwnd,
            wm::WM_SETCURSOR,
            target.hwnd.0 as usize,
            make_long(hittest as u16, msg.message as u16) as i32 as isize,
        );
        *remove = true;
        return false;
    }

    if !*remove || capture.is_some() {
        msg.message = message;
        return true;
    }

    let mut eat = false;

    if message::is_button_down_message(msg.message) {
        // Ancestors hear about the click first; the notification keeps the
        // plain DOWN code even for double or non-client clicks.
        send_parent_notify(core, &target, msg.message as u16, 0, msg.pt);

        // Then the click may activate the target's top-level window.
        if Some(target.hwnd) != active {
            let top = world.tree.non_child_ancestor(target.hwnd);
            if let Some(top) = top.filter(|t| !world.tree.is_desktop(t.hwnd)) {
                let verdict = send_local(
                    core,
                    target.hwnd,
                    wm::WM_MOUSEACTIVATE,
                    top.hwnd.0 as usize,
                    make_long(hittest as u16, msg.message as u16) as i32 as isize,
                );
                match verdict {
                    ma::MA_NOACTIVATEANDEAT => eat = true,
                    ma::MA_NOACTIVATE => {}
                    ma::MA_ACTIVATEANDEAT => {
                        eat = true;
                        let _ = world.tree.activate(top.hwnd);
                    }
                    ma::MA_ACTIVATE | 0 => {
                        if !world.tree.activate(top.hwnd) {
                            eat = true;
                        }
                    }
                    other => error!(code = other, "unknown WM_MOUSEACTIVATE reply"),
                }
            }
        }
    }

    // The set-cursor message carries the plain mouse code even for
    // non-client messages.
    send_local(
        core,
        target.hwnd,
        wm::WM_SETCURSOR,
        target.hwnd.0 as usize,
        make_long(hittest as u16, msg.message as u16) as i32 as isize,
    );

    msg.message = message;
    !eat
}

fn process_keyboard_message(
    core: &mut MutexGuard<'_, Core>,
    id: ThreadId,
    msg: &mut Msg,
    remove: &mut bool,
) -> bool {
    let world = world::world();
    let mut accept = true;

    {
        let Some(pti) = core.thread_mut(id) else { return false };
        if msg.message == vk::VK_PACKET as u32 {
            pti.injected_char = message::hiword(msg.wparam as u32);
        }
    }

    // Deliver the unified modifier keys, not their left/right halves.
    if matches!(
        msg.message,
        wm::WM_KEYDOWN | wm::WM_SYSKEYDOWN | wm::WM_KEYUP | wm::WM_SYSKEYUP
    ) {
        msg.wparam = match msg.wparam as u8 {
            vk::VK_LSHIFT | vk::VK_RSHIFT => vk::VK_SHIFT as usize,
            vk::VK_LCONTROL | vk::VK_RCONTROL => vk::VK_CONTROL as usize,
            vk::VK_LMENU | vk::VK_RMENU => vk::VK_MENU as usize,
            _ => msg.wparam,
        };
    }

    let window = msg.hwnd.and_then(|h| world.tree.validate(h));

    let lparam_hi = message::hiword(msg.lparam as u32);
    let mut param_h = (msg.lparam as u32) & 0x7FFF;
    if lparam_hi & 0x0100 != 0 {
        param_h |= 0x8000;
    }
    world.hooks.journal_record(&JournalEntry {
        message: msg.message,
        hwnd: msg.hwnd,
        time: msg.time,
        param_l: (msg.wparam as u32 & 0xFF) | ((lparam_hi as u32) << 8),
        param_h,
    });

    if *remove {
        let is_desktop = msg.hwnd.is_some_and(|h| world.tree.is_desktop(h));
        if msg.message == wm::WM_KEYDOWN && !is_desktop {
            if let Some(hwnd) = msg.hwnd {
                if msg.wparam as u8 == vk::VK_F1 {
                    // F1 turns into a help request.
                    post::post_to_window(core, hwnd, wm::WM_KEYF1, 0, 0);
                } else if (vk::VK_BROWSER_BACK..=vk::VK_LAUNCH_APP2)
                    .contains(&(msg.wparam as u8))
                {
                    let command =
                        style::FAPPCOMMAND_KEY | (msg.wparam as u16 - vk::VK_BROWSER_BACK as u16 + 1);
                    send_local(
                        core,
                        hwnd,
                        wm::WM_APPCOMMAND,
                        hwnd.0 as usize,
                        make_long(0, command) as i32 as isize,
                    );
                }
            }
        } else if msg.message == wm::WM_KEYUP {
            let menu_owner = core.thread(id).and_then(|pti| pti.menu_owner);
            if msg.wparam as u8 == vk::VK_APPS && menu_owner.is_none() {
                if let Some(hwnd) = msg.hwnd {
                    post::post_to_window(core, hwnd, wm::WM_CONTEXTMENU, hwnd.0 as usize, -1);
                }
            }
        }
    }

    let action = if *remove { HookAction::Action } else { HookAction::NoRemove };
    if world
        .hooks
        .keyboard(action, message::loword(msg.wparam as u32), msg.lparam)
    {
        world.hooks.key_skipped(message::loword(msg.wparam as u32), msg.lparam);
        warn!("keyboard hook dropped the message");
        *remove = true;
        accept = false;
    }

    if let Some(window) = window {
        let ime_disabled = core.thread(id).is_none_or(|pti| pti.ime_disabled);
        if accept && *remove && msg.message == wm::WM_KEYDOWN && !ime_disabled {
            let mut verdict = MutexGuard::unlocked(core, || {
                world.ime.process_key(window.hwnd, msg.message, msg.wparam, msg.lparam)
            });
            if !verdict.is_empty() {
                if verdict.intersects(ImeAction::HOTKEY | ImeAction::SKIP_THIS_KEY) {
                    verdict = ImeAction::empty();
                }
                if verdict.contains(ImeAction::PROCESS_BY_IME) {
                    msg.wparam = vk::VK_PROCESSKEY as usize;
                }
            }
        }
    }

    accept
}

/// Leave/hover bookkeeping for the queue owning the pointer.
fn track_mouse_move(
    core: &mut MutexGuard<'_, Core>,
    target: &WindowInfo,
    msg: &Msg,
    hittest: i32,
) {
    let settings = core.settings;
    let track = core.track;

    if track.window != Some(target.hwnd)
        || msg.message != wm::WM_MOUSEMOVE
        || track.hit != hittest
    {
        // Only a change of tracked window or a client/non-client border
        // crossing fires the leave machinery.
        if track.window != Some(target.hwnd)
            || (track.hit == hit::HTCLIENT) != (hittest == hit::HTCLIENT)
        {
            if let Some(prev) = track.window {
                if track.leave_wanted {
                    let leave = if track.hit != hit::HTCLIENT {
                        wm::WM_NCMOUSELEAVE
                    } else {
                        wm::WM_MOUSELEAVE
                    };
                    post::post_to_window(core, prev, leave, 0, 0);
                }
                if track.hover_wanted {
                    world::world().timers.kill_timer(prev, HOVER_TIMER_ID);
                }
            }
            core.track.leave_wanted = false;
            core.track.hover_wanted = false;
        }
        core.track.window = Some(target.hwnd);
        core.track.hit = hittest;
    }

    // Same tracked window: a click or an escape from the hover rectangle
    // restarts the hover period around the new point.
    let track = core.track;
    if track.window == Some(target.hwnd)
        && (msg.message != wm::WM_MOUSEMOVE || !track.hover_rect.contains(msg.pt))
        && track.hover_wanted
    {
        world::world()
            .timers
            .set_timer(target.hwnd, HOVER_TIMER_ID, settings.hover_time_ms);
        core.track.hover_rect =
            Rect::centered_on(msg.pt, settings.hover_width, settings.hover_height);
    }
}

/// Tells every ancestor about a click, unless a window on the way up opted
/// out with the no-parent-notify style.
fn send_parent_notify(
    core: &mut MutexGuard<'_, Core>,
    window: &WindowInfo,
    event: u16,
    id_child: u16,
    pt: Point,
) {
    let world = world::world();
    let desktop = world.tree.desktop_origin();

    // The point travels in the client coordinates of each notified parent.
    let mut pt = Point::new(
        pt.x + desktop.x - window.client_origin.x,
        pt.y + desktop.y - window.client_origin.y,
    );
    let mut current = window.clone();

    loop {
        if current.style & style::WS_CHILD == 0 {
            break;
        }
        if current.ex_style & style::WS_EX_NOPARENTNOTIFY != 0 {
            break;
        }
        let Some(parent) = world.tree.parent(current.hwnd) else { break };
        if world.tree.is_desktop(parent.hwnd) {
            break;
        }
        pt.x += current.client_origin.x - parent.client_origin.x;
        pt.y += current.client_origin.y - parent.client_origin.y;

        current = parent;
        send_local(
            core,
            current.hwnd,
            wm::WM_PARENTNOTIFY,
            make_long(event, id_child) as usize,
            pack_point(pt),
        );
    }
}

/// Direct window-procedure call on the cooking thread, made with the user
/// lock released.
pub(crate) fn send_local(
    core: &mut MutexGuard<'_, Core>,
    hwnd: Hwnd,
    message: u32,
    wparam: usize,
    lparam: isize,
) -> isize {
    let world = world::world();
    MutexGuard::unlocked(core, || world.tree.window_proc(hwnd, message, wparam, lparam))
}
