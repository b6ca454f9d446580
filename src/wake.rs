//! Counted wake and change bits.
//!
//! A single logical wake may be requested several times (post, hardware
//! enqueue, re-post), so every category keeps a counter and the summary bit
//! stays set until the count drains back to zero.

use bitflags::bitflags;

bitflags! {
    /// Queue-status categories reported to the application.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
    pub struct QsFlags: u32 {
        const KEY            = 0x0001;
        const MOUSEMOVE      = 0x0002;
        const MOUSEBUTTON    = 0x0004;
        const POSTMESSAGE    = 0x0008;
        const TIMER          = 0x0010;
        const PAINT          = 0x0020;
        const SENDMESSAGE    = 0x0040;
        const HOTKEY         = 0x0080;
        const ALLPOSTMESSAGE = 0x0100;
        const EVENT          = 0x2000;

        const MOUSE = Self::MOUSEMOVE.bits() | Self::MOUSEBUTTON.bits();
        const INPUT = Self::MOUSE.bits() | Self::KEY.bits();
        const ALLEVENTS = Self::INPUT.bits()
            | Self::POSTMESSAGE.bits()
            | Self::TIMER.bits()
            | Self::PAINT.bits()
            | Self::HOTKEY.bits();
        const ALLINPUT = Self::ALLEVENTS.bits() | Self::SENDMESSAGE.bits();
    }
}

bitflags! {
    /// Per-queue state flags.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
    pub(crate) struct QueueFlags: u32 {
        /// Teardown has started; no new posts or sends are accepted.
        const IN_DESTROY = 0x0001;
        /// A mouse move is pending materialisation (deferred-post path).
        const MOUSE_MOVED = 0x0002;
    }
}

/// Counted categories. Timer and Paint are externally counted on the thread
/// info (`timers_ready` / `paints_ready`) and have no slot here.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct WakeCounts {
    pub key: u32,
    pub mouse_move: u32,
    pub mouse_button: u32,
    pub post_message: u32,
    pub send_message: u32,
    pub hot_key: u32,
    pub event: u32,
}

impl WakeCounts {
    /// Increments the counters named by `mask`.
    pub fn raise(&mut self, mask: QsFlags) {
        if mask.contains(QsFlags::KEY) {
            self.key += 1;
        }
        if mask.contains(QsFlags::MOUSEMOVE) {
            self.mouse_move += 1;
        }
        if mask.contains(QsFlags::MOUSEBUTTON) {
            self.mouse_button += 1;
        }
        if mask.contains(QsFlags::POSTMESSAGE) {
            self.post_message += 1;
        }
        if mask.contains(QsFlags::SENDMESSAGE) {
            self.send_message += 1;
        }
        if mask.contains(QsFlags::HOTKEY) {
            self.hot_key += 1;
        }
        if mask.contains(QsFlags::EVENT) {
            self.event += 1;
        }
    }

    /// Decrements the counters named by `mask` and returns the categories
    /// whose counts reached zero, i.e. the summary bits to clear.
    ///
    /// Timer and Paint decrement the external counters passed in; mouse
    /// move is thrown back to zero whenever touched (coalescing policy).
    pub fn drain(
        &mut self,
        mask: QsFlags,
        timers_ready: &mut u32,
        paints_ready: &mut u32,
    ) -> QsFlags {
        let mut clear = QsFlags::empty();
        if mask.contains(QsFlags::KEY) && dec(&mut self.key) {
            clear |= QsFlags::KEY;
        }
        if mask.contains(QsFlags::MOUSEMOVE) && self.mouse_move != 0 {
            self.mouse_move = 0;
            clear |= QsFlags::MOUSEMOVE;
        }
        if mask.contains(QsFlags::MOUSEBUTTON) && dec(&mut self.mouse_button) {
            clear |= QsFlags::MOUSEBUTTON;
        }
        if mask.contains(QsFlags::POSTMESSAGE) && dec(&mut self.post_message) {
            clear |= QsFlags::POSTMESSAGE;
        }
        if mask.contains(QsFlags::TIMER) && *timers_ready != 0 && dec(timers_ready) {
            clear |= QsFlags::TIMER;
        }
        if mask.contains(QsFlags::PAINT) && *paints_ready != 0 && dec(paints_ready) {
            clear |= QsFlags::PAINT;
        }
        if mask.contains(QsFlags::SENDMESSAGE) && dec(&mut self.send_message) {
            clear |= QsFlags::SENDMESSAGE;
        }
        if mask.contains(QsFlags::HOTKEY) && dec(&mut self.hot_key) {
            clear |= QsFlags::HOTKEY;
        }
        if mask.contains(QsFlags::EVENT) && dec(&mut self.event) {
            clear |= QsFlags::EVENT;
        }
        clear
    }

    pub fn reset(&mut self) {
        *self = WakeCounts::default();
    }
}

/// Saturating decrement returning true when the counter lands on zero.
#[inline]
fn dec(counter: &mut u32) -> bool {
    *counter = counter.saturating_sub(1);
    *counter == 0
}
