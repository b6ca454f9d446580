//! Per-queue key state: 256 virtual keys, each with a down bit, a toggle
//! lock bit and a recent-down bit.

use tracing::error;

use crate::message::{mk, vk, wm, xbutton_from_wparam, Msg, XBUTTON1, XBUTTON2};
use crate::thread;
use crate::Queue;

/// Returned by [`crate::Queue::key_state`]: high bits set while the key is
/// held, bit 0 set while the key is toggled on.
pub const KEY_STATE_DOWN: u16 = 0xFF80;
pub const KEY_STATE_LOCKED: u16 = 0x0001;

/// Byte encoding used by the 256-byte snapshot/restore arrays.
pub const KS_DOWN_BIT: u8 = 0x80;
pub const KS_LOCK_BIT: u8 = 0x01;

const BITS: usize = 256 / 8;

/// Three 256-bit vectors tracking key state for one queue.
#[derive(Debug, Clone)]
pub(crate) struct KeyStateTable {
    down: [u8; BITS],
    locked: [u8; BITS],
    // Consumed by async key queries, which live with the input readers.
    #[allow(dead_code)]
    recent_down: [u8; BITS],
}

impl Default for KeyStateTable {
    fn default() -> Self {
        KeyStateTable { down: [0; BITS], locked: [0; BITS], recent_down: [0; BITS] }
    }
}

#[inline]
fn get_bit(bits: &[u8; BITS], key: u8) -> bool {
    bits[key as usize / 8] & (1 << (key % 8)) != 0
}

#[inline]
fn set_bit(bits: &mut [u8; BITS], key: u8, value: bool) {
    if value {
        bits[key as usize / 8] |= 1 << (key % 8);
    } else {
        bits[key as usize / 8] &= !(1 << (key % 8));
    }
}

impl KeyStateTable {
    pub fn is_down(&self, key: u8) -> bool {
        get_bit(&self.down, key)
    }

    pub fn is_locked(&self, key: u8) -> bool {
        get_bit(&self.locked, key)
    }

    /// Applies a single down/up transition for one virtual key.
    ///
    /// The first down after an up toggles the lock bit; repeats while held
    /// do not.
    pub fn update(&mut self, key: u8, is_down: bool) {
        if is_down {
            if !self.is_down(key) {
                let locked = self.is_locked(key);
                set_bit(&mut self.locked, key, !locked);
            }
            set_bit(&mut self.down, key, true);
            set_bit(&mut self.recent_down, key, true);
        } else {
            set_bit(&mut self.down, key, false);
        }
    }

    /// Folds a hardware message into the table before it is cooked, so key
    /// state reads are coherent with the message being delivered.
    pub fn update_from_msg(&mut self, msg: &Msg) {
        let mut down = false;
        match msg.message {
            wm::WM_LBUTTONDOWN | wm::WM_LBUTTONUP => {
                down = msg.message == wm::WM_LBUTTONDOWN;
                self.update(vk::VK_LBUTTON, down);
            }
            wm::WM_MBUTTONDOWN | wm::WM_MBUTTONUP => {
                down = msg.message == wm::WM_MBUTTONDOWN;
                self.update(vk::VK_MBUTTON, down);
            }
            wm::WM_RBUTTONDOWN | wm::WM_RBUTTONUP => {
                down = msg.message == wm::WM_RBUTTONDOWN;
                self.update(vk::VK_RBUTTON, down);
            }
            wm::WM_XBUTTONDOWN | wm::WM_XBUTTONUP => {
                down = msg.message == wm::WM_XBUTTONDOWN;
                match xbutton_from_wparam(msg.wparam) {
                    XBUTTON1 => self.update(vk::VK_XBUTTON1, down),
                    XBUTTON2 => self.update(vk::VK_XBUTTON2, down),
                    _ => {}
                }
            }
            wm::WM_KEYDOWN | wm::WM_SYSKEYDOWN | wm::WM_KEYUP | wm::WM_SYSKEYUP => {
                if msg.message == wm::WM_KEYDOWN || msg.message == wm::WM_SYSKEYDOWN {
                    down = true;
                }
                let key = msg.wparam as u8;
                self.update(key, down);
                // The unified modifier tracks the OR of its siblings.
                match key {
                    vk::VK_LCONTROL | vk::VK_RCONTROL => {
                        let merged =
                            self.is_down(vk::VK_LCONTROL) || self.is_down(vk::VK_RCONTROL);
                        self.update(vk::VK_CONTROL, merged);
                    }
                    vk::VK_LMENU | vk::VK_RMENU => {
                        let merged = self.is_down(vk::VK_LMENU) || self.is_down(vk::VK_RMENU);
                        self.update(vk::VK_MENU, merged);
                    }
                    vk::VK_LSHIFT | vk::VK_RSHIFT => {
                        let merged = self.is_down(vk::VK_LSHIFT) || self.is_down(vk::VK_RSHIFT);
                        self.update(vk::VK_SHIFT, merged);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    /// Union of held buttons and modifiers in the client mouse-message
    /// wparam encoding. Honours the system button-swap flag; that keeps the
    /// reported drag state consistent with what swapped-button users see.
    pub fn down_mask(&self, swap_buttons: bool) -> usize {
        let mut ret = 0;
        if swap_buttons {
            if self.is_down(vk::VK_RBUTTON) {
                ret |= mk::MK_LBUTTON;
            }
            if self.is_down(vk::VK_LBUTTON) {
                ret |= mk::MK_RBUTTON;
            }
        } else {
            if self.is_down(vk::VK_LBUTTON) {
                ret |= mk::MK_LBUTTON;
            }
            if self.is_down(vk::VK_RBUTTON) {
                ret |= mk::MK_RBUTTON;
            }
        }
        if self.is_down(vk::VK_MBUTTON) {
            ret |= mk::MK_MBUTTON;
        }
        if self.is_down(vk::VK_SHIFT) {
            ret |= mk::MK_SHIFT;
        }
        if self.is_down(vk::VK_CONTROL) {
            ret |= mk::MK_CONTROL;
        }
        if self.is_down(vk::VK_XBUTTON1) {
            ret |= mk::MK_XBUTTON1;
        }
        if self.is_down(vk::VK_XBUTTON2) {
            ret |= mk::MK_XBUTTON2;
        }
        ret
    }

    /// 256-byte read-out with bit 7 = down and bit 0 = locked.
    pub fn snapshot(&self) -> [u8; 256] {
        let mut out = [0u8; 256];
        for (i, slot) in out.iter_mut().enumerate() {
            if get_bit(&self.down, i as u8) {
                *slot |= KS_DOWN_BIT;
            }
            if get_bit(&self.locked, i as u8) {
                *slot |= KS_LOCK_BIT;
            }
        }
        out
    }

    /// Write-in counterpart of [`snapshot`](Self::snapshot).
    pub fn restore(&mut self, state: &[u8; 256]) {
        for (i, slot) in state.iter().enumerate() {
            set_bit(&mut self.down, i as u8, slot & KS_DOWN_BIT != 0);
            set_bit(&mut self.locked, i as u8, slot & KS_LOCK_BIT != 0);
        }
    }
}

impl Queue {
    /// State of one virtual key on the calling thread's queue:
    /// [`KEY_STATE_DOWN`] bits while held, [`KEY_STATE_LOCKED`] while
    /// toggled. Out-of-range keys report zero.
    pub fn key_state(key: u32) -> u16 {
        if key >= 256 {
            error!(key, "key index out of range");
            return 0;
        }
        let Some(id) = thread::current_thread() else { return 0 };
        let core = thread::user().lock();
        let Some(pti) = core.thread(id) else { return 0 };
        let mut ret = 0;
        if pti.key_state.is_down(key as u8) {
            ret |= KEY_STATE_DOWN;
        }
        if pti.key_state.is_locked(key as u8) {
            ret |= KEY_STATE_LOCKED;
        }
        ret
    }

    /// Snapshot of the whole table, bit 7 = down, bit 0 = locked.
    pub fn keyboard_state() -> [u8; 256] {
        let Some(id) = thread::current_thread() else { return [0; 256] };
        let core = thread::user().lock();
        match core.thread(id) {
            Some(pti) => pti.key_state.snapshot(),
            None => [0; 256],
        }
    }

    /// Replaces the whole table from a snapshot.
    pub fn set_keyboard_state(state: &[u8; 256]) -> bool {
        let Some(id) = thread::current_thread() else { return false };
        let mut core = thread::user().lock();
        match core.thread_mut(id) {
            Some(pti) => {
                pti.key_state.restore(state);
                true
            }
            None => false,
        }
    }
}
