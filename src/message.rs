#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// Identifies a queue-owning thread inside the subsystem.
///
/// Ids are handed out by [`crate::Queue::attach`] and stay unique for the
/// lifetime of the process; they are never reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct ThreadId(pub(crate) u64);

impl ThreadId {
    /// Raw numeric value, mainly useful for logging.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// An opaque window handle. The queue never dereferences these itself; it
/// hands them to the [`crate::world::WindowTree`] collaborator for
/// validation and lookup.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct Hwnd(pub u64);

/// A simple coordinate point using integers, typically for pixel positions.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Point {
        Point { x, y }
    }
}

/// The fixed-shape message payload flowing through every queue list.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct Msg {
    /// Target window, `None` for thread messages.
    pub hwnd: Option<Hwnd>,
    /// Numeric message code, see [`wm`].
    pub message: u32,
    /// First word-sized parameter.
    pub wparam: usize,
    /// Second word-sized parameter.
    pub lparam: isize,
    /// Millisecond tick stamp assigned at enqueue time.
    pub time: u32,
    /// Cursor position at the time the message was generated.
    pub pt: Point,
}

impl Msg {
    pub fn new(hwnd: Option<Hwnd>, message: u32, wparam: usize, lparam: isize) -> Msg {
        Msg { hwnd, message, wparam, lparam, time: 0, pt: Point::ZERO }
    }
}

// --- Low-level word extraction helpers ---

#[inline]
pub fn hiword(l: u32) -> u16 {
    ((l >> 16) & 0xffff) as u16
}

#[inline]
pub fn loword(l: u32) -> u16 {
    (l & 0xffff) as u16
}

#[inline]
pub fn make_long(lo: u16, hi: u16) -> u32 {
    (lo as u32) | ((hi as u32) << 16)
}

/// Packs a point into an lparam the way mouse messages encode positions.
#[inline]
pub fn pack_point(pt: Point) -> isize {
    make_long(pt.x as u16, pt.y as u16) as i32 as isize
}

/// Recovers the point packed by [`pack_point`].
#[inline]
pub fn unpack_point(lparam: isize) -> Point {
    let l = lparam as u32;
    Point { x: loword(l) as i16 as i32, y: hiword(l) as i16 as i32 }
}

/// Extended-button discriminator carried in the high word of the wparam of
/// XBUTTON messages.
#[inline]
pub fn xbutton_from_wparam(wparam: usize) -> u16 {
    hiword(wparam as u32)
}

/// Window message codes understood by the queue machinery.
///
/// Only the codes the queue itself inspects or synthesises are listed;
/// everything else passes through untouched.
pub mod wm {
    pub const WM_CREATE: u32 = 0x0001;
    pub const WM_QUIT: u32 = 0x0012;
    pub const WM_SETCURSOR: u32 = 0x0020;
    pub const WM_MOUSEACTIVATE: u32 = 0x0021;
    pub const WM_GETTEXT: u32 = 0x000D;
    pub const WM_NOTIFY: u32 = 0x004E;
    pub const WM_KEYF1: u32 = 0x004D;
    pub const WM_CONTEXTMENU: u32 = 0x007B;
    pub const WM_NCCREATE: u32 = 0x0081;

    pub const WM_NCMOUSEMOVE: u32 = 0x00A0;
    pub const WM_NCLBUTTONDOWN: u32 = 0x00A1;
    pub const WM_NCXBUTTONDOWN: u32 = 0x00AB;
    pub const WM_NCXBUTTONUP: u32 = 0x00AC;
    pub const WM_NCXBUTTONDBLCLK: u32 = 0x00AD;

    pub const WM_KEYDOWN: u32 = 0x0100;
    pub const WM_KEYUP: u32 = 0x0101;
    pub const WM_SYSKEYDOWN: u32 = 0x0104;
    pub const WM_SYSKEYUP: u32 = 0x0105;

    pub const WM_PARENTNOTIFY: u32 = 0x0210;

    pub const WM_MOUSEMOVE: u32 = 0x0200;
    pub const WM_LBUTTONDOWN: u32 = 0x0201;
    pub const WM_LBUTTONUP: u32 = 0x0202;
    pub const WM_LBUTTONDBLCLK: u32 = 0x0203;
    pub const WM_RBUTTONDOWN: u32 = 0x0204;
    pub const WM_RBUTTONUP: u32 = 0x0205;
    pub const WM_RBUTTONDBLCLK: u32 = 0x0206;
    pub const WM_MBUTTONDOWN: u32 = 0x0207;
    pub const WM_MBUTTONUP: u32 = 0x0208;
    pub const WM_MBUTTONDBLCLK: u32 = 0x0209;
    pub const WM_MOUSEWHEEL: u32 = 0x020A;
    pub const WM_XBUTTONDOWN: u32 = 0x020B;
    pub const WM_XBUTTONUP: u32 = 0x020C;
    pub const WM_XBUTTONDBLCLK: u32 = 0x020D;
    pub const WM_MOUSEHWHEEL: u32 = 0x020E;

    pub const WM_MOUSEHOVER: u32 = 0x02A1;
    pub const WM_NCMOUSELEAVE: u32 = 0x02A2;
    pub const WM_MOUSELEAVE: u32 = 0x02A3;

    pub const WM_HOTKEY: u32 = 0x0312;
    pub const WM_APPCOMMAND: u32 = 0x0319;
    pub const WM_APP: u32 = 0x8000;

    pub const EM_GETLINE: u32 = 0x00C4;
    pub const EM_SETPASSWORDCHAR: u32 = 0x00CC;

    // Hardware filter range boundaries.
    pub const WM_NCMOUSEFIRST: u32 = WM_NCMOUSEMOVE;
    pub const WM_NCMOUSELAST: u32 = WM_NCXBUTTONDBLCLK;
    pub const WM_KEYFIRST: u32 = WM_KEYDOWN;
    pub const WM_KEYLAST: u32 = 0x0109;
    pub const WM_MOUSEFIRST: u32 = WM_MOUSEMOVE;
    pub const WM_MOUSELAST: u32 = WM_MOUSEHWHEEL;
}

/// True for client and non-client mouse message codes.
#[inline]
pub fn is_mouse_message(message: u32) -> bool {
    (wm::WM_NCMOUSEFIRST..=wm::WM_NCMOUSELAST).contains(&message)
        || (wm::WM_MOUSEFIRST..=wm::WM_MOUSELAST).contains(&message)
}

/// True for keyboard message codes.
#[inline]
pub fn is_keyboard_message(message: u32) -> bool {
    (wm::WM_KEYFIRST..=wm::WM_KEYLAST).contains(&message)
}

#[inline]
pub fn is_button_down_message(message: u32) -> bool {
    matches!(
        message,
        wm::WM_LBUTTONDOWN | wm::WM_RBUTTONDOWN | wm::WM_MBUTTONDOWN | wm::WM_XBUTTONDOWN
    )
}

/// Virtual key codes tracked by the key-state table.
pub mod vk {
    pub const VK_LBUTTON: u8 = 0x01;
    pub const VK_RBUTTON: u8 = 0x02;
    pub const VK_MBUTTON: u8 = 0x04;
    pub const VK_XBUTTON1: u8 = 0x05;
    pub const VK_XBUTTON2: u8 = 0x06;
    pub const VK_SHIFT: u8 = 0x10;
    pub const VK_CONTROL: u8 = 0x11;
    pub const VK_MENU: u8 = 0x12;
    pub const VK_F1: u8 = 0x70;
    pub const VK_APPS: u8 = 0x5D;
    pub const VK_LSHIFT: u8 = 0xA0;
    pub const VK_RSHIFT: u8 = 0xA1;
    pub const VK_LCONTROL: u8 = 0xA2;
    pub const VK_RCONTROL: u8 = 0xA3;
    pub const VK_LMENU: u8 = 0xA4;
    pub const VK_RMENU: u8 = 0xA5;
    pub const VK_BROWSER_BACK: u8 = 0xA6;
    pub const VK_LAUNCH_APP2: u8 = 0xB7;
    pub const VK_PROCESSKEY: u8 = 0xE5;
    pub const VK_PACKET: u8 = 0xE7;
}

/// Modifier/button bits carried in the wparam of client mouse messages.
pub mod mk {
    pub const MK_LBUTTON: usize = 0x0001;
    pub const MK_RBUTTON: usize = 0x0002;
    pub const MK_SHIFT: usize = 0x0004;
    pub const MK_CONTROL: usize = 0x0008;
    pub const MK_MBUTTON: usize = 0x0010;
    pub const MK_XBUTTON1: usize = 0x0020;
    pub const MK_XBUTTON2: usize = 0x0040;
}

/// Hit-test codes returned by the window tree for a screen point.
pub mod hit {
    pub const HTERROR: i32 = -2;
    pub const HTTRANSPARENT: i32 = -1;
    pub const HTNOWHERE: i32 = 0;
    pub const HTCLIENT: i32 = 1;
    pub const HTCAPTION: i32 = 2;
}

/// Replies a window procedure may give to WM_MOUSEACTIVATE.
pub mod ma {
    pub const MA_ACTIVATE: isize = 1;
    pub const MA_ACTIVATEANDEAT: isize = 2;
    pub const MA_NOACTIVATE: isize = 3;
    pub const MA_NOACTIVATEANDEAT: isize = 4;
}

/// Window, extended and class style bits consulted by the cooker.
pub mod style {
    pub const WS_CHILD: u32 = 0x4000_0000;
    pub const WS_EX_NOPARENTNOTIFY: u32 = 0x0000_0004;
    pub const CS_DBLCLKS: u32 = 0x0008;
    pub const FAPPCOMMAND_KEY: u16 = 0;
}

pub const XBUTTON1: u16 = 0x0001;
pub const XBUTTON2: u16 = 0x0002;
