//! Collaborator seams.
//!
//! The queue core does not own the window tree, the pointer renderer, the
//! hook chain, timers or the IME; it talks to them through the traits in
//! this module. A [`World`] bundles one implementation of each and can be
//! swapped at runtime, which is also how the test suite drives the core.

use std::sync::Arc;
use std::time::Instant;

use bitflags::bitflags;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::message::{Hwnd, Point, ThreadId};

/// Everything the queue needs to know about a window, captured at lookup
/// time. Handles are weak: a later call may find the window gone.
#[derive(Debug, Clone)]
pub struct WindowInfo {
    pub hwnd: Hwnd,
    /// Thread owning the window, i.e. the queue its messages land on.
    pub thread: ThreadId,
    pub style: u32,
    pub ex_style: u32,
    pub class_style: u32,
    /// True for edit controls carrying the password style; gates
    /// cross-process text reads.
    pub password_edit: bool,
    /// Screen position of the client area origin, for point translation.
    pub client_origin: Point,
}

/// Window lookup and dispatch, implemented by the windowing collaborator.
///
/// Lookup methods may be called while the subsystem lock is held and must
/// not call back into the queue API; only [`window_proc`](Self::window_proc)
/// runs with the lock released.
pub trait WindowTree: Send + Sync {
    /// Topmost visible top-level window at a screen point, `None` when the
    /// point is over the bare desktop.
    fn top_level_at(&self, _pt: Point) -> Option<WindowInfo> {
        None
    }

    /// Deep hit test: the window under the point and its hit code.
    fn window_from_point(&self, _pt: Point) -> Option<(WindowInfo, i32)> {
        None
    }

    /// Resolves a handle, returning `None` for stale or unknown handles.
    fn validate(&self, _hwnd: Hwnd) -> Option<WindowInfo> {
        None
    }

    fn parent(&self, _hwnd: Hwnd) -> Option<WindowInfo> {
        None
    }

    /// Nearest ancestor that is not a child window.
    fn non_child_ancestor(&self, _hwnd: Hwnd) -> Option<WindowInfo> {
        None
    }

    fn is_desktop(&self, _hwnd: Hwnd) -> bool {
        false
    }

    fn desktop_origin(&self) -> Point {
        Point::ZERO
    }

    /// Invokes the window procedure. Called with the subsystem lock
    /// released; the procedure may re-enter any queue API.
    fn window_proc(&self, _hwnd: Hwnd, _message: u32, _wparam: usize, _lparam: isize) -> isize {
        0
    }

    /// Requests activation of a top-level window after a mouse click.
    /// Returns false when activation was refused, which eats the click.
    fn activate(&self, _hwnd: Hwnd) -> bool {
        true
    }
}

/// Whether a hook consultation accompanies a removing peek or a read-only
/// one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HookAction {
    Action,
    NoRemove,
}

/// Journal-record payload.
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub message: u32,
    pub hwnd: Option<Hwnd>,
    pub time: u32,
    pub param_l: u32,
    pub param_h: u32,
}

/// Payload handed to mouse hooks.
#[derive(Debug, Clone)]
pub struct MouseHookData {
    pub pt: Point,
    pub hwnd: Option<Hwnd>,
    pub hit_test: i32,
    pub mouse_data: u32,
    pub flags: u32,
    pub time: u32,
    pub extra_info: isize,
}

/// Pre-installed message filters. Boolean returns mean "suppress".
///
/// Filter methods may run under the subsystem lock and must not call back
/// into the queue API; [`direct_hook`](Self::direct_hook) and
/// [`load_hook_module`](Self::load_hook_module) run with it released.
pub trait HookChain: Send + Sync {
    fn journal_record(&self, _entry: &JournalEntry) {}

    fn mouse(&self, _action: HookAction, _message: u32, _data: &MouseHookData) -> bool {
        false
    }

    fn keyboard(&self, _action: HookAction, _vk: u16, _lparam: isize) -> bool {
        false
    }

    /// Low-level mouse hook consulted at device-insertion time.
    fn mouse_ll(&self, _message: u32, _data: &MouseHookData) -> bool {
        false
    }

    fn click_skipped(&self, _message: u32, _data: &MouseHookData) {}

    fn key_skipped(&self, _vk: u16, _lparam: isize) {}

    /// Direct hook call performed on behalf of a sent hook message.
    fn direct_hook(&self, _hook_id: u32, _code: i32, _wparam: usize, _lparam: isize) -> isize {
        0
    }

    /// Loads a hook module into the receiving process.
    fn load_hook_module(&self, _module: u32, _hook: usize, _unload: usize) -> isize {
        0
    }
}

/// Pointer renderer. `move_pointer` to (-1, -1) hides the pointer.
pub trait CursorRenderer: Send + Sync {
    fn set_pointer_shape(&self, _cursor: &Cursor, _pos: Point) {}

    fn move_pointer(&self, _pos: Point) {}
}

/// Timer services used by hover tracking.
pub trait TimerHost: Send + Sync {
    fn set_timer(&self, _hwnd: Hwnd, _id: usize, _period_ms: u32) {}

    fn kill_timer(&self, _hwnd: Hwnd, _id: usize) {}
}

/// System timer id used for the mouse hover period.
pub const HOVER_TIMER_ID: usize = 0xFFF0;

bitflags! {
    /// IME verdicts for a key about to be delivered.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
    pub struct ImeAction: u32 {
        const HOTKEY = 0x0001;
        const SKIP_THIS_KEY = 0x0002;
        const PROCESS_BY_IME = 0x0004;
    }
}

pub trait ImeHost: Send + Sync {
    fn process_key(&self, _hwnd: Hwnd, _message: u32, _wparam: usize, _lparam: isize) -> ImeAction {
        ImeAction::empty()
    }
}

/// Monotonic millisecond tick source stamping every input message. Swappable
/// so tests can drive double-click timing.
pub trait Clock: Send + Sync {
    fn tick_count(&self) -> u32;
}

struct SystemClock {
    start: Instant,
}

impl Clock for SystemClock {
    fn tick_count(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

/// A pointer shape owned by a queue. The queue only tracks identity and
/// hands the shape to the renderer; it never touches pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub id: u64,
    pub hotspot: Point,
}

impl Cursor {
    pub fn new(id: u64) -> Cursor {
        Cursor { id, hotspot: Point::ZERO }
    }
}

/// Tunable system parameters read by the cooker and the wait paths.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Swap left and right mouse buttons in down-key reports.
    pub swap_buttons: bool,
    /// Maximum delay between clicks of a double click, in milliseconds.
    pub double_click_time_ms: u32,
    /// Double-click slop rectangle, full width/height in pixels.
    pub double_click_width: i32,
    pub double_click_height: i32,
    pub click_lock: bool,
    pub click_lock_time_ms: u32,
    pub hover_width: i32,
    pub hover_height: i32,
    pub hover_time_ms: u32,
    /// A queue is considered hung when no message was dispatched for this
    /// long.
    pub hung_threshold_ms: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            swap_buttons: false,
            double_click_time_ms: 500,
            double_click_width: 4,
            double_click_height: 4,
            click_lock: false,
            click_lock_time_ms: 1200,
            hover_width: 4,
            hover_height: 4,
            hover_time_ms: 400,
            hung_threshold_ms: 5000,
        }
    }
}

/// The collaborator bundle. All fields are shared trait objects so a world
/// can be cloned out of the global slot and used with the subsystem lock
/// released.
#[derive(Clone)]
pub struct World {
    pub tree: Arc<dyn WindowTree>,
    pub hooks: Arc<dyn HookChain>,
    pub renderer: Arc<dyn CursorRenderer>,
    pub timers: Arc<dyn TimerHost>,
    pub ime: Arc<dyn ImeHost>,
    pub clock: Arc<dyn Clock>,
}

struct NullCollaborator;

impl WindowTree for NullCollaborator {}
impl HookChain for NullCollaborator {}
impl CursorRenderer for NullCollaborator {}
impl TimerHost for NullCollaborator {}
impl ImeHost for NullCollaborator {}

impl Default for World {
    fn default() -> Self {
        let null = Arc::new(NullCollaborator);
        World {
            tree: null.clone(),
            hooks: null.clone(),
            renderer: null.clone(),
            timers: null.clone(),
            ime: null,
            clock: Arc::new(SystemClock { start: Instant::now() }),
        }
    }
}

static WORLD: Lazy<RwLock<World>> = Lazy::new(|| RwLock::new(World::default()));

/// Installs a new collaborator bundle, returning the previous one.
pub fn install(world: World) -> World {
    std::mem::replace(&mut *WORLD.write(), world)
}

/// Clones the current bundle for use outside the subsystem lock.
pub(crate) fn world() -> World {
    WORLD.read().clone()
}

/// Millisecond tick from the installed clock.
pub(crate) fn tick_count() -> u32 {
    WORLD.read().clock.tick_count()
}
