//! Shared harness: a scriptable collaborator world the queue tests drive.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use msgq::world::{
    Clock, Cursor, CursorRenderer, HookAction, HookChain, ImeAction, ImeHost, JournalEntry,
    MouseHookData, TimerHost, WindowInfo, World,
};
use msgq::{hit, Hwnd, Point, Queue, Settings, ThreadId};

pub type WindowProc = Arc<dyn Fn(Hwnd, u32, usize, isize) -> isize + Send + Sync>;

pub struct TestWindow {
    pub info: WindowInfo,
    pub hit: i32,
    pub parent: Option<Hwnd>,
    pub proc_fn: WindowProc,
}

/// A window tree whose layout and procedures tests script directly.
#[derive(Default)]
pub struct TestTree {
    windows: Mutex<HashMap<u64, TestWindow>>,
    /// Window reported under the pointer for every lookup.
    under_pointer: Mutex<Option<Hwnd>>,
}

impl TestTree {
    pub fn add_window(&self, window: TestWindow) {
        self.windows.lock().unwrap().insert(window.info.hwnd.0, window);
    }

    pub fn put_pointer_over(&self, hwnd: Option<Hwnd>) {
        *self.under_pointer.lock().unwrap() = hwnd;
    }

    pub fn set_password_edit(&self, hwnd: Hwnd, value: bool) {
        if let Some(window) = self.windows.lock().unwrap().get_mut(&hwnd.0) {
            window.info.password_edit = value;
        }
    }

    pub fn set_hit(&self, hwnd: Hwnd, hit: i32) {
        if let Some(window) = self.windows.lock().unwrap().get_mut(&hwnd.0) {
            window.hit = hit;
        }
    }

    pub fn set_class_style(&self, hwnd: Hwnd, class_style: u32) {
        if let Some(window) = self.windows.lock().unwrap().get_mut(&hwnd.0) {
            window.info.class_style = class_style;
        }
    }

    pub fn set_owner(&self, hwnd: Hwnd, thread: ThreadId) {
        if let Some(window) = self.windows.lock().unwrap().get_mut(&hwnd.0) {
            window.info.thread = thread;
        }
    }

    fn info(&self, hwnd: Hwnd) -> Option<WindowInfo> {
        self.windows.lock().unwrap().get(&hwnd.0).map(|w| w.info.clone())
    }
}

impl msgq::world::WindowTree for TestTree {
    fn top_level_at(&self, _pt: Point) -> Option<WindowInfo> {
        let hwnd = (*self.under_pointer.lock().unwrap())?;
        self.info(hwnd)
    }

    fn window_from_point(&self, _pt: Point) -> Option<(WindowInfo, i32)> {
        let hwnd = (*self.under_pointer.lock().unwrap())?;
        let windows = self.windows.lock().unwrap();
        let window = windows.get(&hwnd.0)?;
        Some((window.info.clone(), window.hit))
    }

    fn validate(&self, hwnd: Hwnd) -> Option<WindowInfo> {
        self.info(hwnd)
    }

    fn parent(&self, hwnd: Hwnd) -> Option<WindowInfo> {
        let parent = self.windows.lock().unwrap().get(&hwnd.0)?.parent?;
        self.info(parent)
    }

    fn non_child_ancestor(&self, hwnd: Hwnd) -> Option<WindowInfo> {
        let mut current = hwnd;
        loop {
            let windows = self.windows.lock().unwrap();
            let window = windows.get(&current.0)?;
            if window.info.style & msgq::style::WS_CHILD == 0 {
                return Some(window.info.clone());
            }
            let parent = window.parent?;
            drop(windows);
            current = parent;
        }
    }

    fn window_proc(&self, hwnd: Hwnd, message: u32, wparam: usize, lparam: isize) -> isize {
        let proc_fn = {
            let windows = self.windows.lock().unwrap();
            windows.get(&hwnd.0).map(|w| w.proc_fn.clone())
        };
        match proc_fn {
            Some(proc_fn) => proc_fn(hwnd, message, wparam, lparam),
            None => 0,
        }
    }
}

/// Renderer double recording every pointer move and shape change.
#[derive(Default)]
pub struct TestRenderer {
    pub moves: Mutex<Vec<Point>>,
    pub shapes: Mutex<Vec<u64>>,
}

impl CursorRenderer for TestRenderer {
    fn set_pointer_shape(&self, cursor: &Cursor, _pos: Point) {
        self.shapes.lock().unwrap().push(cursor.id);
    }

    fn move_pointer(&self, pos: Point) {
        self.moves.lock().unwrap().push(pos);
    }
}

/// Hook chain double with scriptable suppression and call records.
#[derive(Default)]
pub struct TestHooks {
    pub suppress_mouse: std::sync::atomic::AtomicBool,
    pub suppress_keyboard: std::sync::atomic::AtomicBool,
    pub journal: Mutex<Vec<u32>>,
    pub click_skipped: Mutex<Vec<u32>>,
    pub key_skipped: Mutex<Vec<u16>>,
    pub direct: Mutex<Vec<(u32, i32)>>,
}

impl HookChain for TestHooks {
    fn journal_record(&self, entry: &JournalEntry) {
        self.journal.lock().unwrap().push(entry.message);
    }

    fn mouse(&self, _action: HookAction, _message: u32, _data: &MouseHookData) -> bool {
        self.suppress_mouse.load(Ordering::SeqCst)
    }

    fn keyboard(&self, _action: HookAction, _vk: u16, _lparam: isize) -> bool {
        self.suppress_keyboard.load(Ordering::SeqCst)
    }

    fn click_skipped(&self, message: u32, _data: &MouseHookData) {
        self.click_skipped.lock().unwrap().push(message);
    }

    fn key_skipped(&self, vk: u16, _lparam: isize) {
        self.key_skipped.lock().unwrap().push(vk);
    }

    fn direct_hook(&self, hook_id: u32, code: i32, _wparam: usize, _lparam: isize) -> isize {
        self.direct.lock().unwrap().push((hook_id, code));
        hook_id as isize
    }
}

/// Timer host double recording set/kill calls.
#[derive(Default)]
pub struct TestTimers {
    pub set: Mutex<Vec<(Hwnd, usize, u32)>>,
    pub killed: Mutex<Vec<(Hwnd, usize)>>,
}

impl TimerHost for TestTimers {
    fn set_timer(&self, hwnd: Hwnd, id: usize, period_ms: u32) {
        self.set.lock().unwrap().push((hwnd, id, period_ms));
    }

    fn kill_timer(&self, hwnd: Hwnd, id: usize) {
        self.killed.lock().unwrap().push((hwnd, id));
    }
}

#[derive(Default)]
pub struct TestIme {
    pub verdict: Mutex<ImeAction>,
}

impl ImeHost for TestIme {
    fn process_key(&self, _hwnd: Hwnd, _message: u32, _wparam: usize, _lparam: isize) -> ImeAction {
        *self.verdict.lock().unwrap()
    }
}

/// Manually advanced millisecond clock.
#[derive(Default)]
pub struct TestClock {
    now: AtomicU32,
}

impl TestClock {
    pub fn advance(&self, ms: u32) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u32) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn tick_count(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}

/// The assembled harness, with typed handles to every double.
pub struct Harness {
    pub tree: Arc<TestTree>,
    pub renderer: Arc<TestRenderer>,
    pub hooks: Arc<TestHooks>,
    pub timers: Arc<TestTimers>,
    pub ime: Arc<TestIme>,
    pub clock: Arc<TestClock>,
}

impl Harness {
    /// Builds a fresh world, installs it, and resets the system settings.
    pub fn install() -> Harness {
        let harness = Harness {
            tree: Arc::new(TestTree::default()),
            renderer: Arc::new(TestRenderer::default()),
            hooks: Arc::new(TestHooks::default()),
            timers: Arc::new(TestTimers::default()),
            ime: Arc::new(TestIme::default()),
            clock: Arc::new(TestClock::default()),
        };
        msgq::world::install(World {
            tree: harness.tree.clone(),
            hooks: harness.hooks.clone(),
            renderer: harness.renderer.clone(),
            timers: harness.timers.clone(),
            ime: harness.ime.clone(),
            clock: harness.clock.clone(),
        });
        Queue::update_settings(|settings| *settings = Settings::default());
        harness
    }

    /// Adds a plain top-level window owned by `thread` whose procedure
    /// always returns zero.
    pub fn simple_window(&self, hwnd: Hwnd, thread: ThreadId) {
        self.window_with_proc(hwnd, thread, Arc::new(|_, _, _, _| 0));
    }

    /// Adds a top-level window owned by `thread` with a scripted procedure.
    pub fn window_with_proc(&self, hwnd: Hwnd, thread: ThreadId, proc_fn: WindowProc) {
        self.tree.add_window(TestWindow {
            info: WindowInfo {
                hwnd,
                thread,
                style: 0,
                ex_style: 0,
                class_style: msgq::style::CS_DBLCLKS,
                password_edit: false,
                client_origin: Point::ZERO,
            },
            hit: hit::HTCLIENT,
            parent: None,
            proc_fn,
        });
    }
}
