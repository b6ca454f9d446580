//! # msgq
//!
//! A per-thread windowing message queue: the rendezvous point between
//! hardware input, inter-thread message delivery and an application's
//! message loop.
//!
//! ## Core Components
//!
//! - **[`Queue`]**: The per-thread queue façade. Attach a thread, post and
//!   peek messages, send synchronously across threads, reply early, track
//!   key state and own the cursor.
//! - **[`Input`]**: Device-side entry points injecting raw mouse and
//!   keyboard events, with hit-testing, pointer updates and mouse-move
//!   coalescing.
//! - **[`world`]**: The collaborator seams (window tree, hook chain,
//!   cursor renderer, timers, IME, clock) the queue consumes but does not
//!   own.
//!
//! ## Example
//!
//! ```no_run
//! use msgq::{wm, QsFlags, Queue, WindowFilter};
//!
//! // Bind the calling thread and run a message loop on it.
//! let queue = Queue::attach();
//! loop {
//!     while let Some((msg, _extra)) =
//!         Queue::peek(WindowFilter::Any, 0, 0, QsFlags::ALLINPUT, true)
//!     {
//!         if msg.message == wm::WM_QUIT {
//!             return;
//!         }
//!         // ... dispatch msg ...
//!     }
//!     Queue::wait_for_new_messages();
//! }
//! ```

mod cooker;
mod cursor;
mod keystate;
mod message;
mod peek;
mod pool;
mod post;
mod send;
mod thread;
mod wake;
pub mod world;

pub use crate::keystate::{KEY_STATE_DOWN, KEY_STATE_LOCKED, KS_DOWN_BIT, KS_LOCK_BIT};
pub use crate::message::{
    hit, hiword, is_button_down_message, is_keyboard_message, is_mouse_message, loword, ma,
    make_long, mk, pack_point, style, unpack_point, vk, wm, xbutton_from_wparam, Hwnd, Msg, Point,
    ThreadId, XBUTTON1, XBUTTON2,
};
pub use crate::peek::{WaitStatus, WindowFilter};
pub use crate::send::{SendAsyncProc, SendClass, SendStatus};
pub use crate::thread::{QueueAttachment, StateWindow};
pub use crate::wake::QsFlags;
pub use crate::world::{Cursor, Settings, World};

/// The per-thread message queue façade.
///
/// Every thread that enters the subsystem owns exactly one queue for its
/// lifetime; all associated functions operate on the calling thread's
/// queue unless they take an explicit target [`ThreadId`].
pub struct Queue;

/// Device-side injection of raw input events.
pub struct Input;
