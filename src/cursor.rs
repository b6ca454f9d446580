//! Cursor ownership and visibility.
//!
//! Each queue carries its own cursor object and visibility counter; only
//! the queue owning the window under the pointer may affect what is
//! rendered on screen.

use std::sync::Arc;

use tracing::trace;

use crate::message::Point;
use crate::thread::{self, Core};
use crate::world::{self, Cursor};
use crate::{Queue, message::ThreadId};

impl Queue {
    /// Swaps the calling queue's cursor, returning the previous one.
    ///
    /// The new shape is rendered immediately only when the cursor is
    /// visible and the window under the pointer belongs to this queue;
    /// otherwise rendering is deferred until the pointer next crosses into
    /// one of our windows. Passing `None` while visible hides the pointer.
    pub fn set_cursor(new: Option<Arc<Cursor>>) -> Option<Arc<Cursor>> {
        let Some(id) = thread::current_thread() else { return None };
        let mut core = thread::user().lock();
        set_cursor_locked(&mut core, id, new)
    }

    /// Adjusts the visibility counter; the pointer is shown while the
    /// counter is at least zero. Rendering changes only on the transition
    /// points (0 on show, -1 on hide). Returns the new counter.
    pub fn show_cursor(show: bool) -> i32 {
        let Some(id) = thread::current_thread() else { return -1 };
        let mut core = thread::user().lock();

        let level = {
            let Some(pti) = core.thread_mut(id) else { return -1 };
            pti.cursor_level += if show { 1 } else { -1 };
            pti.cursor_level
        };

        // Away from the transition points there is nothing to render.
        if (show && level != 0) || (!show && level != -1) {
            return level;
        }

        if queue_owns_pointer(&core, id) {
            let renderer = world::world().renderer;
            if show {
                trace!("showing pointer");
                renderer.move_pointer(core.cursor_pos);
            } else {
                trace!("hiding pointer");
                renderer.move_pointer(Point::new(-1, -1));
            }
            core.showing_cursor = level;
        }

        level
    }
}

/// True when the top-level window under the pointer belongs to the queue.
fn queue_owns_pointer(core: &Core, id: ThreadId) -> bool {
    world::world()
        .tree
        .top_level_at(core.cursor_pos)
        .is_some_and(|info| info.thread == id)
}

pub(crate) fn set_cursor_locked(
    core: &mut Core,
    id: ThreadId,
    new: Option<Arc<Cursor>>,
) -> Option<Arc<Cursor>> {
    let (old, level) = {
        let Some(pti) = core.thread_mut(id) else { return None };
        let old = pti.cursor.clone();

        let same = match (&old, &new) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if same {
            return old;
        }

        pti.cursor = new.clone();
        (old, pti.cursor_level)
    };

    // An invisible cursor defers rendering until shown again.
    if level < 0 {
        return old;
    }

    if core.cursor_owner.is_none() {
        core.cursor_owner = Some(id);
    }

    if queue_owns_pointer(core, id) {
        let renderer = world::world().renderer;
        match &new {
            Some(cursor) => renderer.set_pointer_shape(cursor, core.cursor_pos),
            // The old and new cursors differ, so a missing new shape means
            // hide.
            None => {
                renderer.move_pointer(Point::new(-1, -1));
                trace!("removing pointer");
            }
        }
        core.current_cursor = new;
    }

    old
}
