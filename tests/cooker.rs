mod common;

#[cfg(test)]
mod cooker_tests {
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};

    use serial_test::serial;

    use msgq::{
        hit, ma, pack_point, unpack_point, vk, wm, Hwnd, Input, Msg, Point, QsFlags, Queue,
        WindowFilter,
    };

    use crate::common::Harness;

    fn mouse(message: u32, pt: Point) -> Msg {
        Msg {
            hwnd: None,
            message,
            wparam: 0,
            lparam: pack_point(pt),
            time: 0,
            pt,
        }
    }

    /// A burst of mouse moves coalesces into a single delivered move
    /// carrying the last position.
    #[serial]
    #[test]
    fn mouse_moves_coalesce_to_the_latest_point() {
        let harness = Harness::install();
        let queue = Queue::attach();
        let me = queue.id();
        harness.simple_window(Hwnd(20), me);
        harness.tree.put_pointer_over(Some(Hwnd(20)));

        Input::insert_mouse(mouse(wm::WM_MOUSEMOVE, Point::new(10, 10)), 0, 0, false);
        Input::insert_mouse(mouse(wm::WM_MOUSEMOVE, Point::new(11, 11)), 0, 0, false);
        Input::insert_mouse(mouse(wm::WM_MOUSEMOVE, Point::new(12, 12)), 0, 0, false);
        Input::insert_mouse(mouse(wm::WM_LBUTTONDOWN, Point::new(12, 12)), 0, 0, false);

        let (moved, _) =
            Queue::peek(WindowFilter::Any, 0, 0, QsFlags::MOUSE, true).expect("one move");
        assert_eq!(moved.message, wm::WM_MOUSEMOVE);
        assert_eq!(unpack_point(moved.lparam), Point::new(12, 12), "latest position wins");

        let (down, _) =
            Queue::peek(WindowFilter::Any, 0, 0, QsFlags::MOUSE, true).expect("the click");
        assert_eq!(down.message, wm::WM_LBUTTONDOWN);

        assert!(
            Queue::peek(WindowFilter::Any, 0, 0, QsFlags::MOUSE, true).is_none(),
            "exactly one move must have been queued"
        );
    }

    /// Two downs on the same spot inside the double-click window fold the
    /// second one into a DBLCLK; a third outside the window does not.
    #[serial]
    #[test]
    fn double_click_synthesis() {
        let harness = Harness::install();
        let queue = Queue::attach();
        let me = queue.id();
        harness.simple_window(Hwnd(21), me);
        harness.tree.put_pointer_over(Some(Hwnd(21)));
        Queue::update_settings(|settings| {
            settings.double_click_time_ms = 500;
            settings.double_click_width = 8;
            settings.double_click_height = 8;
        });

        harness.clock.set(1000);
        Input::insert_mouse(mouse(wm::WM_LBUTTONDOWN, Point::new(5, 5)), 0, 0, false);
        let (first, _) =
            Queue::peek(WindowFilter::Any, 0, 0, QsFlags::MOUSE, true).expect("first down");
        assert_eq!(first.message, wm::WM_LBUTTONDOWN);

        harness.clock.set(1100);
        Input::insert_mouse(mouse(wm::WM_LBUTTONDOWN, Point::new(6, 6)), 0, 0, false);
        let (second, _) =
            Queue::peek(WindowFilter::Any, 0, 0, QsFlags::MOUSE, true).expect("second down");
        assert_eq!(second.message, wm::WM_LBUTTONDBLCLK, "inside time and slop");

        // The synthesis consumed the saved state; a third click within the
        // interval starts a new cycle.
        harness.clock.set(1200);
        Input::insert_mouse(mouse(wm::WM_LBUTTONDOWN, Point::new(6, 6)), 0, 0, false);
        let (third, _) =
            Queue::peek(WindowFilter::Any, 0, 0, QsFlags::MOUSE, true).expect("third down");
        assert_eq!(third.message, wm::WM_LBUTTONDOWN);

        // Too slow: outside the configured interval.
        harness.clock.set(5000);
        Input::insert_mouse(mouse(wm::WM_LBUTTONDOWN, Point::new(6, 6)), 0, 0, false);
        let (late, _) =
            Queue::peek(WindowFilter::Any, 0, 0, QsFlags::MOUSE, true).expect("late down");
        assert_eq!(late.message, wm::WM_LBUTTONDOWN);

        // Too far: within time but outside the slop rectangle.
        harness.clock.set(5100);
        Input::insert_mouse(mouse(wm::WM_LBUTTONDOWN, Point::new(50, 50)), 0, 0, false);
        let (far, _) =
            Queue::peek(WindowFilter::Any, 0, 0, QsFlags::MOUSE, true).expect("far down");
        assert_eq!(far.message, wm::WM_LBUTTONDOWN);
    }

    /// The cooked-message range filter keeps the permissive or-test: a
    /// down translated to a DBLCLK is still delivered through a filter
    /// pinned to the DOWN code.
    #[serial]
    #[test]
    fn translated_double_click_passes_a_down_only_filter() {
        let harness = Harness::install();
        let queue = Queue::attach();
        let me = queue.id();
        harness.simple_window(Hwnd(22), me);
        harness.tree.put_pointer_over(Some(Hwnd(22)));

        harness.clock.set(1000);
        Input::insert_mouse(mouse(wm::WM_LBUTTONDOWN, Point::new(5, 5)), 0, 0, false);
        Queue::peek(WindowFilter::Any, wm::WM_LBUTTONDOWN, wm::WM_LBUTTONDOWN, QsFlags::empty(), true)
            .expect("first down");

        harness.clock.set(1050);
        Input::insert_mouse(mouse(wm::WM_LBUTTONDOWN, Point::new(5, 5)), 0, 0, false);
        let (second, _) = Queue::peek(
            WindowFilter::Any,
            wm::WM_LBUTTONDOWN,
            wm::WM_LBUTTONDOWN,
            QsFlags::empty(),
            true,
        )
        .expect("translated message still passes the filter");
        assert_eq!(second.message, wm::WM_LBUTTONDBLCLK);
    }

    /// Non-client hits translate the message code and stash the hit code
    /// in the wparam.
    #[serial]
    #[test]
    fn non_client_translation() {
        let harness = Harness::install();
        let queue = Queue::attach();
        let me = queue.id();
        harness.simple_window(Hwnd(23), me);
        harness.tree.set_hit(Hwnd(23), hit::HTCAPTION);
        harness.tree.put_pointer_over(Some(Hwnd(23)));

        Input::insert_mouse(mouse(wm::WM_LBUTTONDOWN, Point::new(30, 2)), 0, 0, false);
        let (msg, _) =
            Queue::peek(WindowFilter::Any, 0, 0, QsFlags::MOUSE, true).expect("nc down");
        assert_eq!(msg.message, wm::WM_NCLBUTTONDOWN);
        assert_eq!(msg.wparam, hit::HTCAPTION as usize);
    }

    /// A queued record whose window migrated to another queue by peek time
    /// is dropped and consumed.
    #[serial]
    #[test]
    fn foreign_queue_input_is_dropped() {
        let harness = Harness::install();
        let queue = Queue::attach();
        let me = queue.id();
        harness.simple_window(Hwnd(24), me);
        harness.tree.put_pointer_over(Some(Hwnd(24)));

        // Keep a second queue thread alive for the duration.
        let (tx, rx) = std::sync::mpsc::channel();
        let (hold_tx, hold_rx) = std::sync::mpsc::channel::<()>();
        let other = std::thread::spawn(move || {
            let queue = Queue::attach();
            tx.send(queue.id()).unwrap();
            hold_rx.recv().unwrap();
        });
        let foreign = rx.recv().unwrap();

        Input::insert_mouse(mouse(wm::WM_LBUTTONDOWN, Point::new(1, 1)), 0, 0, false);
        // The window changes hands before the record is cooked.
        harness.tree.set_owner(Hwnd(24), foreign);

        assert!(
            Queue::peek(WindowFilter::Any, 0, 0, QsFlags::MOUSE, true).is_none(),
            "foreign input must not be delivered here"
        );
        // And it must be consumed, not left in the queue.
        assert!(Queue::peek(WindowFilter::Any, 0, 0, QsFlags::MOUSE, true).is_none());

        hold_tx.send(()).unwrap();
        other.join().unwrap();
    }

    /// A suppressing mouse hook eats the message and reports the skipped
    /// click to the CBT hook.
    #[serial]
    #[test]
    fn mouse_hook_suppression() {
        let harness = Harness::install();
        let queue = Queue::attach();
        let me = queue.id();
        harness.simple_window(Hwnd(25), me);
        harness.tree.put_pointer_over(Some(Hwnd(25)));
        harness.hooks.suppress_mouse.store(true, Ordering::SeqCst);

        Input::insert_mouse(mouse(wm::WM_LBUTTONDOWN, Point::new(3, 3)), 0, 0, false);
        assert!(Queue::peek(WindowFilter::Any, 0, 0, QsFlags::MOUSE, true).is_none());
        assert_eq!(
            harness.hooks.click_skipped.lock().unwrap().as_slice(),
            &[wm::WM_LBUTTONDOWN]
        );
    }

    /// A window procedure answering the activation probe with an and-eat
    /// code consumes the click.
    #[serial]
    #[test]
    fn activation_can_eat_the_click() {
        let harness = Harness::install();
        let queue = Queue::attach();
        let me = queue.id();
        let setcursor_seen = Arc::new(Mutex::new(Vec::new()));
        let log = setcursor_seen.clone();
        harness.window_with_proc(
            Hwnd(26),
            me,
            Arc::new(move |_, message, _, _| {
                log.lock().unwrap().push(message);
                if message == wm::WM_MOUSEACTIVATE {
                    return ma::MA_NOACTIVATEANDEAT;
                }
                0
            }),
        );
        harness.tree.put_pointer_over(Some(Hwnd(26)));

        Input::insert_mouse(mouse(wm::WM_LBUTTONDOWN, Point::new(4, 4)), 0, 0, false);
        assert!(
            Queue::peek(WindowFilter::Any, 0, 0, QsFlags::MOUSE, true).is_none(),
            "the and-eat verdict must swallow the click"
        );
        let seen = setcursor_seen.lock().unwrap();
        assert!(seen.contains(&wm::WM_MOUSEACTIVATE));
        assert!(seen.contains(&wm::WM_SETCURSOR), "set-cursor still goes out");
    }

    /// F1 key-down synthesises a help post for the target window.
    #[serial]
    #[test]
    fn f1_posts_help() {
        let harness = Harness::install();
        let queue = Queue::attach();
        let me = queue.id();
        harness.simple_window(Hwnd(27), me);

        let msg = Msg {
            hwnd: Some(Hwnd(27)),
            message: wm::WM_KEYDOWN,
            wparam: vk::VK_F1 as usize,
            lparam: 0,
            time: 0,
            pt: Point::ZERO,
        };
        Input::insert_keyboard(me, msg, 0);

        let (key, _) = Queue::peek(WindowFilter::Any, 0, 0, QsFlags::KEY, true).expect("key down");
        assert_eq!(key.message, wm::WM_KEYDOWN);

        let (help, _) =
            Queue::peek(WindowFilter::Any, 0, 0, QsFlags::POSTMESSAGE, true).expect("help post");
        assert_eq!(help.message, wm::WM_KEYF1);
        assert_eq!(help.hwnd, Some(Hwnd(27)));
    }

    /// Releasing the menu key posts a context-menu request when no menu is
    /// being tracked.
    #[serial]
    #[test]
    fn apps_key_posts_context_menu() {
        let harness = Harness::install();
        let queue = Queue::attach();
        let me = queue.id();
        harness.simple_window(Hwnd(28), me);

        let msg = Msg {
            hwnd: Some(Hwnd(28)),
            message: wm::WM_KEYUP,
            wparam: vk::VK_APPS as usize,
            lparam: 0,
            time: 0,
            pt: Point::ZERO,
        };
        Input::insert_keyboard(me, msg, 0);

        Queue::peek(WindowFilter::Any, 0, 0, QsFlags::KEY, true).expect("key up");
        let (menu, _) = Queue::peek(WindowFilter::Any, 0, 0, QsFlags::POSTMESSAGE, true)
            .expect("context menu post");
        assert_eq!(menu.message, wm::WM_CONTEXTMENU);
    }

    /// A suppressing keyboard hook eats the key and reports it skipped.
    #[serial]
    #[test]
    fn keyboard_hook_suppression() {
        let harness = Harness::install();
        let queue = Queue::attach();
        let me = queue.id();
        harness.simple_window(Hwnd(29), me);
        harness.hooks.suppress_keyboard.store(true, Ordering::SeqCst);

        let msg = Msg {
            hwnd: Some(Hwnd(29)),
            message: wm::WM_KEYDOWN,
            wparam: vk::VK_SHIFT as usize,
            lparam: 0,
            time: 0,
            pt: Point::ZERO,
        };
        Input::insert_keyboard(me, msg, 0);

        assert!(Queue::peek(WindowFilter::Any, 0, 0, QsFlags::KEY, true).is_none());
        assert_eq!(
            harness.hooks.key_skipped.lock().unwrap().as_slice(),
            &[vk::VK_SHIFT as u16]
        );
    }
}
