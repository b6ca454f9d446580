mod common;

#[cfg(test)]
mod lifecycle_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use serial_test::serial;

    use msgq::{wm, Hwnd, Msg, QsFlags, Queue, WaitStatus, WindowFilter};

    use crate::common::Harness;

    /// Attachments nest; the queue survives until the last one drops.
    #[serial]
    #[test]
    fn attachments_nest() {
        let _harness = Harness::install();
        let outer = Queue::attach();
        let me = outer.id();

        let inner = Queue::attach();
        assert_eq!(inner.id(), me, "re-attaching binds to the same queue");
        drop(inner);

        // Still attached: posts keep landing.
        Queue::post(me, Msg::new(None, wm::WM_APP, 1, 0), false, QsFlags::POSTMESSAGE, 0, 0);
        assert!(Queue::peek(WindowFilter::Any, 0, 0, QsFlags::POSTMESSAGE, true).is_some());

        drop(outer);
        assert!(Queue::current().is_none(), "last drop unbinds the thread");
    }

    /// A quit request is delivered after both FIFOs drain, regardless of
    /// filters, and removal clears it.
    #[serial]
    #[test]
    fn quit_is_delivered_last() {
        let _harness = Harness::install();
        let queue = Queue::attach();
        let me = queue.id();

        Queue::post(me, Msg::new(None, wm::WM_APP, 5, 0), false, QsFlags::POSTMESSAGE, 0, 0);
        Queue::post_quit(me, 33);

        let (first, _) =
            Queue::peek(WindowFilter::Any, 0, 0, QsFlags::POSTMESSAGE, true).expect("app message");
        assert_eq!(first.message, wm::WM_APP, "queued messages drain before quit");

        let (quit, _) = Queue::peek(WindowFilter::Any, 0, 0, QsFlags::POSTMESSAGE, true)
            .expect("quit message");
        assert_eq!(quit.message, wm::WM_QUIT);
        assert_eq!(quit.wparam, 33, "exit code travels in the wparam");

        assert!(
            Queue::peek(WindowFilter::Any, 0, 0, QsFlags::POSTMESSAGE, true).is_none(),
            "removal consumes the quit request"
        );
    }

    /// Messages come out in insertion order within each list, with the
    /// hardware list served first.
    #[serial]
    #[test]
    fn fifo_order_hardware_before_posted() {
        let harness = Harness::install();
        let queue = Queue::attach();
        let me = queue.id();
        harness.simple_window(Hwnd(40), me);
        harness.tree.put_pointer_over(Some(Hwnd(40)));

        Queue::post(me, Msg::new(None, wm::WM_APP, 1, 0), false, QsFlags::POSTMESSAGE, 0, 0);
        Queue::post(me, Msg::new(None, wm::WM_APP, 2, 0), false, QsFlags::POSTMESSAGE, 0, 0);

        let key = Msg {
            hwnd: Some(Hwnd(40)),
            message: wm::WM_KEYDOWN,
            wparam: 0x41,
            lparam: 0,
            time: 0,
            pt: msgq::Point::ZERO,
        };
        Queue::post(me, key, true, QsFlags::KEY, 0, 0);

        let all = QsFlags::ALLINPUT;
        let first = Queue::peek(WindowFilter::Any, 0, 0, all, true).unwrap().0;
        assert_eq!(first.message, wm::WM_KEYDOWN, "hardware drains first");
        let second = Queue::peek(WindowFilter::Any, 0, 0, all, true).unwrap().0;
        assert_eq!(second.wparam, 1);
        let third = Queue::peek(WindowFilter::Any, 0, 0, all, true).unwrap().0;
        assert_eq!(third.wparam, 2);
    }

    /// Destroying a window purges its posted messages and promotes an
    /// unseen quit.
    #[serial]
    #[test]
    fn window_purge_promotes_quit() {
        let harness = Harness::install();
        let queue = Queue::attach();
        let me = queue.id();
        harness.simple_window(Hwnd(41), me);
        harness.simple_window(Hwnd(42), me);

        Queue::post(
            me,
            Msg::new(Some(Hwnd(41)), wm::WM_APP, 0, 0),
            false,
            QsFlags::POSTMESSAGE,
            0,
            0,
        );
        Queue::post(
            me,
            Msg::new(Some(Hwnd(41)), wm::WM_QUIT, 77, 0),
            false,
            QsFlags::POSTMESSAGE,
            0,
            0,
        );
        Queue::post(
            me,
            Msg::new(Some(Hwnd(42)), wm::WM_APP, 9, 0),
            false,
            QsFlags::POSTMESSAGE,
            0,
            0,
        );

        Queue::remove_window_messages(Hwnd(41));

        let (kept, _) =
            Queue::peek(WindowFilter::Any, 0, 0, QsFlags::POSTMESSAGE, true).expect("other window");
        assert_eq!(kept.hwnd, Some(Hwnd(42)), "other windows keep their messages");

        let (quit, _) =
            Queue::peek(WindowFilter::Any, 0, 0, QsFlags::POSTMESSAGE, true).expect("promoted quit");
        assert_eq!(quit.message, wm::WM_QUIT);
        assert_eq!(quit.wparam, 77);
    }

    /// A queue that dispatched nothing for longer than the threshold
    /// reports as hung.
    #[serial]
    #[test]
    fn hang_detection_uses_last_dispatch_age() {
        let harness = Harness::install();
        let queue = Queue::attach();
        let me = queue.id();
        harness.simple_window(Hwnd(43), me);
        Queue::update_settings(|settings| settings.hung_threshold_ms = 1000);

        harness.clock.set(500);
        assert!(!Queue::is_hung(me));

        harness.clock.set(5000);
        assert!(Queue::is_hung(me));
    }

    /// An interrupt wakes a thread out of its message wait.
    #[serial]
    #[test]
    fn interrupt_breaks_the_wait() {
        let _harness = Harness::install();
        let _queue = Queue::attach();

        let (tx, rx) = std::sync::mpsc::channel();
        let woken = Arc::new(AtomicUsize::new(0));
        let flag = woken.clone();
        let handle = thread::spawn(move || {
            let queue = Queue::attach();
            tx.send(queue.id()).unwrap();
            let status = Queue::wait_for_new_messages();
            if status == WaitStatus::Interrupted {
                flag.store(1, Ordering::SeqCst);
            }
        });
        let target = rx.recv().unwrap();

        thread::sleep(Duration::from_millis(50));
        Queue::interrupt(target);
        handle.join().unwrap();
        assert_eq!(woken.load(Ordering::SeqCst), 1);
    }

    /// Posting at a dead thread id is silently dropped.
    #[serial]
    #[test]
    fn posts_to_dead_queues_are_dropped() {
        let _harness = Harness::install();
        let _queue = Queue::attach();

        let handle = thread::spawn(|| {
            let queue = Queue::attach();
            queue.id()
        });
        let gone = handle.join().unwrap();

        // Nothing to assert beyond "does not panic or wedge".
        Queue::post(gone, Msg::new(None, wm::WM_APP, 0, 0), false, QsFlags::POSTMESSAGE, 0, 0);
        Queue::post_quit(gone, 0);
    }
}
