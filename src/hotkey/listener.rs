//! Dedicated OS-thread hotkey listener using `rdev::listen`.
//!
//! `rdev::listen` blocks forever and has no shutdown API, so the thread lives
//! until the process exits.  Dropping [`HotkeyListener`] only sets a flag that
//! makes the callback ignore further key presses.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::session::SessionHandle;

pub struct HotkeyListener {
    stop: Arc<AtomicBool>,
    _thread: std::thread::JoinHandle<()>,
}

impl HotkeyListener {
    /// Toggle the session whenever `key` goes down.  Auto-repeat while the
    /// key is held is ignored.
    pub fn start(key: rdev::Key, handle: SessionHandle) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("hotkey-listener".into())
            .spawn(move || {
                let mut held = false;
                let result = rdev::listen(move |event| {
                    if stop_flag.load(Ordering::Relaxed) {
                        return;
                    }
                    match event.event_type {
                        rdev::EventType::KeyPress(k) if k == key && !held => {
                            held = true;
                            log::debug!("hotkey: {key:?} pressed");
                            handle.toggle();
                        }
                        rdev::EventType::KeyRelease(k) if k == key => held = false,
                        _ => {}
                    }
                });

                if let Err(e) = result {
                    log::error!("hotkey-listener: rdev::listen exited with error: {e:?}");
                }
            })?;

        log::info!("hotkey: {key:?} toggles the session");
        Ok(Self { stop, _thread: thread })
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
