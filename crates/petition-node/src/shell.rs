//! Presentation state owned by the node: the notification slot and the intro
//! overlay, each with a timer that is cancelled when superseded or dropped.

use petition_core::Notice;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// How long a notice stays visible.
pub const NOTICE_TTL: Duration = Duration::from_millis(3500);

/// How long the intro overlay stays up unless dismissed.
pub const INTRO_TTL: Duration = Duration::from_secs(7);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A deferred task that is aborted when rescheduled, cancelled or dropped.
#[derive(Default)]
pub struct ScopedTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ScopedTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, replacing whatever was scheduled.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        if let Some(previous) = lock(&self.handle).replace(handle) {
            previous.abort();
        }
    }

    /// Abort the scheduled task, if any.
    pub fn cancel(&self) {
        if let Some(handle) = lock(&self.handle).take() {
            handle.abort();
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Default)]
struct SlotState {
    current: Option<Notice>,
    generation: u64,
}

/// Single notification slot. A new notice replaces the old one; each notice
/// clears itself after the slot's ttl.
pub struct NoticeSlot {
    state: Arc<Mutex<SlotState>>,
    changes: broadcast::Sender<Option<Notice>>,
    timer: ScopedTimer,
    ttl: Duration,
}

impl Default for NoticeSlot {
    fn default() -> Self {
        Self::new(NOTICE_TTL)
    }
}

impl NoticeSlot {
    pub fn new(ttl: Duration) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(SlotState::default())),
            changes,
            timer: ScopedTimer::new(),
            ttl,
        }
    }

    /// Show `notice`, replacing the current one.
    pub fn show(&self, notice: Notice) {
        let generation = {
            let mut state = lock(&self.state);
            state.generation += 1;
            state.current = Some(notice.clone());
            state.generation
        };
        let _ = self.changes.send(Some(notice));

        let state = Arc::clone(&self.state);
        let changes = self.changes.clone();
        self.timer.schedule(self.ttl, async move {
            let cleared = {
                let mut state = lock(&state);
                let current = state.generation == generation;
                if current {
                    state.current = None;
                }
                current
            };
            if cleared {
                let _ = changes.send(None);
            }
        });
    }

    /// The visible notice, if any.
    pub fn current(&self) -> Option<Notice> {
        lock(&self.state).current.clone()
    }

    /// Subscribe to notice changes (`None` when the slot clears).
    pub fn subscribe(&self) -> broadcast::Receiver<Option<Notice>> {
        self.changes.subscribe()
    }
}

/// Intro overlay shown when the page first opens.
pub struct IntroOverlay {
    visible: Arc<AtomicBool>,
    shown_at: AtomicU64,
    timer: ScopedTimer,
}

impl Default for IntroOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl IntroOverlay {
    pub fn new() -> Self {
        Self {
            visible: Arc::new(AtomicBool::new(false)),
            shown_at: AtomicU64::new(0),
            timer: ScopedTimer::new(),
        }
    }

    /// Show the overlay and dismiss it after `ttl`.
    pub fn show_for(&self, ttl: Duration) {
        self.visible.store(true, Ordering::SeqCst);
        self.shown_at.store(petition_core::now_millis(), Ordering::SeqCst);

        let visible = Arc::clone(&self.visible);
        self.timer.schedule(ttl, async move {
            visible.store(false, Ordering::SeqCst);
        });
    }

    /// Dismiss now.
    pub fn dismiss(&self) {
        self.timer.cancel();
        self.visible.store(false, Ordering::SeqCst);
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    /// When the overlay was last shown (epoch ms, 0 if never).
    pub fn shown_at(&self) -> u64 {
        self.shown_at.load(Ordering::SeqCst)
    }
}
