//! New-incident notification.
//!
//! The aggregator calls a [`NotificationSink`] at most once per completed
//! refresh cycle, and only when that cycle brought incidents newer than
//! anything in the previous one.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use vicalert_storage::records::AudioSettings;
use vicalert_storage::{KeyValueStore, keys, load_or_default};

/// Receives the "new incidents arrived" signal.
pub trait NotificationSink: Send + Sync {
    /// Called once for a cycle that produced `count` new incidents.
    fn notify_new_incidents(&self, count: usize);
}

/// Discards every signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentSink;

impl NotificationSink for SilentSink {
    fn notify_new_incidents(&self, _count: usize) {}
}

/// Rings the terminal bell unless audio is muted.
///
/// The muted flag is read from the store on every signal, so `vicalert
/// mute` in another shell takes effect immediately.
pub struct AudioNotifier<W: Write + Send = std::io::Stderr> {
    store: Arc<dyn KeyValueStore>,
    out: Mutex<W>,
}

impl<W: Write + Send> std::fmt::Debug for AudioNotifier<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioNotifier").finish_non_exhaustive()
    }
}

impl AudioNotifier {
    /// Notifier writing the bell to stderr.
    #[must_use]
    pub fn terminal(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_writer(store, std::io::stderr())
    }
}

impl<W: Write + Send> AudioNotifier<W> {
    /// Notifier writing the bell to `out`.
    #[must_use]
    pub const fn with_writer(store: Arc<dyn KeyValueStore>, out: W) -> Self {
        Self {
            store,
            out: Mutex::new(out),
        }
    }

    /// Whether notifications are currently muted.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        load_or_default::<AudioSettings>(self.store.as_ref(), keys::AUDIO_SETTINGS).muted
    }

    /// Consumes the notifier, returning the writer.
    pub fn into_writer(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> NotificationSink for AudioNotifier<W> {
    fn notify_new_incidents(&self, count: usize) {
        if self.is_muted() {
            log::debug!("{count} new incidents, audio muted");
            return;
        }

        log::info!("{count} new incidents");
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = out.write_all(b"\x07").and_then(|()| out.flush()) {
            log::warn!("Failed to ring bell: {e}");
        }
    }
}
