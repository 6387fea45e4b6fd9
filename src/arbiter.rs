use std::{
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    time::Instant,
};
use tracing::trace;

use crate::serial::channel::SerialChannel;

/// Grants one request at a time access to a bridge's [`SerialChannel`].
///
/// The channel can only be reached through an [`ArbiterGuard`].
/// Waiters are granted access in the order they asked for it.
///
/// Clones refer to the same channel.
#[derive(Clone)]
pub struct RequestArbiter {
    channel: Arc<Mutex<SerialChannel>>,
    acquisitions: Arc<AtomicU64>,
}

impl RequestArbiter {
    /// Guard the given channel.
    pub fn new(channel: SerialChannel) -> Self {
        Self {
            channel: Arc::new(Mutex::new(channel)),
            acquisitions: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Wait until no one else is using the channel, then get exclusive access to it.
    pub async fn acquire(&self) -> ArbiterGuard {
        let channel = self.channel.clone().lock_owned().await;

        ArbiterGuard::granted(channel, &self.acquisitions)
    }

    /// Whether nobody has access right now.
    pub fn is_free(&self) -> bool {
        self.channel.try_lock().is_ok()
    }

    /// How many times access has been granted so far.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

/// Exclusive access to a [`SerialChannel`].
///
/// Access is given back when the guard is dropped, so exactly once no matter
/// how the holder exits.
pub struct ArbiterGuard {
    channel: OwnedMutexGuard<SerialChannel>,
    granted_at: Instant,
}

impl ArbiterGuard {
    fn granted(channel: OwnedMutexGuard<SerialChannel>, acquisitions: &AtomicU64) -> Self {
        let count = acquisitions.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(device = %channel.device(), %count, "Access granted");

        Self {
            channel,
            granted_at: Instant::now(),
        }
    }

    /// Give access back now rather than at the end of scope.
    pub fn release(self) {}
}

impl Drop for ArbiterGuard {
    fn drop(&mut self) {
        trace!(held_for = ?self.granted_at.elapsed(), "Access released");
    }
}

impl Deref for ArbiterGuard {
    type Target = SerialChannel;

    fn deref(&self) -> &Self::Target {
        &self.channel
    }
}

impl DerefMut for ArbiterGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.channel
    }
}
