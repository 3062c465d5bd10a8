//! Probe resources used in unit tests.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::resource::Resource;

/// Shared record of everything that happened to probe resources.
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    dialed: AtomicUsize,
    closed: Mutex<Vec<usize>>,
    fail_dial: AtomicBool,
    fail_close: AtomicBool,
}

impl Tracker {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a new probe, or fail if dial failures were requested.
    pub(crate) fn dial(self: &Arc<Self>) -> io::Result<Probe> {
        if self.fail_dial.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        let id = self.dialed.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Probe {
            id,
            tracker: self.clone(),
        })
    }

    /// Blocking dialer closure.
    pub(crate) fn dialer(
        self: &Arc<Self>,
    ) -> impl Fn() -> io::Result<Probe> + Send + Sync + 'static {
        let tracker = self.clone();
        move || tracker.dial()
    }

    pub(crate) fn set_fail_dial(&self, fail: bool) {
        self.fail_dial.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Number of probes created so far.
    pub(crate) fn dialed(&self) -> usize {
        self.dialed.load(Ordering::SeqCst)
    }

    /// Identifiers of closed probes, in closing order.
    pub(crate) fn closed(&self) -> Vec<usize> {
        self.closed.lock().clone()
    }
}

/// Resource which records its own closing.
#[derive(Debug)]
pub(crate) struct Probe {
    pub(crate) id: usize,
    tracker: Arc<Tracker>,
}

impl Resource for Probe {
    type Error = io::Error;

    fn close(self) -> Result<(), Self::Error> {
        self.tracker.closed.lock().push(self.id);
        if self.tracker.fail_close.load(Ordering::SeqCst) {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"))
        } else {
            Ok(())
        }
    }
}
