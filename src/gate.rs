//! Admission gates, limiting the number of concurrently borrowed resources.

use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::Rejected;

/// Counting semaphore, created with all of its tokens available.
pub(crate) trait Gate: Send + Sync + 'static {
    /// Create a gate holding `tokens` tokens, optionally already closed.
    fn new(tokens: usize, closed: bool) -> Self;

    /// Return one token to the gate.
    fn release(&self);

    /// Close the gate, failing all current and future waiters.
    fn close(&self);
}

#[derive(Debug)]
struct Tokens {
    available: usize,
    closed: bool,
}

/// Gate for blocking pools.
#[derive(Debug)]
pub(crate) struct BlockingGate {
    tokens: Mutex<Tokens>,
    signal: Condvar,
}

impl BlockingGate {
    /// Take a token, waiting until one is available or until `deadline` passes.
    pub(crate) fn acquire(&self, deadline: Option<Instant>) -> Result<(), Rejected> {
        let mut tokens = self.tokens.lock();
        loop {
            if tokens.closed {
                return Err(Rejected::Closed);
            }
            if tokens.available > 0 {
                tokens.available -= 1;
                return Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if self.signal.wait_until(&mut tokens, deadline).timed_out()
                        && tokens.available == 0
                        && !tokens.closed
                    {
                        return Err(Rejected::TimedOut);
                    }
                }
                None => self.signal.wait(&mut tokens),
            }
        }
    }

    /// Take a token only if one is immediately available.
    pub(crate) fn try_acquire(&self) -> Result<(), Rejected> {
        let mut tokens = self.tokens.lock();
        if tokens.closed {
            Err(Rejected::Closed)
        } else if tokens.available == 0 {
            Err(Rejected::WouldBlock)
        } else {
            tokens.available -= 1;
            Ok(())
        }
    }
}

impl Gate for BlockingGate {
    fn new(tokens: usize, closed: bool) -> Self {
        Self {
            tokens: Mutex::new(Tokens {
                available: tokens,
                closed,
            }),
            signal: Condvar::new(),
        }
    }

    fn release(&self) {
        let mut tokens = self.tokens.lock();
        if tokens.closed {
            return;
        }
        tokens.available += 1;
        drop(tokens);
        self.signal.notify_one();
    }

    fn close(&self) {
        self.tokens.lock().closed = true;
        self.signal.notify_all();
    }
}

#[cfg(feature = "async")]
pub(crate) use self::semaphore::SemaphoreGate;

#[cfg(feature = "async")]
mod semaphore {
    use std::time::Duration;

    use tokio::sync::{Semaphore, TryAcquireError};

    use super::Gate;
    use crate::error::Rejected;

    /// Gate for asynchronous pools.
    ///
    /// Permits are forgotten when taken, and added back one by one on release, so token
    /// accounting follows borrow/return pairs rather than permit guard lifetimes.
    #[derive(Debug)]
    pub(crate) struct SemaphoreGate(Semaphore);

    impl SemaphoreGate {
        /// Take a token, waiting until one is available.
        ///
        /// Cancel safe: dropping the future before it completes takes no token.
        pub(crate) async fn acquire(&self) -> Result<(), Rejected> {
            let permit = self.0.acquire().await.map_err(|_| Rejected::Closed)?;
            permit.forget();
            Ok(())
        }

        /// Take a token, waiting at most `timeout` for one to become available.
        pub(crate) async fn acquire_timeout(&self, timeout: Duration) -> Result<(), Rejected> {
            tokio::time::timeout(timeout, self.acquire())
                .await
                .map_err(|_| Rejected::TimedOut)?
        }

        /// Take a token only if one is immediately available.
        pub(crate) fn try_acquire(&self) -> Result<(), Rejected> {
            match self.0.try_acquire() {
                Ok(permit) => {
                    permit.forget();
                    Ok(())
                }
                Err(TryAcquireError::NoPermits) => Err(Rejected::WouldBlock),
                Err(TryAcquireError::Closed) => Err(Rejected::Closed),
            }
        }
    }

    impl Gate for SemaphoreGate {
        fn new(tokens: usize, closed: bool) -> Self {
            // Larger limits are effectively unbounded.
            let semaphore = Semaphore::new(tokens.min(Semaphore::MAX_PERMITS));
            if closed {
                semaphore.close();
            }
            Self(semaphore)
        }

        fn release(&self) {
            if !self.0.is_closed() {
                self.0.add_permits(1);
            }
        }

        fn close(&self) {
            self.0.close();
        }
    }

}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;

    #[test]
    fn tokens_are_limited() {
        let gate = BlockingGate::new(2, false);
        assert_eq!(gate.try_acquire(), Ok(()));
        assert_eq!(gate.acquire(None), Ok(()));
        assert_eq!(gate.try_acquire(), Err(Rejected::WouldBlock));
        gate.release();
        assert_eq!(gate.try_acquire(), Ok(()));
    }

    #[test]
    fn timed_acquire_expires() {
        let gate = BlockingGate::new(0, false);
        let started = Instant::now();
        assert_eq!(
            gate.acquire(Some(started + Duration::from_millis(30))),
            Err(Rejected::TimedOut)
        );
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn release_wakes_waiter() {
        let gate = Arc::new(BlockingGate::new(0, false));
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.acquire(None))
        };
        thread::sleep(Duration::from_millis(30));
        gate.release();
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }

    #[test]
    fn close_wakes_all_waiters() {
        let gate = Arc::new(BlockingGate::new(0, false));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate.clone();
                thread::spawn(move || gate.acquire(None))
            })
            .collect();
        thread::sleep(Duration::from_millis(30));
        gate.close();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Err(Rejected::Closed));
        }
        gate.release();
        assert_eq!(gate.try_acquire(), Err(Rejected::Closed));
    }

    #[test]
    fn created_closed() {
        let gate = BlockingGate::new(5, true);
        assert_eq!(gate.acquire(None), Err(Rejected::Closed));
    }
}
