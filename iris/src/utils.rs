//! Small single-threaded async helpers.

use std::{cell::Cell, future::Future, rc::Rc, time::Duration};

use tokio::time::{sleep_until, Instant};

/// Spawns `fut` onto the current thread's task set.
pub(crate) fn spawn(fut: impl Future<Output = ()> + 'static) {
    drop(tokio::task::spawn_local(fut));
}

/// Returns a [`Future`] resolving after the provided [`Duration`] and a
/// [`ResettableDelayHandle`] controlling it.
pub(crate) fn resettable_delay_for(
    delay: Duration,
) -> (impl Future<Output = ()>, ResettableDelayHandle) {
    let state = Rc::new(DelayState {
        deadline: Cell::new(Some(Instant::now() + delay)),
        timeout: delay,
    });
    let handle = ResettableDelayHandle(Rc::clone(&state));

    // The waiter does its own waiting: it sleeps towards the shared
    // deadline and re-checks it afterwards, so a reset just pushes the
    // deadline out and a stop clears it.
    let delay_fut = async move {
        loop {
            let Some(deadline) = state.deadline.get() else {
                // Stopped; parked until the owning task set goes away.
                std::future::pending::<()>().await;
                unreachable!();
            };
            sleep_until(deadline).await;
            match state.deadline.get() {
                Some(current) if current <= Instant::now() => return,
                // Moved or cleared while sleeping; go around.
                _ => {}
            }
        }
    };

    (delay_fut, handle)
}

/// Shared countdown state of one delay.
#[derive(Debug)]
struct DelayState {
    /// Instant the delay resolves at; `None` once stopped.
    deadline: Cell<Option<Instant>>,

    /// Length of one countdown.
    timeout: Duration,
}

/// Handle to a delay which can be stopped or started over again.
#[derive(Debug)]
pub(crate) struct ResettableDelayHandle(Rc<DelayState>);

impl ResettableDelayHandle {
    /// Stops the delay so its [`Future`] never resolves (does nothing if
    /// it already has).
    pub(crate) fn stop(&self) {
        self.0.deadline.set(None);
    }

    /// Restarts the countdown from the beginning.
    pub(crate) fn reset(&self) {
        self.0.deadline.set(Some(Instant::now() + self.0.timeout));
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn delay_resolves_after_its_timeout() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let fired = Rc::new(Cell::new(false));
                let (delay, _handle) =
                    resettable_delay_for(Duration::from_millis(100));
                let flag = Rc::clone(&fired);
                spawn(async move {
                    delay.await;
                    flag.set(true);
                });

                tokio::time::sleep(Duration::from_millis(50)).await;
                assert!(!fired.get());
                tokio::time::sleep(Duration::from_millis(100)).await;
                assert!(fired.get());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_delay_never_resolves() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let fired = Rc::new(Cell::new(false));
                let (delay, handle) =
                    resettable_delay_for(Duration::from_millis(100));
                let flag = Rc::clone(&fired);
                spawn(async move {
                    delay.await;
                    flag.set(true);
                });

                handle.stop();
                tokio::time::sleep(Duration::from_millis(500)).await;
                assert!(!fired.get());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn reset_starts_the_countdown_over() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let fired_at = Rc::new(RefCell::new(None));
                let (delay, handle) =
                    resettable_delay_for(Duration::from_millis(100));
                let start = Instant::now();
                let at = Rc::clone(&fired_at);
                spawn(async move {
                    delay.await;
                    *at.borrow_mut() = Some(Instant::now() - start);
                });

                tokio::time::sleep(Duration::from_millis(80)).await;
                handle.reset();
                tokio::time::sleep(Duration::from_millis(150)).await;

                let elapsed = fired_at.borrow().expect("delay never fired");
                assert!(elapsed >= Duration::from_millis(180));
            })
            .await;
    }
}
