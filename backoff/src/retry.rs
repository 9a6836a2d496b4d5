use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project::pin_project;
use tokio::time::{Instant, Sleep, sleep_until};

use crate::{Condition, Operation};

/// A retry alternates between running the [`Operation`] and sleeping for the next delay handed
/// out by the backoff iterator.
/// ```no_rust
///            (Ok) ----------------------------> [Return(Ok)]
///           /
///  (Running)         (not retryable) ---------> [Return(Err)]
///           \       /
///            (Err)--                 (exhausted) -> [Return(Err)]
///                   \               /
///                    (retryable) --
///                                   \
///                                    (Sleeping) --(elapsed)--> (Running)
/// ```
#[pin_project(project = RetryStateProj)]
enum RetryState<O>
where
    O: Operation,
{
    Running(#[pin] O::Future),
    Sleeping(#[pin] Sleep),
}

/// Future that resolves with the first success of `operation`, or with the last error once the
/// `condition` rejects it or the `backoff` iterator is exhausted.
#[pin_project]
pub struct Retry<I, O, C>
where
    O: Operation,
{
    #[pin]
    retry_state: RetryState<O>,
    backoff: I,
    operation: O,
    condition: C,
    attempts: usize,
}

impl<I, O, C> Retry<I, O, C>
where
    I: Iterator<Item = Duration>,
    O: Operation,
    C: Condition<O::Error>,
{
    /// Starts the first attempt right away; the backoff only paces the reattempts.
    pub fn new<II: IntoIterator<IntoIter = I, Item = I::Item>>(
        backoff: II,
        mut operation: O,
        condition: C,
    ) -> Self {
        Self {
            retry_state: RetryState::Running(operation.run()),
            backoff: backoff.into_iter(),
            condition,
            operation,
            attempts: 1,
        }
    }

    /// Number of times the operation has been started so far.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Switches to sleeping for the next backoff delay, or hands the error back if there is none.
    fn cool_off(mut self: Pin<&mut Self>, err: O::Error) -> Result<(), O::Error> {
        let Some(duration) = self.as_mut().project().backoff.next() else {
            return Err(err);
        };
        let till = sleep_until(Instant::now() + duration);
        self.as_mut()
            .project()
            .retry_state
            .set(RetryState::Sleeping(till));
        Ok(())
    }

    fn reattempt(mut self: Pin<&mut Self>) {
        let future = {
            let this = self.as_mut().project();
            *this.attempts += 1;
            this.operation.run()
        };
        self.as_mut()
            .project()
            .retry_state
            .set(RetryState::Running(future));
    }
}

impl<I, O, C> Future for Retry<I, O, C>
where
    I: Iterator<Item = Duration>,
    O: Operation,
    C: Condition<O::Error>,
{
    type Output = Result<O::Item, O::Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.as_mut().project().retry_state.project() {
            RetryStateProj::Running(op) => match op.poll(cx) {
                Poll::Ready(Ok(item)) => Poll::Ready(Ok(item)),
                Poll::Ready(Err(e)) => {
                    if !self.as_mut().project().condition.can_retry(&e) {
                        return Poll::Ready(Err(e));
                    }
                    match self.as_mut().cool_off(e) {
                        Ok(()) => self.poll(cx),
                        Err(e) => Poll::Ready(Err(e)),
                    }
                }
                Poll::Pending => Poll::Pending,
            },
            RetryStateProj::Sleeping(sleep) => match sleep.poll(cx) {
                Poll::Ready(()) => {
                    self.as_mut().reattempt();
                    self.poll(cx)
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
