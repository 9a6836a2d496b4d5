//! Backoff and retry primitives shared by the queue poller and the storage backends.
//!
//! A [strategy] is an [Iterator] of [Duration](std::time::Duration)s; [retry::Retry] drives an
//! [Operation] with a strategy until it succeeds, the [Condition] rejects the error, or the
//! strategy runs dry.

use std::future::Future;

pub mod retry;
pub mod strategy;

/// An async operation that can be started again from scratch.
pub trait Operation {
    type Item;
    type Error;
    type Future: Future<Output = Result<Self::Item, Self::Error>>;

    fn run(&mut self) -> Self::Future;
}

impl<I, E, T, F> Operation for F
where
    T: Future<Output = Result<I, E>>,
    F: FnMut() -> T,
{
    type Item = I;
    type Error = E;
    type Future = T;

    fn run(&mut self) -> Self::Future {
        self()
    }
}

/// Decides whether a failed [Operation] is worth another attempt.
pub trait Condition<E> {
    fn can_retry(&mut self, error: &E) -> bool;
}

impl<E, F> Condition<E> for F
where
    F: FnMut(&E) -> bool,
{
    fn can_retry(&mut self, error: &E) -> bool {
        self(error)
    }
}
