//! Cancellable delayed actions.
//!
//! Retry backoff, hard restarts and the post-playback resume all need "do X
//! in N ms unless something changed". A [`ScheduledTask`] carries its own
//! [`CancellationToken`], derived from the session token, and the token is
//! checked again right before the action fires. Stopping the session cancels
//! every task scheduled under it.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// An action due at a deadline unless its token is cancelled first.
#[derive(Debug)]
pub struct ScheduledTask<A> {
    action: A,
    deadline: Instant,
    token: CancellationToken,
}

impl<A> ScheduledTask<A> {
    /// Schedule `action` after `delay`, cancelled together with `parent`.
    pub fn new(action: A, delay: Duration, parent: &CancellationToken) -> Self {
        Self {
            action,
            deadline: Instant::now() + delay,
            token: parent.child_token(),
        }
    }

    pub const fn action(&self) -> &A {
        &self.action
    }

    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Holds at most one pending [`ScheduledTask`]. Scheduling a new one cancels
/// the previous.
#[derive(Debug)]
pub struct TaskSlot<A> {
    task: Option<ScheduledTask<A>>,
}

impl<A> Default for TaskSlot<A> {
    fn default() -> Self {
        Self { task: None }
    }
}

impl<A> TaskSlot<A> {
    pub fn schedule(&mut self, action: A, delay: Duration, parent: &CancellationToken) {
        self.cancel();
        self.task = Some(ScheduledTask::new(action, delay, parent));
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel();
        }
    }

    pub fn pending(&self) -> Option<&A> {
        self.task
            .as_ref()
            .filter(|t| !t.is_cancelled())
            .map(ScheduledTask::action)
    }

    /// Resolve with the pending action once its deadline passes.
    ///
    /// Never resolves while the slot is empty. Cancel-safe: dropping the
    /// future before it resolves leaves the task in place.
    pub async fn fired(&mut self) -> A {
        loop {
            let Some(task) = self.task.as_ref() else {
                return std::future::pending().await;
            };

            tokio::select! {
                () = tokio::time::sleep_until(task.deadline) => {}
                () = task.token.cancelled() => {}
            }

            if let Some(task) = self.task.take() {
                if !task.is_cancelled() {
                    return task.action;
                }
            }
        }
    }
}
