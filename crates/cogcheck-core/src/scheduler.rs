//! Cancellable scheduled tasks for question timers.
//!
//! A timer is a spawned sleep that posts a [`TimerEvent`] back to the session
//! loop. Whoever schedules a task owns it; cancelling or dropping the handle
//! aborts the sleep so no callback reaches a torn-down question.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Which per-question deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// The recall material display period ended.
    DisplayElapsed,
    /// The randomized wait before a reaction stimulus ended.
    StimulusDue,
    /// The response window after a reaction stimulus closed.
    ResponseWindowElapsed,
}

/// A timer callback addressed to one question instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub question_index: usize,
    /// Incremented on every schedule so superseded timers are recognizable.
    pub epoch: u64,
    pub kind: TimerKind,
}

/// Channel the session loop reads timer events from.
pub type TimerSink = mpsc::UnboundedSender<TimerEvent>;

/// Handle to a pending timer.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Post `event` to `sink` after `delay`. Must be called inside a tokio runtime.
    pub fn schedule(delay: Duration, sink: &TimerSink, event: TimerEvent) -> Self {
        let sink = sink.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The loop may already be gone; nothing to deliver to then.
            let _ = sink.send(event);
        });
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(epoch: u64) -> TimerEvent {
        TimerEvent {
            question_index: 0,
            epoch,
            kind: TimerKind::StimulusDue,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _task = ScheduledTask::schedule(Duration::from_secs(2), &tx, event(1));

        let start = tokio::time::Instant::now();
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, event(1));
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = ScheduledTask::schedule(Duration::from_secs(1), &tx, event(1));
        task.cancel();
        let _other = ScheduledTask::schedule(Duration::from_secs(5), &tx, event(2));

        // Only the second timer is delivered.
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.epoch, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_cancels() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(ScheduledTask::schedule(Duration::from_millis(10), &tx, event(1)));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }
}
