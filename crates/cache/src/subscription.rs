//! Background listeners for pub/sub channels.

use futures_util::StreamExt;
use store::{MessageStream, PubSubMessage};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Handle to a running channel listener.
///
/// [`cancel`](Self::cancel) stops the listener and waits for it to release
/// its connection. Dropping the handle aborts the listener.
#[derive(Debug)]
pub struct SubscriptionHandle {
    channel: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Spawns a task that feeds every message on `messages` to `on_message`
    /// until cancelled or the stream ends.
    pub(crate) fn spawn<F>(channel: String, mut messages: MessageStream, mut on_message: F) -> Self
    where
        F: FnMut(PubSubMessage) + Send + 'static,
    {
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
        let task_channel = channel.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        tracing::debug!(channel = %task_channel, "subscription cancelled");
                        break;
                    }
                    message = messages.next() => match message {
                        Some(message) => on_message(message),
                        None => {
                            tracing::warn!(channel = %task_channel, "subscription stream closed");
                            break;
                        }
                    },
                }
            }
        });

        Self {
            channel,
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Returns true while the listener task is running.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the listener and waits until its subscription is released.
    pub async fn cancel(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && !e.is_cancelled()
        {
            tracing::error!(channel = %self.channel, error = %e, "subscription task panicked");
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
