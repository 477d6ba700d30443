//! Merges concurrent commands into `Multi` requests.
//!
//! The first caller becomes the leader and sends its command alone. Callers arriving while a
//! request is in flight queue up. When the leader's request completes it hands leadership,
//! together with everything queued so far, to the first queued caller, which sends the whole
//! queue as one `Multi`. At most one request per executor is in flight at any time.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use crate::command::{CommandResult, Payload, RemoteCommand};
use crate::distributed::CommandExecutor;
use crate::error::ExecutionError;
use crate::listener::{BucketEvent, SharedSink};

type Reply = Result<CommandResult, ExecutionError>;

struct Waiter {
    command: RemoteCommand,
    reply: oneshot::Sender<Signal>,
}

enum Signal {
    Done(Reply),
    /// Leadership hand-off: run `own` together with `followers`.
    Lead { own: RemoteCommand, followers: Vec<Waiter> },
}

#[derive(Default)]
struct Queue {
    leader_active: bool,
    waiting: VecDeque<Waiter>,
}

pub(crate) struct BatchingExecutor {
    target: Arc<dyn CommandExecutor>,
    queue: Mutex<Queue>,
    listener: SharedSink,
}

impl BatchingExecutor {
    pub(crate) fn new(target: Arc<dyn CommandExecutor>, listener: SharedSink) -> Self {
        Self { target, queue: Mutex::new(Queue::default()), listener }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Give leadership and the queued commands to the first caller still waiting.
    fn hand_off(&self) {
        let mut queue = self.lock();
        loop {
            let Some(next) = queue.waiting.pop_front() else {
                queue.leader_active = false;
                return;
            };
            let followers: Vec<Waiter> = queue.waiting.drain(..).filter(|w| !w.reply.is_closed()).collect();
            let batch = followers.len() + 1;
            match next.reply.send(Signal::Lead { own: next.command, followers }) {
                Ok(()) => {
                    debug!(batch, "batch leadership handed off");
                    return;
                }
                // The designated leader went away; put its followers back and try the next one.
                Err(Signal::Lead { followers, .. }) => queue.waiting.extend(followers),
                Err(Signal::Done(_)) => {}
            }
        }
    }

    async fn lead(&self, own: RemoteCommand, followers: Vec<Waiter>) -> Reply {
        let (commands, replies): (Vec<_>, Vec<_>) = followers.into_iter().map(|w| (w.command, w.reply)).unzip();
        let mut guard = LeaderGuard { executor: self, replies };

        if commands.is_empty() {
            return self.target.execute(own).await;
        }

        let size = commands.len() + 1;
        self.listener.on_event(BucketEvent::Merged { commands: size });
        let mut batch = Vec::with_capacity(size);
        batch.push(own);
        batch.extend(commands);

        let outcome = self.target.execute(RemoteCommand::Multi { commands: batch }).await;
        let mut replies = fan_out(outcome, size).into_iter();
        let own_reply = replies.next().unwrap_or(Err(ExecutionError::Cancelled));
        for (reply, sender) in replies.zip(guard.replies.drain(..)) {
            let _ = sender.send(Signal::Done(reply));
        }
        own_reply
    }
}

/// Split a `Multi` reply into per-caller replies. Anything but a well-formed `Multi` is
/// copied to every caller.
fn fan_out(outcome: Reply, size: usize) -> Vec<Reply> {
    match outcome {
        Ok(CommandResult::Success { payload: Payload::Multi(results), .. }) if results.len() == size => {
            results.into_iter().map(Ok).collect()
        }
        other => vec![other; size],
    }
}

/// Completes the leader's duties even if the leading future is dropped mid-flight.
struct LeaderGuard<'a> {
    executor: &'a BatchingExecutor,
    /// Followers whose commands are in the current request and still await a reply.
    replies: Vec<oneshot::Sender<Signal>>,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        for sender in self.replies.drain(..) {
            let _ = sender.send(Signal::Done(Err(ExecutionError::Cancelled)));
        }
        self.executor.hand_off();
    }
}

#[async_trait]
impl CommandExecutor for BatchingExecutor {
    async fn execute(&self, command: RemoteCommand) -> Result<CommandResult, ExecutionError> {
        let queued = {
            let mut queue = self.lock();
            if queue.leader_active {
                let (reply, receiver) = oneshot::channel();
                queue.waiting.push_back(Waiter { command, reply });
                Ok(receiver)
            } else {
                queue.leader_active = true;
                Err(command)
            }
        };
        let receiver = match queued {
            Ok(receiver) => receiver,
            Err(command) => return self.lead(command, Vec::new()).await,
        };
        match receiver.await {
            Ok(Signal::Done(reply)) => reply,
            Ok(Signal::Lead { own, followers }) => self.lead(own, followers).await,
            Err(_) => Err(ExecutionError::Cancelled),
        }
    }
}
