//! Thread actors with a startup rendezvous.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use duotrack_common::error::{DuotrackError, DuotrackResult};
use tokio::sync::mpsc;

/// Acknowledges a shutdown request. Waiting on it never needs a runtime.
pub(crate) type Ack = std_mpsc::SyncSender<()>;

/// A fresh acknowledgement pair.
pub(crate) fn ack_channel() -> (Ack, std_mpsc::Receiver<()>) {
    std_mpsc::sync_channel(1)
}

/// Pipeline flags shared between a pipeline handle and its actor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStatus {
    /// The actor loop is live.
    pub ready: bool,
    /// Encoder session open and accepting input.
    pub running: bool,
}

/// Sending half of an actor plus its thread.
pub(crate) struct ActorHandle<C> {
    name: String,
    tx: mpsc::UnboundedSender<C>,
    thread: Option<JoinHandle<()>>,
}

/// Spawn `body` on a named thread and wait until it is ready to receive.
///
/// The command channel is created on the actor thread and its sender is
/// handed back through a one-shot, so nothing can be queued before the
/// loop exists.
pub(crate) fn spawn_actor<C, F>(name: &str, body: F) -> DuotrackResult<ActorHandle<C>>
where
    C: Send + 'static,
    F: FnOnce(mpsc::UnboundedReceiver<C>) + Send + 'static,
{
    let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
    let thread = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let (tx, rx) = mpsc::unbounded_channel();
            if ready_tx.send(tx).is_err() {
                return;
            }
            body(rx);
        })?;
    let tx = ready_rx
        .recv()
        .map_err(|_| DuotrackError::Other(anyhow::anyhow!("{name} exited before it was ready")))?;
    tracing::trace!(actor = name, "Actor ready");
    Ok(ActorHandle {
        name: name.to_string(),
        tx,
        thread: Some(thread),
    })
}

impl<C> ActorHandle<C> {
    /// Queue a command. Returns false once the actor has exited.
    pub fn send(&self, command: C) -> bool {
        self.tx.send(command).is_ok()
    }

    /// Ask the actor to shut down via `make` and wait for its acknowledgement.
    pub fn shutdown_with(&mut self, make: impl FnOnce(Ack) -> C) {
        let (ack_tx, ack_rx) = ack_channel();
        if self.send(make(ack_tx)) {
            let _ = ack_rx.recv();
        }
        self.join();
    }

    /// Wait for the actor thread to exit.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(actor = %self.name, "Actor thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Command {
        Echo(u32, std::sync::mpsc::Sender<u32>),
        Shutdown(Ack),
    }

    #[test]
    fn commands_sent_right_after_spawn_are_received() {
        let mut actor = spawn_actor("echo", |mut rx: mpsc::UnboundedReceiver<Command>| {
            while let Some(command) = rx.blocking_recv() {
                match command {
                    Command::Echo(v, reply) => reply.send(v).unwrap(),
                    Command::Shutdown(ack) => {
                        let _ = ack.send(());
                        break;
                    }
                }
            }
        })
        .unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        for i in 0..5 {
            assert!(actor.send(Command::Echo(i, tx.clone())));
        }
        actor.shutdown_with(Command::Shutdown);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(!actor.send(Command::Echo(9, tx)));
    }

    #[tokio::test]
    async fn actor_can_be_spawned_and_stopped_from_async_code() {
        let mut actor = spawn_actor("async-owner", |mut rx: mpsc::UnboundedReceiver<Command>| {
            while let Some(command) = rx.blocking_recv() {
                if let Command::Shutdown(ack) = command {
                    let _ = ack.send(());
                    break;
                }
            }
        })
        .unwrap();
        actor.shutdown_with(Command::Shutdown);
        assert!(actor.thread.is_none());
    }
}
