//! Module that runs a process of the ring.
//!
//! A process is two tasks around one [`ProcessState`]: the receive loop accepts the
//! predecessor, decodes its messages, runs the token and snapshot logic and fills the
//! mailbox; the send loop connects to the successor and drains the mailbox onto it.

use crate::{
    channel::{self, OutboundChannel},
    config::NodeConfig,
    error::{Result, RingError},
    log,
    mailbox::{mailbox, MailboxReceiver, MailboxSender},
    message::{Frame, Message},
    ring::{ProcessId, RingView},
    state::{NodeEvent, ProcessReport, ProcessState, Step},
};
use color_print::cformat;
use std::{sync::Arc, time::Duration};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
    time::sleep,
};
use tokio_util::sync::CancellationToken;

pub type EventSender = mpsc::UnboundedSender<NodeEvent>;

enum Command {
    Snapshot {
        snapshot_id: u64,
        reply: oneshot::Sender<Result<()>>,
    },
}

pub struct Node {
    config: NodeConfig,
    view: RingView,
    events: Option<EventSender>,
    cancel: CancellationToken,
}

impl Node {
    /// Function that validates the configuration and resolves the ring view of the process.
    pub fn new(config: NodeConfig) -> Result<Self> {
        let view = config.ring_view()?;
        Ok(Self {
            config,
            view,
            events: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Function that sends every state transition of the process, snapshot results included,
    /// to `events`.
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Function that ties the process's lifetime to `cancel`.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn view(&self) -> &RingView {
        &self.view
    }

    /// Function that binds the inbound listener and starts the process.
    pub async fn spawn(self) -> Result<NodeHandle> {
        let listener = channel::bind(self.view.id(), &self.config.listen_address()?).await?;
        Ok(self.spawn_with_listener(listener))
    }

    /// Function that starts the process on an already bound listener.
    pub fn spawn_with_listener(self, listener: TcpListener) -> NodeHandle {
        let Self {
            config,
            view,
            events,
            cancel,
        } = self;
        let process = view.id();
        let successor_address = view.successor.address.clone();

        log::info(&format!(
            "{{proc_id: {}, state: {}, predecessor: {}, successor: {}}}",
            process,
            u8::from(config.holds_token),
            view.predecessor.id,
            view.successor.id
        ));

        let state = Arc::new(Mutex::new(ProcessState::new(view, &config)));
        let (mailbox_tx, mailbox_rx) = mailbox();
        let (command_tx, command_rx) = mpsc::channel(8);

        let receiver = {
            let dispatcher = Dispatcher {
                process,
                state: Arc::clone(&state),
                mailbox: mailbox_tx,
                events: events.clone(),
                cancel: cancel.clone(),
            };
            let holds_token = config.holds_token;
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let result = dispatcher.run(listener, command_rx, holds_token).await;
                if let Err(e) = &result {
                    log::error(&format!("{e}"));
                    cancel.cancel();
                }
                result
            })
        };

        let sender = {
            let sender = Sender {
                process,
                state: Arc::clone(&state),
                events,
                cancel: cancel.clone(),
            };
            let cancel = cancel.clone();
            let config = config.clone();

            tokio::spawn(async move {
                let result = sender.run(&successor_address, &config, mailbox_rx).await;
                if let Err(e) = &result {
                    log::error(&format!("{e}"));
                    cancel.cancel();
                }
                result
            })
        };

        NodeHandle {
            process,
            state,
            commands: command_tx,
            cancel,
            receiver,
            sender,
        }
    }
}

/// Handle to a running process.
pub struct NodeHandle {
    process: ProcessId,
    state: Arc<Mutex<ProcessState>>,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    receiver: JoinHandle<Result<()>>,
    sender: JoinHandle<Result<()>>,
}

impl NodeHandle {
    pub fn id(&self) -> ProcessId {
        self.process
    }

    /// Function that starts snapshot `snapshot_id` from this process.
    ///
    /// Fails with `SnapshotAlreadyInProgress` while another snapshot is active and with
    /// `SnapshotIdReused` for an id this process already finished.
    pub async fn request_snapshot(&self, snapshot_id: u64) -> Result<()> {
        let stopped = || RingError::ChannelUnavailable {
            process: self.process,
            operation: "request snapshot",
            reason: "process is not running".into(),
        };

        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { snapshot_id, reply })
            .await
            .map_err(|_| stopped())?;
        response.await.map_err(|_| stopped())?
    }

    /// Function that returns a read copy of the process state.
    pub async fn report(&self) -> ProcessReport {
        self.state.lock().await.report()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Function that waits for both loops to end and returns the first fatal error.
    pub async fn join(self) -> Result<()> {
        let received = self.receiver.await;
        let sent = self.sender.await;
        received??;
        sent??;
        Ok(())
    }
}

fn emit(events: &Option<EventSender>, event: NodeEvent) {
    if let Some(events) = events {
        let _ = events.send(event);
    }
}

struct Dispatcher {
    process: ProcessId,
    state: Arc<Mutex<ProcessState>>,
    mailbox: MailboxSender,
    events: Option<EventSender>,
    cancel: CancellationToken,
}

impl Dispatcher {
    async fn run(
        self,
        listener: TcpListener,
        mut commands: mpsc::Receiver<Command>,
        holds_token: bool,
    ) -> Result<()> {
        if holds_token {
            let seed = self.state.lock().await.seed_token();
            log::info(&cformat!(
                "proc_id: <bold>{}</bold>, starting the ring with the <yellow, bold>token</yellow, bold>",
                self.process
            ));
            self.apply(Step {
                outbound: vec![seed],
                ..Step::default()
            })
            .await?;
        }
        let start = self.state.lock().await.on_start();
        self.apply(start).await?;

        let mut inbound = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            inbound = channel::accept(self.process, &listener) => inbound?,
        };

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                Some(command) = commands.recv() => self.command(command).await?,
                frame = inbound.next() => match frame {
                    Some(Ok(Frame::Message(message))) => self.receive(message).await?,
                    Some(Ok(Frame::Malformed(reason))) => self.drop_message(RingError::MalformedMessage {
                        process: self.process,
                        reason,
                    }),
                    Some(Err(e)) => {
                        return Err(RingError::ChannelUnavailable {
                            process: self.process,
                            operation: "receive from predecessor",
                            reason: e.to_string(),
                        })
                    }
                    None => {
                        return Err(RingError::ChannelUnavailable {
                            process: self.process,
                            operation: "receive from predecessor",
                            reason: "the previous peer closed the connection".into(),
                        })
                    }
                },
            }
        }
    }

    async fn receive(&self, message: Message) -> Result<()> {
        let step = self.state.lock().await.on_message(message);
        match step {
            Ok(step) => self.apply(step).await,
            Err(e) => {
                self.drop_message(e);
                Ok(())
            }
        }
    }

    async fn command(&self, command: Command) -> Result<()> {
        match command {
            Command::Snapshot { snapshot_id, reply } => {
                let step = self.state.lock().await.request_snapshot(snapshot_id);
                match step {
                    Ok(step) => {
                        let _ = reply.send(Ok(()));
                        self.apply(step).await
                    }
                    Err(e) => {
                        log::warn(&format!("{e}"));
                        let _ = reply.send(Err(e));
                        Ok(())
                    }
                }
            }
        }
    }

    fn drop_message(&self, e: RingError) {
        log::error(&format!("{e}"));
        emit(
            &self.events,
            NodeEvent::MessageDropped {
                process: self.process,
                reason: e.to_string(),
            },
        );
    }

    /// Function that carries out a step: waits each delay, fills the mailbox in order and
    /// emits a finished snapshot once its marker is on its way.
    async fn apply(&self, step: Step) -> Result<()> {
        for event in step.events {
            emit(&self.events, event);
        }

        for outbound in step.outbound {
            if !outbound.delay.is_zero() && !self.wait(outbound.delay).await {
                return Ok(());
            }

            let message = outbound.message;
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                put = self.mailbox.put(message.clone()) => put.map_err(|_| RingError::ChannelUnavailable {
                    process: self.process,
                    operation: "enqueue outbound message",
                    reason: "the send loop stopped".into(),
                })?,
            }
            self.state.lock().await.on_enqueued(&message);
        }

        if let Some(result) = step.completed {
            let json = result
                .to_json_string()
                .unwrap_or_else(|_| format!("{result:?}"));
            log::info(&cformat!(
                "proc_id: <bold>{}</bold>, snapshot <bold>{}</bold> <green, bold>complete</green, bold>: {json}",
                self.process,
                result.snapshot_id
            ));
            emit(&self.events, NodeEvent::SnapshotComplete(result));
            self.state.lock().await.finish_snapshot();
        }
        Ok(())
    }

    /// Returns `false` when the process was cancelled while waiting.
    async fn wait(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }
}

struct Sender {
    process: ProcessId,
    state: Arc<Mutex<ProcessState>>,
    events: Option<EventSender>,
    cancel: CancellationToken,
}

impl Sender {
    async fn run(
        self,
        successor_address: &str,
        config: &NodeConfig,
        mut mailbox: MailboxReceiver,
    ) -> Result<()> {
        let stream = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            stream = channel::connect(
                self.process,
                successor_address,
                config.connect_attempts,
                config.retry_delay,
            ) => stream?,
        };
        let mut outbound = OutboundChannel::new(
            self.process,
            stream,
            config.forward_attempts,
            config.retry_delay,
        );

        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                message = mailbox.take() => match message {
                    Some(message) => message,
                    None => return Ok(()),
                },
            };

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                sent = outbound.send(message.clone()) => sent?,
            }

            log::info(&cformat!(
                "proc_id: <bold>{}</bold>, forwarded <yellow, bold>{}</yellow, bold> to <bold>{}</bold>",
                self.process,
                message.kind(),
                message.receiver()
            ));
            let event = self.state.lock().await.on_sent(&message);
            emit(&self.events, event);
        }
    }
}
