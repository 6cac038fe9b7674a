use crate::config::StreamConfig;
use crate::credential::CredentialStore;
use crate::error::ConfigError;
use crate::machine::{Effect, Input, StreamMachine};
use crate::publisher::{StatePublisher, Subscription};
use crate::transport::Connector;
use crate::types::{Credential, StreamView};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

enum Command {
    Shutdown(oneshot::Sender<()>),
}

/// Owns one activity stream: follows the credential store, keeps at most
/// one connection alive for the current credential, and publishes every
/// change to the stream view.
///
/// Dropping the manager (or its credential store) stops the stream without
/// the graceful `Closing` step; use [`shutdown`](Self::shutdown) for that.
pub struct StreamManager {
    publisher: StatePublisher,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl StreamManager {
    /// Start the manager task. Must be called inside a tokio runtime.
    pub fn spawn(
        config: &StreamConfig,
        credentials: &CredentialStore,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let machine = StreamMachine::new(
            config.endpoint_url()?,
            config.credential_param.clone(),
            config.reconnect_policy(),
            config.history_capacity,
        );
        let publisher = StatePublisher::new(machine.view());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            machine,
            publisher: publisher.clone(),
            connector,
            credentials: credentials.subscribe(),
            commands: commands_rx,
            inputs_tx,
            inputs_rx,
            connection: None,
            retry_timer: None,
        };
        let task = tokio::spawn(driver.run());

        Ok(Self {
            publisher,
            commands: commands_tx,
            task,
        })
    }

    pub fn publisher(&self) -> StatePublisher {
        self.publisher.clone()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StreamView) + Send + Sync + 'static,
    {
        self.publisher.subscribe(listener)
    }

    pub fn get_snapshot(&self) -> StreamView {
        self.publisher.get_snapshot()
    }

    /// Close the live connection, cancel pending retries and stop the task.
    pub async fn shutdown(self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        if let Err(e) = self.task.await {
            warn!("activity stream task ended abnormally: {e}");
        }
    }
}

struct ConnectionHandle {
    generation: u64,
    close: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Driver {
    machine: StreamMachine,
    publisher: StatePublisher,
    connector: Arc<dyn Connector>,
    credentials: watch::Receiver<Option<Credential>>,
    commands: mpsc::UnboundedReceiver<Command>,
    inputs_tx: mpsc::UnboundedSender<Input>,
    inputs_rx: mpsc::UnboundedReceiver<Input>,
    connection: Option<ConnectionHandle>,
    retry_timer: Option<JoinHandle<()>>,
}

impl Driver {
    async fn run(mut self) {
        let initial = self.credentials.borrow_and_update().clone();
        if initial.is_some() {
            self.dispatch(Input::CredentialChanged(initial));
        }

        loop {
            tokio::select! {
                biased;
                changed = self.credentials.changed() => {
                    if changed.is_err() {
                        debug!("credential store dropped, stopping activity stream");
                        break;
                    }
                    let credential = self.credentials.borrow_and_update().clone();
                    self.dispatch(Input::CredentialChanged(credential));
                }
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        return;
                    }
                    None => break,
                },
                Some(input) = self.inputs_rx.recv() => self.dispatch(input),
            }
        }
        self.teardown();
    }

    fn dispatch(&mut self, input: Input) {
        let step = self.machine.handle(input);
        for effect in step.effects {
            self.apply(effect);
        }
        if step.changed {
            self.publisher.publish(self.machine.view());
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Connect {
                generation,
                endpoint,
            } => self.open_connection(generation, endpoint),
            Effect::ScheduleRetry { generation, delay } => self.schedule_retry(generation, delay),
            Effect::CancelRetry => {
                if let Some(timer) = self.retry_timer.take() {
                    timer.abort();
                }
            }
            Effect::Disconnect => self.close_connection(),
        }
    }

    fn open_connection(&mut self, generation: u64, endpoint: Url) {
        self.close_connection();
        let (close_tx, close_rx) = oneshot::channel();
        let task = tokio::spawn(run_connection(
            self.connector.clone(),
            endpoint,
            generation,
            self.inputs_tx.clone(),
            close_rx,
        ));
        self.connection = Some(ConnectionHandle {
            generation,
            close: close_tx,
            task,
        });
    }

    /// Ask the live connection to close. Its later callbacks carry a stale
    /// generation and are dropped by the machine.
    fn close_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            debug!(generation = connection.generation, "closing activity connection");
            let _ = connection.close.send(());
        }
    }

    fn schedule_retry(&mut self, generation: u64, delay: Duration) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        let inputs = self.inputs_tx.clone();
        self.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inputs.send(Input::RetryElapsed { generation });
        }));
    }

    async fn shutdown(&mut self) {
        let connection = self.connection.take();
        self.dispatch(Input::Shutdown);
        if let Some(connection) = connection {
            let _ = connection.close.send(());
            if let Err(e) = connection.task.await {
                warn!("activity connection task ended abnormally: {e}");
            }
        }
        self.dispatch(Input::Halted);
    }

    fn teardown(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        self.close_connection();
    }
}

/// One connection attempt and, if it opens, its read loop. Every callback
/// is tagged with `generation`.
async fn run_connection(
    connector: Arc<dyn Connector>,
    endpoint: Url,
    generation: u64,
    inputs: mpsc::UnboundedSender<Input>,
    mut close: oneshot::Receiver<()>,
) {
    let mut socket = tokio::select! {
        result = connector.connect(&endpoint) => match result {
            Ok(socket) => socket,
            Err(e) => {
                warn!(generation, "activity stream connect failed: {e}");
                let _ = inputs.send(Input::Dropped {
                    generation,
                    reason: Some(e.to_string()),
                });
                return;
            }
        },
        _ = &mut close => return,
    };

    if inputs.send(Input::Opened { generation }).is_err() {
        socket.close().await;
        return;
    }

    loop {
        tokio::select! {
            frame = socket.next_text() => match frame {
                Some(Ok(text)) => {
                    if inputs.send(Input::Frame { generation, text }).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    let _ = inputs.send(Input::Dropped {
                        generation,
                        reason: Some(e.to_string()),
                    });
                    return;
                }
                None => {
                    let _ = inputs.send(Input::Dropped {
                        generation,
                        reason: None,
                    });
                    return;
                }
            },
            _ = &mut close => break,
        }
    }
    socket.close().await;
}
