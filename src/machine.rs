//! Connection lifecycle as a synchronous state machine.
//!
//! The machine never performs I/O. It consumes [`Input`]s (credential
//! changes, socket callbacks, timer fires) and answers with a [`Step`]:
//! the side effects the driver must carry out and whether the published
//! view changed. Every socket and timer input carries the generation it
//! was issued under; anything from an older generation is dropped, which
//! is what keeps a superseded connection from touching a newer session.

use crate::backoff::ReconnectPolicy;
use crate::buffer::ActivityBuffer;
use crate::classifier::classify;
use crate::transport::{endpoint_for, redact};
use crate::types::{Credential, StreamStatus, StreamView};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Debug)]
pub enum Input {
    CredentialChanged(Option<Credential>),
    Opened { generation: u64 },
    Frame { generation: u64, text: String },
    /// The connection failed to open or closed unexpectedly.
    Dropped {
        generation: u64,
        reason: Option<String>,
    },
    RetryElapsed { generation: u64 },
    /// Manager teardown requested.
    Shutdown,
    /// The live socket has been closed after `Shutdown`.
    Halted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open a connection to `endpoint`, tagging its callbacks with `generation`.
    Connect { generation: u64, endpoint: Url },
    ScheduleRetry { generation: u64, delay: Duration },
    CancelRetry,
    /// Close the live connection, if any.
    Disconnect,
}

#[derive(Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct Step {
    pub effects: Vec<Effect>,
    pub changed: bool,
}

impl Step {
    fn idle() -> Self {
        Self::default()
    }
}

pub struct StreamMachine {
    base: Url,
    credential_param: String,
    policy: ReconnectPolicy,
    credential: Option<Credential>,
    status: StreamStatus,
    attempt: u32,
    generation: u64,
    retry_pending: bool,
    buffer: ActivityBuffer,
}

impl StreamMachine {
    pub fn new(
        base: Url,
        credential_param: impl Into<String>,
        policy: ReconnectPolicy,
        history_capacity: usize,
    ) -> Self {
        Self {
            base,
            credential_param: credential_param.into(),
            policy,
            credential: None,
            status: StreamStatus::Uninstantiated,
            attempt: 0,
            generation: 0,
            retry_pending: false,
            buffer: ActivityBuffer::new(history_capacity),
        }
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn view(&self) -> StreamView {
        StreamView::new(self.status, self.buffer.snapshot())
    }

    pub fn handle(&mut self, input: Input) -> Step {
        match input {
            Input::CredentialChanged(Some(credential)) => self.start_session(credential),
            Input::CredentialChanged(None) => self.end_session(),
            Input::Opened { generation } => self.on_opened(generation),
            Input::Frame { generation, text } => self.on_frame(generation, &text),
            Input::Dropped { generation, reason } => self.on_dropped(generation, reason),
            Input::RetryElapsed { generation } => self.on_retry_elapsed(generation),
            Input::Shutdown => self.on_shutdown(),
            Input::Halted => self.on_halted(),
        }
    }

    fn start_session(&mut self, credential: Credential) -> Step {
        info!(credential = %credential, "activity stream session starting");
        let mut effects = vec![Effect::CancelRetry];
        if self.is_live() {
            effects.push(Effect::Disconnect);
        }
        self.credential = Some(credential);
        self.buffer.clear();
        self.attempt = 0;
        self.retry_pending = false;
        self.status = StreamStatus::Connecting;
        effects.extend(self.connect());
        Step {
            effects,
            changed: true,
        }
    }

    fn end_session(&mut self) -> Step {
        if self.credential.is_none() && self.status == StreamStatus::Uninstantiated {
            return Step::idle();
        }
        let changed = self.status != StreamStatus::Closed || !self.buffer.is_empty();
        if let Some(credential) = self.credential.take() {
            info!(credential = %credential, "activity stream session ended");
        }
        self.generation += 1;
        self.attempt = 0;
        self.retry_pending = false;
        self.buffer.clear();
        self.status = StreamStatus::Closed;
        Step {
            effects: vec![Effect::CancelRetry, Effect::Disconnect],
            changed,
        }
    }

    fn on_opened(&mut self, generation: u64) -> Step {
        if !self.is_current(generation) || self.status != StreamStatus::Connecting {
            debug!(generation, current = self.generation, "ignoring stale open");
            return Step::idle();
        }
        info!(generation, "activity stream open");
        self.status = StreamStatus::Open;
        self.attempt = 0;
        Step {
            effects: Vec::new(),
            changed: true,
        }
    }

    fn on_frame(&mut self, generation: u64, text: &str) -> Step {
        if !self.is_current(generation) || self.status != StreamStatus::Open {
            debug!(
                generation,
                current = self.generation,
                "dropping frame from stale connection"
            );
            return Step::idle();
        }
        match classify(text) {
            Ok(event) => {
                debug!(kind = event.type_name(), "activity event buffered");
                self.buffer.push(event);
                Step {
                    effects: Vec::new(),
                    changed: true,
                }
            }
            Err(e) => {
                warn!(raw = text, "discarding activity frame: {e}");
                Step::idle()
            }
        }
    }

    fn on_dropped(&mut self, generation: u64, reason: Option<String>) -> Step {
        if !self.is_current(generation) || !self.is_live() {
            debug!(generation, current = self.generation, "ignoring stale disconnect");
            return Step::idle();
        }
        let reason = reason.as_deref().unwrap_or("closed by peer");
        self.status = StreamStatus::Closed;
        if !self.policy.should_retry(self.attempt) {
            error!(
                attempts = self.attempt,
                "activity stream gave up reconnecting: {reason}"
            );
            return Step {
                effects: Vec::new(),
                changed: true,
            };
        }
        let delay = self.policy.delay_for(self.attempt);
        warn!(
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "activity stream disconnected: {reason}"
        );
        self.retry_pending = true;
        Step {
            effects: vec![Effect::ScheduleRetry { generation, delay }],
            changed: true,
        }
    }

    fn on_retry_elapsed(&mut self, generation: u64) -> Step {
        if !self.is_current(generation) || !self.retry_pending {
            debug!(generation, current = self.generation, "ignoring stale retry timer");
            return Step::idle();
        }
        self.retry_pending = false;
        self.attempt += 1;
        self.status = StreamStatus::Connecting;
        Step {
            effects: self.connect().into_iter().collect(),
            changed: true,
        }
    }

    fn on_shutdown(&mut self) -> Step {
        if self.status == StreamStatus::Uninstantiated {
            return Step::idle();
        }
        self.generation += 1;
        self.retry_pending = false;
        self.status = StreamStatus::Closing;
        Step {
            effects: vec![Effect::CancelRetry, Effect::Disconnect],
            changed: true,
        }
    }

    fn on_halted(&mut self) -> Step {
        if self.status != StreamStatus::Closing {
            return Step::idle();
        }
        self.status = StreamStatus::Closed;
        Step {
            effects: Vec::new(),
            changed: true,
        }
    }

    /// Bump the generation and build the connect effect for the current
    /// credential.
    fn connect(&mut self) -> Option<Effect> {
        let credential = self.credential.as_ref()?;
        self.generation += 1;
        let endpoint = endpoint_for(&self.base, &self.credential_param, credential);
        debug!(
            generation = self.generation,
            attempt = self.attempt,
            endpoint = %redact(&endpoint, &self.credential_param),
            "connecting activity stream"
        );
        Some(Effect::Connect {
            generation: self.generation,
            endpoint,
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    fn is_live(&self) -> bool {
        matches!(self.status, StreamStatus::Connecting | StreamStatus::Open)
    }
}
