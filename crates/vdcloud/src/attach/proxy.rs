//! Attach proxy: pairs a client socket with a runtime attach socket and
//! ferries frames between them until either side ends.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::DEFAULT_IMAGE;
use crate::container::ContainerId;
use crate::endpoint::AddressResolver;

use super::error::{AttachError, AttachResult};
use super::socket::{FrameSink, FrameSocket, FrameStream, RuntimeSocket};

/// Default limit for opening the runtime attach connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of one attach channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Attached,
    Ferrying,
    Closing,
    Closed,
}

impl ChannelState {
    /// Forward steps, plus the error path from any non-terminal state to `Closing`.
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        use ChannelState::*;
        match (self, next) {
            (Idle, Connecting)
            | (Connecting, Attached)
            | (Attached, Ferrying)
            | (Ferrying, Closing)
            | (Closing, Closed) => true,
            (Idle | Connecting | Attached, Closing) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Closed)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Idle => "idle",
            ChannelState::Connecting => "connecting",
            ChannelState::Attached => "attached",
            ChannelState::Ferrying => "ferrying",
            ChannelState::Closing => "closing",
            ChannelState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One client/runtime pairing for one session. Lives for a single ferry.
#[derive(Debug)]
pub struct AttachChannel {
    id: Uuid,
    session: ContainerId,
    state: ChannelState,
}

impl AttachChannel {
    pub fn new(session: ContainerId) -> Self {
        Self {
            id: Uuid::new_v4(),
            session,
            state: ChannelState::Idle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session(&self) -> &ContainerId {
        &self.session
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Move to `next`, returning the previous state. Illegal transitions are ignored.
    fn advance(&mut self, next: ChannelState) -> Option<ChannelState> {
        if !self.state.can_transition_to(next) {
            return None;
        }
        Some(std::mem::replace(&mut self.state, next))
    }
}

/// Direction of one forwarding operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToRuntime,
    RuntimeToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToRuntime => f.write_str("client->runtime"),
            Direction::RuntimeToClient => f.write_str("runtime->client"),
        }
    }
}

/// Why a forwarding operation stopped.
#[derive(Debug)]
pub enum PumpEnd {
    /// The source sent a close frame or its stream ended.
    PeerClosed,
    /// The other direction finished first.
    Cancelled,
    Failed(AttachError),
}

/// Outcome of one direction.
#[derive(Debug)]
pub struct PumpReport {
    pub direction: Direction,
    pub end: PumpEnd,
    /// Frames fully handed to the sink.
    pub frames: u64,
}

/// Outcome of a whole ferry.
#[derive(Debug)]
pub struct FerryReport {
    /// The direction that finished first.
    pub winner: Direction,
    pub client_to_runtime: PumpReport,
    pub runtime_to_client: PumpReport,
}

impl FerryReport {
    /// The error that ended the ferry, if any.
    pub fn error(&self) -> Option<&AttachError> {
        [&self.client_to_runtime, &self.runtime_to_client]
            .into_iter()
            .find_map(|report| match &report.end {
                PumpEnd::Failed(err) => Some(err),
                _ => None,
            })
    }
}

/// Runs attach channels against the configured runtime.
pub struct AttachProxy {
    resolver: Arc<AddressResolver>,
    connect_timeout: Duration,
    endpoint: String,
    image: String,
}

impl AttachProxy {
    pub fn new(resolver: AddressResolver, connect_timeout: Duration) -> Self {
        let endpoint = resolver.endpoint().to_string();
        Self {
            resolver: Arc::new(resolver),
            connect_timeout,
            endpoint,
            image: DEFAULT_IMAGE.to_string(),
        }
    }

    /// Image the sandboxes run, for log context.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn resolver(&self) -> &AddressResolver {
        &self.resolver
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    fn step(&self, channel: &mut AttachChannel, next: ChannelState) {
        match channel.advance(next) {
            Some(from) => debug!(
                channel = %channel.id(),
                container = %channel.session(),
                endpoint = %self.endpoint,
                image = %self.image,
                from = %from,
                to = %next,
                "channel.transition"
            ),
            None => warn!(
                channel = %channel.id(),
                container = %channel.session(),
                endpoint = %self.endpoint,
                image = %self.image,
                from = %channel.state(),
                to = %next,
                "channel.invalid-transition"
            ),
        }
    }

    /// Open the runtime side of `channel`, passing `query` through verbatim.
    ///
    /// Not retried. On failure the channel ends up `Closed` and the caller
    /// must refuse the client connection.
    pub async fn connect(
        &self,
        channel: &mut AttachChannel,
        query: Option<&str>,
    ) -> AttachResult<RuntimeSocket> {
        self.step(channel, ChannelState::Connecting);
        let target = self.resolver.attach_target(channel.session(), query);
        info!(
            channel = %channel.id(),
            container = %channel.session(),
            endpoint = %self.endpoint,
            image = %self.image,
            url = %target.url,
            "container.attaching"
        );

        let result = match tokio::time::timeout(self.connect_timeout, RuntimeSocket::connect(&target)).await {
            Ok(Ok(socket)) => Ok(socket),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.connect_timeout)),
        };

        match result {
            Ok(socket) => {
                self.step(channel, ChannelState::Attached);
                info!(
                    channel = %channel.id(),
                    container = %channel.session(),
                    endpoint = %self.endpoint,
                    image = %self.image,
                    "container.attached"
                );
                Ok(socket)
            }
            Err(reason) => {
                self.step(channel, ChannelState::Closing);
                error!(
                    channel = %channel.id(),
                    container = %channel.session(),
                    endpoint = %self.endpoint,
                    image = %self.image,
                    reason = %reason,
                    "container.attach-failed"
                );
                self.step(channel, ChannelState::Closed);
                Err(AttachError::SandboxUnreachable {
                    id: channel.session().to_string(),
                    reason,
                })
            }
        }
    }

    /// Ferry frames between `client` and `runtime` until one side ends,
    /// then close both.
    pub async fn run<C, R>(&self, mut channel: AttachChannel, client: C, runtime: R) -> FerryReport
    where
        C: FrameSocket,
        R: FrameSocket,
    {
        if channel.state() == ChannelState::Idle {
            // Runtime socket was supplied already connected.
            self.step(&mut channel, ChannelState::Connecting);
            self.step(&mut channel, ChannelState::Attached);
        }
        self.step(&mut channel, ChannelState::Ferrying);

        let (client_sink, client_stream) = client.split();
        let (runtime_sink, runtime_stream) = runtime.split();

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        tasks.spawn(forward(
            Direction::ClientToRuntime,
            client_stream,
            runtime_sink,
            cancel.clone(),
        ));
        tasks.spawn(forward(
            Direction::RuntimeToClient,
            runtime_stream,
            client_sink,
            cancel.clone(),
        ));

        let mut legs = Vec::with_capacity(2);
        while let Some(joined) = tasks.join_next().await {
            // The first leg to finish has already cancelled the other.
            cancel.cancel();
            match joined {
                Ok(leg) => legs.push(leg),
                Err(err) => error!(
                    channel = %channel.id(),
                    container = %channel.session(),
                    endpoint = %self.endpoint,
                    image = %self.image,
                    error = %err,
                    "channel.task-failed"
                ),
            }
        }

        self.step(&mut channel, ChannelState::Closing);
        let mut client_to_runtime = None;
        let mut runtime_to_client = None;
        let mut winner = None;
        for mut leg in legs {
            let side = match leg.report.direction {
                Direction::ClientToRuntime => "runtime",
                Direction::RuntimeToClient => "client",
            };
            if let Err(err) = leg.sink.close().await {
                debug!(
                    channel = %channel.id(),
                    container = %channel.session(),
                    endpoint = %self.endpoint,
                    image = %self.image,
                    side,
                    error = %err,
                    "channel.close-ignored"
                );
            }
            if !matches!(leg.report.end, PumpEnd::Cancelled) && winner.is_none() {
                winner = Some(leg.report.direction);
            }
            match leg.report.direction {
                Direction::ClientToRuntime => client_to_runtime = Some(leg.report),
                Direction::RuntimeToClient => runtime_to_client = Some(leg.report),
            }
        }
        self.step(&mut channel, ChannelState::Closed);

        let report = FerryReport {
            winner: winner.unwrap_or(Direction::ClientToRuntime),
            client_to_runtime: client_to_runtime.unwrap_or_else(|| lost(Direction::ClientToRuntime)),
            runtime_to_client: runtime_to_client.unwrap_or_else(|| lost(Direction::RuntimeToClient)),
        };

        match report.error() {
            Some(err) if err.is_protocol_violation() => error!(
                channel = %channel.id(),
                container = %channel.session(),
                endpoint = %self.endpoint,
                image = %self.image,
                error = %err,
                "channel.protocol-violation"
            ),
            Some(err) => warn!(
                channel = %channel.id(),
                container = %channel.session(),
                endpoint = %self.endpoint,
                image = %self.image,
                error = %err,
                "channel.transport-error"
            ),
            None => {}
        }
        info!(
            channel = %channel.id(),
            container = %channel.session(),
            endpoint = %self.endpoint,
            image = %self.image,
            winner = %report.winner,
            frames_in = report.client_to_runtime.frames,
            frames_out = report.runtime_to_client.frames,
            "channel.closed"
        );

        report
    }
}

/// A finished direction, handing back the sink it wrote to.
struct Leg {
    report: PumpReport,
    sink: Box<dyn FrameSink>,
}

fn lost(direction: Direction) -> PumpReport {
    PumpReport {
        direction,
        end: PumpEnd::Failed(AttachError::Transport("forwarding task aborted".to_string())),
        frames: 0,
    }
}

async fn forward(
    direction: Direction,
    mut source: Box<dyn FrameStream>,
    mut sink: Box<dyn FrameSink>,
    cancel: CancellationToken,
) -> Leg {
    let mut frames = 0;
    let end = tokio::select! {
        biased;
        _ = cancel.cancelled() => PumpEnd::Cancelled,
        result = pump(source.as_mut(), sink.as_mut(), &mut frames) => match result {
            Ok(end) => end,
            Err(err) => PumpEnd::Failed(err),
        },
    };
    cancel.cancel();

    Leg {
        report: PumpReport {
            direction,
            end,
            frames,
        },
        sink,
    }
}

/// Forward frames unchanged until the source stops being connected or ends.
async fn pump(
    source: &mut dyn FrameStream,
    sink: &mut dyn FrameSink,
    frames: &mut u64,
) -> AttachResult<PumpEnd> {
    loop {
        let received = source.receive().await?;
        let Some(frame) = received.filter(|_| source.is_connected()) else {
            return Ok(PumpEnd::PeerClosed);
        };
        sink.send(frame).await?;
        *frames += 1;
    }
}
