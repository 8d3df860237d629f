//! Bidirectional forwarding engine
//!
//! One inbound call is paired with exactly one outbound call to the resolved
//! backend. Two pumps move messages, one per direction, each over a channel of
//! capacity 1. A pump reserves the channel slot before it pulls the next
//! message from its producer, so at most one message per direction is between
//! the two calls. A stalled side stops the other and leaves buffering to HTTP/2
//! flow control.
//!
//! Termination: whatever status the backend closes with (including trailers)
//! is the caller's status. A caller cancel drops the outbound call, which resets
//! its HTTP/2 stream. Cancellation never travels from backend to caller other
//! than as that closing status.

use bytes::Bytes;
use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::codegen::BoxFuture;
use tonic::metadata::MetadataMap;
use tonic::server::StreamingService;
use tonic::{Code, Extensions, Request, Response, Status, Streaming};
use tracing::Instrument;

use super::context::RoutingDecision;
use super::dispatcher::MethodDescriptor;
use crate::error::ForwardError;
use crate::metrics::{self, Direction};

/// Headers regenerated by the transport on each hop
///
/// Payloads cross the proxy decompressed, so compression negotiation is per hop
/// as well. Everything else, `grpc-timeout` included, is forwarded verbatim.
pub const TRANSPORT_HEADERS: &[&str] = &[
    "content-type",
    "te",
    "user-agent",
    "grpc-encoding",
    "grpc-accept-encoding",
];

/// Lifecycle of one proxied call; states only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallState {
    Created,
    HeadersSent,
    Streaming,
    HalfClosed,
    Closed,
}

impl CallState {
    pub fn advance(&mut self, next: CallState) {
        if next > *self {
            *self = next;
        }
    }
}

/// Stream of messages and the terminal status returned to the caller
pub type ResponseStream = ReceiverStream<Result<Bytes, Status>>;

/// Handler for one accepted call, already routed
#[derive(Debug, Clone)]
pub struct ForwardCall {
    descriptor: MethodDescriptor,
    decision: RoutingDecision,
    max_message_size: usize,
}

impl ForwardCall {
    pub fn new(
        descriptor: MethodDescriptor,
        decision: RoutingDecision,
        max_message_size: usize,
    ) -> Self {
        Self {
            descriptor,
            decision,
            max_message_size,
        }
    }

    async fn forward(
        self,
        request: Request<Streaming<Bytes>>,
    ) -> Result<Response<ResponseStream>, Status> {
        let backend = self.decision.backend().clone();
        metrics::record_call_routed(backend.name(), self.decision.used_default());

        let (headers, _, inbound) = request.into_parts();

        // Request direction: started before the outbound call opens, since a
        // client-streaming backend may hold its headers until the caller half-closes
        let (outbound_tx, outbound_rx) = mpsc::channel(1);
        let (end_tx, end_rx) = oneshot::channel();
        let requests = tokio::spawn(pump_requests(inbound, outbound_tx, end_tx).in_current_span());

        let mut pair = CallPair::new(
            self.descriptor.full_name(),
            backend.name(),
            end_rx,
            PumpGuard(requests),
        );

        let mut outbound = Request::new(ReceiverStream::new(outbound_rx));
        *outbound.metadata_mut() = strip_transport_headers(headers);

        let mut grpc = tonic::client::Grpc::new(backend.channel())
            .max_decoding_message_size(self.max_message_size)
            .max_encoding_message_size(self.max_message_size);

        let opened = match grpc.ready().await {
            Ok(()) => {
                pair.open(grpc.streaming(
                    outbound,
                    self.descriptor.path().clone(),
                    self.descriptor.response_codec(),
                ))
                .await
            }
            Err(e) => Err(ForwardError::BackendUnavailable {
                backend: backend.name().to_string(),
                reason: e.to_string(),
            }
            .into_status()),
        };

        let response = match opened {
            Ok(response) => response,
            Err(status) => {
                // Trailers-only response; tonic mirrors code, message and metadata
                pair.close(&status);
                return Err(status);
            }
        };

        let (response_headers, backend_stream, _) = response.into_parts();
        pair.state.advance(CallState::HeadersSent);

        let (inbound_tx, inbound_rx) = mpsc::channel(1);
        tokio::spawn(
            pair.pump_responses(backend_stream, inbound_tx)
                .in_current_span(),
        );

        Ok(Response::from_parts(
            strip_transport_headers(response_headers),
            ReceiverStream::new(inbound_rx),
            Extensions::new(),
        ))
    }
}

impl StreamingService<Bytes> for ForwardCall {
    type Response = Bytes;
    type ResponseStream = ResponseStream;
    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: Request<Streaming<Bytes>>) -> Self::Future {
        let span = tracing::info_span!(
            "proxy_call",
            method = %self.descriptor.full_name(),
            backend = %self.decision.backend().name(),
        );
        let call = self.clone();
        Box::pin(call.forward(request).instrument(span))
    }
}

/// Drop transport-owned headers, keep all application metadata
pub fn strip_transport_headers(mut metadata: MetadataMap) -> MetadataMap {
    for name in TRANSPORT_HEADERS {
        metadata.remove(*name);
    }
    metadata
}

/// How the request direction finished
#[derive(Debug)]
enum InboundEnd {
    /// Caller half-closed; the outbound request stream was ended too
    HalfClosed { messages: u64 },
    /// Outbound call no longer accepts messages
    OutboundClosed,
    /// Reading from the caller failed
    Failed(Status),
}

/// Inbound → outbound, one message in flight
async fn pump_requests<S>(
    mut inbound: S,
    outbound: mpsc::Sender<Bytes>,
    end: oneshot::Sender<InboundEnd>,
) where
    S: Stream<Item = Result<Bytes, Status>> + Unpin,
{
    let mut messages = 0u64;

    let outcome = loop {
        // Credit first: the caller is only read once the outbound side has room
        let Ok(permit) = outbound.reserve().await else {
            break InboundEnd::OutboundClosed;
        };

        match inbound.next().await {
            Some(Ok(message)) => {
                permit.send(message);
                messages += 1;
                metrics::record_message_forwarded(Direction::Request);
            }
            None => break InboundEnd::HalfClosed { messages },
            Some(Err(status)) => break InboundEnd::Failed(status),
        }
    };

    // Dropping the sender ends the outbound request stream (half-close)
    drop(outbound);
    let _ = end.send(outcome);
}

/// Aborts the request pump when the call pair goes away
struct PumpGuard(JoinHandle<()>);

impl Drop for PumpGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum Termination {
    /// Backend closed the call; its status is mirrored
    Backend(Status),
    /// Caller stream failed; backend call cancelled
    Inbound(Status),
    /// Caller went away; backend call cancelled
    Cancelled,
}

/// Both halves of one logical call, owned by whichever task drives it
struct CallPair {
    method: String,
    backend: String,
    state: CallState,
    inbound_end: oneshot::Receiver<InboundEnd>,
    inbound_done: bool,
    _requests: PumpGuard,
}

impl CallPair {
    fn new(
        method: &str,
        backend: &str,
        inbound_end: oneshot::Receiver<InboundEnd>,
        requests: PumpGuard,
    ) -> Self {
        metrics::increment_in_flight();
        Self {
            method: method.to_string(),
            backend: backend.to_string(),
            state: CallState::Created,
            inbound_end,
            inbound_done: false,
            _requests: requests,
        }
    }

    /// Wait for the outbound call to open while watching the request direction
    async fn open<F>(&mut self, open: F) -> Result<Response<Streaming<Bytes>>, Status>
    where
        F: Future<Output = Result<Response<Streaming<Bytes>>, Status>>,
    {
        tokio::pin!(open);

        loop {
            tokio::select! {
                result = &mut open => return result,
                end = &mut self.inbound_end, if !self.inbound_done => {
                    if let Some(status) = self.on_inbound_end(end) {
                        return Err(status);
                    }
                }
            }
        }
    }

    /// Outbound → inbound, one message in flight, then the terminal status
    async fn pump_responses(
        mut self,
        mut backend: Streaming<Bytes>,
        inbound: mpsc::Sender<Result<Bytes, Status>>,
    ) {
        let termination = 'pump: loop {
            // Credit first: the backend is only read once the caller side has room
            let permit = tokio::select! {
                biased;
                permit = inbound.reserve() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break 'pump Termination::Cancelled,
                },
                end = &mut self.inbound_end, if !self.inbound_done => {
                    match self.inbound_termination(end, &inbound) {
                        Some(termination) => break 'pump termination,
                        None => continue 'pump,
                    }
                }
            };

            loop {
                tokio::select! {
                    biased;
                    _ = inbound.closed() => break 'pump Termination::Cancelled,
                    end = &mut self.inbound_end, if !self.inbound_done => {
                        if let Some(termination) = self.inbound_termination(end, &inbound) {
                            break 'pump termination;
                        }
                    }
                    next = backend.message() => match next {
                        Ok(Some(message)) => {
                            self.state.advance(CallState::Streaming);
                            permit.send(Ok(message));
                            metrics::record_message_forwarded(Direction::Response);
                            break;
                        }
                        Ok(None) => {
                            let trailers = match backend.trailers().await {
                                Ok(trailers) => trailers.unwrap_or_default(),
                                Err(status) => break 'pump Termination::Backend(status),
                            };
                            break 'pump Termination::Backend(Status::with_metadata(
                                Code::Ok,
                                "",
                                trailers,
                            ));
                        }
                        Err(status) => break 'pump Termination::Backend(status),
                    },
                }
            }
        };

        let status = match termination {
            Termination::Backend(status) => {
                // An Err item ends the inbound call with exactly this status and trailers
                let _ = inbound.send(Err(status.clone())).await;
                status
            }
            Termination::Inbound(status) => {
                drop(backend);
                tracing::warn!(error = %status, "Caller stream failed, cancelling backend call");
                let _ = inbound.send(Err(status.clone())).await;
                status
            }
            Termination::Cancelled => {
                drop(backend);
                tracing::info!("Caller cancelled, cancelling backend call");
                ForwardError::UpstreamCancel.into_status()
            }
        };

        self.close(&status);
    }

    /// Inbound end seen by the response pump; `None` while the call goes on
    fn inbound_termination(
        &mut self,
        end: Result<InboundEnd, oneshot::error::RecvError>,
        inbound: &mpsc::Sender<Result<Bytes, Status>>,
    ) -> Option<Termination> {
        let status = self.on_inbound_end(end)?;
        if inbound.is_closed() {
            Some(Termination::Cancelled)
        } else {
            Some(Termination::Inbound(status))
        }
    }

    /// Record the request direction finishing; returns a status if the call must fail
    fn on_inbound_end(
        &mut self,
        end: Result<InboundEnd, oneshot::error::RecvError>,
    ) -> Option<Status> {
        self.inbound_done = true;
        match end {
            Ok(InboundEnd::HalfClosed { messages }) => {
                self.state.advance(CallState::HalfClosed);
                tracing::debug!(messages, "Caller half-closed");
                None
            }
            Ok(InboundEnd::OutboundClosed) => None,
            Ok(InboundEnd::Failed(status)) => Some(ForwardError::StreamIo(status).into_status()),
            Err(_) => Some(Status::internal("Request forwarding stopped unexpectedly")),
        }
    }

    /// Single terminal transition
    fn close(&mut self, status: &Status) {
        if self.state == CallState::Closed {
            return;
        }
        self.state = CallState::Closed;

        metrics::record_call_completed(&self.backend, status.code());
        match status.code() {
            Code::Ok => tracing::info!(method = %self.method, "Call completed"),
            code => tracing::info!(
                method = %self.method,
                code = ?code,
                detail = status.message(),
                "Call closed"
            ),
        }
    }
}

impl Drop for CallPair {
    fn drop(&mut self) {
        // Dropped before a terminal status: the caller went away mid-open
        if self.state != CallState::Closed {
            metrics::record_call_completed(&self.backend, Code::Cancelled);
            tracing::info!(method = %self.method, "Caller cancelled before backend responded");
        }
        metrics::decrement_in_flight();
    }
}
