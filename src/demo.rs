//! Demo backends served behind the gateway
//!
//! `Greeter` and `Calculator` are the two sample services the gateway was first
//! deployed in front of. `Echo` covers every call shape and is what the e2e
//! suite drives through the proxy.

use std::pin::Pin;
use tokio_stream::{Stream, StreamExt};
use tonic::metadata::MetadataValue;
use tonic::{Request, Response, Status, Streaming};

// Include generated proto code
pub mod proto {
    pub mod helloworld {
        include!(concat!(env!("OUT_DIR"), "/helloworld.rs"));
    }

    pub mod calculator {
        include!(concat!(env!("OUT_DIR"), "/calculator.rs"));
    }

    pub mod echo {
        include!(concat!(env!("OUT_DIR"), "/echo.rs"));
    }
}

use proto::calculator::{SumReply, SumRequest, calculator_server::Calculator};
use proto::echo::{EchoReply, EchoRequest, echo_server::Echo};
use proto::helloworld::{HelloReply, HelloRequest, greeter_server::Greeter};

pub use proto::calculator::calculator_server::CalculatorServer;
pub use proto::echo::echo_server::EchoServer;
pub use proto::helloworld::greeter_server::GreeterServer;

/// Response header naming the backend instance that served a call
pub const SERVED_BY_HEADER: &str = "x-served-by";

/// Header the greeter reports back when it reaches the backend
const TARGET_HEADER: &str = "x-backend-target";

#[derive(Debug, Default)]
pub struct GreeterService;

#[tonic::async_trait]
impl Greeter for GreeterService {
    async fn say_hello(
        &self,
        request: Request<HelloRequest>,
    ) -> Result<Response<HelloReply>, Status> {
        let target = request
            .metadata()
            .get(TARGET_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut message = format!("Hello {}", request.into_inner().name);
        if let Some(target) = target {
            message.push_str(&format!(" (Header: {})", target));
        }

        Ok(Response::new(HelloReply { message }))
    }
}

#[derive(Debug, Default)]
pub struct CalculatorService;

#[tonic::async_trait]
impl Calculator for CalculatorService {
    async fn sum(&self, request: Request<SumRequest>) -> Result<Response<SumReply>, Status> {
        let req = request.into_inner();
        let result = req
            .a
            .checked_add(req.b)
            .ok_or_else(|| Status::out_of_range("Sum overflows int32"))?;

        Ok(Response::new(SumReply { result }))
    }
}

type EchoStream = Pin<Box<dyn Stream<Item = Result<EchoReply, Status>> + Send>>;

/// Echo backend tagged with an instance name
///
/// Messages prefixed with `error:` fail the call with INVALID_ARGUMENT and an
/// `x-echo-error` trailer, so status mirroring can be observed.
#[derive(Debug, Clone)]
pub struct EchoService {
    name: String,
}

impl EchoService {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn tag<T>(&self, mut response: Response<T>) -> Response<T> {
        if let Ok(value) = MetadataValue::try_from(self.name.as_str()) {
            response.metadata_mut().insert(SERVED_BY_HEADER, value);
        }
        response
    }
}

fn check(message: &str) -> Result<(), Status> {
    match message.strip_prefix("error:") {
        Some(reason) => {
            let mut status = Status::invalid_argument(reason.to_string());
            status
                .metadata_mut()
                .insert("x-echo-error", MetadataValue::from_static("requested"));
            Err(status)
        }
        None => Ok(()),
    }
}

#[tonic::async_trait]
impl Echo for EchoService {
    async fn unary(&self, request: Request<EchoRequest>) -> Result<Response<EchoReply>, Status> {
        let req = request.into_inner();
        check(&req.message)?;

        Ok(self.tag(Response::new(EchoReply {
            message: req.message,
            sequence: 0,
        })))
    }

    type ServerStreamStream = EchoStream;

    async fn server_stream(
        &self,
        request: Request<EchoRequest>,
    ) -> Result<Response<Self::ServerStreamStream>, Status> {
        let req = request.into_inner();
        check(&req.message)?;

        let stream = async_stream::stream! {
            for sequence in 0..req.count {
                yield Ok(EchoReply {
                    message: format!("{}-{}", req.message, sequence),
                    sequence,
                });
            }
        };

        Ok(self.tag(Response::new(Box::pin(stream) as Self::ServerStreamStream)))
    }

    async fn client_stream(
        &self,
        request: Request<Streaming<EchoRequest>>,
    ) -> Result<Response<EchoReply>, Status> {
        let mut stream = request.into_inner();
        let mut messages = Vec::new();

        while let Some(req) = stream.next().await {
            let req = req?;
            check(&req.message)?;
            messages.push(req.message);
        }

        Ok(self.tag(Response::new(EchoReply {
            sequence: messages.len() as u32,
            message: messages.join(","),
        })))
    }

    type BidiStream = EchoStream;

    async fn bidi(
        &self,
        request: Request<Streaming<EchoRequest>>,
    ) -> Result<Response<Self::BidiStream>, Status> {
        let mut inbound = request.into_inner();

        let stream = async_stream::stream! {
            let mut sequence = 0;
            while let Some(req) = inbound.next().await {
                match req {
                    Ok(req) => {
                        if let Err(status) = check(&req.message) {
                            yield Err(status);
                            break;
                        }
                        yield Ok(EchoReply { message: req.message, sequence });
                        sequence += 1;
                    }
                    Err(status) => {
                        yield Err(status);
                        break;
                    }
                }
            }
        };

        Ok(self.tag(Response::new(Box::pin(stream) as Self::BidiStream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[tokio::test]
    async fn test_greeter_says_hello() {
        let reply = GreeterService
            .say_hello(Request::new(HelloRequest {
                name: "X".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(reply.message, "Hello X");
    }

    #[tokio::test]
    async fn test_greeter_reports_routing_header() {
        let mut request = Request::new(HelloRequest {
            name: "X".to_string(),
        });
        request
            .metadata_mut()
            .insert(TARGET_HEADER, MetadataValue::from_static("greeter"));

        let reply = GreeterService.say_hello(request).await.unwrap().into_inner();
        assert_eq!(reply.message, "Hello X (Header: greeter)");
    }

    #[tokio::test]
    async fn test_calculator_sum() {
        let reply = CalculatorService
            .sum(Request::new(SumRequest { a: 10, b: 20 }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(reply.result, 30);
    }

    #[tokio::test]
    async fn test_calculator_overflow() {
        let status = CalculatorService
            .sum(Request::new(SumRequest { a: i32::MAX, b: 1 }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::OutOfRange);
    }

    #[tokio::test]
    async fn test_echo_unary_tags_response() {
        let response = EchoService::new("echo-a")
            .unary(Request::new(EchoRequest {
                message: "ping".to_string(),
                count: 0,
            }))
            .await
            .unwrap();
        assert_eq!(response.metadata().get(SERVED_BY_HEADER).unwrap(), "echo-a");
        assert_eq!(response.into_inner().message, "ping");
    }

    #[tokio::test]
    async fn test_echo_error_prefix() {
        let status = EchoService::new("echo")
            .unary(Request::new(EchoRequest {
                message: "error:bad input".to_string(),
                count: 0,
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "bad input");
        assert_eq!(status.metadata().get("x-echo-error").unwrap(), "requested");
    }

    #[tokio::test]
    async fn test_echo_server_stream_numbers_replies() {
        let response = EchoService::new("echo")
            .server_stream(Request::new(EchoRequest {
                message: "m".to_string(),
                count: 3,
            }))
            .await
            .unwrap();

        let replies: Vec<_> = response
            .into_inner()
            .map(|r| r.unwrap().message)
            .collect()
            .await;
        assert_eq!(replies, vec!["m-0", "m-1", "m-2"]);
    }
}
