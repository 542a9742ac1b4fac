//! Wire types and gRPC plumbing for `redpanda.runtime.v1alpha1`.
//!
//! Written in the shape `prost-build`/`tonic-build` emit so the crate builds
//! without a protobuf compiler. Map fields use `BTreeMap`, which keeps struct
//! keys sorted on both ends.

use std::collections::BTreeMap;

pub const SERVICE_NAME: &str = "redpanda.runtime.v1alpha1.AgentRuntime";
pub const INVOKE_AGENT_PATH: &str = "/redpanda.runtime.v1alpha1.AgentRuntime/InvokeAgent";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum NullValue {
    NullValue = 0,
}

/// A dynamically typed value.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Value {
    #[prost(oneof = "value::Kind", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9")]
    pub kind: Option<value::Kind>,
}

pub mod value {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(enumeration = "super::NullValue", tag = "1")]
        NullValue(i32),
        #[prost(bool, tag = "2")]
        BoolValue(bool),
        #[prost(int64, tag = "3")]
        IntegerValue(i64),
        #[prost(double, tag = "4")]
        DoubleValue(f64),
        #[prost(string, tag = "5")]
        StringValue(String),
        #[prost(bytes = "vec", tag = "6")]
        BytesValue(Vec<u8>),
        #[prost(message, tag = "7")]
        TimestampValue(::prost_types::Timestamp),
        #[prost(message, tag = "8")]
        ListValue(super::ListValue),
        #[prost(message, tag = "9")]
        StructValue(super::StructValue),
    }
}

impl Value {
    pub fn of(kind: value::Kind) -> Self {
        Self { kind: Some(kind) }
    }

    pub fn null() -> Self {
        Self::of(value::Kind::NullValue(NullValue::NullValue as i32))
    }

    pub fn string(text: impl Into<String>) -> Self {
        Self::of(value::Kind::StringValue(text.into()))
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListValue {
    #[prost(message, repeated, tag = "1")]
    pub values: Vec<Value>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StructValue {
    #[prost(btree_map = "string, message", tag = "1")]
    pub fields: BTreeMap<String, Value>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(btree_map = "string, message", tag = "3")]
    pub metadata: BTreeMap<String, Value>,
    #[prost(oneof = "message::Payload", tags = "1, 2")]
    pub payload: Option<message::Payload>,
}

pub mod message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(bytes = "vec", tag = "1")]
        Bytes(Vec<u8>),
        #[prost(message, tag = "2")]
        Structured(super::Value),
    }
}

/// W3C trace context of the caller, all fields lowercase hex.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TraceContext {
    #[prost(string, tag = "1")]
    pub trace_id: String,
    #[prost(string, tag = "2")]
    pub span_id: String,
    #[prost(string, tag = "3")]
    pub trace_flags: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InvokeAgentRequest {
    #[prost(message, optional, tag = "1")]
    pub message: Option<Message>,
    #[prost(message, optional, tag = "2")]
    pub trace_context: Option<TraceContext>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Span {
    #[prost(string, tag = "1")]
    pub span_id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(message, optional, tag = "3")]
    pub start_time: Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "4")]
    pub end_time: Option<::prost_types::Timestamp>,
    #[prost(btree_map = "string, message", tag = "5")]
    pub attributes: BTreeMap<String, Value>,
    #[prost(message, repeated, tag = "6")]
    pub child_spans: Vec<Span>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Trace {
    #[prost(message, repeated, tag = "1")]
    pub spans: Vec<Span>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InvokeAgentResponse {
    #[prost(message, optional, tag = "1")]
    pub message: Option<Message>,
    #[prost(message, optional, tag = "2")]
    pub trace: Option<Trace>,
}

// ─── Server ─────────────────────────────────────────────────────────────────

pub mod agent_runtime_server {
    use std::convert::Infallible;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tonic::codegen::{empty_body, http, Body, BoxFuture, Context, Poll, Service, StdError};

    #[async_trait]
    pub trait AgentRuntime: Send + Sync + 'static {
        async fn invoke_agent(
            &self,
            request: tonic::Request<super::InvokeAgentRequest>,
        ) -> std::result::Result<tonic::Response<super::InvokeAgentResponse>, tonic::Status>;
    }

    #[derive(Debug)]
    pub struct AgentRuntimeServer<T: AgentRuntime> {
        inner: Arc<T>,
    }

    impl<T: AgentRuntime> AgentRuntimeServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T: AgentRuntime> Clone for AgentRuntimeServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    struct InvokeAgentSvc<T: AgentRuntime>(Arc<T>);

    impl<T: AgentRuntime> tonic::server::UnaryService<super::InvokeAgentRequest> for InvokeAgentSvc<T> {
        type Response = super::InvokeAgentResponse;
        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

        fn call(&mut self, request: tonic::Request<super::InvokeAgentRequest>) -> Self::Future {
            let inner = Arc::clone(&self.0);
            Box::pin(async move { inner.invoke_agent(request).await })
        }
    }

    impl<T, B> Service<http::Request<B>> for AgentRuntimeServer<T>
    where
        T: AgentRuntime,
        B: Body + Send + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            match req.uri().path() {
                super::INVOKE_AGENT_PATH => {
                    let method = InvokeAgentSvc(Arc::clone(&self.inner));
                    Box::pin(async move {
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec);
                        Ok(grpc.unary(method, req).await)
                    })
                }
                _ => Box::pin(async move {
                    let mut response = http::Response::new(empty_body());
                    let headers = response.headers_mut();
                    headers.insert("grpc-status", http::HeaderValue::from_static("12"));
                    headers.insert(
                        http::header::CONTENT_TYPE,
                        http::HeaderValue::from_static("application/grpc"),
                    );
                    Ok(response)
                }),
            }
        }
    }

    impl<T: AgentRuntime> tonic::server::NamedService for AgentRuntimeServer<T> {
        const NAME: &'static str = super::SERVICE_NAME;
    }
}

// ─── Client ─────────────────────────────────────────────────────────────────

pub mod agent_runtime_client {
    use tonic::codegen::{http, Body, Bytes, StdError};

    /// Caller side of the runtime service, as used by a host process.
    #[derive(Debug, Clone)]
    pub struct AgentRuntimeClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl AgentRuntimeClient<tonic::transport::Channel> {
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> AgentRuntimeClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            Self {
                inner: tonic::client::Grpc::new(inner),
            }
        }

        pub async fn invoke_agent(
            &mut self,
            request: impl tonic::IntoRequest<super::InvokeAgentRequest>,
        ) -> Result<tonic::Response<super::InvokeAgentResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|err| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("service was not ready: {}", err.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(super::INVOKE_AGENT_PATH);
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
}
