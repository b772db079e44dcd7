//! Services, the request router, and the handler chain.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::frame;
use crate::metadata::Metadata;
use crate::status::Status;

/// A registered RPC service. One implementation serves every method of a
/// named service; request and response payloads are opaque bytes.
pub trait Service: Send + Sync {
    /// Handle one unary call. Returning `Err` places the status (and its
    /// percent-encoded message) in the response trailers.
    fn handle(&self, method: &str, request: &[u8]) -> Result<Vec<u8>, Status>;
}

/// Maps fully-qualified service names (e.g. `example.HelloWorld`) to
/// implementations.
#[derive(Default)]
pub struct Router {
    services: HashMap<String, Box<dyn Service>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service under its fully-qualified name.
    pub fn register(&mut self, name: impl Into<String>, service: impl Service + 'static) {
        self.services.insert(name.into(), Box::new(service));
    }

    /// Look up a service by name.
    pub fn lookup(&self, name: &str) -> Option<&dyn Service> {
        self.services.get(name).map(Box::as_ref)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Per-request state threaded through the handler chain.
#[derive(Debug)]
pub struct Context {
    /// Request path (`/service/method`).
    pub path: String,
    /// Request metadata (everything except `:path`).
    pub metadata: Metadata,
    /// Raw inbound body, still envelope-framed.
    pub body: Bytes,
    /// Outbound body, envelope-framed by whoever fills it in.
    pub response_body: Vec<u8>,
    /// Outcome for the response trailers.
    pub status: Status,
}

impl Context {
    pub fn new(path: String, metadata: Metadata, body: Bytes) -> Self {
        Self {
            path,
            metadata,
            body,
            response_body: Vec::new(),
            status: Status::ok(),
        }
    }
}

/// A link in the request-handling chain.
///
/// Handlers are stitched into a linked list at construction: each link
/// optionally holds the next one and decides when (and whether) to
/// delegate via `call_next`. The terminal link is `RpcHandler`.
pub trait Handler: Send + Sync {
    /// Process the request, usually delegating with `call_next`.
    fn call(&self, ctx: &mut Context);

    /// The next link in the chain, if any.
    fn next(&self) -> Option<&Arc<dyn Handler>> {
        None
    }

    /// Delegate to the next link. A no-op at the end of the chain.
    fn call_next(&self, ctx: &mut Context) {
        if let Some(next) = self.next() {
            next.call(ctx);
        }
    }
}

/// The terminal chain link: decodes the message envelope, resolves the
/// service, and invokes it.
pub struct RpcHandler {
    router: Arc<Router>,
}

impl RpcHandler {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

impl Handler for RpcHandler {
    fn call(&self, ctx: &mut Context) {
        // "/service/method" splits into ["", service, method].
        let mut parts = ctx.path.splitn(3, '/');
        let (service_name, method) = match (parts.next(), parts.next(), parts.next()) {
            (Some(""), Some(service), Some(method)) if !service.is_empty() && !method.is_empty() => {
                (service, method)
            }
            _ => {
                ctx.status = Status::invalid_argument(format!("malformed path {:?}", ctx.path));
                ctx.response_body = frame::encode_message(&[]).to_vec();
                return;
            }
        };

        let Some(service) = self.router.lookup(service_name) else {
            ctx.status = Status::not_found(format!("unknown service {}", service_name));
            ctx.response_body = frame::encode_message(&[]).to_vec();
            return;
        };

        // Strip the 5-byte envelope from the inbound body.
        let mut body = BytesMut::from(&ctx.body[..]);
        let message = match frame::decode_message(&mut body) {
            Ok(Some((message, _compressed))) => message,
            Ok(None) => Bytes::new(),
            Err(e) => {
                ctx.status = Status::invalid_argument(format!("bad message framing: {}", e));
                ctx.response_body = frame::encode_message(&[]).to_vec();
                return;
            }
        };

        match service.handle(method, &message) {
            Ok(reply) => {
                ctx.response_body = frame::encode_message(&reply).to_vec();
                ctx.status = Status::ok();
            }
            Err(status) => {
                ctx.status = status;
                ctx.response_body = frame::encode_message(&[]).to_vec();
            }
        }
    }
}
