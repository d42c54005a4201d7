//! The dispatcher as a `tower::Service`, so transport code can stack
//! middleware in front of it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use docket_core::OpMsgRequest;
use tower::Service;

use super::context::OperationContext;
use super::dispatch::CommandDispatcher;
use super::error::DispatchError;
use super::reply::Reply;

/// One decoded request plus the operation context it runs under.
pub struct CommandRequest {
    pub op_ctx: Arc<OperationContext>,
    pub request: OpMsgRequest,
}

impl CommandRequest {
    #[must_use]
    pub fn new(op_ctx: Arc<OperationContext>, request: OpMsgRequest) -> Self {
        Self { op_ctx, request }
    }

    #[must_use]
    pub fn command_name(&self) -> &str {
        self.request.command_name()
    }
}

/// Innermost service: runs each request through [`CommandDispatcher::dispatch_async`].
#[derive(Clone)]
pub struct CommandService {
    dispatcher: CommandDispatcher,
}

impl CommandService {
    #[must_use]
    pub fn new(dispatcher: CommandDispatcher) -> Self {
        Self { dispatcher }
    }
}

impl Service<CommandRequest> for CommandService {
    type Response = Reply;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Reply, DispatchError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: CommandRequest) -> Self::Future {
        let dispatcher = self.dispatcher.clone();
        Box::pin(async move { dispatcher.dispatch_async(req.op_ctx, req.request).await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use docket_core::{doc, RequestContext};
    use futures_util::future::join_all;
    use tower::ServiceExt;

    use super::*;
    use crate::command::config::ServerConfig;
    use crate::command::context::ServiceContext;
    use crate::command::registry::CommandRegistry;
    use crate::commands::ping::PingCommand;

    fn service() -> (CommandService, Arc<ServiceContext>) {
        let mut registry = CommandRegistry::new();
        registry.register_typed(PingCommand, &[]);
        let ctx = Arc::new(ServiceContext::new(ServerConfig::default(), registry));
        (CommandService::new(CommandDispatcher::new(ctx.clone())), ctx)
    }

    #[tokio::test]
    async fn oneshot_dispatches_request() {
        let (svc, ctx) = service();
        let op_ctx = Arc::new(OperationContext::new(ctx.clone(), RequestContext::default()));
        let reply = svc
            .oneshot(CommandRequest::new(op_ctx, OpMsgRequest::new("admin", doc! { "ping" => 1 })))
            .await
            .unwrap();
        assert!(reply.ok());
        assert_eq!(ctx.registry().find_command("ping").unwrap().executed(), 1);
    }

    #[tokio::test]
    async fn unknown_command_is_a_reply_not_an_error() {
        let (svc, ctx) = service();
        let op_ctx = Arc::new(OperationContext::new(ctx, RequestContext::default()));
        let reply = svc
            .oneshot(CommandRequest::new(op_ctx, OpMsgRequest::new("admin", doc! { "nope" => 1 })))
            .await
            .unwrap();
        assert_eq!(reply.code(), Some(59));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_share_counters() {
        let (svc, ctx) = service();
        let calls = (0..64).map(|_| {
            let op_ctx = Arc::new(OperationContext::new(ctx.clone(), RequestContext::default()));
            let svc = svc.clone();
            tokio::spawn(async move {
                svc.oneshot(CommandRequest::new(op_ctx, OpMsgRequest::new("admin", doc! { "ping" => 1 })))
                    .await
            })
        });
        for result in join_all(calls).await {
            assert!(result.unwrap().unwrap().ok());
        }
        let ping = ctx.registry().find_command("ping").unwrap();
        assert_eq!((ping.executed(), ping.failed()), (64, 0));
    }
}
