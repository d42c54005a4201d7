//! Admission control for the command pipeline.
//!
//! Each admitted command holds one permit from a shared semaphore until its
//! reply is produced. When none are left the request is refused with
//! [`DispatchError::Overloaded`] instead of queueing. Internal (node-to-node)
//! requests and the commands named in the exempt list bypass admission so
//! that health checks keep answering under load.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower::{Layer, Service};
use tracing::debug;

use crate::command::error::DispatchError;
use crate::command::reply::Reply;
use crate::command::service::CommandRequest;

/// Commands admitted even when every permit is taken.
pub const DEFAULT_EXEMPT_COMMANDS: &[&str] = &["ping", "serverStatus"];

#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    permits: Arc<Semaphore>,
    exempt: Arc<[&'static str]>,
}

impl LoadShedLayer {
    /// Admits at most `max_concurrent` non-exempt commands at once.
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent as usize)),
            exempt: DEFAULT_EXEMPT_COMMANDS.into(),
        }
    }

    #[must_use]
    pub fn with_exempt_commands(mut self, names: &[&'static str]) -> Self {
        self.exempt = names.into();
        self
    }

    /// Permits not currently held by an in-flight command.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            permits: self.permits.clone(),
            exempt: self.exempt.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    permits: Arc<Semaphore>,
    exempt: Arc<[&'static str]>,
}

impl<S> LoadShedService<S> {
    fn bypasses_admission(&self, req: &CommandRequest) -> bool {
        let name = req.command_name();
        req.op_ctx.client().internal || self.exempt.iter().any(|exempt| *exempt == name)
    }

    /// `Ok(None)` for requests that run without a permit.
    fn admit(&self, req: &CommandRequest) -> Result<Option<OwnedSemaphorePermit>, DispatchError> {
        if self.bypasses_admission(req) {
            return Ok(None);
        }
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(_) => {
                debug!(command = req.command_name(), op_id = req.op_ctx.op_id(), "shedding command");
                metrics::counter!("docket_commands_shed_total", "command" => req.command_name().to_string())
                    .increment(1);
                Err(DispatchError::Overloaded)
            }
        }
    }
}

impl<S> Service<CommandRequest> for LoadShedService<S>
where
    S: Service<CommandRequest, Response = Reply, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = Reply;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Reply, DispatchError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: CommandRequest) -> Self::Future {
        let permit = match self.admit(&req) {
            Ok(permit) => permit,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let fut = self.inner.call(req);
        Box::pin(async move {
            let _permit = permit;
            fut.await
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
