// src/exec/backend.rs

//! Pluggable toolchain backend abstraction.
//!
//! The render pipeline talks to a `ToolchainBackend` instead of spawning
//! processes directly. This makes it easy to swap in a fake engine in tests
//! while keeping the production implementation in [`invoker`].
//!
//! [`invoker`]: crate::exec::invoker

use std::future::Future;
use std::pin::Pin;

use crate::exec::cancel::CancelSignal;
use crate::exec::{InvocationRequest, ToolchainInvocation, invoker};

/// Trait abstracting how one stage invocation is executed.
///
/// Implementations must always return a record: spawn failures, timeouts and
/// cancellation are encoded in [`ToolchainInvocation::termination`].
pub trait ToolchainBackend: Send + Sync + 'static {
    fn invoke<'a>(
        &'a self,
        request: InvocationRequest,
        cancel: CancelSignal,
    ) -> Pin<Box<dyn Future<Output = ToolchainInvocation> + Send + 'a>>;
}

/// Real backend used in production: runs the stage as an OS process.
#[derive(Debug, Clone, Default)]
pub struct ProcessBackend;

impl ProcessBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ToolchainBackend for ProcessBackend {
    fn invoke<'a>(
        &'a self,
        request: InvocationRequest,
        mut cancel: CancelSignal,
    ) -> Pin<Box<dyn Future<Output = ToolchainInvocation> + Send + 'a>> {
        Box::pin(async move { invoker::run(&request, &mut cancel).await })
    }
}
