//! Stage pipeline
//!
//! Generate, prepare and execute are each an ordered list of named stages
//! run over one owned context. [`run_stages`] threads the context through
//! the stages and stops at the first error; the remaining stages are
//! skipped.
//!
//! Extension hooks are stages like any other, so hook points are
//! interleaved with built-in computation without special call sites.

use crate::error::Result;
use tracing::{debug, error, Span};

/// Context threaded through a pipeline
pub trait StageContext {
    /// Span every stage of this run logs under
    fn span(&self) -> &Span;
}

/// One named step of a pipeline
pub struct Stage<C, O> {
    pub name: &'static str,
    pub run: fn(C, &O) -> Result<C>,
}

impl<C, O> Stage<C, O> {
    pub const fn new(name: &'static str, run: fn(C, &O) -> Result<C>) -> Self {
        Self { name, run }
    }
}

impl<C, O> Clone for Stage<C, O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C, O> Copy for Stage<C, O> {}

impl<C, O> std::fmt::Debug for Stage<C, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish()
    }
}

/// Run `stages` in order over `context`
///
/// # Errors
/// The error of the first failing stage; later stages do not run.
pub fn run_stages<C, O>(mut context: C, options: &O, stages: &[Stage<C, O>]) -> Result<C>
where
    C: StageContext,
{
    for stage in stages {
        let span = context.span().clone();
        let _entered = span.enter();
        debug!(stage = stage.name, "running stage");

        context = match (stage.run)(context, options) {
            Ok(context) => context,
            Err(e) => {
                error!(stage = stage.name, error = %e, "stage failed");
                return Err(e);
            }
        };
    }
    Ok(context)
}
