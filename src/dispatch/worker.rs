//! Worker-thread backend for in-process and graphical-subapp commands.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    thread,
};

use tracing::{debug, error};

use super::{Backend, Job, SharedToolkit};
use crate::{
    command::{Body, CallContext, ExecMode},
    execution::{is_interruption, Failure, Outcome},
};

/// Runs native callables on a dedicated named thread per execution.
/// With a toolkit, the toolkit lock is held for the whole call, so
/// graphical commands never overlap.
pub struct ThreadBackend {
    toolkit: Option<SharedToolkit>,
}

impl ThreadBackend {
    pub fn in_process() -> Self {
        Self { toolkit: None }
    }

    pub fn graphical(toolkit: SharedToolkit) -> Self {
        Self {
            toolkit: Some(toolkit),
        }
    }
}

impl Backend for ThreadBackend {
    fn mode(&self) -> ExecMode {
        match self.toolkit {
            Some(_) => ExecMode::GraphicalSubapp,
            None => ExecMode::InProcess,
        }
    }

    fn launch(&self, job: Job) {
        let toolkit = self.toolkit.clone();
        let name = format!("gexec-worker-{}", job.id);
        // The job moves into the closure; if spawning fails the closure is
        // dropped with it and the finisher reports the failure.
        if let Err(err) = thread::Builder::new()
            .name(name)
            .spawn(move || run(job, toolkit))
        {
            error!(error = %err, "failed to spawn worker thread");
        }
    }
}

fn run(job: Job, toolkit: Option<SharedToolkit>) {
    let Job {
        id,
        descriptor,
        args,
        bridge,
        finisher,
    } = job;

    let Body::Native(callable) = descriptor.body() else {
        finisher.finish(Outcome::Failed(Failure::protocol(format!(
            "{} has no native body",
            descriptor.qualified_name()
        ))));
        return;
    };
    let mut console = match bridge.acquire() {
        Ok(console) => console,
        Err(err) => {
            finisher.finish(Outcome::Failed(Failure::protocol(err.to_string())));
            return;
        }
    };
    let cancel = bridge.reply_handle();

    debug!(id, command = %descriptor.qualified_name(), "worker started");
    let returned = catch_unwind(AssertUnwindSafe(|| match &toolkit {
        Some(toolkit) => {
            let mut guard = toolkit.lock();
            debug!(id, "toolkit context acquired");
            let mut ctx = CallContext::new(&args, &mut console, Some(&mut **guard));
            callable(&mut ctx)
        }
        None => {
            let mut ctx = CallContext::new(&args, &mut console, None);
            callable(&mut ctx)
        }
    }));
    // Every line the command wrote is queued before the result goes out.
    console.release();

    let outcome = match returned {
        Ok(Ok(response)) => Outcome::Completed(response),
        Ok(Err(err)) if cancel.is_cancelled() || is_interruption(&err) => Outcome::Cancelled,
        Ok(Err(err)) => Outcome::Failed(Failure::from_error(&err)),
        Err(payload) => Outcome::Failed(Failure::panic(payload.as_ref())),
    };
    finisher.finish(outcome);
}
