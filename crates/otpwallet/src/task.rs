//! background tree construction
//!
//! the build runs on tokio's blocking pool (it is cpu bound and fans out to
//! rayon). progress arrives on a finite stream that ends when the build
//! finishes, fails or is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use otp_merkle::{compute_tree, Hasher, OtpTree, Progress, TreeError, TreeParams};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

use crate::{Error, Result};

/// stops a running build at its next batch boundary
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct BuildTask {
    pub progress: UnboundedReceiverStream<Progress>,
    cancel: CancelHandle,
    handle: JoinHandle<Result<OtpTree>>,
}

impl BuildTask {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// wait for the tree; a cancelled build yields `TreeError::Cancelled`
    pub async fn join(self) -> Result<OtpTree> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(Error::Tree(TreeError::Cancelled)),
        }
    }
}

/// start building `params` on the blocking pool
pub fn spawn_build(params: TreeParams, hasher: Arc<dyn Hasher>) -> BuildTask {
    spawn_build_with(params, hasher, |_, _| {})
}

/// like [`spawn_build`], with `hook` seeing each progress event on the build
/// thread before it is streamed
fn spawn_build_with<F>(params: TreeParams, hasher: Arc<dyn Hasher>, mut hook: F) -> BuildTask
where
    F: FnMut(&Progress, &CancelHandle) + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancelHandle::default();
    let probe = cancel.clone();

    let handle = tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        info!(leaves = params.total_leaves(), inner_trees = params.inner_trees, "tree build started");
        // a dropped receiver only means nobody is watching
        let mut observer = |p: Progress| {
            hook(&p, &probe);
            let _ = tx.send(p);
        };
        let result = compute_tree(&params, hasher.as_ref(), &mut observer, &|| probe.is_cancelled());
        match &result {
            Ok(tree) => info!(
                root = %hex::encode(tree.root()),
                height = tree.height(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "tree build finished"
            ),
            Err(e) => warn!("tree build stopped: {}", e),
        }
        result.map_err(Error::from)
    });

    BuildTask { progress: UnboundedReceiverStream::new(rx), cancel, handle }
}
