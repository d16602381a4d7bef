#![allow(dead_code, unused_imports)]

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use taskgate::engine::{ChainError, ChainOutcome, ChainRunner};
use taskgate::fs::mock::MockFileSystem;
use taskgate::fs::{FileSystem, RealFileSystem};
use taskgate::model::TransferContext;
use taskgate::store::{MemoryStore, Store};
use taskgate::tasks::RemoteDeleter;
use taskgate::types::Chain;

pub use taskgate_test_utils::builders;
pub use taskgate_test_utils::fakes;
pub use taskgate_test_utils::{init_tracing, with_timeout};

use taskgate_test_utils::fakes::{RecordingMailer, registry_with_scripted};

/// Store, filesystem, mailer and runner wired together for one test.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub mailer: RecordingMailer,
    pub runner: ChainRunner,
}

impl Harness {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        init_tracing();
        let store = Arc::new(MemoryStore::new());
        let mailer = RecordingMailer::default();
        let store_dyn: Arc<dyn Store> = store.clone();
        let runner = ChainRunner::new(Arc::new(registry_with_scripted()), store_dyn, fs)
            .with_mailer(Arc::new(mailer.clone()));
        Self {
            store,
            mailer,
            runner,
        }
    }

    /// Harness over an in-memory filesystem.
    pub fn mock() -> (Self, MockFileSystem) {
        let fs = MockFileSystem::new();
        (Self::new(Arc::new(fs.clone())), fs)
    }

    /// Harness over the real filesystem.
    pub fn real() -> Self {
        Self::new(Arc::new(RealFileSystem))
    }

    /// Store the context's transfer so progress can be recorded against it.
    pub fn register(&self, ctx: &mut TransferContext) {
        let id = self
            .store
            .insert_transfer(ctx.transfer.clone())
            .expect("insert transfer");
        ctx.transfer.id = id;
    }

    pub async fn run(
        &self,
        chain: Chain,
        ctx: &mut TransferContext,
    ) -> Result<ChainOutcome, ChainError> {
        self.run_with(chain, ctx, None).await
    }

    pub async fn run_with(
        &self,
        chain: Chain,
        ctx: &mut TransferContext,
        remote: Option<&dyn RemoteDeleter>,
    ) -> Result<ChainOutcome, ChainError> {
        let cancel = CancellationToken::new();
        with_timeout(self.runner.run_chain(&cancel, chain, ctx, remote)).await
    }
}
