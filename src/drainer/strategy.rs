use crate::blob::Token;
use crate::drainer::{DrainHandle, DrainType};
use crate::error::Result;

/// Backend hooks invoked by the [`Drainer`](crate::drainer::Drainer).
///
/// The drainer decides *when* a blob drains; the strategy knows *how* to
/// reach it (a local thread, a remote host). Hooks other than `drain` run on
/// the drainer's event loop thread or on the thread that started the pass and
/// must not block on drain milestones.
#[cfg_attr(test, mockall::automock)]
pub trait DrainStrategy: Send + Sync {
    /// Called once before the source blob is drained. An error aborts the
    /// pass and leaves the drainer idle.
    fn prepare_draining(&self, _is_final: bool, _handle: &DrainHandle) -> Result<()> {
        Ok(())
    }

    /// Ask `blob` to drain. The backend reports completion through
    /// [`DrainHandle::drained`], from any thread, at any later time.
    fn drain(&self, blob: Token, drain_type: DrainType, handle: &DrainHandle);

    /// `blob` has completed draining. Residual data, if collected, is
    /// reported through [`DrainHandle::submit_drain_data`].
    fn blob_drained(&self, _blob: Token, _drain_type: DrainType, _handle: &DrainHandle) {}

    /// Every blob has drained (called by `drain_intermediate`/`drain_final`).
    fn draining_done(&self, _is_final: bool) {}
}
