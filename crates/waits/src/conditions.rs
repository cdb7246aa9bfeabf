//! Named wait conditions over the concrete session state, replacing the
//! reflective path-walking wait with typed probes.

use tokio_util::sync::CancellationToken;

use replaykit_core_types::{FramePath, NativeFrameId, ReplayError, TabId};
use replaykit_session::{FrameMap, WindowSession};

use crate::{poll_until, poll_until_deadline, WaitConfig, WaitOutcome};

/// Wait until the tab's last navigation has completed.
pub async fn tab_ready(
    frames: &FrameMap,
    tab: TabId,
    cancel: &CancellationToken,
) -> Result<WaitOutcome<()>, ReplayError> {
    poll_until(WaitConfig::default(), cancel, "page to load", || {
        frames.is_ready(tab).then_some(())
    })
    .await
}

/// Wait until a frame path has a registered native id for the tab.
/// Selecting an unannounced frame waits here rather than failing.
pub async fn frame_registered(
    frames: &FrameMap,
    tab: TabId,
    path: &FramePath,
    cancel: &CancellationToken,
) -> Result<WaitOutcome<NativeFrameId>, ReplayError> {
    let what = format!("frame {path} to register");
    poll_until(WaitConfig::default(), cancel, &what, || {
        frames.lookup(tab, path)
    })
    .await
}

/// Wait for a declared new-window expectation to be claimed by an adopted
/// tab, bounded by the expectation's own timeout.
pub async fn new_window(
    session: &WindowSession,
    cancel: &CancellationToken,
) -> Result<WaitOutcome<()>, ReplayError> {
    let Some(pending) = session.pending_window() else {
        return Ok(WaitOutcome::Satisfied(()));
    };
    poll_until_deadline(pending.timeout, cancel, "new window to appear", || {
        session.pending_window().is_none().then_some(())
    })
    .await
}
