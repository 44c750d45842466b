//! External cancellation for event streams.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::EventStream;

/// Handle that stops a running event stream.
///
/// Cancelling ends the stream without a `finish` event; the in-flight HTTP body is dropped.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Wrap `stream` so it can be stopped from elsewhere.
pub fn with_cancel(stream: EventStream) -> (EventStream, CancelHandle) {
    let token = CancellationToken::new();
    let stop = token.clone();
    let wrapped = stream.take_until(async move { stop.cancelled().await });
    (Box::pin(wrapped), CancelHandle { token })
}
