//! In-memory transport for unit tests.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::frame::{Frame, Transport};
use crate::error::TransportError;

/// The far side of a [`channel_transport`].
#[derive(Debug)]
pub(crate) struct PeerEnd {
    /// Every frame the session wrote, in order.
    pub written: mpsc::UnboundedReceiver<Frame>,
    /// Items the session will read. Dropping it ends the stream.
    pub inbound: mpsc::UnboundedSender<Result<Frame, TransportError>>,
}

impl PeerEnd {
    /// Feeds one frame to the session's reader.
    pub fn push(&self, frame: Frame) -> bool {
        self.inbound.send(Ok(frame)).is_ok()
    }

    /// Next frame written by the session, skipping keepalive pings.
    pub async fn next_data(&mut self) -> Option<Frame> {
        loop {
            match self.written.recv().await? {
                Frame::Ping(_) => continue,
                frame => return Some(frame),
            }
        }
    }
}

/// Transport backed by two unbounded channels.
pub(crate) fn channel_transport() -> (Transport, PeerEnd) {
    channel_transport_with(())
}

/// Like [`channel_transport`], keeping `guard` alive for as long as either
/// half of the transport is.
pub(crate) fn channel_transport_with<G>(guard: G) -> (Transport, PeerEnd)
where
    G: Send + Sync + 'static,
{
    let guard = Arc::new(guard);
    let (written_tx, written) = mpsc::unbounded_channel();
    let (inbound, inbound_rx) = mpsc::unbounded_channel();

    let sink = futures_util::sink::unfold(
        (written_tx, Arc::clone(&guard)),
        |(tx, guard), frame: Frame| async move {
            tx.send(frame).map_err(|_| TransportError::Closed)?;
            Ok::<_, TransportError>((tx, guard))
        },
    );
    let stream = futures_util::stream::unfold((inbound_rx, guard), |(mut rx, guard)| async move {
        rx.recv().await.map(|item| (item, (rx, guard)))
    });

    (Transport::new(sink, stream), PeerEnd { written, inbound })
}
