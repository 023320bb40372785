//! An in-memory `Transport` for tests: lets a test inject inbound frames
//! and inspect what was sent, without touching any OS MIDI API.

use std::sync::Mutex;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{EndpointId, ReceivedFrame, Transport, TransportError};

/// One outbound send the test can assert against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentFrame {
    Unicast {
        bytes: Vec<u8>,
        destination: EndpointId,
    },
    Broadcast {
        bytes: Vec<u8>,
    },
}

struct Inner {
    inbound_tx: mpsc::UnboundedSender<ReceivedFrame>,
    inbound_rx: Option<mpsc::UnboundedReceiver<ReceivedFrame>>,
    setup_tx: mpsc::UnboundedSender<()>,
    setup_rx: Option<mpsc::UnboundedReceiver<()>>,
    sent: Vec<SentFrame>,
    connected: Vec<EndpointId>,
    sources: Vec<EndpointId>,
    destinations: Vec<EndpointId>,
    shut_down: bool,
}

pub struct FakeTransport {
    inner: Mutex<Inner>,
}

impl FakeTransport {
    pub fn new(sources: Vec<EndpointId>, destinations: Vec<EndpointId>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (setup_tx, setup_rx) = mpsc::unbounded_channel();
        FakeTransport {
            inner: Mutex::new(Inner {
                inbound_tx,
                inbound_rx: Some(inbound_rx),
                setup_tx,
                setup_rx: Some(setup_rx),
                sent: Vec::new(),
                connected: Vec::new(),
                sources,
                destinations,
                shut_down: false,
            }),
        }
    }

    /// Push a frame onto the inbound stream as if the OS transport had
    /// just delivered it.
    pub fn inject(&self, frame: ReceivedFrame) {
        let inner = self.inner.lock().unwrap();
        let _ = inner.inbound_tx.send(frame);
    }

    /// End the inbound stream abruptly, simulating an abnormal transport
    /// failure rather than an explicit `shutdown`.
    pub fn sever(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.inbound_rx = None;
    }

    pub fn notify_setup_changed(&self) {
        let inner = self.inner.lock().unwrap();
        let _ = inner.setup_tx.send(());
    }

    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.inner.lock().unwrap().sent.clone()
    }

    pub fn connected_sources(&self) -> Vec<EndpointId> {
        self.inner.lock().unwrap().connected.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().unwrap().shut_down
    }

    pub fn set_destinations(&self, destinations: Vec<EndpointId>) {
        self.inner.lock().unwrap().destinations = destinations;
    }
}

impl Transport for FakeTransport {
    fn received(&self) -> BoxStream<'static, ReceivedFrame> {
        let mut inner = self.inner.lock().unwrap();
        match inner.inbound_rx.take() {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => stream::empty().boxed(),
        }
    }

    fn setup_changed(&self) -> BoxStream<'static, ()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.setup_rx.take() {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => stream::empty().boxed(),
        }
    }

    fn sources(&self) -> Vec<EndpointId> {
        self.inner.lock().unwrap().sources.clone()
    }

    fn destinations(&self) -> Vec<EndpointId> {
        self.inner.lock().unwrap().destinations.clone()
    }

    async fn send(&self, bytes: Vec<u8>, destination: EndpointId) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.shut_down {
            return Err(TransportError::ShutDown);
        }
        if !inner.destinations.contains(&destination) {
            return Err(TransportError::UnknownDestination(destination));
        }
        inner.sent.push(SentFrame::Unicast { bytes, destination });
        Ok(())
    }

    async fn broadcast(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.shut_down {
            return Err(TransportError::ShutDown);
        }
        inner.sent.push(SentFrame::Broadcast { bytes });
        Ok(())
    }

    async fn connect(&self, source: EndpointId) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.sources.contains(&source) {
            return Err(TransportError::UnknownSource(source));
        }
        if !inner.connected.contains(&source) {
            inner.connected.push(source);
        }
        Ok(())
    }

    async fn disconnect(&self, source: EndpointId) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connected.retain(|&s| s != source);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.inner.lock().unwrap().shut_down = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[tokio::test]
    async fn injected_frame_is_observable_on_received_stream() {
        let t = FakeTransport::new(vec![EndpointId(1)], vec![EndpointId(2)]);
        t.inject(ReceivedFrame {
            bytes: vec![0xF0, 0xF7],
            source: EndpointId(1),
            timestamp: SystemTime::now(),
        });
        let mut stream = t.received();
        let frame = stream.next().await.unwrap();
        assert_eq!(frame.bytes, vec![0xF0, 0xF7]);
    }

    #[tokio::test]
    async fn send_to_unknown_destination_fails() {
        let t = FakeTransport::new(vec![], vec![EndpointId(1)]);
        let err = t.send(vec![0], EndpointId(99)).await.unwrap_err();
        assert!(matches!(err, TransportError::UnknownDestination(EndpointId(99))));
    }

    #[tokio::test]
    async fn send_after_shutdown_fails_fast() {
        let t = FakeTransport::new(vec![], vec![EndpointId(1)]);
        t.shutdown().await.unwrap();
        let err = t.send(vec![0], EndpointId(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::ShutDown));
    }

    #[tokio::test]
    async fn sent_frames_are_recorded_for_assertions() {
        let t = FakeTransport::new(vec![], vec![EndpointId(1)]);
        t.send(vec![1, 2, 3], EndpointId(1)).await.unwrap();
        t.broadcast(vec![9]).await.unwrap();
        assert_eq!(
            t.sent_frames(),
            vec![
                SentFrame::Unicast {
                    bytes: vec![1, 2, 3],
                    destination: EndpointId(1)
                },
                SentFrame::Broadcast { bytes: vec![9] },
            ]
        );
    }

    #[tokio::test]
    async fn severed_transport_ends_received_stream() {
        let t = FakeTransport::new(vec![], vec![]);
        t.sever();
        let mut stream = t.received();
        assert_eq!(stream.next().await, None);
    }
}
