//! Frame events and the broadcast bus that fans them out.

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::broadcast;

use simcast_platform::Platform;

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
/// Zero-length IEND chunk: length, type, CRC
const PNG_IEND: &[u8] = &[0, 0, 0, 0, b'I', b'E', b'N', b'D', 0xae, 0x42, 0x60, 0x82];
const JPEG_SOI: &[u8] = &[0xff, 0xd8];
const JPEG_EOI: &[u8] = &[0xff, 0xd9];

/// One acquired frame. `data` is shared, so fan-out never copies pixels.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameEvent {
    pub device_id: String,
    pub platform: Platform,
    #[serde(skip)]
    pub data: Bytes,
    pub sequence: u64,
    pub timestamp_ms: i64,
}

/// Broadcast channel of frames from every session, tagged by device id.
#[derive(Clone)]
pub struct FrameBus {
    tx: broadcast::Sender<FrameEvent>,
}

impl FrameBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Never blocks; with no subscribers the event is simply dropped.
    pub fn publish(&self, event: FrameEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FrameEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// True if `data` is a whole encoded image: PNG through its IEND chunk,
/// JPEG through its EOI marker, or any other format `image` recognizes.
pub fn is_complete_image(data: &[u8]) -> bool {
    if data.starts_with(PNG_SIGNATURE) {
        return data.ends_with(PNG_IEND);
    }
    if data.starts_with(JPEG_SOI) {
        return data.len() > 4 && data.ends_with(JPEG_EOI);
    }
    image::guess_format(data).is_ok()
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
