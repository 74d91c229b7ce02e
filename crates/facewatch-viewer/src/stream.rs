//! Annotated frames as JPEGs, fanned out to any number of MJPEG clients.
//!
//! The pump thread encodes each frame once and replaces the value in a
//! `watch` channel. Every client streams from its own receiver, so a slow
//! client simply skips to the newest frame.

use bytes::{BufMut, Bytes, BytesMut};
use facewatch_engine::{FrameSink, LoopStatus};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::convert::Infallible;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};

pub const BOUNDARY: &str = "frame";
pub const JPEG_QUALITY: u8 = 80;

pub struct MjpegBroadcaster {
    frames: watch::Sender<Option<Bytes>>,
    quality: u8,
}

impl MjpegBroadcaster {
    pub fn new(quality: u8) -> Self {
        let (frames, _) = watch::channel(None);
        Self { frames, quality }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Bytes>> {
        self.frames.subscribe()
    }
}

impl FrameSink for MjpegBroadcaster {
    fn publish(&self, frame: &RgbImage) {
        match encode_jpeg(frame, self.quality) {
            Ok(jpeg) => {
                self.frames.send_replace(Some(jpeg));
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode frame"),
        }
    }

    fn status_changed(&self, status: &LoopStatus) {
        if let LoopStatus::Failed { reason } = status {
            // no stale frame for clients that connect after the outage
            self.frames.send_replace(None);
            tracing::warn!(%reason, "live feed stopped");
        }
    }
}

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> image::ImageResult<Bytes> {
    let mut buf = Vec::with_capacity(frame.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(frame)?;
    Ok(Bytes::from(buf))
}

/// One `multipart/x-mixed-replace` part wrapping a JPEG.
pub fn part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut out = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    out.put_slice(header.as_bytes());
    out.put_slice(jpeg);
    out.put_slice(b"\r\n");
    out.freeze()
}

/// Body stream for one client: the current frame (if any), then every change.
pub fn mjpeg_stream(
    frames: watch::Receiver<Option<Bytes>>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    WatchStream::new(frames).filter_map(|frame| frame.map(|jpeg| Ok(part(&jpeg))))
}
