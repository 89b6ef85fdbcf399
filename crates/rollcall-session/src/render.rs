//! Overlay rendering and frame sinks.

use ab_glyph::{FontRef, InvalidFont, PxScale};
use anyhow::Context;
use image::{GrayImage, Luma};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use rollcall_core::BoundingBox;
use rollcall_hw::Frame;
use std::path::PathBuf;
use std::time::{Duration, Instant};

const FONT_DATA: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

const BOX_THICKNESS: i32 = 2;
const INK: Luma<u8> = Luma([255]);
const LABEL_SCALE: f32 = 16.0;
/// Pixels between the label baseline area and the top of the box.
const LABEL_GAP: i32 = 2;

/// Minimum spacing between snapshot writes.
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

/// A labelled box for one recognized face.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub face: BoundingBox,
    pub label: String,
}

/// Receives every processed frame together with the overlays to show on it.
pub trait FrameSink {
    fn present(&mut self, frame: &Frame, overlays: &[Overlay]) -> anyhow::Result<()>;
}

/// Draws face boxes and their labels onto copies of frames.
pub struct Painter {
    font: FontRef<'static>,
}

impl Painter {
    pub fn new() -> Result<Self, InvalidFont> {
        Ok(Self {
            font: FontRef::try_from_slice(FONT_DATA)?,
        })
    }

    /// Copy of the frame with each overlay's box and label drawn in.
    pub fn annotate(&self, frame: &Frame, overlays: &[Overlay]) -> anyhow::Result<GrayImage> {
        let mut image = GrayImage::from_raw(frame.width, frame.height, frame.data.clone())
            .context("frame buffer does not match its dimensions")?;

        for overlay in overlays {
            let b = &overlay.face;
            let (x, y) = (b.x.round() as i32, b.y.round() as i32);
            let (w, h) = (b.width.round() as i32, b.height.round() as i32);

            for t in 0..BOX_THICKNESS {
                let (inner_w, inner_h) = (w - 2 * t, h - 2 * t);
                if inner_w <= 0 || inner_h <= 0 {
                    break;
                }
                let rect = Rect::at(x + t, y + t).of_size(inner_w as u32, inner_h as u32);
                draw_hollow_rect_mut(&mut image, rect, INK);
            }

            let label_y = (y - LABEL_SCALE as i32 - LABEL_GAP).max(0);
            draw_text_mut(
                &mut image,
                INK,
                x.max(0),
                label_y,
                PxScale::from(LABEL_SCALE),
                &self.font,
                &overlay.label,
            );
        }

        Ok(image)
    }
}

/// Emits one tracing event per overlay.
#[derive(Debug, Default)]
pub struct LogSink;

impl FrameSink for LogSink {
    fn present(&mut self, frame: &Frame, overlays: &[Overlay]) -> anyhow::Result<()> {
        for overlay in overlays {
            tracing::info!(
                sequence = frame.sequence,
                label = %overlay.label,
                x = overlay.face.x,
                y = overlay.face.y,
                width = overlay.face.width,
                height = overlay.face.height,
                "face on screen"
            );
        }
        Ok(())
    }
}

/// Periodically writes the annotated frame to a PNG file.
pub struct SnapshotSink {
    path: PathBuf,
    painter: Painter,
    interval: Duration,
    last_written: Option<Instant>,
}

impl SnapshotSink {
    pub fn new(path: PathBuf) -> Result<Self, InvalidFont> {
        Ok(Self {
            path,
            painter: Painter::new()?,
            interval: SNAPSHOT_INTERVAL,
            last_written: None,
        })
    }

    fn due(&self, at: Instant) -> bool {
        self.last_written
            .map_or(true, |last| at.saturating_duration_since(last) >= self.interval)
    }
}

impl FrameSink for SnapshotSink {
    fn present(&mut self, frame: &Frame, overlays: &[Overlay]) -> anyhow::Result<()> {
        if !self.due(frame.timestamp) {
            return Ok(());
        }

        self.painter
            .annotate(frame, overlays)?
            .save_with_format(&self.path, image::ImageFormat::Png)
            .with_context(|| format!("writing snapshot {}", self.path.display()))?;

        self.last_written = Some(frame.timestamp);
        tracing::trace!(path = %self.path.display(), "snapshot written");
        Ok(())
    }
}

/// Fans a frame out to several sinks. A failing sink does not stop the others.
#[derive(Default)]
pub struct Sinks(Vec<Box<dyn FrameSink + Send>>);

impl Sinks {
    pub fn push(&mut self, sink: impl FrameSink + Send + 'static) {
        self.0.push(Box::new(sink));
    }
}

impl FrameSink for Sinks {
    fn present(&mut self, frame: &Frame, overlays: &[Overlay]) -> anyhow::Result<()> {
        let mut first_err = None;
        for sink in &mut self.0 {
            if let Err(e) = sink.present(frame, overlays) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32, value: u8) -> Frame {
        Frame::from_luma(vec![value; (width * height) as usize], width, height, 0)
    }

    fn overlay(x: f32, y: f32, w: f32, h: f32, label: &str) -> Overlay {
        Overlay {
            face: BoundingBox {
                x,
                y,
                width: w,
                height: h,
                confidence: 1.0,
                landmarks: None,
            },
            label: label.into(),
        }
    }

    #[test]
    fn test_annotate_draws_box_on_copy() {
        let painter = Painter::new().unwrap();
        let f = frame(64, 64, 50);
        let out = painter
            .annotate(&f, &[overlay(20.0, 30.0, 20.0, 20.0, "A")])
            .unwrap();

        assert_eq!(out.get_pixel(20, 30).0[0], 255);
        assert_eq!(out.get_pixel(21, 31).0[0], 255);
        assert_eq!(out.get_pixel(39, 49).0[0], 255);
        // Interior untouched.
        assert_eq!(out.get_pixel(30, 40).0[0], 50);
        assert!(f.data.iter().all(|&p| p == 50));
    }

    #[test]
    fn test_label_is_drawn_above_box() {
        let painter = Painter::new().unwrap();
        let f = frame(160, 120, 0);
        let face = (40.0, 60.0, 60.0, 40.0);

        let alice = painter
            .annotate(&f, &[overlay(face.0, face.1, face.2, face.3, "101 - Alice")])
            .unwrap();
        let zed = painter
            .annotate(&f, &[overlay(face.0, face.1, face.2, face.3, "999 - Zed")])
            .unwrap();

        assert_ne!(alice.as_raw(), zed.as_raw());

        let inked_above_box = (0..58u32)
            .flat_map(|y| (0..160u32).map(move |x| (x, y)))
            .any(|(x, y)| alice.get_pixel(x, y).0[0] > 0);
        assert!(inked_above_box);
    }

    #[test]
    fn test_annotate_without_overlays_is_identity() {
        let painter = Painter::new().unwrap();
        let f = frame(4, 4, 80);
        assert_eq!(painter.annotate(&f, &[]).unwrap().into_raw(), f.data);
    }

    #[test]
    fn test_annotate_clips_box_outside_frame() {
        let painter = Painter::new().unwrap();
        let f = frame(16, 16, 10);
        let out = painter
            .annotate(&f, &[overlay(-4.0, -4.0, 30.0, 30.0, "x")])
            .unwrap();
        assert_eq!(out.dimensions(), (16, 16));
    }

    #[test]
    fn test_snapshot_throttled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.png");
        let mut sink = SnapshotSink::new(path.clone()).unwrap();

        let first = frame(32, 32, 120);
        sink.present(&first, &[overlay(8.0, 20.0, 8.0, 8.0, "101 - Alice")])
            .unwrap();
        let written = image::open(&path).unwrap().to_luma8();
        assert_eq!(written.dimensions(), (32, 32));
        assert_eq!(written.get_pixel(8, 20).0[0], 255);

        std::fs::remove_file(&path).unwrap();
        let mut soon = frame(32, 32, 120);
        soon.timestamp = first.timestamp + Duration::from_millis(500);
        sink.present(&soon, &[]).unwrap();
        assert!(!path.exists());

        let mut later = frame(32, 32, 120);
        later.timestamp = first.timestamp + Duration::from_millis(1500);
        sink.present(&later, &[]).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_sinks_reports_failure_but_runs_all() {
        struct Failing;
        impl FrameSink for Failing {
            fn present(&mut self, _: &Frame, _: &[Overlay]) -> anyhow::Result<()> {
                anyhow::bail!("sink down")
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.png");
        let mut sinks = Sinks::default();
        sinks.push(Failing);
        sinks.push(LogSink);
        sinks.push(SnapshotSink::new(path.clone()).unwrap());

        assert!(sinks.present(&frame(4, 4, 90), &[]).is_err());
        assert!(path.exists());
    }
}
