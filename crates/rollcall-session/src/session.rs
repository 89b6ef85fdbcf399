//! The live recognition loop.
//!
//! Each frame goes capture → locate → match → record → render. The loop is
//! blocking and single-threaded; it polls a quit flag once per frame and
//! writes the attendance export when it stops, whatever the reason.

use crate::render::{FrameSink, Overlay};
use chrono::{Local, NaiveDateTime};
use rollcall_core::tracker::ExportError;
use rollcall_core::{
    identify_faces, AttendanceSheet, AttendanceTracker, EuclideanMatcher, FaceEncoder,
    FaceLocator, Gallery, Matcher,
};
use rollcall_hw::{Frame, FrameSource};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    QuitSignal,
    CaptureFailed(String),
    TimeLimit,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub threshold: f32,
    pub display_time: Duration,
    pub output: PathBuf,
    pub max_duration: Option<Duration>,
}

#[derive(Debug)]
pub struct SessionSummary {
    pub reason: ShutdownReason,
    pub frames: u64,
    pub attendance: AttendanceSheet,
    /// Outcome of writing the export file. The sheet above is kept either way.
    pub export: Result<(), ExportError>,
}

/// State owned by one recognition session.
pub struct Session<M: Matcher = EuclideanMatcher> {
    gallery: Gallery,
    tracker: AttendanceTracker,
    matcher: M,
    settings: SessionSettings,
}

impl Session<EuclideanMatcher> {
    pub fn new(gallery: Gallery, settings: SessionSettings) -> Self {
        Self::with_matcher(gallery, settings, EuclideanMatcher)
    }
}

impl<M: Matcher> Session<M> {
    pub fn with_matcher(gallery: Gallery, settings: SessionSettings, matcher: M) -> Self {
        Self {
            gallery,
            tracker: AttendanceTracker::new(settings.display_time),
            matcher,
            settings,
        }
    }

    pub fn tracker(&self) -> &AttendanceTracker {
        &self.tracker
    }

    /// Identify the faces in one frame, update attendance, and return the
    /// overlays still inside their display window.
    ///
    /// Dark frames are treated as empty. A locator failure is logged and the
    /// frame skipped.
    pub fn process_frame<L, E>(
        &mut self,
        frame: &Frame,
        locator: &mut L,
        encoder: &mut E,
        seen_at: NaiveDateTime,
    ) -> Vec<Overlay>
    where
        L: FaceLocator + ?Sized,
        E: FaceEncoder + ?Sized,
    {
        if frame.is_dark {
            tracing::trace!(sequence = frame.sequence, "dark frame");
            return Vec::new();
        }

        let matches = match identify_faces(
            &frame.data,
            frame.width,
            frame.height,
            locator,
            encoder,
            &self.matcher,
            self.gallery.references(),
            self.settings.threshold,
        ) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(
                    sequence = frame.sequence,
                    error = %e,
                    "face location failed, frame skipped"
                );
                return Vec::new();
            }
        };

        let mut overlays = Vec::new();
        for m in matches {
            let Some(identity) = m.result.identity.as_ref() else {
                continue;
            };
            self.tracker.record_if_new(identity, seen_at);
            self.tracker.mark_displayed(identity, frame.timestamp);
            if self.tracker.is_within_display_window(identity, frame.timestamp) {
                overlays.push(Overlay {
                    label: m.result.label(),
                    face: m.face,
                });
            }
        }
        overlays
    }

    /// Run until `quit` is raised, capture fails or the time limit passes,
    /// then write the attendance export.
    ///
    /// A failed export is reported in the summary, which still carries the
    /// collected attendance.
    pub fn run<S, L, E>(
        &mut self,
        source: &mut S,
        locator: &mut L,
        encoder: &mut E,
        sink: &mut dyn FrameSink,
        quit: &AtomicBool,
    ) -> SessionSummary
    where
        S: FrameSource + ?Sized,
        L: FaceLocator + ?Sized,
        E: FaceEncoder + ?Sized,
    {
        let started = Instant::now();
        let mut frames = 0u64;

        tracing::info!(
            identities = self.gallery.len(),
            threshold = self.settings.threshold,
            "session started"
        );

        let reason = loop {
            if quit.load(Ordering::Relaxed) {
                break ShutdownReason::QuitSignal;
            }
            if self
                .settings
                .max_duration
                .is_some_and(|limit| started.elapsed() >= limit)
            {
                break ShutdownReason::TimeLimit;
            }

            let frame = match source.next_frame() {
                Ok(f) => f,
                Err(e) => {
                    tracing::error!(error = %e, "capture failed");
                    break ShutdownReason::CaptureFailed(e.to_string());
                }
            };
            frames += 1;

            let seen_at = Local::now().naive_local();
            let overlays = self.process_frame(&frame, locator, encoder, seen_at);
            if let Err(e) = sink.present(&frame, &overlays) {
                tracing::warn!(error = %e, "frame sink failed");
            }
        };

        let export = self.tracker.write_json(&self.settings.output);
        match &export {
            Ok(()) => tracing::info!(
                reason = ?reason,
                frames,
                present = self.tracker.len(),
                output = %self.settings.output.display(),
                "session ended, attendance written"
            ),
            Err(e) => tracing::error!(
                reason = ?reason,
                frames,
                error = %e,
                attendance = ?self.tracker.attendance(),
                "session ended, attendance export failed"
            ),
        }

        SessionSummary {
            reason,
            frames,
            attendance: self.tracker.attendance().clone(),
            export,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::LogSink;
    use chrono::NaiveDate;
    use image::{GrayImage, Luma};
    use rollcall_core::detector::DetectorError;
    use rollcall_core::recognizer::RecognizerError;
    use rollcall_core::tracker::read_sheet;
    use rollcall_core::{BoundingBox, Embedding, Identity, ReferenceIdentity};
    use rollcall_hw::CameraError;
    use std::collections::VecDeque;
    use std::path::Path;

    /// Any frame with a bright pixel holds one face covering the frame.
    struct WholeFrameLocator;

    impl FaceLocator for WholeFrameLocator {
        fn locate(
            &mut self,
            frame: &[u8],
            width: u32,
            height: u32,
        ) -> Result<Vec<BoundingBox>, DetectorError> {
            if frame.iter().all(|&p| p < 32) {
                return Ok(Vec::new());
            }
            Ok(vec![BoundingBox {
                x: 0.0,
                y: 0.0,
                width: width as f32,
                height: height as f32,
                confidence: 0.9,
                landmarks: None,
            }])
        }
    }

    struct FailingLocator;

    impl FaceLocator for FailingLocator {
        fn locate(
            &mut self,
            _: &[u8],
            _: u32,
            _: u32,
        ) -> Result<Vec<BoundingBox>, DetectorError> {
            Err(DetectorError::InferenceFailed("boom".into()))
        }
    }

    /// Embeds a face as a tenth of its mean brightness, so distinct
    /// brightness levels land far apart.
    struct BrightnessEncoder;

    impl FaceEncoder for BrightnessEncoder {
        fn encode(
            &mut self,
            frame: &[u8],
            _width: u32,
            _height: u32,
            _face: &BoundingBox,
        ) -> Result<Embedding, RecognizerError> {
            let mean = frame.iter().map(|&p| p as f32).sum::<f32>() / frame.len() as f32;
            Ok(Embedding::new(vec![mean / 10.0, 0.0]))
        }
    }

    /// Replays queued frames, then reports the device as gone.
    struct ScriptedSource(VecDeque<Frame>);

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            self.0
                .pop_front()
                .ok_or_else(|| CameraError::CaptureFailed("device disconnected".into()))
        }
    }

    #[derive(Default)]
    struct RecordingSink(Vec<Vec<String>>);

    impl FrameSink for RecordingSink {
        fn present(&mut self, _: &Frame, overlays: &[Overlay]) -> anyhow::Result<()> {
            self.0.push(overlays.iter().map(|o| o.label.clone()).collect());
            Ok(())
        }
    }

    fn frame(value: u8) -> Frame {
        Frame::from_luma(vec![value; 64], 8, 8, 0)
    }

    fn settings(output: &Path) -> SessionSettings {
        SessionSettings {
            threshold: rollcall_core::DEFAULT_MATCH_THRESHOLD,
            display_time: Duration::from_secs(10),
            output: output.to_path_buf(),
            max_duration: None,
        }
    }

    fn alice_gallery() -> Gallery {
        Gallery::new(vec![ReferenceIdentity {
            identity: Identity::new("101", "Alice"),
            embedding: Embedding::new(vec![20.0, 0.0]),
            samples: 2,
        }])
    }

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn process(session: &mut Session, frame: &Frame, seen_at: NaiveDateTime) -> Vec<Overlay> {
        session.process_frame(frame, &mut WholeFrameLocator, &mut BrightnessEncoder, seen_at)
    }

    fn run(
        session: &mut Session,
        frames: Vec<Frame>,
        sink: &mut dyn FrameSink,
        quit: bool,
    ) -> SessionSummary {
        let mut source = ScriptedSource(VecDeque::from(frames));
        session.run(
            &mut source,
            &mut WholeFrameLocator,
            &mut BrightnessEncoder,
            sink,
            &AtomicBool::new(quit),
        )
    }

    #[test]
    fn test_recognized_face_recorded_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(alice_gallery(), settings(&dir.path().join("out.json")));

        let overlays = process(&mut session, &frame(200), ts(9, 0, 0));
        assert_eq!(overlays.len(), 1);
        assert_eq!(overlays[0].label, "101 - Alice");

        process(&mut session, &frame(200), ts(9, 5, 0));
        let sheet = session.tracker().attendance();
        assert_eq!(sheet.len(), 1);
        assert_eq!(sheet["101"].time, "2024-03-07 09:00:00");
    }

    #[test]
    fn test_unknown_face_has_no_effect() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(alice_gallery(), settings(&dir.path().join("out.json")));

        assert!(process(&mut session, &frame(100), ts(9, 0, 0)).is_empty());
        assert!(session.tracker().is_empty());
    }

    #[test]
    fn test_dark_frame_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(alice_gallery(), settings(&dir.path().join("out.json")));

        let mut dark = frame(200);
        dark.is_dark = true;
        assert!(process(&mut session, &dark, ts(9, 0, 0)).is_empty());
        assert!(session.tracker().is_empty());
    }

    #[test]
    fn test_locator_failure_skips_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(alice_gallery(), settings(&dir.path().join("out.json")));
        let overlays = session.process_frame(
            &frame(200),
            &mut FailingLocator,
            &mut BrightnessEncoder,
            ts(9, 0, 0),
        );
        assert!(overlays.is_empty());
    }

    #[test]
    fn test_overlay_expires_after_display_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(alice_gallery(), settings(&dir.path().join("out.json")));

        let first = frame(200);
        assert_eq!(process(&mut session, &first, ts(9, 0, 0)).len(), 1);

        let mut within = frame(200);
        within.timestamp = first.timestamp + Duration::from_secs(9);
        assert_eq!(process(&mut session, &within, ts(9, 0, 9)).len(), 1);

        let mut after = frame(200);
        after.timestamp = first.timestamp + Duration::from_secs(11);
        assert!(process(&mut session, &after, ts(9, 0, 11)).is_empty());
        // Attendance is unaffected by the overlay expiring.
        assert_eq!(session.tracker().len(), 1);
    }

    #[test]
    fn test_run_stops_on_capture_failure_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("attendance.json");
        let mut session = Session::new(alice_gallery(), settings(&output));
        let mut sink = RecordingSink::default();

        let summary = run(&mut session, vec![frame(0), frame(100), frame(200)], &mut sink, false);

        assert_eq!(
            summary.reason,
            ShutdownReason::CaptureFailed("capture failed: device disconnected".into())
        );
        assert_eq!(summary.frames, 3);
        assert!(summary.export.is_ok());
        assert_eq!(sink.0, vec![vec![], vec![], vec!["101 - Alice".to_string()]]);

        let exported = read_sheet(&output).unwrap();
        assert_eq!(exported, summary.attendance);
        assert_eq!(exported["101"].name, "Alice");
    }

    #[test]
    fn test_failed_export_keeps_attendance() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be overwritten with the export file.
        let mut session = Session::new(alice_gallery(), settings(dir.path()));

        let summary = run(&mut session, vec![frame(200)], &mut LogSink, false);

        assert!(matches!(summary.export, Err(ExportError::Io { .. })));
        assert_eq!(summary.attendance.len(), 1);
        assert_eq!(summary.attendance["101"].name, "Alice");
    }

    #[test]
    fn test_run_honors_quit_flag() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("attendance.json");
        let mut session = Session::new(alice_gallery(), settings(&output));

        let summary = run(&mut session, vec![frame(200)], &mut LogSink, true);

        assert_eq!(summary.reason, ShutdownReason::QuitSignal);
        assert_eq!(summary.frames, 0);
        // An empty session still writes an (empty) export.
        assert_eq!(std::fs::read_to_string(&output).unwrap().trim(), "{}");
    }

    #[test]
    fn test_run_honors_time_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut limited = settings(&dir.path().join("attendance.json"));
        limited.max_duration = Some(Duration::ZERO);
        let mut session = Session::new(alice_gallery(), limited);

        let summary = run(&mut session, vec![frame(200)], &mut LogSink, false);
        assert_eq!(summary.reason, ShutdownReason::TimeLimit);
    }

    #[test]
    fn test_end_to_end_from_reference_folder() {
        let root = tempfile::tempdir().unwrap();
        let students = root.path().join("students");
        let alice = students.join("101_Alice");
        std::fs::create_dir_all(&alice).unwrap();
        for (name, value) in [("front.png", 190u8), ("side.jpg", 210u8)] {
            GrayImage::from_pixel(8, 8, Luma([value]))
                .save(alice.join(name))
                .unwrap();
        }

        let gallery =
            Gallery::load(&students, &mut WholeFrameLocator, &mut BrightnessEncoder).unwrap();
        assert_eq!(gallery.len(), 1);

        let output = root.path().join("attendance.json");
        let mut session = Session::new(gallery, settings(&output));
        let mut sink = RecordingSink::default();

        let summary = run(&mut session, vec![frame(200)], &mut sink, false);
        assert!(summary.export.is_ok());
        assert_eq!(sink.0, vec![vec!["101 - Alice".to_string()]]);

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        let entries = json.as_object().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(json["101"]["name"], "Alice");
        let time = json["101"]["time"].as_str().unwrap();
        assert!(NaiveDateTime::parse_from_str(time, "%Y-%m-%d %H:%M:%S").is_ok());
    }
}
