use anyhow::{Context, Result};
use image::RgbImage;
use std::path::Path;

use crate::landmarks::LandmarkSet;

/// Landmark detector seam. The model itself lives outside this crate.
///
/// `Ok(None)` means the frame was processed and holds no face; `Err` means
/// the detector could not process the frame at all.
pub trait Detector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Option<LandmarkSet>>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, frame: &RgbImage) -> Result<Option<LandmarkSet>> {
        (**self).detect(frame)
    }
}

/// Map a detection from frame pixels into display pixels.
pub fn resize_to_display(detection: &LandmarkSet, frame: (u32, u32), display: (u32, u32)) -> LandmarkSet {
    if frame == display || frame.0 == 0 || frame.1 == 0 {
        return detection.clone();
    }
    let sx = display.0 as f32 / frame.0 as f32;
    let sy = display.1 as f32 / frame.1 as f32;
    detection.scaled(sx, sy)
}

/// Replays a recorded detection feed, one entry per call, wrapping around.
pub struct ReplayDetector {
    feed: Vec<Option<LandmarkSet>>,
    cursor: usize,
}

impl ReplayDetector {
    pub fn new(feed: Vec<Option<LandmarkSet>>) -> Self {
        Self { feed, cursor: 0 }
    }

    /// JSON lines; each line is a landmark set or `null`. Blank lines are skipped.
    pub fn from_json_lines(raw: &str) -> Result<Self> {
        let feed = raw
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str::<Option<LandmarkSet>>(line)
                    .with_context(|| format!("parsing detection on line {}", n + 1))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(feed))
    }

    pub fn open(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading detections at {}", path.display()))?;
        Self::from_json_lines(&raw)
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, _frame: &RgbImage) -> Result<Option<LandmarkSet>> {
        if self.feed.is_empty() {
            anyhow::bail!("detection feed is empty");
        }
        let detection = self.feed[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.feed.len();
        Ok(detection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{BoundingBox, Point};

    fn sample() -> LandmarkSet {
        let bbox = BoundingBox {
            x: 10.0,
            y: 10.0,
            width: 64.0,
            height: 48.0,
        };
        LandmarkSet::new(vec![Point::new(32.0, 24.0); 68], 0.8, bbox).unwrap()
    }

    #[test]
    fn test_resize_to_display() {
        let resized = resize_to_display(&sample(), (640, 480), (320, 480));
        assert_eq!(resized.point(0), Point::new(16.0, 24.0));
        assert_eq!(resized.bbox().width, 32.0);
        assert_eq!(resized.bbox().height, 48.0);

        let same = resize_to_display(&sample(), (640, 480), (640, 480));
        assert_eq!(same, sample());
    }

    #[test]
    fn test_replay_wraps() -> Result<()> {
        let line = serde_json::to_string(&sample())?;
        let feed = format!("{}\nnull\n\n", line);
        let mut detector = ReplayDetector::from_json_lines(&feed)?;
        let frame = RgbImage::new(4, 4);

        assert!(detector.detect(&frame)?.is_some());
        assert!(detector.detect(&frame)?.is_none());
        assert!(detector.detect(&frame)?.is_some());
        Ok(())
    }

    #[test]
    fn test_replay_empty_feed_errors() {
        let mut detector = ReplayDetector::new(vec![]);
        assert!(detector.detect(&RgbImage::new(1, 1)).is_err());
    }
}
