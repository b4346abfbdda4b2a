use image::RgbImage;

use crate::detector::{resize_to_display, Detector};
use crate::landmarks::{DeviceClass, LandmarkSet, TargetArea};
use crate::validator::{self, Verdict};

/// Where a frame is shown and what it is checked against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Displayed size of the frame, in the same space as `area`.
    pub display: (u32, u32),
    pub area: TargetArea,
    pub device: DeviceClass,
}

impl Viewport {
    /// Display equal to the frame, guide box of `w_frac` x `h_frac` centered.
    pub fn centered(display: (u32, u32), w_frac: f32, h_frac: f32) -> Self {
        Self {
            display,
            area: TargetArea::centered(display, w_frac, h_frac),
            device: DeviceClass::from_viewport_width(display.0),
        }
    }
}

/// Detect on a frame and map the result into display space.
///
/// A detector failure is reported as "no detection" for this frame only.
pub fn detect_for_display<D: Detector + ?Sized>(
    detector: &mut D,
    frame: &RgbImage,
    display: (u32, u32),
) -> Option<LandmarkSet> {
    match detector.detect(frame) {
        Ok(detection) => detection.map(|d| resize_to_display(&d, frame.dimensions(), display)),
        Err(e) => {
            log::warn!("detector failed, treating frame as empty: {:#}", e);
            None
        }
    }
}

/// Full pipeline: detect → resize → validate
pub fn assess<D: Detector + ?Sized>(detector: &mut D, frame: &RgbImage, viewport: &Viewport) -> Verdict {
    assess_detection(detector, frame, viewport).0
}

/// Like [`assess`], also returning the display-space detection the verdict was computed from.
pub fn assess_detection<D: Detector + ?Sized>(
    detector: &mut D,
    frame: &RgbImage,
    viewport: &Viewport,
) -> (Verdict, Option<LandmarkSet>) {
    let detection = detect_for_display(detector, frame, viewport.display);
    let verdict = validator::validate(detection.as_ref(), &viewport.area, viewport.device);
    log::debug!(
        "frame {}x{}: score {:?} → {:?}",
        frame.width(),
        frame.height(),
        detection.as_ref().map(|d| d.score()),
        verdict
    );
    (verdict, detection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::BoundingBox;
    use anyhow::Result;

    struct Failing;

    impl Detector for Failing {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Option<LandmarkSet>> {
            anyhow::bail!("model not loaded")
        }
    }

    struct Fixed(LandmarkSet);

    impl Detector for Fixed {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Option<LandmarkSet>> {
            Ok(Some(self.0.clone()))
        }
    }

    #[test]
    fn test_detector_error_is_no_face() {
        let viewport = Viewport::centered((640, 480), 0.5, 0.9);
        let frame = RgbImage::new(640, 480);
        assert_eq!(assess(&mut Failing, &frame, &viewport), Verdict::NoFace);
    }

    #[test]
    fn test_detection_is_scaled_before_validation() {
        // A box that fills the guide at frame resolution is too small once
        // the frame is shown at a third of the guide's scale.
        let bbox = BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 60.0,
            height: 60.0,
        };
        let set = LandmarkSet::new(vec![crate::landmarks::Point::new(0.0, 0.0); 68], 0.9, bbox).unwrap();
        let viewport = Viewport {
            display: (600, 600),
            area: TargetArea::from_offsets(0.0, 0.0, 600.0, 600.0),
            device: DeviceClass::Desktop,
        };
        let frame = RgbImage::new(200, 200);
        let detection = detect_for_display(&mut Fixed(set.clone()), &frame, viewport.display).unwrap();
        assert_eq!(detection.bbox().height, 180.0);
        assert_eq!(assess(&mut Fixed(set), &frame, &viewport), Verdict::TooFar);
    }
}
