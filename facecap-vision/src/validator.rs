//! Alignment check for a single detection against the on-screen guide.
//!
//! The thresholds below were tuned by hand against real captures and are kept
//! as fixed constants. A verdict is a pure function of the landmarks, the
//! guide rectangle and the device class.

use serde::{Deserialize, Serialize};

use crate::landmarks::{DeviceClass, LandmarkSet, TargetArea, CHIN, JAW_LEFT, JAW_RIGHT, LEFT_EYE_OUTER};

pub const MIN_SCORE: f32 = 0.50;

pub const MIN_HEIGHT_FRACTION_MOBILE: f32 = 0.40;
pub const MIN_HEIGHT_FRACTION_DESKTOP: f32 = 0.50;

pub const MARGIN_MOBILE: f32 = 15.0;
pub const MARGIN_DESKTOP: f32 = 50.0;

/// Inclusive.
pub const EYE_TO_JAW_BAND: (f32, f32) = (0.175, 0.23);
/// Exclusive.
pub const ROTATION_BAND: (f32, f32) = (-0.06, 0.06);
/// Inclusive, applies to both sides.
pub const SYMMETRY_BAND: (f32, f32) = (0.64, 0.80);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    NoFace,
    NotCentered,
    TooFar,
    Tilted,
    Valid,
}

impl Verdict {
    pub fn is_valid(self) -> bool {
        matches!(self, Verdict::Valid)
    }

    /// Short user-facing hint for the verdict.
    pub fn hint(self) -> &'static str {
        match self {
            Verdict::NoFace => "no face detected",
            Verdict::NotCentered => "move your face inside the frame",
            Verdict::TooFar => "move closer to the camera",
            Verdict::Tilted => "look straight at the camera",
            Verdict::Valid => "hold still",
        }
    }
}

impl DeviceClass {
    fn min_height_fraction(self) -> f32 {
        match self {
            DeviceClass::Mobile => MIN_HEIGHT_FRACTION_MOBILE,
            DeviceClass::Desktop => MIN_HEIGHT_FRACTION_DESKTOP,
        }
    }

    fn margin(self) -> f32 {
        match self {
            DeviceClass::Mobile => MARGIN_MOBILE,
            DeviceClass::Desktop => MARGIN_DESKTOP,
        }
    }
}

/// Pose proxies derived from the jaw line, chin and left eye corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceRatios {
    /// Horizontal distance jaw-left → outer left eye corner over jaw width.
    pub eye_to_jaw: f32,
    /// Vertical offset between both jaw ends over jaw width.
    pub rotation: f32,
    /// Chin height below the left jaw end over face box height.
    pub symmetry_left: f32,
    /// Chin height below the right jaw end over face box height.
    pub symmetry_right: f32,
}

impl FaceRatios {
    pub fn measure(landmarks: &LandmarkSet) -> Self {
        let jaw_left = landmarks.point(JAW_LEFT);
        let jaw_right = landmarks.point(JAW_RIGHT);
        let chin = landmarks.point(CHIN);
        let eye = landmarks.point(LEFT_EYE_OUTER);
        let span = jaw_right.x - jaw_left.x;
        let height = landmarks.bbox().height;

        Self {
            eye_to_jaw: (eye.x - jaw_left.x) / span,
            rotation: (jaw_left.y - jaw_right.y) / span,
            symmetry_left: (chin.y - jaw_left.y) / height,
            symmetry_right: (chin.y - jaw_right.y) / height,
        }
    }

    /// NaN (zero-width jaw, zero-height box) fails every comparison.
    pub fn within_bands(&self) -> bool {
        let inclusive = |v: f32, (lo, hi): (f32, f32)| v >= lo && v <= hi;
        let exclusive = |v: f32, (lo, hi): (f32, f32)| v > lo && v < hi;

        inclusive(self.eye_to_jaw, EYE_TO_JAW_BAND)
            && exclusive(self.rotation, ROTATION_BAND)
            && inclusive(self.symmetry_left, SYMMETRY_BAND)
            && inclusive(self.symmetry_right, SYMMETRY_BAND)
    }
}

/// Classify one detection. `landmarks` must already be in the coordinate
/// space of `area` (see [`crate::detector::resize_to_display`]).
pub fn validate(landmarks: Option<&LandmarkSet>, area: &TargetArea, device: DeviceClass) -> Verdict {
    let landmarks = match landmarks {
        Some(l) if l.score() >= MIN_SCORE => l,
        _ => return Verdict::NoFace,
    };

    let spot = landmarks.bbox();
    if spot.height < area.height() * device.min_height_fraction() {
        return Verdict::TooFar;
    }

    // The margin shifts the vertical window down; horizontal bounds are strict.
    let margin = device.margin();
    let inside = spot.left() >= area.left
        && spot.right() <= area.right
        && spot.top() >= area.top + margin
        && spot.bottom() <= area.bottom + margin;
    if !inside {
        return Verdict::NotCentered;
    }

    if FaceRatios::measure(landmarks).within_bands() {
        Verdict::Valid
    } else {
        Verdict::Tilted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{BoundingBox, Point};

    fn face(bbox: BoundingBox, score: f32) -> LandmarkSet {
        let mut points = vec![Point::new(bbox.x + bbox.width / 2.0, bbox.y + bbox.height / 2.0); 68];
        let span = bbox.width * 0.9;
        let x0 = bbox.x + bbox.width * 0.05;
        let chin_y = bbox.y + bbox.height * 0.95;
        let jaw_y = chin_y - 0.7 * bbox.height;
        points[JAW_LEFT] = Point::new(x0, jaw_y);
        points[JAW_RIGHT] = Point::new(x0 + span, jaw_y);
        points[CHIN] = Point::new(x0 + span / 2.0, chin_y);
        points[LEFT_EYE_OUTER] = Point::new(x0 + 0.2 * span, jaw_y - 10.0);
        LandmarkSet::new(points, score, bbox).unwrap()
    }

    fn area() -> TargetArea {
        TargetArea::from_offsets(100.0, 0.0, 400.0, 400.0)
    }

    fn centered_box(height: f32) -> BoundingBox {
        BoundingBox {
            x: 200.0,
            y: 100.0,
            width: height,
            height,
        }
    }

    #[test]
    fn test_low_score_is_no_face() {
        let set = face(centered_box(240.0), 0.49);
        assert_eq!(validate(Some(&set), &area(), DeviceClass::Desktop), Verdict::NoFace);
        assert_eq!(validate(None, &area(), DeviceClass::Desktop), Verdict::NoFace);
    }

    #[test]
    fn test_valid_frontal_face() {
        let set = face(centered_box(240.0), 0.9);
        let ratios = FaceRatios::measure(&set);
        assert!((ratios.eye_to_jaw - 0.2).abs() < 1e-4);
        assert!(ratios.rotation.abs() < 1e-4);
        assert!((ratios.symmetry_left - 0.7).abs() < 1e-4);
        assert_eq!(validate(Some(&set), &area(), DeviceClass::Desktop), Verdict::Valid);
    }

    #[test]
    fn test_distance_threshold_depends_on_device() {
        // 180 / 400 = 45%: too small on desktop, fine on mobile.
        let set = face(centered_box(180.0), 0.9);
        assert_eq!(validate(Some(&set), &area(), DeviceClass::Desktop), Verdict::TooFar);
        assert_eq!(validate(Some(&set), &area(), DeviceClass::Mobile), Verdict::Valid);
    }

    #[test]
    fn test_vertical_margin_is_asymmetric() {
        // Top at 30: inside the mobile margin (15) but not the desktop one (50).
        let bbox = BoundingBox {
            x: 200.0,
            y: 30.0,
            width: 240.0,
            height: 240.0,
        };
        let set = face(bbox, 0.9);
        assert_eq!(validate(Some(&set), &area(), DeviceClass::Desktop), Verdict::NotCentered);
        assert_eq!(validate(Some(&set), &area(), DeviceClass::Mobile), Verdict::Valid);

        // Bottom may overhang the area by up to the margin.
        let low = BoundingBox { y: 200.0, ..bbox };
        let set = face(low, 0.9);
        assert_eq!(validate(Some(&set), &area(), DeviceClass::Desktop), Verdict::Valid);
        assert_eq!(validate(Some(&set), &area(), DeviceClass::Mobile), Verdict::NotCentered);
    }

    #[test]
    fn test_horizontal_overflow_not_centered() {
        let bbox = BoundingBox {
            x: 90.0,
            y: 100.0,
            width: 240.0,
            height: 240.0,
        };
        let set = face(bbox, 0.9);
        assert_eq!(validate(Some(&set), &area(), DeviceClass::Desktop), Verdict::NotCentered);
    }

    #[test]
    fn test_distance_checked_before_position() {
        let bbox = BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 50.0,
            height: 50.0,
        };
        let set = face(bbox, 0.9);
        assert_eq!(validate(Some(&set), &area(), DeviceClass::Desktop), Verdict::TooFar);
    }

    #[test]
    fn test_degenerate_jaw_is_tilted() {
        let bbox = centered_box(240.0);
        let mut points = vec![Point::new(300.0, 200.0); 68];
        points[CHIN] = Point::new(300.0, 300.0);
        let set = LandmarkSet::new(points, 0.9, bbox).unwrap();
        assert!(!FaceRatios::measure(&set).within_bands());
        assert_eq!(validate(Some(&set), &area(), DeviceClass::Desktop), Verdict::Tilted);
    }
}
