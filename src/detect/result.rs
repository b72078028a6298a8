/// Result of running detection on a frame.
///
/// Zero in both fields means "nothing detected" and is what the stub backend
/// reports for every frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DetectionResult {
    /// Bearing of the detected object in radians, positive to the left.
    pub azimuth_angle: f32,
    /// Distance to the detected object in meters.
    pub distance: f32,
}

impl DetectionResult {
    pub fn new(azimuth_angle: f32, distance: f32) -> Self {
        Self {
            azimuth_angle,
            distance,
        }
    }
}
