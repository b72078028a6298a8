use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::DetectionResult;
use crate::frame::FrameView;

/// Placeholder backend. Reports nothing detected (zero angle, zero distance)
/// for every frame.
#[derive(Debug, Default)]
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, _view: &FrameView<'_>) -> Result<DetectionResult> {
        Ok(DetectionResult::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameGeometry;

    #[test]
    fn stub_backend_always_reports_zero() -> Result<()> {
        let mut backend = StubBackend::new();
        let geometry = FrameGeometry::new(2, 2, 24);

        for fill in [0u8, 128, 255] {
            let pixels = vec![fill; 12];
            let view = FrameView::new(&pixels, geometry)?;
            let result = backend.infer(&view)?;
            assert_eq!(result.azimuth_angle, 0.0);
            assert_eq!(result.distance, 0.0);
        }
        Ok(())
    }
}
