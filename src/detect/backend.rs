use anyhow::Result;

use crate::detect::result::DetectionResult;
use crate::frame::FrameView;

/// Detector backend trait.
///
/// `infer` runs on a private copy of the frame after the shared buffer lock
/// has been released. Implementations must:
/// - Treat the pixels as read-only and ephemeral (copy if they must keep them)
/// - Not write to disk or perform network requests
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn infer(&mut self, view: &FrameView<'_>) -> Result<DetectionResult>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: DetectorBackend + ?Sized> DetectorBackend for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn infer(&mut self, view: &FrameView<'_>) -> Result<DetectionResult> {
        (**self).infer(view)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
