mod backend;
mod backends;
mod result;

use std::path::Path;

use anyhow::{anyhow, Result};

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::DetectionResult;

use crate::frame::FrameGeometry;

/// Backend names accepted by `select_backend`.
pub const BACKEND_NAMES: &[&str] = &["stub", "tract"];

/// Build the detector named on the command line.
///
/// `tract` needs the `backend-tract` feature and a model path.
pub fn select_backend(
    name: &str,
    geometry: FrameGeometry,
    model_path: Option<&Path>,
) -> Result<Box<dyn DetectorBackend>> {
    match name {
        "stub" => {
            if model_path.is_some() {
                log::warn!("stub detector ignores the model path");
            }
            Ok(Box::new(StubBackend::new()))
        }
        "tract" => tract_backend(geometry, model_path),
        other => Err(anyhow!(
            "unknown detector '{}' (expected one of: {})",
            other,
            BACKEND_NAMES.join(", ")
        )),
    }
}

#[cfg(feature = "backend-tract")]
fn tract_backend(
    geometry: FrameGeometry,
    model_path: Option<&Path>,
) -> Result<Box<dyn DetectorBackend>> {
    let model_path = model_path.ok_or_else(|| anyhow!("tract detector requires --model"))?;
    Ok(Box::new(TractBackend::new(model_path, geometry)?))
}

#[cfg(not(feature = "backend-tract"))]
fn tract_backend(
    _geometry: FrameGeometry,
    _model_path: Option<&Path>,
) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "tract detector requires the backend-tract feature"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::GEOMETRY_848X480;

    #[test]
    fn selects_stub_by_name() -> Result<()> {
        let backend = select_backend("stub", GEOMETRY_848X480, None)?;
        assert_eq!(backend.name(), "stub");
        Ok(())
    }

    #[test]
    fn rejects_unknown_backend() {
        let err = select_backend("yolo", GEOMETRY_848X480, None)
            .err()
            .expect("unknown backend must fail");
        assert!(err.to_string().contains("unknown detector"));
    }

    #[test]
    fn tract_without_model_fails() {
        assert!(select_backend("tract", GEOMETRY_848X480, None).is_err());
    }
}
