#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::DetectionResult;
use crate::frame::{FrameGeometry, FrameView};

/// Tract-based backend for ONNX inference.
///
/// The model takes one `1x3xHxW` RGB tensor normalised to `0..1` and returns
/// at least two values; the first is the azimuth angle (radians), the second
/// the distance (meters). Only the model load touches the filesystem.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    geometry: FrameGeometry,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for `geometry` frames.
    pub fn new<P: AsRef<Path>>(model_path: P, geometry: FrameGeometry) -> Result<Self> {
        if geometry.bits_per_pixel != 24 {
            return Err(anyhow!(
                "tract backend expects 24 bpp RGB frames, got {}",
                geometry
            ));
        }
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, geometry.height as usize, geometry.width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "tract detector loaded {} for {} frames",
            model_path.display(),
            geometry
        );
        Ok(Self { model, geometry })
    }

}

/// `1x3xHxW` tensor of the view's RGB pixels scaled to `0..1`.
fn frame_tensor(geometry: FrameGeometry, view: &FrameView<'_>) -> Result<Tensor> {
    if view.geometry() != geometry {
        return Err(anyhow!(
            "frame {} does not match model input {}",
            view.geometry(),
            geometry
        ));
    }

    let pixels = view.pixels();
    let width = geometry.width as usize;
    let input = tract_ndarray::Array4::from_shape_fn(
        (1, 3, geometry.height as usize, width),
        |(_, channel, y, x)| {
            let idx = (y * width + x) * 3 + channel;
            pixels[idx] as f32 / 255.0
        },
    );

    Ok(input.into_tensor())
}

/// First two values of the first output, as `(azimuth_angle, distance)`.
fn extract_result(outputs: TVec<TValue>) -> Result<DetectionResult> {
    let output = outputs
        .first()
        .ok_or_else(|| anyhow!("model produced no outputs"))?;
    let values = output
        .to_array_view::<f32>()
        .context("model output tensor was not f32")?;
    let mut values = values.iter().copied();
    let (Some(azimuth_angle), Some(distance)) = (values.next(), values.next()) else {
        return Err(anyhow!("model output has fewer than two values"));
    };
    if !azimuth_angle.is_finite() || !distance.is_finite() {
        return Err(anyhow!("model output is not finite"));
    }
    Ok(DetectionResult::new(azimuth_angle, distance))
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, view: &FrameView<'_>) -> Result<DetectionResult> {
        let input = frame_tensor(self.geometry, view)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        extract_result(outputs)
    }
}

#[cfg(all(test, feature = "backend-tract"))]
mod tests {
    use super::*;

    fn outputs(values: &[f32]) -> TVec<TValue> {
        tvec!(tensor1(values).into())
    }

    #[test]
    fn reads_angle_and_distance_from_first_output() -> Result<()> {
        let result = extract_result(outputs(&[0.25, 3.5, 9.0]))?;
        assert_eq!(result, DetectionResult::new(0.25, 3.5));
        Ok(())
    }

    #[test]
    fn rejects_missing_or_short_output() {
        assert!(extract_result(TVec::new()).is_err());
        assert!(extract_result(outputs(&[])).is_err());
        assert!(extract_result(outputs(&[1.0])).is_err());
    }

    #[test]
    fn rejects_non_finite_output() {
        assert!(extract_result(outputs(&[f32::NAN, 1.0])).is_err());
        assert!(extract_result(outputs(&[0.0, f32::INFINITY])).is_err());
    }

    #[test]
    fn rejects_non_f32_output() {
        let ints: TVec<TValue> = tvec!(tensor1(&[1i64, 2]).into());
        assert!(extract_result(ints).is_err());
    }

    #[test]
    fn frame_tensor_is_planar_and_normalised() -> Result<()> {
        let geometry = FrameGeometry::new(2, 1, 24);
        let pixels = [255u8, 0, 51, 0, 255, 102];
        let view = FrameView::new(&pixels, geometry)?;

        let tensor = frame_tensor(geometry, &view)?;
        assert_eq!(tensor.shape(), &[1, 3, 1, 2]);
        let planes: Vec<f32> = tensor.to_array_view::<f32>()?.iter().copied().collect();
        assert_eq!(planes, vec![1.0, 0.0, 0.0, 1.0, 0.2, 0.4]);
        Ok(())
    }

    #[test]
    fn frame_tensor_rejects_geometry_mismatch() -> Result<()> {
        let pixels = [0u8; 12];
        let view = FrameView::new(&pixels, FrameGeometry::new(2, 2, 24))?;
        assert!(frame_tensor(FrameGeometry::new(4, 1, 24), &view).is_err());
        Ok(())
    }
}
