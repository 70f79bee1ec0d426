//! Neural Network inference.

use std::{fmt, ops::Index, path::Path, sync::Arc};

use anyhow::{anyhow, bail, Context};
use image::RgbaImage;
use tract_onnx::prelude::{
    tract_ndarray, tvec, Framework, Graph, InferenceModelExt, SimplePlan, TValue, Tensor,
    TypedFact, TypedOp,
};

use crate::rect::Rect;

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// A convolutional neural network (CNN) that operates on image data.
///
/// This is a cheaply [`Clone`]able handle to the underlying network.
#[derive(Clone)]
pub struct Cnn {
    model: Arc<Model>,
    shape: CnnInputShape,
    input_res: (u32, u32),
}

/// Describes in what order a CNN expects its input image data.
///
/// - `N` is the number of images, fixed at 1.
/// - `C` is the number of color channels, 3 for RGB inputs.
/// - `H` and `W` are the height and width of the input, respectively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CnnInputShape {
    /// Shape is `[N, C, H, W]`.
    NCHW,
    /// Shape is `[N, H, W, C]`.
    NHWC,
}

impl Cnn {
    /// Loads a pre-trained image network from an ONNX file.
    ///
    /// The network must take exactly one `[1, 3, H, W]` or `[1, H, W, 3]` input. Colors are fed in
    /// as RGB values in range 0.0 to 1.0.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Self::load_impl(path.as_ref())
    }

    fn load_impl(path: &Path) -> anyhow::Result<Self> {
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => bail!(
                "neural network file '{}' must have `.onnx` extension",
                path.display()
            ),
        }

        let graph = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to read network '{}'", path.display()))?
            .into_optimized()?;
        let model = SimplePlan::new(graph)?;

        let inputs = model.model().inputs.len();
        if inputs != 1 {
            bail!("CNN network has to take exactly 1 input, this one takes {inputs}");
        }
        let fact = model.model().input_fact(0)?;
        let tensor_shape = fact
            .shape
            .as_concrete()
            .ok_or_else(|| anyhow!("network input has a symbolic shape"))?;
        let (shape, w, h) = match *tensor_shape {
            [1, 3, h, w] => (CnnInputShape::NCHW, w, h),
            [1, h, w, 3] => (CnnInputShape::NHWC, w, h),
            _ => bail!("invalid CNN input shape {:?}", tensor_shape),
        };
        let input_res = (w.try_into()?, h.try_into()?);

        log::debug!(
            "loaded {} ({:?}, {}x{} input)",
            path.display(),
            shape,
            input_res.0,
            input_res.1,
        );

        Ok(Self {
            model: Arc::new(model),
            shape,
            input_res,
        })
    }

    /// Returns the expected input image size as `(width, height)`.
    #[inline]
    pub fn input_resolution(&self) -> (u32, u32) {
        self.input_res
    }

    /// Runs the network on the `roi` part of `image`.
    ///
    /// The region is stretched to the network's input resolution. Parts of `roi` that lie outside
    /// of `image` are filled with black.
    pub fn estimate(&self, image: &RgbaImage, roi: Rect) -> anyhow::Result<Outputs> {
        let (w, h) = (self.input_res.0 as usize, self.input_res.1 as usize);
        let pixels = sample_input(image, roi, self.input_res);

        let tensor: Tensor = match self.shape {
            CnnInputShape::NCHW => {
                tract_ndarray::Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
                    pixels[y * w + x][c]
                })
                .into()
            }
            CnnInputShape::NHWC => {
                tract_ndarray::Array4::from_shape_fn((1, h, w, 3), |(_, y, x, c)| {
                    pixels[y * w + x][c]
                })
                .into()
            }
        };

        let outputs = self.model.run(tvec![TValue::from_const(Arc::new(tensor))])?;
        let tensors = outputs
            .iter()
            .map(|value| {
                let view = value.to_array_view::<f32>()?;
                Ok(OutputTensor::new(
                    view.shape().to_vec(),
                    view.iter().copied().collect(),
                ))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Outputs { tensors })
    }
}

/// Samples `roi` of `image` at `res`, returning RGB values in range 0.0 to 1.0 in row-major order.
fn sample_input(image: &RgbaImage, roi: Rect, res: (u32, u32)) -> Vec<[f32; 3]> {
    let (w, h) = res;
    let mut pixels = Vec::with_capacity(w as usize * h as usize);
    for y in 0..h {
        for x in 0..w {
            let [u, v] = roi.transform_out([x as f32 + 0.5, y as f32 + 0.5], res);
            let inside = u >= 0.0
                && v >= 0.0
                && (u as u32) < image.width()
                && (v as u32) < image.height();
            if inside {
                let [r, g, b, _] = image.get_pixel(u as u32, v as u32).0;
                pixels.push([r, g, b].map(|c| c as f32 / 255.0));
            } else {
                pixels.push([0.0; 3]);
            }
        }
    }
    pixels
}

/// A single output tensor, flattened into row-major order.
#[derive(Clone, PartialEq)]
pub struct OutputTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl OutputTensor {
    /// Creates an output tensor.
    ///
    /// # Panics
    ///
    /// Panics if the number of elements in `data` does not match `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        assert_eq!(shape.iter().product::<usize>(), data.len());
        Self { shape, data }
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Returns the number of elements in the tensor.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Debug for OutputTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor{:?}", self.shape)
    }
}

/// The result of a neural network inference pass.
///
/// This is a list of tensors corresponding to the network's output nodes.
#[derive(Debug, Clone)]
pub struct Outputs {
    tensors: Vec<OutputTensor>,
}

impl Outputs {
    /// Returns the number of tensors in this inference output.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }
}

impl Index<usize> for Outputs {
    type Output = OutputTensor;

    fn index(&self, index: usize) -> &OutputTensor {
        &self.tensors[index]
    }
}

impl FromIterator<OutputTensor> for Outputs {
    fn from_iter<T: IntoIterator<Item = OutputTensor>>(iter: T) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}
