//! Forward-pass backends

use ndarray::Array4;
use std::io::Cursor;
use std::sync::Mutex;
use tract_onnx::prelude::*;
use tracing::info;

use crate::InferenceError;

/// Runs the model graph on one preprocessed input.
///
/// Implementations must be safe to call from several request threads at once.
pub trait InferenceBackend: Send + Sync {
    /// Forward pass on a `[1, 3, H, W]` tensor, returning the flattened output
    fn forward(&self, input: Array4<f32>) -> Result<Vec<f32>, InferenceError>;

    /// Short name for logs and the health endpoint
    fn name(&self) -> &str;
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
    fn forward(&self, input: Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        (**self).forward(input)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// tract-onnx execution plan for the artifact's graph
pub struct TractBackend {
    plan: TypedRunnableModel<TypedModel>,
    input_shape: [usize; 4],
}

impl TractBackend {
    /// Parse, type and optimize an ONNX graph for a fixed input shape
    pub fn from_onnx_bytes(bytes: &[u8], input_shape: [usize; 4]) -> TractResult<Self> {
        let [n, c, h, w] = input_shape;
        let plan = tract_onnx::onnx()
            .model_for_read(&mut Cursor::new(bytes))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(n, c, h, w)))?
            .into_optimized()?
            .into_runnable()?;

        info!("ONNX graph optimized for input shape {:?}", input_shape);
        Ok(Self { plan, input_shape })
    }
}

impl InferenceBackend for TractBackend {
    fn forward(&self, input: Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        if input.shape() != self.input_shape {
            return Err(InferenceError::InvalidInputShape {
                expected: format!("{:?}", self.input_shape),
                actual: format!("{:?}", input.shape()),
            });
        }

        let data = input.as_slice().ok_or_else(|| {
            InferenceError::InferenceFailed("input tensor is not contiguous".to_string())
        })?;
        let tensor = Tensor::from_shape(&self.input_shape, data)
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;

        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;
        let output = outputs
            .first()
            .ok_or_else(|| InferenceError::InvalidOutput("graph produced no outputs".to_string()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::InvalidOutput(e.to_string()))?;

        Ok(view.iter().copied().collect())
    }

    fn name(&self) -> &str {
        "tract-onnx"
    }
}

/// Lets at most one forward pass run at a time
pub struct Serialized<B> {
    inner: Mutex<B>,
    name: String,
}

impl<B: InferenceBackend> Serialized<B> {
    pub fn new(backend: B) -> Self {
        Self {
            name: format!("serialized({})", backend.name()),
            inner: Mutex::new(backend),
        }
    }
}

impl<B: InferenceBackend> InferenceBackend for Serialized<B> {
    fn forward(&self, input: Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let backend = self
            .inner
            .lock()
            .map_err(|e| InferenceError::InferenceFailed(format!("Lock error: {}", e)))?;
        backend.forward(input)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl InferenceBackend for Counting {
        fn forward(&self, _input: Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![0.0, 0.0])
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn test_serialized_runs_one_at_a_time() {
        let peak = Arc::new(AtomicUsize::new(0));
        let backend = Arc::new(Serialized::new(Counting {
            active: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let backend = backend.clone();
                std::thread::spawn(move || backend.forward(Array4::zeros((1, 3, 2, 2))).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(backend.name(), "serialized(counting)");
    }

    #[test]
    fn test_tract_rejects_garbage_graph() {
        assert!(TractBackend::from_onnx_bytes(b"not an onnx graph", [1, 3, 8, 8]).is_err());
    }
}
