use crate::optimizers::Optimizer;

/// Plain gradient descent: `w -= learning_rate * dw`.
///
/// Gradients are not divided by the batch size, so a batch of `n` identical
/// samples moves the weights `n` times as far as one sample does.
///
/// ```
/// use convnet_engine::optimizers::{Optimizer, SGD};
///
/// let mut sgd = SGD::new(0.5);
/// let mut filter = vec![1.0f32, -1.0];
/// sgd.update(&mut filter, &[0.2, 0.4]);
/// assert_eq!(filter, vec![0.9, -1.2]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SGD {
    learning_rate: f32,
}

impl SGD {
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for SGD {
    /// # Panics
    ///
    /// Panics if the two buffers differ in length; layers size both from the
    /// same geometry.
    fn update(&mut self, parameters: &mut [f32], gradients: &[f32]) {
        assert_eq!(
            parameters.len(),
            gradients.len(),
            "parameter and gradient buffers differ in length"
        );
        for (w, dw) in parameters.iter_mut().zip(gradients) {
            *w -= self.learning_rate * dw;
        }
    }
}
