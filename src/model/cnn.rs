//! CNN Model Architecture for CIFAR-10 Classification
//!
//! Two convolution stages (32 then 64 filters) of conv/ReLU/conv/ReLU,
//! each followed by 2x2 max pooling and dropout, then a dense classifier
//! head with dropout.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Initializer, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Configuration for the Cifar10Cnn model
#[derive(Config, Debug)]
pub struct Cifar10CnnConfig {
    /// Number of output classes
    #[config(default = "10")]
    pub num_classes: usize,

    /// Dropout after each convolution stage
    #[config(default = "0.25")]
    pub conv_dropout: f64,

    /// Dropout before the output layer
    #[config(default = "0.5")]
    pub dense_dropout: f64,

    /// Units in the hidden dense layer
    #[config(default = "512")]
    pub hidden_units: usize,
}

impl Cifar10CnnConfig {
    /// Build the model on `device`
    pub fn init<B: Backend>(&self, device: &B::Device) -> Cifar10Cnn<B> {
        Cifar10Cnn::new(self, device)
    }
}

/// Glorot-uniform weights for every convolution and dense layer
const GLOROT_UNIFORM: Initializer = Initializer::XavierUniform { gain: 1.0 };

/// Conv(same) -> ReLU -> Conv(valid) -> ReLU -> MaxPool -> Dropout
#[derive(Module, Debug)]
pub struct ConvStage<B: Backend> {
    pub conv1: Conv2d<B>,
    pub conv2: Conv2d<B>,
    pub pool: MaxPool2d,
    pub dropout: Dropout,
    pub relu: Relu,
}

impl<B: Backend> ConvStage<B> {
    pub fn new(in_channels: usize, filters: usize, dropout: f64, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([in_channels, filters], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .with_initializer(GLOROT_UNIFORM)
            .init(device);
        let conv2 = Conv2dConfig::new([filters, filters], [3, 3])
            .with_padding(PaddingConfig2d::Valid)
            .with_initializer(GLOROT_UNIFORM)
            .init(device);

        Self {
            conv1,
            conv2,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout: DropoutConfig::new(dropout).init(),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.conv1.forward(x));
        let x = self.relu.forward(self.conv2.forward(x));
        let x = self.pool.forward(x);
        self.dropout.forward(x)
    }
}

/// Spatial side after one stage: valid 3x3 conv, then 2x2 pooling
const fn stage_output_side(side: usize) -> usize {
    (side - 2) / 2
}

/// CIFAR-10 classifier CNN
///
/// Shapes for a 3x32x32 input:
/// - stage 1: 32x32x32 -> 32x30x30 -> 32x15x15
/// - stage 2: 64x15x15 -> 64x13x13 -> 64x6x6
/// - flatten: 2304 -> 512 -> num_classes
#[derive(Module, Debug)]
pub struct Cifar10Cnn<B: Backend> {
    pub stage1: ConvStage<B>,
    pub stage2: ConvStage<B>,
    pub fc1: Linear<B>,
    pub dropout: Dropout,
    pub fc2: Linear<B>,
    pub relu: Relu,
}

impl<B: Backend> Cifar10Cnn<B> {
    /// Input image side length
    pub const INPUT_SIDE: usize = 32;

    /// Flattened feature count entering the dense head
    pub const FLAT_FEATURES: usize =
        64 * stage_output_side(stage_output_side(Self::INPUT_SIDE)).pow(2);

    pub fn new(config: &Cifar10CnnConfig, device: &B::Device) -> Self {
        Self {
            stage1: ConvStage::new(3, 32, config.conv_dropout, device),
            stage2: ConvStage::new(32, 64, config.conv_dropout, device),
            fc1: LinearConfig::new(Self::FLAT_FEATURES, config.hidden_units)
                .with_initializer(GLOROT_UNIFORM)
                .init(device),
            dropout: DropoutConfig::new(config.dense_dropout).init(),
            fc2: LinearConfig::new(config.hidden_units, config.num_classes)
                .with_initializer(GLOROT_UNIFORM)
                .init(device),
            relu: Relu::new(),
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, 32, 32]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.stage1.forward(x);
        let x = self.stage2.forward(x);

        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.relu.forward(self.fc1.forward(x));
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    /// Forward pass with softmax, giving class probabilities
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_flat_features() {
        assert_eq!(Cifar10Cnn::<TestBackend>::FLAT_FEATURES, 64 * 6 * 6);
    }

    #[test]
    fn test_dense_weights_follow_glorot_bound() {
        let device = Default::default();
        let model = Cifar10CnnConfig::new().init::<TestBackend>(&device);

        // fan_in 2304, fan_out 512: limit sqrt(6 / 2816) ~= 0.0462, while a
        // fan-in-only uniform init would stay under 1 / sqrt(2304) ~= 0.0208.
        let limit = (6.0f32 / (2304.0 + 512.0)).sqrt();
        let max: f32 = model.fc1.weight.val().abs().max().into_scalar();
        assert!(max <= limit + 1e-6);
        assert!(max > 0.03);
    }

    #[test]
    fn test_output_shape() {
        let device = Default::default();
        let model = Cifar10CnnConfig::new().init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        assert_eq!(model.forward(input).dims(), [2, 10]);
    }

    #[test]
    fn test_custom_class_count() {
        let device = Default::default();
        let model = Cifar10CnnConfig::new()
            .with_num_classes(4)
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let probs = model.forward_softmax(input);
        assert_eq!(probs.dims(), [1, 4]);

        let total: f32 = probs.sum().into_scalar();
        assert!((total - 1.0).abs() < 1e-5);
    }
}
