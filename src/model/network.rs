// Network module - convolutional classifier over log-mel spectrograms

use candle_core::{Result, Tensor};
use candle_nn::{
    BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, Dropout, Linear, Module, ModuleT, VarBuilder,
};

use crate::error::ModelError;

/// Smallest spectrogram extent (either axis) the three conv blocks accept
pub const MIN_INPUT_EXTENT: usize = 18;

const DROPOUT_RATE: f32 = 0.3;
const HIDDEN_UNITS: usize = 128;

fn batch_norm_config() -> BatchNormConfig {
    BatchNormConfig {
        eps: 1e-3,
        remove_mean: true,
        affine: true,
        momentum: 0.01,
    }
}

/// Three conv blocks, global average pooling and a two-layer dense head
///
/// Input is `(batch, n_mels, n_frames)`; output is unnormalized logits of
/// shape `(batch, num_classes)`.
#[derive(Debug, Clone)]
pub struct UrbanSoundCnn {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
    conv3: Conv2d,
    dropout: Dropout,
    fc: Linear,
    head: Linear,
    num_classes: usize,
}

impl UrbanSoundCnn {
    pub fn new(num_classes: usize, vb: VarBuilder) -> Result<Self> {
        let conv_cfg = Conv2dConfig::default();
        Ok(Self {
            conv1: candle_nn::conv2d(1, 32, 3, conv_cfg, vb.pp("conv1"))?,
            bn1: candle_nn::batch_norm(32, batch_norm_config(), vb.pp("bn1"))?,
            conv2: candle_nn::conv2d(32, 64, 3, conv_cfg, vb.pp("conv2"))?,
            bn2: candle_nn::batch_norm(64, batch_norm_config(), vb.pp("bn2"))?,
            conv3: candle_nn::conv2d(64, 128, 3, conv_cfg, vb.pp("conv3"))?,
            dropout: Dropout::new(DROPOUT_RATE),
            fc: candle_nn::linear(128, HIDDEN_UNITS, vb.pp("fc"))?,
            head: candle_nn::linear(HIDDEN_UNITS, num_classes, vb.pp("head"))?,
            num_classes,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Reject inputs that would shrink to nothing before global pooling
    pub fn check_input(n_mels: usize, n_frames: usize) -> std::result::Result<(), ModelError> {
        if n_mels < MIN_INPUT_EXTENT || n_frames < MIN_INPUT_EXTENT {
            return Err(ModelError::invalid(format!(
                "input ({}, {}) is smaller than the minimum {}x{}",
                n_mels, n_frames, MIN_INPUT_EXTENT, MIN_INPUT_EXTENT
            )));
        }
        Ok(())
    }

    /// Softmax class probabilities in inference mode
    pub fn probabilities(&self, xs: &Tensor) -> Result<Tensor> {
        let logits = self.forward_t(xs, false)?;
        candle_nn::ops::softmax(&logits, candle_core::D::Minus1)
    }
}

impl ModuleT for UrbanSoundCnn {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = xs.unsqueeze(1)?;

        let xs = self.conv1.forward(&xs)?.relu()?;
        let xs = self.bn1.forward_t(&xs, train)?.max_pool2d(2)?;

        let xs = self.conv2.forward(&xs)?.relu()?;
        let xs = self.bn2.forward_t(&xs, train)?.max_pool2d(2)?;

        let xs = self.conv3.forward(&xs)?.relu()?;
        let xs = xs.mean((2, 3))?;

        let xs = self.dropout.forward_t(&xs, train)?;
        let xs = self.fc.forward(&xs)?.relu()?;
        self.head.forward(&xs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_logits_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = UrbanSoundCnn::new(4, vb).unwrap();

        let xs = Tensor::zeros((3, 24, 32), DType::F32, &device).unwrap();
        let logits = model.forward_t(&xs, false).unwrap();
        assert_eq!(logits.dims(), &[3, 4]);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = UrbanSoundCnn::new(3, vb).unwrap();

        let xs = Tensor::rand(0f32, 1f32, (2, 20, 20), &device).unwrap();
        let probs = model.probabilities(&xs).unwrap().to_vec2::<f32>().unwrap();
        for row in probs {
            assert_eq!(row.len(), 3);
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_minimum_input_extent() {
        assert!(UrbanSoundCnn::check_input(18, 18).is_ok());
        assert!(matches!(
            UrbanSoundCnn::check_input(17, 64),
            Err(ModelError::InvalidDataset { .. })
        ));
    }
}
