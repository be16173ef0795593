use ndarray::ArrayD;
use ndarray::ArrayViewMutD;
use ndarray_rand::RandomExt;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand_distr::Uniform;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, configuration};
use crate::layers::parameters::LayerParameters;

/// 参数初始化方式。
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Initializer {
    /// Glorot 均匀分布：`±gain·sqrt(6 / (fan_in + fan_out))`。
    Glorot { gain: f64, seed: Option<u64> },
    Uniform { low: f64, high: f64, seed: Option<u64> },
    Constant(f64),
    Zeros,
}

impl Default for Initializer {
    fn default() -> Self {
        Initializer::glorot()
    }
}

impl Initializer {
    pub fn glorot() -> Self {
        Initializer::Glorot {
            gain: 1.0,
            seed: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            Initializer::Glorot { gain, .. } if !(gain > 0.0) => Err(configuration(format!(
                "glorot gain must be positive, got {gain}"
            ))),
            Initializer::Uniform { low, high, .. } if !(low < high) => Err(configuration(format!(
                "uniform initializer needs low < high, got [{low}, {high})"
            ))),
            _ => Ok(()),
        }
    }

    fn seed(&self) -> Option<u64> {
        match *self {
            Initializer::Glorot { seed, .. } | Initializer::Uniform { seed, .. } => seed,
            _ => None,
        }
    }

    /// 为本初始化器创建随机数发生器；给定种子时结果可复现。
    pub fn rng(&self) -> StdRng {
        match self.seed() {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// 原地填充一个参数张量。
    pub fn fill(&self, mut array: ArrayViewMutD<'_, f64>, rng: &mut StdRng) {
        if array.is_empty() {
            return;
        }
        match *self {
            Initializer::Glorot { gain, .. } => {
                let shape = array.shape();
                let fan_out = shape[0];
                let fan_in = shape.get(1).copied().unwrap_or(1);
                let bound = gain * (6.0 / (fan_in + fan_out) as f64).sqrt();
                let values = ArrayD::random_using(array.raw_dim(), Uniform::new(-bound, bound), rng);
                array.assign(&values);
            }
            Initializer::Uniform { low, high, .. } => {
                let values = ArrayD::random_using(array.raw_dim(), Uniform::new(low, high), rng);
                array.assign(&values);
            }
            Initializer::Constant(value) => array.fill(value),
            Initializer::Zeros => array.fill(0.0),
        }
    }
}

/// 权重与偏置初始化器及其随机状态，在整个网络的构建过程中共享。
///
/// 共用同一个发生器，使相同形状的不同层得到不同的初值。
pub struct ParamsInitializer {
    weights: Initializer,
    biases: Initializer,
    weights_rng: StdRng,
    biases_rng: StdRng,
}

impl ParamsInitializer {
    pub fn new(weights: Initializer, biases: Initializer) -> Result<Self> {
        weights.validate()?;
        biases.validate()?;
        Ok(Self {
            weights_rng: weights.rng(),
            biases_rng: biases.rng(),
            weights,
            biases,
        })
    }

    pub fn initialize(&mut self, params: &mut LayerParameters) {
        debug!(
            weights = ?self.weights,
            biases = ?self.biases,
            count = params.count(),
            "initializing layer parameters"
        );
        for array in params.weights_list() {
            self.weights.fill(array, &mut self.weights_rng);
        }
        for array in params.biases_list() {
            self.biases.fill(array, &mut self.biases_rng);
        }
    }
}

impl Default for ParamsInitializer {
    fn default() -> Self {
        let weights = Initializer::glorot();
        let biases = Initializer::Zeros;
        Self {
            weights_rng: weights.rng(),
            biases_rng: biases.rng(),
            weights,
            biases,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::feedforward::FeedforwardParameters;

    #[test]
    fn test_glorot_bounds_and_zero_biases() {
        let mut params = LayerParameters::Feedforward(FeedforwardParameters::new(4, 2));
        let mut init = ParamsInitializer::new(
            Initializer::Glorot {
                gain: 1.0,
                seed: Some(7),
            },
            Initializer::Zeros,
        )
        .unwrap();
        init.initialize(&mut params);
        let bound = (6.0f64 / 6.0).sqrt();
        let arrays = params.arrays();
        assert!(arrays[0].iter().all(|v| v.abs() <= bound));
        assert!(arrays[0].iter().any(|&v| v != 0.0));
        assert!(arrays[1].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_seed_is_reproducible() {
        let build = || {
            let mut params = LayerParameters::Feedforward(FeedforwardParameters::new(3, 3));
            let uniform = Initializer::Uniform {
                low: -0.5,
                high: 0.5,
                seed: Some(42),
            };
            ParamsInitializer::new(uniform, Initializer::Constant(0.1))
                .unwrap()
                .initialize(&mut params);
            params
        };
        let (a, b) = (build(), build());
        assert_eq!(a, b);
        assert!(a.arrays()[1].iter().all(|&v| v == 0.1));
    }

    #[test]
    fn test_invalid_initializers_are_rejected() {
        let bad = Initializer::Uniform {
            low: 1.0,
            high: 1.0,
            seed: None,
        };
        assert!(ParamsInitializer::new(bad, Initializer::Zeros).is_err());
        let bad = Initializer::Glorot {
            gain: 0.0,
            seed: None,
        };
        assert!(bad.validate().is_err());
    }
}
