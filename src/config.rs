use std::io::Read;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, configuration};
use crate::layers::initializer::Initializer;
use crate::layers::interface::LayerInterface;
use crate::stacked::parameters::StackedLayersParameters;
use crate::stacked::sequence::RecurrentSequence;
use crate::stacked::stacked_layers::StackedLayers;

/// 层栈的 JSON 配置。
///
/// ```json
/// {
///   "layers": [
///     { "sizes": [4], "type": "Dense" },
///     { "sizes": [8], "type": "Dense", "connection_type": "Gru", "activation": "Tanh" }
///   ],
///   "dropout": 0.1
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    pub layers: Vec<LayerInterface>,
    #[serde(default)]
    pub dropout: f64,
    #[serde(default)]
    pub weights_initializer: Option<Initializer>,
    #[serde(default)]
    pub biases_initializer: Option<Initializer>,
}

impl StackConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(configuration(format!(
                "dropout must lie in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    pub fn build_params(&self) -> Result<StackedLayersParameters> {
        self.validate()?;
        debug!(
            layers = self.layers.len().saturating_sub(1),
            dropout = self.dropout,
            "building from config"
        );
        StackedLayersParameters::new(
            self.layers.clone(),
            self.weights_initializer,
            self.biases_initializer,
        )
    }

    /// 用给定参数构建非循环层栈，dropout 取自配置。
    pub fn stacked_layers(&self, params: &StackedLayersParameters) -> Result<StackedLayers> {
        StackedLayers::new(params, self.dropout)
    }

    pub fn recurrent_sequence(&self, params: &StackedLayersParameters) -> Result<RecurrentSequence> {
        RecurrentSequence::new(params, self.dropout)
    }
}
