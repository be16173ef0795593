use std::io::{Read, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::arrays::input::InputType;
use crate::error::{LayerError, Result, configuration, ensure_size};
use crate::layers::factory::{LayerFactory, LayerParametersFactory};
use crate::layers::initializer::{Initializer, ParamsInitializer};
use crate::layers::interface::{ConnectionType, LayerInterface};
use crate::layers::parameters::LayerParameters;

/// 整个层栈的参数：N+1 个接口描述与 N 份共享参数。
///
/// 参数以 `Arc` 持有，构建出的每个时间步都引用同一份。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StackedLayersParameters {
    configuration: Vec<LayerInterface>,
    params: Vec<Arc<LayerParameters>>,
}

impl StackedLayersParameters {
    /// 按配置构建并初始化参数；未给出的初始化器取默认值（权重 Glorot，偏置为零）。
    pub fn new(
        configuration: Vec<LayerInterface>,
        weights_initializer: Option<Initializer>,
        biases_initializer: Option<Initializer>,
    ) -> Result<Self> {
        validate_configuration(&configuration)?;
        let mut initializer = ParamsInitializer::new(
            weights_initializer.unwrap_or_default(),
            biases_initializer.unwrap_or(Initializer::Zeros),
        )?;
        let params = configuration
            .windows(2)
            .map(|pair| {
                let (input, layer) = (&pair[0], &pair[1]);
                LayerParametersFactory::build(
                    &input.sizes,
                    layer.size(),
                    connection_of(layer)?,
                    Some(&mut initializer),
                )
                .map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(
            layers = params.len(),
            count = params.iter().map(|p| p.count()).sum::<usize>(),
            "stacked layers parameters built"
        );
        Ok(Self {
            configuration,
            params,
        })
    }

    /// 用已有参数构建（例如测试中的固定权重）；参数形状须与配置一致。
    pub fn from_params(
        configuration: Vec<LayerInterface>,
        params: Vec<LayerParameters>,
    ) -> Result<Self> {
        let stacked = Self {
            configuration,
            params: params.into_iter().map(Arc::new).collect(),
        };
        stacked.validate()?;
        Ok(stacked)
    }

    pub fn configuration(&self) -> &[LayerInterface] {
        &self.configuration
    }

    /// 层数（不含输入描述）。
    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// 第 `index` 层的输入描述与本层描述。
    pub fn interfaces(&self, index: usize) -> Result<(&LayerInterface, &LayerInterface)> {
        self.check_index(index)?;
        Ok((&self.configuration[index], &self.configuration[index + 1]))
    }

    pub fn params(&self, index: usize) -> Result<&Arc<LayerParameters>> {
        self.check_index(index)?;
        Ok(&self.params[index])
    }

    /// 写时复制：仍有层实例共享这份参数时先复制一份。
    pub fn params_mut(&mut self, index: usize) -> Result<&mut LayerParameters> {
        self.check_index(index)?;
        Ok(Arc::make_mut(&mut self.params[index]))
    }

    pub fn all_params(&self) -> &[Arc<LayerParameters>] {
        &self.params
    }

    /// 是否含有循环层。
    pub fn is_recurrent(&self) -> bool {
        self.configuration[1..]
            .iter()
            .filter_map(|iface| iface.connection_type)
            .any(ConnectionType::is_recurrent)
    }

    pub fn dump<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// 读取并重新校验；配置与参数不一致时返回配置错误。
    pub fn load<R: Read>(reader: R) -> Result<Self> {
        let stacked: Self = serde_json::from_reader(reader)?;
        stacked.validate()?;
        Ok(stacked)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.params.len() {
            Ok(())
        } else {
            Err(LayerError::LayerIndexOutOfRange {
                index,
                len: self.params.len(),
            })
        }
    }

    fn validate(&self) -> Result<()> {
        validate_configuration(&self.configuration)?;
        ensure_size(
            self.configuration.len() - 1,
            self.params.len(),
            "number of layer parameters",
        )?;
        for (pair, params) in self.configuration.windows(2).zip(&self.params) {
            let (input, layer) = (&pair[0], &pair[1]);
            let connection_type = connection_of(layer)?;
            if !LayerFactory::params_match(connection_type, params) {
                return Err(configuration(format!(
                    "parameters do not belong to a {connection_type:?} layer"
                )));
            }
            if params.input_sizes() != input.sizes {
                return Err(configuration(format!(
                    "{connection_type:?}: parameter input sizes {:?} differ from interface {:?}",
                    params.input_sizes(),
                    input.sizes
                )));
            }
            ensure_size(layer.size(), params.output_size(), "layer output size")?;
        }
        Ok(())
    }
}

fn connection_of(layer: &LayerInterface) -> Result<ConnectionType> {
    layer
        .connection_type
        .ok_or_else(|| configuration("layer interface has no connection type"))
}

/// 配置至少包含输入与一层；除第一层外每层的输入都是上一层的稠密输出。
fn validate_configuration(interfaces: &[LayerInterface]) -> Result<()> {
    if interfaces.len() < 2 {
        return Err(configuration(
            "a stack needs an input interface and at least one layer",
        ));
    }
    if interfaces[0].connection_type.is_some() {
        return Err(configuration(
            "the first interface describes the input and has no connection type",
        ));
    }
    for (index, pair) in interfaces.windows(2).enumerate() {
        let (input, layer) = (&pair[0], &pair[1]);
        let connection_type = connection_of(layer)?;
        if index > 0 && input.input_type != InputType::Dense {
            return Err(configuration(format!(
                "layer {index} reads the dense output of layer {}",
                index - 1
            )));
        }
        if layer.sizes.len() != 1 {
            return Err(configuration(format!(
                "layer {index} must declare exactly one output size"
            )));
        }
        LayerParametersFactory::check_sizes(&input.sizes, layer.size(), connection_type)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activations::functions::ActivationFunction;

    fn layers() -> Vec<LayerInterface> {
        vec![
            LayerInterface::input(4, InputType::Sparse),
            LayerInterface::layer(6, ConnectionType::Lstm, Some(ActivationFunction::Tanh)),
            LayerInterface::layer(3, ConnectionType::Feedforward, Some(ActivationFunction::Softmax)),
        ]
    }

    #[test]
    fn test_params_are_initialized_per_layer() {
        let seeded = Initializer::Glorot {
            gain: 1.0,
            seed: Some(7),
        };
        let stacked = StackedLayersParameters::new(layers(), Some(seeded), None).unwrap();
        assert_eq!(stacked.len(), 2);
        assert!(stacked.is_recurrent());
        assert!(matches!(**stacked.params(0).unwrap(), LayerParameters::Lstm(_)));
        assert!(matches!(
            stacked.params(2),
            Err(LayerError::LayerIndexOutOfRange { index: 2, len: 2 })
        ));

        let again = StackedLayersParameters::new(layers(), Some(seeded), None).unwrap();
        assert_eq!(stacked, again);
        let LayerParameters::Lstm(lstm) = &**stacked.params(0).unwrap() else {
            unreachable!()
        };
        // 共享发生器：同形状的门得到不同初值
        assert_ne!(lstm.input_gate.weights, lstm.output_gate.weights);
        assert!(lstm
            .input_gate
            .biases
            .as_ref()
            .unwrap()
            .iter()
            .all(|&b| b == 0.0));
    }

    #[test]
    fn test_hidden_interfaces_must_be_dense() {
        let mut config = layers();
        config[1].input_type = InputType::Sparse;
        assert!(StackedLayersParameters::new(config, None, None).is_err());
    }

    #[test]
    fn test_invalid_configurations() {
        let input_only = vec![LayerInterface::input(3, InputType::Dense)];
        assert!(StackedLayersParameters::new(input_only, None, None).is_err());
        let highway = vec![
            LayerInterface::input(3, InputType::Dense),
            LayerInterface::layer(4, ConnectionType::Highway, None),
        ];
        assert!(StackedLayersParameters::new(highway, None, None).is_err());
        let bad_init = Some(Initializer::Uniform {
            low: 1.0,
            high: -1.0,
            seed: None,
        });
        assert!(StackedLayersParameters::new(layers(), bad_init, None).is_err());
    }

    #[test]
    fn test_params_mut_copies_shared_params() {
        let mut stacked = StackedLayersParameters::new(layers(), None, None).unwrap();
        let shared = stacked.params(1).unwrap().clone();
        stacked.params_mut(1).unwrap().scale(0.0);
        assert!(shared.arrays().iter().any(|a| a.iter().any(|&v| v != 0.0)));
        assert!(stacked
            .params(1)
            .unwrap()
            .arrays()
            .iter()
            .all(|a| a.iter().all(|&v| v == 0.0)));
    }

    #[test]
    fn test_dump_and_load() {
        let stacked = StackedLayersParameters::new(layers(), None, None).unwrap();
        let mut buffer = Vec::new();
        stacked.dump(&mut buffer).unwrap();
        let loaded = StackedLayersParameters::load(buffer.as_slice()).unwrap();
        assert_eq!(stacked, loaded);

        assert!(matches!(
            StackedLayersParameters::load(&b"{\"configuration\": 1}"[..]),
            Err(LayerError::Serialization(_))
        ));
    }
}
