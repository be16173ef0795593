use std::sync::Arc;

use tracing::debug;

use crate::arrays::input::InputType;
use crate::error::{LayerError, Result, configuration, ensure_size};
use crate::layers::batch_norm::BatchNormParameters;
use crate::layers::biaffine::BiaffineParameters;
use crate::layers::cfn_cell::CfnParameters;
use crate::layers::deltarnn_cell::DeltaRnnParameters;
use crate::layers::feedforward::FeedforwardParameters;
use crate::layers::gru_cell::GruParameters;
use crate::layers::highway::HighwayParameters;
use crate::layers::indrnn_cell::IndRnnParameters;
use crate::layers::initializer::ParamsInitializer;
use crate::layers::interface::{ConnectionType, LayerInterface};
use crate::layers::layer::Layer;
use crate::layers::lstm_cell::LstmParameters;
use crate::layers::ltm_cell::LtmParameters;
use crate::layers::merge::MergeParameters;
use crate::layers::norm::NormParameters;
use crate::layers::parameters::LayerParameters;
use crate::layers::ran_cell::RanParameters;
use crate::layers::rnn_cell::SimpleRecurrentParameters;
use crate::layers::squared_distance::SquaredDistanceParameters;
use crate::layers::tpr_cell::TprParameters;

/// 按连接类型构建参数，并在构建时检查尺寸约束。
pub struct LayerParametersFactory;

impl LayerParametersFactory {
    pub fn build(
        input_sizes: &[usize],
        output_size: usize,
        connection_type: ConnectionType,
        initializer: Option<&mut ParamsInitializer>,
    ) -> Result<LayerParameters> {
        Self::check_sizes(input_sizes, output_size, connection_type)?;
        let input_size = input_sizes[0];
        let mut params = match connection_type {
            ConnectionType::Feedforward => {
                LayerParameters::Feedforward(FeedforwardParameters::new(input_size, output_size))
            }
            ConnectionType::Highway => LayerParameters::Highway(HighwayParameters::new(input_size)),
            ConnectionType::Norm => LayerParameters::Norm(NormParameters::new(input_size)),
            ConnectionType::BatchNorm => {
                LayerParameters::BatchNorm(BatchNormParameters::new(input_size))
            }
            ConnectionType::Concat
            | ConnectionType::Sum
            | ConnectionType::Sub
            | ConnectionType::Avg
            | ConnectionType::Product => {
                LayerParameters::Merge(MergeParameters::new(input_sizes.to_vec(), output_size))
            }
            ConnectionType::Biaffine => LayerParameters::Biaffine(BiaffineParameters::new(
                input_sizes[0],
                input_sizes[1],
                output_size,
            )),
            ConnectionType::SquaredDistance => {
                LayerParameters::SquaredDistance(SquaredDistanceParameters::new(input_size))
            }
            ConnectionType::SimpleRecurrent => LayerParameters::SimpleRecurrent(
                SimpleRecurrentParameters::new(input_size, output_size),
            ),
            ConnectionType::Gru => LayerParameters::Gru(GruParameters::new(input_size, output_size)),
            ConnectionType::Lstm => {
                LayerParameters::Lstm(LstmParameters::new(input_size, output_size))
            }
            ConnectionType::Cfn => LayerParameters::Cfn(CfnParameters::new(input_size, output_size)),
            ConnectionType::Ran => LayerParameters::Ran(RanParameters::new(input_size, output_size)),
            ConnectionType::IndRnn => {
                LayerParameters::IndRnn(IndRnnParameters::new(input_size, output_size))
            }
            ConnectionType::Ltm => LayerParameters::Ltm(LtmParameters::new(input_size)),
            ConnectionType::DeltaRnn => {
                LayerParameters::DeltaRnn(DeltaRnnParameters::new(input_size, output_size))
            }
            ConnectionType::Tpr => LayerParameters::Tpr(TprParameters::new(input_size, output_size)),
        };
        if let Some(initializer) = initializer {
            initializer.initialize(&mut params);
        }
        Ok(params)
    }

    pub(crate) fn check_sizes(
        input_sizes: &[usize],
        output_size: usize,
        connection_type: ConnectionType,
    ) -> Result<()> {
        if input_sizes.is_empty() || input_sizes.contains(&0) || output_size == 0 {
            return Err(configuration(format!(
                "{connection_type:?}: sizes must be positive (inputs {input_sizes:?}, output {output_size})"
            )));
        }
        if connection_type.is_merge() {
            if input_sizes.len() < 2 {
                return Err(configuration(format!(
                    "{connection_type:?} merges at least two inputs, got {}",
                    input_sizes.len()
                )));
            }
        } else {
            ensure_size(1, input_sizes.len(), "number of inputs")?;
        }

        let first = input_sizes[0];
        match connection_type {
            ConnectionType::Highway
            | ConnectionType::Norm
            | ConnectionType::BatchNorm
            | ConnectionType::Ltm => {
                ensure_size(first, output_size, "output size must equal input size")
            }
            ConnectionType::Concat => ensure_size(
                input_sizes.iter().sum(),
                output_size,
                "output size must equal the sum of input sizes",
            ),
            ConnectionType::Sum
            | ConnectionType::Sub
            | ConnectionType::Avg
            | ConnectionType::Product => {
                if connection_type == ConnectionType::Sub {
                    ensure_size(2, input_sizes.len(), "number of inputs")?;
                }
                if input_sizes.iter().any(|&size| size != first) {
                    return Err(configuration(format!(
                        "{connection_type:?} needs inputs of equal size, got {input_sizes:?}"
                    )));
                }
                ensure_size(first, output_size, "output size must equal input size")
            }
            ConnectionType::Biaffine => ensure_size(2, input_sizes.len(), "number of inputs"),
            ConnectionType::SquaredDistance => {
                ensure_size(1, output_size, "squared distance output is a scalar")
            }
            _ => Ok(()),
        }
    }
}

/// 按层接口构建层实例。
pub struct LayerFactory;

impl LayerFactory {
    /// `input` 描述该层的输入，`layer` 描述该层本身。
    ///
    /// 循环类型必须声明上下文窗口（`windowed`），否则返回 `MissingContextWindow`。
    pub fn build(
        input: &LayerInterface,
        layer: &LayerInterface,
        params: Arc<LayerParameters>,
        dropout: f64,
        windowed: bool,
    ) -> Result<Layer> {
        let connection_type = layer
            .connection_type
            .ok_or_else(|| configuration("layer interface has no connection type"))?;
        if connection_type.is_recurrent() && !windowed {
            return Err(LayerError::MissingContextWindow(connection_type));
        }
        if !(0.0..1.0).contains(&dropout) {
            return Err(configuration(format!(
                "dropout must lie in [0, 1), got {dropout}"
            )));
        }
        if dropout > 0.0 && input.input_type == InputType::SparseBinary {
            return Err(configuration(
                "dropout cannot be applied to sparse binary input",
            ));
        }
        if !Self::params_match(connection_type, &params) {
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

        debug!(
            ?connection_type,
            input_type = ?input.input_type,
            output_size = layer.size(),
            dropout,
            "building layer"
        );
        Ok(Layer::new(
            connection_type,
            input.input_type,
            params,
            layer.activation,
            dropout,
        ))
    }

    pub(crate) fn params_match(connection_type: ConnectionType, params: &LayerParameters) -> bool {
        matches!(
            (connection_type, params),
            (ConnectionType::Feedforward, LayerParameters::Feedforward(_))
                | (ConnectionType::Highway, LayerParameters::Highway(_))
                | (ConnectionType::Norm, LayerParameters::Norm(_))
                | (ConnectionType::BatchNorm, LayerParameters::BatchNorm(_))
                | (
                    ConnectionType::Concat
                        | ConnectionType::Sum
                        | ConnectionType::Sub
                        | ConnectionType::Avg
                        | ConnectionType::Product,
                    LayerParameters::Merge(_)
                )
                | (ConnectionType::Biaffine, LayerParameters::Biaffine(_))
                | (ConnectionType::SquaredDistance, LayerParameters::SquaredDistance(_))
                | (ConnectionType::SimpleRecurrent, LayerParameters::SimpleRecurrent(_))
                | (ConnectionType::Gru, LayerParameters::Gru(_))
                | (ConnectionType::Lstm, LayerParameters::Lstm(_))
                | (ConnectionType::Cfn, LayerParameters::Cfn(_))
                | (ConnectionType::Ran, LayerParameters::Ran(_))
                | (ConnectionType::IndRnn, LayerParameters::IndRnn(_))
                | (ConnectionType::Ltm, LayerParameters::Ltm(_))
                | (ConnectionType::DeltaRnn, LayerParameters::DeltaRnn(_))
                | (ConnectionType::Tpr, LayerParameters::Tpr(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activations::functions::ActivationFunction;
    use crate::layers::initializer::Initializer;

    fn is_config_error(result: Result<LayerParameters>) -> bool {
        matches!(
            result,
            Err(LayerError::InvalidConfiguration(_) | LayerError::ShapeMismatch { .. })
        )
    }

    #[test]
    fn test_size_rules() {
        use ConnectionType::*;
        assert!(is_config_error(LayerParametersFactory::build(&[4], 5, Highway, None)));
        assert!(is_config_error(LayerParametersFactory::build(&[4], 3, Norm, None)));
        assert!(is_config_error(LayerParametersFactory::build(&[2, 3], 4, Concat, None)));
        assert!(LayerParametersFactory::build(&[2, 3], 5, Concat, None).is_ok());
        assert!(is_config_error(LayerParametersFactory::build(&[3, 4], 3, Sum, None)));
        assert!(is_config_error(LayerParametersFactory::build(&[3, 3], 4, Avg, None)));
        assert!(is_config_error(LayerParametersFactory::build(&[3, 3, 3], 3, Sub, None)));
        assert!(LayerParametersFactory::build(&[3, 3, 3], 3, Product, None).is_ok());
        assert!(is_config_error(LayerParametersFactory::build(&[3, 3, 3], 2, Biaffine, None)));
        assert!(is_config_error(LayerParametersFactory::build(&[3], 2, SquaredDistance, None)));
        assert!(is_config_error(LayerParametersFactory::build(&[3, 3], 2, Gru, None)));
        assert!(is_config_error(LayerParametersFactory::build(&[3], 3, Sum, None)));
        assert!(is_config_error(LayerParametersFactory::build(&[3], 0, Feedforward, None)));
        assert!(is_config_error(LayerParametersFactory::build(&[4], 3, BatchNorm, None)));
        assert!(LayerParametersFactory::build(&[4], 4, BatchNorm, None).is_ok());
        assert!(is_config_error(LayerParametersFactory::build(&[4], 5, Ltm, None)));
        assert!(is_config_error(LayerParametersFactory::build(&[4, 4], 4, Ltm, None)));
        assert!(LayerParametersFactory::build(&[4], 4, Ltm, None).is_ok());
        assert!(is_config_error(LayerParametersFactory::build(&[3, 3], 2, DeltaRnn, None)));
        assert!(LayerParametersFactory::build(&[3], 5, DeltaRnn, None).is_ok());
        assert!(is_config_error(LayerParametersFactory::build(&[3], 0, Tpr, None)));
        let tpr = LayerParametersFactory::build(&[3], 6, Tpr, None).unwrap();
        assert_eq!(tpr.output_size(), 6);
        assert_eq!(tpr.input_sizes(), vec![3]);
    }

    #[test]
    fn test_initializer_is_applied() {
        let mut init = ParamsInitializer::new(
            Initializer::Constant(0.5),
            Initializer::Constant(-1.0),
        )
        .unwrap();
        let mut params =
            LayerParametersFactory::build(&[3], 2, ConnectionType::Lstm, Some(&mut init)).unwrap();
        assert!(params
            .weights_list()
            .iter()
            .all(|w| w.iter().all(|&v| v == 0.5)));
        assert!(params
            .biases_list()
            .iter()
            .all(|b| b.iter().all(|&v| v == -1.0)));
    }

    #[test]
    fn test_layer_factory_checks() {
        let input = LayerInterface::input(3, InputType::Dense);
        let gru = LayerInterface::layer(2, ConnectionType::Gru, Some(ActivationFunction::Tanh));
        let params = Arc::new(
            LayerParametersFactory::build(&[3], 2, ConnectionType::Gru, None).unwrap(),
        );

        assert!(matches!(
            LayerFactory::build(&input, &gru, params.clone(), 0.0, false),
            Err(LayerError::MissingContextWindow(ConnectionType::Gru))
        ));
        assert!(LayerFactory::build(&input, &gru, params.clone(), 1.0, true).is_err());
        assert!(LayerFactory::build(&input, &gru, params.clone(), -0.1, true).is_err());
        let layer = LayerFactory::build(&input, &gru, params.clone(), 0.2, true).unwrap();
        assert_eq!(layer.connection_type(), ConnectionType::Gru);
        assert!((layer.dropout() - 0.2).abs() < 1e-12);

        let binary = LayerInterface::input(3, InputType::SparseBinary);
        assert!(LayerFactory::build(&binary, &gru, params.clone(), 0.2, true).is_err());
        assert!(LayerFactory::build(&binary, &gru, params.clone(), 0.0, true).is_ok());

        let lstm = LayerInterface::layer(2, ConnectionType::Lstm, None);
        assert!(LayerFactory::build(&input, &lstm, params.clone(), 0.0, true).is_err());
        let wide = LayerInterface::input(4, InputType::Dense);
        assert!(LayerFactory::build(&wide, &gru, params, 0.0, true).is_err());

        for (connection_type, size) in [
            (ConnectionType::Ltm, 3),
            (ConnectionType::DeltaRnn, 2),
            (ConnectionType::Tpr, 4),
        ] {
            let layer = LayerInterface::layer(size, connection_type, Some(ActivationFunction::Tanh));
            let params = Arc::new(
                LayerParametersFactory::build(&[3], size, connection_type, None).unwrap(),
            );
            assert!(matches!(
                LayerFactory::build(&input, &layer, params.clone(), 0.0, false),
                Err(LayerError::MissingContextWindow(t)) if t == connection_type
            ));
            assert!(LayerFactory::build(&input, &layer, params, 0.0, true).is_ok());
        }
        let batch_norm = LayerInterface::layer(3, ConnectionType::BatchNorm, None);
        let norm_params = Arc::new(
            LayerParametersFactory::build(&[3], 3, ConnectionType::Norm, None).unwrap(),
        );
        // 张量形状相同，但参数属于另一种连接类型
        assert!(LayerFactory::build(&input, &batch_norm, norm_params, 0.0, false).is_err());
        let params = Arc::new(
            LayerParametersFactory::build(&[3], 3, ConnectionType::BatchNorm, None).unwrap(),
        );
        assert!(LayerFactory::build(&input, &batch_norm, params, 0.0, false).is_ok());
    }

    #[test]
    fn test_feedforward_needs_no_window() {
        let input = LayerInterface::input(3, InputType::Sparse);
        let ff = LayerInterface::layer(2, ConnectionType::Feedforward, None);
        let params = Arc::new(
            LayerParametersFactory::build(&[3], 2, ConnectionType::Feedforward, None).unwrap(),
        );
        let layer = LayerFactory::build(&input, &ff, params, 0.0, false).unwrap();
        assert!(layer.sparse_input());
    }
}
