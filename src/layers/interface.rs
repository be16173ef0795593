use serde::{Deserialize, Serialize};

use crate::activations::functions::ActivationFunction;
use crate::arrays::input::InputType;

/// 层的连接类型（闭合集合）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    Feedforward,
    Highway,
    Norm,
    BatchNorm,
    Concat,
    Sum,
    Sub,
    Avg,
    Product,
    Biaffine,
    SquaredDistance,
    SimpleRecurrent,
    Gru,
    Lstm,
    Cfn,
    Ran,
    IndRnn,
    Ltm,
    DeltaRnn,
    Tpr,
}

impl ConnectionType {
    /// 循环类型需要读取相邻时间步的同位置层。
    pub fn is_recurrent(self) -> bool {
        matches!(
            self,
            ConnectionType::SimpleRecurrent
                | ConnectionType::Gru
                | ConnectionType::Lstm
                | ConnectionType::Cfn
                | ConnectionType::Ran
                | ConnectionType::IndRnn
                | ConnectionType::Ltm
                | ConnectionType::DeltaRnn
                | ConnectionType::Tpr
        )
    }

    /// 合并类型接收多个输入。
    pub fn is_merge(self) -> bool {
        matches!(
            self,
            ConnectionType::Concat
                | ConnectionType::Sum
                | ConnectionType::Sub
                | ConnectionType::Avg
                | ConnectionType::Product
                | ConnectionType::Biaffine
        )
    }
}

/// 层接口描述：尺寸、输入编码、连接类型与激活函数。
///
/// 一个 N 层的网络需要 N+1 个描述，第一个只描述输入（`connection_type` 为 `None`）。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerInterface {
    pub sizes: Vec<usize>,
    #[serde(default, rename = "type")]
    pub input_type: InputType,
    #[serde(default)]
    pub connection_type: Option<ConnectionType>,
    #[serde(default)]
    pub activation: Option<ActivationFunction>,
}

impl LayerInterface {
    /// 网络输入描述。
    pub fn input(size: usize, input_type: InputType) -> Self {
        Self {
            sizes: vec![size],
            input_type,
            connection_type: None,
            activation: None,
        }
    }

    /// 多输入（合并层之前）的输入描述。
    pub fn merge_input(sizes: Vec<usize>, input_type: InputType) -> Self {
        Self {
            sizes,
            input_type,
            connection_type: None,
            activation: None,
        }
    }

    pub fn layer(
        size: usize,
        connection_type: ConnectionType,
        activation: Option<ActivationFunction>,
    ) -> Self {
        Self {
            sizes: vec![size],
            input_type: InputType::Dense,
            connection_type: Some(connection_type),
            activation,
        }
    }

    /// 第一个尺寸（单输入层即其尺寸）。
    pub fn size(&self) -> usize {
        self.sizes.first().copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_from_json_defaults() {
        let iface: LayerInterface = serde_json::from_str(r#"{"sizes":[4]}"#).unwrap();
        assert_eq!(iface, LayerInterface::input(4, InputType::Dense));

        let iface: LayerInterface = serde_json::from_str(
            r#"{"sizes":[5],"connection_type":"Gru","activation":"Tanh"}"#,
        )
        .unwrap();
        assert_eq!(iface.connection_type, Some(ConnectionType::Gru));
        assert!(iface.connection_type.unwrap().is_recurrent());
    }

    #[test]
    fn test_merge_and_recurrent_sets_are_disjoint() {
        let all = [
            ConnectionType::Feedforward,
            ConnectionType::Highway,
            ConnectionType::Norm,
            ConnectionType::BatchNorm,
            ConnectionType::Concat,
            ConnectionType::Sum,
            ConnectionType::Sub,
            ConnectionType::Avg,
            ConnectionType::Product,
            ConnectionType::Biaffine,
            ConnectionType::SquaredDistance,
            ConnectionType::SimpleRecurrent,
            ConnectionType::Gru,
            ConnectionType::Lstm,
            ConnectionType::Cfn,
            ConnectionType::Ran,
            ConnectionType::IndRnn,
            ConnectionType::Ltm,
            ConnectionType::DeltaRnn,
            ConnectionType::Tpr,
        ];
        assert!(all.iter().all(|t| !(t.is_merge() && t.is_recurrent())));
        assert_eq!(all.iter().filter(|t| t.is_recurrent()).count(), 9);
        assert!(!ConnectionType::BatchNorm.is_recurrent());
    }
}
