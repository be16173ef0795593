use super::traits::Activation;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// 对数组中的每个元素应用 sigmoid 函数。
///
/// Sigmoid 定义为 `1 / (1 + exp(-x))`。
pub fn sigmoid(x: &Array1<f64>) -> Array1<f64> {
    x.mapv(|v| 1.0 / (1.0 + (-v).exp()))
}

/// 计算 sigmoid 函数的导数。
///
/// 导数定义为 `sigmoid(x) * (1 - sigmoid(x))`。
pub fn sigmoid_derivative(x: &Array1<f64>) -> Array1<f64> {
    let s = sigmoid(x);
    s.mapv(|v| v * (1.0 - v))
}

/// 对数组中的每个元素应用双曲正切 (tanh) 函数。
pub fn tanh(x: &Array1<f64>) -> Array1<f64> {
    x.mapv(|v| v.tanh())
}

/// 计算 tanh 函数的导数。
///
/// 导数定义为 `1 - tanh(x)^2`。
pub fn tanh_derivative(x: &Array1<f64>) -> Array1<f64> {
    let t = tanh(x);
    t.mapv(|v| 1.0 - v.powi(2))
}

pub fn relu(x: &Array1<f64>) -> Array1<f64> {
    x.mapv(|v| v.max(0.0))
}

pub fn relu_derivative(x: &Array1<f64>) -> Array1<f64> {
    x.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
}

/// Softsign 定义为 `x / (1 + |x|)`。
pub fn softsign(x: &Array1<f64>) -> Array1<f64> {
    x.mapv(|v| v / (1.0 + v.abs()))
}

pub fn softsign_derivative(x: &Array1<f64>) -> Array1<f64> {
    x.mapv(|v| 1.0 / (1.0 + v.abs()).powi(2))
}

/// 数值稳定的 softmax：先减去最大值再取指数。
pub fn softmax(x: &Array1<f64>) -> Array1<f64> {
    let max = x.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    let exp = x.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}

/// softmax 的雅可比矩阵 `J[i][j] = s_i * (δ_ij - s_j)`。
pub fn softmax_jacobian(x: &Array1<f64>) -> Array2<f64> {
    let s = softmax(x);
    let n = s.len();
    Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            s[i] * (1.0 - s[j])
        } else {
            -s[i] * s[j]
        }
    })
}

/// 可序列化的激活函数集合，供层配置使用。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationFunction {
    Sigmoid,
    Tanh,
    ReLU,
    Softsign,
    Softmax,
}

impl Activation for ActivationFunction {
    fn forward(&self, x: &Array1<f64>) -> Array1<f64> {
        match self {
            ActivationFunction::Sigmoid => sigmoid(x),
            ActivationFunction::Tanh => tanh(x),
            ActivationFunction::ReLU => relu(x),
            ActivationFunction::Softsign => softsign(x),
            ActivationFunction::Softmax => softmax(x),
        }
    }

    fn derivative(&self, x: &Array1<f64>) -> Array1<f64> {
        match self {
            ActivationFunction::Sigmoid => sigmoid_derivative(x),
            ActivationFunction::Tanh => tanh_derivative(x),
            ActivationFunction::ReLU => relu_derivative(x),
            ActivationFunction::Softsign => softsign_derivative(x),
            ActivationFunction::Softmax => {
                let s = softmax(x);
                s.mapv(|v| v * (1.0 - v))
            }
        }
    }

    fn jacobian(&self, x: &Array1<f64>) -> Option<Array2<f64>> {
        match self {
            ActivationFunction::Softmax => Some(softmax_jacobian(x)),
            _ => None,
        }
    }
}
