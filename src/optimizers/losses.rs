use ndarray::Array1;

use crate::error::{Result, argument, ensure_size};

/// 计算均方误差 (MSE) 损失。
///
/// MSE 定义为 `(1/n) * Σ(predictions - targets)²`。
pub fn mean_squared_error(predictions: &Array1<f64>, targets: &Array1<f64>) -> Result<f64> {
    ensure_size(targets.len(), predictions.len(), "mse predictions")?;
    let diff = predictions - targets;
    Ok(diff.mapv(|v| v.powi(2)).mean().unwrap_or(0.0))
}

/// 均方误差对预测值的导数 `(2/n) * (predictions - targets)`，可直接作为输出误差。
pub fn mean_squared_error_derivative(
    predictions: &Array1<f64>,
    targets: &Array1<f64>,
) -> Result<Array1<f64>> {
    ensure_size(targets.len(), predictions.len(), "mse predictions")?;
    let n = predictions.len() as f64;
    Ok((predictions - targets) * (2.0 / n))
}

fn gold_probability(probabilities: &Array1<f64>, gold: usize) -> Result<f64> {
    let p = *probabilities.get(gold).ok_or_else(|| {
        argument(format!(
            "gold index {gold} out of range for {} classes",
            probabilities.len()
        ))
    })?;
    if !(p > 0.0) {
        return Err(argument(format!(
            "probability of gold class {gold} must be positive, got {p}"
        )));
    }
    Ok(p)
}

/// 交叉熵 `-ln(p[gold])`，`probabilities` 是 softmax 输出。
pub fn cross_entropy(probabilities: &Array1<f64>, gold: usize) -> Result<f64> {
    Ok(-gold_probability(probabilities, gold)?.ln())
}

/// 交叉熵对 softmax 输出的导数：只有 gold 位置为 `-1/p[gold]`。
///
/// 输出层带 Softmax 激活时，层的反向传播会再乘以其雅可比矩阵，结果即 `p - onehot(gold)`。
pub fn cross_entropy_derivative(probabilities: &Array1<f64>, gold: usize) -> Result<Array1<f64>> {
    let p = gold_probability(probabilities, gold)?;
    let mut errors = Array1::zeros(probabilities.len());
    errors[gold] = -1.0 / p;
    Ok(errors)
}
