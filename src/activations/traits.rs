use ndarray::{Array1, Array2};

/// 定义激活函数的通用接口。
pub trait Activation {
    /// 对输入执行前向传播。
    fn forward(&self, x: &Array1<f64>) -> Array1<f64>;

    /// 计算激活函数关于其输入的导数（逐元素，`x` 为激活前的值）。
    fn derivative(&self, x: &Array1<f64>) -> Array1<f64>;

    /// 输出之间相互耦合的激活函数（如 softmax）返回完整的雅可比矩阵。
    fn jacobian(&self, _x: &Array1<f64>) -> Option<Array2<f64>> {
        None
    }
}
