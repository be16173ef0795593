use ndarray::Array1;

use crate::layers::layer::Layer;

/// 相邻时间步中同一位置的层。序列边界处返回 `None`。
pub trait LayersWindow {
    fn prev_state(&self) -> Option<&Layer>;

    fn next_state(&self) -> Option<&Layer>;

    /// 上一状态的输出 `yPrev`。
    fn prev_output(&self) -> Option<&Array1<f64>> {
        self.prev_state().map(Layer::output_values)
    }
}

/// 没有相邻时间步（非循环层，或单独执行的一步）。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoWindow;

impl LayersWindow for NoWindow {
    fn prev_state(&self) -> Option<&Layer> {
        None
    }

    fn next_state(&self) -> Option<&Layer> {
        None
    }
}

/// 借用相邻层构成的窗口。
#[derive(Clone, Copy, Default)]
pub struct LayerWindow<'a> {
    pub prev: Option<&'a Layer>,
    pub next: Option<&'a Layer>,
}

impl<'a> LayerWindow<'a> {
    pub fn new(prev: Option<&'a Layer>, next: Option<&'a Layer>) -> Self {
        Self { prev, next }
    }
}

impl LayersWindow for LayerWindow<'_> {
    fn prev_state(&self) -> Option<&Layer> {
        self.prev
    }

    fn next_state(&self) -> Option<&Layer> {
        self.next
    }
}
