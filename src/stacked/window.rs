use crate::stacked::recurrent::RecurrentStackedLayers;

/// 相邻时间步的整个层栈。序列边界处返回 `None`。
pub trait StatesWindow {
    fn prev_state(&self) -> Option<&RecurrentStackedLayers>;

    fn next_state(&self) -> Option<&RecurrentStackedLayers>;
}

/// 单独执行的一步，或序列只有一个时间步。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStates;

impl StatesWindow for NoStates {
    fn prev_state(&self) -> Option<&RecurrentStackedLayers> {
        None
    }

    fn next_state(&self) -> Option<&RecurrentStackedLayers> {
        None
    }
}

/// 借用序列中前后两个时间步构成的窗口。
#[derive(Clone, Copy, Default)]
pub struct SequenceWindow<'a> {
    prev: Option<&'a RecurrentStackedLayers>,
    next: Option<&'a RecurrentStackedLayers>,
}

impl<'a> SequenceWindow<'a> {
    pub fn new(
        prev: Option<&'a RecurrentStackedLayers>,
        next: Option<&'a RecurrentStackedLayers>,
    ) -> Self {
        Self { prev, next }
    }
}

impl StatesWindow for SequenceWindow<'_> {
    fn prev_state(&self) -> Option<&RecurrentStackedLayers> {
        self.prev
    }

    fn next_state(&self) -> Option<&RecurrentStackedLayers> {
        self.next
    }
}
