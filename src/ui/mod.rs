//! 终端用户界面模块

pub mod progress;

pub use progress::{Ui, get_multi};
