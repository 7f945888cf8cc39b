//! 抽取层 (Extraction Layer)
//!
//! 对任意站点 HTML 的启发式抽取：详情页元数据、章节列表、正文与图源。
//! 选择器与模式表都是数据，控制流对所有站点一致。

pub mod chapters;
pub mod content;
pub mod images;
pub mod metadata;

pub use images::ImageFilter;
