//! Time windowing: alignment units and range splitting

pub mod splitter;
pub mod unit;

pub use splitter::PeriodSplitter;
pub use unit::TimeUnit;
