// 设备模块 - 设备抽象
// Device abstractions built on top of the communication drivers

pub mod mightyzap;

// 重新导出主要类型，方便外部使用
pub use mightyzap::{RegisterClient, ZapError};
