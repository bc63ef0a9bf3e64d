//! 测试套件模块

pub mod dead_letter;
pub mod dispatch;
pub mod ordering;
