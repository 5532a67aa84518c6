//! 错误处理模块
//!
//! 统一的错误类型、错误代码分类以及批量操作的聚合错误

pub mod code;
pub mod services_error;

pub use code::{ErrorCategory, ErrorCode};
pub use services_error::{
    AggregateError, BoxError, Failure, NotFoundKind, Result, ServicesError,
};
