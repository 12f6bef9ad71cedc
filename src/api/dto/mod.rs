//! Data Transfer Objects for REST request/response serialization.

pub mod analyzer_dto;
pub mod common_dto;
pub mod crawler_dto;
pub mod notification_dto;

pub use analyzer_dto::*;
pub use common_dto::*;
pub use crawler_dto::*;
pub use notification_dto::*;
