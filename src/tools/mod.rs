//! 工具层：注册表、执行器与三个业务工具（文本检索 / 以图搜图 / 支付链接）

pub mod executor;
pub mod payment;
pub mod registry;
pub mod schema;
pub mod search;

pub use executor::{ToolExecutor, ToolOutcome};
pub use payment::{PaymentLinkTool, PaymentUrlBuilder, PAYMENT_TOOL};
pub use registry::{parse_args, Tool, ToolContext, ToolRegistry};
pub use schema::parameters_schema_for;
pub use search::{
    format_search_results, PhotoSearchTool, TextSearchTool, PHOTO_SEARCH_TOOL, TEXT_SEARCH_TOOL,
};
