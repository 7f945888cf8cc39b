pub mod middleware;
pub mod relay;
pub mod service;
pub mod session;

pub use service::HttpService;
