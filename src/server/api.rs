pub mod capabilities_response;
pub mod compile_request;
pub mod compile_response;
pub mod error_response;
