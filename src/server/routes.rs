mod get_capabilities;
mod get_health;
mod post_compile;

pub use get_capabilities::get_capabilities;
pub use get_health::get_health;
pub use post_compile::post_compile;
