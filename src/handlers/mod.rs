mod generate;
mod health;
mod metrics;
mod rate_limit;

pub use generate::generate_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use rate_limit::{client_ip, rate_limit};
