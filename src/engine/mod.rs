pub mod metrics;
pub mod position;
pub mod resolution;
pub mod strike;
pub mod trader;
