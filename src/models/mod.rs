pub mod order;
pub mod position;
pub mod signal;
pub mod tick;
