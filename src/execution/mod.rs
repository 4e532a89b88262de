// Order execution module
pub mod gateway;
pub mod rules;

pub use gateway::{ExecutionGateway, OrderFill};
pub use rules::{round_to_step, RulesCache};
