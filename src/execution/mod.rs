pub mod order_executor;
pub mod outcome_tracker;
