pub mod adaptive_delay;
pub mod interval_planner;
pub mod learning;
pub mod notification;
pub mod push_provider;
pub mod quiz_content;
pub mod response_handler;
pub mod schedule;
pub mod scheduler;
pub mod time_window;
pub mod wrong_answers;
