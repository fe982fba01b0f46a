pub mod async_task;

pub use async_task::ExponentialBackoff;
