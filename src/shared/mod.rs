pub mod logs;
pub mod thread_pool;
