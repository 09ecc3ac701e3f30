pub mod context;
pub mod model;
pub mod order;
pub mod task;
pub mod engine;
pub mod node;
pub mod registry;
pub mod storage;
pub mod redis_storage;
pub mod task_service;
pub mod interceptor;
pub mod transaction;
