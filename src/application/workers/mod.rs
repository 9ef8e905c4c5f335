pub mod execution_worker;
pub mod fanout_service;
