pub mod am_client;
pub mod am_client_mock;
