pub mod assemblyai;
pub mod http_transport;
pub mod local;
pub mod openai;
