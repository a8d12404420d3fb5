pub mod actuator;
pub mod correlation;
pub mod http_server;
pub mod relay;
