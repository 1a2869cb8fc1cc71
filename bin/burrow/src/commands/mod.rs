pub mod expose;
pub mod serve;
pub mod server;
