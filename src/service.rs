pub mod probe;
pub mod report;
pub mod sweeper;
pub mod validator;
pub mod verifier;
