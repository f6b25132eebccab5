pub mod platforms;
pub mod publish;
pub mod request;
