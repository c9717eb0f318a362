pub mod authorization_request;
pub mod correlation;
pub mod credential;
pub mod token;
pub mod util;
