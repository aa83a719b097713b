mod echo_error;

pub use echo_error::{EchoError, EchoResult};
