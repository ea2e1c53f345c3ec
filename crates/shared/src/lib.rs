mod error;
pub use error::{AppError, ErrorKind};

mod env;
pub use env::APP_ENV;
