pub mod decode;
pub mod documents;
pub mod error;
pub mod framing;
pub mod params;
pub mod pending;
pub mod protocol;
pub mod session;
pub mod types;

pub use error::{LspError, RequestFailure};
pub use framing::{LspFraming, LspFramingError};
pub use session::{ClientSession, DecodeMode, SessionEvent, SessionOptions, SessionState};
pub use types::DecodedResult;
