// Argument marshalling and result decoding

mod decoder;
mod marshaller;
mod session;

pub use decoder::ResultDecoder;
pub use marshaller::Marshaller;
pub use session::InvocationSession;
