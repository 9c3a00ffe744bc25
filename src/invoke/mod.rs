// Invoker construction and execution

mod factory;
mod invoker;

pub use factory::InvokerFactory;
pub use invoker::{DefaultInvoker, Invoker, SessionInvoker};
