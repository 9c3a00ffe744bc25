// Invocation Session
//
// Call-scoped list of post-invoke actions. Marshallers that hand native code a
// temporary copy of caller data register an action here to copy the native
// contents back once the call has returned.

use crate::error::Result;
use smallvec::SmallVec;
use std::fmt;

type PostInvoke = Box<dyn FnOnce() -> Result<()> + Send>;

#[derive(Default)]
pub struct InvocationSession {
    deferred: SmallVec<[PostInvoke; 4]>,
}

impl InvocationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_post_invoke(&mut self, action: impl FnOnce() -> Result<()> + Send + 'static) {
        self.deferred.push(Box::new(action));
    }

    pub fn len(&self) -> usize {
        self.deferred.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deferred.is_empty()
    }

    /// Run every deferred action in registration order.
    /// Consumes the session so it can only ever run once.
    pub fn finish(self) -> Result<()> {
        let count = self.deferred.len();
        for (i, action) in self.deferred.into_iter().enumerate() {
            log::trace!("post-invoke action {}/{}", i + 1, count);
            action()?;
        }
        Ok(())
    }
}

impl fmt::Debug for InvocationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InvocationSession({} deferred)", self.deferred.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FfiError;
    use crate::value::shared;

    #[test]
    fn test_runs_in_order() {
        let log = shared(Vec::new());
        let mut session = InvocationSession::new();
        for i in 0..3 {
            let log = log.clone();
            session.add_post_invoke(move || {
                log.lock().push(i);
                Ok(())
            });
        }
        assert_eq!(session.len(), 3);
        session.finish().unwrap();
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_stops_at_first_failure() {
        let ran = shared(false);
        let mut session = InvocationSession::new();
        session.add_post_invoke(|| Err(FfiError::Memory("gone".into())));
        let flag = ran.clone();
        session.add_post_invoke(move || {
            *flag.lock() = true;
            Ok(())
        });
        assert!(session.finish().is_err());
        assert!(!*ran.lock());
    }

    #[test]
    fn test_empty_session() {
        let session = InvocationSession::new();
        assert!(session.is_empty());
        assert!(session.finish().is_ok());
    }
}
