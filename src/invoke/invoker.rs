// Invokers
//
// An invoker owns everything fixed about one native function: the call
// descriptor, one marshaller per parameter and the result decoder. Both
// strategies are safe to call from many threads at once; all per-call state
// lives on the caller's stack.

use crate::error::{FfiError, Result};
use crate::marshal::{InvocationSession, Marshaller, ResultDecoder};
use crate::native::{CallBuffer, CallDescriptor, NativeInvoker};
use crate::value::Value;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

pub trait Invoker: Send + Sync + fmt::Debug {
    /// Call the native function with `args`, one per declared parameter
    fn invoke(&self, args: &[Value]) -> Result<Value>;

    fn descriptor(&self) -> &CallDescriptor;

    fn requires_session(&self) -> bool;
}

/// The fixed parts shared by both invoker strategies
pub(crate) struct CallPlan {
    pub function: CallDescriptor,
    pub marshallers: SmallVec<[Marshaller; 6]>,
    pub decoder: ResultDecoder,
    pub native: Arc<dyn NativeInvoker>,
}

impl CallPlan {
    fn check_arity(&self, args: &[Value]) -> Result<()> {
        if args.len() != self.marshallers.len() {
            return Err(FfiError::ArgumentCount {
                expected: self.marshallers.len(),
                got: args.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for CallPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPlan")
            .field("function", &self.function)
            .field("marshallers", &self.marshallers.as_slice())
            .field("decoder", &self.decoder)
            .finish()
    }
}

// ==================== Session-free ====================

/// Used when no parameter needs post-invoke work
#[derive(Debug)]
pub struct DefaultInvoker {
    plan: CallPlan,
}

impl DefaultInvoker {
    pub(crate) fn new(plan: CallPlan) -> Self {
        Self { plan }
    }
}

impl Invoker for DefaultInvoker {
    fn invoke(&self, args: &[Value]) -> Result<Value> {
        let plan = &self.plan;
        plan.check_arity(args)?;

        let mut buffer = CallBuffer::new(&plan.function);
        for (i, (marshaller, arg)) in plan.marshallers.iter().zip(args).enumerate() {
            marshaller.marshal(&mut buffer, arg).map_err(|e| e.at_index(i))?;
        }

        let raw = plan.native.invoke(&plan.function, &buffer)?;
        buffer.sync_out()?;
        plan.decoder.decode(raw)
    }

    fn descriptor(&self) -> &CallDescriptor {
        &self.plan.function
    }

    fn requires_session(&self) -> bool {
        false
    }
}

// ==================== Session-based ====================

/// Used when at least one parameter copies native data back after the call
#[derive(Debug)]
pub struct SessionInvoker {
    plan: CallPlan,
}

impl SessionInvoker {
    pub(crate) fn new(plan: CallPlan) -> Self {
        Self { plan }
    }
}

impl Invoker for SessionInvoker {
    fn invoke(&self, args: &[Value]) -> Result<Value> {
        let plan = &self.plan;
        plan.check_arity(args)?;

        let mut session = InvocationSession::new();
        let mut buffer = CallBuffer::new(&plan.function);
        for (i, (marshaller, arg)) in plan.marshallers.iter().zip(args).enumerate() {
            marshaller
                .marshal_with_session(&mut buffer, &mut session, arg)
                .map_err(|e| e.at_index(i))?;
        }

        let raw = plan.native.invoke(&plan.function, &buffer)?;
        buffer.sync_out()?;
        session.finish()?;
        plan.decoder.decode(raw)
    }

    fn descriptor(&self) -> &CallDescriptor {
        &self.plan.function
    }

    fn requires_session(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{NativeType, RawValue};
    use crate::platform::{Platform, WordSize};
    use crate::types::{CallingConvention, ElementType, ParameterSpec, ReturnSpec, SemanticType};
    use parking_lot::Mutex;

    /// Records the slots it was called with and answers with a fixed value
    struct Recorder {
        result: RawValue,
        seen: Mutex<usize>,
    }

    impl Recorder {
        fn new(result: RawValue) -> Arc<Self> {
            Arc::new(Self {
                result,
                seen: Mutex::new(0),
            })
        }
    }

    impl NativeInvoker for Recorder {
        fn invoke_int(&self, _function: &CallDescriptor, buffer: &CallBuffer) -> Result<i32> {
            *self.seen.lock() = buffer.len();
            match self.result {
                RawValue::Int32(n) => Ok(n),
                _ => Ok(0),
            }
        }

        fn invoke_long(&self, _function: &CallDescriptor, _buffer: &CallBuffer) -> Result<i64> {
            Err(FfiError::NativeFailure("unexpected long call".into()))
        }

        fn invoke_float(&self, _function: &CallDescriptor, _buffer: &CallBuffer) -> Result<f32> {
            Err(FfiError::NativeFailure("unexpected float call".into()))
        }

        fn invoke_double(&self, _function: &CallDescriptor, _buffer: &CallBuffer) -> Result<f64> {
            Err(FfiError::NativeFailure("unexpected double call".into()))
        }

        fn invoke_address(&self, _function: &CallDescriptor, buffer: &CallBuffer) -> Result<usize> {
            *self.seen.lock() = buffer.len();
            match self.result {
                RawValue::Address(a) => Ok(a),
                _ => Ok(0),
            }
        }
    }

    fn plan(params: &[ParameterSpec], ret: SemanticType, native: Arc<dyn NativeInvoker>) -> CallPlan {
        let platform = Platform::new(WordSize::W32, WordSize::W32);
        let marshallers: SmallVec<[Marshaller; 6]> = params
            .iter()
            .map(|p| Marshaller::resolve(p, platform, None).unwrap())
            .collect();
        let decoder = ResultDecoder::resolve(&ReturnSpec::new(ret), platform, None, 0x1000).unwrap();
        let function = CallDescriptor::new(
            0x1000,
            decoder.native_type(),
            marshallers.iter().map(Marshaller::native_type),
            CallingConvention::Default,
            false,
        );
        CallPlan {
            function,
            marshallers,
            decoder,
            native,
        }
    }

    #[test]
    fn test_default_invoker_round_trip() {
        let native = Recorder::new(RawValue::Int32(3));
        let invoker = DefaultInvoker::new(plan(
            &[ParameterSpec::input(SemanticType::Int32), ParameterSpec::input(SemanticType::Int8)],
            SemanticType::Int32,
            native.clone(),
        ));
        assert_eq!(invoker.invoke(&[Value::Int32(1), Value::Int8(2)]).unwrap(), Value::Int32(3));
        assert_eq!(*native.seen.lock(), 2);
        assert_eq!(invoker.descriptor().param_types(), &[NativeType::SInt32, NativeType::SInt8]);
    }

    #[test]
    fn test_argument_count_checked() {
        let invoker = DefaultInvoker::new(plan(
            &[ParameterSpec::input(SemanticType::Int32)],
            SemanticType::Void,
            Recorder::new(RawValue::Void),
        ));
        assert!(matches!(
            invoker.invoke(&[]),
            Err(FfiError::ArgumentCount { expected: 1, got: 0 })
        ));
        assert!(matches!(
            invoker.invoke(&[Value::Int32(1), Value::Int32(2)]),
            Err(FfiError::ArgumentCount { expected: 1, got: 2 })
        ));
    }

    #[test]
    fn test_argument_errors_report_position() {
        let invoker = DefaultInvoker::new(plan(
            &[ParameterSpec::input(SemanticType::Int32), ParameterSpec::input(SemanticType::Float64)],
            SemanticType::Void,
            Recorder::new(RawValue::Void),
        ));
        let err = invoker.invoke(&[Value::Int32(1), Value::string("x")]).unwrap_err();
        assert!(matches!(err, FfiError::InvalidArgument { index: 1, .. }));

        // the invoker is unaffected by the failed call
        assert!(invoker.invoke(&[Value::Int32(1), Value::Float64(2.0)]).is_ok());
    }

    #[test]
    fn test_session_invoker_runs_post_invoke() {
        let (longs, values) = Value::long_array(vec![5, 6]);
        let invoker = SessionInvoker::new(plan(
            &[ParameterSpec::in_out(SemanticType::Array(ElementType::Long))],
            SemanticType::Void,
            Recorder::new(RawValue::Void),
        ));
        assert!(invoker.requires_session());
        assert_eq!(invoker.invoke(&[longs]).unwrap(), Value::Null);
        assert_eq!(*values.lock(), vec![5, 6]);
    }

    #[test]
    fn test_native_failure_passes_through() {
        let invoker = DefaultInvoker::new(plan(&[], SemanticType::Float64, Recorder::new(RawValue::Void)));
        assert!(matches!(invoker.invoke(&[]), Err(FfiError::NativeFailure(_))));
    }
}
