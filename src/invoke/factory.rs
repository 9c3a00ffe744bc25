// Invoker Factory
//
// Resolves a signature into a call descriptor, marshallers and a decoder, then
// picks the invoker strategy. Built invokers are cached per function address
// and signature until `clear_cache`; the cache never evicts on its own.

use super::invoker::{CallPlan, DefaultInvoker, Invoker, SessionInvoker};
use crate::config::LibraryOptions;
use crate::error::Result;
use crate::marshal::{Marshaller, ResultDecoder};
use crate::native::{CallDescriptor, LibffiInvoker, NativeInvoker, NativeLibrary};
use crate::platform::Platform;
use crate::types::SignatureDescriptor;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Function address -> signature -> invoker, so lookups borrow the signature
type InvokerCache = FxHashMap<usize, FxHashMap<SignatureDescriptor, Arc<dyn Invoker>>>;

pub struct InvokerFactory {
    platform: Platform,
    native: Arc<dyn NativeInvoker>,
    options: LibraryOptions,
    cache: Mutex<InvokerCache>,
}

impl InvokerFactory {
    /// Factory for the host platform dispatching through libffi
    pub fn new(options: LibraryOptions) -> Self {
        Self::with_native(Arc::new(LibffiInvoker::new()), Platform::host(), options)
    }

    pub fn with_native(native: Arc<dyn NativeInvoker>, platform: Platform, options: LibraryOptions) -> Self {
        Self {
            platform: options.platform(platform),
            native,
            options,
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// Process-wide factory with default options
    pub fn global() -> &'static Self {
        static FACTORY: OnceLock<InvokerFactory> = OnceLock::new();
        FACTORY.get_or_init(|| Self::new(LibraryOptions::default()))
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn options(&self) -> &LibraryOptions {
        &self.options
    }

    /// Build (or fetch from cache) the invoker for the function at `address`
    pub fn build_invoker(&self, address: usize, signature: &SignatureDescriptor) -> Result<Arc<dyn Invoker>> {
        let cached = self
            .cache
            .lock()
            .get(&address)
            .and_then(|by_signature| by_signature.get(signature))
            .cloned();
        if let Some(invoker) = cached {
            log::debug!("invoker cache hit for {:#x}", address);
            return Ok(invoker);
        }

        let invoker = self.create_invoker(address, signature)?;
        // Another thread may have built the same invoker meanwhile; keep the first
        let invoker = self
            .cache
            .lock()
            .entry(address)
            .or_default()
            .entry(signature.clone())
            .or_insert(invoker)
            .clone();
        Ok(invoker)
    }

    /// Resolve `name` in `library` through the function mapper, then build its invoker
    pub fn build_library_invoker(
        &self,
        library: &NativeLibrary,
        name: &str,
        signature: &SignatureDescriptor,
    ) -> Result<Arc<dyn Invoker>> {
        let symbol = self.options.symbol_name(name);
        let address = library.find_symbol_address(&symbol)?;
        self.build_invoker(address, signature)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().values().map(|by_signature| by_signature.len()).sum()
    }

    /// Drop every cached invoker. Invokers already handed out stay usable.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    fn create_invoker(&self, address: usize, signature: &SignatureDescriptor) -> Result<Arc<dyn Invoker>> {
        let type_mapper = self.options.type_mapper();

        let marshallers = signature
            .params
            .iter()
            .enumerate()
            .map(|(i, spec)| Marshaller::resolve(spec, self.platform, type_mapper).map_err(|e| e.at_index(i)))
            .collect::<Result<SmallVec<[Marshaller; 6]>>>()?;
        let decoder = ResultDecoder::resolve(&signature.ret, self.platform, type_mapper, address)?;

        let function = CallDescriptor::new(
            address,
            decoder.native_type(),
            marshallers.iter().map(Marshaller::native_type),
            self.options.convention_for(&signature.options),
            self.options.save_errno_for(&signature.options),
        );

        let session = marshallers.iter().any(Marshaller::requires_session);
        log::debug!(
            "built {} invoker for {:#x} ({} params)",
            if session { "session" } else { "default" },
            address,
            marshallers.len()
        );

        let plan = CallPlan {
            function,
            marshallers,
            decoder,
            native: self.native.clone(),
        };
        Ok(if session {
            Arc::new(SessionInvoker::new(plan))
        } else {
            Arc::new(DefaultInvoker::new(plan))
        })
    }
}

impl fmt::Debug for InvokerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokerFactory")
            .field("platform", &self.platform)
            .field("options", &self.options)
            .field("cached", &self.cached_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FfiError;
    use crate::platform::WordSize;
    use crate::types::{CallingConvention, ElementType, ParameterSpec, SemanticType};

    fn factory(long_size: WordSize) -> InvokerFactory {
        InvokerFactory::with_native(
            Arc::new(LibffiInvoker),
            Platform::new(long_size, WordSize::W64),
            LibraryOptions::default(),
        )
    }

    #[test]
    fn test_strategy_selection() {
        let f = factory(WordSize::W64);
        let plain = SignatureDescriptor::new(SemanticType::Bool)
            .param(ParameterSpec::input(SemanticType::Int32))
            .param(ParameterSpec::in_out(SemanticType::Array(ElementType::Int32)));
        assert!(!f.build_invoker(0x1000, &plain).unwrap().requires_session());

        let with_buffer = SignatureDescriptor::new(SemanticType::Void).param(ParameterSpec::new(SemanticType::StringBuffer));
        assert!(f.build_invoker(0x1000, &with_buffer).unwrap().requires_session());
    }

    #[test]
    fn test_long_array_strategy_depends_on_platform() {
        let sig = SignatureDescriptor::new(SemanticType::Void)
            .param(ParameterSpec::in_out(SemanticType::Array(ElementType::Long)));
        assert!(factory(WordSize::W32).build_invoker(0x1000, &sig).unwrap().requires_session());
        assert!(!factory(WordSize::W64).build_invoker(0x1000, &sig).unwrap().requires_session());
    }

    #[test]
    fn test_descriptor_matches_marshallers() {
        let f = factory(WordSize::W32);
        let sig = SignatureDescriptor::new(SemanticType::Long)
            .param(ParameterSpec::input(SemanticType::Long))
            .param(ParameterSpec::input(SemanticType::Long).long_long())
            .param(ParameterSpec::input(SemanticType::String))
            .stdcall()
            .save_errno();
        let invoker = f.build_invoker(0x2000, &sig).unwrap();
        let d = invoker.descriptor();
        use crate::native::NativeType::*;
        assert_eq!(d.param_types(), &[SInt32, SInt64, Address]);
        assert_eq!(d.return_type(), SInt32);
        assert_eq!(d.convention(), CallingConvention::Stdcall);
        assert!(d.save_errno());
        assert_eq!(d.address(), 0x2000);
    }

    #[test]
    fn test_cache_per_address_and_signature() {
        let f = factory(WordSize::W64);
        let sig = SignatureDescriptor::new(SemanticType::Int32).param(ParameterSpec::input(SemanticType::Int32));
        let a = f.build_invoker(0x1000, &sig).unwrap();
        let b = f.build_invoker(0x1000, &sig).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = f.build_invoker(0x3000, &sig).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(f.cached_len(), 2);

        let other = SignatureDescriptor::new(SemanticType::Int32).param(ParameterSpec::input(SemanticType::Int8));
        let d = f.build_invoker(0x1000, &other).unwrap();
        assert!(!Arc::ptr_eq(&a, &d));
        assert_eq!(f.cached_len(), 3);

        f.clear_cache();
        assert_eq!(f.cached_len(), 0);
    }

    #[test]
    fn test_construction_failures_are_not_cached() {
        let f = factory(WordSize::W64);
        let sig = SignatureDescriptor::new(SemanticType::Void)
            .param(ParameterSpec::input(SemanticType::Int32))
            .param(ParameterSpec::input(SemanticType::Custom(Arc::from("Handle"))));
        let err = f.build_invoker(0x1000, &sig).unwrap_err();
        assert!(matches!(err, FfiError::UnsupportedParameterType { index: 1, .. }));

        let sig = SignatureDescriptor::new(SemanticType::StringArray);
        assert!(matches!(
            f.build_invoker(0x1000, &sig),
            Err(FfiError::UnsupportedReturnType { .. })
        ));
        assert_eq!(f.cached_len(), 0);
    }

    #[test]
    fn test_global_factory_is_shared() {
        assert!(std::ptr::eq(InvokerFactory::global(), InvokerFactory::global()));
        assert_eq!(InvokerFactory::global().platform(), Platform::host());
    }
}
