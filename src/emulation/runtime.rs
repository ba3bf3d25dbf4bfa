//! The block IR interpreter.
//!
//! One [`Runtime`] owns the heap, the static fields and the native registry for a single
//! main module plus the modules its [`Resolver`] knows. Methods are loaded lazily and cached
//! per `(module, token)`.
//!
//! Exception handling follows the ordered handler table of each body. An exception raised in
//! block `b` is offered to the handlers protecting `b` in table order; finally and fault
//! handlers on the way run as nested executions that must end in `endfinally`. A `leave`
//! runs, in table order, the finally handlers whose protected region contains the source
//! block but not the target.

use std::{
    collections::{HashMap, HashSet},
    rc::Rc,
};

use crate::{
    assembly::{BlockId, BranchKind, Instruction, MethodBody, Terminator},
    emulation::{
        EmValue, EmulationError, HeapObject, HeapRef, ManagedHeap, MemberHandle, NativeCall,
        NativeRegistry, NativeResult, ValueCell,
    },
    metadata::{
        module::Module,
        signatures::{TypeRef, TypeSig},
        token::Token,
    },
    resolver::Resolver,
    weaver::contract::{self, MEMBER_INFO, SYSTEM_MODULE},
    Result,
};

/// Bounds on a single runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeLimits {
    /// Maximum nesting of calls
    pub max_call_depth: usize,
    /// Maximum instructions executed over the lifetime of the runtime
    pub max_instructions: u64,
    /// Maximum heap objects
    pub max_heap_objects: usize,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        RuntimeLimits {
            max_call_depth: 256,
            max_instructions: 10_000_000,
            max_heap_objects: 1_000_000,
        }
    }
}

/// How a top-level call completed
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Normal completion, with the return value of non-void methods
    Returned(Option<EmValue>),
    /// A managed exception escaped the call
    Threw(EmValue),
}

impl Outcome {
    /// The returned value
    #[must_use]
    pub fn value(&self) -> Option<&EmValue> {
        match self {
            Outcome::Returned(Some(value)) => Some(value),
            _ => None,
        }
    }

    /// The escaped exception
    #[must_use]
    pub fn exception(&self) -> Option<&EmValue> {
        match self {
            Outcome::Threw(exception) => Some(exception),
            Outcome::Returned(_) => None,
        }
    }
}

#[derive(Debug)]
struct LoadedMethod {
    name: String,
    module: String,
    has_this: bool,
    arity: usize,
    returns_value: bool,
    body: MethodBody,
}

struct Frame {
    method: Rc<LoadedMethod>,
    args: Vec<ValueCell>,
    locals: Vec<ValueCell>,
    stack: Vec<EmValue>,
    caught: Vec<HeapRef>,
}

impl Frame {
    fn pop(&mut self) -> std::result::Result<EmValue, EmulationError> {
        self.stack
            .pop()
            .ok_or_else(|| EmulationError::StackUnderflow(self.method.name.clone()))
    }

    fn pop_n(&mut self, count: usize) -> std::result::Result<Vec<EmValue>, EmulationError> {
        if self.stack.len() < count {
            return Err(EmulationError::StackUnderflow(self.method.name.clone()));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn arg(&self, index: u16) -> std::result::Result<&ValueCell, EmulationError> {
        self.args.get(usize::from(index)).ok_or(EmulationError::InvalidIndex {
            kind: "argument",
            index: usize::from(index),
        })
    }

    fn local(&self, index: u16) -> std::result::Result<&ValueCell, EmulationError> {
        self.locals.get(usize::from(index)).ok_or(EmulationError::InvalidIndex {
            kind: "local",
            index: usize::from(index),
        })
    }
}

enum Exit {
    Return(Option<EmValue>),
    Throw(HeapRef),
    EndFinally,
}

enum Flow {
    Goto(BlockId),
    Exit(Exit),
}

enum Step {
    Next,
    Raise(HeapRef),
}

enum Completion {
    Normal(Option<EmValue>),
    Exception(HeapRef),
}

impl From<Completion> for Outcome {
    fn from(completion: Completion) -> Self {
        match completion {
            Completion::Normal(value) => Outcome::Returned(value),
            Completion::Exception(exception) => Outcome::Threw(EmValue::ObjectRef(exception)),
        }
    }
}

#[derive(Clone, Copy)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    fn of(instruction: &Instruction) -> Option<Self> {
        Some(match instruction {
            Instruction::Add => BinaryOp::Add,
            Instruction::Sub => BinaryOp::Sub,
            Instruction::Mul => BinaryOp::Mul,
            Instruction::Div => BinaryOp::Div,
            Instruction::Rem => BinaryOp::Rem,
            Instruction::And => BinaryOp::And,
            Instruction::Or => BinaryOp::Or,
            Instruction::Xor => BinaryOp::Xor,
            _ => return None,
        })
    }

    fn int32(self, a: i32, b: i32) -> Option<i32> {
        match self {
            BinaryOp::Add => Some(a.wrapping_add(b)),
            BinaryOp::Sub => Some(a.wrapping_sub(b)),
            BinaryOp::Mul => Some(a.wrapping_mul(b)),
            BinaryOp::Div => a.checked_div(b),
            BinaryOp::Rem => a.checked_rem(b),
            BinaryOp::And => Some(a & b),
            BinaryOp::Or => Some(a | b),
            BinaryOp::Xor => Some(a ^ b),
        }
    }

    fn int64(self, a: i64, b: i64) -> Option<i64> {
        match self {
            BinaryOp::Add => Some(a.wrapping_add(b)),
            BinaryOp::Sub => Some(a.wrapping_sub(b)),
            BinaryOp::Mul => Some(a.wrapping_mul(b)),
            BinaryOp::Div => a.checked_div(b),
            BinaryOp::Rem => a.checked_rem(b),
            BinaryOp::And => Some(a & b),
            BinaryOp::Or => Some(a | b),
            BinaryOp::Xor => Some(a ^ b),
        }
    }

    fn float(self, a: f64, b: f64) -> Option<f64> {
        match self {
            BinaryOp::Add => Some(a + b),
            BinaryOp::Sub => Some(a - b),
            BinaryOp::Mul => Some(a * b),
            BinaryOp::Div => Some(a / b),
            BinaryOp::Rem => Some(a % b),
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => None,
        }
    }
}

/// Interpreter over the modules of a [`Resolver`]
pub struct Runtime {
    resolver: Resolver,
    main: String,
    heap: ManagedHeap,
    statics: HashMap<(String, String), EmValue>,
    initialized: HashSet<String>,
    natives: NativeRegistry,
    methods: HashMap<(String, Token), Rc<LoadedMethod>>,
    limits: RuntimeLimits,
    depth: usize,
    executed: u64,
}

impl Runtime {
    /// A runtime executing `module`, resolving its references through `resolver`
    #[must_use]
    pub fn new(module: Module, mut resolver: Resolver) -> Self {
        let limits = RuntimeLimits::default();
        let main = module.name.clone();
        resolver.add_module(module);
        Runtime {
            resolver,
            main,
            heap: ManagedHeap::new(limits.max_heap_objects),
            statics: HashMap::new(),
            initialized: HashSet::new(),
            natives: NativeRegistry::with_builtins(),
            methods: HashMap::new(),
            limits,
            depth: 0,
            executed: 0,
        }
    }

    /// Replaces the limits; intended before the first call since the heap is reset
    #[must_use]
    pub fn with_limits(mut self, limits: RuntimeLimits) -> Self {
        self.heap = ManagedHeap::new(limits.max_heap_objects);
        self.limits = limits;
        self
    }

    /// The main module
    #[must_use]
    pub fn module(&self) -> Option<&Module> {
        self.resolver.module(&self.main)
    }

    /// The native registry, for registering test doubles
    pub fn natives_mut(&mut self) -> &mut NativeRegistry {
        &mut self.natives
    }

    /// The heap
    #[must_use]
    pub fn heap(&self) -> &ManagedHeap {
        &self.heap
    }

    /// Instructions executed so far
    #[must_use]
    pub fn instructions_executed(&self) -> u64 {
        self.executed
    }

    /// Calls static method `method` of type `type_name` in the main module
    ///
    /// # Errors
    /// Returns [`crate::Error::Emulation`] if the type or method does not exist or the
    /// interpreter faults. Managed exceptions are reported as [`Outcome::Threw`].
    pub fn call_static(
        &mut self,
        type_name: &str,
        method: &str,
        args: Vec<EmValue>,
    ) -> Result<Outcome> {
        let ty = self.resolve_type(&self.main, &TypeRef::local(type_name))?;
        if let Some(exception) = self.ensure_initialized(&ty)? {
            return Ok(Completion::Exception(exception).into());
        }
        Ok(self.dispatch(&ty, method, args, false)?.into())
    }

    /// Calls instance method `method` on `this` with virtual dispatch
    ///
    /// # Errors
    /// Same as [`Runtime::call_static`].
    pub fn call_virtual(&mut self, this: EmValue, method: &str, args: Vec<EmValue>) -> Result<Outcome> {
        if this.is_null() {
            let exception = self.new_exception("System.NullReferenceException", "Object reference not set")?;
            return Ok(Completion::Exception(exception).into());
        }
        let ty = self.runtime_type(&this)?;
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(this);
        full.extend(args);
        Ok(self.dispatch(&ty, method, full, true)?.into())
    }

    /// Creates an instance of `type_name` in the main module through its constructor
    ///
    /// # Errors
    /// Same as [`Runtime::call_static`].
    pub fn construct(&mut self, type_name: &str, args: Vec<EmValue>) -> Result<Outcome> {
        let ty = self.resolve_type(&self.main, &TypeRef::local(type_name))?;
        Ok(match self.new_object(&ty, args)? {
            Ok(object) => Outcome::Returned(Some(object)),
            Err(exception) => Outcome::Threw(EmValue::ObjectRef(exception)),
        })
    }

    /// Value of static field `field` of `type_name` in the main module
    ///
    /// # Errors
    /// Returns [`crate::Error::Emulation`] if the type does not resolve.
    pub fn read_static(&mut self, type_name: &str, field: &str) -> Result<EmValue> {
        let ty = self.resolve_type(&self.main, &TypeRef::local(type_name))?;
        self.ensure_initialized(&ty)?;
        Ok(self
            .statics
            .get(&(ty.to_string(), field.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    /// Allocates a string
    ///
    /// # Errors
    /// Returns [`crate::Error::Emulation`] if the heap is full.
    pub fn new_string(&mut self, value: &str) -> Result<EmValue> {
        Ok(EmValue::ObjectRef(
            self.heap.alloc(HeapObject::String(value.to_string()))?,
        ))
    }

    /// Allocates an instance of the system exception type `type_name` carrying `message`
    ///
    /// # Errors
    /// Returns [`crate::Error::Emulation`] if the heap is full.
    pub fn new_exception(&mut self, type_name: &str, message: &str) -> Result<HeapRef> {
        let message = self.new_string(message)?;
        let mut fields = HashMap::new();
        fields.insert("Message".to_string(), message);
        Ok(self.heap.alloc(HeapObject::Object {
            type_ref: TypeRef::external(SYSTEM_MODULE, type_name),
            fields,
        })?)
    }

    /// Content of a string value
    #[must_use]
    pub fn string(&self, value: &EmValue) -> Option<String> {
        match self.heap.get(value.as_heap_ref()?).ok()? {
            HeapObject::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Instance field `name` of an object, null if never written
    ///
    /// # Errors
    /// Returns [`crate::Error::Emulation`] if `object` is not an object reference.
    pub fn field(&self, object: &EmValue, name: &str) -> Result<EmValue> {
        self.field_or(object, name, EmValue::Null)
    }

    /// Writes instance field `name` of an object
    ///
    /// # Errors
    /// Returns [`crate::Error::Emulation`] if `object` is not an object reference.
    pub fn set_field(&mut self, object: &EmValue, name: &str, value: EmValue) -> Result<()> {
        let target = Self::object_of(object).ok_or(EmulationError::TypeMismatch {
            operation: "stfld",
            expected: "object",
            found: object.kind(),
        })?;
        match self.heap.get_mut(target)? {
            HeapObject::Object { fields, .. } => {
                fields.insert(name.to_string(), value);
                Ok(())
            }
            _ => Err(EmulationError::TypeMismatch {
                operation: "stfld",
                expected: "object",
                found: "string, array or box",
            }
            .into()),
        }
    }

    /// Elements of an array value
    ///
    /// # Errors
    /// Returns [`crate::Error::Emulation`] if `array` is not an array.
    pub fn array(&self, array: &EmValue) -> Result<Vec<EmValue>> {
        let mismatch = || EmulationError::TypeMismatch {
            operation: "array",
            expected: "array",
            found: array.kind(),
        };
        match self.heap.get(array.as_heap_ref().ok_or_else(mismatch)?)? {
            HeapObject::Array { elements, .. } => Ok(elements.clone()),
            _ => Err(mismatch().into()),
        }
    }

    /// Boxes `value` if `sig` is a value type
    ///
    /// # Errors
    /// Returns [`crate::Error::Emulation`] if the heap is full.
    pub fn box_value(&mut self, sig: &TypeSig, value: EmValue) -> Result<EmValue> {
        if !sig.needs_boxing() || matches!(value, EmValue::ObjectRef(_) | EmValue::Null) {
            return Ok(value);
        }
        Ok(EmValue::ObjectRef(self.heap.alloc(HeapObject::Boxed {
            sig: sig.clone(),
            value,
        })?))
    }

    /// The content of a box, or the value itself
    ///
    /// # Errors
    /// Returns [`crate::Error::Emulation`] for a dangling reference.
    pub fn unbox(&self, value: &EmValue) -> Result<EmValue> {
        if let Some(r) = value.as_heap_ref() {
            if let HeapObject::Boxed { value, .. } = self.heap.get(r)? {
                return Ok(value.clone());
            }
        }
        Ok(value.clone())
    }

    /// Runtime type name of a value
    #[must_use]
    pub fn type_name(&self, value: &EmValue) -> Option<String> {
        if let Some(r) = value.as_heap_ref() {
            match self.heap.get(r).ok()? {
                HeapObject::Boxed { sig, .. } => return Some(sig.runtime_name()),
                HeapObject::Array { element, .. } => return Some(format!("{}[]", element.runtime_name())),
                _ => {}
            }
        }
        match value {
            EmValue::I32(_) => Some(TypeSig::I4.runtime_name()),
            EmValue::I64(_) => Some(TypeSig::I8.runtime_name()),
            EmValue::F32(_) => Some(TypeSig::R4.runtime_name()),
            EmValue::F64(_) => Some(TypeSig::R8.runtime_name()),
            other => self.runtime_type(other).ok().map(|ty| ty.full_name),
        }
    }

    /// Name of the member behind a member handle
    #[must_use]
    pub fn member_name(&self, value: &EmValue) -> Option<String> {
        let EmValue::Member(MemberHandle { module, token }) = value else {
            return None;
        };
        let module = self.resolver.module(module)?;
        module
            .method(*token)
            .map(|m| m.name.clone())
            .or_else(|| module.type_def(*token).map(|t| t.name.clone()))
            .or_else(|| module.field(*token).map(|f| f.name.clone()))
            .or_else(|| module.property(*token).map(|p| p.name.clone()))
    }

    /// String form of a value as `String.Concat` renders it
    ///
    /// # Errors
    /// Returns [`crate::Error::Emulation`] for a dangling reference.
    pub fn display(&self, value: &EmValue) -> Result<String> {
        let Some(r) = value.as_heap_ref() else {
            return Ok(match value {
                EmValue::Null => String::new(),
                EmValue::Member(_) => self.member_name(value).unwrap_or_default(),
                other => other.to_string(),
            });
        };
        Ok(match self.heap.get(r)? {
            HeapObject::String(s) => s.clone(),
            HeapObject::Boxed { value, .. } => value.to_string(),
            HeapObject::Array { element, .. } => format!("{}[]", element.runtime_name()),
            HeapObject::Object { type_ref, .. } => type_ref.full_name.clone(),
        })
    }

    /// Message of an exception object
    #[must_use]
    pub fn exception_message(&self, exception: &EmValue) -> Option<String> {
        let message = self.field(exception, "Message").ok()?;
        self.string(&message)
    }

    /// `Type: message` for exceptions, the display form otherwise
    #[must_use]
    pub fn describe(&self, value: &EmValue) -> String {
        let name = self.type_name(value).unwrap_or_else(|| value.kind().to_string());
        match self.exception_message(value) {
            Some(message) => format!("{name}: {message}"),
            None => match self.display(value) {
                Ok(text) if !text.is_empty() => format!("{name}: {text}"),
                _ => name,
            },
        }
    }

    fn object_of(value: &EmValue) -> Option<HeapRef> {
        match value {
            EmValue::ObjectRef(r) => Some(*r),
            EmValue::Pointer(cell) => cell.get().as_heap_ref(),
            _ => None,
        }
    }

    fn field_or(&self, object: &EmValue, name: &str, default: EmValue) -> Result<EmValue> {
        let target = Self::object_of(object).ok_or(EmulationError::TypeMismatch {
            operation: "ldfld",
            expected: "object",
            found: object.kind(),
        })?;
        match self.heap.get(target)? {
            HeapObject::Object { fields, .. } => Ok(fields.get(name).cloned().unwrap_or(default)),
            _ => Err(EmulationError::TypeMismatch {
                operation: "ldfld",
                expected: "object",
                found: "string, array or box",
            }
            .into()),
        }
    }

    fn resolve_type(&self, from: &str, ty: &TypeRef) -> Result<TypeRef> {
        let module = self
            .resolver
            .module(from)
            .ok_or_else(|| EmulationError::TypeNotFound(format!("[{from}]")))?;
        self.resolver
            .resolve(module, ty)
            .map(|resolved| resolved.canonical())
            .ok_or_else(|| EmulationError::TypeNotFound(ty.to_string()).into())
    }

    /// `(module, type token, full name)` of `ty` and its bases, nearest first
    fn chain(&self, ty: &TypeRef) -> Vec<(String, Token, String)> {
        let Some(module) = ty.scope.as_deref().and_then(|s| self.resolver.module(s)) else {
            return Vec::new();
        };
        self.resolver
            .base_chain(module, &TypeRef::local(ty.full_name.clone()))
            .iter()
            .map(|r| (r.module.name.clone(), r.def.token, r.full_name()))
            .collect()
    }

    fn type_names(&self, ty: &TypeRef) -> Vec<String> {
        let names: Vec<String> = self.chain(ty).into_iter().map(|(_, _, name)| name).collect();
        if names.is_empty() {
            vec![ty.full_name.clone()]
        } else {
            names
        }
    }

    fn runtime_type(&self, value: &EmValue) -> Result<TypeRef> {
        match value {
            EmValue::ObjectRef(r) => Ok(match self.heap.get(*r)? {
                HeapObject::Object { type_ref, .. } => type_ref.clone(),
                HeapObject::String(_) => TypeRef::external(SYSTEM_MODULE, "System.String"),
                HeapObject::Array { .. } | HeapObject::Boxed { .. } => contract::object_type(),
            }),
            EmValue::Member(_) => Ok(TypeRef::external(SYSTEM_MODULE, MEMBER_INFO)),
            EmValue::Pointer(cell) => self.runtime_type(&cell.get()),
            other => Err(EmulationError::TypeMismatch {
                operation: "callvirt",
                expected: "object",
                found: other.kind(),
            }
            .into()),
        }
    }

    fn is_instance(&self, value: &EmValue, sig: &TypeSig) -> Result<bool> {
        let r = match value {
            EmValue::ObjectRef(r) => *r,
            EmValue::Member(_) => {
                return Ok(match sig {
                    TypeSig::Object => true,
                    TypeSig::Class(t) => [MEMBER_INFO, contract::SYSTEM_OBJECT].contains(&t.full_name.as_str()),
                    _ => false,
                })
            }
            _ => return Ok(true),
        };
        Ok(match (sig, self.heap.get(r)?) {
            (TypeSig::Object, _)
            | (TypeSig::String, HeapObject::String(_))
            | (TypeSig::SzArray(_), HeapObject::Array { .. }) => true,
            (TypeSig::Class(t) | TypeSig::ValueType(t), HeapObject::Boxed { sig: boxed, .. }) => {
                boxed.runtime_name() == t.full_name || t.full_name == contract::SYSTEM_OBJECT
            }
            (_, HeapObject::Boxed { sig: boxed, .. }) => boxed == sig,
            (TypeSig::Class(t), _) => {
                let ty = self.runtime_type(value)?;
                self.type_names(&ty).contains(&t.full_name)
            }
            _ => false,
        })
    }

    fn exception_matches(&self, exception: HeapRef, catch_type: &TypeRef) -> Result<bool> {
        let ty = self.runtime_type(&EmValue::ObjectRef(exception))?;
        Ok(self.type_names(&ty).contains(&catch_type.full_name))
    }

    /// Runs the type initializer of `ty` on first use; an escaping exception is returned
    fn ensure_initialized(&mut self, ty: &TypeRef) -> Result<Option<HeapRef>> {
        if !self.initialized.insert(ty.to_string()) {
            return Ok(None);
        }
        let cctor = ty
            .scope
            .as_deref()
            .and_then(|s| self.resolver.module(s))
            .and_then(|module| {
                let def = module.find_type(&ty.full_name)?;
                let cctor = module.find_method(def.token, ".cctor", 0)?;
                cctor.body.as_ref()?;
                Some((module.name.clone(), cctor.token))
            });
        let Some((module, token)) = cctor else {
            return Ok(None);
        };
        log::trace!("Running type initializer of {ty}");
        match self.invoke(&module, token, Vec::new())? {
            Completion::Normal(_) => Ok(None),
            Completion::Exception(exception) => Ok(Some(exception)),
        }
    }

    /// Allocates an instance of `ty` and runs its constructor
    fn new_object(
        &mut self,
        ty: &TypeRef,
        args: Vec<EmValue>,
    ) -> Result<std::result::Result<EmValue, HeapRef>> {
        if let Some(exception) = self.ensure_initialized(ty)? {
            return Ok(Err(exception));
        }
        let object = EmValue::ObjectRef(self.heap.alloc(HeapObject::Object {
            type_ref: ty.clone(),
            fields: HashMap::new(),
        })?);
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(object.clone());
        full.extend(args);
        Ok(match self.dispatch(ty, ".ctor", full, true)? {
            Completion::Normal(_) => Ok(object),
            Completion::Exception(exception) => Err(exception),
        })
    }

    /// Finds the implementation of `name` along the base chain of `ty` and runs it.
    ///
    /// At every level a native takes precedence over the IR body; bodyless `get_`/`set_`
    /// accessors read and write the field named after the property.
    fn dispatch(&mut self, ty: &TypeRef, name: &str, args: Vec<EmValue>, has_this: bool) -> Result<Completion> {
        let arity = args.len().saturating_sub(usize::from(has_this));
        for (module, owner, full_name) in self.chain(ty) {
            if let Some(native) = self.natives.get(&full_name, name) {
                let (this, rest) = if has_this {
                    (args.first(), args.get(1..).unwrap_or_default())
                } else {
                    (None, args.as_slice())
                };
                let call = NativeCall {
                    type_name: &full_name,
                    method_name: name,
                    this,
                    args: rest,
                };
                match native(&call, self)? {
                    NativeResult::Continue => {}
                    NativeResult::Return(value) => return Ok(Completion::Normal(value)),
                    NativeResult::Throw(exception) => return Ok(Completion::Exception(exception)),
                }
            }

            let found = self
                .resolver
                .module(&module)
                .and_then(|m| m.find_method(owner, name, arity))
                .map(|m| (m.token, m.body.is_some(), m.is_special_name(), m.return_type.clone()));
            let Some((token, has_body, special, return_type)) = found else {
                continue;
            };
            if has_body {
                return self.invoke(&module, token, args);
            }
            if special && has_this {
                let this = args.first().cloned().unwrap_or_default();
                if let Some(property) = name.strip_prefix("get_") {
                    if this.is_null() {
                        return self.null_reference().map(Completion::Exception);
                    }
                    let value = self.field_or(&this, property, EmValue::zero(&return_type))?;
                    return Ok(Completion::Normal(Some(value)));
                }
                if let Some(property) = name.strip_prefix("set_") {
                    if this.is_null() {
                        return self.null_reference().map(Completion::Exception);
                    }
                    let value = args.get(1).cloned().unwrap_or_default();
                    self.set_field(&this, property, value)?;
                    return Ok(Completion::Normal(None));
                }
            }
        }
        Err(EmulationError::MethodNotFound {
            type_name: ty.full_name.clone(),
            method: name.to_string(),
        }
        .into())
    }

    fn load(&mut self, module: &str, token: Token) -> Result<Rc<LoadedMethod>> {
        let key = (module.to_string(), token);
        if let Some(loaded) = self.methods.get(&key) {
            return Ok(Rc::clone(loaded));
        }
        let owner = self
            .resolver
            .module(module)
            .ok_or_else(|| EmulationError::TypeNotFound(format!("[{module}]")))?;
        let def = owner.method(token).ok_or_else(|| EmulationError::MethodNotFound {
            type_name: module.to_string(),
            method: token.to_string(),
        })?;
        let name = format!(
            "{}::{}",
            owner.full_name(def.declaring_type).unwrap_or_default(),
            def.name
        );
        let body = def
            .body
            .clone()
            .ok_or_else(|| EmulationError::MissingMethodBody(name.clone()))?;
        let loaded = Rc::new(LoadedMethod {
            name,
            module: module.to_string(),
            has_this: def.has_this(),
            arity: def.params.len(),
            returns_value: def.return_type != TypeSig::Void,
            body,
        });
        self.methods.insert(key, Rc::clone(&loaded));
        Ok(loaded)
    }

    fn invoke(&mut self, module: &str, token: Token, args: Vec<EmValue>) -> Result<Completion> {
        let method = self.load(module, token)?;
        if self.depth >= self.limits.max_call_depth {
            return Err(EmulationError::CallDepthExceeded(self.limits.max_call_depth).into());
        }
        let expected = method.arity + usize::from(method.has_this);
        if args.len() != expected {
            return Err(EmulationError::InvalidProgram(format!(
                "{} expects {} arguments, got {}",
                method.name,
                expected,
                args.len()
            ))
            .into());
        }

        let mut frame = Frame {
            args: args.into_iter().map(ValueCell::new).collect(),
            locals: method
                .body
                .locals
                .iter()
                .map(|sig| ValueCell::new(EmValue::zero(sig)))
                .collect(),
            stack: Vec::new(),
            caught: Vec::new(),
            method: Rc::clone(&method),
        };

        self.depth += 1;
        let exit = self.run(&mut frame, method.body.entry);
        self.depth -= 1;

        match exit? {
            Exit::Return(value) => Ok(Completion::Normal(value)),
            Exit::Throw(exception) => Ok(Completion::Exception(exception)),
            Exit::EndFinally => Err(EmulationError::InvalidProgram(format!(
                "{} reached endfinally outside a finally handler",
                method.name
            ))
            .into()),
        }
    }

    fn run(&mut self, frame: &mut Frame, start: BlockId) -> Result<Exit> {
        let method = Rc::clone(&frame.method);
        let mut current = start;
        loop {
            let block = method.body.block(current).ok_or(EmulationError::InvalidIndex {
                kind: "block",
                index: current.0,
            })?;
            let mut raised = None;
            for instruction in &block.instructions {
                self.executed += 1;
                if self.executed > self.limits.max_instructions {
                    return Err(EmulationError::InstructionLimitExceeded(self.limits.max_instructions).into());
                }
                if let Step::Raise(exception) = self.step(frame, instruction)? {
                    raised = Some(exception);
                    break;
                }
            }
            let flow = match raised {
                Some(exception) => self.unwind(frame, current, exception)?,
                None => self.terminate(frame, current, &block.terminator)?,
            };
            match flow {
                Flow::Goto(next) => current = next,
                Flow::Exit(exit) => return Ok(exit),
            }
        }
    }

    fn terminate(&mut self, frame: &mut Frame, current: BlockId, terminator: &Terminator) -> Result<Flow> {
        Ok(match terminator {
            Terminator::Jump(target) => Flow::Goto(*target),
            Terminator::Branch {
                kind,
                target,
                fallthrough,
            } => {
                if self.condition(frame, *kind)? {
                    Flow::Goto(*target)
                } else {
                    Flow::Goto(*fallthrough)
                }
            }
            Terminator::Switch { targets, default } => {
                let index = frame.pop()?;
                let index = index.as_i64().ok_or(EmulationError::TypeMismatch {
                    operation: "switch",
                    expected: "int32",
                    found: index.kind(),
                })?;
                let target = usize::try_from(index)
                    .ok()
                    .and_then(|i| targets.get(i))
                    .unwrap_or(default);
                Flow::Goto(*target)
            }
            Terminator::Leave(target) => self.leave(frame, current, *target)?,
            Terminator::Return => {
                let value = if frame.method.returns_value {
                    Some(frame.pop()?)
                } else {
                    None
                };
                Flow::Exit(Exit::Return(value))
            }
            Terminator::Throw => {
                let exception = match frame.pop()? {
                    EmValue::ObjectRef(r) => r,
                    EmValue::Null => self.null_reference()?,
                    other => {
                        return Err(EmulationError::TypeMismatch {
                            operation: "throw",
                            expected: "object",
                            found: other.kind(),
                        }
                        .into())
                    }
                };
                self.unwind(frame, current, exception)?
            }
            Terminator::Rethrow => {
                let exception = frame.caught.last().copied().ok_or_else(|| {
                    EmulationError::InvalidProgram(format!(
                        "{} rethrows outside a catch handler",
                        frame.method.name
                    ))
                })?;
                self.unwind(frame, current, exception)?
            }
            Terminator::EndFinally => Flow::Exit(Exit::EndFinally),
        })
    }

    fn condition(&mut self, frame: &mut Frame, kind: BranchKind) -> Result<bool> {
        if kind.operands() == 1 {
            let value = frame.pop()?;
            return Ok(match kind {
                BranchKind::True => value.is_true(),
                _ => !value.is_true(),
            });
        }
        let b = frame.pop()?;
        let a = frame.pop()?;
        match kind {
            BranchKind::Beq => return Ok(a == b),
            BranchKind::NeUn => return Ok(a != b),
            _ => {}
        }
        let ordering = a.compare(&b).ok_or(EmulationError::TypeMismatch {
            operation: "branch",
            expected: "number",
            found: a.kind(),
        })?;
        Ok(match kind {
            BranchKind::Blt => ordering.is_lt(),
            BranchKind::Ble => ordering.is_le(),
            BranchKind::Bgt => ordering.is_gt(),
            _ => ordering.is_ge(),
        })
    }

    /// Runs a finally or fault handler body in the current frame
    fn run_handler(&mut self, frame: &mut Frame, entry: BlockId) -> Result<Exit> {
        let saved = std::mem::take(&mut frame.stack);
        let exit = self.run(frame, entry);
        frame.stack = saved;
        exit
    }

    fn leave(&mut self, frame: &mut Frame, from: BlockId, target: BlockId) -> Result<Flow> {
        frame.stack.clear();
        let method = Rc::clone(&frame.method);
        for handler in &method.body.handlers {
            if handler.is_catch() && handler.handles_in(from) && !handler.handles_in(target) {
                frame.caught.pop();
            }
            if handler.is_finally() && handler.protects(from) && !handler.protects(target) {
                match self.run_handler(frame, handler.handler_entry)? {
                    Exit::EndFinally => {}
                    Exit::Throw(exception) => return self.unwind(frame, handler.handler_entry, exception),
                    exit @ Exit::Return(_) => return Ok(Flow::Exit(exit)),
                }
            }
        }
        Ok(Flow::Goto(target))
    }

    fn unwind(&mut self, frame: &mut Frame, from: BlockId, exception: HeapRef) -> Result<Flow> {
        let method = Rc::clone(&frame.method);
        for handler in &method.body.handlers {
            if handler.is_catch() && handler.handles_in(from) {
                frame.caught.pop();
            }
            if !handler.protects(from) {
                continue;
            }
            if handler.is_catch() {
                let matches = match &handler.catch_type {
                    Some(catch_type) => self.exception_matches(exception, catch_type)?,
                    None => false,
                };
                if matches {
                    frame.stack.clear();
                    frame.stack.push(EmValue::ObjectRef(exception));
                    frame.caught.push(exception);
                    return Ok(Flow::Goto(handler.handler_entry));
                }
                continue;
            }
            match self.run_handler(frame, handler.handler_entry)? {
                Exit::EndFinally => {}
                Exit::Throw(replacement) => return self.unwind(frame, handler.handler_entry, replacement),
                exit @ Exit::Return(_) => return Ok(Flow::Exit(exit)),
            }
        }
        Ok(Flow::Exit(Exit::Throw(exception)))
    }

    fn null_reference(&mut self) -> Result<HeapRef> {
        self.new_exception("System.NullReferenceException", "Object reference not set to an instance of an object.")
    }

    fn raise(&mut self, type_name: &str, message: &str) -> Result<Step> {
        Ok(Step::Raise(self.new_exception(type_name, message)?))
    }

    fn complete_call(frame: &mut Frame, returns: &TypeSig, completion: Completion) -> Step {
        match completion {
            Completion::Normal(value) => {
                if *returns != TypeSig::Void {
                    frame.stack.push(value.unwrap_or_default());
                }
                Step::Next
            }
            Completion::Exception(exception) => Step::Raise(exception),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn step(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Step> {
        if let Some(op) = BinaryOp::of(instruction) {
            let b = frame.pop()?;
            let a = frame.pop()?;
            return self.binary(frame, op, &a, &b);
        }

        match instruction {
            Instruction::Nop => {}
            Instruction::Ldarg(n) => {
                let value = frame.arg(*n)?.get();
                frame.stack.push(value);
            }
            Instruction::Ldarga(n) => {
                let cell = frame.arg(*n)?.clone();
                frame.stack.push(EmValue::Pointer(cell));
            }
            Instruction::Starg(n) => {
                let value = frame.pop()?;
                frame.arg(*n)?.set(value);
            }
            Instruction::Ldloc(n) => {
                let value = frame.local(*n)?.get();
                frame.stack.push(value);
            }
            Instruction::Ldloca(n) => {
                let cell = frame.local(*n)?.clone();
                frame.stack.push(EmValue::Pointer(cell));
            }
            Instruction::Stloc(n) => {
                let value = frame.pop()?;
                frame.local(*n)?.set(value);
            }
            Instruction::LdcI4(v) => frame.stack.push(EmValue::I32(*v)),
            Instruction::LdcI8(v) => frame.stack.push(EmValue::I64(*v)),
            Instruction::LdcR4(v) => frame.stack.push(EmValue::F32(*v)),
            Instruction::LdcR8(v) => frame.stack.push(EmValue::F64(*v)),
            Instruction::Ldstr(s) => {
                let value = self.new_string(s)?;
                frame.stack.push(value);
            }
            Instruction::Ldnull => frame.stack.push(EmValue::Null),
            Instruction::Dup => {
                let top = frame.pop()?;
                frame.stack.push(top.clone());
                frame.stack.push(top);
            }
            Instruction::Pop => {
                frame.pop()?;
            }
            Instruction::Neg => {
                let value = match frame.pop()? {
                    EmValue::I32(v) => EmValue::I32(v.wrapping_neg()),
                    EmValue::I64(v) => EmValue::I64(v.wrapping_neg()),
                    EmValue::F32(v) => EmValue::F32(-v),
                    EmValue::F64(v) => EmValue::F64(-v),
                    other => {
                        return Err(EmulationError::TypeMismatch {
                            operation: "neg",
                            expected: "number",
                            found: other.kind(),
                        }
                        .into())
                    }
                };
                frame.stack.push(value);
            }
            Instruction::Ceq | Instruction::Cgt | Instruction::Clt => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                let result = match instruction {
                    Instruction::Ceq => a == b,
                    Instruction::Cgt => match a.compare(&b) {
                        Some(ordering) => ordering.is_gt(),
                        None => !a.is_null() && b.is_null(),
                    },
                    _ => a.compare(&b).is_some_and(|ordering| ordering.is_lt()),
                };
                frame.stack.push(EmValue::I32(i32::from(result)));
            }
            Instruction::Conv(sig) => {
                let value = frame.pop()?;
                let converted = value.convert(sig).ok_or(EmulationError::TypeMismatch {
                    operation: "conv",
                    expected: "number",
                    found: value.kind(),
                })?;
                frame.stack.push(converted);
            }
            Instruction::Call(target) | Instruction::Callvirt(target) => {
                let args = frame.pop_n(target.params.len() + usize::from(target.has_this))?;
                let is_virtual = matches!(instruction, Instruction::Callvirt(_)) && target.has_this;
                let completion = if is_virtual {
                    let receiver = args.first().cloned().unwrap_or_default();
                    if receiver.is_null() {
                        return Ok(Step::Raise(self.null_reference()?));
                    }
                    let ty = self.runtime_type(&receiver)?;
                    self.dispatch(&ty, &target.name, args, true)?
                } else {
                    let ty = self.resolve_type(&frame.method.module, &target.declaring_type)?;
                    if !target.has_this {
                        if let Some(exception) = self.ensure_initialized(&ty)? {
                            return Ok(Step::Raise(exception));
                        }
                    }
                    self.dispatch(&ty, &target.name, args, target.has_this)?
                };
                return Ok(Self::complete_call(frame, &target.return_type, completion));
            }
            Instruction::Newobj(ctor) => {
                let args = frame.pop_n(ctor.params.len())?;
                let ty = self.resolve_type(&frame.method.module, &ctor.declaring_type)?;
                match self.new_object(&ty, args)? {
                    Ok(object) => frame.stack.push(object),
                    Err(exception) => return Ok(Step::Raise(exception)),
                }
            }
            Instruction::Ldfld(field) => {
                let object = frame.pop()?;
                if Self::object_of(&object).is_none() && object.is_null() {
                    return Ok(Step::Raise(self.null_reference()?));
                }
                let value = self.field_or(&object, &field.name, EmValue::zero(&field.sig))?;
                frame.stack.push(value);
            }
            Instruction::Stfld(field) => {
                let value = frame.pop()?;
                let object = frame.pop()?;
                if object.is_null() {
                    return Ok(Step::Raise(self.null_reference()?));
                }
                self.set_field(&object, &field.name, value)?;
            }
            Instruction::Ldsfld(field) => {
                let ty = self.resolve_type(&frame.method.module, &field.declaring_type)?;
                if let Some(exception) = self.ensure_initialized(&ty)? {
                    return Ok(Step::Raise(exception));
                }
                let value = self
                    .statics
                    .get(&(ty.to_string(), field.name.clone()))
                    .cloned()
                    .unwrap_or_else(|| EmValue::zero(&field.sig));
                frame.stack.push(value);
            }
            Instruction::Stsfld(field) => {
                let value = frame.pop()?;
                let ty = self.resolve_type(&frame.method.module, &field.declaring_type)?;
                if let Some(exception) = self.ensure_initialized(&ty)? {
                    return Ok(Step::Raise(exception));
                }
                self.statics.insert((ty.to_string(), field.name.clone()), value);
            }
            Instruction::Box(sig) => {
                let value = frame.pop()?;
                let boxed = self.box_value(sig, value)?;
                frame.stack.push(boxed);
            }
            Instruction::UnboxAny(sig) => {
                let value = frame.pop()?;
                if !sig.needs_boxing() {
                    return self.cast(frame, sig, value);
                }
                let Some(r) = value.as_heap_ref() else {
                    if value.is_null() {
                        return Ok(Step::Raise(self.null_reference()?));
                    }
                    frame.stack.push(value);
                    return Ok(Step::Next);
                };
                let unboxed = match self.heap.get(r)? {
                    HeapObject::Boxed { value, .. } => Some(value.clone()),
                    _ => None,
                };
                match unboxed {
                    Some(inner) => frame.stack.push(inner),
                    None if sig.is_generic_param() => frame.stack.push(value),
                    None => return self.raise("System.InvalidCastException", "Specified cast is not valid."),
                }
            }
            Instruction::Castclass(sig) => {
                let value = frame.pop()?;
                return self.cast(frame, sig, value);
            }
            Instruction::Isinst(sig) => {
                let value = frame.pop()?;
                let result = if !value.is_null() && self.is_instance(&value, sig)? {
                    value
                } else {
                    EmValue::Null
                };
                frame.stack.push(result);
            }
            Instruction::Newarr(element) => {
                let length = frame.pop()?;
                let length = length.as_i64().ok_or(EmulationError::TypeMismatch {
                    operation: "newarr",
                    expected: "int32",
                    found: length.kind(),
                })?;
                let Ok(length) = usize::try_from(length) else {
                    return self.raise("System.ArgumentException", "Array length must be non-negative.");
                };
                let array = self.heap.alloc(HeapObject::Array {
                    element: element.clone(),
                    elements: vec![EmValue::zero(element); length],
                })?;
                frame.stack.push(EmValue::ObjectRef(array));
            }
            Instruction::Ldlen => {
                let array = frame.pop()?;
                if array.is_null() {
                    return Ok(Step::Raise(self.null_reference()?));
                }
                let length = self.array(&array)?.len();
                frame.stack.push(EmValue::I32(i32::try_from(length).unwrap_or(i32::MAX)));
            }
            Instruction::Ldelem(_) => {
                let index = frame.pop()?;
                let array = frame.pop()?;
                match self.element_slot(&array, &index)? {
                    Ok((r, i)) => {
                        let value = match self.heap.get(r)? {
                            HeapObject::Array { elements, .. } => elements[i].clone(),
                            _ => EmValue::Null,
                        };
                        frame.stack.push(value);
                    }
                    Err(exception) => return Ok(Step::Raise(exception)),
                }
            }
            Instruction::Stelem(_) => {
                let value = frame.pop()?;
                let index = frame.pop()?;
                let array = frame.pop()?;
                match self.element_slot(&array, &index)? {
                    Ok((r, i)) => {
                        if let HeapObject::Array { elements, .. } = self.heap.get_mut(r)? {
                            elements[i] = value;
                        }
                    }
                    Err(exception) => return Ok(Step::Raise(exception)),
                }
            }
            Instruction::Ldind(_) => match frame.pop()? {
                EmValue::Pointer(cell) => frame.stack.push(cell.get()),
                other => {
                    return Err(EmulationError::TypeMismatch {
                        operation: "ldind",
                        expected: "managed pointer",
                        found: other.kind(),
                    }
                    .into())
                }
            },
            Instruction::Stind(_) => {
                let value = frame.pop()?;
                match frame.pop()? {
                    EmValue::Pointer(cell) => cell.set(value),
                    other => {
                        return Err(EmulationError::TypeMismatch {
                            operation: "stind",
                            expected: "managed pointer",
                            found: other.kind(),
                        }
                        .into())
                    }
                }
            }
            Instruction::Ldtoken(token) => frame.stack.push(EmValue::Member(MemberHandle {
                module: frame.method.module.clone(),
                token: *token,
            })),
            Instruction::Add
            | Instruction::Sub
            | Instruction::Mul
            | Instruction::Div
            | Instruction::Rem
            | Instruction::And
            | Instruction::Or
            | Instruction::Xor => {}
        }
        Ok(Step::Next)
    }

    fn binary(&mut self, frame: &mut Frame, op: BinaryOp, a: &EmValue, b: &EmValue) -> Result<Step> {
        let result = match (a, b) {
            (EmValue::I32(x), EmValue::I32(y)) => op.int32(*x, *y).map(EmValue::I32),
            (EmValue::F32(x), EmValue::F32(y)) => {
                #[allow(clippy::cast_possible_truncation)]
                let narrowed = op.float(f64::from(*x), f64::from(*y)).map(|v| EmValue::F32(v as f32));
                narrowed
            }
            _ => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => op.int64(x, y).map(EmValue::I64),
                _ => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => op.float(x, y).map(EmValue::F64),
                    _ => {
                        return Err(EmulationError::TypeMismatch {
                            operation: "arithmetic",
                            expected: "number",
                            found: if a.as_f64().is_none() { a.kind() } else { b.kind() },
                        }
                        .into())
                    }
                },
            },
        };
        match result {
            Some(value) => {
                frame.stack.push(value);
                Ok(Step::Next)
            }
            None if b.as_i64() == Some(0) => self.raise("System.DivideByZeroException", "Attempted to divide by zero."),
            None if a.as_i64().is_some() => self.raise("System.ArithmeticException", "Arithmetic operation resulted in an overflow."),
            None => Err(EmulationError::TypeMismatch {
                operation: "bitwise",
                expected: "integer",
                found: a.kind(),
            }
            .into()),
        }
    }

    fn cast(&mut self, frame: &mut Frame, sig: &TypeSig, value: EmValue) -> Result<Step> {
        if value.is_null() || self.is_instance(&value, sig)? {
            frame.stack.push(value);
            return Ok(Step::Next);
        }
        let message = format!(
            "Unable to cast object of type '{}' to type '{}'.",
            self.type_name(&value).unwrap_or_default(),
            sig.runtime_name()
        );
        self.raise("System.InvalidCastException", &message)
    }

    /// Validated `(array, index)` pair, or the exception to raise
    fn element_slot(
        &mut self,
        array: &EmValue,
        index: &EmValue,
    ) -> Result<std::result::Result<(HeapRef, usize), HeapRef>> {
        if array.is_null() {
            return Ok(Err(self.null_reference()?));
        }
        let length = self.array(array)?.len();
        let r = array.as_heap_ref().ok_or(EmulationError::TypeMismatch {
            operation: "ldelem",
            expected: "array",
            found: array.kind(),
        })?;
        let index = index.as_i64().ok_or(EmulationError::TypeMismatch {
            operation: "ldelem",
            expected: "int32",
            found: index.kind(),
        })?;
        match usize::try_from(index).ok().filter(|i| *i < length) {
            Some(i) => Ok(Ok((r, i))),
            None => Ok(Err(self.new_exception(
                "System.IndexOutOfRangeException",
                "Index was outside the bounds of the array.",
            )?)),
        }
    }
}
