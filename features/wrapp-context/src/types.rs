use std::{
    any::{Any, TypeId},
    fmt,
    rc::Rc,
};

use crate::interception::Interceptable;

/// Boxed error used by user supplied factories, providers and observers
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// A resolved value, shared and type erased.
///
/// Contexts are single threaded, so values are reference counted with [Rc].
/// Instances that were created with [Instance::interceptable] can additionally be
/// wrapped in an interception proxy.
#[derive(Clone)]
pub struct Instance {
    pub info: TypeInfo,
    pub instance: Rc<dyn Any>,
    interceptable: Option<Rc<dyn Interceptable>>,
}

impl Instance {
    /// Wraps a value. Wrapping an [Instance] returns it unchanged.
    pub fn new<T: 'static>(value: T) -> Self {
        let boxed: Box<dyn Any> = Box::new(value);
        match boxed.downcast::<Instance>() {
            Ok(instance) => *instance,
            Err(boxed) => Instance {
                info: TypeInfo::of::<T>(),
                instance: Rc::from(boxed),
                interceptable: None,
            },
        }
    }

    pub fn from_rc<T: 'static>(value: Rc<T>) -> Self {
        Instance {
            info: TypeInfo::of::<T>(),
            instance: value,
            interceptable: None,
        }
    }

    /// Wraps a value whose methods can be intercepted
    pub fn interceptable<T: Interceptable>(value: T) -> Self {
        let value = Rc::new(value);
        Instance {
            info: TypeInfo::of::<T>(),
            instance: value.clone(),
            interceptable: Some(value),
        }
    }

    pub fn downcast<T: 'static>(&self) -> Result<Rc<T>, &'static str> {
        match self.instance.clone().downcast::<T>() {
            Ok(downcasted) => Ok(downcasted),
            Err(_) => Err(self.info.type_name),
        }
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.instance.is::<T>()
    }

    /// `true` if both instances share the same allocation
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.instance), Rc::as_ptr(&other.instance))
    }

    pub(crate) fn as_interceptable(&self) -> Option<Rc<dyn Interceptable>> {
        self.interceptable.clone()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Instance");
        debug.field("type", &self.info.type_name);
        if let Some(json) = self.instance.downcast_ref::<serde_json::Value>() {
            debug.field("value", json);
        }
        debug.finish()
    }
}

/// Type Name and Type Id
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct TypeInfo {
    pub type_name: &'static str,
    pub type_id: TypeId,
}
impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}
impl TypeInfo {
    pub fn of<T: 'static + ?Sized>() -> TypeInfo {
        TypeInfo {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }

    /// Last path segment of the type name, without generics
    pub fn short_name(&self) -> &'static str {
        short_type_name(self.type_name)
    }
}

pub(crate) fn short_type_name(type_name: &'static str) -> &'static str {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::").next().unwrap_or(base)
}

/// Reads a `.` separated path out of a JSON value.
///
/// Objects are indexed by member name, arrays by position. Anything else, or a
/// missing member, yields `None`.
pub fn get_deep_property(value: &Instance, path: &str) -> Option<Instance> {
    if path.is_empty() {
        return Some(value.clone());
    }
    let json = value.downcast::<serde_json::Value>().ok()?;
    let mut current: &serde_json::Value = &json;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(members) => members.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(Instance::new(current.clone()))
}
