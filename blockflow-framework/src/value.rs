//! Type-erased values held by contexts and caches
//!
//! Ports and cache entries carry values whose concrete type is known only to
//! the system that declared them. [`AbstractValue`] erases that type while
//! keeping its name around for diagnostics.

use std::any::Any;
use std::fmt;

trait ValueObject: Any + Send + Sync {
    fn clone_box(&self) -> Box<dyn ValueObject>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn type_name(&self) -> &'static str;
    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<T> ValueObject for T
where
    T: Any + Clone + Send + Sync + fmt::Debug,
{
    fn clone_box(&self) -> Box<dyn ValueObject> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A value of any cloneable, thread-safe type
pub struct AbstractValue {
    inner: Box<dyn ValueObject>,
}

impl AbstractValue {
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Clone + Send + Sync + fmt::Debug,
    {
        AbstractValue {
            inner: Box::new(value),
        }
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.inner.as_any_mut().downcast_mut::<T>()
    }

    /// Overwrite the held value, which must already have type `T`.
    ///
    /// Returns false and leaves the value untouched on a type mismatch.
    pub fn set<T: Any>(&mut self, value: T) -> bool {
        match self.get_mut::<T>() {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn is<T: Any>(&self) -> bool {
        self.inner.as_any().is::<T>()
    }

    /// Name of the concrete type, as reported by `std::any::type_name`
    pub fn type_name(&self) -> &'static str {
        self.inner.type_name()
    }
}

impl Clone for AbstractValue {
    fn clone(&self) -> Self {
        AbstractValue {
            inner: self.inner.clone_box(),
        }
    }
}

impl fmt::Debug for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AbstractValue<{}>(", self.type_name())?;
        self.inner.debug(f)?;
        write!(f, ")")
    }
}

/// Fixed-size numeric vector carried by vector-valued ports
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BasicVector(Vec<f64>);

impl BasicVector {
    pub fn new(values: Vec<f64>) -> Self {
        BasicVector(values)
    }

    pub fn zeros(size: usize) -> Self {
        BasicVector(vec![0.0; size])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.0
    }

    pub fn get(&self, i: usize) -> Option<f64> {
        self.0.get(i).copied()
    }
}

impl From<Vec<f64>> for BasicVector {
    fn from(values: Vec<f64>) -> Self {
        BasicVector(values)
    }
}
