use std::fmt;

use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::vm::GeneratorId;

/// Handle to a host-owned object that only exists inside the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub u64);

/// Callable installed by the host to finalize an asynchronous generator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Finalizer {
    pub name: String,
    pub token: u64,
}

impl Finalizer {
    pub fn new(name: impl Into<String>, token: u64) -> Self {
        Self {
            name: name.into(),
            token,
        }
    }
}

/// Runtime value stored in locals, operand stacks and constant pools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Generator(GeneratorId),
    Finalizer(Finalizer),
    #[serde(serialize_with = "refuse_native", deserialize_with = "reject_native")]
    Native(NativeHandle),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(flag) => *flag,
            Value::Integer(int) => *int != 0,
            Value::Float(float) => *float != 0.0,
            Value::String(text) => !text.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Generator(_) | Value::Finalizer(_) | Value::Native(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "bool",
            Value::Integer(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Generator(_) => "generator",
            Value::Finalizer(_) => "finalizer",
            Value::Native(_) => "native",
        }
    }

    pub fn as_generator(&self) -> Option<GeneratorId> {
        match self {
            Value::Generator(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(flag) => write!(f, "{flag}"),
            Value::Integer(int) => write!(f, "{int}"),
            Value::Float(float) => write!(f, "{float}"),
            Value::String(text) => write!(f, "{text}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Generator(id) => write!(f, "<generator {}>", id.0),
            Value::Finalizer(finalizer) => write!(f, "<finalizer {}>", finalizer.name),
            Value::Native(handle) => write!(f, "<native {:#x}>", handle.0),
        }
    }
}

fn refuse_native<S: Serializer>(handle: &NativeHandle, _serializer: S) -> Result<S::Ok, S::Error> {
    Err(S::Error::custom(format!(
        "native handle {:#x} cannot leave its process",
        handle.0
    )))
}

fn reject_native<'de, D: Deserializer<'de>>(_deserializer: D) -> Result<NativeHandle, D::Error> {
    Err(D::Error::custom("native handles are never serialized"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_follows_emptiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(Value::List(vec![Value::Null]).is_truthy());
        assert!(Value::Integer(-1).is_truthy());
    }

    #[test]
    fn native_handles_refuse_serialization() {
        let err = bincode::serialize(&Value::Native(NativeHandle(7))).expect_err("native");
        assert!(err.to_string().contains("cannot leave its process"));
    }

    #[test]
    fn display_renders_nested_lists() {
        let value = Value::List(vec![Value::Integer(1), Value::String("two".into())]);
        assert_eq!(value.to_string(), "[1, two]");
    }
}
