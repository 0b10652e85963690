use std::fmt;

/// Payload of a finished task or test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Val {
    Int(i64),
    String(String),
    None,
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Int(i) => write!(f, "{}", i),
            Val::String(s) => f.write_str(s),
            Val::None => f.write_str("None"),
        }
    }
}

impl From<u32> for Val {
    fn from(v: u32) -> Self {
        Val::Int(v as i64)
    }
}
