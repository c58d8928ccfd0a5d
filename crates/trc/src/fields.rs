use std::fmt;

/// A structured field value attached to an [`crate::EventDetails`]. Kept as a
/// small closed enum rather than `Box<dyn Display>` so events stay cheap to
/// construct on the hot path.
#[derive(Debug, Clone)]
pub enum EventField {
    Str(String),
    Int(i64),
    UInt(u64),
    Bool(bool),
    Duration(std::time::Duration),
}

impl fmt::Display for EventField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventField::Str(s) => f.write_str(s),
            EventField::Int(v) => write!(f, "{v}"),
            EventField::UInt(v) => write!(f, "{v}"),
            EventField::Bool(v) => write!(f, "{v}"),
            EventField::Duration(d) => write!(f, "{}ms", d.as_millis()),
        }
    }
}

impl From<&str> for EventField {
    fn from(value: &str) -> Self {
        EventField::Str(value.to_string())
    }
}

impl From<String> for EventField {
    fn from(value: String) -> Self {
        EventField::Str(value)
    }
}

impl From<u64> for EventField {
    fn from(value: u64) -> Self {
        EventField::UInt(value)
    }
}

impl From<usize> for EventField {
    fn from(value: usize) -> Self {
        EventField::UInt(value as u64)
    }
}

impl From<i64> for EventField {
    fn from(value: i64) -> Self {
        EventField::Int(value)
    }
}

impl From<u32> for EventField {
    fn from(value: u32) -> Self {
        EventField::UInt(value as u64)
    }
}

impl From<bool> for EventField {
    fn from(value: bool) -> Self {
        EventField::Bool(value)
    }
}

impl From<std::time::Duration> for EventField {
    fn from(value: std::time::Duration) -> Self {
        EventField::Duration(value)
    }
}
