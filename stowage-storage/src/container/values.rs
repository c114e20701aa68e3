//! Typed buffers stored in datasets and attributes.
//!
//! Floating-point payloads are serialized as IEEE-754 bit patterns, so NaN and
//! the infinities survive a trip through the JSON-based tree container.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    String,
    Compound,
}

impl DataType {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::UInt8
                | DataType::Int16
                | DataType::UInt16
                | DataType::Int32
                | DataType::UInt32
                | DataType::Int64
                | DataType::UInt64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }
}

/// One-dimensional contents of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Values {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Float32(#[serde(with = "f32_bits")] Vec<f32>),
    Float64(#[serde(with = "f64_bits")] Vec<f64>),
    String(Vec<String>),
    /// Column-wise compound records; every member has the same length.
    Compound(Vec<(String, Values)>),
}

impl Values {
    pub fn data_type(&self) -> DataType {
        match self {
            Values::Int8(_) => DataType::Int8,
            Values::UInt8(_) => DataType::UInt8,
            Values::Int16(_) => DataType::Int16,
            Values::UInt16(_) => DataType::UInt16,
            Values::Int32(_) => DataType::Int32,
            Values::UInt32(_) => DataType::UInt32,
            Values::Int64(_) => DataType::Int64,
            Values::UInt64(_) => DataType::UInt64,
            Values::Float32(_) => DataType::Float32,
            Values::Float64(_) => DataType::Float64,
            Values::String(_) => DataType::String,
            Values::Compound(_) => DataType::Compound,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Values::Int8(v) => v.len(),
            Values::UInt8(v) => v.len(),
            Values::Int16(v) => v.len(),
            Values::UInt16(v) => v.len(),
            Values::Int32(v) => v.len(),
            Values::UInt32(v) => v.len(),
            Values::Int64(v) => v.len(),
            Values::UInt64(v) => v.len(),
            Values::Float32(v) => v.len(),
            Values::Float64(v) => v.len(),
            Values::String(v) => v.len(),
            Values::Compound(members) => members.first().map(|(_, m)| m.len()).unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widens any integer buffer to `i64`. Returns `None` for non-integer
    /// buffers and for `u64` values beyond `i64::MAX`.
    pub fn to_i64(&self) -> Option<Vec<i64>> {
        match self {
            Values::Int8(v) => Some(v.iter().map(|&x| x as i64).collect()),
            Values::UInt8(v) => Some(v.iter().map(|&x| x as i64).collect()),
            Values::Int16(v) => Some(v.iter().map(|&x| x as i64).collect()),
            Values::UInt16(v) => Some(v.iter().map(|&x| x as i64).collect()),
            Values::Int32(v) => Some(v.iter().map(|&x| x as i64).collect()),
            Values::UInt32(v) => Some(v.iter().map(|&x| x as i64).collect()),
            Values::Int64(v) => Some(v.clone()),
            Values::UInt64(v) => v.iter().map(|&x| i64::try_from(x).ok()).collect(),
            _ => None,
        }
    }

    /// Converts any numeric buffer to `f64`.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            Values::Float32(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Values::Float64(v) => Some(v.clone()),
            Values::Int8(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Values::UInt8(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Values::Int16(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Values::UInt16(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Values::Int32(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Values::UInt32(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Values::Int64(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Values::UInt64(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Values::String(_) | Values::Compound(_) => None,
        }
    }

    pub fn into_strings(self) -> Option<Vec<String>> {
        match self {
            Values::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Values::UInt8(v) => Some(v),
            _ => None,
        }
    }

    pub fn member(&self, name: &str) -> Option<&Values> {
        match self {
            Values::Compound(members) => members
                .iter()
                .find(|(member, _)| member == name)
                .map(|(_, values)| values),
            _ => None,
        }
    }
}

macro_rules! values_from_vec {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for Values {
                fn from(value: Vec<$ty>) -> Self {
                    Values::$variant(value)
                }
            }
        )*
    };
}

values_from_vec!(
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    String => String,
);

impl From<Vec<&str>> for Values {
    fn from(value: Vec<&str>) -> Self {
        Values::String(value.into_iter().map(str::to_string).collect())
    }
}

/// Scalar attribute attached to a group or dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(#[serde(with = "f32_bit")] f32),
    Float64(#[serde(with = "f64_bit")] f64),
    Utf8(String),
}

impl AttributeValue {
    pub fn data_type(&self) -> DataType {
        match self {
            AttributeValue::Int8(_) => DataType::Int8,
            AttributeValue::Int16(_) => DataType::Int16,
            AttributeValue::Int32(_) => DataType::Int32,
            AttributeValue::Int64(_) => DataType::Int64,
            AttributeValue::UInt8(_) => DataType::UInt8,
            AttributeValue::UInt16(_) => DataType::UInt16,
            AttributeValue::UInt32(_) => DataType::UInt32,
            AttributeValue::UInt64(_) => DataType::UInt64,
            AttributeValue::Float32(_) => DataType::Float32,
            AttributeValue::Float64(_) => DataType::Float64,
            AttributeValue::Utf8(_) => DataType::String,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int8(v) => Some(*v as i64),
            AttributeValue::Int16(v) => Some(*v as i64),
            AttributeValue::Int32(v) => Some(*v as i64),
            AttributeValue::Int64(v) => Some(*v),
            AttributeValue::UInt8(v) => Some(*v as i64),
            AttributeValue::UInt16(v) => Some(*v as i64),
            AttributeValue::UInt32(v) => Some(*v as i64),
            AttributeValue::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AttributeValue::UInt64(v) => Some(*v),
            other => other.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Float32(v) => Some(*v as f64),
            AttributeValue::Float64(v) => Some(*v),
            AttributeValue::Utf8(_) => None,
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Utf8(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i8> for AttributeValue {
    fn from(value: i8) -> Self {
        AttributeValue::Int8(value)
    }
}

impl From<i16> for AttributeValue {
    fn from(value: i16) -> Self {
        AttributeValue::Int16(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Int32(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int64(value)
    }
}

impl From<u8> for AttributeValue {
    fn from(value: u8) -> Self {
        AttributeValue::UInt8(value)
    }
}

impl From<u16> for AttributeValue {
    fn from(value: u16) -> Self {
        AttributeValue::UInt16(value)
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        AttributeValue::UInt32(value)
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        AttributeValue::UInt64(value)
    }
}

impl From<f32> for AttributeValue {
    fn from(value: f32) -> Self {
        AttributeValue::Float32(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float64(value)
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Utf8(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Utf8(value.to_string())
    }
}

mod f64_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| v.to_bits()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let bits = Vec::<u64>::deserialize(deserializer)?;
        Ok(bits.into_iter().map(f64::from_bits).collect())
    }
}

mod f32_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| v.to_bits()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        let bits = Vec::<u32>::deserialize(deserializer)?;
        Ok(bits.into_iter().map(f32::from_bits).collect())
    }
}

mod f64_bit {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(f64::from_bits(u64::deserialize(deserializer)?))
    }
}

mod f32_bit {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        Ok(f32::from_bits(u32::deserialize(deserializer)?))
    }
}
