//! PV values.
//!
//! A PV holds one of seven value kinds. [`PvValue`] is the type-erased form
//! that crosses the backend boundary; [`PvType`] maps each Rust type to its
//! variant so drivers can keep working with plain `i32`, `Vec<f64>`, ...

use crate::error::{NdsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value kind of a PV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// `i32`
    Int32,
    /// `f64`
    Float64,
    /// `Vec<i8>`
    Int8Array,
    /// `Vec<u8>`
    UInt8Array,
    /// `Vec<i32>`
    Int32Array,
    /// `Vec<f64>`
    Float64Array,
    /// `String`
    String,
}

impl DataType {
    /// True for the array kinds and strings, which honor `max_elements`.
    pub fn is_array(self) -> bool {
        !matches!(self, DataType::Int32 | DataType::Float64)
    }

    /// Parses a textual value, as received in command parameters or typed on
    /// a console. Arrays are comma separated.
    pub fn parse_value(self, text: &str) -> Result<PvValue> {
        let invalid = || NdsError::InvalidValue {
            text: text.to_string(),
            data_type: self,
        };
        fn parse_list<T: std::str::FromStr>(text: &str) -> Option<Vec<T>> {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Some(Vec::new());
            }
            trimmed
                .split(',')
                .map(|item| item.trim().parse().ok())
                .collect()
        }

        let value = match self {
            DataType::Int32 => PvValue::Int32(text.trim().parse().map_err(|_| invalid())?),
            DataType::Float64 => PvValue::Float64(text.trim().parse().map_err(|_| invalid())?),
            DataType::Int8Array => PvValue::Int8Array(parse_list(text).ok_or_else(invalid)?),
            DataType::UInt8Array => PvValue::UInt8Array(parse_list(text).ok_or_else(invalid)?),
            DataType::Int32Array => PvValue::Int32Array(parse_list(text).ok_or_else(invalid)?),
            DataType::Float64Array => {
                PvValue::Float64Array(parse_list(text).ok_or_else(invalid)?)
            }
            DataType::String => PvValue::String(text.to_string()),
        };
        Ok(value)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DataType::Int32 => "int32",
            DataType::Float64 => "float64",
            DataType::Int8Array => "int8[]",
            DataType::UInt8Array => "uint8[]",
            DataType::Int32Array => "int32[]",
            DataType::Float64Array => "float64[]",
            DataType::String => "string",
        };
        f.write_str(label)
    }
}

/// Type-erased PV value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PvValue {
    /// Scalar integer
    Int32(i32),
    /// Scalar float
    Float64(f64),
    /// Signed byte array
    Int8Array(Vec<i8>),
    /// Unsigned byte array
    UInt8Array(Vec<u8>),
    /// Integer array
    Int32Array(Vec<i32>),
    /// Float array
    Float64Array(Vec<f64>),
    /// Text
    String(String),
}

impl PvValue {
    /// The kind of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            PvValue::Int32(_) => DataType::Int32,
            PvValue::Float64(_) => DataType::Float64,
            PvValue::Int8Array(_) => DataType::Int8Array,
            PvValue::UInt8Array(_) => DataType::UInt8Array,
            PvValue::Int32Array(_) => DataType::Int32Array,
            PvValue::Float64Array(_) => DataType::Float64Array,
            PvValue::String(_) => DataType::String,
        }
    }

    /// Number of elements (1 for scalars, bytes for strings).
    pub fn len(&self) -> usize {
        match self {
            PvValue::Int32(_) | PvValue::Float64(_) => 1,
            PvValue::Int8Array(v) => v.len(),
            PvValue::UInt8Array(v) => v.len(),
            PvValue::Int32Array(v) => v.len(),
            PvValue::Float64Array(v) => v.len(),
            PvValue::String(v) => v.len(),
        }
    }

    /// True for empty arrays and strings.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Default value for a kind.
    pub fn default_for(data_type: DataType) -> Self {
        match data_type {
            DataType::Int32 => PvValue::Int32(0),
            DataType::Float64 => PvValue::Float64(0.0),
            DataType::Int8Array => PvValue::Int8Array(Vec::new()),
            DataType::UInt8Array => PvValue::UInt8Array(Vec::new()),
            DataType::Int32Array => PvValue::Int32Array(Vec::new()),
            DataType::Float64Array => PvValue::Float64Array(Vec::new()),
            DataType::String => PvValue::String(String::new()),
        }
    }
}

impl fmt::Display for PvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
            for (index, item) in items.iter().enumerate() {
                if index != 0 {
                    f.write_str(",")?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }
        match self {
            PvValue::Int32(v) => write!(f, "{v}"),
            PvValue::Float64(v) => write!(f, "{v}"),
            PvValue::Int8Array(v) => join(f, v),
            PvValue::UInt8Array(v) => join(f, v),
            PvValue::Int32Array(v) => join(f, v),
            PvValue::Float64Array(v) => join(f, v),
            PvValue::String(v) => f.write_str(v),
        }
    }
}

/// Rust types that can be stored in a PV.
pub trait PvType: Clone + Default + Send + Sync + 'static {
    /// The matching value kind.
    const DATA_TYPE: DataType;

    /// Wraps the value.
    fn into_value(self) -> PvValue;

    /// Unwraps the value, `None` on kind mismatch.
    fn from_value(value: PvValue) -> Option<Self>;
}

macro_rules! impl_pv_type {
    ($rust:ty, $variant:ident) => {
        impl PvType for $rust {
            const DATA_TYPE: DataType = DataType::$variant;

            fn into_value(self) -> PvValue {
                PvValue::$variant(self)
            }

            fn from_value(value: PvValue) -> Option<Self> {
                match value {
                    PvValue::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

impl_pv_type!(i32, Int32);
impl_pv_type!(f64, Float64);
impl_pv_type!(Vec<i8>, Int8Array);
impl_pv_type!(Vec<u8>, UInt8Array);
impl_pv_type!(Vec<i32>, Int32Array);
impl_pv_type!(Vec<f64>, Float64Array);
impl_pv_type!(String, String);

/// Unwraps `value` as `T`, reporting a [`NdsError::TypeMismatch`] against `pv`.
pub fn expect_type<T: PvType>(pv: &str, value: PvValue) -> Result<T> {
    let actual = value.data_type();
    T::from_value(value).ok_or_else(|| NdsError::TypeMismatch {
        pv: pv.to_string(),
        expected: T::DATA_TYPE,
        actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_value_rejects_other_kinds() {
        assert_eq!(i32::from_value(PvValue::Int32(4)), Some(4));
        assert_eq!(i32::from_value(PvValue::Float64(4.0)), None);
        assert_eq!(
            String::from_value(PvValue::String("x".into())),
            Some("x".to_string())
        );
    }

    #[test]
    fn test_expect_type_reports_mismatch() {
        let err = expect_type::<f64>("dev-pv", PvValue::Int32(1)).unwrap_err();
        match err {
            NdsError::TypeMismatch {
                pv,
                expected,
                actual,
            } => {
                assert_eq!(pv, "dev-pv");
                assert_eq!(expected, DataType::Float64);
                assert_eq!(actual, DataType::Int32);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(
            DataType::Int32.parse_value(" 42 ").unwrap(),
            PvValue::Int32(42)
        );
        assert_eq!(
            DataType::Float64Array.parse_value("1.5, 2").unwrap(),
            PvValue::Float64Array(vec![1.5, 2.0])
        );
        assert_eq!(
            DataType::UInt8Array.parse_value("").unwrap(),
            PvValue::UInt8Array(vec![])
        );
        assert!(DataType::Int32.parse_value("four").is_err());
        assert!(DataType::Int8Array.parse_value("1,300").is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let value = PvValue::Int32Array(vec![3, -1, 7]);
        assert_eq!(value.to_string(), "3,-1,7");
        assert_eq!(DataType::Int32Array.parse_value(&value.to_string()).unwrap(), value);
    }

    #[test]
    fn test_len_and_arrays() {
        assert_eq!(PvValue::Float64(1.0).len(), 1);
        assert_eq!(PvValue::String("abc".into()).len(), 3);
        assert!(PvValue::default_for(DataType::Int8Array).is_empty());
        assert!(DataType::String.is_array());
        assert!(!DataType::Int32.is_array());
    }
}
