//! Type-erased typed arrays.
//!
//! A [`VariantArray`] holds a homogeneous 1-D sequence of one of the
//! supported element types behind a single concrete type, so collections,
//! metadata and datasets can carry heterogeneous numeric data uniformly.
//! The element type is fixed at construction and carried as an
//! [`ArrayType`] tag; numeric kernels switch on the tag once and re-enter
//! a generic body via [`VariantArray::as_slice`].

use crate::error::{Error, Result};
use crate::stream::{BinaryStream, Streamable};
use std::any::Any;

/// Element type tag for a [`VariantArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArrayType {
    /// Signed 8-bit integer.
    Int8 = 0,
    /// Signed 16-bit integer.
    Int16 = 1,
    /// Signed 32-bit integer.
    Int32 = 2,
    /// Signed 64-bit integer.
    Int64 = 3,
    /// Unsigned 8-bit integer.
    UInt8 = 4,
    /// Unsigned 16-bit integer.
    UInt16 = 5,
    /// Unsigned 32-bit integer.
    UInt32 = 6,
    /// Unsigned 64-bit integer.
    UInt64 = 7,
    /// 32-bit float.
    Float32 = 8,
    /// 64-bit float.
    Float64 = 9,
    /// Variable-length string.
    Str = 10,
}

impl ArrayType {
    /// Recover a tag from its wire code.
    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::Int8,
            1 => Self::Int16,
            2 => Self::Int32,
            3 => Self::Int64,
            4 => Self::UInt8,
            5 => Self::UInt16,
            6 => Self::UInt32,
            7 => Self::UInt64,
            8 => Self::Float32,
            9 => Self::Float64,
            10 => Self::Str,
            _ => return Err(Error::format(format!("unknown array type code {code}"))),
        })
    }

    /// Check whether the tag names a floating point type.
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Check whether the tag names any numeric type.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Str)
    }
}

/// Types that can be stored in a [`VariantArray`].
pub trait ArrayElement: Clone + Default + PartialEq + Send + Sync + 'static {
    /// The tag under which this element type is stored.
    const TYPE: ArrayType;
}

macro_rules! impl_array_element {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(impl ArrayElement for $ty {
            const TYPE: ArrayType = ArrayType::$tag;
        })*
    };
}

impl_array_element!(
    i8 => Int8, i16 => Int16, i32 => Int32, i64 => Int64,
    u8 => UInt8, u16 => UInt16, u32 => UInt32, u64 => UInt64,
    f32 => Float32, f64 => Float64, String => Str,
);

/// A type-erased 1-D array.
#[derive(Debug, Clone, PartialEq)]
pub enum VariantArray {
    /// i8 elements.
    Int8(Vec<i8>),
    /// i16 elements.
    Int16(Vec<i16>),
    /// i32 elements.
    Int32(Vec<i32>),
    /// i64 elements.
    Int64(Vec<i64>),
    /// u8 elements.
    UInt8(Vec<u8>),
    /// u16 elements.
    UInt16(Vec<u16>),
    /// u32 elements.
    UInt32(Vec<u32>),
    /// u64 elements.
    UInt64(Vec<u64>),
    /// f32 elements.
    Float32(Vec<f32>),
    /// f64 elements.
    Float64(Vec<f64>),
    /// String elements.
    Str(Vec<String>),
}

macro_rules! each_variant {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            VariantArray::Int8($v) => $body,
            VariantArray::Int16($v) => $body,
            VariantArray::Int32($v) => $body,
            VariantArray::Int64($v) => $body,
            VariantArray::UInt8($v) => $body,
            VariantArray::UInt16($v) => $body,
            VariantArray::UInt32($v) => $body,
            VariantArray::UInt64($v) => $body,
            VariantArray::Float32($v) => $body,
            VariantArray::Float64($v) => $body,
            VariantArray::Str($v) => $body,
        }
    };
}

macro_rules! each_numeric_variant {
    ($self:expr, $v:ident => $body:expr, $str_case:expr) => {
        match $self {
            VariantArray::Int8($v) => $body,
            VariantArray::Int16($v) => $body,
            VariantArray::Int32($v) => $body,
            VariantArray::Int64($v) => $body,
            VariantArray::UInt8($v) => $body,
            VariantArray::UInt16($v) => $body,
            VariantArray::UInt32($v) => $body,
            VariantArray::UInt64($v) => $body,
            VariantArray::Float32($v) => $body,
            VariantArray::Float64($v) => $body,
            VariantArray::Str(_) => $str_case,
        }
    };
}

impl VariantArray {
    /// Create an empty array with the given element type.
    pub fn empty(ty: ArrayType) -> Self {
        match ty {
            ArrayType::Int8 => Self::Int8(Vec::new()),
            ArrayType::Int16 => Self::Int16(Vec::new()),
            ArrayType::Int32 => Self::Int32(Vec::new()),
            ArrayType::Int64 => Self::Int64(Vec::new()),
            ArrayType::UInt8 => Self::UInt8(Vec::new()),
            ArrayType::UInt16 => Self::UInt16(Vec::new()),
            ArrayType::UInt32 => Self::UInt32(Vec::new()),
            ArrayType::UInt64 => Self::UInt64(Vec::new()),
            ArrayType::Float32 => Self::Float32(Vec::new()),
            ArrayType::Float64 => Self::Float64(Vec::new()),
            ArrayType::Str => Self::Str(Vec::new()),
        }
    }

    /// Create an array from a typed vector.
    pub fn from_vec<T: ArrayElement>(v: Vec<T>) -> Self {
        let mut out = Self::empty(T::TYPE);
        each_variant!(&mut out, dst => {
            let any: Box<dyn Any> = Box::new(v);
            // the tag chosen by T::TYPE guarantees the downcast succeeds
            *dst = *any.downcast().expect("element type mismatch");
        });
        out
    }

    /// The element type tag.
    pub fn element_type(&self) -> ArrayType {
        match self {
            Self::Int8(_) => ArrayType::Int8,
            Self::Int16(_) => ArrayType::Int16,
            Self::Int32(_) => ArrayType::Int32,
            Self::Int64(_) => ArrayType::Int64,
            Self::UInt8(_) => ArrayType::UInt8,
            Self::UInt16(_) => ArrayType::UInt16,
            Self::UInt32(_) => ArrayType::UInt32,
            Self::UInt64(_) => ArrayType::UInt64,
            Self::Float32(_) => ArrayType::Float32,
            Self::Float64(_) => ArrayType::Float64,
            Self::Str(_) => ArrayType::Str,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        each_variant!(self, v => v.len())
    }

    /// Check whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A new empty array of the same element type.
    pub fn new_instance(&self) -> Self {
        Self::empty(self.element_type())
    }

    /// A new array holding elements `[lo, hi]` inclusive.
    pub fn new_copy(&self, lo: usize, hi: usize) -> Result<Self> {
        if lo > hi || hi >= self.len() {
            return Err(Error::semantic(format!(
                "copy range [{lo}, {hi}] out of bounds for array of {} elements",
                self.len()
            )));
        }
        let mut out = self.new_instance();
        each_variant!(self, src => {
            each_variant!(&mut out, dst => {
                let any: &dyn Any = src;
                if let Some(src) = any.downcast_ref() {
                    let src: &Vec<_> = src;
                    dst.extend_from_slice(&src[lo..=hi]);
                }
            })
        });
        Ok(out)
    }

    /// Grow or shrink to `n` elements, default-filling new slots.
    pub fn resize(&mut self, n: usize) {
        each_variant!(self, v => v.resize(n, Default::default()))
    }

    /// Append all elements of `other`, which must share this element type.
    pub fn append(&mut self, other: &VariantArray) -> Result<()> {
        if self.element_type() != other.element_type() {
            return Err(Error::semantic(format!(
                "cannot append {:?} array to {:?} array",
                other.element_type(),
                self.element_type()
            )));
        }
        each_variant!(self, dst => {
            each_variant!(other, src => {
                let any: &dyn Any = src;
                if let Some(src) = any.downcast_ref::<Vec<_>>() {
                    dst.extend_from_slice(src);
                }
            })
        });
        Ok(())
    }

    /// Borrow the backing vector as a typed slice.
    ///
    /// Returns `None` when `T` does not match the stored element type.
    pub fn as_slice<T: ArrayElement>(&self) -> Option<&[T]> {
        each_variant!(self, v => {
            let any: &dyn Any = v;
            any.downcast_ref::<Vec<T>>().map(|v| v.as_slice())
        })
    }

    /// Borrow the backing vector as a mutable typed slice.
    pub fn as_mut_slice<T: ArrayElement>(&mut self) -> Option<&mut [T]> {
        each_variant!(self, v => {
            let any: &mut dyn Any = v;
            any.downcast_mut::<Vec<T>>().map(|v| v.as_mut_slice())
        })
    }

    /// Read element `i` widened to f64.
    ///
    /// String arrays have no numeric value.
    pub fn get_f64(&self, i: usize) -> Result<f64> {
        if i >= self.len() {
            return Err(Error::semantic(format!(
                "index {i} out of bounds for array of {} elements",
                self.len()
            )));
        }
        each_numeric_variant!(self, v => Ok(v[i] as f64),
            Err(Error::semantic("string array has no numeric value")))
    }

    /// Write element `i` from an f64, narrowing to the element type.
    pub fn set_f64(&mut self, i: usize, value: f64) -> Result<()> {
        if i >= self.len() {
            return Err(Error::semantic(format!(
                "index {i} out of bounds for array of {} elements",
                self.len()
            )));
        }
        each_numeric_variant!(self, v => {
            v[i] = value as _;
            Ok(())
        }, Err(Error::semantic("string array has no numeric value")))
    }

    /// Read element `i` of a string array.
    pub fn get_str(&self, i: usize) -> Result<&str> {
        match self {
            Self::Str(v) => v
                .get(i)
                .map(|s| s.as_str())
                .ok_or_else(|| Error::semantic(format!("index {i} out of bounds"))),
            _ => Err(Error::semantic("not a string array")),
        }
    }

    /// Copy the contents widened to a `Vec<f64>`.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        each_numeric_variant!(self, v => Ok(v.iter().map(|x| *x as f64).collect()),
            Err(Error::semantic("string array has no numeric value")))
    }
}

impl Streamable for VariantArray {
    fn to_stream(&self, stream: &mut BinaryStream) {
        stream.pack_u8(self.element_type() as u8);
        stream.pack_u64(self.len() as u64);
        match self {
            Self::Int8(v) => v.iter().for_each(|x| stream.pack_i64(*x as i64)),
            Self::Int16(v) => v.iter().for_each(|x| stream.pack_i64(*x as i64)),
            Self::Int32(v) => v.iter().for_each(|x| stream.pack_i64(*x as i64)),
            Self::Int64(v) => v.iter().for_each(|x| stream.pack_i64(*x)),
            Self::UInt8(v) => v.iter().for_each(|x| stream.pack_u64(*x as u64)),
            Self::UInt16(v) => v.iter().for_each(|x| stream.pack_u64(*x as u64)),
            Self::UInt32(v) => v.iter().for_each(|x| stream.pack_u64(*x as u64)),
            Self::UInt64(v) => v.iter().for_each(|x| stream.pack_u64(*x)),
            Self::Float32(v) => v.iter().for_each(|x| stream.pack_f32(*x)),
            Self::Float64(v) => v.iter().for_each(|x| stream.pack_f64(*x)),
            Self::Str(v) => v.iter().for_each(|x| stream.pack_str(x)),
        }
    }

    fn from_stream(stream: &mut BinaryStream) -> Result<Self> {
        let ty = ArrayType::from_code(stream.unpack_u8()?)?;
        let n = stream.unpack_u64()? as usize;
        let mut out = Self::empty(ty);
        match &mut out {
            Self::Int8(v) => {
                for _ in 0..n {
                    v.push(stream.unpack_i64()? as i8);
                }
            }
            Self::Int16(v) => {
                for _ in 0..n {
                    v.push(stream.unpack_i64()? as i16);
                }
            }
            Self::Int32(v) => {
                for _ in 0..n {
                    v.push(stream.unpack_i64()? as i32);
                }
            }
            Self::Int64(v) => {
                for _ in 0..n {
                    v.push(stream.unpack_i64()?);
                }
            }
            Self::UInt8(v) => {
                for _ in 0..n {
                    v.push(stream.unpack_u64()? as u8);
                }
            }
            Self::UInt16(v) => {
                for _ in 0..n {
                    v.push(stream.unpack_u64()? as u16);
                }
            }
            Self::UInt32(v) => {
                for _ in 0..n {
                    v.push(stream.unpack_u64()? as u32);
                }
            }
            Self::UInt64(v) => {
                for _ in 0..n {
                    v.push(stream.unpack_u64()?);
                }
            }
            Self::Float32(v) => {
                for _ in 0..n {
                    v.push(stream.unpack_f32()?);
                }
            }
            Self::Float64(v) => {
                for _ in 0..n {
                    v.push(stream.unpack_f64()?);
                }
            }
            Self::Str(v) => {
                for _ in 0..n {
                    v.push(stream.unpack_str()?);
                }
            }
        }
        Ok(out)
    }
}

impl<T: ArrayElement> From<Vec<T>> for VariantArray {
    fn from(v: Vec<T>) -> Self {
        Self::from_vec(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_preserves_type_and_values() {
        let a = VariantArray::from_vec(vec![1.5f32, 2.5, 3.5]);
        assert_eq!(a.element_type(), ArrayType::Float32);
        assert_eq!(a.as_slice::<f32>(), Some(&[1.5f32, 2.5, 3.5][..]));
        assert!(a.as_slice::<f64>().is_none());
    }

    #[test]
    fn test_new_copy_is_inclusive() {
        let a = VariantArray::from_vec(vec![10i32, 11, 12, 13, 14]);
        let b = a.new_copy(1, 3).unwrap();
        assert_eq!(b.as_slice::<i32>(), Some(&[11i32, 12, 13][..]));
        assert!(a.new_copy(3, 1).is_err());
        assert!(a.new_copy(0, 5).is_err());
    }

    #[test]
    fn test_new_instance_is_empty_same_type() {
        let a = VariantArray::from_vec(vec!["x".to_string()]);
        let b = a.new_instance();
        assert_eq!(b.element_type(), ArrayType::Str);
        assert!(b.is_empty());
    }

    #[test]
    fn test_append_requires_same_type() {
        let mut a = VariantArray::from_vec(vec![1.0f64, 2.0]);
        a.append(&VariantArray::from_vec(vec![3.0f64])).unwrap();
        assert_eq!(a.len(), 3);
        assert!(a.append(&VariantArray::from_vec(vec![1i32])).is_err());
    }

    #[test]
    fn test_stream_round_trip_every_type() {
        let arrays = vec![
            VariantArray::from_vec(vec![-1i8, 2]),
            VariantArray::from_vec(vec![-300i16, 300]),
            VariantArray::from_vec(vec![-70000i32]),
            VariantArray::from_vec(vec![i64::MIN, i64::MAX]),
            VariantArray::from_vec(vec![0u8, 255]),
            VariantArray::from_vec(vec![65535u16]),
            VariantArray::from_vec(vec![4_000_000_000u32]),
            VariantArray::from_vec(vec![u64::MAX]),
            VariantArray::from_vec(vec![1.5f32, -0.25]),
            VariantArray::from_vec(vec![std::f64::consts::PI]),
            VariantArray::from_vec(vec!["time".to_string(), "".to_string()]),
        ];
        for a in arrays {
            let mut s = BinaryStream::new();
            a.to_stream(&mut s);
            let b = VariantArray::from_stream(&mut s).unwrap();
            assert_eq!(a, b);
            assert!(s.is_empty());
        }
    }

    #[test]
    fn test_get_set_f64() {
        let mut a = VariantArray::from_vec(vec![0u16; 4]);
        a.set_f64(2, 99.0).unwrap();
        assert_eq!(a.get_f64(2).unwrap(), 99.0);
        assert!(a.get_f64(4).is_err());

        let s = VariantArray::from_vec(vec!["a".to_string()]);
        assert!(s.get_f64(0).is_err());
    }
}
