//! Binary wire codec. Fixed-width integers and floats are little-endian,
//! strings and vectors carry a `u32` length prefix, tuples are encoded
//! back-to-back since their arity is statically known. A one-byte tag
//! identifies a [`Type`] wherever the reader cannot know it statically.

use std::io::{Read, Write};

use crate::error::CodecError;
use crate::sequence::Op;
use crate::value::{AssetKind, Type};

pub trait Encode {
    fn encode(&self, output: &mut impl Write) -> std::io::Result<()>;
}

pub trait Decode: Sized {
    fn decode(input: &mut impl Read) -> Result<Self, CodecError>;
}

macro_rules! codec_for_primitive {
    ($t:ty) => {
        impl Encode for $t {
            fn encode(&self, output: &mut impl Write) -> std::io::Result<()> {
                output.write_all(&self.to_le_bytes())
            }
        }

        impl Decode for $t {
            fn decode(input: &mut impl Read) -> Result<Self, CodecError> {
                let mut buf = [0u8; size_of::<$t>()];
                input.read_exact(&mut buf)?;
                Ok(<$t>::from_le_bytes(buf))
            }
        }
    };
}

codec_for_primitive!(u8);
codec_for_primitive!(u16);
codec_for_primitive!(u32);
codec_for_primitive!(u64);
codec_for_primitive!(i8);
codec_for_primitive!(i16);
codec_for_primitive!(i32);
codec_for_primitive!(i64);
codec_for_primitive!(f32);
codec_for_primitive!(f64);

impl Encode for bool {
    fn encode(&self, output: &mut impl Write) -> std::io::Result<()> {
        u8::from(*self).encode(output)
    }
}

impl Decode for bool {
    fn decode(input: &mut impl Read) -> Result<Self, CodecError> {
        Ok(u8::decode(input)? != 0)
    }
}

impl Encode for str {
    fn encode(&self, output: &mut impl Write) -> std::io::Result<()> {
        let bytes = self.as_bytes();
        (bytes.len() as u32).encode(output)?;
        output.write_all(bytes)
    }
}

impl Encode for String {
    fn encode(&self, output: &mut impl Write) -> std::io::Result<()> {
        self.as_str().encode(output)
    }
}

impl Decode for String {
    fn decode(input: &mut impl Read) -> Result<Self, CodecError> {
        let len = u32::decode(input)? as usize;
        let mut buf = vec![0u8; len];
        input.read_exact(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, output: &mut impl Write) -> std::io::Result<()> {
        (self.len() as u32).encode(output)?;
        self.iter().try_for_each(|elem| elem.encode(output))
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(input: &mut impl Read) -> Result<Self, CodecError> {
        let len = u32::decode(input)? as usize;
        let mut vec = Vec::with_capacity(len);
        for _ in 0..len {
            vec.push(T::decode(input)?);
        }
        Ok(vec)
    }
}

macro_rules! codec_for_tuple {
    ($($t:ident),+) => {
        impl<$($t),+> Encode for ($($t),+,)
        where $($t: Encode),+
        {
            #[allow(non_snake_case)]
            fn encode(&self, output: &mut impl Write) -> std::io::Result<()> {
                let ($($t,)+) = self;
                $($t.encode(output)?;)+
                Ok(())
            }
        }

        impl<$($t),+> Decode for ($($t),+,)
        where $($t: Decode),+
        {
            #[allow(non_snake_case)]
            fn decode(input: &mut impl Read) -> Result<($($t),+,), CodecError> {
                $(let $t = <$t as Decode>::decode(input)?;)+
                Ok(($($t),+,))
            }
        }
    };
}

codec_for_tuple!(T1);
codec_for_tuple!(T1, T2);
codec_for_tuple!(T1, T2, T3);
codec_for_tuple!(T1, T2, T3, T4);
codec_for_tuple!(T1, T2, T3, T4, T5);
codec_for_tuple!(T1, T2, T3, T4, T5, T6);
codec_for_tuple!(T1, T2, T3, T4, T5, T6, T7);
codec_for_tuple!(T1, T2, T3, T4, T5, T6, T7, T8);

impl Encode for AssetKind {
    fn encode(&self, output: &mut impl Write) -> std::io::Result<()> {
        let byte: u8 = match self {
            AssetKind::Project => 0,
            AssetKind::Node => 1,
            AssetKind::NodeList => 2,
            AssetKind::Sequence => 3,
        };
        byte.encode(output)
    }
}

impl Decode for AssetKind {
    fn decode(input: &mut impl Read) -> Result<Self, CodecError> {
        match u8::decode(input)? {
            0 => Ok(AssetKind::Project),
            1 => Ok(AssetKind::Node),
            2 => Ok(AssetKind::NodeList),
            3 => Ok(AssetKind::Sequence),
            t => Err(CodecError::UnknownAssetKind(t)),
        }
    }
}

/// The wildcard node type travels as this name.
const NODE_WILDCARD: &str = "*";

impl Encode for Type {
    fn encode(&self, output: &mut impl Write) -> std::io::Result<()> {
        match self {
            Type::U8 => 0u8.encode(output),
            Type::U16 => 1u8.encode(output),
            Type::U32 => 2u8.encode(output),
            Type::U64 => 3u8.encode(output),
            Type::I8 => 4u8.encode(output),
            Type::I16 => 5u8.encode(output),
            Type::I32 => 6u8.encode(output),
            Type::I64 => 7u8.encode(output),
            Type::F32 => 8u8.encode(output),
            Type::F64 => 9u8.encode(output),
            Type::Bool => 10u8.encode(output),
            Type::String => 11u8.encode(output),
            Type::Vec(item) => {
                12u8.encode(output)?;
                item.encode(output)
            }
            Type::Tuple(items) => {
                13u8.encode(output)?;
                (items.len() as u32).encode(output)?;
                items.iter().try_for_each(|item| item.encode(output))
            }
            Type::Project => 14u8.encode(output),
            Type::Node(name) => {
                15u8.encode(output)?;
                name.as_deref().unwrap_or(NODE_WILDCARD).encode(output)
            }
            Type::NodeList => 16u8.encode(output),
            Type::Sequence => 17u8.encode(output),
        }
    }
}

impl Decode for Type {
    fn decode(input: &mut impl Read) -> Result<Self, CodecError> {
        match u8::decode(input)? {
            0 => Ok(Type::U8),
            1 => Ok(Type::U16),
            2 => Ok(Type::U32),
            3 => Ok(Type::U64),
            4 => Ok(Type::I8),
            5 => Ok(Type::I16),
            6 => Ok(Type::I32),
            7 => Ok(Type::I64),
            8 => Ok(Type::F32),
            9 => Ok(Type::F64),
            10 => Ok(Type::Bool),
            11 => Ok(Type::String),
            12 => Ok(Type::Vec(Box::new(Type::decode(input)?))),
            13 => {
                let len = u32::decode(input)? as usize;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(Type::decode(input)?);
                }
                Ok(Type::Tuple(items))
            }
            14 => Ok(Type::Project),
            15 => {
                let name = String::decode(input)?;
                if name == NODE_WILDCARD {
                    Ok(Type::Node(None))
                } else {
                    Ok(Type::Node(Some(name)))
                }
            }
            16 => Ok(Type::NodeList),
            17 => Ok(Type::Sequence),
            t => Err(CodecError::UnknownTypeTag(t)),
        }
    }
}

/// A value in its wire shape. Node-list and sequence references appear as
/// the referenced asset's current id. Values are encoded without their own
/// type tag; whoever writes one either knows the type statically or writes
/// a [`Type`] first.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    Vec(Vec<TypedValue>),
    Tuple(Vec<TypedValue>),
    Node(Vec<(Type, TypedValue)>),
    NodeList(u32),
    Sequence(u32),
}

impl Encode for TypedValue {
    fn encode(&self, output: &mut impl Write) -> std::io::Result<()> {
        match self {
            TypedValue::U8(v) => v.encode(output),
            TypedValue::U16(v) => v.encode(output),
            TypedValue::U32(v) => v.encode(output),
            TypedValue::U64(v) => v.encode(output),
            TypedValue::I8(v) => v.encode(output),
            TypedValue::I16(v) => v.encode(output),
            TypedValue::I32(v) => v.encode(output),
            TypedValue::I64(v) => v.encode(output),
            TypedValue::F32(v) => v.encode(output),
            TypedValue::F64(v) => v.encode(output),
            TypedValue::Bool(v) => v.encode(output),
            TypedValue::String(v) => v.encode(output),
            TypedValue::Vec(items) => {
                (items.len() as u32).encode(output)?;
                items.iter().try_for_each(|item| item.encode(output))
            }
            TypedValue::Tuple(items) => items.iter().try_for_each(|item| item.encode(output)),
            TypedValue::Node(args) => {
                (args.len() as u32).encode(output)?;
                args.iter().try_for_each(|(ty, arg)| {
                    ty.encode(output)?;
                    arg.encode(output)
                })
            }
            TypedValue::NodeList(id) => id.encode(output),
            TypedValue::Sequence(id) => id.encode(output),
        }
    }
}

impl TypedValue {
    /// Decoding needs the value's type, which the surrounding stream either
    /// fixes statically or spells out with a preceding type tag.
    pub fn decode(input: &mut impl Read, ty: &Type) -> Result<Self, CodecError> {
        Ok(match ty {
            Type::U8 => TypedValue::U8(u8::decode(input)?),
            Type::U16 => TypedValue::U16(u16::decode(input)?),
            Type::U32 => TypedValue::U32(u32::decode(input)?),
            Type::U64 => TypedValue::U64(u64::decode(input)?),
            Type::I8 => TypedValue::I8(i8::decode(input)?),
            Type::I16 => TypedValue::I16(i16::decode(input)?),
            Type::I32 => TypedValue::I32(i32::decode(input)?),
            Type::I64 => TypedValue::I64(i64::decode(input)?),
            Type::F32 => TypedValue::F32(f32::decode(input)?),
            Type::F64 => TypedValue::F64(f64::decode(input)?),
            Type::Bool => TypedValue::Bool(bool::decode(input)?),
            Type::String => TypedValue::String(String::decode(input)?),
            Type::Vec(item_ty) => {
                let len = u32::decode(input)? as usize;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(TypedValue::decode(input, item_ty)?);
                }
                TypedValue::Vec(items)
            }
            Type::Tuple(item_tys) => {
                let mut items = Vec::with_capacity(item_tys.len());
                for item_ty in item_tys {
                    items.push(TypedValue::decode(input, item_ty)?);
                }
                TypedValue::Tuple(items)
            }
            Type::Project => return Err(CodecError::UnknownTypeTag(14)),
            Type::Node(_) => {
                let len = u32::decode(input)? as usize;
                let mut args = Vec::with_capacity(len);
                for _ in 0..len {
                    let arg_ty = Type::decode(input)?;
                    let arg = TypedValue::decode(input, &arg_ty)?;
                    args.push((arg_ty, arg));
                }
                TypedValue::Node(args)
            }
            Type::NodeList => TypedValue::NodeList(u32::decode(input)?),
            Type::Sequence => TypedValue::Sequence(u32::decode(input)?),
        })
    }
}

/// Comparison operator carried by the numeric branch instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equals,
    NotEquals,
    LessThan,
    GreaterThan,
    LessEquals,
    GreaterEquals,
}

impl Encode for Comparison {
    fn encode(&self, output: &mut impl Write) -> std::io::Result<()> {
        let byte: u8 = match self {
            Comparison::Equals => 0,
            Comparison::NotEquals => 1,
            Comparison::LessThan => 2,
            Comparison::GreaterThan => 3,
            Comparison::LessEquals => 4,
            Comparison::GreaterEquals => 5,
        };
        byte.encode(output)
    }
}

impl Decode for Comparison {
    fn decode(input: &mut impl Read) -> Result<Self, CodecError> {
        match u8::decode(input)? {
            0 => Ok(Comparison::Equals),
            1 => Ok(Comparison::NotEquals),
            2 => Ok(Comparison::LessThan),
            3 => Ok(Comparison::GreaterThan),
            4 => Ok(Comparison::LessEquals),
            5 => Ok(Comparison::GreaterEquals),
            c => Err(CodecError::UnknownComparison(c)),
        }
    }
}

/// A fully resolved instruction in its wire shape.
pub type WireOp = Op<u32, TypedValue>;

impl Encode for WireOp {
    fn encode(&self, output: &mut impl Write) -> std::io::Result<()> {
        match self {
            Op::PushOffset { node, property } => {
                0u8.encode(output)?;
                node.encode(output)?;
                property.encode(output)
            }
            Op::Set { ty, value } => {
                1u8.encode(output)?;
                ty.encode(output)?;
                value.encode(output)
            }
            Op::SetString { value } => {
                2u8.encode(output)?;
                value.encode(output)
            }
            Op::Modify { ty, value } => {
                3u8.encode(output)?;
                ty.encode(output)?;
                value.encode(output)
            }
            Op::ModifyF32 { value } => {
                4u8.encode(output)?;
                value.encode(output)
            }
            Op::ModifyF64 { value } => {
                5u8.encode(output)?;
                value.encode(output)
            }
            Op::BranchIfTrue { target } => {
                6u8.encode(output)?;
                target.encode(output)
            }
            Op::BranchIfFalse { target } => {
                7u8.encode(output)?;
                target.encode(output)
            }
            Op::BranchUint {
                comparison,
                ty,
                value,
                target,
            } => {
                8u8.encode(output)?;
                comparison.encode(output)?;
                ty.encode(output)?;
                value.encode(output)?;
                target.encode(output)
            }
            Op::BranchSint {
                comparison,
                ty,
                value,
                target,
            } => {
                9u8.encode(output)?;
                comparison.encode(output)?;
                ty.encode(output)?;
                value.encode(output)?;
                target.encode(output)
            }
            Op::BranchF32 {
                comparison,
                value,
                target,
            } => {
                10u8.encode(output)?;
                comparison.encode(output)?;
                value.encode(output)?;
                target.encode(output)
            }
            Op::BranchF64 {
                comparison,
                value,
                target,
            } => {
                11u8.encode(output)?;
                comparison.encode(output)?;
                value.encode(output)?;
                target.encode(output)
            }
            Op::Jump { target } => {
                12u8.encode(output)?;
                target.encode(output)
            }
            Op::Call { target } => {
                13u8.encode(output)?;
                target.encode(output)
            }
            Op::Return => 14u8.encode(output),
            Op::Wait { frames } => {
                15u8.encode(output)?;
                frames.encode(output)
            }
            Op::RunCustom { fname } => {
                16u8.encode(output)?;
                fname.encode(output)
            }
            Op::BranchCustom { fname, target } => {
                17u8.encode(output)?;
                fname.encode(output)?;
                target.encode(output)
            }
        }
    }
}

impl Decode for WireOp {
    fn decode(input: &mut impl Read) -> Result<Self, CodecError> {
        Ok(match u8::decode(input)? {
            0 => Op::PushOffset {
                node: String::decode(input)?,
                property: String::decode(input)?,
            },
            1 => {
                let ty = Type::decode(input)?;
                let value = TypedValue::decode(input, &ty)?;
                Op::Set { ty, value }
            }
            2 => Op::SetString {
                value: String::decode(input)?,
            },
            3 => {
                let ty = Type::decode(input)?;
                let value = TypedValue::decode(input, &ty)?;
                Op::Modify { ty, value }
            }
            4 => Op::ModifyF32 {
                value: f32::decode(input)?,
            },
            5 => Op::ModifyF64 {
                value: f64::decode(input)?,
            },
            6 => Op::BranchIfTrue {
                target: u32::decode(input)?,
            },
            7 => Op::BranchIfFalse {
                target: u32::decode(input)?,
            },
            8 => {
                let comparison = Comparison::decode(input)?;
                let ty = Type::decode(input)?;
                let value = TypedValue::decode(input, &ty)?;
                Op::BranchUint {
                    comparison,
                    ty,
                    value,
                    target: u32::decode(input)?,
                }
            }
            9 => {
                let comparison = Comparison::decode(input)?;
                let ty = Type::decode(input)?;
                let value = TypedValue::decode(input, &ty)?;
                Op::BranchSint {
                    comparison,
                    ty,
                    value,
                    target: u32::decode(input)?,
                }
            }
            10 => Op::BranchF32 {
                comparison: Comparison::decode(input)?,
                value: f32::decode(input)?,
                target: u32::decode(input)?,
            },
            11 => Op::BranchF64 {
                comparison: Comparison::decode(input)?,
                value: f64::decode(input)?,
                target: u32::decode(input)?,
            },
            12 => Op::Jump {
                target: u32::decode(input)?,
            },
            13 => Op::Call {
                target: u32::decode(input)?,
            },
            14 => Op::Return,
            15 => Op::Wait {
                frames: u16::decode(input)?,
            },
            16 => Op::RunCustom {
                fname: String::decode(input)?,
            },
            17 => Op::BranchCustom {
                fname: String::decode(input)?,
                target: u32::decode(input)?,
            },
            op => return Err(CodecError::UnknownOpcode(op)),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn conformance_vector() {
        let mut data = Cursor::new(Vec::<u8>::new());

        5u8.encode(&mut data).unwrap();
        10u16.encode(&mut data).unwrap();
        15u32.encode(&mut data).unwrap();
        20u64.encode(&mut data).unwrap();
        (-5i8).encode(&mut data).unwrap();
        (-10i16).encode(&mut data).unwrap();
        (-15i32).encode(&mut data).unwrap();
        (-20i64).encode(&mut data).unwrap();
        false.encode(&mut data).unwrap();
        "test".encode(&mut data).unwrap();
        vec![1i16, 2, 3, 4, 5].encode(&mut data).unwrap();
        ("a".to_owned(), 5u8).encode(&mut data).unwrap();

        assert_eq!(
            data.get_ref(),
            &[
                0x05, 0x0A, 0x00, 0x0F, 0x00, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0xFB, 0xF6, 0xFF, 0xF1, 0xFF, 0xFF, 0xFF, 0xEC, 0xFF, 0xFF, 0xFF,
                0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x04, 0x00, 0x00, 0x00, 0x74, 0x65, 0x73, 0x74,
                0x05, 0x00, 0x00, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04, 0x00, 0x05,
                0x00, 0x01, 0x00, 0x00, 0x00, 0x61, 0x05
            ]
        );
        data.set_position(0);

        assert_eq!(u8::decode(&mut data).unwrap(), 5);
        assert_eq!(u16::decode(&mut data).unwrap(), 10);
        assert_eq!(u32::decode(&mut data).unwrap(), 15);
        assert_eq!(u64::decode(&mut data).unwrap(), 20);
        assert_eq!(i8::decode(&mut data).unwrap(), -5);
        assert_eq!(i16::decode(&mut data).unwrap(), -10);
        assert_eq!(i32::decode(&mut data).unwrap(), -15);
        assert_eq!(i64::decode(&mut data).unwrap(), -20);
        assert!(!bool::decode(&mut data).unwrap());
        assert_eq!(String::decode(&mut data).unwrap(), "test");
        assert_eq!(Vec::<i16>::decode(&mut data).unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(
            <(String, u8)>::decode(&mut data).unwrap(),
            ("a".to_owned(), 5u8)
        );
    }

    #[test]
    fn floats_are_ieee_little_endian() {
        let mut data = Cursor::new(Vec::<u8>::new());
        1.5f32.encode(&mut data).unwrap();
        (-2.0f64).encode(&mut data).unwrap();

        assert_eq!(
            data.get_ref(),
            &[0x00, 0x00, 0xC0, 0x3F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0]
        );
        data.set_position(0);
        assert_eq!(f32::decode(&mut data).unwrap(), 1.5);
        assert_eq!(f64::decode(&mut data).unwrap(), -2.0);
    }

    #[test]
    fn truncated_string_is_a_framing_error() {
        // Claims 10 bytes, provides 4.
        let bytes = [0x0A, 0x00, 0x00, 0x00, 0x74, 0x65, 0x73, 0x74];
        let mut data = Cursor::new(bytes.to_vec());
        assert!(matches!(
            String::decode(&mut data),
            Err(CodecError::Io(_))
        ));
    }

    #[test]
    fn type_tags_round_trip() {
        let types = [
            Type::U8,
            Type::String,
            Type::Vec(Box::new(Type::Tuple(vec![Type::F32, Type::Bool]))),
            Type::Node(Some("player".to_owned())),
            Type::Node(None),
            Type::NodeList,
            Type::Sequence,
        ];
        for ty in types {
            let mut data = Cursor::new(Vec::<u8>::new());
            ty.encode(&mut data).unwrap();
            data.set_position(0);
            assert_eq!(Type::decode(&mut data).unwrap(), ty);
        }
    }

    #[test]
    fn unknown_bytes_fail_decoding() {
        let mut data = Cursor::new(vec![42u8]);
        assert!(matches!(
            Type::decode(&mut data),
            Err(CodecError::UnknownTypeTag(42))
        ));

        let mut data = Cursor::new(vec![99u8]);
        assert!(matches!(
            WireOp::decode(&mut data),
            Err(CodecError::UnknownOpcode(99))
        ));

        let mut data = Cursor::new(vec![6u8]);
        assert!(matches!(
            Comparison::decode(&mut data),
            Err(CodecError::UnknownComparison(6))
        ));

        let mut data = Cursor::new(vec![4u8]);
        assert!(matches!(
            AssetKind::decode(&mut data),
            Err(CodecError::UnknownAssetKind(4))
        ));
    }

    #[test]
    fn typed_values_round_trip() {
        let ty = Type::Tuple(vec![
            Type::Vec(Box::new(Type::I32)),
            Type::Node(Some("enemy".to_owned())),
            Type::Sequence,
        ]);
        let value = TypedValue::Tuple(vec![
            TypedValue::Vec(vec![TypedValue::I32(-7), TypedValue::I32(7)]),
            TypedValue::Node(vec![
                (Type::U8, TypedValue::U8(3)),
                (Type::String, TypedValue::String("spawn".to_owned())),
            ]),
            TypedValue::Sequence(2),
        ]);

        let mut data = Cursor::new(Vec::<u8>::new());
        value.encode(&mut data).unwrap();
        data.set_position(0);
        assert_eq!(TypedValue::decode(&mut data, &ty).unwrap(), value);
    }

    #[test]
    fn ops_round_trip() {
        let ops: Vec<WireOp> = vec![
            Op::PushOffset {
                node: "player".to_owned(),
                property: "hp".to_owned(),
            },
            Op::Set {
                ty: Type::U16,
                value: TypedValue::U16(5),
            },
            Op::SetString {
                value: "hello".to_owned(),
            },
            Op::Modify {
                ty: Type::I8,
                value: TypedValue::I8(-1),
            },
            Op::ModifyF32 { value: 1.0 },
            Op::ModifyF64 { value: -1.0 },
            Op::BranchIfTrue { target: 0 },
            Op::BranchIfFalse { target: 3 },
            Op::BranchUint {
                comparison: Comparison::LessThan,
                ty: Type::U16,
                value: TypedValue::U16(10),
                target: 0,
            },
            Op::BranchSint {
                comparison: Comparison::GreaterThan,
                ty: Type::I16,
                value: TypedValue::I16(10),
                target: 0,
            },
            Op::BranchF32 {
                comparison: Comparison::Equals,
                value: 10.0,
                target: 0,
            },
            Op::BranchF64 {
                comparison: Comparison::NotEquals,
                value: 10.0,
                target: 0,
            },
            Op::Jump { target: 0 },
            Op::Call { target: 28 },
            Op::Return,
            Op::Wait { frames: 1 },
            Op::RunCustom {
                fname: "custom-fn".to_owned(),
            },
            Op::BranchCustom {
                fname: "custom-cond".to_owned(),
                target: 0,
            },
        ];

        let mut data = Cursor::new(Vec::<u8>::new());
        ops.encode(&mut data).unwrap();
        data.set_position(0);
        assert_eq!(Vec::<WireOp>::decode(&mut data).unwrap(), ops);
    }
}
