//! Runtime values and their 64-bit operand-slot representation.

use crate::virtual_machine::errors::VmError;

/// Value types the engine executes: the closed numeric set of Wasm 1.0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    /// Maps a decoder value type into the engine's set.
    ///
    /// Reference and vector types cannot cross the host boundary and are
    /// rejected.
    pub(crate) fn from_decoder(ty: wasmparser::ValType) -> Result<Self, VmError> {
        match ty {
            wasmparser::ValType::I32 => Ok(ValueType::I32),
            wasmparser::ValType::I64 => Ok(ValueType::I64),
            wasmparser::ValType::F32 => Ok(ValueType::F32),
            wasmparser::ValType::F64 => Ok(ValueType::F64),
            other => Err(VmError::UnsupportedValueType(format!("{:?}", other))),
        }
    }

    /// Human-readable name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
        }
    }
}

/// A typed runtime value crossing the host boundary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    /// Returns the type of this value.
    pub fn ty(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
        }
    }

    /// Packs the value into a raw 64-bit operand slot.
    ///
    /// i32 is zero-extended, f32 is stored as its IEEE bit pattern
    /// zero-extended, f64 as its full 64-bit pattern.
    pub fn to_bits(self) -> u64 {
        match self {
            Value::I32(v) => v as u32 as u64,
            Value::I64(v) => v as u64,
            Value::F32(v) => v.to_bits() as u64,
            Value::F64(v) => v.to_bits(),
        }
    }

    /// Reinterprets a raw operand slot as a value of the given type.
    pub fn from_bits(ty: ValueType, bits: u64) -> Value {
        match ty {
            ValueType::I32 => Value::I32(bits as u32 as i32),
            ValueType::I64 => Value::I64(bits as i64),
            ValueType::F32 => Value::F32(f32::from_bits(bits as u32)),
            ValueType::F64 => Value::F64(f64::from_bits(bits)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_round_trip_is_bit_exact() {
        let cases = [
            Value::I32(-1),
            Value::I32(i32::MIN),
            Value::I64(i64::MIN),
            Value::F32(-0.0),
            Value::F32(f32::INFINITY),
            Value::F64(f64::NEG_INFINITY),
            Value::F64(2.5),
        ];
        for value in cases {
            assert_eq!(Value::from_bits(value.ty(), value.to_bits()), value);
        }
    }

    #[test]
    fn nan_payload_survives_round_trip() {
        let payload = f32::from_bits(0x7fc0_1234);
        let bits = Value::F32(payload).to_bits();
        match Value::from_bits(ValueType::F32, bits) {
            Value::F32(out) => assert_eq!(out.to_bits(), 0x7fc0_1234),
            other => panic!("expected f32, got {:?}", other),
        }

        let payload64 = f64::from_bits(0x7ff8_0000_dead_beef);
        let bits = Value::F64(payload64).to_bits();
        match Value::from_bits(ValueType::F64, bits) {
            Value::F64(out) => assert_eq!(out.to_bits(), 0x7ff8_0000_dead_beef),
            other => panic!("expected f64, got {:?}", other),
        }
    }

    #[test]
    fn i32_is_zero_extended() {
        assert_eq!(Value::I32(-1).to_bits(), 0x0000_0000_ffff_ffff);
    }

    #[test]
    fn f32_bits_are_zero_extended() {
        assert_eq!(Value::F32(-0.0).to_bits(), 0x0000_0000_8000_0000);
    }
}
