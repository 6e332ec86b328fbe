//! Numeric operator implementations.
//!
//! Binary operators pop `v2` first, then `v1`, and compute `v1 op v2`;
//! commutative operators pop in either order. Shift amounts are masked to
//! the operand width. Integer division or remainder by zero and the
//! signed `MIN / -1` overflow trap; `MIN % -1` yields 0. Float-to-integer
//! truncation traps on NaN and on values outside the target range.

use crate::virtual_machine::errors::VmError;
use crate::virtual_machine::interpreter::Interpreter;
use crate::virtual_machine::opcodes as op;

impl Interpreter<'_> {
    /// Dispatches a numeric opcode.
    pub(super) fn numeric(&mut self, opcode: u8) -> Result<(), VmError> {
        match opcode {
            op::I32_EQZ => self.i32_eqz(),
            op::I32_EQ => self.i32_eq(),
            op::I32_NE => self.i32_ne(),
            op::I32_LT_S => self.i32_lt_s(),
            op::I32_LT_U => self.i32_lt_u(),
            op::I32_GT_S => self.i32_gt_s(),
            op::I32_GT_U => self.i32_gt_u(),
            op::I32_LE_S => self.i32_le_s(),
            op::I32_LE_U => self.i32_le_u(),
            op::I32_GE_S => self.i32_ge_s(),
            op::I32_GE_U => self.i32_ge_u(),
            op::I64_EQZ => self.i64_eqz(),
            op::I64_EQ => self.i64_eq(),
            op::I64_NE => self.i64_ne(),
            op::I64_LT_S => self.i64_lt_s(),
            op::I64_LT_U => self.i64_lt_u(),
            op::I64_GT_S => self.i64_gt_s(),
            op::I64_GT_U => self.i64_gt_u(),
            op::I64_LE_S => self.i64_le_s(),
            op::I64_LE_U => self.i64_le_u(),
            op::I64_GE_S => self.i64_ge_s(),
            op::I64_GE_U => self.i64_ge_u(),
            op::F32_EQ => self.f32_eq(),
            op::F32_NE => self.f32_ne(),
            op::F32_LT => self.f32_lt(),
            op::F32_GT => self.f32_gt(),
            op::F32_LE => self.f32_le(),
            op::F32_GE => self.f32_ge(),
            op::F64_EQ => self.f64_eq(),
            op::F64_NE => self.f64_ne(),
            op::F64_LT => self.f64_lt(),
            op::F64_GT => self.f64_gt(),
            op::F64_LE => self.f64_le(),
            op::F64_GE => self.f64_ge(),
            op::I32_CLZ => self.i32_clz(),
            op::I32_CTZ => self.i32_ctz(),
            op::I32_POPCNT => self.i32_popcnt(),
            op::I32_ADD => self.i32_add(),
            op::I32_SUB => self.i32_sub(),
            op::I32_MUL => self.i32_mul(),
            op::I32_DIV_S => self.i32_div_s(),
            op::I32_DIV_U => self.i32_div_u(),
            op::I32_REM_S => self.i32_rem_s(),
            op::I32_REM_U => self.i32_rem_u(),
            op::I32_AND => self.i32_and(),
            op::I32_OR => self.i32_or(),
            op::I32_XOR => self.i32_xor(),
            op::I32_SHL => self.i32_shl(),
            op::I32_SHR_S => self.i32_shr_s(),
            op::I32_SHR_U => self.i32_shr_u(),
            op::I32_ROTL => self.i32_rotl(),
            op::I32_ROTR => self.i32_rotr(),
            op::I64_CLZ => self.i64_clz(),
            op::I64_CTZ => self.i64_ctz(),
            op::I64_POPCNT => self.i64_popcnt(),
            op::I64_ADD => self.i64_add(),
            op::I64_SUB => self.i64_sub(),
            op::I64_MUL => self.i64_mul(),
            op::I64_DIV_S => self.i64_div_s(),
            op::I64_DIV_U => self.i64_div_u(),
            op::I64_REM_S => self.i64_rem_s(),
            op::I64_REM_U => self.i64_rem_u(),
            op::I64_AND => self.i64_and(),
            op::I64_OR => self.i64_or(),
            op::I64_XOR => self.i64_xor(),
            op::I64_SHL => self.i64_shl(),
            op::I64_SHR_S => self.i64_shr_s(),
            op::I64_SHR_U => self.i64_shr_u(),
            op::I64_ROTL => self.i64_rotl(),
            op::I64_ROTR => self.i64_rotr(),
            op::F32_ABS => self.f32_abs(),
            op::F32_NEG => self.f32_neg(),
            op::F32_CEIL => self.f32_ceil(),
            op::F32_FLOOR => self.f32_floor(),
            op::F32_TRUNC => self.f32_trunc(),
            op::F32_NEAREST => self.f32_nearest(),
            op::F32_SQRT => self.f32_sqrt(),
            op::F32_ADD => self.f32_add(),
            op::F32_SUB => self.f32_sub(),
            op::F32_MUL => self.f32_mul(),
            op::F32_DIV => self.f32_div(),
            op::F32_MIN => self.f32_min(),
            op::F32_MAX => self.f32_max(),
            op::F32_COPYSIGN => self.f32_copysign(),
            op::F64_ABS => self.f64_abs(),
            op::F64_NEG => self.f64_neg(),
            op::F64_CEIL => self.f64_ceil(),
            op::F64_FLOOR => self.f64_floor(),
            op::F64_TRUNC => self.f64_trunc(),
            op::F64_NEAREST => self.f64_nearest(),
            op::F64_SQRT => self.f64_sqrt(),
            op::F64_ADD => self.f64_add(),
            op::F64_SUB => self.f64_sub(),
            op::F64_MUL => self.f64_mul(),
            op::F64_DIV => self.f64_div(),
            op::F64_MIN => self.f64_min(),
            op::F64_MAX => self.f64_max(),
            op::F64_COPYSIGN => self.f64_copysign(),
            op::I32_WRAP_I64 => self.i32_wrap_i64(),
            op::I32_TRUNC_F32_S => self.i32_trunc_f32_s(),
            op::I32_TRUNC_F32_U => self.i32_trunc_f32_u(),
            op::I32_TRUNC_F64_S => self.i32_trunc_f64_s(),
            op::I32_TRUNC_F64_U => self.i32_trunc_f64_u(),
            op::I64_EXTEND_I32_S => self.i64_extend_i32_s(),
            op::I64_EXTEND_I32_U => self.i64_extend_i32_u(),
            op::I64_TRUNC_F32_S => self.i64_trunc_f32_s(),
            op::I64_TRUNC_F32_U => self.i64_trunc_f32_u(),
            op::I64_TRUNC_F64_S => self.i64_trunc_f64_s(),
            op::I64_TRUNC_F64_U => self.i64_trunc_f64_u(),
            op::F32_CONVERT_I32_S => self.f32_convert_i32_s(),
            op::F32_CONVERT_I32_U => self.f32_convert_i32_u(),
            op::F32_CONVERT_I64_S => self.f32_convert_i64_s(),
            op::F32_CONVERT_I64_U => self.f32_convert_i64_u(),
            op::F32_DEMOTE_F64 => self.f32_demote_f64(),
            op::F64_CONVERT_I32_S => self.f64_convert_i32_s(),
            op::F64_CONVERT_I32_U => self.f64_convert_i32_u(),
            op::F64_CONVERT_I64_S => self.f64_convert_i64_s(),
            op::F64_CONVERT_I64_U => self.f64_convert_i64_u(),
            op::F64_PROMOTE_F32 => self.f64_promote_f32(),
            op::I32_REINTERPRET_F32 | op::F32_REINTERPRET_I32 => {
                // The slot already holds the low 32 bits; nothing moves.
                Ok(())
            }
            op::I64_REINTERPRET_F64 | op::F64_REINTERPRET_I64 => Ok(()),
            op::I32_EXTEND8_S => self.i32_extend8_s(),
            op::I32_EXTEND16_S => self.i32_extend16_s(),
            op::I64_EXTEND8_S => self.i64_extend8_s(),
            op::I64_EXTEND16_S => self.i64_extend16_s(),
            op::I64_EXTEND32_S => self.i64_extend32_s(),
            other => Err(VmError::UnsupportedInstruction(format!(
                "opcode {:#04x}",
                other
            ))),
        }
    }

    // i32 operators.

    fn i32_clz(&mut self) -> Result<(), VmError> {
        let v = self.pop_u32()?;
        self.push_u32(v.leading_zeros())
    }

    fn i32_ctz(&mut self) -> Result<(), VmError> {
        let v = self.pop_u32()?;
        self.push_u32(v.trailing_zeros())
    }

    fn i32_popcnt(&mut self) -> Result<(), VmError> {
        let v = self.pop_u32()?;
        self.push_u32(v.count_ones())
    }

    fn i32_add(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        self.push_u32(v1.wrapping_add(v2))
    }

    fn i32_sub(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        self.push_u32(v1.wrapping_sub(v2))
    }

    fn i32_mul(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        self.push_u32(v1.wrapping_mul(v2))
    }

    fn i32_div_s(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_i32()?;
        let v1 = self.pop_i32()?;
        if v2 == 0 {
            return Err(VmError::DivisionByZero);
        }
        match v1.checked_div(v2) {
            Some(q) => self.push_i32(q),
            None => Err(VmError::IntegerOverflow),
        }
    }

    fn i32_div_u(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        if v2 == 0 {
            return Err(VmError::DivisionByZero);
        }
        self.push_u32(v1 / v2)
    }

    fn i32_rem_s(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_i32()?;
        let v1 = self.pop_i32()?;
        if v2 == 0 {
            return Err(VmError::DivisionByZero);
        }
        self.push_i32(v1.wrapping_rem(v2))
    }

    fn i32_rem_u(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        if v2 == 0 {
            return Err(VmError::DivisionByZero);
        }
        self.push_u32(v1 % v2)
    }

    fn i32_and(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        self.push_u32(v1 & v2)
    }

    fn i32_or(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        self.push_u32(v1 | v2)
    }

    fn i32_xor(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        self.push_u32(v1 ^ v2)
    }

    fn i32_shl(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        self.push_u32(v1 << (v2 & 31))
    }

    fn i32_shr_s(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_i32()?;
        self.push_i32(v1 >> (v2 & 31))
    }

    fn i32_shr_u(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        self.push_u32(v1 >> (v2 & 31))
    }

    fn i32_rotl(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        self.push_u32(v1.rotate_left(v2 & 31))
    }

    fn i32_rotr(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        self.push_u32(v1.rotate_right(v2 & 31))
    }

    fn i32_eqz(&mut self) -> Result<(), VmError> {
        let v = self.pop_u32()?;
        self.push_bool(v == 0)
    }

    fn i32_eq(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        self.push_bool(v1 == v2)
    }

    fn i32_ne(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        self.push_bool(v1 != v2)
    }

    fn i32_lt_s(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_i32()?;
        let v1 = self.pop_i32()?;
        self.push_bool(v1 < v2)
    }

    fn i32_lt_u(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        self.push_bool(v1 < v2)
    }

    fn i32_gt_s(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_i32()?;
        let v1 = self.pop_i32()?;
        self.push_bool(v1 > v2)
    }

    fn i32_gt_u(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        self.push_bool(v1 > v2)
    }

    fn i32_le_s(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_i32()?;
        let v1 = self.pop_i32()?;
        self.push_bool(v1 <= v2)
    }

    fn i32_le_u(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        self.push_bool(v1 <= v2)
    }

    fn i32_ge_s(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_i32()?;
        let v1 = self.pop_i32()?;
        self.push_bool(v1 >= v2)
    }

    fn i32_ge_u(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u32()?;
        let v1 = self.pop_u32()?;
        self.push_bool(v1 >= v2)
    }

    // i64 operators.

    fn i64_clz(&mut self) -> Result<(), VmError> {
        let v = self.pop_u64()?;
        self.push_u64(v.leading_zeros() as u64)
    }

    fn i64_ctz(&mut self) -> Result<(), VmError> {
        let v = self.pop_u64()?;
        self.push_u64(v.trailing_zeros() as u64)
    }

    fn i64_popcnt(&mut self) -> Result<(), VmError> {
        let v = self.pop_u64()?;
        self.push_u64(v.count_ones() as u64)
    }

    fn i64_add(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        self.push_u64(v1.wrapping_add(v2))
    }

    fn i64_sub(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        self.push_u64(v1.wrapping_sub(v2))
    }

    fn i64_mul(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        self.push_u64(v1.wrapping_mul(v2))
    }

    fn i64_div_s(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_i64()?;
        let v1 = self.pop_i64()?;
        if v2 == 0 {
            return Err(VmError::DivisionByZero);
        }
        match v1.checked_div(v2) {
            Some(q) => self.push_i64(q),
            None => Err(VmError::IntegerOverflow),
        }
    }

    fn i64_div_u(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        if v2 == 0 {
            return Err(VmError::DivisionByZero);
        }
        self.push_u64(v1 / v2)
    }

    fn i64_rem_s(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_i64()?;
        let v1 = self.pop_i64()?;
        if v2 == 0 {
            return Err(VmError::DivisionByZero);
        }
        self.push_i64(v1.wrapping_rem(v2))
    }

    fn i64_rem_u(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        if v2 == 0 {
            return Err(VmError::DivisionByZero);
        }
        self.push_u64(v1 % v2)
    }

    fn i64_and(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        self.push_u64(v1 & v2)
    }

    fn i64_or(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        self.push_u64(v1 | v2)
    }

    fn i64_xor(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        self.push_u64(v1 ^ v2)
    }

    fn i64_shl(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        self.push_u64(v1 << (v2 & 63))
    }

    fn i64_shr_s(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_i64()?;
        self.push_i64(v1 >> (v2 & 63))
    }

    fn i64_shr_u(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        self.push_u64(v1 >> (v2 & 63))
    }

    fn i64_rotl(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        self.push_u64(v1.rotate_left((v2 & 63) as u32))
    }

    fn i64_rotr(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        self.push_u64(v1.rotate_right((v2 & 63) as u32))
    }

    fn i64_eqz(&mut self) -> Result<(), VmError> {
        let v = self.pop_u64()?;
        self.push_bool(v == 0)
    }

    fn i64_eq(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        self.push_bool(v1 == v2)
    }

    fn i64_ne(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        self.push_bool(v1 != v2)
    }

    fn i64_lt_s(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_i64()?;
        let v1 = self.pop_i64()?;
        self.push_bool(v1 < v2)
    }

    fn i64_lt_u(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        self.push_bool(v1 < v2)
    }

    fn i64_gt_s(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_i64()?;
        let v1 = self.pop_i64()?;
        self.push_bool(v1 > v2)
    }

    fn i64_gt_u(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        self.push_bool(v1 > v2)
    }

    fn i64_le_s(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_i64()?;
        let v1 = self.pop_i64()?;
        self.push_bool(v1 <= v2)
    }

    fn i64_le_u(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        self.push_bool(v1 <= v2)
    }

    fn i64_ge_s(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_i64()?;
        let v1 = self.pop_i64()?;
        self.push_bool(v1 >= v2)
    }

    fn i64_ge_u(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_u64()?;
        let v1 = self.pop_u64()?;
        self.push_bool(v1 >= v2)
    }

    // f32 operators.

    fn f32_abs(&mut self) -> Result<(), VmError> {
        let v = self.pop_f32()?;
        self.push_f32(v.abs())
    }

    fn f32_neg(&mut self) -> Result<(), VmError> {
        let v = self.pop_f32()?;
        self.push_f32(-v)
    }

    fn f32_ceil(&mut self) -> Result<(), VmError> {
        let v = self.pop_f32()?;
        self.push_f32(v.ceil())
    }

    fn f32_floor(&mut self) -> Result<(), VmError> {
        let v = self.pop_f32()?;
        self.push_f32(v.floor())
    }

    fn f32_trunc(&mut self) -> Result<(), VmError> {
        let v = self.pop_f32()?;
        self.push_f32(v.trunc())
    }

    fn f32_nearest(&mut self) -> Result<(), VmError> {
        let v = self.pop_f32()?;
        // Round half away from zero.
        self.push_f32((v + 0.5f32.copysign(v)).trunc())
    }

    fn f32_sqrt(&mut self) -> Result<(), VmError> {
        let v = self.pop_f32()?;
        self.push_f32(v.sqrt())
    }

    fn f32_add(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f32()?;
        let v1 = self.pop_f32()?;
        self.push_f32(v1 + v2)
    }

    fn f32_sub(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f32()?;
        let v1 = self.pop_f32()?;
        self.push_f32(v1 - v2)
    }

    fn f32_mul(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f32()?;
        let v1 = self.pop_f32()?;
        self.push_f32(v1 * v2)
    }

    fn f32_div(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f32()?;
        let v1 = self.pop_f32()?;
        self.push_f32(v1 / v2)
    }

    fn f32_min(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f32()?;
        let v1 = self.pop_f32()?;
        self.push_f32(fmin32(v1, v2))
    }

    fn f32_max(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f32()?;
        let v1 = self.pop_f32()?;
        self.push_f32(fmax32(v1, v2))
    }

    fn f32_copysign(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f32()?;
        let v1 = self.pop_f32()?;
        self.push_f32(v1.copysign(v2))
    }

    fn f32_eq(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f32()?;
        let v1 = self.pop_f32()?;
        self.push_bool(v1 == v2)
    }

    fn f32_ne(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f32()?;
        let v1 = self.pop_f32()?;
        self.push_bool(v1 != v2)
    }

    fn f32_lt(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f32()?;
        let v1 = self.pop_f32()?;
        self.push_bool(v1 < v2)
    }

    fn f32_gt(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f32()?;
        let v1 = self.pop_f32()?;
        self.push_bool(v1 > v2)
    }

    fn f32_le(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f32()?;
        let v1 = self.pop_f32()?;
        self.push_bool(v1 <= v2)
    }

    fn f32_ge(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f32()?;
        let v1 = self.pop_f32()?;
        self.push_bool(v1 >= v2)
    }

    // f64 operators.

    fn f64_abs(&mut self) -> Result<(), VmError> {
        let v = self.pop_f64()?;
        self.push_f64(v.abs())
    }

    fn f64_neg(&mut self) -> Result<(), VmError> {
        let v = self.pop_f64()?;
        self.push_f64(-v)
    }

    fn f64_ceil(&mut self) -> Result<(), VmError> {
        let v = self.pop_f64()?;
        self.push_f64(v.ceil())
    }

    fn f64_floor(&mut self) -> Result<(), VmError> {
        let v = self.pop_f64()?;
        self.push_f64(v.floor())
    }

    fn f64_trunc(&mut self) -> Result<(), VmError> {
        let v = self.pop_f64()?;
        self.push_f64(v.trunc())
    }

    fn f64_nearest(&mut self) -> Result<(), VmError> {
        let v = self.pop_f64()?;
        // Round half away from zero.
        self.push_f64((v + 0.5f64.copysign(v)).trunc())
    }

    fn f64_sqrt(&mut self) -> Result<(), VmError> {
        let v = self.pop_f64()?;
        self.push_f64(v.sqrt())
    }

    fn f64_add(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f64()?;
        let v1 = self.pop_f64()?;
        self.push_f64(v1 + v2)
    }

    fn f64_sub(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f64()?;
        let v1 = self.pop_f64()?;
        self.push_f64(v1 - v2)
    }

    fn f64_mul(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f64()?;
        let v1 = self.pop_f64()?;
        self.push_f64(v1 * v2)
    }

    fn f64_div(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f64()?;
        let v1 = self.pop_f64()?;
        self.push_f64(v1 / v2)
    }

    fn f64_min(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f64()?;
        let v1 = self.pop_f64()?;
        self.push_f64(fmin64(v1, v2))
    }

    fn f64_max(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f64()?;
        let v1 = self.pop_f64()?;
        self.push_f64(fmax64(v1, v2))
    }

    fn f64_copysign(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f64()?;
        let v1 = self.pop_f64()?;
        self.push_f64(v1.copysign(v2))
    }

    fn f64_eq(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f64()?;
        let v1 = self.pop_f64()?;
        self.push_bool(v1 == v2)
    }

    fn f64_ne(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f64()?;
        let v1 = self.pop_f64()?;
        self.push_bool(v1 != v2)
    }

    fn f64_lt(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f64()?;
        let v1 = self.pop_f64()?;
        self.push_bool(v1 < v2)
    }

    fn f64_gt(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f64()?;
        let v1 = self.pop_f64()?;
        self.push_bool(v1 > v2)
    }

    fn f64_le(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f64()?;
        let v1 = self.pop_f64()?;
        self.push_bool(v1 <= v2)
    }

    fn f64_ge(&mut self) -> Result<(), VmError> {
        let v2 = self.pop_f64()?;
        let v1 = self.pop_f64()?;
        self.push_bool(v1 >= v2)
    }

    // Conversions.

    fn i32_wrap_i64(&mut self) -> Result<(), VmError> {
        let v = self.pop_u64()?;
        self.push_u32(v as u32)
    }

    fn i32_trunc_f32_s(&mut self) -> Result<(), VmError> {
        let t = trunc_checked(self.pop_f32()? as f64)?;
        if t >= 2_147_483_648.0 || t < -2_147_483_648.0 {
            return Err(VmError::IntegerOverflow);
        }
        self.push_i32(t as i32)
    }

    fn i32_trunc_f32_u(&mut self) -> Result<(), VmError> {
        let t = trunc_checked(self.pop_f32()? as f64)?;
        if t >= 4_294_967_296.0 || t < 0.0 {
            return Err(VmError::IntegerOverflow);
        }
        self.push_u32(t as u32)
    }

    fn i32_trunc_f64_s(&mut self) -> Result<(), VmError> {
        let t = trunc_checked(self.pop_f64()?)?;
        if t >= 2_147_483_648.0 || t < -2_147_483_648.0 {
            return Err(VmError::IntegerOverflow);
        }
        self.push_i32(t as i32)
    }

    fn i32_trunc_f64_u(&mut self) -> Result<(), VmError> {
        let t = trunc_checked(self.pop_f64()?)?;
        if t >= 4_294_967_296.0 || t < 0.0 {
            return Err(VmError::IntegerOverflow);
        }
        self.push_u32(t as u32)
    }

    fn i64_extend_i32_s(&mut self) -> Result<(), VmError> {
        let v = self.pop_i32()?;
        self.push_i64(v as i64)
    }

    fn i64_extend_i32_u(&mut self) -> Result<(), VmError> {
        let v = self.pop_u32()?;
        self.push_u64(v as u64)
    }

    fn i64_trunc_f32_s(&mut self) -> Result<(), VmError> {
        let t = trunc_checked(self.pop_f32()? as f64)?;
        if t >= 9_223_372_036_854_775_808.0 || t < -9_223_372_036_854_775_808.0 {
            return Err(VmError::IntegerOverflow);
        }
        self.push_i64(t as i64)
    }

    fn i64_trunc_f32_u(&mut self) -> Result<(), VmError> {
        let t = trunc_checked(self.pop_f32()? as f64)?;
        if t >= 18_446_744_073_709_551_616.0 || t < 0.0 {
            return Err(VmError::IntegerOverflow);
        }
        self.push_u64(t as u64)
    }

    fn i64_trunc_f64_s(&mut self) -> Result<(), VmError> {
        let t = trunc_checked(self.pop_f64()?)?;
        if t >= 9_223_372_036_854_775_808.0 || t < -9_223_372_036_854_775_808.0 {
            return Err(VmError::IntegerOverflow);
        }
        self.push_i64(t as i64)
    }

    fn i64_trunc_f64_u(&mut self) -> Result<(), VmError> {
        let t = trunc_checked(self.pop_f64()?)?;
        if t >= 18_446_744_073_709_551_616.0 || t < 0.0 {
            return Err(VmError::IntegerOverflow);
        }
        self.push_u64(t as u64)
    }

    fn f32_convert_i32_s(&mut self) -> Result<(), VmError> {
        let v = self.pop_i32()?;
        self.push_f32(v as f32)
    }

    fn f32_convert_i32_u(&mut self) -> Result<(), VmError> {
        let v = self.pop_u32()?;
        self.push_f32(v as f32)
    }

    fn f32_convert_i64_s(&mut self) -> Result<(), VmError> {
        let v = self.pop_i64()?;
        self.push_f32(v as f32)
    }

    fn f32_convert_i64_u(&mut self) -> Result<(), VmError> {
        let v = self.pop_u64()?;
        self.push_f32(v as f32)
    }

    fn f32_demote_f64(&mut self) -> Result<(), VmError> {
        let v = self.pop_f64()?;
        self.push_f32(v as f32)
    }

    fn f64_convert_i32_s(&mut self) -> Result<(), VmError> {
        let v = self.pop_i32()?;
        self.push_f64(v as f64)
    }

    fn f64_convert_i32_u(&mut self) -> Result<(), VmError> {
        let v = self.pop_u32()?;
        self.push_f64(v as f64)
    }

    fn f64_convert_i64_s(&mut self) -> Result<(), VmError> {
        let v = self.pop_i64()?;
        self.push_f64(v as f64)
    }

    fn f64_convert_i64_u(&mut self) -> Result<(), VmError> {
        let v = self.pop_u64()?;
        self.push_f64(v as f64)
    }

    fn f64_promote_f32(&mut self) -> Result<(), VmError> {
        let v = self.pop_f32()?;
        self.push_f64(v as f64)
    }

    fn i32_extend8_s(&mut self) -> Result<(), VmError> {
        let v = self.pop_u32()?;
        self.push_i32(v as u8 as i8 as i32)
    }

    fn i32_extend16_s(&mut self) -> Result<(), VmError> {
        let v = self.pop_u32()?;
        self.push_i32(v as u16 as i16 as i32)
    }

    fn i64_extend8_s(&mut self) -> Result<(), VmError> {
        let v = self.pop_u64()?;
        self.push_i64(v as u8 as i8 as i64)
    }

    fn i64_extend16_s(&mut self) -> Result<(), VmError> {
        let v = self.pop_u64()?;
        self.push_i64(v as u16 as i16 as i64)
    }

    fn i64_extend32_s(&mut self) -> Result<(), VmError> {
        let v = self.pop_u64()?;
        self.push_i64(v as u32 as i32 as i64)
    }
}

/// Truncates toward zero, trapping on NaN.
fn trunc_checked(v: f64) -> Result<f64, VmError> {
    if v.is_nan() {
        return Err(VmError::InvalidConversionToInt);
    }
    Ok(v.trunc())
}

/// Minimum with Wasm semantics: NaN propagates, -0 orders below +0.
fn fmin32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        if a.is_sign_negative() {
            a
        } else {
            b
        }
    } else if a < b {
        a
    } else {
        b
    }
}

/// Maximum with Wasm semantics: NaN propagates, +0 orders above -0.
fn fmax32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        if a.is_sign_positive() {
            a
        } else {
            b
        }
    } else if a > b {
        a
    } else {
        b
    }
}

fn fmin64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_negative() {
            a
        } else {
            b
        }
    } else if a < b {
        a
    } else {
        b
    }
}

fn fmax64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_positive() {
            a
        } else {
            b
        }
    } else if a > b {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use crate::virtual_machine::errors::VmError;
    use crate::virtual_machine::interpreter::testing::exec;
    use crate::virtual_machine::value::Value;

    /// Exports one binary i32 operator.
    fn binop_i32(op: &str) -> String {
        format!(
            r#"(module (func (export "f") (param i32 i32) (result i32)
                 local.get 0
                 local.get 1
                 i32.{}))"#,
            op
        )
    }

    fn run_i32(op: &str, a: i32, b: i32) -> Result<i32, VmError> {
        match exec(&binop_i32(op), "f", &[a as u32 as u64, b as u32 as u64])? {
            Some(Value::I32(v)) => Ok(v),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn div_s_traps_on_zero_and_overflow() {
        assert!(matches!(
            run_i32("div_s", 1, 0),
            Err(VmError::DivisionByZero)
        ));
        assert!(matches!(
            run_i32("div_s", i32::MIN, -1),
            Err(VmError::IntegerOverflow)
        ));
        assert_eq!(run_i32("div_s", -7, 2).unwrap(), -3);
    }

    #[test]
    fn rem_s_follows_truncated_division() {
        assert_eq!(run_i32("rem_s", -7, 2).unwrap(), -1);
        assert_eq!(run_i32("rem_s", 7, -2).unwrap(), 1);
        // The one case where the matching division overflows.
        assert_eq!(run_i32("rem_s", i32::MIN, -1).unwrap(), 0);
        assert!(matches!(
            run_i32("rem_s", 1, 0),
            Err(VmError::DivisionByZero)
        ));
    }

    #[test]
    fn shifts_are_masked_to_the_operand_width() {
        assert_eq!(run_i32("shl", 1, 33).unwrap(), 2);
        assert_eq!(run_i32("shr_u", 4, 33).unwrap(), 2);
        assert_eq!(run_i32("shl", 1, 0).unwrap(), 1);
    }

    #[test]
    fn shr_s_is_arithmetic() {
        assert_eq!(
            run_i32("shr_s", 0x8000_0000u32 as i32, 1).unwrap() as u32,
            0xc000_0000
        );
        assert_eq!(run_i32("shr_u", 0x8000_0000u32 as i32, 1).unwrap() as u32, 0x4000_0000);
    }

    #[test]
    fn rotates_wrap_both_directions() {
        assert_eq!(
            run_i32("rotl", 0x8000_0001u32 as i32, 1).unwrap(),
            3
        );
        assert_eq!(
            run_i32("rotr", 3, 1).unwrap() as u32,
            0x8000_0001
        );
    }

    #[test]
    fn bit_counting_ops() {
        let wat_src = r#"
            (module
              (func (export "clz") (param i32) (result i32)
                local.get 0
                i32.clz)
              (func (export "ctz") (param i32) (result i32)
                local.get 0
                i32.ctz)
              (func (export "popcnt") (param i32) (result i32)
                local.get 0
                i32.popcnt))
        "#;
        assert_eq!(exec(wat_src, "clz", &[1]).unwrap(), Some(Value::I32(31)));
        assert_eq!(exec(wat_src, "ctz", &[8]).unwrap(), Some(Value::I32(3)));
        assert_eq!(
            exec(wat_src, "popcnt", &[0xffff]).unwrap(),
            Some(Value::I32(16))
        );
    }

    #[test]
    fn i64_arithmetic_wraps() {
        let wat_src = r#"
            (module
              (func (export "mul") (param i64 i64) (result i64)
                local.get 0
                local.get 1
                i64.mul))
        "#;
        let out = exec(wat_src, "mul", &[u64::MAX, 2]).unwrap();
        assert_eq!(out, Some(Value::I64(-2)));
    }

    #[test]
    fn signed_and_unsigned_comparisons_differ() {
        assert_eq!(run_i32("lt_s", -1, 1).unwrap(), 1);
        assert_eq!(run_i32("lt_u", -1, 1).unwrap(), 0);
        assert_eq!(run_i32("ge_u", -1, 1).unwrap(), 1);
    }

    #[test]
    fn f32_nearest_rounds_half_away_from_zero() {
        let wat_src = r#"
            (module
              (func (export "nearest") (param f32) (result f32)
                local.get 0
                f32.nearest))
        "#;
        let run = |x: f32| match exec(wat_src, "nearest", &[Value::F32(x).to_bits()]).unwrap() {
            Some(Value::F32(v)) => v,
            other => panic!("unexpected result {:?}", other),
        };
        assert_eq!(run(2.5), 3.0);
        assert_eq!(run(-2.5), -3.0);
        assert_eq!(run(2.4), 2.0);
        assert_eq!(run(-2.4), -2.0);
    }

    #[test]
    fn f64_copysign_takes_sign_from_second_operand() {
        let wat_src = r#"
            (module
              (func (export "cps") (param f64 f64) (result f64)
                local.get 0
                local.get 1
                f64.copysign))
        "#;
        let out = exec(
            wat_src,
            "cps",
            &[Value::F64(1.5).to_bits(), Value::F64(-2.0).to_bits()],
        )
        .unwrap();
        assert_eq!(out, Some(Value::F64(-1.5)));
    }

    #[test]
    fn f64_min_handles_zero_signs_and_nan() {
        let wat_src = r#"
            (module
              (func (export "min") (param f64 f64) (result f64)
                local.get 0
                local.get 1
                f64.min)
              (func (export "max") (param f64 f64) (result f64)
                local.get 0
                local.get 1
                f64.max))
        "#;
        let run = |name: &str, a: f64, b: f64| {
            match exec(
                wat_src,
                name,
                &[Value::F64(a).to_bits(), Value::F64(b).to_bits()],
            )
            .unwrap()
            {
                Some(Value::F64(v)) => v,
                other => panic!("unexpected result {:?}", other),
            }
        };
        assert!(run("min", -0.0, 0.0).is_sign_negative());
        assert!(run("max", -0.0, 0.0).is_sign_positive());
        assert!(run("min", f64::NAN, 1.0).is_nan());
        assert!(run("max", 1.0, f64::NAN).is_nan());
        assert_eq!(run("min", 3.0, 4.0), 3.0);
        assert_eq!(run("max", 3.0, 4.0), 4.0);
    }

    #[test]
    fn float_truncation_traps_on_nan_and_overflow() {
        let wat_src = r#"
            (module
              (func (export "trunc") (param f64) (result i32)
                local.get 0
                i32.trunc_f64_s)
              (func (export "trunc_u") (param f64) (result i32)
                local.get 0
                i32.trunc_f64_u))
        "#;
        assert!(matches!(
            exec(wat_src, "trunc", &[Value::F64(f64::NAN).to_bits()]),
            Err(VmError::InvalidConversionToInt)
        ));
        assert!(matches!(
            exec(wat_src, "trunc", &[Value::F64(3e10).to_bits()]),
            Err(VmError::IntegerOverflow)
        ));
        assert_eq!(
            exec(wat_src, "trunc", &[Value::F64(-3.9).to_bits()]).unwrap(),
            Some(Value::I32(-3))
        );
        // Truncation happens before the range check: -0.5 rounds to zero.
        assert_eq!(
            exec(wat_src, "trunc_u", &[Value::F64(-0.5).to_bits()]).unwrap(),
            Some(Value::I32(0))
        );
        assert!(matches!(
            exec(wat_src, "trunc_u", &[Value::F64(-1.5).to_bits()]),
            Err(VmError::IntegerOverflow)
        ));
    }

    #[test]
    fn widening_and_wrapping_conversions() {
        let wat_src = r#"
            (module
              (func (export "wrap") (param i64) (result i32)
                local.get 0
                i32.wrap_i64)
              (func (export "ext_s") (param i32) (result i64)
                local.get 0
                i64.extend_i32_s)
              (func (export "ext_u") (param i32) (result i64)
                local.get 0
                i64.extend_i32_u))
        "#;
        assert_eq!(
            exec(wat_src, "wrap", &[0x1_2345_6789]).unwrap(),
            Some(Value::I32(0x2345_6789))
        );
        assert_eq!(
            exec(wat_src, "ext_s", &[0xffff_ffff]).unwrap(),
            Some(Value::I64(-1))
        );
        assert_eq!(
            exec(wat_src, "ext_u", &[0xffff_ffff]).unwrap(),
            Some(Value::I64(0xffff_ffff))
        );
    }

    #[test]
    fn reinterpret_preserves_bits() {
        let wat_src = r#"
            (module
              (func (export "f2i") (param f32) (result i32)
                local.get 0
                i32.reinterpret_f32)
              (func (export "i2f") (param i32) (result f32)
                local.get 0
                f32.reinterpret_i32))
        "#;
        assert_eq!(
            exec(wat_src, "f2i", &[Value::F32(-0.0).to_bits()]).unwrap(),
            Some(Value::I32(i32::MIN))
        );
        match exec(wat_src, "i2f", &[0x7fc0_1234]).unwrap() {
            Some(Value::F32(v)) => assert_eq!(v.to_bits(), 0x7fc0_1234),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn sign_extension_ops() {
        let wat_src = r#"
            (module
              (func (export "ext8") (param i32) (result i32)
                local.get 0
                i32.extend8_s)
              (func (export "ext16") (param i32) (result i32)
                local.get 0
                i32.extend16_s))
        "#;
        assert_eq!(exec(wat_src, "ext8", &[0x80]).unwrap(), Some(Value::I32(-128)));
        assert_eq!(exec(wat_src, "ext8", &[0x7f]).unwrap(), Some(Value::I32(127)));
        assert_eq!(
            exec(wat_src, "ext16", &[0x8000]).unwrap(),
            Some(Value::I32(-32768))
        );
    }
}
