//! Numeric literal parsing.
//!
//! Turns the raw text of int/float literals (plus an optional suffix) into
//! typed [`ValueHolder`]s. Parsing is exact: integers go through `BigInt`
//! so every out-of-range constant is caught for every suffix, including
//! `u64` hex forms the host's `i64` could not hold.

use num_bigint::BigInt;
use num_traits::{Num, ToPrimitive};

use crate::error::CompileResult;
use crate::ids::{TypeId, ValueId};
use crate::state::CompilerState;
use crate::types::TypeKind;

/// Parses an integer literal. `default_ty` is the module's default integer
/// type, used when no suffix is present. A float-typed suffix (`f32`,
/// `4f64`, ...) converts the integer value to that float type.
pub fn parse_int_literal(
    state: &mut CompilerState,
    text: &str,
    suffix: Option<&str>,
    default_ty: TypeId,
) -> CompileResult<ValueId> {
    let value = parse_big_int(state, text)?;
    match suffix {
        None | Some("ss") => make_int_holder(state, &value, default_ty, text),
        Some("i8") => {
            let ty = state.core.int8;
            make_int_holder(state, &value, ty, text)
        }
        Some("i16") => {
            let ty = state.core.int16;
            make_int_holder(state, &value, ty, text)
        }
        Some("i32") => {
            let ty = state.core.int32;
            make_int_holder(state, &value, ty, text)
        }
        Some("i64") => {
            let ty = state.core.int64;
            make_int_holder(state, &value, ty, text)
        }
        Some("u8") => {
            let ty = state.core.uint8;
            make_int_holder(state, &value, ty, text)
        }
        Some("u16") => {
            let ty = state.core.uint16;
            make_int_holder(state, &value, ty, text)
        }
        Some("u" | "u32") => {
            let ty = state.core.uint32;
            make_int_holder(state, &value, ty, text)
        }
        Some("u64") => {
            let ty = state.core.uint64;
            make_int_holder(state, &value, ty, text)
        }
        Some("f" | "f32") => {
            let v = big_to_f64(state, &value, text)?;
            let ty = state.core.float32;
            Ok(state.new_holder(ty, Box::new((v as f32).to_le_bytes())))
        }
        Some("f64") => {
            let v = big_to_f64(state, &value, text)?;
            let ty = state.core.float64;
            Ok(state.new_holder(ty, Box::new(v.to_le_bytes())))
        }
        Some("j32" | "fj") => {
            let v = big_to_f64(state, &value, text)?;
            let ty = state.float_type(32, true);
            Ok(state.new_holder(ty, Box::new((v as f32).to_le_bytes())))
        }
        Some("j" | "j64") => {
            let v = big_to_f64(state, &value, text)?;
            let ty = state.float_type(64, true);
            Ok(state.new_holder(ty, Box::new(v.to_le_bytes())))
        }
        Some(other) => Err(state.eval_error(format!("invalid literal suffix: {other}"))),
    }
}

/// Parses a float literal; `default_ty` is the module's default float type.
pub fn parse_float_literal(
    state: &mut CompilerState,
    text: &str,
    suffix: Option<&str>,
    default_ty: TypeId,
) -> CompileResult<ValueId> {
    let value = parse_float_text(state, text)?;
    let ty = match suffix {
        None => default_ty,
        Some("f" | "f32") => state.core.float32,
        Some("f64") => state.core.float64,
        Some("j32" | "fj") => state.float_type(32, true),
        Some("j" | "j64") => state.float_type(64, true),
        Some(other) => {
            return Err(state.eval_error(format!("invalid float literal suffix: {other}")));
        }
    };
    let bits = match &state.types.get(ty).kind {
        TypeKind::Float { bits, .. } => *bits,
        _ => 64,
    };
    if bits == 32 {
        Ok(state.new_holder(ty, Box::new((value as f32).to_le_bytes())))
    } else {
        Ok(state.new_holder(ty, Box::new(value.to_le_bytes())))
    }
}

fn parse_big_int(state: &CompilerState, text: &str) -> CompileResult<BigInt> {
    let cleaned: String = text.chars().filter(|&c| c != '_').collect();
    let (sign, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };
    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X"))
    {
        BigInt::from_str_radix(hex, 16)
    } else {
        BigInt::from_str_radix(digits, 10)
    };
    match parsed {
        Ok(v) => Ok(v * sign),
        Err(_) => Err(state.eval_error(format!("invalid integer literal: {text}"))),
    }
}

fn make_int_holder(
    state: &mut CompilerState,
    value: &BigInt,
    ty: TypeId,
    text: &str,
) -> CompileResult<ValueId> {
    let TypeKind::Integer { bits, signed } = state.types.get(ty).kind else {
        return Err(state.eval_error(format!("invalid integer literal type for: {text}")));
    };
    let in_range = if signed {
        let min = -(BigInt::from(1) << (bits - 1));
        let max = (BigInt::from(1) << (bits - 1)) - 1;
        *value >= min && *value <= max
    } else {
        let max = (BigInt::from(1) << bits) - 1;
        *value >= BigInt::from(0) && *value <= max
    };
    if !in_range {
        let name = state.type_name(ty);
        return Err(state.eval_error(format!("literal out of range for {name}: {text}")));
    }
    let raw = value.to_i128().unwrap_or_default();
    let mut bytes = vec![0u8; usize::from(bits) / 8].into_boxed_slice();
    crate::state::write_int_bytes(&mut bytes, bits, raw);
    Ok(state.new_holder(ty, bytes))
}

fn big_to_f64(state: &CompilerState, value: &BigInt, text: &str) -> CompileResult<f64> {
    value
        .to_f64()
        .ok_or_else(|| state.eval_error(format!("literal not representable: {text}")))
}

fn parse_float_text(state: &CompilerState, text: &str) -> CompileResult<f64> {
    let cleaned: String = text.chars().filter(|&c| c != '_').collect();
    let is_hex = cleaned.starts_with("0x")
        || cleaned.starts_with("0X")
        || cleaned.starts_with("-0x")
        || cleaned.starts_with("+0x");
    if is_hex {
        parse_hex_float(&cleaned)
            .ok_or_else(|| state.eval_error(format!("invalid float literal: {text}")))
    } else {
        cleaned
            .parse::<f64>()
            .map_err(|_| state.eval_error(format!("invalid float literal: {text}")))
    }
}

/// Hex floats: `0x<mantissa>[.<fraction>]p<exponent>` with a binary
/// exponent.
fn parse_hex_float(text: &str) -> Option<f64> {
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let rest = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X"))?;
    let p = rest.find(['p', 'P'])?;
    let (mantissa_text, exp_text) = rest.split_at(p);
    let exponent: i32 = exp_text[1..].parse().ok()?;
    let (int_part, frac_part) = match mantissa_text.find('.') {
        Some(dot) => (&mantissa_text[..dot], &mantissa_text[dot + 1..]),
        None => (mantissa_text, ""),
    };
    let mut value = 0f64;
    for c in int_part.chars() {
        value = value * 16.0 + f64::from(c.to_digit(16)?);
    }
    let mut scale = 1.0 / 16.0;
    for c in frac_part.chars() {
        value += f64::from(c.to_digit(16)?) * scale;
        scale /= 16.0;
    }
    let result = value * 2f64.powi(exponent);
    Some(if negative { -result } else { result })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::state::CompilerState;

    fn holder_bytes(state: &CompilerState, id: ValueId) -> Vec<u8> {
        state.holders[id.index()].bytes.to_vec()
    }

    #[test]
    fn suffixed_literals_match_binary_representation() {
        let mut state = CompilerState::new();
        let default_int = state.core.int32;

        let v = parse_int_literal(&mut state, "200", Some("u8"), default_int).unwrap();
        assert_eq!(holder_bytes(&state, v), vec![200]);

        let v = parse_int_literal(&mut state, "-2", Some("i16"), default_int).unwrap();
        assert_eq!(holder_bytes(&state, v), (-2i16).to_le_bytes().to_vec());

        let v = parse_int_literal(&mut state, "0x10", Some("i64"), default_int).unwrap();
        assert_eq!(holder_bytes(&state, v), 16i64.to_le_bytes().to_vec());

        let v = parse_int_literal(&mut state, "7", Some("f32"), default_int).unwrap();
        assert_eq!(holder_bytes(&state, v), 7f32.to_le_bytes().to_vec());

        let default_float = state.core.float64;
        let v = parse_float_literal(&mut state, "2.5", None, default_float).unwrap();
        assert_eq!(holder_bytes(&state, v), 2.5f64.to_le_bytes().to_vec());

        let v = parse_float_literal(&mut state, "2.5", Some("f32"), default_float).unwrap();
        assert_eq!(holder_bytes(&state, v), 2.5f32.to_le_bytes().to_vec());
    }

    #[test]
    fn unsuffixed_uses_module_default() {
        let mut state = CompilerState::new();
        let int64 = state.core.int64;
        let v = parse_int_literal(&mut state, "9", None, int64).unwrap();
        assert_eq!(state.holders[v.index()].ty, int64);
        assert_eq!(holder_bytes(&state, v), 9i64.to_le_bytes().to_vec());
    }

    #[test]
    fn out_of_range_literals_are_rejected() {
        let mut state = CompilerState::new();
        let default_int = state.core.int32;
        assert!(parse_int_literal(&mut state, "300", Some("u8"), default_int).is_err());
        assert!(parse_int_literal(&mut state, "-1", Some("u32"), default_int).is_err());
        assert!(parse_int_literal(&mut state, "128", Some("i8"), default_int).is_err());
        assert!(parse_int_literal(&mut state, "127", Some("i8"), default_int).is_ok());
        // u64 hex max fits
        assert!(
            parse_int_literal(&mut state, "0xffffffffffffffff", Some("u64"), default_int).is_ok()
        );
    }

    #[test]
    fn underscore_separators_are_ignored() {
        let mut state = CompilerState::new();
        let default_int = state.core.int32;
        let v = parse_int_literal(&mut state, "1_000_000", None, default_int).unwrap();
        assert_eq!(holder_bytes(&state, v), 1_000_000i32.to_le_bytes().to_vec());
    }

    #[test]
    fn hex_floats() {
        assert_eq!(parse_hex_float("0x1p4").unwrap(), 16.0);
        assert_eq!(parse_hex_float("0x1.8p1").unwrap(), 3.0);
        assert_eq!(parse_hex_float("-0x1p-1").unwrap(), -0.5);
    }
}
