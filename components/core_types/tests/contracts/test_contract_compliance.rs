//! Contract compliance tests for core_types
//!
//! These tests pin the public surface other components rely on: the numeric
//! tags shared with the binary chunk format, status codes, and the metamethod
//! event order encoded in bytecode.

use core_types::{variant, LuaError, LuaType, Status, TagMethod, Value, BIT_COLLECTABLE};

#[cfg(test)]
mod tag_contract_tests {
    use super::*;

    /// Contract: basic type tags match the reference numbering
    #[test]
    fn test_basic_type_numbers() {
        assert_eq!(LuaType::Nil as u8, 0);
        assert_eq!(LuaType::Boolean as u8, 1);
        assert_eq!(LuaType::LightUserdata as u8, 2);
        assert_eq!(LuaType::Number as u8, 3);
        assert_eq!(LuaType::String as u8, 4);
        assert_eq!(LuaType::Table as u8, 5);
        assert_eq!(LuaType::Function as u8, 6);
        assert_eq!(LuaType::Userdata as u8, 7);
        assert_eq!(LuaType::Thread as u8, 8);
    }

    /// Contract: variant tags used by the chunk constant table
    #[test]
    fn test_constant_variant_tags() {
        assert_eq!(variant::NIL, 0x00);
        assert_eq!(variant::FALSE, 0x01);
        assert_eq!(variant::TRUE, 0x11);
        assert_eq!(variant::INTEGER, 0x03);
        assert_eq!(variant::FLOAT, 0x13);
        assert_eq!(variant::SHORT_STRING, 0x04);
        assert_eq!(variant::LONG_STRING, 0x14);
        assert_eq!(BIT_COLLECTABLE, 0x40);
    }

    /// Contract: Value reports variant tags with the collectable bit
    #[test]
    fn test_value_variant_tags() {
        assert_eq!(Value::Boolean(true).variant_tag(), variant::TRUE);
        assert_eq!(Value::Nil.variant_tag(), variant::NIL);
    }
}

#[cfg(test)]
mod status_contract_tests {
    use super::*;

    /// Contract: status codes
    #[test]
    fn test_status_codes() {
        let expected = [
            (Status::Ok, 0),
            (Status::Yield, 1),
            (Status::Runtime, 2),
            (Status::Syntax, 3),
            (Status::Memory, 4),
            (Status::ErrorHandler, 5),
        ];
        for (status, code) in expected {
            assert_eq!(status.code(), code);
        }
    }

    /// Contract: LuaError carries any value
    #[test]
    fn test_error_carries_value() {
        let err = LuaError::runtime(Value::Boolean(false));
        assert_eq!(err.value, Value::Boolean(false));
        assert!(!err.is_yield());
    }
}

#[cfg(test)]
mod tag_method_contract_tests {
    use super::*;

    /// Contract: metamethod numbering used by MMBIN operands
    #[test]
    fn test_event_numbers() {
        assert_eq!(TagMethod::Index as u8, 0);
        assert_eq!(TagMethod::Eq as u8, 5);
        assert_eq!(TagMethod::Add as u8, 6);
        assert_eq!(TagMethod::Concat as u8, 22);
        assert_eq!(TagMethod::Close as u8, 24);
        assert_eq!(TagMethod::Close.name(), "__close");
    }
}
