//! Unit tests for the Value enum and GC handles

use core_types::{GcObjectRef, GcRef, LuaType, NativeFnId, StrRef, TableRef, Value};

#[cfg(test)]
mod value_type_tests {
    use super::*;

    #[test]
    fn test_numbers_share_one_basic_type() {
        assert_eq!(Value::Integer(1).lua_type(), LuaType::Number);
        assert_eq!(Value::Float(1.5).lua_type(), LuaType::Number);
        assert_eq!(Value::Integer(1).type_name(), "number");
    }

    #[test]
    fn test_function_variants() {
        assert!(Value::LightNative(NativeFnId(0)).is_function());
        assert_eq!(Value::LightNative(NativeFnId(0)).type_name(), "function");
        assert!(!Value::Nil.is_function());
    }

    #[test]
    fn test_light_userdata_reports_userdata() {
        assert_eq!(Value::LightUserdata(0xdead).type_name(), "userdata");
        assert_eq!(Value::LightUserdata(0xdead).lua_type(), LuaType::LightUserdata);
    }

    #[test]
    fn test_type_tags_round_trip() {
        for ty in LuaType::ALL {
            assert_eq!(LuaType::from_tag(ty.tag()), Some(ty));
        }
        assert_eq!(LuaType::from_tag(9), None);
    }
}

#[cfg(test)]
mod truthiness_tests {
    use super::*;

    #[test]
    fn test_only_nil_and_false_are_falsy() {
        assert!(Value::Nil.is_falsy());
        assert!(Value::Boolean(false).is_falsy());
        assert!(Value::Boolean(true).is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::Float(0.0).is_truthy());
        assert!(Value::String(StrRef::from_raw(0, 0)).is_truthy());
    }
}

#[cfg(test)]
mod handle_tests {
    use super::*;

    #[test]
    fn test_handles_compare_by_index_and_generation() {
        let a = TableRef::from_raw(4, 1);
        assert_eq!(a.index(), 4);
        assert_eq!(a.generation(), 1);
        assert_eq!(a, TableRef::from_raw(4, 1));
        assert_ne!(a, TableRef::from_raw(4, 2));
    }

    #[test]
    fn test_as_gc_maps_heap_values() {
        let t = TableRef::from_raw(2, 0);
        assert_eq!(Value::Table(t).as_gc(), Some(GcObjectRef::Table(t)));
        assert_eq!(Value::Integer(3).as_gc(), None);
        let back: Option<Value> = GcObjectRef::Table(t).into();
        assert_eq!(back, Some(Value::Table(t)));
    }
}
