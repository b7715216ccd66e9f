//! Auxiliary library
//!
//! Helpers built only on the public embedding API: references, tracebacks,
//! argument checking for native functions, metatable registries and the
//! `tostring` conversion.

use crate::api::REGISTRY_INDEX;
use crate::debug::DebugInfo;
use crate::state::State;
use core_types::{format_float, GcRef, LuaError, LuaResult, LuaType, ThreadRef, Value};
use memory_manager::MULTRET;

/// Reference to `nil`.
pub const REFNIL: i32 = -1;
/// "No reference".
pub const NOREF: i32 = -2;
/// Slot holding the head of the free list of references.
const FREELIST: i64 = 3;

/// Levels shown before the elision in a traceback.
const LEVELS1: usize = 10;
/// Levels shown after the elision.
const LEVELS2: usize = 11;

/// A value's identity, for the `type: 0x...` display form.
fn identity(v: &Value) -> usize {
    let index = match *v {
        Value::String(r) => r.index(),
        Value::Table(r) => r.index(),
        Value::LuaClosure(r) => r.index(),
        Value::NativeClosure(r) => r.index(),
        Value::Userdata(r) => r.index(),
        Value::Thread(r) => r.index(),
        Value::LightNative(id) => id.0,
        Value::LightUserdata(p) => return p,
        _ => 0,
    };
    (usize::from(v.variant_tag()) << 24) | index as usize
}

impl State {
    // ========================================================================
    // References
    // ========================================================================

    /// Pops a value and stores it in the table at `t` under a fresh integer
    /// key, which is returned. `nil` is not stored and gives [`REFNIL`].
    pub fn reference(&mut self, t: i32) -> LuaResult<i32> {
        if self.is_nil(-1) {
            self.pop(1)?;
            return Ok(REFNIL);
        }
        let t = self.abs_index(t);
        let mut r = if self.raw_get_i(t, FREELIST) == LuaType::Nil {
            self.push_integer(0);
            self.raw_set_i(t, FREELIST);
            0
        } else {
            self.to_integer(-1).unwrap_or(0)
        };
        self.pop(1)?;
        if r != 0 {
            // reuse a freed reference
            self.raw_get_i(t, r);
            self.raw_set_i(t, FREELIST);
        } else {
            r = self.raw_len(t) as i64 + 1;
        }
        self.raw_set_i(t, r);
        Ok(r as i32)
    }

    /// Frees reference `r` of the table at `t`.
    pub fn unreference(&mut self, t: i32, r: i32) {
        if r >= 0 {
            let t = self.abs_index(t);
            self.raw_get_i(t, FREELIST);
            self.raw_set_i(t, i64::from(r));
            self.push_integer(i64::from(r));
            self.raw_set_i(t, FREELIST);
        }
    }

    // ========================================================================
    // Tracebacks
    // ========================================================================

    /// Finds a name for the function described by `ar` among the fields
    /// of the loaded modules (`"module.name"`, or just `"name"` for
    /// globals).
    fn global_func_name(&mut self, ar: &DebugInfo) -> Option<String> {
        let mut info = ar.clone();
        self.get_info("f", &mut info);
        let func = self.pop_value();
        let loaded = self.loaded_key();
        let Value::Table(loaded) = self.heap.table_get_str(self.heap.registry, loaded) else {
            return None;
        };
        let mut key = Value::Nil;
        while let Ok(Some((k, module))) = self.heap.table_next(loaded, &key) {
            key = k;
            let (Value::String(modname), Value::Table(module)) = (k, module) else {
                continue;
            };
            let mut field = Value::Nil;
            while let Ok(Some((fk, fv))) = self.heap.table_next(module, &field) {
                field = fk;
                if let Value::String(fname) = fk {
                    if self.heap.raw_equal(&fv, &func) {
                        let modname = self.heap.strings[modname].to_str_lossy();
                        let fname = self.heap.strings[fname].to_str_lossy();
                        return Some(if modname == "_G" {
                            fname.into_owned()
                        } else {
                            format!("{}.{}", modname, fname)
                        });
                    }
                }
            }
        }
        None
    }

    fn describe_function(&mut self, ar: &DebugInfo) -> String {
        if let Some(name) = self.global_func_name(ar) {
            format!("function '{}'", name)
        } else if !ar.name_what.is_empty() {
            format!(
                "{} '{}'",
                ar.name_what,
                ar.name.as_deref().unwrap_or("?")
            )
        } else if ar.what == "main" {
            "main chunk".to_string()
        } else if ar.what != "C" {
            format!(
                "function <{}:{}>",
                ar.short_src,
                ar.line_defined.unwrap_or(0)
            )
        } else {
            "?".to_string()
        }
    }

    /// Pushes a traceback of thread `th` starting at `level`, preceded by
    /// `msg` when given. Very deep stacks show their first and last levels
    /// only.
    pub fn traceback(&mut self, th: ThreadRef, msg: Option<&str>, level: usize) -> LuaResult<()> {
        let last = self.heap.threads[th].ci.saturating_sub(1);
        let mut limit2show: isize = if last.saturating_sub(level) > LEVELS1 + LEVELS2 {
            LEVELS1 as isize
        } else {
            -1
        };
        let mut out = String::new();
        if let Some(msg) = msg {
            out.push_str(msg);
            out.push('\n');
        }
        out.push_str("stack traceback:");
        let mut level = level;
        while let Some(mut ar) = self.get_thread_stack(th, level) {
            level += 1;
            if limit2show == 0 {
                let n = last - level - LEVELS2 + 1;
                out.push_str(&format!("\n\t...\t(skipping {} levels)", n));
                level += n;
            } else {
                self.get_info("Slnt", &mut ar);
                match ar.current_line {
                    Some(line) => out.push_str(&format!("\n\t{}:{}: in ", ar.short_src, line)),
                    None => out.push_str(&format!("\n\t{}: in ", ar.short_src)),
                }
                let name = self.describe_function(&ar);
                out.push_str(&name);
                if ar.is_tail_call {
                    out.push_str("\n\t(...tail calls...)");
                }
            }
            limit2show -= 1;
        }
        self.push_string(&out)?;
        Ok(())
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// `chunkname:currentline:` of the function at `level`, or an empty
    /// string when it has no line information.
    pub fn where_(&mut self, level: usize) -> String {
        if let Some(mut ar) = self.get_stack(level) {
            self.get_info("Sl", &mut ar);
            if let Some(line) = ar.current_line {
                return format!("{}:{}:", ar.short_src, line);
            }
        }
        String::new()
    }

    /// Raises `msg` prefixed with the position of the calling Lua code.
    pub fn error_message(&mut self, msg: impl AsRef<str>) -> LuaError {
        let text = format!("{}{}", self.where_(1), msg.as_ref());
        let s = self.heap.new_str(&text);
        self.push_value(Value::String(s));
        self.error()
    }

    /// Raises "bad argument #arg to 'f' (extramsg)".
    pub fn arg_error(&mut self, arg: i32, extramsg: &str) -> LuaError {
        let Some(mut ar) = self.get_stack(0) else {
            return self.error_message(format!("bad argument #{} ({})", arg, extramsg));
        };
        self.get_info("n", &mut ar);
        let mut arg = arg;
        if ar.name_what == "method" {
            arg -= 1;
            if arg == 0 {
                return self.error_message(format!(
                    "calling '{}' on bad self ({})",
                    ar.name.as_deref().unwrap_or("?"),
                    extramsg
                ));
            }
        }
        let name = match ar.name.clone() {
            Some(name) => name,
            None => self.global_func_name(&ar).unwrap_or_else(|| "?".to_string()),
        };
        self.error_message(format!("bad argument #{} to '{}' ({})", arg, name, extramsg))
    }

    /// Raises "`tname` expected, got `type`" for argument `arg`.
    pub fn type_error_arg(&mut self, arg: i32, tname: &str) -> LuaError {
        let actual = match self.get_metafield(arg, "__name") {
            Some(LuaType::String) => {
                let name = self.to_str(-1).unwrap_or_default();
                self.pop_value();
                name
            }
            Some(_) => {
                self.pop_value();
                self.type_name_at(arg).to_string()
            }
            None if self.type_of(arg) == Some(LuaType::LightUserdata) => {
                "light userdata".to_string()
            }
            None => self.type_name_at(arg).to_string(),
        };
        self.arg_error(arg, &format!("{} expected, got {}", tname, actual))
    }

    /// Integer argument `arg`.
    pub fn check_integer(&mut self, arg: i32) -> LuaResult<i64> {
        match self.to_integer(arg) {
            Some(i) => Ok(i),
            None if self.is_number(arg) => {
                Err(self.arg_error(arg, "number has no integer representation"))
            }
            None => Err(self.type_error_arg(arg, "number")),
        }
    }

    /// Optional integer argument `arg`.
    pub fn opt_integer(&mut self, arg: i32, default: i64) -> LuaResult<i64> {
        if self.is_none_or_nil(arg) {
            Ok(default)
        } else {
            self.check_integer(arg)
        }
    }

    /// Number argument `arg`.
    pub fn check_number(&mut self, arg: i32) -> LuaResult<f64> {
        match self.to_number(arg) {
            Some(n) => Ok(n),
            None => Err(self.type_error_arg(arg, "number")),
        }
    }

    /// String argument `arg` (numbers are converted).
    pub fn check_bytes(&mut self, arg: i32) -> LuaResult<Vec<u8>> {
        match self.to_bytes(arg) {
            Some(b) => Ok(b),
            None => Err(self.type_error_arg(arg, "string")),
        }
    }

    /// Argument `arg` must have type `ty`.
    pub fn check_type(&mut self, arg: i32, ty: LuaType) -> LuaResult<()> {
        if self.type_of(arg) == Some(ty) {
            Ok(())
        } else {
            Err(self.type_error_arg(arg, ty.name()))
        }
    }

    /// Argument `arg` must be present.
    pub fn check_any(&mut self, arg: i32) -> LuaResult<()> {
        if self.is_none(arg) {
            Err(self.arg_error(arg, "value expected"))
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Metatables
    // ========================================================================

    /// Pushes the registry metatable named `tname`, creating it (with a
    /// `__name` field) when missing. Returns whether it was created.
    pub fn new_metatable(&mut self, tname: &str) -> LuaResult<bool> {
        if self.get_field(REGISTRY_INDEX, tname)? != LuaType::Nil {
            return Ok(false);
        }
        self.pop(1)?;
        self.create_table(0, 2)?;
        self.push_string(tname)?;
        self.set_field(-2, "__name")?;
        self.push_copy(-1);
        self.set_field(REGISTRY_INDEX, tname)?;
        Ok(true)
    }

    /// Pushes field `event` of the metatable of the value at `obj`, if the
    /// value has a metatable with that field.
    pub fn get_metafield(&mut self, obj: i32, event: &str) -> Option<LuaType> {
        let v = self.value_at(obj);
        let mt = self.heap.metatable_of(&v)?;
        let key = self.heap.new_str(event);
        let field = self.heap.table_get_str(mt, key);
        if field.is_nil() {
            return None;
        }
        self.push_value(field);
        Some(field.lua_type())
    }

    /// Calls metamethod `event` of the value at `obj` with the value as its
    /// only argument, pushing one result. Returns `false` when there is no
    /// such metamethod.
    pub fn call_meta(&mut self, obj: i32, event: &str) -> LuaResult<bool> {
        let obj = self.abs_index(obj);
        if self.get_metafield(obj, event).is_none() {
            return Ok(false);
        }
        self.push_copy(obj);
        self.call(1, 1)?;
        Ok(true)
    }

    /// Length of the value at `idx` as an integer, honouring `__len`.
    pub fn length(&mut self, idx: i32) -> LuaResult<i64> {
        self.len(idx)?;
        let n = self.to_integer(-1);
        self.pop(1)?;
        match n {
            Some(n) => Ok(n),
            None => Err(self.error_message("object length is not an integer")),
        }
    }

    /// Converts the value at `idx` to its display string, honouring
    /// `__tostring` and `__name`. The string is also pushed.
    pub fn to_display_string(&mut self, idx: i32) -> LuaResult<String> {
        let idx = self.abs_index(idx);
        if self.call_meta(idx, "__tostring")? {
            if !matches!(self.value_at(-1), Value::String(_)) {
                return Err(self.error_message("'__tostring' must return a string"));
            }
        } else {
            let v = self.value_at(idx);
            match v {
                Value::Integer(i) => {
                    self.push_string(&i.to_string())?;
                }
                Value::Float(f) => {
                    self.push_string(&format_float(f))?;
                }
                Value::String(_) => self.push_copy(idx),
                Value::Boolean(b) => {
                    self.push_string(if b { "true" } else { "false" })?;
                }
                Value::Nil => {
                    self.push_string("nil")?;
                }
                _ => {
                    let kind = match self.get_metafield(idx, "__name") {
                        Some(LuaType::String) => {
                            let name = self.to_str(-1).unwrap_or_default();
                            self.pop_value();
                            name
                        }
                        Some(_) => {
                            self.pop_value();
                            v.type_name().to_string()
                        }
                        None => v.type_name().to_string(),
                    };
                    self.push_string(&format!("{}: 0x{:08x}", kind, identity(&v)))?;
                }
            }
        }
        Ok(self.to_str(-1).unwrap_or_default())
    }

    /// Runs the function on top of the stack in protected mode with a
    /// traceback message handler, the way a host front end runs a chunk.
    pub fn call_with_traceback(&mut self, nargs: usize) -> core_types::Status {
        fn handler(state: &mut State) -> LuaResult<usize> {
            let msg = match state.to_str(1) {
                Some(msg) => msg,
                None => state.to_display_string(1)?,
            };
            let th = state.running();
            state.traceback(th, Some(&msg), 1)?;
            Ok(1)
        }
        let base = self.get_top() - nargs as i32;
        self.push_native(handler);
        self.insert(base);
        let status = self.pcall(nargs, MULTRET, base);
        let _ = self.remove(base);
        status
    }
}
