//! Loading and dumping chunks
//!
//! Binary chunks are decoded by `bytecode_system` into a [`Prototype`]
//! tree before anything is allocated, so a rejected chunk leaves the heap
//! untouched. Text chunks need a front end; the runtime has none of its
//! own and accepts one through the [`Compiler`] trait.

use crate::state::State;
use bytecode_system::{chunk, Prototype};
use core_types::{Status, Value};
use std::rc::Rc;
use tracing::debug;

/// A source-to-bytecode front end.
pub trait Compiler {
    /// Compiles `source` into the prototype of a main function. The error
    /// is the complete message, conventionally `chunkname:line: text`.
    fn compile(&mut self, source: &[u8], chunkname: &str) -> Result<Prototype, String>;
}

/// Name of a chunk as it appears in load error messages.
fn display_name(chunkname: &str) -> &str {
    match chunkname.as_bytes().first() {
        Some(b'=') | Some(b'@') => &chunkname[1..],
        Some(&b) if b == chunk::SIGNATURE[0] => "binary string",
        _ => chunkname,
    }
}

impl State {
    /// Installs the front end used for text chunks.
    pub fn set_compiler(&mut self, compiler: Box<dyn Compiler>) {
        self.compiler = Some(compiler);
    }

    /// Loads a chunk without running it.
    ///
    /// `mode` restricts the accepted kinds: `"b"` binary only, `"t"` text
    /// only, `"bt"` (the default) both. On success the main function is
    /// pushed and its first upvalue, if any, is set to the globals table.
    /// Otherwise the error message is pushed and the status (`Syntax` or
    /// `Memory`) is returned.
    pub fn load(&mut self, data: &[u8], chunkname: &str, mode: Option<&str>) -> Status {
        let mode = mode.unwrap_or("bt");
        let binary = chunk::is_binary(data);
        let (kind, wanted) = if binary { ("binary", 'b') } else { ("text", 't') };
        if !mode.contains(wanted) {
            return self.load_error(format!(
                "attempt to load a {} chunk (mode is '{}')",
                kind, mode
            ));
        }
        let proto = if binary {
            match chunk::undump(data) {
                Ok(p) => p,
                Err(e) => {
                    return self.load_error(format!(
                        "{}: bad binary format ({})",
                        display_name(chunkname),
                        e
                    ))
                }
            }
        } else {
            let Some(compiler) = self.compiler.as_mut() else {
                return self.load_error(format!(
                    "{}: no compiler installed for text chunks",
                    display_name(chunkname)
                ));
            };
            match compiler.compile(data, chunkname) {
                Ok(p) => p,
                Err(msg) => return self.load_error(msg),
            }
        };
        debug!(chunk = chunkname, binary, "chunk loaded");
        self.push_main_closure(Rc::new(proto));
        match self.check_gc() {
            Ok(()) => Status::Ok,
            Err(e) => {
                self.pop_value();
                self.set_error_obj(self.top(), &e);
                e.status
            }
        }
    }

    fn load_error(&mut self, msg: String) -> Status {
        let s = self.heap.new_str(&msg);
        self.push_value(Value::String(s));
        Status::Syntax
    }

    /// Pushes a closure of `proto` with fresh closed upvalues, the first one
    /// holding the globals table.
    pub(crate) fn push_main_closure(&mut self, proto: Rc<Prototype>) {
        let nups = proto.upvalues.len();
        let pref = self.heap.new_proto(proto);
        let globals = Value::Table(self.heap.globals());
        let upvals = (0..nups)
            .map(|i| {
                let v = if i == 0 { globals } else { Value::Nil };
                self.heap.new_closed_upval(v)
            })
            .collect();
        let cl = self.heap.new_lclosure(pref, upvals);
        self.push_value(Value::LuaClosure(cl));
    }

    /// Serializes the Lua function on top of the stack, without debug
    /// information when `strip` is set. `None` when the value is not a Lua
    /// function.
    pub fn dump(&self, strip: bool) -> Option<Vec<u8>> {
        match self.stack_get(self.top() - 1) {
            Value::LuaClosure(cl) => Some(chunk::dump(self.heap.closure_proto(cl), strip)),
            _ => None,
        }
    }
}
