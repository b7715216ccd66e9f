//! Source naming and call stack frame records.
//!
//! Chunk names follow the usual conventions: `=name` is used verbatim,
//! `@file` names a file, anything else is the source text itself and is shown
//! as `[string "..."]`.

/// Maximum size of a formatted chunk identifier, including the terminator
/// the reference implementation reserves.
pub const ID_SIZE: usize = 60;

const RETS: &str = "...";
const PRE: &str = "[string \"";
const POS: &str = "\"]";

/// Formats a chunk name for messages (`short_src`).
///
/// # Examples
///
/// ```
/// use core_types::chunk_id;
///
/// assert_eq!(chunk_id(b"=stdin"), "stdin");
/// assert_eq!(chunk_id(b"@main.lua"), "main.lua");
/// assert_eq!(chunk_id(b"return 1"), "[string \"return 1\"]");
/// ```
pub fn chunk_id(source: &[u8]) -> String {
    let srclen = source.len();
    match source.first() {
        Some(b'=') => {
            let body = &source[1..];
            let keep = if srclen <= ID_SIZE { body.len() } else { ID_SIZE - 1 };
            String::from_utf8_lossy(&body[..keep.min(body.len())]).into_owned()
        }
        Some(b'@') => {
            let body = &source[1..];
            if srclen <= ID_SIZE {
                String::from_utf8_lossy(body).into_owned()
            } else {
                let keep = ID_SIZE - RETS.len() - 1;
                let tail = &body[body.len() - keep..];
                format!("{}{}", RETS, String::from_utf8_lossy(tail))
            }
        }
        _ => {
            let budget = ID_SIZE - (PRE.len() + RETS.len() + POS.len()) - 1;
            let newline = source.iter().position(|&b| b == b'\n');
            let mut out = String::from(PRE);
            if srclen < budget && newline.is_none() {
                out.push_str(&String::from_utf8_lossy(source));
            } else {
                let len = newline.unwrap_or(srclen).min(budget);
                out.push_str(&String::from_utf8_lossy(&source[..len]));
                out.push_str(RETS);
            }
            out.push_str(POS);
            out
        }
    }
}

/// Kind of function occupying a call stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A Lua function
    Lua,
    /// A native function
    Native,
    /// The main chunk of a loaded source
    Main,
}

impl FrameKind {
    /// The `what` string reported by debug introspection.
    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Lua => "Lua",
            FrameKind::Native => "C",
            FrameKind::Main => "main",
        }
    }
}

/// One frame of a call stack, as reported in tracebacks.
///
/// # Examples
///
/// ```
/// use core_types::{FrameKind, StackFrame};
///
/// let frame = StackFrame {
///     short_src: "main.lua".to_string(),
///     current_line: Some(3),
///     name: Some("f".to_string()),
///     name_what: "global",
///     kind: FrameKind::Lua,
///     line_defined: 1,
///     is_tail_call: false,
/// };
/// assert_eq!(frame.location(), "main.lua:3:");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Printable chunk name
    pub short_src: String,
    /// Line being executed, when known
    pub current_line: Option<u32>,
    /// Resolved function name
    pub name: Option<String>,
    /// How the name was resolved (`global`, `local`, `method`, ...)
    pub name_what: &'static str,
    /// Kind of function
    pub kind: FrameKind,
    /// Line where the function was defined
    pub line_defined: u32,
    /// Whether the frame was entered through a tail call
    pub is_tail_call: bool,
}

impl StackFrame {
    /// `short_src:line:` prefix, or `short_src:` for native frames.
    pub fn location(&self) -> String {
        match self.current_line {
            Some(line) => format!("{}:{}:", self.short_src, line),
            None => format!("{}:", self.short_src),
        }
    }
}
