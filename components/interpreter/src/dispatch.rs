//! Dispatch loop for bytecode execution
//!
//! [`State::execute`] runs Lua frames of the running thread. A call from Lua
//! to Lua reuses the same native frame; the loop only returns when a frame
//! marked fresh (entered from native code) returns.

use crate::debug::VarSite;
use crate::state::State;
use crate::vm::ArithOp;
use bytecode_system::{Instruction, OpCode, Prototype};
use core_types::{LClosureRef, LuaError, LuaResult, ProtoRef, Status, TagMethod, Value};
use memory_manager::CallStatus;
use std::rc::Rc;

/// Largest value of the `C` operand; `NEWTABLE` and `SETLIST` extend it with
/// an `EXTRAARG`.
const MAXARG_C: usize = 255;

#[inline]
fn jump(pc: usize, offset: i32) -> usize {
    (pc as isize + offset as isize) as usize
}

fn arith_op_of(op: OpCode) -> Option<ArithOp> {
    Some(match op {
        OpCode::AddI | OpCode::AddK | OpCode::Add => ArithOp::Add,
        OpCode::SubK | OpCode::Sub => ArithOp::Sub,
        OpCode::MulK | OpCode::Mul => ArithOp::Mul,
        OpCode::ModK | OpCode::Mod => ArithOp::Mod,
        OpCode::PowK | OpCode::Pow => ArithOp::Pow,
        OpCode::DivK | OpCode::Div => ArithOp::Div,
        OpCode::IDivK | OpCode::IDiv => ArithOp::IDiv,
        OpCode::BAndK | OpCode::BAnd => ArithOp::BAnd,
        OpCode::BOrK | OpCode::BOr => ArithOp::BOr,
        OpCode::BXorK | OpCode::BXor => ArithOp::BXor,
        OpCode::ShlI | OpCode::Shl => ArithOp::Shl,
        OpCode::ShrI | OpCode::Shr => ArithOp::Shr,
        _ => return None,
    })
}

impl State {
    #[inline]
    fn konst(&self, p: ProtoRef, i: u32) -> Value {
        self.heap.protos[p].constants[i as usize]
    }

    #[inline]
    fn ci_trap(&self, ci: usize) -> bool {
        self.thread().call_infos[ci].trap
    }

    /// Sets the stack top to the frame limit before an operation that may
    /// call out or raise.
    #[inline]
    fn save_state(&mut self, ci: usize) {
        let top = self.thread().call_infos[ci].top;
        self.set_top_raw(top);
    }

    #[inline]
    fn rk(&self, p: ProtoRef, base: usize, i: Instruction) -> Value {
        if i.k() {
            self.konst(p, i.c())
        } else {
            self.stack_get(base + i.c() as usize)
        }
    }

    fn frame_closure(&mut self, ci: usize) -> LuaResult<(LClosureRef, ProtoRef, Rc<Prototype>)> {
        let func = self.thread().call_infos[ci].func;
        match self.stack_get(func) {
            Value::LuaClosure(cl) => {
                let pref = self.heap.lclosures[cl].proto;
                let proto = Rc::clone(&self.heap.protos[pref].proto);
                Ok((cl, pref, proto))
            }
            other => Err(self.run_error(format!(
                "frame does not hold a Lua function ({})",
                other.type_name()
            ))),
        }
    }

    /// Runs Lua frame `ci` and the Lua frames it calls until a fresh frame
    /// returns.
    pub(crate) fn execute(&mut self, mut ci: usize) -> LuaResult<()> {
        let mut trap = self.thread().hook_mask != 0;
        'frame: loop {
            let (cl, pref, proto) = self.frame_closure(ci)?;
            let mut pc = self.thread().call_infos[ci].saved_pc;
            if trap {
                if pc == 0 {
                    if proto.is_vararg {
                        // hooks start after VARARGPREP
                        trap = false;
                    } else {
                        self.hook_call(ci)?;
                    }
                }
                self.thread_mut().call_infos[ci].trap = true;
            }
            let mut base = self.thread().call_infos[ci].func + 1;
            loop {
                if trap {
                    trap = self.trace_exec(ci, pc, &proto)?;
                    base = self.thread().call_infos[ci].func + 1;
                }
                let i = proto.code[pc];
                pc += 1;
                self.thread_mut().call_infos[ci].saved_pc = pc;
                let Some(op) = i.opcode() else {
                    return Err(self.run_error(format!("invalid opcode {}", i.raw_opcode())));
                };
                let ra = base + i.a() as usize;
                match op {
                    OpCode::Move => {
                        let v = self.stack_get(base + i.b() as usize);
                        self.stack_set(ra, v);
                    }
                    OpCode::LoadI => self.stack_set(ra, Value::Integer(i64::from(i.sbx()))),
                    OpCode::LoadF => self.stack_set(ra, Value::Float(f64::from(i.sbx()))),
                    OpCode::LoadK => {
                        let v = self.konst(pref, i.bx());
                        self.stack_set(ra, v);
                    }
                    OpCode::LoadKX => {
                        let v = self.konst(pref, proto.code[pc].ax_arg());
                        pc += 1;
                        self.stack_set(ra, v);
                    }
                    OpCode::LoadFalse => self.stack_set(ra, Value::Boolean(false)),
                    OpCode::LFalseSkip => {
                        self.stack_set(ra, Value::Boolean(false));
                        pc += 1;
                    }
                    OpCode::LoadTrue => self.stack_set(ra, Value::Boolean(true)),
                    OpCode::LoadNil => {
                        for slot in ra..=ra + i.b() as usize {
                            self.stack_set(slot, Value::Nil);
                        }
                    }
                    OpCode::GetUpval => {
                        let u = self.heap.lclosures[cl].upvals[i.b() as usize];
                        let v = self.heap.upval_get(u);
                        self.stack_set(ra, v);
                    }
                    OpCode::SetUpval => {
                        let u = self.heap.lclosures[cl].upvals[i.b() as usize];
                        let v = self.stack_get(ra);
                        self.heap.upval_set(u, v);
                    }
                    OpCode::GetTabUp => {
                        let b = i.b() as usize;
                        let u = self.heap.lclosures[cl].upvals[b];
                        let t = self.heap.upval_get(u);
                        let key = self.konst(pref, i.c());
                        self.save_state(ci);
                        let v = self.get_index(t, key, VarSite::Upvalue(b))?;
                        self.stack_set(ra, v);
                        trap = self.ci_trap(ci);
                    }
                    OpCode::GetTable => {
                        let b = base + i.b() as usize;
                        let t = self.stack_get(b);
                        let key = self.stack_get(base + i.c() as usize);
                        self.save_state(ci);
                        let v = self.get_index(t, key, VarSite::Stack(b))?;
                        self.stack_set(ra, v);
                        trap = self.ci_trap(ci);
                    }
                    OpCode::GetI => {
                        let b = base + i.b() as usize;
                        let t = self.stack_get(b);
                        self.save_state(ci);
                        let key = Value::Integer(i64::from(i.c()));
                        let v = self.get_index(t, key, VarSite::Stack(b))?;
                        self.stack_set(ra, v);
                        trap = self.ci_trap(ci);
                    }
                    OpCode::GetField => {
                        let b = base + i.b() as usize;
                        let t = self.stack_get(b);
                        let key = self.konst(pref, i.c());
                        self.save_state(ci);
                        let v = self.get_index(t, key, VarSite::Stack(b))?;
                        self.stack_set(ra, v);
                        trap = self.ci_trap(ci);
                    }
                    OpCode::SetTabUp => {
                        let a = i.a() as usize;
                        let u = self.heap.lclosures[cl].upvals[a];
                        let t = self.heap.upval_get(u);
                        let key = self.konst(pref, i.b());
                        let v = self.rk(pref, base, i);
                        self.save_state(ci);
                        self.set_index(t, key, v, VarSite::Upvalue(a))?;
                        trap = self.ci_trap(ci);
                    }
                    OpCode::SetTable => {
                        let t = self.stack_get(ra);
                        let key = self.stack_get(base + i.b() as usize);
                        let v = self.rk(pref, base, i);
                        self.save_state(ci);
                        self.set_index(t, key, v, VarSite::Stack(ra))?;
                        trap = self.ci_trap(ci);
                    }
                    OpCode::SetI => {
                        let t = self.stack_get(ra);
                        let key = Value::Integer(i64::from(i.b()));
                        let v = self.rk(pref, base, i);
                        self.save_state(ci);
                        self.set_index(t, key, v, VarSite::Stack(ra))?;
                        trap = self.ci_trap(ci);
                    }
                    OpCode::SetField => {
                        let t = self.stack_get(ra);
                        let key = self.konst(pref, i.b());
                        let v = self.rk(pref, base, i);
                        self.save_state(ci);
                        self.set_index(t, key, v, VarSite::Stack(ra))?;
                        trap = self.ci_trap(ci);
                    }
                    OpCode::NewTable => {
                        let b = i.b();
                        let nhash = if b > 0 { 1usize << (b - 1) } else { 0 };
                        let mut narray = i.c() as usize;
                        if i.k() {
                            narray += proto.code[pc].ax_arg() as usize * (MAXARG_C + 1);
                        }
                        pc += 1;
                        let t = self.heap.new_table_sized(narray, nhash);
                        self.stack_set(ra, Value::Table(t));
                        self.set_top_raw(ra + 1);
                        self.check_gc()?;
                        trap = self.ci_trap(ci);
                    }
                    OpCode::SelfOp => {
                        let b = base + i.b() as usize;
                        let obj = self.stack_get(b);
                        let key = self.rk(pref, base, i);
                        self.stack_set(ra + 1, obj);
                        self.save_state(ci);
                        let v = self.get_index(obj, key, VarSite::Stack(b))?;
                        self.stack_set(ra, v);
                        trap = self.ci_trap(ci);
                    }
                    OpCode::AddI
                    | OpCode::AddK
                    | OpCode::SubK
                    | OpCode::MulK
                    | OpCode::ModK
                    | OpCode::PowK
                    | OpCode::DivK
                    | OpCode::IDivK
                    | OpCode::BAndK
                    | OpCode::BOrK
                    | OpCode::BXorK
                    | OpCode::ShrI
                    | OpCode::ShlI
                    | OpCode::Add
                    | OpCode::Sub
                    | OpCode::Mul
                    | OpCode::Mod
                    | OpCode::Pow
                    | OpCode::Div
                    | OpCode::IDiv
                    | OpCode::BAnd
                    | OpCode::BOr
                    | OpCode::BXor
                    | OpCode::Shl
                    | OpCode::Shr => {
                        let Some(aop) = arith_op_of(op) else {
                            continue;
                        };
                        let rb = self.stack_get(base + i.b() as usize);
                        let (p1, p2) = match op {
                            OpCode::AddI | OpCode::ShrI => (rb, Value::Integer(i64::from(i.sc()))),
                            OpCode::ShlI => (Value::Integer(i64::from(i.sc())), rb),
                            OpCode::AddK
                            | OpCode::SubK
                            | OpCode::MulK
                            | OpCode::ModK
                            | OpCode::PowK
                            | OpCode::DivK
                            | OpCode::IDivK
                            | OpCode::BAndK
                            | OpCode::BOrK
                            | OpCode::BXorK => (rb, self.konst(pref, i.c())),
                            _ => (rb, self.stack_get(base + i.c() as usize)),
                        };
                        self.save_state(ci);
                        if let Some(v) = self.raw_arith(aop, p1, p2)? {
                            self.stack_set(ra, v);
                            // skip the metamethod fallback
                            pc += 1;
                        }
                    }
                    OpCode::MmBin | OpCode::MmBinI | OpCode::MmBinK => {
                        let result = base + proto.code[pc - 2].a() as usize;
                        let event = TagMethod::from_index(i.c() as usize).unwrap_or(TagMethod::Add);
                        let p1 = self.stack_get(ra);
                        self.save_state(ci);
                        let v = match op {
                            OpCode::MmBin => {
                                let b = base + i.b() as usize;
                                let p2 = self.stack_get(b);
                                self.try_bin_tm(p1, p2, (VarSite::Stack(ra), VarSite::Stack(b)), event)?
                            }
                            OpCode::MmBinI => {
                                let imm = Value::Integer(i64::from(i.sb()));
                                let sites = (VarSite::Stack(ra), VarSite::None);
                                self.try_bin_assoc_tm(p1, imm, sites, i.k(), event)?
                            }
                            _ => {
                                let imm = self.konst(pref, i.b());
                                let sites = (VarSite::Stack(ra), VarSite::None);
                                self.try_bin_assoc_tm(p1, imm, sites, i.k(), event)?
                            }
                        };
                        self.stack_set(result, v);
                        trap = self.ci_trap(ci);
                    }
                    OpCode::Unm | OpCode::BNot => {
                        let b = base + i.b() as usize;
                        let rb = self.stack_get(b);
                        let aop = if op == OpCode::Unm {
                            ArithOp::Unm
                        } else {
                            ArithOp::BNot
                        };
                        self.save_state(ci);
                        let site = VarSite::Stack(b);
                        let v = self.arith_values(aop, rb, rb, (site, site))?;
                        self.stack_set(ra, v);
                        trap = self.ci_trap(ci);
                    }
                    OpCode::Not => {
                        let v = self.stack_get(base + i.b() as usize);
                        self.stack_set(ra, Value::Boolean(v.is_falsy()));
                    }
                    OpCode::Len => {
                        let b = base + i.b() as usize;
                        let rb = self.stack_get(b);
                        self.save_state(ci);
                        let v = self.obj_len(rb, VarSite::Stack(b))?;
                        self.stack_set(ra, v);
                        trap = self.ci_trap(ci);
                    }
                    OpCode::Concat => {
                        let n = i.b() as usize;
                        self.set_top_raw(ra + n);
                        self.concat(n)?;
                        trap = self.ci_trap(ci);
                        self.check_gc()?;
                        trap = trap || self.ci_trap(ci);
                    }
                    OpCode::Close => {
                        self.save_state(ci);
                        self.close_level(ra, Some(LuaError::new(Status::Ok, Value::Nil)), true)?;
                        trap = self.ci_trap(ci);
                    }
                    OpCode::Tbc => self.new_tbc(ra)?,
                    OpCode::Jmp => {
                        pc = jump(pc, i.sj_arg());
                        trap = self.ci_trap(ci);
                    }
                    OpCode::Eq => {
                        let rb = self.stack_get(base + i.b() as usize);
                        let v = self.stack_get(ra);
                        self.save_state(ci);
                        let cond = self.equal_values(v, rb)?;
                        trap = self.ci_trap(ci);
                        pc = self.cond_jump(&proto, pc, cond, i.k());
                    }
                    OpCode::Lt | OpCode::Le => {
                        let rb = self.stack_get(base + i.b() as usize);
                        let v = self.stack_get(ra);
                        self.save_state(ci);
                        let cond = if op == OpCode::Lt {
                            self.less_than(v, rb)?
                        } else {
                            self.less_equal(v, rb)?
                        };
                        trap = self.ci_trap(ci);
                        pc = self.cond_jump(&proto, pc, cond, i.k());
                    }
                    OpCode::EqK => {
                        let rb = self.konst(pref, i.b());
                        let cond = self.heap.raw_equal(&self.stack_get(ra), &rb);
                        pc = self.cond_jump(&proto, pc, cond, i.k());
                    }
                    OpCode::EqI => {
                        let im = i.sb();
                        let cond = match self.stack_get(ra) {
                            Value::Integer(v) => v == i64::from(im),
                            Value::Float(f) => f == f64::from(im),
                            _ => false,
                        };
                        pc = self.cond_jump(&proto, pc, cond, i.k());
                    }
                    OpCode::LtI | OpCode::LeI | OpCode::GtI | OpCode::GeI => {
                        let im = i.sb();
                        let cond = match self.stack_get(ra) {
                            Value::Integer(v) => {
                                let im = i64::from(im);
                                match op {
                                    OpCode::LtI => v < im,
                                    OpCode::LeI => v <= im,
                                    OpCode::GtI => v > im,
                                    _ => v >= im,
                                }
                            }
                            Value::Float(f) => {
                                let im = f64::from(im);
                                match op {
                                    OpCode::LtI => f < im,
                                    OpCode::LeI => f <= im,
                                    OpCode::GtI => f > im,
                                    _ => f >= im,
                                }
                            }
                            v => {
                                let flip = matches!(op, OpCode::GtI | OpCode::GeI);
                                let event = if matches!(op, OpCode::LtI | OpCode::GtI) {
                                    TagMethod::Lt
                                } else {
                                    TagMethod::Le
                                };
                                self.save_state(ci);
                                let cond = self.call_order_i_tm(v, i64::from(im), flip, i.c() != 0, event)?;
                                trap = self.ci_trap(ci);
                                cond
                            }
                        };
                        pc = self.cond_jump(&proto, pc, cond, i.k());
                    }
                    OpCode::Test => {
                        let cond = self.stack_get(ra).is_truthy();
                        pc = self.cond_jump(&proto, pc, cond, i.k());
                    }
                    OpCode::TestSet => {
                        let rb = self.stack_get(base + i.b() as usize);
                        if rb.is_falsy() == i.k() {
                            pc += 1;
                        } else {
                            self.stack_set(ra, rb);
                            pc = jump(pc + 1, proto.code[pc].sj_arg());
                            trap = self.ci_trap(ci);
                        }
                    }
                    OpCode::Call => {
                        let b = i.b() as usize;
                        let nresults = i.c() as i32 - 1;
                        if b != 0 {
                            self.set_top_raw(ra + b);
                        }
                        match self.precall(ra, nresults)? {
                            None => trap = self.ci_trap(ci),
                            Some(new_ci) => {
                                ci = new_ci;
                                trap = self.thread().hook_mask != 0;
                                continue 'frame;
                            }
                        }
                    }
                    OpCode::TailCall => {
                        let mut b = i.b() as usize;
                        let nparams1 = i.c() as usize;
                        let delta = if nparams1 != 0 {
                            self.thread().call_infos[ci].n_extra_args + nparams1
                        } else {
                            0
                        };
                        if b != 0 {
                            self.set_top_raw(ra + b);
                        } else {
                            b = self.top() - ra;
                        }
                        if i.k() {
                            let th = self.heap.running;
                            self.heap.close_upvals(th, base);
                        }
                        match self.pretailcall(ci, ra, b, delta)? {
                            None => {
                                trap = self.thread().hook_mask != 0;
                                continue 'frame;
                            }
                            Some(n) => {
                                self.thread_mut().call_infos[ci].func -= delta;
                                self.poscall(ci, n)?;
                                trap = self.ci_trap(ci);
                                match self.after_return(ci) {
                                    Some(caller) => {
                                        ci = caller;
                                        continue 'frame;
                                    }
                                    None => return Ok(()),
                                }
                            }
                        }
                    }
                    OpCode::Return => {
                        let mut n = i.b() as i32 - 1;
                        let nparams1 = i.c() as usize;
                        if n < 0 {
                            n = (self.top() - ra) as i32;
                        }
                        let n = n as usize;
                        if i.k() {
                            self.thread_mut().call_infos[ci].n_res = n;
                            let ci_top = self.thread().call_infos[ci].top;
                            if self.top() < ci_top {
                                self.set_top_raw(ci_top);
                            }
                            self.close_level(base, None, true)?;
                            trap = self.ci_trap(ci);
                        }
                        if nparams1 != 0 {
                            let c = &mut self.thread_mut().call_infos[ci];
                            c.func -= c.n_extra_args + nparams1;
                        }
                        self.set_top_raw(ra + n);
                        self.poscall(ci, n)?;
                        trap = trap || self.ci_trap(ci);
                        match self.after_return(ci) {
                            Some(caller) => {
                                ci = caller;
                                continue 'frame;
                            }
                            None => return Ok(()),
                        }
                    }
                    OpCode::Return0 | OpCode::Return1 => {
                        let n = if op == OpCode::Return0 { 0 } else { 1 };
                        self.set_top_raw(ra + n);
                        self.poscall(ci, n)?;
                        if self.thread().hook_mask != 0 {
                            trap = true;
                        }
                        match self.after_return(ci) {
                            Some(caller) => {
                                ci = caller;
                                continue 'frame;
                            }
                            None => return Ok(()),
                        }
                    }
                    OpCode::ForLoop => {
                        let jumps = if let Value::Integer(step) = self.stack_get(ra + 2) {
                            let count = match self.stack_get(ra + 1) {
                                Value::Integer(c) => c as u64,
                                _ => 0,
                            };
                            if count > 0 {
                                let idx = match self.stack_get(ra) {
                                    Value::Integer(v) => v.wrapping_add(step),
                                    _ => step,
                                };
                                self.stack_set(ra + 1, Value::Integer((count - 1) as i64));
                                self.stack_set(ra, Value::Integer(idx));
                                self.stack_set(ra + 3, Value::Integer(idx));
                                true
                            } else {
                                false
                            }
                        } else {
                            self.float_for_loop(ra)
                        };
                        if jumps {
                            pc -= i.bx() as usize;
                        }
                        trap = self.ci_trap(ci);
                    }
                    OpCode::ForPrep => {
                        self.save_state(ci);
                        if self.for_prep(ra)? {
                            pc += i.bx() as usize + 1;
                        }
                    }
                    OpCode::TForPrep => {
                        self.new_tbc(ra + 3)?;
                        pc += i.bx() as usize;
                    }
                    OpCode::TForCall => {
                        {
                            let th = self.thread_mut();
                            th.stack.copy_within(ra..ra + 3, ra + 4);
                            th.top = ra + 4 + 3;
                        }
                        self.call_value(ra + 4, i.c() as i32)?;
                        trap = self.ci_trap(ci);
                        base = self.thread().call_infos[ci].func + 1;
                    }
                    OpCode::TForLoop => {
                        let control = self.stack_get(ra + 4);
                        if !control.is_nil() {
                            self.stack_set(ra + 2, control);
                            pc -= i.bx() as usize;
                        }
                    }
                    OpCode::SetList => {
                        let mut n = i.b() as usize;
                        let mut last = i.c() as usize;
                        let Value::Table(h) = self.stack_get(ra) else {
                            continue;
                        };
                        if n == 0 {
                            n = self.top() - ra - 1;
                        } else {
                            self.save_state(ci);
                        }
                        last += n;
                        if i.k() {
                            last += proto.code[pc].ax_arg() as usize * (MAXARG_C + 1);
                            pc += 1;
                        }
                        if last > self.heap.tables[h].array_size() {
                            let nhash = self.heap.tables[h].node_size();
                            self.heap.table_resize(h, last, nhash);
                        }
                        for j in (1..=n).rev() {
                            let v = self.stack_get(ra + j);
                            self.heap.table_set_int(h, last as i64, v);
                            last -= 1;
                        }
                    }
                    OpCode::Closure => {
                        self.push_closure(cl, i.bx() as usize, base, ra);
                        self.set_top_raw(ra + 1);
                        self.check_gc()?;
                        trap = self.ci_trap(ci);
                    }
                    OpCode::VarArg => {
                        let wanted = i.c() as i32 - 1;
                        self.save_state(ci);
                        self.get_varargs(ci, ra, wanted)?;
                        trap = self.ci_trap(ci);
                    }
                    OpCode::VarArgPrep => {
                        self.adjust_varargs(ci, i.a() as usize, &proto)?;
                        trap = self.ci_trap(ci);
                        if trap {
                            self.hook_call(ci)?;
                            // the next instruction counts as a new line
                            self.thread_mut().old_pc = 1;
                        }
                        base = self.thread().call_infos[ci].func + 1;
                    }
                    OpCode::ExtraArg => {}
                }
            }
        }
    }

    fn cond_jump(&self, p: &Prototype, pc: usize, cond: bool, k: bool) -> usize {
        if cond != k {
            pc + 1
        } else {
            jump(pc + 1, p.code[pc].sj_arg())
        }
    }

    /// Frame to continue after `ci` returned, or `None` when `ci` was entered
    /// from native code.
    fn after_return(&self, ci: usize) -> Option<usize> {
        if self.thread().call_infos[ci].callstatus.contains(CallStatus::FRESH) {
            None
        } else {
            Some(ci - 1)
        }
    }

    /// Moves the function and fixed parameters of vararg frame `ci` above
    /// its actual arguments, leaving the extra arguments below the frame.
    fn adjust_varargs(&mut self, ci: usize, nfixed: usize, p: &Prototype) -> LuaResult<()> {
        let func = self.thread().call_infos[ci].func;
        let actual = self.top() - func - 1;
        let nextra = actual - nfixed;
        self.thread_mut().call_infos[ci].n_extra_args = nextra;
        self.check_stack(p.max_stack_size as usize + 1)?;
        let th = self.thread_mut();
        let mut top = th.top;
        th.stack[top] = th.stack[func];
        top += 1;
        for j in 1..=nfixed {
            th.stack[top] = th.stack[func + j];
            th.stack[func + j] = Value::Nil;
            top += 1;
        }
        th.top = top;
        let c = &mut th.call_infos[ci];
        c.func += actual + 1;
        c.top += actual + 1;
        Ok(())
    }

    /// Copies `wanted` extra arguments of frame `ci` to `at` (all of them
    /// when `wanted` is negative).
    fn get_varargs(&mut self, ci: usize, at: usize, wanted: i32) -> LuaResult<()> {
        let nextra = self.thread().call_infos[ci].n_extra_args;
        let wanted = if wanted < 0 {
            self.check_stack_gc(nextra)?;
            self.set_top_raw(at + nextra);
            nextra
        } else {
            wanted as usize
        };
        let th = self.thread_mut();
        let func = th.call_infos[ci].func;
        for j in 0..wanted {
            th.stack[at + j] = if j < nextra {
                th.stack[func - nextra + j]
            } else {
                Value::Nil
            };
        }
        Ok(())
    }

    /// Completes the instruction of the running Lua frame that was
    /// interrupted by a yield inside a metamethod or a closing method.
    pub(crate) fn finish_op(&mut self) -> LuaResult<()> {
        let ci = self.ci();
        let Some(p) = self.frame_proto(ci) else {
            return Ok(());
        };
        let (base, saved_pc) = {
            let c = &self.thread().call_infos[ci];
            (c.func + 1, c.saved_pc)
        };
        let inst = p.code[saved_pc - 1];
        let Some(op) = inst.opcode() else {
            return Ok(());
        };
        match op {
            OpCode::MmBin | OpCode::MmBinI | OpCode::MmBinK => {
                let v = self.pop_value();
                let a = p.code[saved_pc - 2].a() as usize;
                self.stack_set(base + a, v);
            }
            OpCode::Unm
            | OpCode::BNot
            | OpCode::Len
            | OpCode::GetTabUp
            | OpCode::GetTable
            | OpCode::GetI
            | OpCode::GetField
            | OpCode::SelfOp => {
                let v = self.pop_value();
                self.stack_set(base + inst.a() as usize, v);
            }
            OpCode::Lt
            | OpCode::Le
            | OpCode::LtI
            | OpCode::LeI
            | OpCode::GtI
            | OpCode::GeI
            | OpCode::Eq => {
                let res = self.pop_value().is_truthy();
                if res != inst.k() {
                    // skip the jump
                    self.thread_mut().call_infos[ci].saved_pc += 1;
                }
            }
            OpCode::Concat => {
                let top = self.top() - 1;
                let first = base + inst.a() as usize;
                let total = top - 1 - first;
                let v = self.stack_get(top);
                self.stack_set(top - 2, v);
                self.set_top_raw(top - 1);
                self.concat(total)?;
            }
            OpCode::Close => {
                self.thread_mut().call_infos[ci].saved_pc -= 1;
            }
            OpCode::Return => {
                let ra = base + inst.a() as usize;
                let nres = self.thread().call_infos[ci].n_res;
                self.set_top_raw(ra + nres);
                self.thread_mut().call_infos[ci].saved_pc -= 1;
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arith_opcodes_map_to_operators() {
        assert_eq!(arith_op_of(OpCode::AddI), Some(ArithOp::Add));
        assert_eq!(arith_op_of(OpCode::ShlI), Some(ArithOp::Shl));
        assert_eq!(arith_op_of(OpCode::IDivK), Some(ArithOp::IDiv));
        assert_eq!(arith_op_of(OpCode::Move), None);
    }

    #[test]
    fn test_jump_offsets() {
        assert_eq!(jump(10, -3), 7);
        assert_eq!(jump(10, 4), 14);
    }
}
