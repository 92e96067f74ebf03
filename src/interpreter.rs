//! Reference executor for analyzed kernel functions
//!
//! Runs one work item at a time, in global-id order, with C's usual
//! arithmetic conversions: any floating operand makes the operation
//! floating, integer arithmetic wraps, and stores convert to the
//! destination's element type.

use std::collections::HashMap;

use crate::ast::{BinaryOp, Expr, Function, Place, Stmt, UnaryOp};
use crate::backend::{BufferHandle, KernelArg};
use crate::error::{DispatchError, DispatchResult};
use crate::types::{ElementType, Scalar};

/// Device memory as seen by a running kernel
pub trait Memory {
    fn load(&self, buffer: BufferHandle, index: i64) -> Result<Scalar, String>;

    fn store(&mut self, buffer: BufferHandle, index: i64, value: Scalar) -> Result<(), String>;
}

type ExecResult<T> = Result<T, String>;

/// Execute `function` over `global_size` work items
pub fn launch<M: Memory>(
    function: &Function,
    args: &[KernelArg],
    memory: &mut M,
    global_size: usize,
) -> DispatchResult<()> {
    if args.len() != function.params.len() {
        return Err(DispatchError::launch(format!(
            "kernel `{}` takes {} argument(s), {} bound",
            function.name,
            function.params.len(),
            args.len()
        )));
    }

    let mut pointers = HashMap::new();
    let mut values = HashMap::new();
    for (param, arg) in function.params.iter().zip(args) {
        match (param.pointer, *arg) {
            (true, KernelArg::Buffer(handle)) => {
                pointers.insert(param.name.as_str(), handle);
            }
            (false, KernelArg::Int(v)) => {
                values.insert(param.name.clone(), (param.ty, Scalar::Int(v).cast(param.ty)));
            }
            (false, KernelArg::Float(v)) => {
                values.insert(param.name.clone(), (param.ty, Scalar::Float(v).cast(param.ty)));
            }
            _ => {
                return Err(DispatchError::launch(format!(
                    "kernel `{}`: argument `{}` bound to {:?}, which does not match its declaration",
                    function.name, param.name, arg
                )));
            }
        }
    }

    log::trace!("Launching `{}` over {} work items", function.name, global_size);

    for global_id in 0..global_size {
        let mut item = WorkItem {
            memory: &mut *memory,
            pointers: &pointers,
            scopes: vec![values.clone()],
            global_id,
            global_size,
        };
        item.exec_block(&function.body).map_err(|message| {
            DispatchError::launch(format!(
                "kernel `{}`, work item {}: {}",
                function.name, global_id, message
            ))
        })?;
    }

    Ok(())
}

struct WorkItem<'a, M> {
    memory: &'a mut M,
    pointers: &'a HashMap<&'a str, BufferHandle>,
    scopes: Vec<HashMap<String, (ElementType, Scalar)>>,
    global_id: usize,
    global_size: usize,
}

impl<'a, M: Memory> WorkItem<'a, M> {
    fn exec_block(&mut self, statements: &[Stmt]) -> ExecResult<()> {
        statements.iter().try_for_each(|stmt| self.exec(stmt))
    }

    fn exec_scoped(&mut self, statements: &[Stmt]) -> ExecResult<()> {
        self.scopes.push(HashMap::new());
        let result = self.exec_block(statements);
        self.scopes.pop();
        result
    }

    fn exec(&mut self, stmt: &Stmt) -> ExecResult<()> {
        match stmt {
            Stmt::Declare { ty, name, init } => {
                let value = match init {
                    Some(expr) => self.eval(expr)?.cast(*ty),
                    None => Scalar::Int(0).cast(*ty),
                };
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone(), (*ty, value));
                }
                Ok(())
            }

            Stmt::Assign { target, op, value } => {
                let rhs = self.eval(value)?;
                match target {
                    Place::Local(name) => {
                        let (ty, current) = self.local(name)?;
                        let next = match op.binary() {
                            Some(bin) => apply(bin, current, rhs)?,
                            None => rhs,
                        };
                        self.set_local(name, next.cast(ty))
                    }
                    Place::Element { base, index } => {
                        let buffer = self.pointer(base)?;
                        let index = self.eval_index(index)?;
                        let next = match op.binary() {
                            Some(bin) => apply(bin, self.memory.load(buffer, index)?, rhs)?,
                            None => rhs,
                        };
                        self.memory.store(buffer, index, next)
                    }
                }
            }

            Stmt::For { init, cond, step, body } => {
                self.scopes.push(HashMap::new());
                let result = self.exec_for(init, cond, step, body);
                self.scopes.pop();
                result
            }

            Stmt::If { cond, then_branch, else_branch } => {
                if truthy(self.eval(cond)?) {
                    self.exec_scoped(then_branch)
                } else {
                    self.exec_scoped(else_branch)
                }
            }

            Stmt::Block(statements) => self.exec_scoped(statements),
        }
    }

    fn exec_for(&mut self, init: &Stmt, cond: &Expr, step: &Stmt, body: &[Stmt]) -> ExecResult<()> {
        self.exec(init)?;
        while truthy(self.eval(cond)?) {
            self.exec_scoped(body)?;
            self.exec(step)?;
        }
        Ok(())
    }

    fn local(&self, name: &str) -> ExecResult<(ElementType, Scalar)> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
            .ok_or_else(|| format!("`{}` is not a value", name))
    }

    fn set_local(&mut self, name: &str, value: Scalar) -> ExecResult<()> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                slot.1 = value;
                return Ok(());
            }
        }
        Err(format!("`{}` is not a value", name))
    }

    fn pointer(&self, name: &str) -> ExecResult<BufferHandle> {
        self.pointers
            .get(name)
            .copied()
            .ok_or_else(|| format!("`{}` is not a buffer", name))
    }

    fn eval_index(&mut self, index: &Expr) -> ExecResult<i64> {
        match self.eval(index)? {
            Scalar::Int(i) => Ok(i64::from(i)),
            Scalar::Float(_) => Err("array subscript is not an integer".to_string()),
        }
    }

    fn eval(&mut self, expr: &Expr) -> ExecResult<Scalar> {
        match expr {
            Expr::Int(v) => Ok(Scalar::Int(*v)),
            Expr::Float(v) => Ok(Scalar::Float(*v)),
            Expr::Ident(name) => Ok(self.local(name)?.1),

            Expr::Index { base, index } => {
                let buffer = self.pointer(base)?;
                let index = self.eval_index(index)?;
                self.memory.load(buffer, index)
            }

            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                Ok(match (op, value) {
                    (UnaryOp::Neg, Scalar::Int(v)) => Scalar::Int(v.wrapping_neg()),
                    (UnaryOp::Neg, Scalar::Float(v)) => Scalar::Float(-v),
                    (UnaryOp::Not, v) => Scalar::Int(i32::from(!truthy(v))),
                })
            }

            Expr::Binary { op: BinaryOp::LogicalAnd, lhs, rhs } => {
                let result = truthy(self.eval(lhs)?) && truthy(self.eval(rhs)?);
                Ok(Scalar::Int(i32::from(result)))
            }

            Expr::Binary { op: BinaryOp::LogicalOr, lhs, rhs } => {
                let result = truthy(self.eval(lhs)?) || truthy(self.eval(rhs)?);
                Ok(Scalar::Int(i32::from(result)))
            }

            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                apply(*op, lhs, rhs)
            }

            Expr::Ternary { cond, then_value, else_value } => {
                if truthy(self.eval(cond)?) {
                    self.eval(then_value)
                } else {
                    self.eval(else_value)
                }
            }

            Expr::Cast { ty, expr } => Ok(self.eval(expr)?.cast(*ty)),

            Expr::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(name, &values)
            }
        }
    }

    fn call(&self, name: &str, args: &[Scalar]) -> ExecResult<Scalar> {
        let float = |i: usize| args.get(i).map_or(0.0, Scalar::as_f32);

        let value = match (name, args) {
            ("get_global_id", [dim]) => {
                Scalar::Int(if dim.as_i32() == 0 { self.global_id as i32 } else { 0 })
            }
            ("get_global_size", [dim]) => {
                Scalar::Int(if dim.as_i32() == 0 { self.global_size as i32 } else { 1 })
            }
            ("sqrt", [_]) => Scalar::Float(float(0).sqrt()),
            ("log", [_]) => Scalar::Float(float(0).ln()),
            ("exp", [_]) => Scalar::Float(float(0).exp()),
            ("sin", [_]) => Scalar::Float(float(0).sin()),
            ("cos", [_]) => Scalar::Float(float(0).cos()),
            ("floor", [_]) => Scalar::Float(float(0).floor()),
            ("fabs", [_]) => Scalar::Float(float(0).abs()),
            ("abs", [Scalar::Int(v)]) => Scalar::Int(v.wrapping_abs()),
            ("abs", [Scalar::Float(v)]) => Scalar::Float(v.abs()),
            ("min", [Scalar::Int(a), Scalar::Int(b)]) => Scalar::Int(*a.min(b)),
            ("max", [Scalar::Int(a), Scalar::Int(b)]) => Scalar::Int(*a.max(b)),
            ("min", [_, _]) | ("fmin", [_, _]) => Scalar::Float(float(0).min(float(1))),
            ("max", [_, _]) | ("fmax", [_, _]) => Scalar::Float(float(0).max(float(1))),
            ("mix", [_, _, _]) => Scalar::Float(float(0) + (float(1) - float(0)) * float(2)),
            _ => return Err(format!("no builtin `{}` taking {} argument(s)", name, args.len())),
        };

        Ok(value)
    }
}

fn truthy(value: Scalar) -> bool {
    match value {
        Scalar::Int(v) => v != 0,
        Scalar::Float(v) => v != 0.0,
    }
}

/// Apply a (non short-circuiting) binary operator with C conversions
fn apply(op: BinaryOp, lhs: Scalar, rhs: Scalar) -> ExecResult<Scalar> {
    use BinaryOp::*;

    let floating = lhs.element_type().promote(rhs.element_type()) == ElementType::Floating;

    let value = match op {
        Add | Sub | Mul | Div if floating => {
            let (a, b) = (lhs.as_f32(), rhs.as_f32());
            Scalar::Float(match op {
                Add => a + b,
                Sub => a - b,
                Mul => a * b,
                _ => a / b,
            })
        }
        Add => Scalar::Int(lhs.as_i32().wrapping_add(rhs.as_i32())),
        Sub => Scalar::Int(lhs.as_i32().wrapping_sub(rhs.as_i32())),
        Mul => Scalar::Int(lhs.as_i32().wrapping_mul(rhs.as_i32())),
        Div | Rem => {
            if floating {
                return Err(format!("invalid operands to binary {}", op.symbol()));
            }
            let (a, b) = (lhs.as_i32(), rhs.as_i32());
            if b == 0 {
                return Err("integer division by zero".to_string());
            }
            Scalar::Int(if op == Div { a.wrapping_div(b) } else { a.wrapping_rem(b) })
        }
        Lt | Gt | Le | Ge | Eq | Ne => {
            let result = if floating {
                compare(op, lhs.as_f32(), rhs.as_f32())
            } else {
                compare(op, lhs.as_i32(), rhs.as_i32())
            };
            Scalar::Int(i32::from(result))
        }
        LogicalAnd => Scalar::Int(i32::from(truthy(lhs) && truthy(rhs))),
        LogicalOr => Scalar::Int(i32::from(truthy(lhs) || truthy(rhs))),
        BitAnd | BitOr | Shl | Shr => {
            let (Scalar::Int(a), Scalar::Int(b)) = (lhs, rhs) else {
                return Err(format!("invalid operands to binary {}", op.symbol()));
            };
            Scalar::Int(match op {
                BitAnd => a & b,
                BitOr => a | b,
                Shl => a.wrapping_shl(b as u32),
                _ => a.wrapping_shr(b as u32),
            })
        }
    };

    Ok(value)
}

fn compare<T: PartialOrd>(op: BinaryOp, a: T, b: T) -> bool {
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Gt => a > b,
        BinaryOp::Le => a <= b,
        BinaryOp::Ge => a >= b,
        BinaryOp::Eq => a == b,
        _ => a != b,
    }
}
