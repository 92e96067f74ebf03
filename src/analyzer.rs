//! Semantic checks for parsed kernel source
//!
//! Resolves every identifier against its scope and rejects programs a C
//! compiler would reject: redefinitions in one scope, undeclared names,
//! pointers used as values, unknown builtins and duplicate kernels.

use std::collections::{HashMap, HashSet};

use crate::ast::{Expr, Function, Module, Place, Stmt};
use crate::error::{DispatchError, DispatchResult};
use crate::types::ElementType;

/// Arity of the builtin functions kernels may call
pub fn builtin_arity(name: &str) -> Option<usize> {
    match name {
        "get_global_id" | "get_global_size" => Some(1),
        "sqrt" | "log" | "exp" | "sin" | "cos" | "fabs" | "abs" | "floor" => Some(1),
        "min" | "max" | "fmin" | "fmax" => Some(2),
        "mix" => Some(3),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Symbol {
    Pointer(ElementType),
    Value(ElementType),
}

/// Scope-aware checker for one module
pub struct Analyzer {
    scopes: Vec<HashMap<String, Symbol>>,
    function: String,
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            scopes: Vec::new(),
            function: String::new(),
        }
    }

    /// Check every function in the module
    pub fn analyze(&mut self, module: &Module) -> DispatchResult<()> {
        let mut seen = HashSet::new();

        for function in &module.functions {
            if !seen.insert(function.name.as_str()) {
                return Err(DispatchError::compile(format!(
                    "redefinition of kernel `{}`",
                    function.name
                )));
            }
            self.analyze_function(function)?;
        }

        Ok(())
    }

    fn analyze_function(&mut self, function: &Function) -> DispatchResult<()> {
        self.function = function.name.clone();
        self.scopes.clear();
        self.scopes.push(HashMap::new());

        for param in &function.params {
            let symbol = if param.pointer {
                Symbol::Pointer(param.ty)
            } else {
                Symbol::Value(param.ty)
            };
            self.declare(&param.name, symbol)?;
        }

        // The body shares the parameters' scope, as in C
        for stmt in &function.body {
            self.analyze_stmt(stmt)?;
        }

        self.scopes.clear();
        Ok(())
    }

    fn error(&self, message: impl std::fmt::Display) -> DispatchError {
        DispatchError::compile(format!("in kernel `{}`: {}", self.function, message))
    }

    fn declare(&mut self, name: &str, symbol: Symbol) -> DispatchResult<()> {
        let redefined = self
            .scopes
            .last()
            .map_or(false, |scope| scope.contains_key(name));
        if redefined {
            return Err(self.error(format_args!("redefinition of `{}`", name)));
        }

        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), symbol);
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> DispatchResult<Symbol> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
            .ok_or_else(|| self.error(format_args!("use of undeclared identifier `{}`", name)))
    }

    fn analyze_scoped(&mut self, statements: &[Stmt]) -> DispatchResult<()> {
        self.scopes.push(HashMap::new());
        let result = statements.iter().try_for_each(|stmt| self.analyze_stmt(stmt));
        self.scopes.pop();
        result
    }

    fn analyze_stmt(&mut self, stmt: &Stmt) -> DispatchResult<()> {
        match stmt {
            Stmt::Declare { ty, name, init } => {
                if let Some(init) = init {
                    self.analyze_expr(init)?;
                }
                self.declare(name, Symbol::Value(*ty))
            }

            Stmt::Assign { target, value, .. } => {
                match target {
                    Place::Local(name) => {
                        if let Symbol::Pointer(_) = self.lookup(name)? {
                            return Err(self.error(format_args!("cannot assign to pointer `{}`", name)));
                        }
                    }
                    Place::Element { base, index } => {
                        self.expect_pointer(base)?;
                        self.analyze_expr(index)?;
                    }
                }
                self.analyze_expr(value)
            }

            Stmt::For { init, cond, step, body } => {
                self.scopes.push(HashMap::new());
                let result = self
                    .analyze_stmt(init)
                    .and_then(|_| self.analyze_expr(cond))
                    .and_then(|_| self.analyze_stmt(step))
                    .and_then(|_| self.analyze_scoped(body));
                self.scopes.pop();
                result
            }

            Stmt::If { cond, then_branch, else_branch } => {
                self.analyze_expr(cond)?;
                self.analyze_scoped(then_branch)?;
                self.analyze_scoped(else_branch)
            }

            Stmt::Block(statements) => self.analyze_scoped(statements),
        }
    }

    fn expect_pointer(&self, name: &str) -> DispatchResult<()> {
        match self.lookup(name)? {
            Symbol::Pointer(_) => Ok(()),
            Symbol::Value(_) => Err(self.error(format_args!("subscripted value `{}` is not a pointer", name))),
        }
    }

    fn analyze_expr(&self, expr: &Expr) -> DispatchResult<()> {
        match expr {
            Expr::Int(_) | Expr::Float(_) => Ok(()),

            Expr::Ident(name) => match self.lookup(name)? {
                Symbol::Value(_) => Ok(()),
                Symbol::Pointer(_) => Err(self.error(format_args!("pointer `{}` used as a value", name))),
            },

            Expr::Index { base, index } => {
                self.expect_pointer(base)?;
                self.analyze_expr(index)
            }

            Expr::Unary { operand, .. } => self.analyze_expr(operand),

            Expr::Binary { lhs, rhs, .. } => {
                self.analyze_expr(lhs)?;
                self.analyze_expr(rhs)
            }

            Expr::Ternary { cond, then_value, else_value } => {
                self.analyze_expr(cond)?;
                self.analyze_expr(then_value)?;
                self.analyze_expr(else_value)
            }

            Expr::Cast { expr, .. } => self.analyze_expr(expr),

            Expr::Call { name, args } => {
                let arity = builtin_arity(name)
                    .ok_or_else(|| self.error(format_args!("call to unknown function `{}`", name)))?;
                if args.len() != arity {
                    return Err(self.error(format_args!(
                        "`{}` takes {} argument(s), {} given",
                        name,
                        arity,
                        args.len()
                    )));
                }
                args.iter().try_for_each(|arg| self.analyze_expr(arg))
            }
        }
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}
