//! Stack-machine instruction traces.
//!
//! A [`Closure`] is the compiled form of an anonymous predicate: a declared
//! parameter list plus the flat, resolved instruction sequence its body
//! reduces to. Traces can be loaded from a disassembler's JSON output or
//! produced in-process with [`Closure::compile`].

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::ast::*;
use crate::error::{DecompileFailure, SelectError, SelectResult};
use crate::parser;

/// Instruction opcodes understood by the decompiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    // Entry no-ops, stripped before decompiling
    Nop,
    Resume,
    Cache,
    Precall,
    PushNull,
    ExtendedArg,
    CopyFreeVars,
    MakeCell,

    // Loads
    LoadConst,
    LoadFast,
    LoadGlobal,
    LoadName,
    LoadDeref,
    LoadAttr,
    LoadMethod,

    // Operators
    BinaryOp,
    BinaryAdd,
    BinarySubtract,
    BinaryMultiply,
    BinaryTrueDivide,
    BinaryFloorDivide,
    BinaryModulo,
    BinaryPower,
    BinaryLshift,
    BinaryRshift,
    BinaryAnd,
    BinaryOr,
    BinaryXor,
    CompareOp,
    IsOp,
    ContainsOp,
    UnaryNot,
    UnaryNegative,
    UnaryPositive,
    UnaryInvert,

    // Calls and containers
    Call,
    CallFunction,
    CallMethod,
    BinarySubscr,
    BuildList,
    BuildTuple,
    ListExtend,

    // Stack and control flow
    #[serde(rename = "COPY")]
    CopyTop,
    DupTop,
    PopJumpIfFalse,
    PopJumpIfTrue,
    PopJumpForwardIfFalse,
    PopJumpForwardIfTrue,
    PopTop,
    ReturnValue,
    ReturnConst,
}

impl Opcode {
    /// Opcodes with no effect on the value stack of a predicate body.
    pub fn is_entry_noop(self) -> bool {
        matches!(
            self,
            Opcode::Nop
                | Opcode::Resume
                | Opcode::Cache
                | Opcode::Precall
                | Opcode::PushNull
                | Opcode::ExtendedArg
                | Opcode::CopyFreeVars
                | Opcode::MakeCell
        )
    }

    /// Conditional branches that pop their operand.
    pub fn branch_polarity(self) -> Option<BoolOp> {
        match self {
            Opcode::PopJumpIfFalse | Opcode::PopJumpForwardIfFalse => Some(BoolOp::And),
            Opcode::PopJumpIfTrue | Opcode::PopJumpForwardIfTrue => Some(BoolOp::Or),
            _ => None,
        }
    }

    /// Fixed spelling of the legacy one-opcode-per-operator binary ops.
    pub fn binary_symbol(self) -> Option<&'static str> {
        Some(match self {
            Opcode::BinaryAdd => "+",
            Opcode::BinarySubtract => "-",
            Opcode::BinaryMultiply => "*",
            Opcode::BinaryTrueDivide => "/",
            Opcode::BinaryFloorDivide => "//",
            Opcode::BinaryModulo => "%",
            Opcode::BinaryPower => "**",
            Opcode::BinaryLshift => "<<",
            Opcode::BinaryRshift => ">>",
            Opcode::BinaryAnd => "&",
            Opcode::BinaryOr => "|",
            Opcode::BinaryXor => "^",
            _ => return None,
        })
    }

    pub fn name(self) -> String {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{:?}", self))
    }
}

/// One resolved instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub opname: Opcode,
    pub offset: u32,
    #[serde(default)]
    pub arg: Option<u32>,
    /// Resolved operand: constant value, name, or jump-target offset.
    #[serde(default)]
    pub argval: Json,
    #[serde(default)]
    pub argrepr: String,
}

impl Instruction {
    pub fn new(opname: Opcode, offset: u32, arg: Option<u32>, argval: Json) -> Self {
        let argrepr = match &argval {
            Json::String(s) => s.clone(),
            Json::Null => String::new(),
            other => other.to_string(),
        };
        Self {
            opname,
            offset,
            arg,
            argval,
            argrepr,
        }
    }
}

/// A compiled anonymous predicate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Closure {
    /// Declared parameter names. Predicates must declare none.
    #[serde(default)]
    pub params: Vec<String>,
    pub instructions: Vec<Instruction>,
}

impl Closure {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            params: Vec::new(),
            instructions,
        }
    }

    /// Load a closure from its JSON form.
    ///
    /// Accepts either `{"params": [...], "instructions": [...]}` or a bare
    /// array of instructions.
    pub fn from_json(text: &str) -> SelectResult<Self> {
        let json: Json = serde_json::from_str(text)
            .map_err(|e| SelectError::syntax(text, format!("invalid trace JSON: {}", e)))?;
        let parsed = if json.is_array() {
            serde_json::from_value::<Vec<Instruction>>(json).map(Closure::new)
        } else {
            serde_json::from_value::<Closure>(json)
        };
        parsed.map_err(|e| SelectError::unsupported("instruction trace", e.to_string()))
    }

    /// Lower a zero-argument lambda (or a bare body) to its instruction trace.
    pub fn compile(text: &str) -> SelectResult<Self> {
        let (params, body) = match parser::parse(text)? {
            Expr::Lambda { args, body } => {
                let mut params: Vec<String> = args.params.into_iter().map(|p| p.name).collect();
                params.extend(args.vararg);
                params.extend(args.kwarg);
                (params, *body)
            }
            body => (Vec::new(), body),
        };

        let mut lowering = Lowering::default();
        lowering.emit(Opcode::Resume, Some(0), Json::from(0));
        lowering.lower(&body)?;
        lowering.emit(Opcode::ReturnValue, None, Json::Null);
        Ok(Self {
            params,
            instructions: lowering.code,
        })
    }
}

fn literal_json(lit: &Literal) -> Json {
    match lit {
        Literal::None => Json::Null,
        Literal::Bool(b) => Json::Bool(*b),
        Literal::Int(n) => Json::from(*n),
        Literal::Float(x) => Json::from(*x),
        Literal::Str(s) => Json::String(s.clone()),
    }
}

fn constant_items(items: &[Expr]) -> Option<Vec<Json>> {
    items
        .iter()
        .map(|item| match item {
            Expr::Literal(lit) => Some(literal_json(lit)),
            _ => None,
        })
        .collect()
}

/// Emits the instruction shapes the decompiler recognizes.
#[derive(Default)]
struct Lowering {
    code: Vec<Instruction>,
    offset: u32,
}

impl Lowering {
    fn emit(&mut self, opname: Opcode, arg: Option<u32>, argval: Json) -> usize {
        self.code
            .push(Instruction::new(opname, self.offset, arg, argval));
        self.offset += 2;
        self.code.len() - 1
    }

    fn emit_repr(&mut self, opname: Opcode, arg: Option<u32>, argval: Json, argrepr: &str) {
        let idx = self.emit(opname, arg, argval);
        self.code[idx].argrepr = argrepr.to_string();
    }

    fn count(n: usize) -> Option<u32> {
        u32::try_from(n).ok()
    }

    fn lower(&mut self, expr: &Expr) -> SelectResult<()> {
        match expr {
            Expr::Literal(lit) => {
                self.emit_repr(Opcode::LoadConst, None, literal_json(lit), &lit.to_string());
            }
            Expr::Name(name) => {
                self.emit(Opcode::LoadGlobal, None, Json::String(name.clone()));
            }
            Expr::Attribute { value, attr } => {
                self.lower(value)?;
                self.emit(Opcode::LoadAttr, None, Json::String(attr.clone()));
            }
            Expr::BinOp { left, op, right } => {
                self.lower(left)?;
                self.lower(right)?;
                self.emit_repr(Opcode::BinaryOp, None, Json::Null, op.symbol());
            }
            Expr::UnaryOp { op, operand } => {
                self.lower(operand)?;
                let opname = match op {
                    UnaryOp::Not => Opcode::UnaryNot,
                    UnaryOp::Neg => Opcode::UnaryNegative,
                    UnaryOp::Pos => Opcode::UnaryPositive,
                    UnaryOp::Invert => Opcode::UnaryInvert,
                };
                self.emit(opname, None, Json::Null);
            }
            Expr::Compare {
                left,
                ops,
                comparators,
            } => {
                if ops.len() != 1 {
                    return Err(SelectError::unsupported(
                        expr.to_string(),
                        "chained comparisons cannot be lowered",
                    ));
                }
                self.lower(left)?;
                self.lower(&comparators[0])?;
                match ops[0] {
                    CmpOp::Is => self.emit_repr(Opcode::IsOp, Some(0), Json::from(0), "is"),
                    CmpOp::IsNot => {
                        self.emit_repr(Opcode::IsOp, Some(1), Json::from(1), "is not")
                    }
                    CmpOp::In => self.emit_repr(Opcode::ContainsOp, Some(0), Json::from(0), "in"),
                    CmpOp::NotIn => {
                        self.emit_repr(Opcode::ContainsOp, Some(1), Json::from(1), "not in")
                    }
                    op => {
                        self.emit(Opcode::CompareOp, None, Json::String(op.symbol().to_string()));
                    }
                }
            }
            Expr::BoolOp { op, values } => {
                let branch = match op {
                    BoolOp::And => Opcode::PopJumpIfFalse,
                    BoolOp::Or => Opcode::PopJumpIfTrue,
                };
                let mut pending = Vec::new();
                for (i, value) in values.iter().enumerate() {
                    self.lower(value)?;
                    if i + 1 < values.len() {
                        self.emit(Opcode::CopyTop, Some(1), Json::from(1));
                        pending.push(self.emit(branch, None, Json::Null));
                        self.emit(Opcode::PopTop, None, Json::Null);
                    }
                }
                let end = self.offset;
                for idx in pending {
                    self.code[idx].argval = Json::from(end);
                    self.code[idx].argrepr = format!("to {}", end);
                }
            }
            Expr::Call {
                func,
                args,
                keywords,
            } => {
                if !keywords.is_empty() || args.iter().any(|a| matches!(a, Expr::Starred(_))) {
                    return Err(SelectError::unsupported(
                        expr.to_string(),
                        "keyword and spread arguments cannot be lowered",
                    ));
                }
                self.lower(func)?;
                for arg in args {
                    self.lower(arg)?;
                }
                let n = Self::count(args.len());
                self.emit(Opcode::Call, n, n.map(Json::from).unwrap_or_default());
            }
            Expr::Subscript { value, slice } => {
                if matches!(slice.as_ref(), Expr::Slice { .. }) {
                    return Err(SelectError::unsupported(
                        expr.to_string(),
                        "slices cannot be lowered",
                    ));
                }
                self.lower(value)?;
                self.lower(slice)?;
                self.emit(Opcode::BinarySubscr, None, Json::Null);
            }
            Expr::List(items) => match constant_items(items) {
                Some(constants) if constants.len() >= 3 => {
                    self.emit(Opcode::BuildList, Some(0), Json::from(0));
                    self.emit_repr(
                        Opcode::LoadConst,
                        None,
                        Json::Array(constants),
                        &Expr::Tuple(items.clone()).to_string(),
                    );
                    self.emit(Opcode::ListExtend, Some(1), Json::from(1));
                }
                _ => {
                    for item in items {
                        self.lower(item)?;
                    }
                    let n = Self::count(items.len());
                    self.emit(Opcode::BuildList, n, n.map(Json::from).unwrap_or_default());
                }
            },
            Expr::Tuple(items) => match constant_items(items) {
                Some(constants) => {
                    self.emit_repr(Opcode::LoadConst, None, Json::Array(constants), &expr.to_string());
                }
                None => {
                    for item in items {
                        self.lower(item)?;
                    }
                    let n = Self::count(items.len());
                    self.emit(Opcode::BuildTuple, n, n.map(Json::from).unwrap_or_default());
                }
            },
            Expr::Lambda { args, .. } if !args.is_empty() => {
                return Err(SelectError::decompile(
                    DecompileFailure::Parameterized,
                    expr.to_string(),
                ));
            }
            Expr::Lambda { .. }
            | Expr::IfExp { .. }
            | Expr::Starred(_)
            | Expr::Slice { .. }
            | Expr::ListComp { .. }
            | Expr::GeneratorExp { .. }
            | Expr::Opaque(_) => {
                return Err(SelectError::unsupported(
                    expr.to_string(),
                    format!("{} cannot be lowered to an instruction trace", expr.kind()),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn opnames(closure: &Closure) -> Vec<Opcode> {
        closure.instructions.iter().map(|i| i.opname).collect()
    }

    #[test]
    fn test_compile_comparison() {
        let closure = Closure::compile("lambda: person.gender == 1").unwrap();
        assert!(closure.params.is_empty());
        assert_eq!(
            opnames(&closure),
            vec![
                Opcode::Resume,
                Opcode::LoadGlobal,
                Opcode::LoadAttr,
                Opcode::LoadConst,
                Opcode::CompareOp,
                Opcode::ReturnValue,
            ]
        );
        assert_eq!(closure.instructions[4].argval, Json::from("=="));
    }

    #[test]
    fn test_compile_short_circuit_targets() {
        let closure = Closure::compile("a and b").unwrap();
        assert_eq!(
            opnames(&closure),
            vec![
                Opcode::Resume,
                Opcode::LoadGlobal,
                Opcode::CopyTop,
                Opcode::PopJumpIfFalse,
                Opcode::PopTop,
                Opcode::LoadGlobal,
                Opcode::ReturnValue,
            ]
        );
        // the branch lands on the return
        assert_eq!(closure.instructions[3].argval, Json::from(12));
        assert_eq!(closure.instructions[6].offset, 12);
    }

    #[test]
    fn test_compile_constant_list() {
        let closure = Closure::compile("x in [1, 2, 3]").unwrap();
        assert!(opnames(&closure).contains(&Opcode::ListExtend));
    }

    #[test]
    fn test_compile_records_params() {
        let closure = Closure::compile("lambda x, *rest: x").unwrap();
        assert_eq!(closure.params, vec!["x".to_string(), "rest".to_string()]);
    }

    #[test]
    fn test_compile_rejects_comprehensions() {
        let err = Closure::compile("[x for x in y]").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_from_json() {
        let closure = Closure::from_json(
            r#"[
                {"opname": "RESUME", "offset": 0, "arg": 0, "argval": 0},
                {"opname": "LOAD_GLOBAL", "offset": 2, "arg": 1, "argval": "person", "argrepr": "person"},
                {"opname": "LOAD_ATTR", "offset": 4, "arg": 2, "argval": "gender"},
                {"opname": "RETURN_VALUE", "offset": 6}
            ]"#,
        )
        .unwrap();
        assert_eq!(closure.instructions.len(), 4);
        assert_eq!(closure.instructions[1].opname, Opcode::LoadGlobal);

        let err = Closure::from_json(r#"[{"opname": "FOR_ITER", "offset": 0}]"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_opcode_name() {
        assert_eq!(Opcode::CopyTop.name(), "COPY");
        assert_eq!(Opcode::BinarySubscr.name(), "BINARY_SUBSCR");
    }
}
