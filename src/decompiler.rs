//! Stack-machine decompiler.
//!
//! Recovers source text for a zero-argument [`Closure`] by walking its
//! instruction trace with an explicit value stack. Short-circuit booleans are
//! recognized from the `COPY 1; POP_JUMP_IF_*; POP_TOP` shape: the branch
//! target bounds the right operand, which is decompiled recursively as a
//! sub-range before the walk resumes at the target.

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::ast::{BoolOp, Literal};
use crate::bytecode::{Closure, Instruction, Opcode};
use crate::error::{DecompileFailure, SelectError, SelectResult};

/// Decompile a closure back to expression text.
pub fn decompile(closure: &Closure) -> SelectResult<String> {
    if !closure.params.is_empty() {
        return Err(SelectError::decompile(
            DecompileFailure::Parameterized,
            format!("lambda {}: ...", closure.params.join(", ")),
        ));
    }

    let mut code: Vec<&Instruction> = Vec::with_capacity(closure.instructions.len());
    let mut targets = HashMap::new();
    for ins in &closure.instructions {
        // a stripped instruction resolves to the next kept one
        targets.insert(ins.offset, code.len());
        if !ins.opname.is_entry_noop() {
            code.push(ins);
        }
    }
    let last_offset = closure.instructions.iter().map(|ins| ins.offset).max();

    tracing::trace!(instructions = code.len(), "decompiling closure");
    let walker = Walker {
        code,
        targets,
        last_offset,
    };
    walker.walk(0, walker.code.len())
}

struct Walker<'a> {
    code: Vec<&'a Instruction>,
    /// offset -> index into `code`
    targets: HashMap<u32, usize>,
    last_offset: Option<u32>,
}

impl Walker<'_> {
    /// Walk `code[start..end]` and return the single value it leaves.
    fn walk(&self, start: usize, end: usize) -> SelectResult<String> {
        let mut stack: Vec<String> = Vec::new();
        let mut i = start;

        while i < end {
            let ins = self.code[i];
            match ins.opname {
                Opcode::LoadConst => stack.push(constant_text(&ins.argval)?),
                Opcode::LoadFast | Opcode::LoadGlobal | Opcode::LoadName | Opcode::LoadDeref => {
                    stack.push(name_text(ins).to_string())
                }
                Opcode::LoadAttr | Opcode::LoadMethod => {
                    let object = pop(&mut stack, ins)?;
                    stack.push(format!("{}.{}", object, name_text(ins)));
                }
                Opcode::BinaryOp => {
                    let symbol = ins.argrepr.trim();
                    if crate::ast::BinaryOp::from_symbol(symbol).is_none() {
                        return Err(SelectError::unsupported(
                            symbol,
                            "unknown binary operator",
                        ));
                    }
                    binary(&mut stack, ins, symbol)?;
                }
                Opcode::CompareOp => {
                    let symbol = compare_symbol(ins);
                    if crate::ast::CmpOp::from_symbol(&symbol).is_none() {
                        return Err(SelectError::unsupported(symbol, "unknown comparison"));
                    }
                    binary(&mut stack, ins, &symbol)?;
                }
                Opcode::IsOp => {
                    let symbol = if inverted(ins) { "is not" } else { "is" };
                    binary(&mut stack, ins, symbol)?;
                }
                Opcode::ContainsOp => {
                    let symbol = if inverted(ins) { "not in" } else { "in" };
                    binary(&mut stack, ins, symbol)?;
                }
                Opcode::UnaryNot => {
                    let operand = pop(&mut stack, ins)?;
                    stack.push(format!("(not {})", operand));
                }
                Opcode::UnaryNegative | Opcode::UnaryPositive | Opcode::UnaryInvert => {
                    let operand = pop(&mut stack, ins)?;
                    let sign = match ins.opname {
                        Opcode::UnaryNegative => "-",
                        Opcode::UnaryPositive => "+",
                        _ => "~",
                    };
                    stack.push(format!("({}{})", sign, operand));
                }
                Opcode::Call | Opcode::CallFunction | Opcode::CallMethod => {
                    let args = pop_n(&mut stack, ins, count(ins))?;
                    let callee = pop(&mut stack, ins)?;
                    stack.push(format!("{}({})", callee, args.join(", ")));
                }
                Opcode::BinarySubscr => {
                    let index = pop(&mut stack, ins)?;
                    let object = pop(&mut stack, ins)?;
                    stack.push(format!("{}[{}]", object, index));
                }
                Opcode::BuildList => {
                    let items = pop_n(&mut stack, ins, count(ins))?;
                    stack.push(format!("[{}]", items.join(", ")));
                }
                Opcode::BuildTuple => {
                    let items = pop_n(&mut stack, ins, count(ins))?;
                    stack.push(tuple_text(&items));
                }
                Opcode::ListExtend => {
                    let iterable = pop(&mut stack, ins)?;
                    let list = pop(&mut stack, ins)?;
                    stack.push(extend_list(&list, &iterable));
                }
                Opcode::CopyTop | Opcode::DupTop => {
                    let branch = self.code.get(i + 1).filter(|_| i + 1 < end);
                    let Some(branch) = branch else {
                        return Err(unrecognized(ins));
                    };
                    let Some(op) = branch.opname.branch_polarity() else {
                        return Err(unrecognized(ins));
                    };
                    let left = pop(&mut stack, ins)?;
                    let target = self.target(branch, i + 1)?;

                    let mut right_start = i + 2;
                    if self
                        .code
                        .get(right_start)
                        .is_some_and(|ins| ins.opname == Opcode::PopTop)
                    {
                        right_start += 1;
                    }
                    let right_end = target.min(end);
                    tracing::trace!(
                        op = op.keyword(),
                        from = right_start,
                        to = right_end,
                        "short-circuit operand"
                    );
                    let right = self.walk(right_start, right_end)?;
                    stack.push(format!("({} {} {})", left, op.keyword(), right));

                    i = right_end;
                    continue;
                }
                Opcode::PopJumpIfFalse
                | Opcode::PopJumpIfTrue
                | Opcode::PopJumpForwardIfFalse
                | Opcode::PopJumpForwardIfTrue => return Err(unrecognized(ins)),
                Opcode::PopTop => {
                    pop(&mut stack, ins)?;
                }
                Opcode::ReturnValue => break,
                Opcode::ReturnConst => {
                    stack.push(constant_text(&ins.argval)?);
                    break;
                }
                op => {
                    if let Some(symbol) = op.binary_symbol() {
                        binary(&mut stack, ins, symbol)?;
                    } else {
                        return Err(unrecognized(ins));
                    }
                }
            }
            i += 1;
        }

        match stack.len() {
            1 => Ok(stack.pop().unwrap_or_default()),
            n => Err(SelectError::decompile(
                DecompileFailure::StackImbalance,
                format!(
                    "{} values on the stack after instructions {}..{}: [{}]",
                    n,
                    start,
                    end,
                    stack.join(", ")
                ),
            )),
        }
    }

    /// Resolve a forward branch to an instruction index.
    fn target(&self, branch: &Instruction, at: usize) -> SelectResult<usize> {
        let offset = branch
            .argval
            .as_u64()
            .and_then(|o| u32::try_from(o).ok())
            .ok_or_else(|| unrecognized(branch))?;
        match self.targets.get(&offset) {
            Some(&idx) if idx > at => Ok(idx),
            Some(_) => Err(SelectError::unsupported(
                branch.opname.name(),
                format!("backward jump to offset {}", offset),
            )),
            // a branch past the last instruction ends the trace
            None if self.last_offset.is_some_and(|last| offset > last) => Ok(self.code.len()),
            None => Err(SelectError::unsupported(
                branch.opname.name(),
                format!("jump to offset {} between instructions", offset),
            )),
        }
    }
}

fn unrecognized(ins: &Instruction) -> SelectError {
    SelectError::unsupported(
        format!("{} at offset {}", ins.opname.name(), ins.offset),
        "unrecognized instruction shape",
    )
}

fn underflow(ins: &Instruction) -> SelectError {
    SelectError::decompile(
        DecompileFailure::StackImbalance,
        format!(
            "stack underflow at {} (offset {})",
            ins.opname.name(),
            ins.offset
        ),
    )
}

fn pop(stack: &mut Vec<String>, ins: &Instruction) -> SelectResult<String> {
    stack.pop().ok_or_else(|| underflow(ins))
}

fn pop_n(stack: &mut Vec<String>, ins: &Instruction, n: usize) -> SelectResult<Vec<String>> {
    if stack.len() < n {
        return Err(underflow(ins));
    }
    Ok(stack.split_off(stack.len() - n))
}

fn binary(stack: &mut Vec<String>, ins: &Instruction, symbol: &str) -> SelectResult<()> {
    let right = pop(stack, ins)?;
    let left = pop(stack, ins)?;
    stack.push(format!("({} {} {})", left, symbol, right));
    Ok(())
}

fn count(ins: &Instruction) -> usize {
    ins.arg
        .map(|n| n as usize)
        .or_else(|| ins.argval.as_u64().map(|n| n as usize))
        .unwrap_or(0)
}

fn inverted(ins: &Instruction) -> bool {
    ins.arg
        .map(|n| n == 1)
        .or_else(|| ins.argval.as_u64().map(|n| n == 1))
        .unwrap_or(false)
}

fn name_text(ins: &Instruction) -> &str {
    match &ins.argval {
        Json::String(name) => name,
        _ => ins.argrepr.trim_start_matches("NULL + ").trim(),
    }
}

/// Comparison spelling; newer disassemblers render `bool(==)`.
fn compare_symbol(ins: &Instruction) -> String {
    let raw = match &ins.argval {
        Json::String(s) => s.as_str(),
        _ => ins.argrepr.as_str(),
    };
    raw.trim()
        .trim_start_matches("bool(")
        .trim_end_matches(')')
        .to_string()
}

fn constant_text(value: &Json) -> SelectResult<String> {
    Ok(match value {
        Json::Null => Literal::None.to_string(),
        Json::Bool(b) => Literal::Bool(*b).to_string(),
        Json::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Literal::Int(i).to_string(),
            (None, Some(f)) => Literal::Float(f).to_string(),
            (None, None) => n.to_string(),
        },
        Json::String(s) => Literal::Str(s.clone()).to_string(),
        Json::Array(items) => {
            let items = items
                .iter()
                .map(constant_text)
                .collect::<SelectResult<Vec<_>>>()?;
            tuple_text(&items)
        }
        Json::Object(_) => {
            return Err(SelectError::unsupported(
                value.to_string(),
                "mapping constants are not supported",
            ));
        }
    })
}

fn tuple_text(items: &[String]) -> String {
    match items {
        [single] => format!("({},)", single),
        _ => format!("({})", items.join(", ")),
    }
}

/// `[]` extended by a constant tuple becomes a list display.
fn extend_list(list: &str, iterable: &str) -> String {
    let inner = iterable
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .map(|s| s.trim_end_matches(','))
        .unwrap_or(iterable);
    let existing = list
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or("");
    match (existing.is_empty(), inner.is_empty()) {
        (true, _) => format!("[{}]", inner),
        (false, true) => format!("[{}]", existing),
        (false, false) => format!("[{}, {}]", existing, inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn roundtrip(text: &str) -> String {
        decompile(&Closure::compile(text).unwrap()).unwrap()
    }

    /// Decompiled text parses to the same tree as the original body.
    fn assert_equivalent(text: &str) {
        let decompiled = roundtrip(text);
        assert_eq!(
            parse(&decompiled).unwrap(),
            parse(text).unwrap(),
            "decompiled {} from {}",
            decompiled,
            text
        );
    }

    fn ins(opname: Opcode, offset: u32, argval: Json) -> Instruction {
        Instruction::new(opname, offset, None, argval)
    }

    #[test]
    fn test_comparisons() {
        for text in [
            "person.gender == 1",
            "person.gender != 1",
            "x.y < 2",
            "x.y <= 2",
            "x.y > 2",
            "x.y >= 2",
            "x.y is None",
            "x.y is not None",
            "'AB' in x.y",
            "x.y not in (1, 2, 3)",
        ] {
            assert_equivalent(text);
        }
    }

    #[test]
    fn test_literal_kinds() {
        for text in [
            "x == None",
            "x == True",
            "x == False",
            "x == 42",
            "x == 2.5",
            "x == 'it\\'s'",
            "x in [1, 2, 3]",
            "x in [a, b]",
            "x in (1,)",
        ] {
            assert_equivalent(text);
        }
    }

    #[test]
    fn test_chains_calls_subscripts() {
        for text in [
            "person.primary_name.surname_list[0].surname",
            "len(person.event_ref_list) > 2",
            "person.primary_name.first_name.startswith('J')",
            "not person.private",
            "-x.y + +x.z * ~x.w",
            "x.y ** 2 // 3 % 4",
            "f()",
        ] {
            assert_equivalent(text);
        }
    }

    #[test]
    fn test_short_circuit_nesting() {
        assert_eq!(roundtrip("a and b and c"), "(a and (b and c))");
        assert_eq!(roundtrip("a and b or c"), "((a and b) or c)");
        assert_eq!(roundtrip("a or b and c"), "(a or (b and c))");
        assert_eq!(
            roundtrip("(x.y == 1 or x.z == 2) and not x.w"),
            "(((x.y == 1) or (x.z == 2)) and (not x.w))"
        );
    }

    #[test]
    fn test_entry_noops_are_stripped() {
        let closure = Closure::new(vec![
            ins(Opcode::Resume, 0, json!(0)),
            ins(Opcode::Nop, 2, Json::Null),
            ins(Opcode::PushNull, 4, Json::Null),
            ins(Opcode::LoadGlobal, 6, json!("person")),
            ins(Opcode::LoadAttr, 8, json!("gender")),
            ins(Opcode::ReturnValue, 10, Json::Null),
        ]);
        assert_eq!(decompile(&closure).unwrap(), "person.gender");
    }

    #[test]
    fn test_branch_onto_stripped_instruction() {
        // (a and b) == c, with the branch landing on a NOP
        let closure = Closure::new(vec![
            ins(Opcode::LoadGlobal, 0, json!("a")),
            ins(Opcode::CopyTop, 2, json!(1)),
            ins(Opcode::PopJumpIfFalse, 4, json!(12)),
            ins(Opcode::PopTop, 6, Json::Null),
            ins(Opcode::LoadGlobal, 8, json!("b")),
            ins(Opcode::Cache, 10, Json::Null),
            ins(Opcode::Nop, 12, Json::Null),
            ins(Opcode::LoadGlobal, 14, json!("c")),
            ins(Opcode::CompareOp, 16, json!("==")),
            ins(Opcode::ReturnValue, 18, Json::Null),
        ]);
        assert_eq!(decompile(&closure).unwrap(), "((a and b) == c)");

        // a target that is no instruction boundary
        let closure = Closure::new(vec![
            ins(Opcode::LoadGlobal, 0, json!("a")),
            ins(Opcode::CopyTop, 2, json!(1)),
            ins(Opcode::PopJumpIfFalse, 4, json!(9)),
            ins(Opcode::PopTop, 6, Json::Null),
            ins(Opcode::LoadGlobal, 8, json!("b")),
            ins(Opcode::ReturnValue, 10, Json::Null),
        ]);
        assert_eq!(
            decompile(&closure).unwrap_err().kind(),
            ErrorKind::Unsupported
        );
    }

    #[test]
    fn test_legacy_binary_opcodes() {
        let closure = Closure::new(vec![
            ins(Opcode::LoadGlobal, 0, json!("a")),
            ins(Opcode::LoadConst, 2, json!(1)),
            ins(Opcode::BinaryAdd, 4, Json::Null),
            ins(Opcode::ReturnValue, 6, Json::Null),
        ]);
        assert_eq!(decompile(&closure).unwrap(), "(a + 1)");
    }

    #[test]
    fn test_return_const() {
        let closure = Closure::new(vec![ins(Opcode::ReturnConst, 0, json!(true))]);
        assert_eq!(decompile(&closure).unwrap(), "True");
    }

    #[test]
    fn test_parameterized_closure_fails() {
        let closure = Closure::compile("lambda person: person.gender == 1").unwrap();
        let err = decompile(&closure).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParameterizedClosure);
    }

    #[test]
    fn test_stack_imbalance() {
        let closure = Closure::new(vec![
            ins(Opcode::LoadGlobal, 0, json!("a")),
            ins(Opcode::LoadGlobal, 2, json!("b")),
            ins(Opcode::ReturnValue, 4, Json::Null),
        ]);
        let err = decompile(&closure).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StackImbalance);

        let closure = Closure::new(vec![
            ins(Opcode::LoadAttr, 0, json!("a")),
            ins(Opcode::ReturnValue, 2, Json::Null),
        ]);
        assert_eq!(
            decompile(&closure).unwrap_err().kind(),
            ErrorKind::StackImbalance
        );
    }

    #[test]
    fn test_unrecognized_control_flow() {
        // a conditional branch without the preceding duplicate
        let closure = Closure::new(vec![
            ins(Opcode::LoadGlobal, 0, json!("a")),
            ins(Opcode::PopJumpIfFalse, 2, json!(6)),
            ins(Opcode::LoadGlobal, 4, json!("b")),
            ins(Opcode::ReturnValue, 6, Json::Null),
        ]);
        assert_eq!(
            decompile(&closure).unwrap_err().kind(),
            ErrorKind::Unsupported
        );

        // a backward jump
        let closure = Closure::new(vec![
            ins(Opcode::LoadGlobal, 0, json!("a")),
            ins(Opcode::CopyTop, 2, json!(1)),
            ins(Opcode::PopJumpIfTrue, 4, json!(0)),
            ins(Opcode::ReturnValue, 6, Json::Null),
        ]);
        assert_eq!(
            decompile(&closure).unwrap_err().kind(),
            ErrorKind::Unsupported
        );
    }

    #[test]
    fn test_newer_compare_spelling() {
        let closure = Closure::new(vec![
            ins(Opcode::LoadGlobal, 0, json!("a")),
            ins(Opcode::LoadConst, 2, json!(1)),
            Instruction {
                opname: Opcode::CompareOp,
                offset: 4,
                arg: Some(88),
                argval: json!(88),
                argrepr: "bool(==)".into(),
            },
            ins(Opcode::ReturnValue, 6, Json::Null),
        ]);
        assert_eq!(decompile(&closure).unwrap(), "(a == 1)");
    }
}
