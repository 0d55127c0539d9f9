//! Expression parser using nom.
//!
//! Parses the restricted expression language into an [`Expr`] tree.
//!
//! # Precedence (loosest first)
//!
//! ```text
//! lambda
//! x if c else y
//! or
//! and
//! not
//! in, not in, is, is not, <, <=, >, >=, !=, ==
//! |
//! ^
//! &
//! <<, >>
//! +, -
//! *, /, //, %, @
//! -x, +x, ~x
//! **
//! x.attr, x[index], x(args)
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit0, digit1, multispace0, one_of, satisfy},
    combinator::{map, not, opt, recognize, value},
    multi::{many0, many1, separated_list0, separated_list1},
    sequence::{pair, preceded, terminated, tuple},
    IResult,
};

use crate::ast::*;
use crate::error::{SelectError, SelectResult};

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "in", "is", "if", "else", "for", "lambda", "None", "True", "False",
];

/// Parse a complete expression.
pub fn parse(text: &str) -> SelectResult<Expr> {
    match expression(text) {
        Ok((rest, expr)) if rest.trim().is_empty() => Ok(expr),
        Ok((rest, _)) => {
            let rest = rest.trim_start();
            Err(SelectError::syntax(
                text,
                format!(
                    "unexpected trailing content '{}' at position {}",
                    rest,
                    text.len() - rest.len()
                ),
            ))
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let rest = e.input.trim_start();
            Err(SelectError::syntax(
                text,
                format!(
                    "unexpected input at position {}: '{}'",
                    text.len() - rest.len(),
                    rest
                ),
            ))
        }
        Err(nom::Err::Incomplete(_)) => Err(SelectError::syntax(text, "incomplete input")),
    }
}

// ============================================================================
// Tokens
// ============================================================================

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn fail<O>(input: &str) -> IResult<&str, O> {
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Tag,
    )))
}

/// A punctuation token that must not be followed by any char of `not_followed_by`.
fn op_token<'a>(
    sym: &'static str,
    not_followed_by: &'static str,
) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input: &'a str| {
        let (rest, tok) = preceded(multispace0, tag(sym))(input)?;
        if rest.starts_with(|c: char| not_followed_by.contains(c)) {
            return fail(input);
        }
        Ok((rest, tok))
    }
}

fn symbol<'a>(sym: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    op_token(sym, "")
}

/// A reserved word, matched on a word boundary.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input: &'a str| {
        preceded(multispace0, terminated(tag(kw), not(satisfy(is_ident_char))))(input)
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    preceded(
        multispace0,
        recognize(pair(satisfy(is_ident_start), take_while(is_ident_char))),
    )(input)
}

/// A non-reserved identifier.
fn name(input: &str) -> IResult<&str, String> {
    let (rest, id) = identifier(input)?;
    if KEYWORDS.contains(&id) {
        return fail(input);
    }
    Ok((rest, id.to_string()))
}

// ============================================================================
// Expressions
// ============================================================================

fn expression(input: &str) -> IResult<&str, Expr> {
    alt((lambda_expr, conditional))(input)
}

fn lambda_expr(input: &str) -> IResult<&str, Expr> {
    let (input, _) = keyword("lambda")(input)?;
    let (input, args) = parameters(input)?;
    let (input, _) = symbol(":")(input)?;
    let (input, body) = expression(input)?;
    Ok((
        input,
        Expr::Lambda {
            args,
            body: Box::new(body),
        },
    ))
}

enum ParamItem {
    Plain(Param),
    Var(String),
    Kw(String),
}

fn param_item(input: &str) -> IResult<&str, ParamItem> {
    alt((
        map(preceded(symbol("**"), name), ParamItem::Kw),
        map(preceded(op_token("*", "*"), name), ParamItem::Var),
        map(
            pair(name, opt(preceded(op_token("=", "="), expression))),
            |(name, default)| ParamItem::Plain(Param { name, default }),
        ),
    ))(input)
}

fn parameters(input: &str) -> IResult<&str, Arguments> {
    let (input, items) = separated_list0(symbol(","), param_item)(input)?;
    let mut args = Arguments::default();
    for item in items {
        match item {
            ParamItem::Plain(param) => args.params.push(param),
            ParamItem::Var(name) => args.vararg = Some(name),
            ParamItem::Kw(name) => args.kwarg = Some(name),
        }
    }
    Ok((input, args))
}

fn conditional(input: &str) -> IResult<&str, Expr> {
    let (input, body) = or_test(input)?;
    let (input, tail) = opt(tuple((
        keyword("if"),
        or_test,
        keyword("else"),
        expression,
    )))(input)?;

    match tail {
        Some((_, test, _, orelse)) => Ok((
            input,
            Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
        )),
        None => Ok((input, body)),
    }
}

fn bool_chain<'a>(
    input: &'a str,
    op: BoolOp,
    operand: fn(&'a str) -> IResult<&'a str, Expr>,
) -> IResult<&'a str, Expr> {
    let (input, first) = operand(input)?;
    let (input, rest) = many0(preceded(keyword(op.keyword()), operand))(input)?;
    if rest.is_empty() {
        return Ok((input, first));
    }
    let mut values = vec![first];
    values.extend(rest);
    Ok((input, Expr::BoolOp { op, values }))
}

fn or_test(input: &str) -> IResult<&str, Expr> {
    bool_chain(input, BoolOp::Or, and_test)
}

fn and_test(input: &str) -> IResult<&str, Expr> {
    bool_chain(input, BoolOp::And, not_test)
}

fn not_test(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(keyword("not"), not_test), |operand| Expr::UnaryOp {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        }),
        comparison,
    ))(input)
}

fn comp_op(input: &str) -> IResult<&str, CmpOp> {
    alt((
        value(CmpOp::Eq, symbol("==")),
        value(CmpOp::NotEq, symbol("!=")),
        value(CmpOp::LtE, symbol("<=")),
        value(CmpOp::GtE, symbol(">=")),
        value(CmpOp::Lt, op_token("<", "<")),
        value(CmpOp::Gt, op_token(">", ">")),
        value(CmpOp::NotIn, pair(keyword("not"), keyword("in"))),
        value(CmpOp::IsNot, pair(keyword("is"), keyword("not"))),
        value(CmpOp::Is, keyword("is")),
        value(CmpOp::In, keyword("in")),
    ))(input)
}

fn comparison(input: &str) -> IResult<&str, Expr> {
    let (input, left) = bit_or(input)?;
    let (input, rest) = many0(pair(comp_op, bit_or))(input)?;
    if rest.is_empty() {
        return Ok((input, left));
    }
    let (ops, comparators) = rest.into_iter().unzip();
    Ok((
        input,
        Expr::Compare {
            left: Box::new(left),
            ops,
            comparators,
        },
    ))
}

fn binary_chain<'a>(
    input: &'a str,
    operand: fn(&'a str) -> IResult<&'a str, Expr>,
    operator: fn(&'a str) -> IResult<&'a str, BinaryOp>,
) -> IResult<&'a str, Expr> {
    let (input, first) = operand(input)?;
    let (input, rest) = many0(pair(operator, operand))(input)?;
    let expr = rest
        .into_iter()
        .fold(first, |left, (op, right)| Expr::BinOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        });
    Ok((input, expr))
}

fn bit_or(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, bit_xor, |i| {
        value(BinaryOp::BitOr, op_token("|", "="))(i)
    })
}

fn bit_xor(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, bit_and, |i| {
        value(BinaryOp::BitXor, op_token("^", "="))(i)
    })
}

fn bit_and(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, shift, |i| {
        value(BinaryOp::BitAnd, op_token("&", "="))(i)
    })
}

fn shift(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, arith, |i| {
        alt((
            value(BinaryOp::LShift, op_token("<<", "=")),
            value(BinaryOp::RShift, op_token(">>", "=")),
        ))(i)
    })
}

fn arith(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, term, |i| {
        alt((
            value(BinaryOp::Add, op_token("+", "=")),
            value(BinaryOp::Sub, op_token("-", "=")),
        ))(i)
    })
}

fn term(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, factor, |i| {
        alt((
            value(BinaryOp::FloorDiv, op_token("//", "=")),
            value(BinaryOp::Mul, op_token("*", "*=")),
            value(BinaryOp::Div, op_token("/", "=")),
            value(BinaryOp::Mod, op_token("%", "=")),
            value(BinaryOp::MatMul, op_token("@", "=")),
        ))(i)
    })
}

fn factor(input: &str) -> IResult<&str, Expr> {
    alt((
        map(
            pair(
                alt((
                    value(UnaryOp::Neg, symbol("-")),
                    value(UnaryOp::Pos, symbol("+")),
                    value(UnaryOp::Invert, symbol("~")),
                )),
                factor,
            ),
            |(op, operand)| Expr::UnaryOp {
                op,
                operand: Box::new(operand),
            },
        ),
        power,
    ))(input)
}

fn power(input: &str) -> IResult<&str, Expr> {
    let (input, base) = primary(input)?;
    let (input, exponent) = opt(preceded(symbol("**"), factor))(input)?;
    match exponent {
        Some(exponent) => Ok((
            input,
            Expr::BinOp {
                left: Box::new(base),
                op: BinaryOp::Pow,
                right: Box::new(exponent),
            },
        )),
        None => Ok((input, base)),
    }
}

/// An atom followed by any number of `.attr`, `(args)` and `[index]` trailers.
fn primary(input: &str) -> IResult<&str, Expr> {
    let (mut input, mut expr) = atom(input)?;
    loop {
        if let Ok((rest, attr)) = preceded(symbol("."), name)(input) {
            expr = Expr::Attribute {
                value: Box::new(expr),
                attr,
            };
            input = rest;
        } else if let Ok((rest, (args, keywords))) = call_args(input) {
            expr = Expr::Call {
                func: Box::new(expr),
                args,
                keywords,
            };
            input = rest;
        } else if let Ok((rest, slice)) = subscript(input) {
            expr = Expr::Subscript {
                value: Box::new(expr),
                slice: Box::new(slice),
            };
            input = rest;
        } else {
            break;
        }
    }
    Ok((input, expr))
}

enum CallArg {
    Positional(Expr),
    Keyword(Keyword),
}

fn call_arg(input: &str) -> IResult<&str, CallArg> {
    alt((
        map(preceded(symbol("**"), expression), |value| {
            CallArg::Keyword(Keyword { arg: None, value })
        }),
        map(preceded(op_token("*", "*"), expression), |value| {
            CallArg::Positional(Expr::Starred(Box::new(value)))
        }),
        map(
            pair(terminated(name, op_token("=", "=")), expression),
            |(arg, value)| {
                CallArg::Keyword(Keyword {
                    arg: Some(arg),
                    value,
                })
            },
        ),
        map(pair(expression, opt(generators)), |(elt, generators)| {
            match generators {
                Some(generators) => CallArg::Positional(Expr::GeneratorExp {
                    elt: Box::new(elt),
                    generators,
                }),
                None => CallArg::Positional(elt),
            }
        }),
    ))(input)
}

fn call_args(input: &str) -> IResult<&str, (Vec<Expr>, Vec<Keyword>)> {
    let (input, _) = symbol("(")(input)?;
    let (input, items) = separated_list0(symbol(","), call_arg)(input)?;
    let (input, _) = opt(symbol(","))(input)?;
    let (input, _) = symbol(")")(input)?;

    let mut args = Vec::new();
    let mut keywords = Vec::new();
    for item in items {
        match item {
            CallArg::Positional(expr) => args.push(expr),
            CallArg::Keyword(kw) => keywords.push(kw),
        }
    }
    Ok((input, (args, keywords)))
}

fn subscript(input: &str) -> IResult<&str, Expr> {
    let (input, _) = symbol("[")(input)?;
    let (input, mut items) = separated_list1(symbol(","), slice_item)(input)?;
    let (input, trailing) = opt(symbol(","))(input)?;
    let (input, _) = symbol("]")(input)?;

    if items.len() == 1 && trailing.is_none() {
        if let Some(item) = items.pop() {
            return Ok((input, item));
        }
    }
    Ok((input, Expr::Tuple(items)))
}

fn slice_item(input: &str) -> IResult<&str, Expr> {
    let (input, lower) = opt(expression)(input)?;
    let (input, colon) = opt(symbol(":"))(input)?;
    match (lower, colon) {
        (Some(expr), None) => Ok((input, expr)),
        (None, None) => fail(input),
        (lower, Some(_)) => {
            let (input, upper) = opt(expression)(input)?;
            let (input, step) = opt(preceded(symbol(":"), opt(expression)))(input)?;
            Ok((
                input,
                Expr::Slice {
                    lower: lower.map(Box::new),
                    upper: upper.map(Box::new),
                    step: step.flatten().map(Box::new),
                },
            ))
        }
    }
}

fn comprehension(input: &str) -> IResult<&str, Comprehension> {
    let (input, _) = keyword("for")(input)?;
    let (input, target) = name(input)?;
    let (input, _) = keyword("in")(input)?;
    let (input, iter) = or_test(input)?;
    let (input, ifs) = many0(preceded(keyword("if"), or_test))(input)?;
    Ok((input, Comprehension { target, iter, ifs }))
}

fn generators(input: &str) -> IResult<&str, Vec<Comprehension>> {
    many1(comprehension)(input)
}

// ============================================================================
// Atoms
// ============================================================================

fn atom(input: &str) -> IResult<&str, Expr> {
    alt((
        paren_atom,
        bracket_atom,
        brace_atom,
        map(string_literal, |s| Expr::Literal(Literal::Str(s))),
        number,
        value(Expr::Literal(Literal::None), keyword("None")),
        value(Expr::Literal(Literal::Bool(true)), keyword("True")),
        value(Expr::Literal(Literal::Bool(false)), keyword("False")),
        map(name, Expr::Name),
    ))(input)
}

/// `()`, `(expr)`, `(a, b)` or `(elt for x in xs)`.
fn paren_atom(input: &str) -> IResult<&str, Expr> {
    let (input, _) = symbol("(")(input)?;
    if let Ok((rest, _)) = symbol(")")(input) {
        return Ok((rest, Expr::Tuple(Vec::new())));
    }
    let (input, first) = expression(input)?;
    if let Ok((rest, generators)) = generators(input) {
        let (rest, _) = symbol(")")(rest)?;
        return Ok((
            rest,
            Expr::GeneratorExp {
                elt: Box::new(first),
                generators,
            },
        ));
    }
    let (input, tail) = many0(preceded(symbol(","), expression))(input)?;
    let (input, trailing) = opt(symbol(","))(input)?;
    let (input, _) = symbol(")")(input)?;

    if tail.is_empty() && trailing.is_none() {
        return Ok((input, first));
    }
    let mut items = vec![first];
    items.extend(tail);
    Ok((input, Expr::Tuple(items)))
}

/// `[]`, `[a, b]` or `[elt for x in xs]`.
fn bracket_atom(input: &str) -> IResult<&str, Expr> {
    let (input, _) = symbol("[")(input)?;
    if let Ok((rest, _)) = symbol("]")(input) {
        return Ok((rest, Expr::List(Vec::new())));
    }
    let (input, first) = expression(input)?;
    if let Ok((rest, generators)) = generators(input) {
        let (rest, _) = symbol("]")(rest)?;
        return Ok((
            rest,
            Expr::ListComp {
                elt: Box::new(first),
                generators,
            },
        ));
    }
    let (input, tail) = many0(preceded(symbol(","), expression))(input)?;
    let (input, _) = opt(symbol(","))(input)?;
    let (input, _) = symbol("]")(input)?;

    let mut items = vec![first];
    items.extend(tail);
    Ok((input, Expr::List(items)))
}

/// Dict and set displays are recognized but not modelled.
fn brace_atom(input: &str) -> IResult<&str, Expr> {
    let (input, _) = symbol("{")(input)?;
    let (input, items) = separated_list0(
        symbol(","),
        pair(expression, opt(preceded(symbol(":"), expression))),
    )(input)?;
    let (input, _) = opt(symbol(","))(input)?;
    let (input, _) = symbol("}")(input)?;

    let kind = if items.is_empty() || items.iter().any(|(_, v)| v.is_some()) {
        "dict"
    } else {
        "set"
    };
    Ok((input, Expr::Opaque(kind.to_string())))
}

fn number(input: &str) -> IResult<&str, Expr> {
    let (rest, text) = preceded(
        multispace0,
        recognize(tuple((
            alt((
                recognize(pair(digit1, opt(pair(char('.'), digit0)))),
                recognize(pair(char('.'), digit1)),
            )),
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        ))),
    )(input)?;

    if rest.starts_with(is_ident_start) {
        return fail(input);
    }
    let literal = if text.contains(['.', 'e', 'E']) {
        match text.parse::<f64>() {
            Ok(f) => Literal::Float(f),
            Err(_) => return fail(input),
        }
    } else {
        match text.parse::<i64>() {
            Ok(n) => Literal::Int(n),
            Err(_) => return fail(input),
        }
    };
    Ok((rest, Expr::Literal(literal)))
}

/// Adjacent string pieces concatenate (`'a' "b"` is `'ab'`).
fn string_literal(input: &str) -> IResult<&str, String> {
    let (input, pieces) = many1(string_piece)(input)?;
    Ok((input, pieces.concat()))
}

fn string_piece(input: &str) -> IResult<&str, String> {
    let (input, _) = multispace0(input)?;
    let (input, prefix) = opt(one_of("rRuU"))(input)?;
    let raw = matches!(prefix, Some('r' | 'R'));
    let (body, quote) = one_of("'\"")(input)?;

    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        if c == quote {
            return Ok((&body[i + 1..], out));
        }
        match c {
            '\n' => break,
            '\\' => match chars.next() {
                Some((_, escaped)) if raw => {
                    out.push('\\');
                    out.push(escaped);
                }
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, '0')) => out.push('\0'),
                Some((_, escaped @ ('\\' | '\'' | '"'))) => out.push(escaped),
                Some((_, escaped)) => {
                    out.push('\\');
                    out.push(escaped);
                }
                None => break,
            },
            c => out.push(c),
        }
    }
    fail(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn name(s: &str) -> Expr {
        Expr::name(s)
    }

    #[test]
    fn test_attribute_comparison() {
        let e = parse("person.gender == 1").unwrap();
        assert_eq!(
            e,
            Expr::compare(
                Expr::attr(name("person"), "gender"),
                CmpOp::Eq,
                Expr::Literal(Literal::Int(1))
            )
        );
    }

    #[test]
    fn test_bool_ops_flatten() {
        let e = parse("a and b and c").unwrap();
        assert_eq!(
            e,
            Expr::BoolOp {
                op: BoolOp::And,
                values: vec![name("a"), name("b"), name("c")],
            }
        );

        let e = parse("a or b and c").unwrap();
        match e {
            Expr::BoolOp { op: BoolOp::Or, values } => {
                assert_eq!(values[0], name("a"));
                assert!(matches!(values[1], Expr::BoolOp { op: BoolOp::And, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_not_in_and_is_not() {
        let e = parse("x not in y").unwrap();
        assert!(matches!(e, Expr::Compare { ref ops, .. } if ops == &vec![CmpOp::NotIn]));

        let e = parse("x is not None").unwrap();
        assert!(matches!(e, Expr::Compare { ref ops, .. } if ops == &vec![CmpOp::IsNot]));

        let e = parse("not x").unwrap();
        assert!(matches!(e, Expr::UnaryOp { op: UnaryOp::Not, .. }));
    }

    #[test]
    fn test_comparison_chain() {
        let e = parse("1 < x.y <= 10").unwrap();
        match e {
            Expr::Compare { ops, comparators, .. } => {
                assert_eq!(ops, vec![CmpOp::Lt, CmpOp::LtE]);
                assert_eq!(comparators.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        let e = parse("1 + 2 * 3").unwrap();
        match e {
            Expr::BinOp { op: BinaryOp::Add, right, .. } => {
                assert!(matches!(*right, Expr::BinOp { op: BinaryOp::Mul, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }

        let e = parse("-x ** 2").unwrap();
        match e {
            Expr::UnaryOp { op: UnaryOp::Neg, operand } => {
                assert!(matches!(*operand, Expr::BinOp { op: BinaryOp::Pow, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            parse("a // b").unwrap(),
            Expr::BinOp { op: BinaryOp::FloorDiv, .. }
        ));
        assert!(matches!(
            parse("a << 2").unwrap(),
            Expr::BinOp { op: BinaryOp::LShift, .. }
        ));
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse("None").unwrap(), Expr::Literal(Literal::None));
        assert_eq!(parse("True").unwrap(), Expr::Literal(Literal::Bool(true)));
        assert_eq!(parse("42").unwrap(), Expr::Literal(Literal::Int(42)));
        assert_eq!(parse("2.5").unwrap(), Expr::Literal(Literal::Float(2.5)));
        assert_eq!(parse("1e3").unwrap(), Expr::Literal(Literal::Float(1000.0)));
        assert_eq!(
            parse(r#"'it\'s'"#).unwrap(),
            Expr::Literal(Literal::Str("it's".into()))
        );
        assert_eq!(
            parse(r#""a" 'b'"#).unwrap(),
            Expr::Literal(Literal::Str("ab".into()))
        );
        assert_eq!(
            parse(r"r'\d'").unwrap(),
            Expr::Literal(Literal::Str("\\d".into()))
        );
    }

    #[test]
    fn test_keyword_prefixed_names() {
        // `notes`, `order`, `island` start with keywords but are plain names.
        assert_eq!(parse("notes").unwrap(), name("notes"));
        assert_eq!(
            parse("island or order").unwrap(),
            Expr::BoolOp {
                op: BoolOp::Or,
                values: vec![name("island"), name("order")],
            }
        );
    }

    #[test]
    fn test_subscript_and_slice() {
        let e = parse("person.event_ref_list[0].role").unwrap();
        assert_eq!(e.kind(), "attribute");

        let e = parse("x[1:2]").unwrap();
        match e {
            Expr::Subscript { slice, .. } => {
                assert!(matches!(*slice, Expr::Slice { step: None, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_calls() {
        let e = parse("f(a, *b, c=1, **d)").unwrap();
        match e {
            Expr::Call { args, keywords, .. } => {
                assert_eq!(args.len(), 2);
                assert!(matches!(args[1], Expr::Starred(_)));
                assert_eq!(keywords.len(), 2);
                assert_eq!(keywords[0].arg.as_deref(), Some("c"));
                assert_eq!(keywords[1].arg, None);
            }
            other => panic!("unexpected {:?}", other),
        }

        let e = parse("any(x.role == 1 for x in person.event_ref_list)").unwrap();
        match e {
            Expr::Call { args, .. } => {
                assert!(matches!(args[0], Expr::GeneratorExp { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_comprehension() {
        let e = parse("[x.role for x in person.event_ref_list if x.role > 0]").unwrap();
        match e {
            Expr::ListComp { generators, .. } => {
                assert_eq!(generators.len(), 1);
                assert_eq!(generators[0].target, "x");
                assert_eq!(generators[0].ifs.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_lambda() {
        let e = parse("lambda x, y=2, *rest, **kw: x + y").unwrap();
        match e {
            Expr::Lambda { args, .. } => {
                assert_eq!(args.params.len(), 2);
                assert!(args.params[1].default.is_some());
                assert_eq!(args.vararg.as_deref(), Some("rest"));
                assert_eq!(args.kwarg.as_deref(), Some("kw"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            parse("lambda: person.gender == 1").unwrap(),
            Expr::Lambda { .. }
        ));
    }

    #[test]
    fn test_conditional_and_tuples() {
        assert!(matches!(parse("a if b else c").unwrap(), Expr::IfExp { .. }));
        assert_eq!(parse("(1,)").unwrap(), Expr::Tuple(vec![Expr::Literal(Literal::Int(1))]));
        assert_eq!(parse("()").unwrap(), Expr::Tuple(vec![]));
        assert_eq!(parse("(a)").unwrap(), name("a"));
        assert_eq!(parse("{1: 2}").unwrap(), Expr::Opaque("dict".into()));
    }

    #[test]
    fn test_syntax_errors() {
        let err = parse("person.gender ==").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unparseable);
        assert_eq!(err.fragment(), Some("person.gender =="));

        let err = parse("a b").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unparseable);
        assert!(err.to_string().contains("'b'"));
    }
}
