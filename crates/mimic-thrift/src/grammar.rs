//! Thrift IDL grammar.
//!
//! Covers the subset the engine consumes: includes, namespaces (parsed and
//! dropped), typedefs, enums, constants, structs/unions/exceptions and
//! services. Comments (`//`, `#`, `/* */`) are trivia; the block preceding a
//! definition is captured as its doc text. `,` and `;` are interchangeable
//! optional separators.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, hex_digit1, one_of, satisfy},
    combinator::{map, opt, recognize, value, verify},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::ast::{
    BaseType, ConstNode, ConstValue, EnumNode, FieldNode, FunctionNode, ServiceNode, Statement,
    StructKind, StructNode, TypeExpr, TypedefNode,
};
use crate::file::Requiredness;

/// Grammar failure with a byte offset into the source.
#[derive(Debug, Clone)]
pub struct GrammarError {
    pub offset: usize,
    pub message: String,
}

/// Parse a whole file into doc-annotated statements.
pub fn parse_document(source: &str) -> Result<Vec<(Option<String>, Statement)>, GrammarError> {
    let mut rest = source;
    let mut statements = Vec::new();
    loop {
        let (after, doc) = trivia(rest);
        if after.is_empty() {
            return Ok(statements);
        }
        match statement(after) {
            Ok((next, Some(st))) => {
                statements.push((doc, st));
                rest = next;
            }
            Ok((next, None)) => rest = next,
            Err(_) => {
                return Err(GrammarError {
                    offset: source.len() - after.len(),
                    message: "syntax error".to_string(),
                })
            }
        }
    }
}

/// Line and column (1-based) of a byte offset.
pub fn locate(source: &str, offset: usize) -> (u32, u32) {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.matches('\n').count() as u32 + 1;
    let column = (offset - before.rfind('\n').map(|p| p + 1).unwrap_or(0)) as u32 + 1;
    (line, column)
}

// ===== Trivia =====

/// Skip whitespace and comments, collecting comment text as doc.
fn trivia(mut input: &str) -> (&str, Option<String>) {
    let mut doc: Vec<String> = Vec::new();
    loop {
        let trimmed = input.trim_start();
        if let Some(rest) = trimmed.strip_prefix("//") {
            let (line, rest) = split_line(rest);
            push_doc(&mut doc, line);
            input = rest;
        } else if let Some(rest) = trimmed.strip_prefix('#') {
            let (line, rest) = split_line(rest);
            push_doc(&mut doc, line);
            input = rest;
        } else if let Some(rest) = trimmed.strip_prefix("/*") {
            match rest.find("*/") {
                Some(end) => {
                    for line in rest[..end].lines() {
                        push_doc(&mut doc, line.trim_start_matches(['*', ' ']));
                    }
                    input = &rest[end + 2..];
                }
                // Unterminated block comment swallows the rest of the file.
                None => input = "",
            }
        } else {
            let doc = if doc.is_empty() {
                None
            } else {
                Some(doc.join(" "))
            };
            return (trimmed, doc);
        }
    }
}

fn push_doc(doc: &mut Vec<String>, line: &str) {
    let line = line.trim();
    if !line.is_empty() {
        doc.push(line.to_string());
    }
}

fn split_line(s: &str) -> (&str, &str) {
    match s.find('\n') {
        Some(pos) => (&s[..pos], &s[pos + 1..]),
        None => (s, ""),
    }
}

/// nom-compatible trivia skip (doc text discarded).
fn sp(input: &str) -> IResult<&str, ()> {
    let (rest, _) = trivia(input);
    Ok((rest, ()))
}

// ===== Tokens =====

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.'),
    ))(input)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    verify(identifier, move |ident: &str| ident == word)
}

fn string_literal(input: &str) -> IResult<&str, String> {
    map(
        alt((
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        )),
        |s: &str| s.to_string(),
    )(input)
}

fn integer(input: &str) -> IResult<&str, i64> {
    let (rest, (sign, digits)) = pair(
        opt(one_of("+-")),
        alt((recognize(pair(tag("0x"), hex_digit1)), digit1)),
    )(input)?;
    let parsed = if let Some(hex) = digits.strip_prefix("0x") {
        i64::from_str_radix(hex, 16)
    } else {
        digits.parse()
    };
    match parsed {
        Ok(n) => Ok((rest, if sign == Some('-') { -n } else { n })),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

/// Numeric constant: integral unless it carries a fraction or exponent.
fn number(input: &str) -> IResult<&str, ConstValue> {
    let (rest, text) = recognize(tuple((
        opt(one_of("+-")),
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)?;
    if text.contains('.') || text.contains('e') || text.contains('E') {
        match text.parse::<f64>() {
            Ok(v) => Ok((rest, ConstValue::Double(v))),
            Err(_) => Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Float,
            ))),
        }
    } else {
        // Re-parse to pick up hex handled by `integer`.
        map(integer, ConstValue::Int)(input)
    }
}

fn list_separator(input: &str) -> IResult<&str, ()> {
    value((), opt(one_of(",;")))(input)
}

// ===== Types =====

fn type_expr(input: &str) -> IResult<&str, TypeExpr> {
    let (rest, word) = identifier(input)?;
    match word {
        "list" | "set" => {
            let (rest, inner) = delimited(
                preceded(sp, char('<')),
                preceded(sp, type_expr),
                preceded(sp, char('>')),
            )(rest)?;
            let inner = Box::new(inner);
            Ok((
                rest,
                if word == "list" {
                    TypeExpr::List(inner)
                } else {
                    TypeExpr::Set(inner)
                },
            ))
        }
        "map" => {
            let (rest, (key, value_ty)) = delimited(
                preceded(sp, char('<')),
                pair(
                    preceded(sp, type_expr),
                    preceded(tuple((sp, char(','), sp)), type_expr),
                ),
                preceded(sp, char('>')),
            )(rest)?;
            Ok((rest, TypeExpr::Map(Box::new(key), Box::new(value_ty))))
        }
        "bool" => Ok((rest, TypeExpr::Base(BaseType::Bool))),
        "byte" => Ok((rest, TypeExpr::Base(BaseType::Byte))),
        "i8" => Ok((rest, TypeExpr::Base(BaseType::I8))),
        "i16" => Ok((rest, TypeExpr::Base(BaseType::I16))),
        "i32" => Ok((rest, TypeExpr::Base(BaseType::I32))),
        "i64" => Ok((rest, TypeExpr::Base(BaseType::I64))),
        "double" => Ok((rest, TypeExpr::Base(BaseType::Double))),
        "string" => Ok((rest, TypeExpr::Base(BaseType::String))),
        "binary" => Ok((rest, TypeExpr::Base(BaseType::Binary))),
        "void" => Ok((rest, TypeExpr::Base(BaseType::Void))),
        _ => Ok((rest, TypeExpr::Named(word.to_string()))),
    }
}

// ===== Constants =====

fn const_value(input: &str) -> IResult<&str, ConstValue> {
    alt((
        map(keyword("true"), |_| ConstValue::Bool(true)),
        map(keyword("false"), |_| ConstValue::Bool(false)),
        map(string_literal, ConstValue::Str),
        number,
        const_list,
        const_map,
        map(identifier, |s: &str| ConstValue::Ident(s.to_string())),
    ))(input)
}

fn const_list(input: &str) -> IResult<&str, ConstValue> {
    map(
        delimited(
            char('['),
            many0(delimited(sp, const_value, preceded(sp, list_separator))),
            preceded(sp, char(']')),
        ),
        ConstValue::List,
    )(input)
}

fn const_map(input: &str) -> IResult<&str, ConstValue> {
    let entry = map(
        tuple((
            preceded(sp, const_value),
            preceded(tuple((sp, char(':'), sp)), const_value),
            preceded(sp, list_separator),
        )),
        |(key, value, ())| (key, value),
    );
    map(
        delimited(char('{'), many0(entry), preceded(sp, char('}'))),
        ConstValue::Map,
    )(input)
}

// ===== Fields =====

fn field(input: &str) -> IResult<&str, FieldNode> {
    let (input, _) = sp(input)?;
    let (input, id) = opt(terminated(integer, preceded(sp, char(':'))))(input)?;
    let (input, _) = sp(input)?;
    let (input, requiredness) = opt(alt((
        value(Requiredness::Required, keyword("required")),
        value(Requiredness::Optional, keyword("optional")),
    )))(input)?;
    let (input, _) = sp(input)?;
    let (input, ty) = type_expr(input)?;
    let (input, _) = sp(input)?;
    let (input, name) = identifier(input)?;
    let (input, default) = opt(preceded(tuple((sp, char('='), sp)), const_value))(input)?;
    let (input, _) = sp(input)?;
    let (input, ()) = list_separator(input)?;
    Ok((
        input,
        FieldNode {
            id,
            requiredness,
            ty,
            name: name.to_string(),
            default,
        },
    ))
}

fn fields_block(input: &str) -> IResult<&str, Vec<FieldNode>> {
    delimited(
        preceded(sp, char('{')),
        many0(field),
        preceded(sp, char('}')),
    )(input)
}

// ===== Definitions =====

fn include_def(input: &str) -> IResult<&str, Statement> {
    map(
        preceded(pair(keyword("include"), sp), string_literal),
        |path| Statement::Include { path },
    )(input)
}

fn namespace_def(input: &str) -> IResult<&str, ()> {
    let (input, _) = keyword("namespace")(input)?;
    let (input, _) = preceded(sp, alt((identifier, tag("*"))))(input)?;
    let (input, _) = preceded(sp, identifier)(input)?;
    Ok((input, ()))
}

fn cpp_include_def(input: &str) -> IResult<&str, ()> {
    let (input, _) = keyword("cpp_include")(input)?;
    let (input, _) = preceded(sp, string_literal)(input)?;
    Ok((input, ()))
}

fn typedef_def(input: &str) -> IResult<&str, TypedefNode> {
    let (input, _) = keyword("typedef")(input)?;
    let (input, ty) = preceded(sp, type_expr)(input)?;
    let (input, name) = preceded(sp, identifier)(input)?;
    let (input, _) = preceded(sp, list_separator)(input)?;
    Ok((
        input,
        TypedefNode {
            name: name.to_string(),
            ty,
            doc: None,
        },
    ))
}

fn enum_member(input: &str) -> IResult<&str, (String, Option<i64>)> {
    let (input, _) = sp(input)?;
    let (input, name) = identifier(input)?;
    let (input, explicit) = opt(preceded(tuple((sp, char('='), sp)), integer))(input)?;
    let (input, _) = preceded(sp, list_separator)(input)?;
    Ok((input, (name.to_string(), explicit)))
}

fn enum_def(input: &str) -> IResult<&str, EnumNode> {
    let (input, _) = keyword("enum")(input)?;
    let (input, name) = preceded(sp, identifier)(input)?;
    let (input, members) = delimited(
        preceded(sp, char('{')),
        many0(enum_member),
        preceded(sp, char('}')),
    )(input)?;
    Ok((
        input,
        EnumNode {
            name: name.to_string(),
            members,
            doc: None,
        },
    ))
}

fn const_def(input: &str) -> IResult<&str, ConstNode> {
    let (input, _) = keyword("const")(input)?;
    let (input, ty) = preceded(sp, type_expr)(input)?;
    let (input, name) = preceded(sp, identifier)(input)?;
    let (input, value) = preceded(tuple((sp, char('='), sp)), const_value)(input)?;
    let (input, _) = preceded(sp, list_separator)(input)?;
    Ok((
        input,
        ConstNode {
            name: name.to_string(),
            ty,
            value,
            doc: None,
        },
    ))
}

fn struct_def(input: &str) -> IResult<&str, StructNode> {
    let (input, kind) = alt((
        value(StructKind::Struct, keyword("struct")),
        value(StructKind::Union, keyword("union")),
        value(StructKind::Exception, keyword("exception")),
    ))(input)?;
    let (input, name) = preceded(sp, identifier)(input)?;
    let (input, fields) = fields_block(input)?;
    Ok((
        input,
        StructNode {
            kind,
            name: name.to_string(),
            fields,
            doc: None,
        },
    ))
}

fn function(input: &str) -> IResult<&str, FunctionNode> {
    let (input, _) = sp(input)?;
    let (input, oneway) = opt(terminated(keyword("oneway"), sp))(input)?;
    let (input, ret) = type_expr(input)?;
    let (input, name) = preceded(sp, identifier)(input)?;
    let (input, args) = delimited(
        preceded(sp, char('(')),
        many0(field),
        preceded(sp, char(')')),
    )(input)?;
    let (input, throws) = opt(preceded(
        tuple((sp, keyword("throws"))),
        delimited(
            preceded(sp, char('(')),
            many0(field),
            preceded(sp, char(')')),
        ),
    ))(input)?;
    let (input, _) = preceded(sp, list_separator)(input)?;
    Ok((
        input,
        FunctionNode {
            oneway: oneway.is_some(),
            ret,
            name: name.to_string(),
            args,
            throws: throws.unwrap_or_default(),
            doc: None,
        },
    ))
}

fn service_def(input: &str) -> IResult<&str, ServiceNode> {
    let (input, _) = keyword("service")(input)?;
    let (input, name) = preceded(sp, identifier)(input)?;
    let (input, extends) = opt(preceded(
        tuple((sp, keyword("extends"), sp)),
        identifier,
    ))(input)?;
    let (input, functions) = delimited(
        preceded(sp, char('{')),
        many0(function),
        preceded(sp, char('}')),
    )(input)?;
    Ok((
        input,
        ServiceNode {
            name: name.to_string(),
            extends: extends.map(String::from),
            functions,
            doc: None,
        },
    ))
}

fn statement(input: &str) -> IResult<&str, Option<Statement>> {
    alt((
        map(include_def, Some),
        value(None, namespace_def),
        value(None, cpp_include_def),
        map(map(typedef_def, Statement::Typedef), Some),
        map(map(enum_def, Statement::Enum), Some),
        map(map(const_def, Statement::Const), Some),
        map(map(struct_def, Statement::Struct), Some),
        map(map(service_def, Statement::Service), Some),
    ))(input)
}
