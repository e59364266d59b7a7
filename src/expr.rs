//! Expression Evaluation
//!
//! The compiler consumes expressions through the [`ExpressionParser`] and
//! [`Expression`] traits only. [`Parser`] is the default implementation: a
//! forgiving evaluator for a JavaScript-like subset (literals, identifiers,
//! member/index access, calls, array/object literals, unary/binary/logical
//! operators, ternaries, assignment and `;` sequences).
//!
//! Forgiving means property reads through `undefined`/`null` yield
//! `undefined`, and calling an undefined function yields `undefined`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::scope::Scope;
use crate::value::Value;

// ═══════════════════════════════════════════════════════════════════════════════
// COLLABORATOR INTERFACE
// ═══════════════════════════════════════════════════════════════════════════════

pub trait Expression {
    fn source(&self) -> &str;

    /// Evaluates against `scope`; own properties of `locals` shadow scope lookup.
    fn eval(&self, scope: &Scope, locals: Option<&Value>) -> Result<Value>;

    fn assign(&self, scope: &Scope, value: Value) -> Result<()>;

    fn is_assignable(&self) -> bool;

    /// Top-level array or object literal (fresh value on every evaluation).
    fn is_literal(&self) -> bool;

    fn is_constant(&self) -> bool;
}

pub trait ExpressionParser {
    fn parse(&self, source: &str) -> Result<Rc<dyn Expression>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEXER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
}

const OPERATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "+", "-", "*", "/", "%", "!",
    "=", "?", ":", ".", ",", "(", ")", "[", "]", "{", "}", ";",
];

fn syntax_error(source: &str, message: impl Into<String>) -> Error {
    Error::Parse {
        expression: source.to_string(),
        message: message.into(),
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()))
        {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                i += 1;
                if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                    i += 1;
                }
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let number = text
                .parse::<f64>()
                .map_err(|_| syntax_error(source, format!("invalid number '{}'", text)))?;
            tokens.push(Token::Number(number));
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let mut value = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(syntax_error(source, "unterminated string")),
                    Some(&ch) if ch == quote => {
                        i += 1;
                        break;
                    }
                    Some('\\') => {
                        match chars.get(i + 1) {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some('r') => value.push('\r'),
                            Some(&other) => value.push(other),
                            None => return Err(syntax_error(source, "unterminated string")),
                        }
                        i += 2;
                    }
                    Some(&ch) => {
                        value.push(ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Str(value));
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            Some(op) => {
                tokens.push(Token::Op(op));
                i += op.chars().count();
            }
            None => return Err(syntax_error(source, format!("unexpected character '{}'", c))),
        }
    }

    Ok(tokens)
}

// ═══════════════════════════════════════════════════════════════════════════════
// AST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum Ast {
    Literal(Value),
    Ident(String),
    Member(Box<Ast>, String),
    Index(Box<Ast>, Box<Ast>),
    Call(Box<Ast>, Vec<Ast>),
    Array(Vec<Ast>),
    Object(Vec<(String, Ast)>),
    Unary(&'static str, Box<Ast>),
    Binary(&'static str, Box<Ast>, Box<Ast>),
    Ternary(Box<Ast>, Box<Ast>, Box<Ast>),
    Assign(Box<Ast>, Box<Ast>),
    Sequence(Vec<Ast>),
}

impl Ast {
    fn is_constant(&self) -> bool {
        match self {
            Ast::Literal(_) => true,
            Ast::Array(items) => items.iter().all(Ast::is_constant),
            Ast::Object(entries) => entries.iter().all(|(_, v)| v.is_constant()),
            Ast::Unary(_, operand) => operand.is_constant(),
            Ast::Binary(_, a, b) => a.is_constant() && b.is_constant(),
            Ast::Ternary(c, a, b) => c.is_constant() && a.is_constant() && b.is_constant(),
            Ast::Sequence(items) => items.iter().all(Ast::is_constant),
            _ => false,
        }
    }
}

struct AstBuilder<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> AstBuilder<'a> {
    fn peek_op(&self, op: &str) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Op(o)) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.peek_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(syntax_error(
                self.source,
                format!("expected '{}' at token {}", op, self.pos),
            ))
        }
    }

    fn program(&mut self) -> Result<Ast> {
        let mut statements = Vec::new();
        loop {
            while self.eat_op(";") {}
            if self.pos >= self.tokens.len() {
                break;
            }
            statements.push(self.assignment()?);
            if self.pos < self.tokens.len() && !self.peek_op(";") {
                return Err(syntax_error(
                    self.source,
                    format!("unexpected token {:?}", self.tokens[self.pos]),
                ));
            }
        }
        Ok(match statements.len() {
            0 => Ast::Literal(Value::Undefined),
            1 => statements.remove(0),
            _ => Ast::Sequence(statements),
        })
    }

    fn assignment(&mut self) -> Result<Ast> {
        let left = self.ternary()?;
        if self.eat_op("=") {
            if !matches!(left, Ast::Ident(_) | Ast::Member(..) | Ast::Index(..)) {
                return Err(syntax_error(self.source, "invalid assignment target"));
            }
            let right = self.assignment()?;
            return Ok(Ast::Assign(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn ternary(&mut self) -> Result<Ast> {
        let test = self.binary(0)?;
        if self.eat_op("?") {
            let consequent = self.assignment()?;
            self.expect_op(":")?;
            let alternate = self.assignment()?;
            return Ok(Ast::Ternary(
                Box::new(test),
                Box::new(consequent),
                Box::new(alternate),
            ));
        }
        Ok(test)
    }

    fn binary(&mut self, level: usize) -> Result<Ast> {
        const LEVELS: &[&[&str]] = &[
            &["||"],
            &["&&"],
            &["===", "!==", "==", "!="],
            &["<", ">", "<=", ">="],
            &["+", "-"],
            &["*", "/", "%"],
        ];
        if level == LEVELS.len() {
            return self.unary();
        }
        let mut left = self.binary(level + 1)?;
        loop {
            let op = match self.tokens.get(self.pos) {
                Some(Token::Op(o)) if LEVELS[level].contains(o) => *o,
                _ => break,
            };
            self.pos += 1;
            let right = self.binary(level + 1)?;
            left = Ast::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Ast> {
        for op in ["!", "-", "+"] {
            if self.eat_op(op) {
                let operand = self.unary()?;
                return Ok(Ast::Unary(op, Box::new(operand)));
            }
        }
        let primary = self.primary()?;
        self.postfix(primary)
    }

    fn primary(&mut self) -> Result<Ast> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| syntax_error(self.source, "unexpected end of expression"))?;
        self.pos += 1;
        match token {
            Token::Number(n) => Ok(Ast::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Ast::Literal(Value::String(s))),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Ast::Literal(Value::Bool(true)),
                "false" => Ast::Literal(Value::Bool(false)),
                "null" => Ast::Literal(Value::Null),
                "undefined" => Ast::Literal(Value::Undefined),
                "NaN" => Ast::Literal(Value::Number(f64::NAN)),
                _ => Ast::Ident(name),
            }),
            Token::Op("(") => {
                let inner = self.assignment()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Token::Op("[") => {
                let mut items = Vec::new();
                if !self.eat_op("]") {
                    loop {
                        items.push(self.assignment()?);
                        if self.eat_op("]") {
                            break;
                        }
                        self.expect_op(",")?;
                    }
                }
                Ok(Ast::Array(items))
            }
            Token::Op("{") => {
                let mut entries = Vec::new();
                if !self.eat_op("}") {
                    loop {
                        let key = match self.tokens.get(self.pos).cloned() {
                            Some(Token::Ident(k)) | Some(Token::Str(k)) => k,
                            Some(Token::Number(n)) => Value::Number(n).to_js_string(),
                            _ => return Err(syntax_error(self.source, "invalid object key")),
                        };
                        self.pos += 1;
                        let value = if self.eat_op(":") {
                            self.assignment()?
                        } else {
                            Ast::Ident(key.clone())
                        };
                        entries.push((key, value));
                        if self.eat_op("}") {
                            break;
                        }
                        self.expect_op(",")?;
                    }
                }
                Ok(Ast::Object(entries))
            }
            other => Err(syntax_error(
                self.source,
                format!("unexpected token {:?}", other),
            )),
        }
    }

    fn postfix(&mut self, mut target: Ast) -> Result<Ast> {
        loop {
            if self.eat_op(".") {
                match self.tokens.get(self.pos).cloned() {
                    Some(Token::Ident(name)) => {
                        self.pos += 1;
                        target = Ast::Member(Box::new(target), name);
                    }
                    _ => return Err(syntax_error(self.source, "expected property name")),
                }
            } else if self.eat_op("[") {
                let index = self.assignment()?;
                self.expect_op("]")?;
                target = Ast::Index(Box::new(target), Box::new(index));
            } else if self.eat_op("(") {
                let mut args = Vec::new();
                if !self.eat_op(")") {
                    loop {
                        args.push(self.assignment()?);
                        if self.eat_op(")") {
                            break;
                        }
                        self.expect_op(",")?;
                    }
                }
                target = Ast::Call(Box::new(target), args);
            } else {
                return Ok(target);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVALUATION
// ═══════════════════════════════════════════════════════════════════════════════

fn lookup(name: &str, scope: &Scope, locals: Option<&Value>) -> Value {
    if let Some(locals) = locals {
        if locals.has_own(name) {
            return locals.get(name);
        }
    }
    scope.get(name)
}

fn property_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_js_string(),
    }
}

fn eval_ast(ast: &Ast, scope: &Scope, locals: Option<&Value>) -> Result<Value> {
    Ok(match ast {
        Ast::Literal(v) => v.clone(),
        Ast::Ident(name) => lookup(name, scope, locals),
        Ast::Member(object, name) => eval_ast(object, scope, locals)?.get(name),
        Ast::Index(object, index) => {
            let object = eval_ast(object, scope, locals)?;
            let key = property_key(&eval_ast(index, scope, locals)?);
            object.get(&key)
        }
        Ast::Call(callee, args) => {
            let (this, func) = match callee.as_ref() {
                Ast::Member(object, name) => {
                    let this = eval_ast(object, scope, locals)?;
                    let func = this.get(name);
                    (this, func)
                }
                Ast::Index(object, index) => {
                    let this = eval_ast(object, scope, locals)?;
                    let key = property_key(&eval_ast(index, scope, locals)?);
                    let func = this.get(&key);
                    (this, func)
                }
                other => (Value::Undefined, eval_ast(other, scope, locals)?),
            };
            let args = args
                .iter()
                .map(|a| eval_ast(a, scope, locals))
                .collect::<Result<Vec<_>>>()?;
            if func.is_nullish() {
                Value::Undefined
            } else {
                func.call(&this, &args)?
            }
        }
        Ast::Array(items) => Value::array(
            items
                .iter()
                .map(|i| eval_ast(i, scope, locals))
                .collect::<Result<Vec<_>>>()?,
        ),
        Ast::Object(entries) => {
            let object = Value::object();
            for (key, value) in entries {
                object.set(key, eval_ast(value, scope, locals)?);
            }
            object
        }
        Ast::Unary(op, operand) => {
            let value = eval_ast(operand, scope, locals)?;
            match *op {
                "!" => Value::Bool(!value.truthy()),
                "-" => Value::Number(-value.to_number()),
                _ => Value::Number(value.to_number()),
            }
        }
        Ast::Binary("&&", left, right) => {
            let left = eval_ast(left, scope, locals)?;
            if left.truthy() {
                eval_ast(right, scope, locals)?
            } else {
                left
            }
        }
        Ast::Binary("||", left, right) => {
            let left = eval_ast(left, scope, locals)?;
            if left.truthy() {
                left
            } else {
                eval_ast(right, scope, locals)?
            }
        }
        Ast::Binary(op, left, right) => {
            let left = eval_ast(left, scope, locals)?;
            let right = eval_ast(right, scope, locals)?;
            binary(op, &left, &right)
        }
        Ast::Ternary(test, consequent, alternate) => {
            if eval_ast(test, scope, locals)?.truthy() {
                eval_ast(consequent, scope, locals)?
            } else {
                eval_ast(alternate, scope, locals)?
            }
        }
        Ast::Assign(target, value) => {
            let value = eval_ast(value, scope, locals)?;
            assign_ast(target, scope, locals, value.clone())?;
            value
        }
        Ast::Sequence(items) => {
            let mut last = Value::Undefined;
            for item in items {
                last = eval_ast(item, scope, locals)?;
            }
            last
        }
    })
}

fn binary(op: &str, left: &Value, right: &Value) -> Value {
    match op {
        "+" => {
            // Undefined operands are ignored rather than producing NaN.
            if left.is_undefined() {
                return right.clone();
            }
            if right.is_undefined() {
                return left.clone();
            }
            if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
                Value::String(format!("{}{}", left.to_js_string(), right.to_js_string()))
            } else {
                Value::Number(left.to_number() + right.to_number())
            }
        }
        "-" => Value::Number(left.to_number() - right.to_number()),
        "*" => Value::Number(left.to_number() * right.to_number()),
        "/" => Value::Number(left.to_number() / right.to_number()),
        "%" => Value::Number(left.to_number() % right.to_number()),
        "===" => Value::Bool(left.strict_eq(right)),
        "!==" => Value::Bool(!left.strict_eq(right)),
        "==" => Value::Bool(left.loose_eq(right)),
        "!=" => Value::Bool(!left.loose_eq(right)),
        "<" | ">" | "<=" | ">=" => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => a.partial_cmp(b),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            let result = match ordering {
                None => false,
                Some(ord) => match op {
                    "<" => ord.is_lt(),
                    ">" => ord.is_gt(),
                    "<=" => ord.is_le(),
                    _ => ord.is_ge(),
                },
            };
            Value::Bool(result)
        }
        _ => Value::Undefined,
    }
}

fn assign_ast(target: &Ast, scope: &Scope, locals: Option<&Value>, value: Value) -> Result<()> {
    match target {
        Ast::Ident(name) => {
            match locals {
                Some(locals) if locals.has_own(name) => {
                    locals.set(name, value);
                }
                _ => scope.set(name, value),
            }
            Ok(())
        }
        Ast::Member(object, name) => {
            let holder = ensure_object(object, scope, locals)?;
            holder.set(name, value);
            Ok(())
        }
        Ast::Index(object, index) => {
            let holder = ensure_object(object, scope, locals)?;
            let key = property_key(&eval_ast(index, scope, locals)?);
            holder.set(&key, value);
            Ok(())
        }
        _ => Err(Error::NonAssignable {
            expression: format!("{:?}", target),
            attribute: String::new(),
            directive: String::new(),
        }),
    }
}

/// Evaluates an assignment holder, creating empty objects along the path.
fn ensure_object(ast: &Ast, scope: &Scope, locals: Option<&Value>) -> Result<Value> {
    let current = eval_ast(ast, scope, locals)?;
    if !current.is_nullish() {
        return Ok(current);
    }
    let created = Value::object();
    assign_ast(ast, scope, locals, created.clone())?;
    Ok(created)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSED EXPRESSION & PARSER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct ParsedExpression {
    source: String,
    ast: Ast,
}

impl Expression for ParsedExpression {
    fn source(&self) -> &str {
        &self.source
    }

    fn eval(&self, scope: &Scope, locals: Option<&Value>) -> Result<Value> {
        eval_ast(&self.ast, scope, locals)
    }

    fn assign(&self, scope: &Scope, value: Value) -> Result<()> {
        if !self.is_assignable() {
            return Err(Error::NonAssignable {
                expression: self.source.clone(),
                attribute: String::new(),
                directive: String::new(),
            });
        }
        assign_ast(&self.ast, scope, None, value)
    }

    fn is_assignable(&self) -> bool {
        matches!(self.ast, Ast::Ident(_) | Ast::Member(..) | Ast::Index(..))
    }

    fn is_literal(&self) -> bool {
        matches!(self.ast, Ast::Array(_) | Ast::Object(_) | Ast::Literal(_))
    }

    fn is_constant(&self) -> bool {
        self.ast.is_constant()
    }
}

/// Default [`ExpressionParser`] with a per-source cache.
#[derive(Default)]
pub struct Parser {
    cache: RefCell<HashMap<String, Rc<dyn Expression>>>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExpressionParser for Parser {
    fn parse(&self, source: &str) -> Result<Rc<dyn Expression>> {
        if let Some(cached) = self.cache.borrow().get(source) {
            return Ok(Rc::clone(cached));
        }
        let tokens = tokenize(source)?;
        let mut builder = AstBuilder {
            source,
            tokens,
            pos: 0,
        };
        let ast = builder.program()?;
        let parsed: Rc<dyn Expression> = Rc::new(ParsedExpression {
            source: source.trim().to_string(),
            ast,
        });
        self.cache
            .borrow_mut()
            .insert(source.to_string(), Rc::clone(&parsed));
        Ok(parsed)
    }
}
