//! Derived-metric formulas.
//!
//! A formula is arithmetic over result column names and numeric literals:
//! `failed_count / total_count * 100`. Supported: `+ - * /`, unary minus,
//! parentheses. A null operand or a division by zero makes the result null.

use crate::error::{InsightError, InsightResult};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Column(String),
    Neg(Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr:   Expr,
}

impl Formula {
    pub fn parse(source: &str) -> InsightResult<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens: &tokens, pos: 0, source };
        let expr = parser.expr()?;
        if parser.pos != tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(Self { source: source.to_string(), expr })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Column names referenced by the formula, in order of appearance.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_columns(&self.expr, &mut out);
        out
    }

    /// Evaluate with `lookup` resolving column values (None = null).
    pub fn eval<F>(&self, lookup: &F) -> Option<f64>
    where
        F: Fn(&str) -> Option<f64>,
    {
        eval(&self.expr, lookup).filter(|v| v.is_finite())
    }
}

fn collect_columns<'a>(expr: &'a Expr, out: &mut Vec<&'a str>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Column(name) => {
            if !out.contains(&name.as_str()) {
                out.push(name);
            }
        }
        Expr::Neg(inner) => collect_columns(inner, out),
        Expr::Binary(l, _, r) => {
            collect_columns(l, out);
            collect_columns(r, out);
        }
    }
}

fn eval<F>(expr: &Expr, lookup: &F) -> Option<f64>
where
    F: Fn(&str) -> Option<f64>,
{
    match expr {
        Expr::Number(n) => Some(*n),
        Expr::Column(name) => lookup(name),
        Expr::Neg(inner) => eval(inner, lookup).map(|v| -v),
        Expr::Binary(l, op, r) => {
            let (l, r) = (eval(l, lookup)?, eval(r, lookup)?);
            match op {
                BinOp::Add => Some(l + r),
                BinOp::Sub => Some(l - r),
                BinOp::Mul => Some(l * r),
                BinOp::Div if r == 0.0 => None,
                BinOp::Div => Some(l / r),
            }
        }
    }
}

fn tokenize(source: &str) -> InsightResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '+' => { tokens.push(Token::Plus); i += 1; }
            '-' => { tokens.push(Token::Minus); i += 1; }
            '*' => { tokens.push(Token::Star); i += 1; }
            '/' => { tokens.push(Token::Slash); i += 1; }
            '(' => { tokens.push(Token::LParen); i += 1; }
            ')' => { tokens.push(Token::RParen); i += 1; }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<f64>().map_err(|_| {
                    InsightError::PlanValidation(format!("bad number '{text}' in formula '{source}'"))
                })?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(InsightError::PlanValidation(format!(
                    "unexpected character '{other}' in formula '{source}'"
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos:    usize,
    source: &'a str,
}

impl Parser<'_> {
    fn error(&self, msg: &str) -> InsightError {
        InsightError::PlanValidation(format!("{msg} in formula '{}'", self.source))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> InsightResult<Expr> {
        let mut left = self.term()?;
        while let Some(op) = match self.peek() {
            Some(Token::Plus)  => Some(BinOp::Add),
            Some(Token::Minus) => Some(BinOp::Sub),
            _ => None,
        } {
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    // term := unary (('*' | '/') unary)*
    fn term(&mut self) -> InsightResult<Expr> {
        let mut left = self.unary()?;
        while let Some(op) = match self.peek() {
            Some(Token::Star)  => Some(BinOp::Mul),
            Some(Token::Slash) => Some(BinOp::Div),
            _ => None,
        } {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    // unary := '-' unary | atom
    fn unary(&mut self) -> InsightResult<Expr> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> InsightResult<Expr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => Ok(Expr::Column(name)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("missing ')'")),
                }
            }
            _ => Err(self.error("expected a number, column or '('")),
        }
    }
}
