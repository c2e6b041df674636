use crate::error::{ReportError, Result};
use std::collections::BTreeMap;

/// A parsed row formula. The grammar covers arithmetic (`+ - * / % **`),
/// comparisons (`== != < <= > >=`, yielding 1.0/0.0), parentheses, numeric
/// literals, references to other rows' codes, and a fixed function
/// whitelist. Nothing else tokenizes, so arbitrary code cannot reach the
/// evaluator by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFormula {
    expr: Expr,
    source: String,
}

impl CompiledFormula {
    pub fn compile(source: &str) -> Result<CompiledFormula> {
        let tokens = tokenize(source).map_err(|details| ReportError::Formula {
            formula: source.to_string(),
            details,
        })?;
        let expr = Parser::new(tokens)
            .parse()
            .map_err(|details| ReportError::Formula {
                formula: source.to_string(),
                details,
            })?;
        Ok(CompiledFormula {
            expr,
            source: source.to_string(),
        })
    }

    /// Evaluates against one period's bindings of reference code to value.
    pub fn evaluate(&self, bindings: &BTreeMap<String, f64>) -> Result<f64> {
        let value = eval(&self.expr, bindings).map_err(|details| ReportError::Formula {
            formula: self.source.clone(),
            details,
        })?;
        if !value.is_finite() {
            return Err(ReportError::Formula {
                formula: self.source.clone(),
                details: "result is not finite".to_string(),
            });
        }
        Ok(value)
    }

    /// Reference codes the formula reads, in order of first appearance.
    pub fn references(&self) -> Vec<String> {
        let mut found = Vec::new();
        collect_references(&self.expr, &mut found);
        found
    }
}

/// Identifier scan for dependency analysis. Function names never appear
/// (they are consumed by their call sites); an unparseable formula yields no
/// references, since its row will compute to zeros anyway.
pub fn extract_references(source: &str) -> Vec<String> {
    match CompiledFormula::compile(source) {
        Ok(compiled) => compiled.references(),
        Err(_) => Vec::new(),
    }
}

fn collect_references(expr: &Expr, found: &mut Vec<String>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Reference(name) => {
            if !found.iter().any(|existing| existing == name) {
                found.push(name.clone());
            }
        }
        Expr::Unary { operand, .. } => collect_references(operand, found),
        Expr::Binary { left, right, .. } => {
            collect_references(left, found);
            collect_references(right, found);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_references(arg, found);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    StarStar,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Token::Number(number));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::StarStar);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err("'=' must be '=='".to_string());
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    return Err("'!' must be '!='".to_string());
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Reference(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Abs,
    Round,
    Min,
    Max,
    Sum,
    Sqrt,
    Pow,
    Ceil,
    Floor,
}

impl Function {
    fn from_name(name: &str) -> Option<Function> {
        match name {
            "abs" => Some(Function::Abs),
            "round" => Some(Function::Round),
            "min" => Some(Function::Min),
            "max" => Some(Function::Max),
            "sum" => Some(Function::Sum),
            "sqrt" => Some(Function::Sqrt),
            "pow" => Some(Function::Pow),
            "ceil" => Some(Function::Ceil),
            "floor" => Some(Function::Floor),
            _ => None,
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    fn parse(mut self) -> std::result::Result<Expr, String> {
        if self.tokens.is_empty() {
            return Err("empty formula".to_string());
        }
        let expr = self.comparison()?;
        match self.peek() {
            None => Ok(expr),
            Some(token) => Err(format!("unexpected trailing token {:?}", token)),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn comparison(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.additive()?;
        while let Some(op) = match self.peek() {
            Some(Token::EqEq) => Some(BinaryOp::Eq),
            Some(Token::NotEq) => Some(BinaryOp::Ne),
            Some(Token::Lt) => Some(BinaryOp::Lt),
            Some(Token::Le) => Some(BinaryOp::Le),
            Some(Token::Gt) => Some(BinaryOp::Gt),
            Some(Token::Ge) => Some(BinaryOp::Ge),
            _ => None,
        } {
            self.advance();
            let right = self.additive()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn additive(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.multiplicative()?;
        while let Some(op) = match self.peek() {
            Some(Token::Plus) => Some(BinaryOp::Add),
            Some(Token::Minus) => Some(BinaryOp::Sub),
            _ => None,
        } {
            self.advance();
            let right = self.multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.unary()?;
        while let Some(op) = match self.peek() {
            Some(Token::Star) => Some(BinaryOp::Mul),
            Some(Token::Slash) => Some(BinaryOp::Div),
            Some(Token::Percent) => Some(BinaryOp::Rem),
            _ => None,
        } {
            self.advance();
            let right = self.unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    // Unary minus binds looser than `**`, so -2**2 is -(2**2).
    fn unary(&mut self) -> std::result::Result<Expr, String> {
        if self.peek() == Some(&Token::Minus) {
            self.advance();
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.power()
    }

    // Right-associative, and the exponent may itself be signed: 2**-3.
    fn power(&mut self) -> std::result::Result<Expr, String> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::StarStar) {
            self.advance();
            let exponent = self.unary()?;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn primary(&mut self) -> std::result::Result<Expr, String> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    let function = Function::from_name(&name)
                        .ok_or_else(|| format!("unknown function '{}'", name))?;
                    self.advance();
                    let args = self.arguments()?;
                    Ok(Expr::Call { function, args })
                } else {
                    Ok(Expr::Reference(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.comparison()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(expr),
                    _ => Err("expected ')'".to_string()),
                }
            }
            Some(token) => Err(format!("unexpected token {:?}", token)),
            None => Err("unexpected end of formula".to_string()),
        }
    }

    fn arguments(&mut self) -> std::result::Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.comparison()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => return Err("expected ',' or ')' in argument list".to_string()),
            }
        }
    }
}

fn eval(
    expr: &Expr,
    bindings: &BTreeMap<String, f64>,
) -> std::result::Result<f64, String> {
    match expr {
        Expr::Number(value) => Ok(*value),
        Expr::Reference(name) => bindings
            .get(name)
            .copied()
            .ok_or_else(|| format!("unknown reference '{}'", name)),
        Expr::Unary {
            op: UnaryOp::Neg,
            operand,
        } => Ok(-eval(operand, bindings)?),
        Expr::Binary { op, left, right } => {
            let lhs = eval(left, bindings)?;
            let rhs = eval(right, bindings)?;
            match op {
                BinaryOp::Add => Ok(lhs + rhs),
                BinaryOp::Sub => Ok(lhs - rhs),
                BinaryOp::Mul => Ok(lhs * rhs),
                BinaryOp::Div => {
                    if rhs == 0.0 {
                        Err("division by zero".to_string())
                    } else {
                        Ok(lhs / rhs)
                    }
                }
                BinaryOp::Rem => {
                    if rhs == 0.0 {
                        Err("remainder by zero".to_string())
                    } else {
                        Ok(lhs % rhs)
                    }
                }
                BinaryOp::Pow => Ok(lhs.powf(rhs)),
                BinaryOp::Eq => Ok(bool_value(lhs == rhs)),
                BinaryOp::Ne => Ok(bool_value(lhs != rhs)),
                BinaryOp::Lt => Ok(bool_value(lhs < rhs)),
                BinaryOp::Le => Ok(bool_value(lhs <= rhs)),
                BinaryOp::Gt => Ok(bool_value(lhs > rhs)),
                BinaryOp::Ge => Ok(bool_value(lhs >= rhs)),
            }
        }
        Expr::Call { function, args } => {
            let values = args
                .iter()
                .map(|arg| eval(arg, bindings))
                .collect::<std::result::Result<Vec<f64>, String>>()?;
            apply_function(*function, &values)
        }
    }
}

fn bool_value(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

fn apply_function(function: Function, args: &[f64]) -> std::result::Result<f64, String> {
    match function {
        Function::Abs => {
            expect_args("abs", args, 1)?;
            Ok(args[0].abs())
        }
        Function::Round => {
            if args.is_empty() || args.len() > 2 {
                return Err("round expects 1 or 2 arguments".to_string());
            }
            let digits = if args.len() == 2 { args[1] as i32 } else { 0 };
            let factor = 10f64.powi(digits);
            Ok((args[0] * factor).round() / factor)
        }
        Function::Min => {
            at_least_one("min", args)?;
            Ok(args.iter().copied().fold(f64::INFINITY, f64::min))
        }
        Function::Max => {
            at_least_one("max", args)?;
            Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max))
        }
        Function::Sum => {
            at_least_one("sum", args)?;
            Ok(args.iter().sum())
        }
        Function::Sqrt => {
            expect_args("sqrt", args, 1)?;
            if args[0] < 0.0 {
                Err("sqrt of a negative value".to_string())
            } else {
                Ok(args[0].sqrt())
            }
        }
        Function::Pow => {
            expect_args("pow", args, 2)?;
            Ok(args[0].powf(args[1]))
        }
        Function::Ceil => {
            expect_args("ceil", args, 1)?;
            Ok(args[0].ceil())
        }
        Function::Floor => {
            expect_args("floor", args, 1)?;
            Ok(args[0].floor())
        }
    }
}

fn expect_args(name: &str, args: &[f64], count: usize) -> std::result::Result<(), String> {
    if args.len() != count {
        return Err(format!(
            "{} expects {} argument(s), got {}",
            name,
            count,
            args.len()
        ));
    }
    Ok(())
}

fn at_least_one(name: &str, args: &[f64]) -> std::result::Result<(), String> {
    if args.is_empty() {
        return Err(format!("{} expects at least one argument", name));
    }
    Ok(())
}
