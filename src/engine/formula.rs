// ==========================================
// 定制产品配置报价系统 - 公式求值引擎
// ==========================================
// 红线: 封闭算术文法 — 数字字面量、已绑定变量、+ - * / ^、括号, 仅此而已
// 红线: 文法外的任何记号都导致解析失败（fail-closed）, 绝不静默纠偏
// 红线: 纯函数 — 相同 (formula, context) 恒得相同结果, 无全局状态
// ==========================================
// 职责: 管理端录入的公式文本 -> 表达式树 -> 数值
// 输入: 公式文本 + 变量绑定表
// 输出: f64 或类型化错误
// ==========================================

use crate::engine::error::{EngineError, EngineResult};
use std::collections::HashMap;

/// 公式文本默认最大长度（可由 config_kv formula/max_length 覆写）
pub const DEFAULT_MAX_FORMULA_LENGTH: usize = 512;

// ==========================================
// Token - 词法记号
// ==========================================
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

// ==========================================
// Expr - 表达式树
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Negate(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
}

// ==========================================
// 词法分析
// ==========================================
fn tokenize(formula: &str) -> EngineResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = formula.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            ' ' | '\t' => {
                i += 1;
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
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Caret);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                let mut seen_dot = false;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    if chars[i] == '.' {
                        if seen_dot {
                            return Err(EngineError::MalformedFormula(format!(
                                "数字字面量含多个小数点, 位置 {}",
                                i
                            )));
                        }
                        seen_dot = true;
                    }
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let n = raw.parse::<f64>().map_err(|_| {
                    EngineError::MalformedFormula(format!("非法数字字面量: {:?}", raw))
                })?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            // 文法外记号: 直接失败, 不做任何猜测性纠偏
            other => {
                return Err(EngineError::MalformedFormula(format!(
                    "不支持的符号 {:?}, 位置 {}",
                    other, i
                )));
            }
        }
    }

    if tokens.is_empty() {
        return Err(EngineError::MalformedFormula("公式为空".to_string()));
    }

    Ok(tokens)
}

// ==========================================
// 语法分析（递归下降）
// ==========================================
// 优先级: ^ (右结合) > 一元负号 > * / > + -
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    // additive := multiplicative (('+' | '-') multiplicative)*
    fn parse_additive(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    let rhs = self.parse_multiplicative()?;
                    lhs = Expr::Add(Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Minus) => {
                    self.advance();
                    let rhs = self.parse_multiplicative()?;
                    lhs = Expr::Sub(Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    // multiplicative := unary (('*' | '/') unary)*
    fn parse_multiplicative(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.advance();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Mul(Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Slash) => {
                    self.advance();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Div(Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    // unary := '-' unary | power
    fn parse_unary(&mut self) -> EngineResult<Expr> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Negate(Box::new(inner)));
        }
        self.parse_power()
    }

    // power := atom ('^' unary)?   -- 右结合, 且比一元负号结合更紧: -2^2 = -(2^2)
    fn parse_power(&mut self) -> EngineResult<Expr> {
        let base = self.parse_atom()?;
        if matches!(self.peek(), Some(Token::Caret)) {
            self.advance();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Pow(Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    // atom := NUMBER | IDENT | '(' additive ')'
    fn parse_atom(&mut self) -> EngineResult<Expr> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => Ok(Expr::Variable(name)),
            Some(Token::LParen) => {
                let inner = self.parse_additive()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(EngineError::MalformedFormula("括号未闭合".to_string())),
                }
            }
            Some(other) => Err(EngineError::MalformedFormula(format!(
                "意外记号: {:?}",
                other
            ))),
            None => Err(EngineError::MalformedFormula("公式意外截断".to_string())),
        }
    }
}

/// 解析公式文本为表达式树
pub fn parse(formula: &str) -> EngineResult<Expr> {
    let tokens = tokenize(formula)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_additive()?;

    // 尾部残留记号同样视为格式错误
    if parser.pos != parser.tokens.len() {
        return Err(EngineError::MalformedFormula(format!(
            "公式尾部存在多余记号: {:?}",
            parser.tokens[parser.pos]
        )));
    }

    Ok(expr)
}

/// 对表达式树求值
pub fn eval(expr: &Expr, context: &HashMap<String, f64>) -> EngineResult<f64> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Variable(name) => context
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::UnknownVariable(name.clone())),
        Expr::Negate(inner) => Ok(-eval(inner, context)?),
        Expr::Add(lhs, rhs) => Ok(eval(lhs, context)? + eval(rhs, context)?),
        Expr::Sub(lhs, rhs) => Ok(eval(lhs, context)? - eval(rhs, context)?),
        Expr::Mul(lhs, rhs) => Ok(eval(lhs, context)? * eval(rhs, context)?),
        Expr::Div(lhs, rhs) => {
            let divisor = eval(rhs, context)?;
            if divisor == 0.0 {
                return Err(EngineError::DivisionByZero("除数为零".to_string()));
            }
            Ok(eval(lhs, context)? / divisor)
        }
        Expr::Pow(base, exponent) => Ok(eval(base, context)?.powf(eval(exponent, context)?)),
    }
}

// ==========================================
// FormulaEngine - 公式求值引擎
// ==========================================
pub struct FormulaEngine {
    max_length: usize,
}

impl Default for FormulaEngine {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_FORMULA_LENGTH,
        }
    }
}

impl FormulaEngine {
    /// 创建指定长度上限的引擎实例
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// 求值公式
    ///
    /// # 参数
    /// - formula: 公式文本
    /// - context: 变量绑定表
    ///
    /// # 错误
    /// - `MalformedFormula`: 语法错误 / 文法外记号 / 超长
    /// - `UnknownVariable`: 引用的变量不在 context 中
    /// - `DivisionByZero`: 除零
    pub fn evaluate(&self, formula: &str, context: &HashMap<String, f64>) -> EngineResult<f64> {
        if formula.len() > self.max_length {
            return Err(EngineError::MalformedFormula(format!(
                "公式长度 {} 超过上限 {}",
                formula.len(),
                self.max_length
            )));
        }
        let expr = parse(formula)?;
        eval(&expr, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn evaluate(formula: &str, context: &HashMap<String, f64>) -> EngineResult<f64> {
        FormulaEngine::default().evaluate(formula, context)
    }

    #[test]
    fn test_literals_and_arithmetic() {
        let empty = ctx(&[]);
        assert_eq!(evaluate("1 + 2 * 3", &empty).unwrap(), 7.0);
        assert_eq!(evaluate("(1 + 2) * 3", &empty).unwrap(), 9.0);
        assert_eq!(evaluate("10 - 4 - 3", &empty).unwrap(), 3.0);
        assert_eq!(evaluate("12 / 4 / 3", &empty).unwrap(), 1.0);
        assert_eq!(evaluate("2.5 * 4", &empty).unwrap(), 10.0);
    }

    #[test]
    fn test_power_right_associative() {
        let empty = ctx(&[]);
        // 2^3^2 = 2^(3^2) = 512
        assert_eq!(evaluate("2 ^ 3 ^ 2", &empty).unwrap(), 512.0);
        // ^ 比一元负号结合更紧: -2^2 = -(2^2) = -4
        assert_eq!(evaluate("-2 ^ 2", &empty).unwrap(), -4.0);
        assert_eq!(evaluate("(-2) ^ 2", &empty).unwrap(), 4.0);
    }

    #[test]
    fn test_variables() {
        let context = ctx(&[("width", 48.0), ("height", 60.0)]);
        assert_eq!(evaluate("width * height / 144", &context).unwrap(), 20.0);
        assert_eq!(evaluate("width + height", &context).unwrap(), 108.0);
    }

    #[test]
    fn test_area_pricing_scenario() {
        // 技术参数 area = width*height/144, 价格贡献 = area * 15.50
        let context = ctx(&[("width", 48.0), ("height", 60.0)]);
        let area = evaluate("width * height / 144", &context).unwrap();
        assert_eq!(area, 20.0);

        let mut with_area = context.clone();
        with_area.insert("area".to_string(), area);
        let price = evaluate("area * 15.50", &with_area).unwrap();
        assert!((price - 310.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_variable() {
        let context = ctx(&[("width", 48.0)]);
        let err = evaluate("width * height", &context).unwrap_err();
        assert!(matches!(err, EngineError::UnknownVariable(name) if name == "height"));
    }

    #[test]
    fn test_division_by_zero() {
        let context = ctx(&[("x", 0.0)]);
        assert!(matches!(
            evaluate("1 / 0", &context).unwrap_err(),
            EngineError::DivisionByZero(_)
        ));
        assert!(matches!(
            evaluate("10 / x", &context).unwrap_err(),
            EngineError::DivisionByZero(_)
        ));
    }

    #[test]
    fn test_rejects_tokens_outside_grammar() {
        // fail-closed: 任何文法外记号都整体拒绝, 不做部分求值
        let empty = ctx(&[]);
        for formula in [
            "1 + 2; drop table",
            "max(1, 2)",
            "x = 1",
            "1 & 2",
            "\"abc\"",
            "a.b",
            "2 % 3",
        ] {
            assert!(
                matches!(
                    evaluate(formula, &empty).unwrap_err(),
                    EngineError::MalformedFormula(_) | EngineError::UnknownVariable(_)
                ),
                "应拒绝: {}",
                formula
            );
        }
    }

    #[test]
    fn test_malformed_syntax() {
        let empty = ctx(&[]);
        for formula in ["", "1 +", "(1 + 2", "1 2", "* 3", "1..5", ")", "+"] {
            assert!(
                matches!(
                    evaluate(formula, &empty).unwrap_err(),
                    EngineError::MalformedFormula(_)
                ),
                "应判定为格式错误: {:?}",
                formula
            );
        }
    }

    #[test]
    fn test_length_limit() {
        let engine = FormulaEngine::new(8);
        let empty = ctx(&[]);
        assert!(matches!(
            engine.evaluate("1 + 2 + 3 + 4", &empty).unwrap_err(),
            EngineError::MalformedFormula(_)
        ));
        assert_eq!(engine.evaluate("1 + 2", &empty).unwrap(), 3.0);
    }

    #[test]
    fn test_deterministic() {
        let context = ctx(&[("base_price", 200.0), ("value", 3.0)]);
        let first = evaluate("base_price * value ^ 2 / 8", &context).unwrap();
        let second = evaluate("base_price * value ^ 2 / 8", &context).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, 225.0);
    }
}
