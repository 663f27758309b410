//! Recursive-descent parser for the MCL surface syntax.

use super::ast::*;
use super::{tokenize, ParseError, Token, TokenKind};

/// Parse a whole source file.
pub fn parse_source(source: &str) -> Result<Ast, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let token = self.peek();
        ParseError {
            line: token.line,
            column: token.column,
            message: message.into(),
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), ParseError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {what}, found {}",
                self.peek().kind.describe()
            )))
        }
    }

    fn identifier(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected {what}, found {}", other.describe()))),
        }
    }

    fn program(&mut self) -> Result<Ast, ParseError> {
        let mut items = Vec::new();
        while !self.check(&TokenKind::Eof) {
            if self.check(&TokenKind::Function) {
                items.push(Item::Function(self.function()?));
            } else if self.check(&TokenKind::Var) {
                let (name, ty, init) = self.var_binding()?;
                items.push(Item::Global { name, ty, init });
            } else {
                return Err(self.error(format!(
                    "expected `function` or `var` at top level, found {}",
                    self.peek().kind.describe()
                )));
            }
        }
        Ok(Ast { items })
    }

    fn function(&mut self) -> Result<Function, ParseError> {
        self.expect(&TokenKind::Function, "`function`")?;
        let name = self.identifier("function name")?;
        self.expect(&TokenKind::LParen, "`(`")?;

        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let name = self.identifier("parameter name")?;
                self.expect(&TokenKind::Colon, "`:`")?;
                let ty = self.parse_type()?;
                params.push(Param { name, ty });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "`)`")?;

        let return_type = if self.eat(&TokenKind::Colon) {
            self.parse_type()?
        } else {
            Type::Int
        };

        let body = self.block_statements()?;
        Ok(Function {
            name,
            params,
            return_type,
            body,
        })
    }

    fn parse_type(&mut self) -> Result<Type, ParseError> {
        let name = self.identifier("type name")?;
        let mut ty = match name.as_str() {
            "int" => Type::Int,
            "char" => Type::Char,
            "void" => Type::Void,
            other => return Err(self.error(format!("unknown type {other:?}"))),
        };
        loop {
            if self.eat(&TokenKind::Star) {
                ty = Type::Pointer(Box::new(ty));
            } else if self.eat(&TokenKind::LBracket) {
                let size = match self.advance().kind {
                    TokenKind::Int(n) => n as usize,
                    other => {
                        return Err(
                            self.error(format!("expected array size, found {}", other.describe()))
                        )
                    }
                };
                self.expect(&TokenKind::RBracket, "`]`")?;
                ty = Type::Array(Box::new(ty), size);
            } else {
                return Ok(ty);
            }
        }
    }

    /// `var name: type [= init] ;` with the `var` keyword and semicolon.
    fn var_binding(&mut self) -> Result<(String, Type, Option<Expr>), ParseError> {
        self.expect(&TokenKind::Var, "`var`")?;
        let name = self.identifier("variable name")?;
        self.expect(&TokenKind::Colon, "`:`")?;
        let ty = self.parse_type()?;
        let init = if self.eat(&TokenKind::Assign) {
            Some(self.expression()?)
        } else {
            None
        };
        self.expect(&TokenKind::Semicolon, "`;`")?;
        Ok((name, ty, init))
    }

    fn block_statements(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(&TokenKind::LBrace, "`{`")?;
        let mut statements = Vec::new();
        while !self.eat(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.error("unterminated block"));
            }
            statements.push(self.statement()?);
        }
        Ok(statements)
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek().kind {
            TokenKind::Var => {
                let (name, ty, init) = self.var_binding()?;
                Ok(Stmt::Var { name, ty, init })
            }
            TokenKind::LBrace => Ok(Stmt::Block(self.block_statements()?)),
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Switch => self.switch_statement(),
            TokenKind::Return => {
                self.advance();
                let value = if self.check(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect(&TokenKind::Semicolon, "`;`")?;
                Ok(Stmt::Return(value))
            }
            TokenKind::Break => {
                self.advance();
                self.expect(&TokenKind::Semicolon, "`;`")?;
                Ok(Stmt::Break)
            }
            TokenKind::Continue => {
                self.advance();
                self.expect(&TokenKind::Semicolon, "`;`")?;
                Ok(Stmt::Continue)
            }
            _ => {
                let expr = self.expression()?;
                self.expect(&TokenKind::Semicolon, "`;`")?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, ParseError> {
        self.expect(&TokenKind::If, "`if`")?;
        self.expect(&TokenKind::LParen, "`(`")?;
        let condition = self.expression()?;
        self.expect(&TokenKind::RParen, "`)`")?;
        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.eat(&TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn while_statement(&mut self) -> Result<Stmt, ParseError> {
        self.expect(&TokenKind::While, "`while`")?;
        self.expect(&TokenKind::LParen, "`(`")?;
        let condition = self.expression()?;
        self.expect(&TokenKind::RParen, "`)`")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::While { condition, body })
    }

    fn for_statement(&mut self) -> Result<Stmt, ParseError> {
        self.expect(&TokenKind::For, "`for`")?;
        self.expect(&TokenKind::LParen, "`(`")?;

        let init = if self.eat(&TokenKind::Semicolon) {
            None
        } else if self.check(&TokenKind::Var) {
            let (name, ty, init) = self.var_binding()?;
            Some(Box::new(Stmt::Var { name, ty, init }))
        } else {
            let expr = self.expression()?;
            self.expect(&TokenKind::Semicolon, "`;`")?;
            Some(Box::new(Stmt::Expr(expr)))
        };

        let condition = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(&TokenKind::Semicolon, "`;`")?;

        let step = if self.check(&TokenKind::RParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(&TokenKind::RParen, "`)`")?;

        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            condition,
            step,
            body,
        })
    }

    fn switch_statement(&mut self) -> Result<Stmt, ParseError> {
        self.expect(&TokenKind::Switch, "`switch`")?;
        self.expect(&TokenKind::LParen, "`(`")?;
        let selector = self.expression()?;
        self.expect(&TokenKind::RParen, "`)`")?;
        self.expect(&TokenKind::LBrace, "`{`")?;

        let mut cases = Vec::new();
        while !self.eat(&TokenKind::RBrace) {
            let value = if self.eat(&TokenKind::Case) {
                let value = self.expression()?;
                Some(value)
            } else if self.eat(&TokenKind::Default) {
                None
            } else {
                return Err(self.error(format!(
                    "expected `case`, `default` or `}}`, found {}",
                    self.peek().kind.describe()
                )));
            };
            self.expect(&TokenKind::Colon, "`:`")?;

            let mut body = Vec::new();
            while !matches!(
                self.peek().kind,
                TokenKind::Case | TokenKind::Default | TokenKind::RBrace
            ) {
                body.push(self.statement()?);
            }
            cases.push(SwitchCase { value, body });
        }
        Ok(Stmt::Switch { selector, cases })
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, ParseError> {
        let target = self.logical_or()?;
        if self.eat(&TokenKind::Assign) {
            let value = self.assignment()?;
            if !matches!(
                target,
                Expr::Ident(_)
                    | Expr::Index { .. }
                    | Expr::Unary {
                        op: UnaryOp::Deref,
                        ..
                    }
            ) {
                return Err(self.error("assignment target must be a variable, element or *pointer"));
            }
            return Ok(Expr::Assign {
                target: Box::new(target),
                value: Box::new(value),
            });
        }
        Ok(target)
    }

    /// One level of left-associative binary parsing; `next` is the tighter
    /// level.
    fn binary_level(
        &mut self,
        ops: &[(TokenKind, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let mut left = next(self)?;
        'outer: loop {
            for (token, op) in ops {
                if self.eat(token) {
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn logical_or(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[(TokenKind::OrOr, BinaryOp::LogicalOr)], Self::logical_and)
    }

    fn logical_and(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[(TokenKind::AndAnd, BinaryOp::LogicalAnd)], Self::bit_or)
    }

    fn bit_or(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                (TokenKind::Pipe, BinaryOp::BitOr),
                (TokenKind::KwOr, BinaryOp::BitOr),
            ],
            Self::bit_xor,
        )
    }

    fn bit_xor(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                (TokenKind::Caret, BinaryOp::BitXor),
                (TokenKind::KwXor, BinaryOp::BitXor),
            ],
            Self::bit_and,
        )
    }

    fn bit_and(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                (TokenKind::Amp, BinaryOp::BitAnd),
                (TokenKind::KwAnd, BinaryOp::BitAnd),
            ],
            Self::equality,
        )
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                (TokenKind::Eq, BinaryOp::Eq),
                (TokenKind::Ne, BinaryOp::Ne),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                (TokenKind::Le, BinaryOp::Le),
                (TokenKind::Ge, BinaryOp::Ge),
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::Gt, BinaryOp::Gt),
            ],
            Self::shift,
        )
    }

    fn shift(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                (TokenKind::Shl, BinaryOp::Shl),
                (TokenKind::Shr, BinaryOp::Shr),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                (TokenKind::Plus, BinaryOp::Add),
                (TokenKind::Minus, BinaryOp::Sub),
            ],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Mod),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek().kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Bang | TokenKind::KwNot => Some(UnaryOp::LogicalNot),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::At => Some(UnaryOp::AddressOf),
            TokenKind::Star => Some(UnaryOp::Deref),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = Box::new(self.unary()?);
            return Ok(Expr::Unary { op, operand });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        while self.eat(&TokenKind::LBracket) {
            let index = self.expression()?;
            self.expect(&TokenKind::RBracket, "`]`")?;
            expr = Expr::Index {
                array: Box::new(expr),
                index: Box::new(index),
            };
        }
        Ok(expr)
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(&TokenKind::LParen, "`(`")?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.expression()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "`)`")?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Int(value) => {
                self.advance();
                Ok(Expr::Literal(value))
            }
            TokenKind::Char(code) => {
                self.advance();
                Ok(Expr::Literal(code))
            }
            TokenKind::Builtin(builtin) => {
                self.advance();
                let args = self.arguments()?;
                Ok(Expr::Builtin { builtin, args })
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.check(&TokenKind::LParen) {
                    let args = self.arguments()?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.expression()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                Ok(expr)
            }
            other => Err(self.error(format!(
                "expected an expression, found {}",
                other.describe()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse_expr(source: &str) -> Expr {
        let wrapped = format!("function main() {{ return {source}; }}");
        let ast = parse_source(&wrapped).unwrap();
        let Item::Function(f) = &ast.items[0] else {
            panic!("expected function")
        };
        let Stmt::Return(Some(expr)) = &f.body[0] else {
            panic!("expected return")
        };
        expr.clone()
    }

    #[test]
    fn precedence_test() {
        // 1 + 2 * 3 groups the multiplication first.
        let expr = parse_expr("1 + 2 * 3");
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Add,
                left: Box::new(Expr::Literal(1)),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: Box::new(Expr::Literal(2)),
                    right: Box::new(Expr::Literal(3)),
                }),
            }
        );
    }

    #[test]
    fn keyword_operators_alias_symbols_test() {
        assert_eq!(parse_expr("1 and 3"), parse_expr("1 & 3"));
        assert_eq!(parse_expr("1 or 3"), parse_expr("1 | 3"));
        assert_eq!(parse_expr("1 xor 3"), parse_expr("1 ^ 3"));
        assert_eq!(parse_expr("not 1"), parse_expr("!1"));
    }

    #[test]
    fn unary_binds_tighter_than_binary_test() {
        let expr = parse_expr("-1 + 2");
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn pointer_syntax_test() {
        let source = "
function main() {
    var x: int = 5;
    var p: int* = @x;
    *p = 42;
    return x;
}";
        let ast = parse_source(source).unwrap();
        let Item::Function(f) = &ast.items[0] else {
            panic!()
        };
        assert_eq!(
            f.body[1],
            Stmt::Var {
                name: "p".into(),
                ty: Type::Pointer(Box::new(Type::Int)),
                init: Some(Expr::Unary {
                    op: UnaryOp::AddressOf,
                    operand: Box::new(Expr::Ident("x".into())),
                }),
            }
        );
        assert!(matches!(&f.body[2], Stmt::Expr(Expr::Assign { .. })));
    }

    #[test]
    fn array_declaration_test() {
        let ast = parse_source("function main() { var a: int[4]; a[0] = 1; return a[0]; }");
        let ast = ast.unwrap();
        let Item::Function(f) = &ast.items[0] else {
            panic!()
        };
        assert_eq!(
            f.body[0],
            Stmt::Var {
                name: "a".into(),
                ty: Type::Array(Box::new(Type::Int), 4),
                init: None,
            }
        );
    }

    #[test]
    fn function_signature_test() {
        let ast = parse_source("function f(n: int, p: int*): void { }").unwrap();
        let Item::Function(f) = &ast.items[0] else {
            panic!()
        };
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.return_type, Type::Void);
        // Untyped functions default to int.
        let ast = parse_source("function g() { }").unwrap();
        let Item::Function(g) = &ast.items[0] else {
            panic!()
        };
        assert_eq!(g.return_type, Type::Int);
    }

    #[test]
    fn switch_test() {
        let source = "
function main() {
    switch (1 + 2) {
        case 1:
            return 10;
        case 3:
            return 30;
        default:
            return 0;
    }
}";
        let ast = parse_source(source).unwrap();
        let Item::Function(f) = &ast.items[0] else {
            panic!()
        };
        let Stmt::Switch { cases, .. } = &f.body[0] else {
            panic!("expected switch")
        };
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[2].value, None);
    }

    #[test]
    fn builtin_call_test() {
        let expr = parse_expr("getGPUBuffer(0)");
        assert_eq!(
            expr,
            Expr::Builtin {
                builtin: Builtin::GetGpuBuffer,
                args: vec![Expr::Literal(0)],
            }
        );
    }

    #[test]
    fn bad_assignment_target_test() {
        assert!(parse_source("function main() { 1 = 2; }").is_err());
    }

    #[test]
    fn error_position_test() {
        let err = parse_source("function main() {\n  var x int;\n}").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn global_declaration_test() {
        let ast = parse_source("var g: int = 3;\nfunction main() { return g; }").unwrap();
        assert!(matches!(&ast.items[0], Item::Global { name, .. } if name == "g"));
    }
}
