//! Sandboxed expression evaluator for pattern functions.
//!
//! A pattern is a single expression over a fixed vocabulary: the time
//! and coordinate inputs, the previous pixel color, arithmetic, and the
//! waveform/noise primitives. There are no loops, assignments or calls
//! outside the vocabulary, so evaluation time is bounded by the size of
//! the compiled tree.
//!
//! The root of the expression decides what the pattern emits: `hsv(..)`
//! and `rgb(..)` construct colors, `palette(..)` (or any bare numeric
//! expression) emits a palette position that the group resolves against
//! its palette.

use std::fmt;

use crate::color::waveform;
use crate::color::{Hsv, Rgb};

use super::{PatternValue, PixelCtx};

#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub position: usize,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {}: {}", self.position, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Var {
    T,
    X,
    PrevR,
    PrevG,
    PrevB,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum NumFn {
    Sin,
    Cos,
    Abs,
    Floor,
    Ceil,
    Sqrt,
    Pow,
    Min,
    Max,
    Clamp,
    Frac,
    Pulse,
    Triangle,
    Sine,
    Cubic,
    Plasma,
    PlasmaOctave,
    Noise,
    Fbm,
}

impl NumFn {
    fn lookup(name: &str) -> Option<(NumFn, usize)> {
        Some(match name {
            "sin" => (NumFn::Sin, 1),
            "cos" => (NumFn::Cos, 1),
            "abs" => (NumFn::Abs, 1),
            "floor" => (NumFn::Floor, 1),
            "ceil" => (NumFn::Ceil, 1),
            "sqrt" => (NumFn::Sqrt, 1),
            "pow" => (NumFn::Pow, 2),
            "min" => (NumFn::Min, 2),
            "max" => (NumFn::Max, 2),
            "clamp" => (NumFn::Clamp, 3),
            "frac" => (NumFn::Frac, 1),
            "pulse" => (NumFn::Pulse, 2),
            "triangle" => (NumFn::Triangle, 1),
            "sine" => (NumFn::Sine, 1),
            "cubic" => (NumFn::Cubic, 1),
            "plasma" => (NumFn::Plasma, 7),
            "plasma_octave" => (NumFn::PlasmaOctave, 6),
            "noise" => (NumFn::Noise, 3),
            "fbm" => (NumFn::Fbm, 6),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
enum Node {
    Num(f32),
    Var(Var),
    Neg(Box<Node>),
    Bin(BinOp, Box<Node>, Box<Node>),
    Call(NumFn, Vec<Node>),
}

#[derive(Debug, Clone)]
enum Root {
    /// Bare numeric expression, treated as a palette position.
    Num(Node),
    Palette(Node),
    Hsv([Node; 3]),
    Rgb([Node; 3]),
}

/// A compiled, immutable pattern expression.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    root: Root,
}

impl CompiledPattern {
    pub fn eval(&self, ctx: &PixelCtx) -> PatternValue {
        match &self.root {
            Root::Num(e) | Root::Palette(e) => PatternValue::PalettePos(eval(e, ctx)),
            Root::Hsv([h, s, v]) => {
                PatternValue::Hsv(Hsv::new(eval(h, ctx), eval(s, ctx), eval(v, ctx)))
            }
            Root::Rgb([r, g, b]) => {
                PatternValue::Rgb(Rgb::new(eval(r, ctx), eval(g, ctx), eval(b, ctx)))
            }
        }
    }
}

fn eval(node: &Node, ctx: &PixelCtx) -> f32 {
    match node {
        Node::Num(v) => *v,
        Node::Var(var) => match var {
            Var::T => ctx.t,
            Var::X => ctx.x,
            Var::PrevR => ctx.prev.r,
            Var::PrevG => ctx.prev.g,
            Var::PrevB => ctx.prev.b,
        },
        Node::Neg(e) => -eval(e, ctx),
        Node::Bin(op, a, b) => {
            let a = eval(a, ctx);
            let b = eval(b, ctx);
            match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => {
                    if b == 0.0 {
                        0.0
                    } else {
                        a / b
                    }
                }
                BinOp::Rem => {
                    if b == 0.0 {
                        0.0
                    } else {
                        a.rem_euclid(b)
                    }
                }
            }
        }
        Node::Call(f, args) => {
            let a = |i: usize| eval(&args[i], ctx);
            match f {
                NumFn::Sin => a(0).sin(),
                NumFn::Cos => a(0).cos(),
                NumFn::Abs => a(0).abs(),
                NumFn::Floor => a(0).floor(),
                NumFn::Ceil => a(0).ceil(),
                NumFn::Sqrt => a(0).max(0.0).sqrt(),
                NumFn::Pow => a(0).powf(a(1)),
                NumFn::Min => a(0).min(a(1)),
                NumFn::Max => a(0).max(a(1)),
                NumFn::Clamp => {
                    let (lo, hi) = (a(1), a(2));
                    if lo <= hi {
                        a(0).clamp(lo, hi)
                    } else {
                        a(0)
                    }
                }
                NumFn::Frac => waveform::frac(a(0)),
                NumFn::Pulse => waveform::wave_pulse(a(0), a(1)),
                NumFn::Triangle => waveform::wave_triangle(a(0)),
                NumFn::Sine => waveform::wave_sine(a(0)),
                NumFn::Cubic => waveform::wave_cubic(a(0)),
                NumFn::Plasma => {
                    waveform::plasma_sines(a(0), a(1), a(2), a(3), a(4), a(5), a(6))
                }
                NumFn::PlasmaOctave => waveform::plasma_sines_octave(
                    a(0),
                    a(1),
                    a(2),
                    a(3).clamp(1.0, 8.0) as u32,
                    a(4),
                    a(5),
                ),
                NumFn::Noise => {
                    waveform::perlin_noise_3d(a(0) as f64, a(1) as f64, a(2) as f64) as f32
                }
                NumFn::Fbm => waveform::fbm_noise_3d(
                    a(0),
                    a(1),
                    a(2),
                    a(3).clamp(1.0, 8.0) as u32,
                    a(4),
                    a(5),
                ),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f32),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, CompileError> {
    let mut tokens = Vec::new();
    let bytes = source.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '+' => {
                tokens.push((i, Token::Plus));
                i += 1;
            }
            '-' => {
                tokens.push((i, Token::Minus));
                i += 1;
            }
            '*' => {
                tokens.push((i, Token::Star));
                i += 1;
            }
            '/' => {
                tokens.push((i, Token::Slash));
                i += 1;
            }
            '%' => {
                tokens.push((i, Token::Percent));
                i += 1;
            }
            '(' => {
                tokens.push((i, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((i, Token::RParen));
                i += 1;
            }
            ',' => {
                tokens.push((i, Token::Comma));
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < bytes.len() && matches!(bytes[i] as char, '0'..='9' | '.') {
                    i += 1;
                }
                let text = &source[start..i];
                let value = text.parse::<f32>().map_err(|_| CompileError {
                    position: start,
                    message: format!("invalid number '{text}'"),
                })?;
                tokens.push((start, Token::Num(value)));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < bytes.len()
                    && matches!(bytes[i] as char, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_')
                {
                    i += 1;
                }
                tokens.push((start, Token::Ident(source[start..i].to_ascii_lowercase())));
            }
            other => {
                return Err(CompileError {
                    position: i,
                    message: format!("unexpected character '{other}'"),
                })
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [(usize, Token)],
    pos: usize,
    end: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(p, _)| *p)
            .unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos).map(|(_, t)| t);
        self.pos += 1;
        t
    }

    fn expect(&mut self, want: Token, what: &str) -> Result<(), CompileError> {
        let position = self.position();
        match self.advance() {
            Some(t) if *t == want => Ok(()),
            _ => Err(CompileError {
                position,
                message: format!("expected {what}"),
            }),
        }
    }

    fn expr(&mut self) -> Result<Node, CompileError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.term()?;
            left = Node::Bin(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Node, CompileError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.advance();
            let right = self.unary()?;
            left = Node::Bin(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Node, CompileError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.advance();
            return Ok(Node::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Node, CompileError> {
        let position = self.position();
        match self.advance().cloned() {
            Some(Token::Num(v)) => Ok(Node::Num(v)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.advance();
                    let args = self.args()?;
                    match NumFn::lookup(&name) {
                        Some((f, arity)) => {
                            if args.len() != arity {
                                return Err(CompileError {
                                    position,
                                    message: format!(
                                        "{name} takes {arity} argument(s), got {}",
                                        args.len()
                                    ),
                                });
                            }
                            Ok(Node::Call(f, args))
                        }
                        None if matches!(name.as_str(), "hsv" | "rgb" | "palette") => {
                            Err(CompileError {
                                position,
                                message: format!("{name}() is only allowed as the whole pattern"),
                            })
                        }
                        None => Err(CompileError {
                            position,
                            message: format!("unknown function '{name}'"),
                        }),
                    }
                } else {
                    match name.as_str() {
                        "t" => Ok(Node::Var(Var::T)),
                        "x" => Ok(Node::Var(Var::X)),
                        "prev_r" => Ok(Node::Var(Var::PrevR)),
                        "prev_g" => Ok(Node::Var(Var::PrevG)),
                        "prev_b" => Ok(Node::Var(Var::PrevB)),
                        _ => Err(CompileError {
                            position,
                            message: format!("unknown identifier '{name}'"),
                        }),
                    }
                }
            }
            _ => Err(CompileError {
                position,
                message: "expected a number, identifier or '('".into(),
            }),
        }
    }

    fn args(&mut self) -> Result<Vec<Node>, CompileError> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token::RParen)) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                _ => {
                    return Err(CompileError {
                        position: self.position(),
                        message: "expected ',' or ')'".into(),
                    })
                }
            }
        }
        Ok(args)
    }
}

/// Compile a pattern source string. On failure every diagnosed error is
/// returned; the caller keeps the previous compiled form.
pub fn compile(source: &str) -> Result<CompiledPattern, Vec<CompileError>> {
    let tokens = tokenize(source).map_err(|e| vec![e])?;
    if tokens.is_empty() {
        return Err(vec![CompileError {
            position: 0,
            message: "empty pattern".into(),
        }]);
    }
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        end: source.len(),
    };

    // A color constructor is recognized only as the outermost call.
    let root = match tokens.first() {
        Some((_, Token::Ident(name)))
            if matches!(name.as_str(), "hsv" | "rgb" | "palette")
                && matches!(tokens.get(1), Some((_, Token::LParen))) =>
        {
            let name = name.clone();
            parser.pos = 2;
            let args = parser.args().map_err(|e| vec![e])?;
            match (name.as_str(), args.len()) {
                ("palette", 1) => {
                    let mut it = args.into_iter();
                    Root::Palette(it.next().unwrap())
                }
                ("hsv", 3) => {
                    let mut it = args.into_iter();
                    Root::Hsv([it.next().unwrap(), it.next().unwrap(), it.next().unwrap()])
                }
                ("rgb", 3) => {
                    let mut it = args.into_iter();
                    Root::Rgb([it.next().unwrap(), it.next().unwrap(), it.next().unwrap()])
                }
                (_, n) => {
                    return Err(vec![CompileError {
                        position: 0,
                        message: format!("{name} takes {} argument(s), got {n}", if name == "palette" { 1 } else { 3 }),
                    }])
                }
            }
        }
        _ => Root::Num(parser.expr().map_err(|e| vec![e])?),
    };

    if parser.pos < tokens.len() {
        return Err(vec![CompileError {
            position: parser.position(),
            message: "unexpected trailing input".into(),
        }]);
    }
    Ok(CompiledPattern { root })
}
