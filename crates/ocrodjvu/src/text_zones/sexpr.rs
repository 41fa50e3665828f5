//! S-expressions as read and written by `djvused`.
//!
//! The hidden text of a DjVu page is exchanged with `djvused` as a nested
//! list: `(page 0 0 2550 3300 (line 100 200 900 240 (word …)))`. This module
//! implements the subset of the miniexp syntax needed for that: symbols,
//! integers, double-quoted strings, and lists.

use super::bbox::BBox;
use super::zone::{Zone, ZoneChild, ZoneType};
use crate::error::{OcrodjvuError, Result};
use std::fmt;

/// Width `djvused print-txt` wraps its output to.
pub const PRINT_WIDTH: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Symbol(String),
    Int(i64),
    Str(String),
    List(Vec<Expr>),
}

impl Expr {
    /// Parse exactly one expression; trailing whitespace is allowed.
    pub fn parse(input: &str) -> Result<Expr> {
        let mut exprs = Self::parse_many(input)?;
        match exprs.len() {
            1 => Ok(exprs.remove(0)),
            0 => Err(OcrodjvuError::sexpr("empty input")),
            n => Err(OcrodjvuError::sexpr(format!("expected one expression, found {}", n))),
        }
    }

    /// Parse a sequence of whitespace-separated expressions.
    pub fn parse_many(input: &str) -> Result<Vec<Expr>> {
        let mut parser = Parser {
            bytes: input.as_bytes(),
            pos: 0,
        };
        let mut exprs = Vec::new();
        loop {
            parser.skip_blank();
            if parser.at_end() {
                return Ok(exprs);
            }
            exprs.push(parser.expr()?);
        }
    }

    /// Render the expression, breaking lists across lines to fit `width` columns.
    pub fn pretty(&self, width: usize) -> String {
        let mut out = String::new();
        self.pretty_into(&mut out, 0, width);
        out
    }

    fn pretty_into(&self, out: &mut String, indent: usize, width: usize) {
        let flat = self.to_string();
        let items = match self {
            Expr::List(items) if indent + flat.chars().count() > width => items,
            _ => {
                out.push_str(&flat);
                return;
            }
        };
        out.push('(');
        let mut first = true;
        for item in items {
            match item {
                Expr::List(_) => {
                    out.push('\n');
                    out.push_str(&" ".repeat(indent + 1));
                    item.pretty_into(out, indent + 1, width);
                }
                atom => {
                    if !first {
                        out.push(' ');
                    }
                    out.push_str(&atom.to_string());
                }
            }
            first = false;
        }
        out.push(')');
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Symbol(symbol) => f.write_str(symbol),
            Expr::Int(value) => write!(f, "{}", value),
            Expr::Str(text) => f.write_str(&quote(text)),
            Expr::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Quote a string the way miniexp prints it.
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => out.push_str(&format!("\\{:03o}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_blank(&mut self) {
        while let Some(byte) = self.peek() {
            if byte.is_ascii_whitespace() {
                self.pos += 1;
            } else if byte == b';' {
                while let Some(byte) = self.peek() {
                    self.pos += 1;
                    if byte == b'\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn error(&self, message: &str) -> OcrodjvuError {
        OcrodjvuError::sexpr(format!("{} at offset {}", message, self.pos))
    }

    fn expr(&mut self) -> Result<Expr> {
        self.skip_blank();
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some(b'(') => {
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    self.skip_blank();
                    match self.peek() {
                        None => return Err(self.error("unterminated list")),
                        Some(b')') => {
                            self.pos += 1;
                            return Ok(Expr::List(items));
                        }
                        Some(_) => items.push(self.expr()?),
                    }
                }
            }
            Some(b')') => Err(self.error("unexpected ')'")),
            Some(b'"') => self.string(),
            Some(_) => Ok(self.atom()),
        }
    }

    fn atom(&mut self) -> Expr {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_whitespace() || matches!(byte, b'(' | b')' | b'"' | b';') {
                break;
            }
            self.pos += 1;
        }
        let token = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
        match token.parse::<i64>() {
            Ok(value) => Expr::Int(value),
            Err(_) => Expr::Symbol(token),
        }
    }

    fn string(&mut self) -> Result<Expr> {
        self.pos += 1;
        let mut buffer = Vec::new();
        loop {
            let Some(byte) = self.peek() else {
                return Err(self.error("unterminated string"));
            };
            self.pos += 1;
            match byte {
                b'"' => break,
                b'\\' => {
                    let Some(escaped) = self.peek() else {
                        return Err(self.error("unterminated string"));
                    };
                    self.pos += 1;
                    match escaped {
                        b'n' => buffer.push(b'\n'),
                        b't' => buffer.push(b'\t'),
                        b'r' => buffer.push(b'\r'),
                        b'b' => buffer.push(0x08),
                        b'f' => buffer.push(0x0c),
                        b'v' => buffer.push(0x0b),
                        b'a' => buffer.push(0x07),
                        b'\n' => {}
                        b'0'..=b'7' => {
                            let mut value = u32::from(escaped - b'0');
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(digit @ b'0'..=b'7') => {
                                        value = value * 8 + u32::from(digit - b'0');
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            buffer.push((value & 0xff) as u8);
                        }
                        b'x' => {
                            let mut value = 0u32;
                            let mut digits = 0;
                            while digits < 2 {
                                match self.peek().and_then(|d| char::from(d).to_digit(16)) {
                                    Some(digit) => {
                                        value = value * 16 + digit;
                                        self.pos += 1;
                                        digits += 1;
                                    }
                                    None => break,
                                }
                            }
                            if digits == 0 {
                                return Err(self.error("invalid hexadecimal escape"));
                            }
                            buffer.push(value as u8);
                        }
                        other => buffer.push(other),
                    }
                }
                other => buffer.push(other),
            }
        }
        Ok(Expr::Str(String::from_utf8_lossy(&buffer).into_owned()))
    }
}

impl Zone {
    /// The zone as a `djvused` expression. A zone without children gets an
    /// empty string as its only child.
    pub fn to_sexpr(&self) -> Expr {
        let (x0, y0, x1, y1) = self.bbox.coordinates().unwrap_or((0, 0, 0, 0));
        let mut items = vec![
            Expr::Symbol(self.zone_type.symbol().to_string()),
            Expr::Int(i64::from(x0)),
            Expr::Int(i64::from(y0)),
            Expr::Int(i64::from(x1)),
            Expr::Int(i64::from(y1)),
        ];
        if self.children.is_empty() {
            items.push(Expr::Str(String::new()));
        }
        for child in &self.children {
            items.push(match child {
                ZoneChild::Zone(zone) => zone.to_sexpr(),
                ZoneChild::Text(text) => Expr::Str(text.clone()),
            });
        }
        Expr::List(items)
    }

    /// The zone in the layout `djvused print-txt` uses.
    pub fn to_sexpr_pretty(&self) -> String {
        self.to_sexpr().pretty(PRINT_WIDTH)
    }

    /// Build a zone from a `djvused` expression.
    pub fn from_sexpr(expr: &Expr) -> Result<Zone> {
        let Expr::List(items) = expr else {
            return Err(OcrodjvuError::sexpr(format!("expected a zone list, found {}", expr)));
        };
        if items.len() < 5 {
            return Err(OcrodjvuError::sexpr(format!("zone list too short: {}", expr)));
        }
        let zone_type = match &items[0] {
            Expr::Symbol(symbol) => symbol.parse::<ZoneType>()?,
            other => return Err(OcrodjvuError::sexpr(format!("expected a zone type, found {}", other))),
        };
        let mut coords = [0i32; 4];
        for (slot, item) in coords.iter_mut().zip(&items[1..5]) {
            *slot = match item {
                Expr::Int(value) => i32::try_from(*value)
                    .map_err(|e| OcrodjvuError::sexpr_with_source(format!("coordinate out of range: {}", value), e))?,
                other => return Err(OcrodjvuError::sexpr(format!("expected a coordinate, found {}", other))),
            };
        }
        let children = items[5..]
            .iter()
            .map(|item| match item {
                Expr::Str(text) => Ok(ZoneChild::Text(text.clone())),
                list @ Expr::List(_) => Zone::from_sexpr(list).map(ZoneChild::Zone),
                other => Err(OcrodjvuError::sexpr(format!("unexpected zone child: {}", other))),
            })
            .collect::<Result<Vec<_>>>()?;
        let [x0, y0, x1, y1] = coords;
        Ok(Zone::new(zone_type, BBox::new(x0, y0, x1, y1), children))
    }

    /// Parse `djvused print-txt` output for a single page.
    pub fn parse_sexpr(input: &str) -> Result<Zone> {
        Zone::from_sexpr(&Expr::parse(input)?)
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sexpr())
    }
}
