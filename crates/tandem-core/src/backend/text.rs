//! Human readable snapshot codec.
//!
//! ```text
//! tandem-text 1
//! version "patcher.1"
//! Patcher #0 @0.0.1 {
//!   objects = unordered {
//!     [0101..] Object #1 @5.1.1 {
//!       text = string "osc~"
//!       position = object Point #2 @5.1.3 {
//!         x = float 1.5
//!       }
//!     }
//!   }
//!   name = string ""
//! }
//! ```
//!
//! Objects are numbered in document order; references to objects of the
//! document are written with that number.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use crate::backend::ir::{IrDocument, IrNode, IrObject};
use crate::constants::{MAX_DEPTH, TEXT_HEADER};
use crate::types::error::CodecError;
use crate::types::ids::NodeId;
use crate::types::keys::{FloatKey, RandomKey};

/// Encode a document as text
pub fn encode(doc: &IrDocument) -> String {
    let mut objects = Vec::new();
    doc.root.walk(&mut objects);
    let labels: HashMap<NodeId, usize> = objects.iter().enumerate().map(|(i, o)| (o.id, i)).collect();

    let mut writer = Writer { out: String::new(), labels, next: 0 };
    writer.out.push_str(TEXT_HEADER);
    writer.out.push('\n');
    let _ = writeln!(writer.out, "version {}", quote(&doc.version));
    writer.object(&doc.root, 0);
    writer.out.push('\n');
    writer.out
}

struct Writer {
    out: String,
    labels: HashMap<NodeId, usize>,
    next: usize,
}

impl Writer {
    fn indent(&mut self, depth: usize) {
        for _ in 0..depth {
            self.out.push_str("  ");
        }
    }

    fn object(&mut self, object: &IrObject, depth: usize) {
        let label = self.next;
        self.next += 1;
        let _ = write!(self.out, "{} #{} @{} {{", object.class, label, object.id);
        if object.members.is_empty() {
            self.out.push('}');
            return;
        }
        self.out.push('\n');
        for (name, node) in &object.members {
            self.indent(depth + 1);
            let _ = write!(self.out, "{} = ", name);
            self.node(node, depth + 1);
            self.out.push('\n');
        }
        self.indent(depth);
        self.out.push('}');
    }

    fn node(&mut self, node: &IrNode, depth: usize) {
        match node {
            IrNode::Bool(v) => {
                let _ = write!(self.out, "bool {}", v);
            }
            IrNode::Int(v) => {
                let _ = write!(self.out, "int {}", v);
            }
            IrNode::Float(v) => {
                let _ = write!(self.out, "float {:?}", v);
            }
            IrNode::Blob(v) => {
                let _ = write!(self.out, "blob {}", quote(&STANDARD.encode(v)));
            }
            IrNode::String(v) => {
                let _ = write!(self.out, "string {}", quote(v));
            }
            IrNode::Enum { name, enumerator } => {
                let _ = write!(self.out, "enum {}.{}", name, enumerator);
            }
            IrNode::ObjectRef(id) => {
                if id.is_null() {
                    self.out.push_str("ref null");
                } else if let Some(label) = self.labels.get(id) {
                    let _ = write!(self.out, "ref #{}", label);
                } else {
                    let _ = write!(self.out, "ref @{}", id);
                }
            }
            IrNode::Object(inner) => {
                self.out.push_str("object ");
                self.object(inner, depth);
            }
            IrNode::Ordered(items) => {
                self.out.push_str("ordered ");
                self.items(items.iter().map(|(k, o)| (hex::encode(k.as_bytes()), o)), depth);
            }
            IrNode::Unordered(items) => {
                self.out.push_str("unordered ");
                self.items(items.iter().map(|(k, o)| (hex::encode(k.as_bytes()), o)), depth);
            }
            IrNode::Message => self.out.push_str("message"),
        }
    }

    fn items<'a>(&mut self, items: impl ExactSizeIterator<Item = (String, &'a IrObject)>, depth: usize) {
        if items.len() == 0 {
            self.out.push_str("{}");
            return;
        }
        self.out.push_str("{\n");
        for (key, object) in items {
            self.indent(depth + 1);
            let _ = write!(self.out, "[{}] ", key);
            self.object(object, depth + 1);
            self.out.push('\n');
        }
        self.indent(depth);
        self.out.push('}');
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Equals,
    Key(String),
    Text(String),
    Label(usize),
    Id(NodeId),
    Word(String),
}

fn syntax(line: usize, message: impl Into<String>) -> CodecError {
    CodecError::Syntax { line, message: message.into() }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, CodecError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    let mut line = 1;
    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '{' => {
                chars.next();
                tokens.push((Token::Open, line));
            }
            '}' => {
                chars.next();
                tokens.push((Token::Close, line));
            }
            '=' => {
                chars.next();
                tokens.push((Token::Equals, line));
            }
            '[' => {
                chars.next();
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(c) => key.push(c),
                        None => return Err(syntax(line, "unterminated key")),
                    }
                }
                tokens.push((Token::Key(key), line));
            }
            '"' => {
                chars.next();
                let start = line;
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('r') => text.push('\r'),
                            Some('t') => text.push('\t'),
                            Some('"') => text.push('"'),
                            Some('\\') => text.push('\\'),
                            Some('u') => {
                                if chars.next() != Some('{') {
                                    return Err(syntax(line, "expected '{' after \\u"));
                                }
                                let mut hex = String::new();
                                loop {
                                    match chars.next() {
                                        Some('}') => break,
                                        Some(c) => hex.push(c),
                                        None => return Err(syntax(line, "unterminated escape")),
                                    }
                                }
                                let c = u32::from_str_radix(&hex, 16)
                                    .ok()
                                    .and_then(char::from_u32)
                                    .ok_or_else(|| syntax(line, format!("bad escape \\u{{{}}}", hex)))?;
                                text.push(c);
                            }
                            other => return Err(syntax(line, format!("bad escape {:?}", other))),
                        },
                        Some(c) => {
                            if c == '\n' {
                                line += 1;
                            }
                            text.push(c);
                        }
                        None => return Err(syntax(start, "unterminated string")),
                    }
                }
                tokens.push((Token::Text(text), start));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || "{}[]=\"".contains(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                let token = if let Some(rest) = word.strip_prefix('#') {
                    Token::Label(rest.parse().map_err(|_| syntax(line, format!("bad label '{}'", word)))?)
                } else if let Some(rest) = word.strip_prefix('@') {
                    Token::Id(rest.parse().map_err(|e: String| syntax(line, e))?)
                } else {
                    Token::Word(word)
                };
                tokens.push((token, line));
            }
        }
    }
    Ok(tokens)
}

/// Decode a text document
pub fn decode(input: &str) -> Result<IrDocument, CodecError> {
    let mut lines = input.lines();
    match lines.next() {
        Some(header) if header.trim() == TEXT_HEADER => {}
        _ => return Err(CodecError::BadHeader(format!("expected '{}'", TEXT_HEADER))),
    }
    let body_start = input.find('\n').map(|i| i + 1).unwrap_or(input.len());
    let tokens: Vec<(Token, usize)> = tokenize(&input[body_start..])?
        .into_iter()
        .map(|(t, line)| (t, line + 1))
        .collect();

    // Labels may be referenced before the object carrying them.
    let mut labels = HashMap::new();
    for pair in tokens.windows(2) {
        if let ((Token::Label(label), _), (Token::Id(id), _)) = (&pair[0], &pair[1]) {
            labels.insert(*label, *id);
        }
    }

    let mut parser = Parser { tokens: &tokens, pos: 0, labels };
    parser.expect_word("version")?;
    let version = parser.text()?;
    let root = parser.object(0)?;
    if parser.pos != tokens.len() {
        return Err(syntax(parser.line(), "unexpected content after the root object"));
    }
    Ok(IrDocument { version, root })
}

struct Parser<'t> {
    tokens: &'t [(Token, usize)],
    pos: usize,
    labels: HashMap<usize, NodeId>,
}

impl<'t> Parser<'t> {
    fn line(&self) -> usize {
        self.tokens
            .get(self.pos.saturating_sub(1))
            .or_else(|| self.tokens.last())
            .map(|(_, line)| *line)
            .unwrap_or(1)
    }

    fn next(&mut self) -> Result<&'t Token, CodecError> {
        let token = self
            .tokens
            .get(self.pos)
            .map(|(t, _)| t)
            .ok_or_else(|| syntax(self.line(), "unexpected end of input"))?;
        self.pos += 1;
        Ok(token)
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn word(&mut self) -> Result<&'t str, CodecError> {
        match self.next()? {
            Token::Word(w) => Ok(w),
            other => Err(syntax(self.line(), format!("expected a name, found {:?}", other))),
        }
    }

    fn expect_word(&mut self, expected: &str) -> Result<(), CodecError> {
        let word = self.word()?;
        if word != expected {
            return Err(syntax(self.line(), format!("expected '{}', found '{}'", expected, word)));
        }
        Ok(())
    }

    fn expect(&mut self, expected: Token) -> Result<(), CodecError> {
        let token = self.next()?;
        if *token != expected {
            return Err(syntax(self.line(), format!("expected {:?}, found {:?}", expected, token)));
        }
        Ok(())
    }

    fn text(&mut self) -> Result<String, CodecError> {
        match self.next()? {
            Token::Text(t) => Ok(t.clone()),
            other => Err(syntax(self.line(), format!("expected a string, found {:?}", other))),
        }
    }

    fn object(&mut self, depth: usize) -> Result<IrObject, CodecError> {
        if depth >= MAX_DEPTH {
            return Err(CodecError::TooDeep { limit: MAX_DEPTH });
        }
        let class = self.word()?.to_string();
        match self.next()? {
            Token::Label(_) => {}
            other => return Err(syntax(self.line(), format!("expected #label, found {:?}", other))),
        }
        let id = match self.next()? {
            Token::Id(id) => *id,
            other => return Err(syntax(self.line(), format!("expected @id, found {:?}", other))),
        };
        self.expect(Token::Open)?;
        let mut members = Vec::new();
        while self.peek() != Some(&Token::Close) {
            let name = self.word()?.to_string();
            self.expect(Token::Equals)?;
            members.push((name, self.node(depth)?));
        }
        self.expect(Token::Close)?;
        Ok(IrObject { id, class, members })
    }

    fn literal<T: std::str::FromStr>(&mut self, what: &str) -> Result<T, CodecError> {
        let word = self.word()?;
        word.parse()
            .map_err(|_| syntax(self.line(), format!("invalid {} literal '{}'", what, word)))
    }

    fn node(&mut self, depth: usize) -> Result<IrNode, CodecError> {
        let kind = self.word()?;
        Ok(match kind {
            "bool" => IrNode::Bool(self.literal("bool")?),
            "int" => IrNode::Int(self.literal("int")?),
            "float" => IrNode::Float(self.literal("float")?),
            "blob" => {
                let text = self.text()?;
                IrNode::Blob(
                    STANDARD
                        .decode(text.as_bytes())
                        .map_err(|e| syntax(self.line(), format!("invalid base64: {}", e)))?,
                )
            }
            "string" => IrNode::String(self.text()?),
            "enum" => {
                let word = self.word()?;
                let (name, enumerator) = word
                    .split_once('.')
                    .ok_or_else(|| syntax(self.line(), format!("expected Enum.Value, found '{}'", word)))?;
                IrNode::Enum { name: name.to_string(), enumerator: enumerator.to_string() }
            }
            "ref" => match self.next()? {
                Token::Word(w) if w == "null" => IrNode::ObjectRef(NodeId::NULL),
                Token::Id(id) => IrNode::ObjectRef(*id),
                Token::Label(label) => IrNode::ObjectRef(
                    *self
                        .labels
                        .get(label)
                        .ok_or_else(|| syntax(self.line(), format!("unknown label #{}", label)))?,
                ),
                other => return Err(syntax(self.line(), format!("expected a reference, found {:?}", other))),
            },
            "object" => IrNode::Object(self.object(depth + 1)?),
            "ordered" => {
                let mut items = BTreeMap::new();
                for (key, object) in self.items(depth)? {
                    let key = FloatKey::from_bytes(key).map_err(|e| CodecError::InvalidKey(e.to_string()))?;
                    items.insert(key, object);
                }
                IrNode::Ordered(items)
            }
            "unordered" => {
                let mut items = BTreeMap::new();
                for (key, object) in self.items(depth)? {
                    let key = RandomKey::from_slice(&key).map_err(|e| CodecError::InvalidKey(e.to_string()))?;
                    items.insert(key, object);
                }
                IrNode::Unordered(items)
            }
            "message" => IrNode::Message,
            other => return Err(syntax(self.line(), format!("unknown member kind '{}'", other))),
        })
    }

    fn items(&mut self, depth: usize) -> Result<Vec<(Vec<u8>, IrObject)>, CodecError> {
        self.expect(Token::Open)?;
        let mut items = Vec::new();
        while self.peek() != Some(&Token::Close) {
            let key = match self.next()? {
                Token::Key(hex) => {
                    hex::decode(hex).map_err(|e| CodecError::InvalidKey(format!("{}: {}", hex, e)))?
                }
                other => return Err(syntax(self.line(), format!("expected [key], found {:?}", other))),
            };
            items.push((key, self.object(depth + 1)?));
        }
        self.expect(Token::Close)?;
        Ok(items)
    }
}
