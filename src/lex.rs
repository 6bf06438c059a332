use anyhow::anyhow;
use combine::{
    any, attempt, between, choice, eof, from_str, many, many1,
    parser::{
        byte::{alpha_num, bytes, digit, letter, space},
        combinator::recognize,
    },
    satisfy, skip_many, token, Parser, Stream,
};

pub trait ByteStream<'a>: Stream<Token = u8, Range = &'a [u8]> + 'a {}
impl<'a, T: Stream<Token = u8, Range = &'a [u8]> + 'a> ByteStream<'a> for T {}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // keywords
    And,
    Break,
    Do,
    Else,
    Elseif,
    End,
    False,
    For,
    Function,
    Goto,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,

    // operators
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Len,
    BitAnd,
    BitXor,
    BitOr,
    ShiftL,
    ShiftR,
    Idiv,
    Equal,
    NotEq,
    LesEq,
    GreEq,
    Less,
    Greater,
    Assign,
    ParL,
    ParR,
    CurlyL,
    CurlyR,
    SqurL,
    SqurR,
    DoubColon,
    SemiColon,
    Colon,
    Comma,
    Dot,
    Concat,
    Dots,

    // constant values
    Integer(i64),
    Float(f64),
    String(String),

    // name of variables or table keys
    Name(String),

    // end
    Eos,
}

/// Pull-based tokenizer over a source buffer.
///
/// Tracks the line of every token so the compiler can build line tables.
pub struct Lex<'a> {
    input: &'a [u8],
    line: u32,
    ahead: Token,
    ahead_line: u32,
    token_line: u32,
}

impl<'a> Lex<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            line: 1,
            ahead: Token::Eos,
            ahead_line: 1,
            token_line: 1,
        }
    }

    pub fn next(&mut self) -> anyhow::Result<Token> {
        if self.ahead == Token::Eos {
            let (t, line) = self.do_next()?;
            self.token_line = line;
            Ok(t)
        } else {
            self.token_line = self.ahead_line;
            Ok(std::mem::replace(&mut self.ahead, Token::Eos))
        }
    }

    pub fn peek(&mut self) -> anyhow::Result<&Token> {
        if self.ahead == Token::Eos {
            let (t, line) = self.do_next()?;
            self.ahead = t;
            self.ahead_line = line;
        }
        Ok(&self.ahead)
    }

    /// Line of the token most recently returned by `next`.
    pub fn line(&self) -> u32 {
        self.token_line
    }

    /// Line where scanning currently stands; used for error reports.
    pub fn current_line(&self) -> u32 {
        if self.ahead == Token::Eos {
            self.line
        } else {
            self.ahead_line
        }
    }

    fn do_next(&mut self) -> anyhow::Result<(Token, u32)> {
        let ((), rest) = blank()
            .parse(self.input)
            .map_err(|err| anyhow!("invalid input: {err}"))?;
        self.advance(rest);

        let line = self.line;
        let (t, rest) = lua_token()
            .parse(self.input)
            .map_err(|_| anyhow!("unexpected character"))?;
        self.advance(rest);
        Ok((t, line))
    }

    fn advance(&mut self, rest: &'a [u8]) {
        let consumed = &self.input[..self.input.len() - rest.len()];
        self.line += consumed.iter().filter(|&&c| c == b'\n').count() as u32;
        self.input = rest;
    }
}

/// Whitespace and `--` line comments.
fn blank<'a, Input>() -> impl Parser<Input, Output = ()> + 'a
where
    Input: ByteStream<'a>,
{
    let comment = attempt(bytes(&b"--"[..])).with(skip_many(satisfy(|c| c != b'\n')));
    skip_many(choice((space().map(|_| ()), comment)))
}

fn lua_token<'a, Input>() -> impl Parser<Input, Output = Token> + 'a
where
    Input: ByteStream<'a>,
{
    let name = recognize((
        letter().or(token(b'_')),
        many::<Vec<_>, _, _>(alpha_num().or(token(b'_'))),
    ))
    .map(|v: Vec<u8>| keyword_or_name(String::from_utf8_lossy(&v).to_string()));
    let eos = eof().map(|_| Token::Eos);
    choice((
        operators(),
        attempt(float()),
        integer(),
        name,
        string(b'"'),
        string(b'\''),
        eos,
    ))
}

fn keyword_or_name(name: String) -> Token {
    match name.as_str() {
        "and" => Token::And,
        "break" => Token::Break,
        "do" => Token::Do,
        "else" => Token::Else,
        "elseif" => Token::Elseif,
        "end" => Token::End,
        "false" => Token::False,
        "for" => Token::For,
        "function" => Token::Function,
        "goto" => Token::Goto,
        "if" => Token::If,
        "in" => Token::In,
        "local" => Token::Local,
        "nil" => Token::Nil,
        "not" => Token::Not,
        "or" => Token::Or,
        "repeat" => Token::Repeat,
        "return" => Token::Return,
        "then" => Token::Then,
        "true" => Token::True,
        "until" => Token::Until,
        "while" => Token::While,
        _ => Token::Name(name),
    }
}

fn string<'a, Input>(quote: u8) -> impl Parser<Input, Output = Token> + 'a
where
    Input: ByteStream<'a>,
{
    let escaped = token(b'\\').with(any()).map(|c| match c {
        b'n' => b'\n',
        b't' => b'\t',
        b'r' => b'\r',
        b'0' => b'\0',
        c => c,
    });
    let plain = satisfy(move |c| c != quote && c != b'\\');
    between(token(quote), token(quote), many(escaped.or(plain)))
        .map(|v: Vec<u8>| Token::String(String::from_utf8_lossy(&v).to_string()))
}

fn operators<'a, Input>() -> impl Parser<Input, Output = Token> + 'a
where
    Input: ByteStream<'a>,
{
    choice((
        attempt(bytes(&b"..."[..])).map(|_| Token::Dots),
        choice((
            attempt(bytes(&b"<<"[..])).map(|_| Token::ShiftL),
            attempt(bytes(&b">>"[..])).map(|_| Token::ShiftR),
            attempt(bytes(&b"//"[..])).map(|_| Token::Idiv),
            attempt(bytes(&b"=="[..])).map(|_| Token::Equal),
            attempt(bytes(&b"~="[..])).map(|_| Token::NotEq),
            attempt(bytes(&b"<="[..])).map(|_| Token::LesEq),
            attempt(bytes(&b">="[..])).map(|_| Token::GreEq),
            attempt(bytes(&b"::"[..])).map(|_| Token::DoubColon),
            attempt(bytes(&b".."[..])).map(|_| Token::Concat),
        )),
        choice((
            token(b'+').map(|_| Token::Add),
            token(b'-').map(|_| Token::Sub),
            token(b'*').map(|_| Token::Mul),
            token(b'/').map(|_| Token::Div),
            token(b'%').map(|_| Token::Mod),
            token(b'^').map(|_| Token::Pow),
            token(b'#').map(|_| Token::Len),
            token(b'&').map(|_| Token::BitAnd),
            token(b'~').map(|_| Token::BitXor),
            token(b'|').map(|_| Token::BitOr),
            token(b'<').map(|_| Token::Less),
            token(b'>').map(|_| Token::Greater),
            token(b'=').map(|_| Token::Assign),
            token(b'(').map(|_| Token::ParL),
            token(b')').map(|_| Token::ParR),
            token(b'{').map(|_| Token::CurlyL),
            token(b'}').map(|_| Token::CurlyR),
            token(b'[').map(|_| Token::SqurL),
            token(b']').map(|_| Token::SqurR),
            token(b';').map(|_| Token::SemiColon),
            token(b':').map(|_| Token::Colon),
            token(b',').map(|_| Token::Comma),
            token(b'.').map(|_| Token::Dot),
        )),
    ))
}

fn integer<Input>() -> impl Parser<Input, Output = Token>
where
    Input: Stream<Token = u8>,
{
    from_str(many1::<Vec<_>, _, _>(digit())).map(Token::Integer)
}

fn float<Input>() -> impl Parser<Input, Output = Token>
where
    Input: Stream<Token = u8>,
{
    from_str(recognize::<Vec<_>, _, _>((
        many1::<Vec<_>, _, _>(digit()),
        token(b'.'),
        many1::<Vec<_>, _, _>(digit()),
    )))
    .map(Token::Float)
}
