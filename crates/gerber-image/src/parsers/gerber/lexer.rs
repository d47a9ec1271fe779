//! Command tokenizer.
//!
//! Gerber uses `*` as a statement terminator and `%...%` for extended
//! commands. The tokenizer accepts input in arbitrary chunks and hands every
//! complete command to a consumer together with the line it started on and
//! whether it came from an extended block. Two legacy normalizations happen
//! here: fused codes are split apart (`G01X100Y200D01` becomes `G01` and
//! `X100Y200D01`), and coordinate modifiers are reordered to X, Y, I, J, D.

use std::convert::Infallible;

use log::warn;

use crate::error::truncate;

/// A single command produced by [`tokenize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub text: String,
    pub line: usize,
    pub advanced: bool,
}

impl Token {
    pub fn simple(text: &str, line: usize) -> Self {
        Self {
            text: text.to_string(),
            line,
            advanced: false,
        }
    }

    pub fn advanced(text: &str, line: usize) -> Self {
        Self {
            text: text.to_string(),
            line,
            advanced: true,
        }
    }
}

/// Receives `(line, chunk, index)` for every character that cannot appear in
/// a Gerber file. The character is dropped and tokenization continues.
pub type ErrorHandler = Box<dyn FnMut(usize, &str, usize)>;

fn default_error_handler() -> ErrorHandler {
    Box::new(|line, chunk, index| {
        let ch = chunk[index..].chars().next().unwrap_or('?');
        warn!("Ignoring unexpected character {ch:?} on line {line}");
    })
}

/// Streaming tokenizer state. Feed chunks with [`Tokenizer::feed`] and call
/// [`Tokenizer::finish`] once the input is exhausted.
pub struct Tokenizer {
    buffer: String,
    line: usize,
    start_line: usize,
    advanced: bool,
    on_error: ErrorHandler,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            line: 1,
            start_line: 1,
            advanced: false,
            on_error: default_error_handler(),
        }
    }

    pub fn with_error_handler(handler: ErrorHandler) -> Self {
        Self {
            on_error: handler,
            ..Self::new()
        }
    }

    /// Current line number (1-based).
    pub fn line(&self) -> usize {
        self.line
    }

    /// Consume a chunk of input, invoking `consumer(text, line, advanced)` for
    /// each completed command. Stops at the first consumer error.
    pub fn feed<F, E>(&mut self, chunk: &str, consumer: &mut F) -> Result<(), E>
    where
        F: FnMut(&str, usize, bool) -> Result<(), E>,
    {
        for (index, ch) in chunk.char_indices() {
            match ch {
                '\r' | '\t' => {}
                '\n' => self.line += 1,
                '%' => {
                    if self.advanced {
                        // Macro bodies are emitted whole when the block closes
                        let text = self.buffer.trim().trim_end_matches('*').to_string();
                        self.buffer.clear();
                        if !text.is_empty() {
                            consumer(&text, self.start_line, true)?;
                        }
                        self.advanced = false;
                    } else {
                        self.flush_simple(consumer)?;
                        self.advanced = true;
                    }
                }
                '*' => {
                    if self.advanced {
                        if self.buffer.trim_start().starts_with("AM") {
                            self.buffer.push('*');
                        } else {
                            let text = self.buffer.trim().to_string();
                            self.buffer.clear();
                            if !text.is_empty() {
                                consumer(&text, self.start_line, true)?;
                            }
                        }
                    } else {
                        self.flush_simple(consumer)?;
                    }
                }
                c if c.is_control() => (self.on_error)(self.line, chunk, index),
                c => {
                    if self.buffer.is_empty() {
                        if c == ' ' {
                            continue;
                        }
                        self.start_line = self.line;
                    }
                    self.buffer.push(c);
                }
            }
        }
        Ok(())
    }

    /// Flush a trailing command that was never terminated.
    pub fn finish<F, E>(&mut self, consumer: &mut F) -> Result<(), E>
    where
        F: FnMut(&str, usize, bool) -> Result<(), E>,
    {
        if self.advanced {
            let text = self.buffer.trim().trim_end_matches('*').to_string();
            self.buffer.clear();
            self.advanced = false;
            if !text.is_empty() {
                warn!("Unterminated extended block at end of input: {:?}", truncate(&text));
                consumer(&text, self.start_line, true)?;
            }
            return Ok(());
        }
        self.flush_simple(consumer)
    }

    fn flush_simple<F, E>(&mut self, consumer: &mut F) -> Result<(), E>
    where
        F: FnMut(&str, usize, bool) -> Result<(), E>,
    {
        let text = self.buffer.trim().to_string();
        self.buffer.clear();
        if text.is_empty() {
            return Ok(());
        }
        for part in split_fused(&text) {
            consumer(&normalize_modifiers(&part), self.start_line, false)?;
        }
        Ok(())
    }
}

/// Tokenize a complete Gerber file.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut collect = |text: &str, line: usize, advanced: bool| {
        tokens.push(Token {
            text: text.to_string(),
            line,
            advanced,
        });
        Ok::<(), Infallible>(())
    };
    let mut tokenizer = Tokenizer::new();
    if let Err(never) = tokenizer.feed(input, &mut collect) {
        match never {}
    }
    if let Err(never) = tokenizer.finish(&mut collect) {
        match never {}
    }
    tokens
}

/// Check if a command is a G04 comment.
pub fn is_comment(s: &str) -> bool {
    s.starts_with("G04")
        || (s.starts_with("G4") && !s[2..].starts_with(|c: char| c.is_ascii_digit()))
}

/// Length of a leading `<letter><digits>` code, if `s` starts with one of `letters`.
fn leading_code(s: &str, letters: &[u8]) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.is_empty() || !letters.contains(&bytes[0]) {
        return None;
    }
    let digits = bytes[1..].iter().take_while(|b| b.is_ascii_digit()).count();
    (digits > 0).then_some(1 + digits)
}

/// Split leading G/M/N codes (and a D code chained to another code) off a
/// simple command. Comments are never split.
fn split_fused(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = text;
    loop {
        if rest.is_empty() {
            break;
        }
        if is_comment(rest) {
            parts.push(rest.to_string());
            return parts;
        }
        if let Some(len) = leading_code(rest, b"GMN") {
            parts.push(rest[..len].to_string());
            rest = &rest[len..];
            continue;
        }
        if let Some(len) = leading_code(rest, b"D") {
            if leading_code(&rest[len..], b"GMND").is_some() {
                parts.push(rest[..len].to_string());
                rest = &rest[len..];
                continue;
            }
        }
        parts.push(rest.to_string());
        break;
    }
    parts
}

const MODIFIER_ORDER: [char; 5] = ['X', 'Y', 'I', 'J', 'D'];

/// Reorder coordinate modifiers into X, Y, I, J, D order. Anything that is
/// not a plain modifier list is returned unchanged.
fn normalize_modifiers(text: &str) -> String {
    let mut fields: Vec<(char, &str)> = Vec::new();
    let mut rest = text;
    while let Some(letter) = rest.chars().next() {
        if !MODIFIER_ORDER.contains(&letter) {
            return text.to_string();
        }
        let value_len = rest[1..]
            .find(|c: char| !(c.is_ascii_digit() || c == '-' || c == '+' || c == '.'))
            .unwrap_or(rest.len() - 1);
        if value_len == 0 || fields.iter().any(|(l, _)| *l == letter) {
            return text.to_string();
        }
        fields.push((letter, &rest[1..1 + value_len]));
        rest = &rest[1 + value_len..];
    }
    fields.sort_by_key(|(letter, _)| MODIFIER_ORDER.iter().position(|l| l == letter));
    fields
        .iter()
        .map(|(letter, value)| format!("{letter}{value}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GerberError;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn texts(input: &str) -> Vec<String> {
        tokenize(input).into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn test_simple_commands() {
        let input = "G01*\nD10*\nX100Y200D01*\nM02*\n";
        let tokens = tokenize(input);
        assert_eq!(
            tokens,
            vec![
                Token::simple("G01", 1),
                Token::simple("D10", 2),
                Token::simple("X100Y200D01", 3),
                Token::simple("M02", 4),
            ]
        );
    }

    #[test]
    fn test_extended_commands() {
        let input = "%FSLAX24Y24*%\n%MOMM*%\n%ADD10C,0.020*%\n";
        let tokens = tokenize(input);
        assert_eq!(
            tokens,
            vec![
                Token::advanced("FSLAX24Y24", 1),
                Token::advanced("MOMM", 2),
                Token::advanced("ADD10C,0.020", 3),
            ]
        );
    }

    #[test]
    fn test_multiple_extended_in_one_block() {
        // Some files put multiple extended commands in one % block
        assert_eq!(texts("%FSLAX24Y24*MOMM*%\n"), vec!["FSLAX24Y24", "MOMM"]);
    }

    #[test]
    fn test_macro_block_emitted_whole() {
        let input = "%AMTHERM*\n7,0,0,1,0.5,0.1,0*\n%\n%ADD10THERM*%";
        let tokens = tokenize(input);
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].text, "AMTHERM*7,0,0,1,0.5,0.1,0");
        assert!(tokens[0].advanced);
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].text, "ADD10THERM");
    }

    #[test]
    fn test_split_fused_codes() {
        assert_eq!(texts("G01X100Y200D01*"), vec!["G01", "X100Y200D01"]);
        assert_eq!(texts("G54D10*"), vec!["G54", "D10"]);
        assert_eq!(texts("G75G01*"), vec!["G75", "G01"]);
        assert_eq!(texts("N10G01*"), vec!["N10", "G01"]);
        assert_eq!(texts("D10G01*"), vec!["D10", "G01"]);
    }

    #[test]
    fn test_comment_never_split() {
        assert_eq!(texts("G04 Aperture D10 *"), vec!["G04 Aperture D10"]);
        assert_eq!(texts("G04D10*"), vec!["G04D10"]);
        assert_eq!(texts("G01G04 text M02*"), vec!["G01", "G04 text M02"]);
    }

    #[test]
    fn test_modifier_reordering() {
        assert_eq!(texts("Y200X100D01*"), vec!["X100Y200D01"]);
        assert_eq!(texts("D01J5I-3Y2X1*"), vec!["X1Y2I-3J5D01"]);
        assert_eq!(texts("G02J5X1D01*"), vec!["G02", "X1J5D01"]);
    }

    #[test]
    fn test_non_modifier_command_unchanged() {
        assert_eq!(texts("M02*"), vec!["M02"]);
        assert_eq!(texts("%SRX2Y3I5J7*%"), vec!["SRX2Y3I5J7"]);
        // Duplicate axes are left for the dispatcher to reject
        assert_eq!(texts("X1X2D01*"), vec!["X1X2D01"]);
    }

    #[test]
    fn test_chunked_feed_matches_whole() {
        let input = "%FSLAX24Y24*%\nG01*\nX100Y200D01*\nM02*\n";
        let whole = tokenize(input);

        let mut tokens = Vec::new();
        let mut collect = |text: &str, line: usize, advanced: bool| {
            tokens.push(Token {
                text: text.to_string(),
                line,
                advanced,
            });
            Ok::<(), GerberError>(())
        };
        let mut tokenizer = Tokenizer::new();
        for chunk in ["%FSLA", "X24Y24*", "%\nG0", "1*\nX100Y2", "00D01*\nM02*\n"] {
            tokenizer.feed(chunk, &mut collect).unwrap();
        }
        tokenizer.finish(&mut collect).unwrap();
        assert_eq!(tokens, whole);
    }

    #[test]
    fn test_tokenize_garbage_still_yields_tokens() {
        let tokens = tokenize("%\u{0}%%AMX*1,1*%\u{7f}G01X1Y\u{1}2D01*%FS");
        assert_eq!(tokens.last().map(|t| t.text.as_str()), Some("FS"));
        assert!(tokens.iter().any(|t| t.text == "AMX*1,1"));
        assert!(tokens.iter().any(|t| t.text == "X1Y2D01"));
    }

    #[test]
    fn test_carriage_returns_and_tabs_stripped() {
        let tokens = tokenize("G01*\r\n\tD10*\r\n");
        assert_eq!(tokens, vec![Token::simple("G01", 1), Token::simple("D10", 2)]);
    }

    #[test]
    fn test_unterminated_final_command() {
        assert_eq!(texts("G01*\nM02"), vec!["G01", "M02"]);
    }

    #[test]
    fn test_error_handler_reports_and_continues() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut tokenizer = Tokenizer::with_error_handler(Box::new(move |line, chunk, index| {
            sink.borrow_mut().push((line, chunk[index..].chars().next()));
        }));
        let mut out = Vec::new();
        let mut collect = |text: &str, _line: usize, _advanced: bool| {
            out.push(text.to_string());
            Ok::<(), GerberError>(())
        };
        tokenizer.feed("G01*\nD1\u{0}0*\n\u{1a}", &mut collect).unwrap();
        tokenizer.finish(&mut collect).unwrap();
        assert_eq!(out, vec!["G01", "D10"]);
        assert_eq!(*seen.borrow(), vec![(2, Some('\u{0}')), (3, Some('\u{1a}'))]);
    }

    #[test]
    fn test_consumer_error_stops_feed() {
        let mut calls = 0;
        let mut failing = |_text: &str, line: usize, _advanced: bool| {
            calls += 1;
            Err(GerberError::parse(line, "boom"))
        };
        let mut tokenizer = Tokenizer::new();
        let err = tokenizer.feed("G01*\nG02*\n", &mut failing).unwrap_err();
        assert!(matches!(err, GerberError::Parse { line: 1, .. }));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(tokenize(""), Vec::<Token>::new());
        assert_eq!(tokenize("  \n\r\t  "), Vec::<Token>::new());
    }
}
