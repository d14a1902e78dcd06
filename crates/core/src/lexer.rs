use logos::Logos;

use crate::error::{Error, Result};
use crate::state::CodeSection;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\f]+")]
pub enum TokenKind {
    #[regex(r";[^\n]*", logos::skip, priority = 5)]
    #[regex(r"//[^\n]*", logos::skip, priority = 5)]
    Comment,

    #[token(",")]
    Comma,

    #[token("\n")]
    Newline,

    #[regex(r"[^\s,;]+", |lex| lex.slice().to_string())]
    Word(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AsmItemKind {
    Label { name: String },
    Op { mnemonic: String, args: Vec<String> },
}

/// One source line's worth of input. `size` and `section` are filled in by
/// the first pass.
#[derive(Debug, Clone)]
pub struct AsmItem {
    pub kind: AsmItemKind,
    pub line: usize,
    pub size: u32,
    pub section: CodeSection,
}

impl AsmItem {
    /// The name the label-accounting step compares against pseudo-ops.
    pub fn name(&self) -> &str {
        match &self.kind {
            AsmItemKind::Label { name } => name,
            AsmItemKind::Op { mnemonic, .. } => mnemonic,
        }
    }
}

/// Tokenize a source text into a flat item list. A word ending in `:` opens
/// a label; every other leading word is a mnemonic taking the rest of the
/// line as comma-separated arguments.
pub fn parse_items(source: &str) -> Result<Vec<AsmItem>> {
    let mut items = Vec::new();
    let mut line = 1usize;
    // Words accumulated on the current line.
    let mut current: Vec<String> = Vec::new();

    let mut lexer = TokenKind::lexer(source);
    while let Some(token) = lexer.next() {
        match token {
            Ok(TokenKind::Word(word)) => {
                if current.is_empty() {
                    if let Some(name) = word.strip_suffix(':') {
                        if name.is_empty() {
                            return Err(Error::AsmParse { line, text: word });
                        }
                        items.push(AsmItem {
                            kind: AsmItemKind::Label {
                                name: name.to_string(),
                            },
                            line,
                            size: 0,
                            section: CodeSection::Text,
                        });
                        continue;
                    }
                }
                current.push(word);
            }
            Ok(TokenKind::Comma) => {}
            Ok(TokenKind::Newline) => {
                flush_line(&mut items, &mut current, line);
                line += 1;
            }
            Ok(TokenKind::Comment) => {}
            Err(()) => {
                return Err(Error::AsmParse {
                    line,
                    text: lexer.slice().to_string(),
                });
            }
        }
    }
    flush_line(&mut items, &mut current, line);

    Ok(items)
}

fn flush_line(items: &mut Vec<AsmItem>, current: &mut Vec<String>, line: usize) {
    if current.is_empty() {
        return;
    }
    let mut words = std::mem::take(current).into_iter();
    let mnemonic = words.next().expect("non-empty line");
    items.push(AsmItem {
        kind: AsmItemKind::Op {
            mnemonic,
            args: words.collect(),
        },
        line,
        size: 0,
        section: CodeSection::Text,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_ops_and_comments() {
        let items = parse_items(
            "start_job 7 ; open the first job\nlocal_barrier 3\ndata0:\nword 0xdead\n",
        )
        .expect("parse");

        assert_eq!(items.len(), 4);
        assert_eq!(
            items[0].kind,
            AsmItemKind::Op {
                mnemonic: "start_job".to_string(),
                args: vec!["7".to_string()],
            }
        );
        assert_eq!(items[1].line, 2);
        assert_eq!(
            items[2].kind,
            AsmItemKind::Label {
                name: "data0".to_string(),
            }
        );
        assert_eq!(
            items[3].kind,
            AsmItemKind::Op {
                mnemonic: "word".to_string(),
                args: vec!["0xdead".to_string()],
            }
        );
    }

    #[test]
    fn comma_separated_arguments() {
        let items = parse_items("uc_dma_bd 1, @data0, 0x80000000, 4\n").expect("parse");
        let AsmItemKind::Op { mnemonic, args } = &items[0].kind else {
            panic!("expected op");
        };
        assert_eq!(mnemonic, "uc_dma_bd");
        assert_eq!(args, &["1", "@data0", "0x80000000", "4"]);
    }

    #[test]
    fn colon_word_not_at_line_start_stays_an_argument() {
        // Only a line-leading word can open a label.
        let items = parse_items("launch_job x:y\n").expect("parse");
        let AsmItemKind::Op { args, .. } = &items[0].kind else {
            panic!("expected op");
        };
        assert_eq!(args, &["x:y"]);
    }

    #[test]
    fn bare_colon_is_rejected() {
        let err = parse_items(":\n").expect_err("bare colon");
        assert!(matches!(err, Error::AsmParse { line: 1, .. }));
    }

    #[test]
    fn last_line_without_newline_is_kept() {
        let items = parse_items("start_job 1\neof").expect("parse");
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].name(), "eof");
    }
}
