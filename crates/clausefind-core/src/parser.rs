//! Plain-text document parser and format dispatch.
//!
//! Blank-line separated paragraphs become paragraph blocks. Lines starting
//! with `|` are markdown-style table rows; consecutive rows form one table
//! and separator rows (`|---|---|`) are dropped. Office containers are
//! handled by external parsers plugged in through [`DocumentParser`].

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::traits::DocumentParser;
use crate::types::RawBlock;

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextParser;

impl DocumentParser for PlainTextParser {
    fn parse(&self, path: &Path) -> Result<Vec<RawBlock>> {
        let bytes = fs::read(path)?;
        let blocks = parse_bytes(&bytes);
        debug!(path = %path.display(), blocks = blocks.len(), "parsed plain-text document");
        Ok(blocks)
    }
}

/// Pick a parser by file extension.
///
/// Legacy `.doc` files are rejected with a conversion hint.
pub fn parser_for(path: &Path) -> Result<Box<dyn DocumentParser>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "text" | "md" => Ok(Box::new(PlainTextParser)),
        "doc" => Err(Error::UnsupportedFormat {
            path: path.to_path_buf(),
            hint: "legacy .doc is not supported, convert to .docx first".into(),
        }),
        other => Err(Error::UnsupportedFormat {
            path: path.to_path_buf(),
            hint: format!("no parser registered for '.{other}'"),
        }),
    }
}

fn trim_bytes(mut s: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = s {
        if !first.is_ascii_whitespace() {
            break;
        }
        s = rest;
    }
    while let [rest @ .., last] = s {
        if !last.is_ascii_whitespace() {
            break;
        }
        s = rest;
    }
    s
}

fn is_separator_row(cells: &[&[u8]]) -> bool {
    cells.iter().all(|c| {
        let c = trim_bytes(c);
        !c.is_empty() && c.iter().all(|b| matches!(b, b'-' | b':'))
    })
}

fn table_cells(line: &[u8]) -> Vec<&[u8]> {
    let inner = line.strip_prefix(b"|").unwrap_or(line);
    let inner = inner.strip_suffix(b"|").unwrap_or(inner);
    inner.split(|b| *b == b'|').collect()
}

pub fn parse_bytes(bytes: &[u8]) -> Vec<RawBlock> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<u8> = Vec::new();
    let mut paragraph_index = 0;
    let mut table_index = 0;
    let mut row_index: Option<usize> = None;

    let mut flush_paragraph = |paragraph: &mut Vec<u8>, blocks: &mut Vec<RawBlock>| {
        if !paragraph.is_empty() {
            blocks.push(RawBlock::Paragraph { index: paragraph_index, bytes: std::mem::take(paragraph) });
            paragraph_index += 1;
        }
    };

    for raw_line in bytes.split(|b| *b == b'\n') {
        let line = trim_bytes(raw_line);
        if line.starts_with(b"|") {
            flush_paragraph(&mut paragraph, &mut blocks);
            let cells = table_cells(line);
            if is_separator_row(&cells) {
                continue;
            }
            let row = row_index.map_or(0, |r| r + 1);
            row_index = Some(row);
            blocks.push(RawBlock::TableRow {
                table: table_index,
                row,
                cells: cells.into_iter().map(|c| trim_bytes(c).to_vec()).collect(),
            });
            continue;
        }
        if row_index.take().is_some() {
            table_index += 1;
        }
        if line.is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
            continue;
        }
        if !paragraph.is_empty() {
            paragraph.push(b' ');
        }
        paragraph.extend_from_slice(line);
    }
    flush_paragraph(&mut paragraph, &mut blocks);
    blocks
}
