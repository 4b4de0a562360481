//! Streaming output sinks for search and export results.
//!
//! Every renderer pulls one record at a time from the cursor and writes it
//! straight away; nothing is buffered beyond the current line. The number of
//! records visited is returned so callers can report totals.

use std::io::{IsTerminal, Write};

// used for table styling
use colored::Colorize;
// used to probe the terminal
use terminal_size::{Width, terminal_size};

use crate::archive::Record;
use crate::compile::Order;
use crate::error::Result;
use crate::width::{center, display_width, fit, pad};

/// Output encodings selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Format {
    #[default]
    Table,
    Csv,
    Tsv,
    Json,
    /// Count only.
    None,
}

// ------------- RenderSpec -------------
/// Column layout and paging for one rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSpec {
    columns: Vec<(String, usize)>,
    pub sort: Option<String>,
    pub order: Order,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub format: Format,
}

impl RenderSpec {
    /// The last column always gets the hint `0` and takes the remaining width.
    pub fn new(mut columns: Vec<(String, usize)>, format: Format) -> Self {
        if let Some(last) = columns.last_mut() {
            last.1 = 0;
        }
        Self {
            columns,
            sort: None,
            order: Order::default(),
            limit: None,
            offset: None,
            format,
        }
    }
    pub fn columns(&self) -> &[(String, usize)] {
        &self.columns
    }
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }
}

/// A sink for a stream of records.
pub trait Renderer {
    fn render(&mut self, spec: &RenderSpec, records: &mut dyn Iterator<Item = Result<Record>>) -> Result<usize>;
}

/// Renderer for `format`. `width` is only used by the table.
pub fn renderer<'a>(format: Format, out: &'a mut dyn Write, width: Option<usize>, color: bool) -> Box<dyn Renderer + 'a> {
    match format {
        Format::Table => Box::new(TableRenderer::new(out, width, color)),
        Format::Csv => Box::new(DelimitedRenderer::new(out, b',')),
        Format::Tsv => Box::new(DelimitedRenderer::new(out, b'\t')),
        Format::Json => Box::new(JsonRenderer::new(out)),
        Format::None => Box::new(NullRenderer),
    }
}

/// Columns of the terminal on stdout, if stdout is one.
pub fn terminal_width() -> Option<usize> {
    if !std::io::stdout().is_terminal() {
        return None;
    }
    terminal_size().map(|(Width(w), _)| usize::from(w))
}

// ------------- Table -------------
const SEPARATOR: &str = " | ";
const RULE_SEPARATOR: &str = "-+-";

#[derive(Clone, Copy)]
enum Style {
    Plain,
    Header,
    Separator,
}

// One output line, clipped to the terminal as it is built.
struct Line {
    text: String,
    used: usize,
    limit: Option<usize>,
    color: bool,
}

impl Line {
    fn new(limit: Option<usize>, color: bool) -> Self {
        Self { text: String::new(), used: 0, limit, color }
    }
    // false once the line is full
    fn push(&mut self, piece: &str, style: Style) -> bool {
        let piece = match self.limit {
            Some(limit) if self.used >= limit => return false,
            Some(limit) if self.used + display_width(piece) > limit => fit(piece, limit - self.used),
            _ => piece.to_string(),
        };
        self.used += display_width(&piece);
        match (self.color, style) {
            (true, Style::Header) => self.text.push_str(&piece.bold().yellow().to_string()),
            (true, Style::Separator) => self.text.push_str(&piece.bold().bright_black().to_string()),
            _ => self.text.push_str(&piece),
        }
        true
    }
    fn cells<I, S>(mut self, cells: I, separator: &str, style: Style) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for (i, cell) in cells.into_iter().enumerate() {
            if i > 0 && !self.push(separator, Style::Separator) {
                break;
            }
            if !self.push(cell.as_ref(), style) {
                break;
            }
        }
        self.text
    }
}

/// Fixed-width columns separated by ` | ` under a centred header.
pub struct TableRenderer<'a> {
    out: &'a mut dyn Write,
    width: Option<usize>,
    color: bool,
}

impl<'a> TableRenderer<'a> {
    /// `width` is the terminal width; `None` leaves lines and `0`-hint columns unbounded.
    pub fn new(out: &'a mut dyn Write, width: Option<usize>, color: bool) -> Self {
        Self { out, width, color }
    }

    /// Final width of every column; `None` means unbounded.
    pub fn widths(&self, spec: &RenderSpec) -> Vec<Option<usize>> {
        let hints: Vec<usize> = spec.columns().iter().map(|(_, w)| *w).collect();
        let fixed: usize = hints.iter().sum();
        let absorbing = hints.iter().filter(|w| **w == 0).count();
        let separators = SEPARATOR.len() * hints.len().saturating_sub(1);
        hints
            .iter()
            .map(|hint| match (*hint, self.width) {
                (0, Some(total)) => {
                    let rest = total.saturating_sub(fixed + separators);
                    Some((rest / absorbing.max(1)).max(1))
                }
                (0, None) => None,
                (hint, _) => Some(hint),
            })
            .collect()
    }
}

impl Renderer for TableRenderer<'_> {
    fn render(&mut self, spec: &RenderSpec, records: &mut dyn Iterator<Item = Result<Record>>) -> Result<usize> {
        let widths = self.widths(spec);
        let header = spec.names().zip(&widths).map(|(name, width)| match width {
            Some(w) => center(&name.to_uppercase(), *w),
            None => name.to_uppercase(),
        });
        writeln!(self.out, "{}", Line::new(self.width, self.color).cells(header, SEPARATOR, Style::Header))?;
        let mut rule: Vec<String> = spec
            .names()
            .zip(&widths)
            .map(|(name, width)| "-".repeat(width.unwrap_or_else(|| display_width(name))))
            .collect();
        if let Some(last) = rule.last_mut() {
            last.push('-');
        }
        writeln!(self.out, "{}", Line::new(self.width, self.color).cells(rule, RULE_SEPARATOR, Style::Separator))?;

        let mut count = 0;
        for record in records {
            let record = record?;
            let cells = record.values().iter().zip(&widths).map(|(value, width)| {
                let value = value.format();
                match width {
                    Some(w) => pad(&value, *w),
                    None => value.into_owned(),
                }
            });
            writeln!(self.out, "{}", Line::new(self.width, self.color).cells(cells, SEPARATOR, Style::Plain))?;
            count += 1;
        }
        self.out.flush()?;
        Ok(count)
    }
}

// ------------- CSV / TSV -------------
/// Header of column names, then one row per record. Lists are joined with spaces.
pub struct DelimitedRenderer<'a> {
    out: &'a mut dyn Write,
    delimiter: u8,
}

impl<'a> DelimitedRenderer<'a> {
    pub fn new(out: &'a mut dyn Write, delimiter: u8) -> Self {
        Self { out, delimiter }
    }
}

impl Renderer for DelimitedRenderer<'_> {
    fn render(&mut self, spec: &RenderSpec, records: &mut dyn Iterator<Item = Result<Record>>) -> Result<usize> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(&mut *self.out);
        writer.write_record(spec.names())?;
        let mut count = 0;
        for record in records {
            let record = record?;
            writer.write_record(record.values().iter().map(|v| v.format().into_owned()))?;
            count += 1;
        }
        writer.flush()?;
        Ok(count)
    }
}

// ------------- JSON -------------
/// A single JSON array of compact objects, written element by element.
pub struct JsonRenderer<'a> {
    out: &'a mut dyn Write,
}

impl<'a> JsonRenderer<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        Self { out }
    }
}

impl Renderer for JsonRenderer<'_> {
    fn render(&mut self, _spec: &RenderSpec, records: &mut dyn Iterator<Item = Result<Record>>) -> Result<usize> {
        self.out.write_all(b"[")?;
        let mut count = 0;
        for record in records {
            let record = record?;
            if count > 0 {
                self.out.write_all(b",")?;
            }
            serde_json::to_writer(&mut *self.out, &record)?;
            count += 1;
        }
        self.out.write_all(b"]\n")?;
        self.out.flush()?;
        Ok(count)
    }
}

// ------------- None -------------
/// Drains the cursor and reports how many records it held.
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn render(&mut self, _spec: &RenderSpec, records: &mut dyn Iterator<Item = Result<Record>>) -> Result<usize> {
        let mut count = 0;
        for record in records {
            record?;
            count += 1;
        }
        Ok(count)
    }
}
