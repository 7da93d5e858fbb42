use std::io::{self, Write};

use crossterm::queue;
use crossterm::style::Print;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::theme;
use crate::progress::Progress;
use crate::protocol::types::{AnalyzeResult, NamingResult};

/// Widest a name column may grow before values are truncated.
const NAME_COLUMN_MAX: usize = 36;

/// Writes the flow's progress and results as plain terminal lines.
pub struct Renderer<W: Write = io::Stdout> {
    /// Last progress line written, so repeated records print once.
    last_progress: Option<String>,
    /// Connection flag of the last progress record seen.
    connected: bool,
    out: W,
}

impl<W: Write> Renderer<W> {
    pub fn with_writer(writer: W) -> Self {
        Self {
            last_progress: None,
            connected: false,
            out: writer,
        }
    }

    // --- Analysis ---

    pub fn render_analyzing(&mut self, url: &str) {
        queue!(
            self.out,
            Print(theme::dim().apply(format!("Analyzing {url}"))),
            Print("\n"),
        )
        .ok();
        self.out.flush().ok();
    }

    pub fn render_analysis(&mut self, analysis: &AnalyzeResult) {
        let name = if analysis.root_name.is_empty() {
            "(untitled)"
        } else {
            analysis.root_name.as_str()
        };
        let count = plural(analysis.total_nodes as usize, "nameable node", "nameable nodes");
        queue!(
            self.out,
            Print(theme::heading().apply(name)),
            Print(theme::dim().apply(format!(" · {count}"))),
            Print("\n"),
        )
        .ok();

        let types = node_type_summary(analysis);
        if !types.is_empty() {
            queue!(self.out, Print(format!("  {types}")), Print("\n")).ok();
        }
        if let Some(ref structure) = analysis.structure_analysis
            && !structure.file_type.is_empty()
        {
            queue!(
                self.out,
                Print(theme::dim().apply(format!("  file type: {}", structure.file_type))),
                Print("\n"),
            )
            .ok();
        }
        if let Some(ref pages) = analysis.pages
            && !pages.is_empty()
        {
            let header = plural(pages.len(), "page", "pages");
            queue!(self.out, Print(format!("  {header}:")), Print("\n")).ok();
            for page in pages {
                let mut detail = page.role.clone();
                if page.is_auxiliary {
                    if !detail.is_empty() {
                        detail.push_str(", ");
                    }
                    detail.push_str("auxiliary");
                }
                let detail = if detail.is_empty() {
                    String::new()
                } else {
                    format!(" ({detail})")
                };
                let nodes = plural(page.nodes.len(), "node", "nodes");
                queue!(
                    self.out,
                    Print(format!("    {}{detail}", page.name)),
                    Print(theme::dim().apply(format!(" · {nodes} · {}", page.node_id))),
                    Print("\n"),
                )
                .ok();
            }
        }
        self.out.flush().ok();
    }

    // --- Naming ---

    pub fn render_session(&mut self, session_id: &str) {
        self.last_progress = None;
        self.connected = false;
        queue!(
            self.out,
            Print(theme::dim().apply(format!("Naming session {session_id}"))),
            Print("\n"),
        )
        .ok();
        self.out.flush().ok();
    }

    /// Print the record if it reads differently from the last one printed.
    ///
    /// Records carrying an error are skipped; the caller reports the failure.
    pub fn render_progress(&mut self, progress: &Progress) {
        let was_connected = self.connected;
        self.connected = progress.connected;
        if progress.error.is_some() {
            return;
        }
        if was_connected && !progress.connected && !progress.completed {
            queue!(
                self.out,
                Print(theme::batch_label().apply("[stream]")),
                Print(theme::dim().apply(" connection lost, reconnecting")),
                Print("\n"),
            )
            .ok();
            self.out.flush().ok();
            return;
        }
        if progress.message.is_empty() {
            return;
        }

        let (label, text) = progress_line(progress);
        let key = format!("{label} {text}");
        if self.last_progress.as_deref() == Some(key.as_str()) {
            return;
        }
        queue!(
            self.out,
            Print(theme::batch_label().apply(&label)),
            Print(" "),
            Print(&text),
            Print("\n"),
        )
        .ok();
        self.out.flush().ok();
        self.last_progress = Some(key);
    }

    /// Print the preview table of suggested names.
    pub fn render_results(&mut self, results: &[NamingResult]) {
        if results.is_empty() {
            queue!(
                self.out,
                Print(theme::dim().apply("No names suggested")),
                Print("\n"),
            )
            .ok();
            self.out.flush().ok();
            return;
        }

        let summary = plural(results.len(), "name suggested", "names suggested");
        queue!(
            self.out,
            Print("\n"),
            Print(theme::result_line().apply("Preview")),
            Print(theme::dim().apply(format!("  {summary}"))),
            Print("\n"),
        )
        .ok();

        let widths = ColumnWidths::measure(results);
        let header = format!(
            "{:>mark$}  {}  {}  conf",
            "#",
            pad("original", widths.original),
            pad("suggested", widths.suggested),
            mark = widths.mark,
        );
        queue!(self.out, Print(theme::dim().apply(header)), Print("\n")).ok();
        for row in results {
            queue!(
                self.out,
                Print(format!("{:>mark$}  ", row.mark_id, mark = widths.mark)),
                Print(pad(&row.original_name, widths.original)),
                Print("  "),
                Print(theme::suggested_name().apply(pad(&row.suggested_name, widths.suggested))),
                Print("  "),
                Print(theme::confidence(row.confidence).apply(format!("{:.2}", row.confidence))),
                Print("\n"),
            )
            .ok();
        }
        self.out.flush().ok();
    }

    // --- Outcomes ---

    pub fn render_error(&mut self, message: &str) {
        queue!(
            self.out,
            Print(theme::error().apply(format!("✗ {}", first_line(message)))),
            Print("\n"),
        )
        .ok();
        self.out.flush().ok();
    }

    pub fn render_warning(&mut self, warning: &str) {
        queue!(
            self.out,
            Print(theme::dim().apply(format!("[warn] {warning}"))),
            Print("\n"),
        )
        .ok();
        self.out.flush().ok();
    }

    /// Write raw text (JSON output, etc.) followed by a newline.
    pub fn write_raw(&mut self, text: &str) {
        queue!(self.out, Print(text), Print("\n")).ok();
        self.out.flush().ok();
    }
}

/// Label and text of one progress line, e.g. `[batch 1/2]` and
/// `Batch 1 of 2 complete · 20/42 nodes`.
fn progress_line(progress: &Progress) -> (String, String) {
    let label = if progress.current_batch == 0 {
        "[stream]".to_string()
    } else if progress.total_pages > 0 {
        format!(
            "[page {}/{} · batch {}/{}]",
            progress.current_page,
            progress.total_pages,
            progress.current_batch,
            progress.total_batches
        )
    } else {
        format!(
            "[batch {}/{}]",
            progress.current_batch, progress.total_batches
        )
    };
    let text = if progress.total_nodes > 0 {
        format!(
            "{} · {}/{} nodes",
            progress.message, progress.completed_nodes, progress.total_nodes
        )
    } else {
        progress.message.clone()
    };
    (label, text)
}

/// `TEXT 20 · FRAME 12`, most frequent first.
fn node_type_summary(analysis: &AnalyzeResult) -> String {
    let mut types: Vec<(&String, &u32)> = analysis.node_types.iter().collect();
    types.sort_by(|a, b| b.1.cmp(a.1));
    types
        .iter()
        .map(|(name, count)| format!("{name} {count}"))
        .collect::<Vec<_>>()
        .join(" · ")
}

struct ColumnWidths {
    mark: usize,
    original: usize,
    suggested: usize,
}

impl ColumnWidths {
    fn measure(results: &[NamingResult]) -> Self {
        let mark = results
            .iter()
            .map(|r| digit_count(r.mark_id))
            .max()
            .unwrap_or(1);
        Self {
            mark,
            original: name_column(results.iter().map(|r| r.original_name.width()), "original"),
            suggested: name_column(
                results.iter().map(|r| r.suggested_name.width()),
                "suggested",
            ),
        }
    }
}

fn name_column(widths: impl Iterator<Item = usize>, header: &str) -> usize {
    widths
        .chain(std::iter::once(header.width()))
        .max()
        .unwrap_or(0)
        .min(NAME_COLUMN_MAX)
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("1 {one}")
    } else {
        format!("{n} {many}")
    }
}

fn digit_count(n: u32) -> usize {
    n.checked_ilog10().map_or(1, |d| d as usize + 1)
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

/// Truncate to `width` display columns, then pad with spaces to exactly that.
fn pad(s: &str, width: usize) -> String {
    let mut cell = truncate_to_width(s, width);
    let used = cell.width();
    cell.extend(std::iter::repeat_n(' ', width.saturating_sub(used)));
    cell
}

/// Truncate a string to fit within `max_width` display columns, appending `...` if truncated.
fn truncate_to_width(s: &str, max_width: usize) -> String {
    let ellipsis_width = 3;
    let mut width = 0;
    let mut cut_pos = 0;
    let mut result = String::new();
    for ch in s.chars() {
        let ch_width = ch.width().unwrap_or(0);
        if width + ch_width > max_width {
            if max_width >= ellipsis_width {
                result.truncate(cut_pos);
                result.push_str("...");
            } else {
                result.clear();
            }
            return result;
        }
        result.push(ch);
        width += ch_width;
        if width <= max_width.saturating_sub(ellipsis_width) {
            cut_pos = result.len();
        }
    }
    result
}
