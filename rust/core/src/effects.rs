//! The effect stream: document assembly and mirrored outputs.
//!
//! All document content is produced by emitting [`Effect`] records through
//! an [`EffectSink`]. Sinks assemble the document in emission order; the
//! streaming sink flushes document text as it arrives, the buffered sink
//! returns it whole.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::MlldResult;

/// A unit of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Append to the rendered document only.
    Doc(String),
    /// Append to the document and mirror to stdout.
    Both(String),
    /// Console only.
    Stdout(String),
    /// Console error stream only.
    Stderr(String),
    /// Write to disk. The path has already been validated by the
    /// security manager.
    File {
        path: PathBuf,
        append: bool,
        contents: String,
    },
}

/// Receives effects and assembles the rendered document.
pub trait EffectSink: Send + Sync {
    /// Emit one effect.
    ///
    /// # Errors
    ///
    /// Returns an IO error when mirroring to a real output fails.
    fn emit(&self, effect: Effect) -> MlldResult<()>;

    /// The document assembled so far.
    fn document(&self) -> String;

    /// Captured stdout mirror (buffered sinks only; streaming sinks
    /// return what was mirrored).
    fn stdout(&self) -> String {
        String::new()
    }

    /// Captured stderr (buffered sinks only).
    fn stderr(&self) -> String {
        String::new()
    }
}

/// Collapse runs of three or more newlines down to two.
#[must_use]
pub fn normalize_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = 0usize;
    for ch in text.chars() {
        if ch == '\n' {
            run += 1;
            if run <= 2 {
                out.push('\n');
            }
        } else {
            run = 0;
            out.push(ch);
        }
    }
    out
}

#[derive(Default)]
struct BufferedState {
    doc: String,
    out: String,
    err: String,
}

/// Collects document and console output, returning them whole. File
/// effects are written to disk when emitted.
pub struct BufferedSink {
    normalize: bool,
    state: Mutex<BufferedState>,
}

impl Default for BufferedSink {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferedSink {
    #[must_use]
    pub fn new() -> Self {
        Self {
            normalize: true,
            state: Mutex::new(BufferedState::default()),
        }
    }

    #[must_use]
    pub fn without_normalization() -> Self {
        Self {
            normalize: false,
            state: Mutex::new(BufferedState::default()),
        }
    }
}

impl EffectSink for BufferedSink {
    fn emit(&self, effect: Effect) -> MlldResult<()> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match effect {
            Effect::Doc(text) => state.doc.push_str(&text),
            Effect::Both(text) => {
                state.doc.push_str(&text);
                state.out.push_str(&text);
            }
            Effect::Stdout(text) => state.out.push_str(&text),
            Effect::Stderr(text) => state.err.push_str(&text),
            Effect::File {
                path,
                append,
                contents,
            } => write_file(&path, append, &contents)?,
        }
        Ok(())
    }

    fn document(&self) -> String {
        let state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if self.normalize {
            normalize_blank_lines(&state.doc)
        } else {
            state.doc.clone()
        }
    }

    fn stdout(&self) -> String {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .out
            .clone()
    }

    fn stderr(&self) -> String {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .err
            .clone()
    }
}

/// Flushes document text to stdout as it arrives and stderr effects
/// unbuffered. The relative ordering of stderr against document writes is
/// implementation-defined when the process streams are buffered
/// differently.
pub struct StreamingSink {
    normalize: bool,
    doc: Mutex<String>,
}

impl StreamingSink {
    #[must_use]
    pub fn new(normalize: bool) -> Self {
        Self {
            normalize,
            doc: Mutex::new(String::new()),
        }
    }
}

impl EffectSink for StreamingSink {
    fn emit(&self, effect: Effect) -> MlldResult<()> {
        match effect {
            Effect::Doc(text) | Effect::Both(text) => {
                {
                    let mut doc = self
                        .doc
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    doc.push_str(&text);
                }
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            }
            Effect::Stdout(text) => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            }
            Effect::Stderr(text) => {
                let mut stderr = std::io::stderr().lock();
                stderr.write_all(text.as_bytes())?;
                stderr.flush()?;
            }
            Effect::File {
                path,
                append,
                contents,
            } => write_file(&path, append, &contents)?,
        }
        Ok(())
    }

    fn document(&self) -> String {
        let doc = self
            .doc
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if self.normalize {
            normalize_blank_lines(&doc)
        } else {
            doc.clone()
        }
    }
}

/// Records every effect without touching disk or the console. Test-only
/// in spirit, exported so collaborating crates can assert on streams.
#[derive(Default)]
pub struct CollectingSink {
    effects: Mutex<Vec<Effect>>,
}

impl CollectingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All emitted effects, in order.
    #[must_use]
    pub fn effects(&self) -> Vec<Effect> {
        self.effects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl EffectSink for CollectingSink {
    fn emit(&self, effect: Effect) -> MlldResult<()> {
        self.effects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(effect);
        Ok(())
    }

    fn document(&self) -> String {
        let effects = self
            .effects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut doc = String::new();
        for effect in effects.iter() {
            match effect {
                Effect::Doc(text) | Effect::Both(text) => doc.push_str(text),
                _ => {}
            }
        }
        doc
    }

    fn stderr(&self) -> String {
        let effects = self
            .effects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut err = String::new();
        for effect in effects.iter() {
            if let Effect::Stderr(text) = effect {
                err.push_str(text);
            }
        }
        err
    }
}

fn write_file(path: &std::path::Path, append: bool, contents: &str) -> MlldResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    if append {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(contents.as_bytes())?;
    } else {
        std::fs::write(path, contents)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_runs_collapse_to_two() {
        assert_eq!(normalize_blank_lines("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(normalize_blank_lines("a\n\nb"), "a\n\nb");
        assert_eq!(normalize_blank_lines("a\nb"), "a\nb");
    }

    #[test]
    fn buffered_sink_assembles_in_order() {
        let sink = BufferedSink::without_normalization();
        sink.emit(Effect::Doc("one ".into())).expect("emits");
        sink.emit(Effect::Both("two".into())).expect("emits");
        sink.emit(Effect::Stderr("warning".into())).expect("emits");
        assert_eq!(sink.document(), "one two");
        assert_eq!(sink.stdout(), "two");
        assert_eq!(sink.stderr(), "warning");
    }

    #[test]
    fn collecting_sink_records_everything() {
        let sink = CollectingSink::new();
        sink.emit(Effect::Doc("d".into())).expect("emits");
        sink.emit(Effect::Stdout("s".into())).expect("emits");
        assert_eq!(sink.effects().len(), 2);
        assert_eq!(sink.document(), "d");
    }
}
