//! Diagnostics collected while driving compilation units
//!
//! Each unit owns an [`ErrorList`] that tracks the worst severity seen so far
//! and any work the front-end has deferred to a later pass. The driver
//! forwards every new diagnostic to a [`DiagnosticSink`] as it appears.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Diagnostic severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        })
    }
}

/// A single reported problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Unit the diagnostic belongs to, if any
    pub unit: Option<String>,
    pub message: String,
    /// Toolchain defect rather than a problem with the input
    pub internal: bool,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            unit: None,
            message: message.into(),
            internal: false,
        }
    }

    /// An internal toolchain error
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            internal: true,
            ..Self::new(Severity::Error, message)
        }
    }

    pub fn for_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.internal {
            write!(f, "internal error")?;
        } else {
            write!(f, "{}", self.severity)?;
        }
        if let Some(unit) = &self.unit {
            write!(f, " [{}]", unit)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Handle for a piece of deferred work
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeferredId(u32);

/// Per-unit diagnostic accumulator
#[derive(Debug, Default)]
pub struct ErrorList {
    unit: Option<String>,
    items: Vec<Diagnostic>,
    worst: Option<Severity>,
    /// Index of the first diagnostic not yet forwarded to a sink
    reported: usize,
    deferred: BTreeMap<DeferredId, String>,
    next_id: u32,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Error list whose diagnostics are attributed to `unit`
    pub fn for_unit(unit: impl Into<String>) -> Self {
        Self {
            unit: Some(unit.into()),
            ..Self::default()
        }
    }

    /// Record a diagnostic
    pub fn log(&mut self, severity: Severity, message: impl Into<String>) {
        self.push(Diagnostic::new(severity, message));
    }

    pub fn push(&mut self, mut diagnostic: Diagnostic) {
        if diagnostic.unit.is_none() {
            diagnostic.unit = self.unit.clone();
        }
        self.worst = self.worst.max(Some(diagnostic.severity));
        self.items.push(diagnostic);
    }

    /// Register work that could not be completed in this pass
    pub fn defer(&mut self, description: impl Into<String>) -> DeferredId {
        let id = DeferredId(self.next_id);
        self.next_id += 1;
        self.deferred.insert(id, description.into());
        id
    }

    /// Mark deferred work as done
    pub fn complete(&mut self, id: DeferredId) -> bool {
        self.deferred.remove(&id).is_some()
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    /// Turn all outstanding deferred work into errors
    ///
    /// Returns the number of errors logged.
    pub fn flush_deferred(&mut self) -> usize {
        let pending = std::mem::take(&mut self.deferred);
        let count = pending.len();
        for (_, description) in pending {
            self.log(Severity::Error, format!("unresolved: {}", description));
        }
        count
    }

    /// Worst severity recorded so far
    pub fn worst(&self) -> Option<Severity> {
        self.worst
    }

    /// Whether the watermark has reached `severity`
    pub fn has_reached(&self, severity: Severity) -> bool {
        self.worst.is_some_and(|w| w >= severity)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.items.iter().filter(|d| d.severity == severity).count()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.items
    }

    /// Diagnostics added since the last call
    pub fn take_unreported(&mut self) -> &[Diagnostic] {
        let start = self.reported;
        self.reported = self.items.len();
        &self.items[start..]
    }
}

/// Receiver for diagnostics as they are produced
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: &Diagnostic);
}

/// Forwards diagnostics to `tracing` at the matching level
///
/// Internal errors are always emitted at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&mut self, d: &Diagnostic) {
        let unit = d.unit.as_deref().unwrap_or("-");
        if d.internal {
            tracing::error!(unit, internal = true, "{}", d.message);
            return;
        }
        match d.severity {
            Severity::Info => tracing::info!(unit, "{}", d.message),
            Severity::Warning => tracing::warn!(unit, "{}", d.message),
            Severity::Error | Severity::Fatal => {
                tracing::error!(unit, severity = %d.severity, "{}", d.message)
            }
        }
    }
}

/// Keeps every diagnostic in memory
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink for CollectingSink {
    fn report(&mut self, diagnostic: &Diagnostic) {
        self.diagnostics.push(diagnostic.clone());
    }
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for &mut S {
    fn report(&mut self, diagnostic: &Diagnostic) {
        (**self).report(diagnostic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermark() {
        let mut errs = ErrorList::new();
        assert_eq!(errs.worst(), None);
        errs.log(Severity::Warning, "w");
        errs.log(Severity::Info, "i");
        assert_eq!(errs.worst(), Some(Severity::Warning));
        assert!(!errs.has_reached(Severity::Error));
        errs.log(Severity::Error, "e");
        assert!(errs.has_reached(Severity::Error));
        assert!(!errs.has_reached(Severity::Fatal));
    }

    #[test]
    fn test_deferred_flush() {
        let mut errs = ErrorList::for_unit("app");
        let a = errs.defer("type of x");
        errs.defer("type of y");
        assert!(errs.complete(a));
        assert!(!errs.complete(a));
        assert_eq!(errs.deferred_count(), 1);

        assert_eq!(errs.flush_deferred(), 1);
        assert_eq!(errs.deferred_count(), 0);
        assert_eq!(errs.count(Severity::Error), 1);
        let d = &errs.diagnostics()[0];
        assert_eq!(d.unit.as_deref(), Some("app"));
        assert!(d.message.contains("type of y"));
    }

    #[test]
    fn test_take_unreported() {
        let mut errs = ErrorList::new();
        errs.log(Severity::Info, "one");
        assert_eq!(errs.take_unreported().len(), 1);
        assert!(errs.take_unreported().is_empty());
        errs.log(Severity::Info, "two");
        let fresh = errs.take_unreported();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].message, "two");
    }

    #[test]
    fn test_display() {
        let d = Diagnostic::new(Severity::Warning, "careful").for_unit("lib");
        assert_eq!(d.to_string(), "warning [lib]: careful");
        assert_eq!(Diagnostic::internal("boom").to_string(), "internal error: boom");
    }

    #[test]
    fn test_severity_from_toml_value() {
        #[derive(Deserialize)]
        struct Wrapper {
            level: Severity,
        }
        let w: Wrapper = toml::from_str("level = \"fatal\"").unwrap();
        assert_eq!(w.level, Severity::Fatal);
    }
}
