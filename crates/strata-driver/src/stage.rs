use std::fmt;

/// Build stage of a compilation unit
///
/// Units move forward one stage at a time; `Aborted` is terminal and can be
/// entered from any stage before `Emitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Not yet accepted into the namespace
    Initial,
    NamespacePopulated,
    Linked,
    NamesResolved,
    ExpressionsValidated,
    CodeGenerated,
    Emitted,
    Aborted,
}

impl Stage {
    /// Stages that run as a bounded fixed-point loop
    pub const ITERATIVE: [Stage; 4] = [
        Stage::Linked,
        Stage::NamesResolved,
        Stage::ExpressionsValidated,
        Stage::CodeGenerated,
    ];

    /// The stage that follows this one on success
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Initial => Some(Stage::NamespacePopulated),
            Stage::NamespacePopulated => Some(Stage::Linked),
            Stage::Linked => Some(Stage::NamesResolved),
            Stage::NamesResolved => Some(Stage::ExpressionsValidated),
            Stage::ExpressionsValidated => Some(Stage::CodeGenerated),
            Stage::CodeGenerated => Some(Stage::Emitted),
            Stage::Emitted | Stage::Aborted => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Emitted | Stage::Aborted)
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Initial => "initial",
            Stage::NamespacePopulated => "namespace populated",
            Stage::Linked => "linked",
            Stage::NamesResolved => "names resolved",
            Stage::ExpressionsValidated => "expressions validated",
            Stage::CodeGenerated => "code generated",
            Stage::Emitted => "emitted",
            Stage::Aborted => "aborted",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
