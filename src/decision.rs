//! Tri-state answers from pluggable hooks.

/// The answer of a hook that may or may not have an opinion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decision {
    /// Definitively yes.
    Allow,
    /// Definitively no.
    Deny,
    /// No opinion; fall through to the next hook or the built-in rule.
    #[default]
    Passthru,
}

impl Decision {
    /// First non-`Passthru` answer in iteration order, or `Passthru`.
    pub fn first_of<I>(answers: I) -> Decision
    where
        I: IntoIterator<Item = Decision>,
    {
        answers
            .into_iter()
            .find(|d| *d != Decision::Passthru)
            .unwrap_or_default()
    }
}
