use crate::error::{CheckerError, ServiceError};

/// A completion returned by the text-generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
}

impl Completion {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// The text-generation service: one prompt in, one completion out.
pub trait TextGenerator {
    fn generate(&self, prompt: &str) -> Result<Completion, ServiceError>;
}

impl<T: TextGenerator + ?Sized> TextGenerator for &T {
    fn generate(&self, prompt: &str) -> Result<Completion, ServiceError> {
        (**self).generate(prompt)
    }
}

impl<T: TextGenerator + ?Sized> TextGenerator for Box<T> {
    fn generate(&self, prompt: &str) -> Result<Completion, ServiceError> {
        (**self).generate(prompt)
    }
}

/// Outcome of one structural check of a single source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub ok: bool,
    pub diagnostics: String,
}

impl CheckReport {
    pub fn passed() -> Self {
        Self {
            ok: true,
            diagnostics: String::new(),
        }
    }

    pub fn failed(diagnostics: impl Into<String>) -> Self {
        Self {
            ok: false,
            diagnostics: diagnostics.into(),
        }
    }
}

/// External static analysis over a single source text.
pub trait StructuralChecker {
    fn check(&self, source: &str) -> Result<CheckReport, CheckerError>;
}

impl<T: StructuralChecker + ?Sized> StructuralChecker for &T {
    fn check(&self, source: &str) -> Result<CheckReport, CheckerError> {
        (**self).check(source)
    }
}

impl<T: StructuralChecker + ?Sized> StructuralChecker for Box<T> {
    fn check(&self, source: &str) -> Result<CheckReport, CheckerError> {
        (**self).check(source)
    }
}
