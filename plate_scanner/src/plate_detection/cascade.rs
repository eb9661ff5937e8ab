//! Multi-backend plate text recognition.
//!
//! Backends are tried as an explicit ordered list of [`Attempt`]s. Each attempt
//! says when it is allowed to run, how its answer combines with the answer so
//! far, and whether the cascade stops after it. Every raw backend output is
//! cleaned with [`TextCleaner`] before it is compared with anything, so the text
//! leaving the cascade is always either empty or a valid plate string.

use log::debug;
use opencv::prelude::Mat;

use crate::config::TextConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionSource {
    Local,
    RemotePrimary,
    RemoteFallback,
}

impl RecognitionSource {
    pub fn label(&self) -> &'static str {
        match self {
            RecognitionSource::Local => "local",
            RecognitionSource::RemotePrimary => "remote_primary",
            RecognitionSource::RemoteFallback => "remote_fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    /// Empty, or uppercase alphanumeric within the configured length bounds.
    pub text: String,
    pub source: RecognitionSource,
    pub accepted: bool,
}

impl RecognitionResult {
    fn new(text: String, source: RecognitionSource) -> Self {
        let accepted = !text.is_empty();
        Self {
            text,
            source,
            accepted,
        }
    }
}

/// A text extraction engine.
///
/// Returns the raw text it read, or an empty string when it read nothing or
/// failed. Failures are never surfaced to the cascade.
pub trait RecognitionBackend {
    fn source(&self) -> RecognitionSource;
    fn extract_text(&mut self, region: &Mat) -> String;
}

#[derive(Debug, Clone)]
pub struct TextCleaner {
    min_len: usize,
    max_len: usize,
}

impl TextCleaner {
    pub fn new(min_len: usize, max_len: usize) -> Self {
        Self { min_len, max_len }
    }

    /// Uppercases, keeps only `[A-Z0-9]` and blanks out anything whose length
    /// falls outside the bounds. Idempotent.
    pub fn clean(&self, raw: &str) -> String {
        let text: String = raw
            .to_uppercase()
            .chars()
            .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            .collect();
        if text.len() < self.min_len || text.len() > self.max_len {
            return String::new();
        }
        text
    }

    pub fn is_valid(&self, text: &str) -> bool {
        text.len() >= self.min_len
            && text.len() <= self.max_len
            && text
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    }
}

impl Default for TextCleaner {
    fn default() -> Self {
        Self::new(4, 10)
    }
}

/// Cleaning with the default `[4, 10]` length bounds.
pub fn clean_plate_text(raw: &str) -> String {
    TextCleaner::default().clean(raw)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy {
    /// Runs first and its answer is final, empty or not.
    Exclusive,
    /// Sets the baseline answer.
    Baseline,
    /// Only runs while the current answer is shorter than `below`; replaces it
    /// when strictly longer.
    Improve { below: usize },
}

struct Attempt {
    backend: Box<dyn RecognitionBackend>,
    policy: Policy,
}

impl Attempt {
    fn should_run(&self, current: &str) -> bool {
        match self.policy {
            Policy::Exclusive | Policy::Baseline => true,
            Policy::Improve { below } => current.len() < below,
        }
    }

    fn replaces(&self, current: &str, candidate: &str) -> bool {
        match self.policy {
            Policy::Exclusive | Policy::Baseline => true,
            Policy::Improve { .. } => candidate.len() > current.len(),
        }
    }

    fn stops_cascade(&self) -> bool {
        self.policy == Policy::Exclusive
    }
}

pub struct TextRecognitionCascade {
    attempts: Vec<Attempt>,
    cleaner: TextCleaner,
}

impl TextRecognitionCascade {
    pub fn builder(text: &TextConfig) -> CascadeBuilder {
        CascadeBuilder {
            primary: None,
            local: None,
            fallback: None,
            cleaner: TextCleaner::new(text.min_len, text.max_len),
            fallback_below: text.fallback_below,
        }
    }

    /// Runs the eligible backends over `region` in priority order.
    ///
    /// An empty `text` in the result means no usable plate was read.
    pub fn recognize(&mut self, region: &Mat) -> RecognitionResult {
        let mut best = RecognitionResult::new(String::new(), RecognitionSource::Local);

        for attempt in self.attempts.iter_mut() {
            if !attempt.should_run(&best.text) {
                continue;
            }

            let source = attempt.backend.source();
            let raw = attempt.backend.extract_text(region);
            let cleaned = self.cleaner.clean(&raw);
            debug!(
                "{} read {:?}, cleaned to {:?}",
                source.label(),
                raw.trim(),
                cleaned
            );

            if attempt.replaces(&best.text, &cleaned) {
                best = RecognitionResult::new(cleaned, source);
            }
            if attempt.stops_cascade() {
                break;
            }
        }

        best
    }
}

pub struct CascadeBuilder {
    primary: Option<Box<dyn RecognitionBackend>>,
    local: Option<Box<dyn RecognitionBackend>>,
    fallback: Option<Box<dyn RecognitionBackend>>,
    cleaner: TextCleaner,
    fallback_below: usize,
}

impl CascadeBuilder {
    /// When present, this backend alone answers every call.
    pub fn primary(mut self, backend: Box<dyn RecognitionBackend>) -> Self {
        self.primary = Some(backend);
        self
    }

    pub fn local(mut self, backend: Box<dyn RecognitionBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    pub fn fallback(mut self, backend: Box<dyn RecognitionBackend>) -> Self {
        self.fallback = Some(backend);
        self
    }

    pub fn build(self) -> TextRecognitionCascade {
        let mut attempts = vec![];
        if let Some(backend) = self.primary {
            attempts.push(Attempt {
                backend,
                policy: Policy::Exclusive,
            });
        } else {
            if let Some(backend) = self.local {
                attempts.push(Attempt {
                    backend,
                    policy: Policy::Baseline,
                });
            }
            if let Some(backend) = self.fallback {
                attempts.push(Attempt {
                    backend,
                    policy: Policy::Improve {
                        below: self.fallback_below,
                    },
                });
            }
        }

        TextRecognitionCascade {
            attempts,
            cleaner: self.cleaner,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Returns a fixed answer and counts how often it was asked.
    pub(crate) struct Scripted {
        source: RecognitionSource,
        answer: String,
        calls: Rc<Cell<usize>>,
    }

    impl Scripted {
        pub(crate) fn new(source: RecognitionSource, answer: &str) -> (Box<Self>, Rc<Cell<usize>>) {
            let calls = Rc::new(Cell::new(0));
            let backend = Box::new(Self {
                source,
                answer: answer.to_string(),
                calls: calls.clone(),
            });
            (backend, calls)
        }
    }

    impl RecognitionBackend for Scripted {
        fn source(&self) -> RecognitionSource {
            self.source
        }

        fn extract_text(&mut self, _region: &Mat) -> String {
            self.calls.set(self.calls.get() + 1);
            self.answer.clone()
        }
    }

    fn region() -> Mat {
        Mat::default()
    }

    #[test]
    fn cleaning_strips_and_uppercases() {
        assert_eq!(clean_plate_text(" abc-1234\n"), "ABC1234");
        assert_eq!(clean_plate_text("NBC 1234"), "NBC1234");
        assert_eq!(clean_plate_text("ÄB12 34"), "B1234");
    }

    #[test]
    fn cleaning_enforces_length_bounds() {
        assert_eq!(clean_plate_text("AB1"), "");
        assert_eq!(clean_plate_text("AB12"), "AB12");
        assert_eq!(clean_plate_text("ABCDE12345"), "ABCDE12345");
        assert_eq!(clean_plate_text("ABCDE123456"), "");
        assert_eq!(clean_plate_text(""), "");
    }

    #[test]
    fn cleaning_is_idempotent_and_valid() {
        let cleaner = TextCleaner::default();
        for raw in [
            "abc1234",
            "  x ",
            "ÀÉÎ-99-zz",
            "1234567890123",
            "|NBC:1234|",
            "ß0ab",
            "\u{1F697}CAR42",
        ] {
            let once = cleaner.clean(raw);
            assert_eq!(cleaner.clean(&once), once, "input {:?}", raw);
            assert!(once.is_empty() || cleaner.is_valid(&once), "input {:?}", raw);
        }
    }

    #[test]
    fn primary_short_circuits_everything_else() {
        let (primary, primary_calls) = Scripted::new(RecognitionSource::RemotePrimary, "xyz987");
        let (local, local_calls) = Scripted::new(RecognitionSource::Local, "ABC1234");
        let (fallback, fallback_calls) = Scripted::new(RecognitionSource::RemoteFallback, "ABC12345");

        let mut cascade = TextRecognitionCascade::builder(&TextConfig::default())
            .primary(primary)
            .local(local)
            .fallback(fallback)
            .build();

        let result = cascade.recognize(&region());
        assert_eq!(result.text, "XYZ987");
        assert_eq!(result.source, RecognitionSource::RemotePrimary);
        assert!(result.accepted);
        assert_eq!(primary_calls.get(), 1);
        assert_eq!(local_calls.get(), 0);
        assert_eq!(fallback_calls.get(), 0);
    }

    #[test]
    fn empty_primary_answer_is_final() {
        let (primary, _) = Scripted::new(RecognitionSource::RemotePrimary, "");
        let (local, local_calls) = Scripted::new(RecognitionSource::Local, "ABC1234");

        let mut cascade = TextRecognitionCascade::builder(&TextConfig::default())
            .primary(primary)
            .local(local)
            .build();

        let result = cascade.recognize(&region());
        assert_eq!(result.text, "");
        assert!(!result.accepted);
        assert_eq!(local_calls.get(), 0);
    }

    #[test]
    fn long_local_result_skips_fallback() {
        let (local, _) = Scripted::new(RecognitionSource::Local, "abc12");
        let (fallback, fallback_calls) = Scripted::new(RecognitionSource::RemoteFallback, "ABCDEF123");

        let mut cascade = TextRecognitionCascade::builder(&TextConfig::default())
            .local(local)
            .fallback(fallback)
            .build();

        let result = cascade.recognize(&region());
        assert_eq!(result.text, "ABC12");
        assert_eq!(result.source, RecognitionSource::Local);
        assert_eq!(fallback_calls.get(), 0);
    }

    #[test]
    fn fallback_replaces_rejected_local_result() {
        let (local, _) = Scripted::new(RecognitionSource::Local, "AB1");
        let (fallback, fallback_calls) = Scripted::new(RecognitionSource::RemoteFallback, "ab-123");

        let mut cascade = TextRecognitionCascade::builder(&TextConfig::default())
            .local(local)
            .fallback(fallback)
            .build();

        let result = cascade.recognize(&region());
        assert_eq!(result.text, "AB123");
        assert_eq!(result.source, RecognitionSource::RemoteFallback);
        assert_eq!(fallback_calls.get(), 1);
    }

    #[test]
    fn fallback_must_be_strictly_longer() {
        let (local, _) = Scripted::new(RecognitionSource::Local, "AB12");
        let (fallback, fallback_calls) = Scripted::new(RecognitionSource::RemoteFallback, "CD34");

        let mut cascade = TextRecognitionCascade::builder(&TextConfig::default())
            .local(local)
            .fallback(fallback)
            .build();

        let result = cascade.recognize(&region());
        assert_eq!(result.text, "AB12");
        assert_eq!(result.source, RecognitionSource::Local);
        assert_eq!(fallback_calls.get(), 1);
    }

    #[test]
    fn fallback_alone_still_answers() {
        let (fallback, _) = Scripted::new(RecognitionSource::RemoteFallback, "QWE123");
        let mut cascade = TextRecognitionCascade::builder(&TextConfig::default())
            .fallback(fallback)
            .build();

        assert_eq!(cascade.recognize(&region()).text, "QWE123");
    }

    #[test]
    fn no_backends_yields_empty_text() {
        let mut cascade = TextRecognitionCascade::builder(&TextConfig::default()).build();
        let result = cascade.recognize(&region());
        assert!(result.text.is_empty());
        assert!(!result.accepted);
    }

    #[test]
    fn fallback_threshold_is_configurable() {
        let text = TextConfig {
            fallback_below: 8,
            ..Default::default()
        };
        let (local, _) = Scripted::new(RecognitionSource::Local, "ABC1234");
        let (fallback, fallback_calls) = Scripted::new(RecognitionSource::RemoteFallback, "ABC12345");

        let mut cascade = TextRecognitionCascade::builder(&text)
            .local(local)
            .fallback(fallback)
            .build();

        assert_eq!(cascade.recognize(&region()).text, "ABC12345");
        assert_eq!(fallback_calls.get(), 1);
    }
}
