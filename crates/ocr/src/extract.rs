use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use divvy_core::{ItemTuple, Money};
use regex::Regex;
use thiserror::Error;

use crate::recognizer::{OcrBackend, OcrError};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("OCR recognition failed: {0}")]
    Ocr(#[from] OcrError),
    #[error("Extraction did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("Extraction engine error: {0}")]
    Engine(String),
}

/// Turns a binarized receipt (PNG bytes) into its ordered line items.
///
/// The order of the returned items is authoritative. An empty list means
/// "no items on this receipt" and is not an error.
#[async_trait]
pub trait ItemExtractor: Send + Sync {
    async fn extract(&self, png: &[u8]) -> Result<Vec<ItemTuple>, ExtractionError>;
}

#[async_trait]
impl<T: ItemExtractor + ?Sized> ItemExtractor for Arc<T> {
    async fn extract(&self, png: &[u8]) -> Result<Vec<ItemTuple>, ExtractionError> {
        (**self).extract(png).await
    }
}

// ── Text-based extractor ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

// "<name> [$]<price> [tax flag]"
re!(re_priced_line,
    r"^\s*(?P<name>.*?[[:alpha:]].*?)[\s.]+\$?\s*(?P<price>-?\d{1,3}(?:,\d{3})+\.\d{2}|-?\d+\.\d{2})\s*[A-Z]?\s*$");
re!(re_summary_line,
    r"(?i)\b(?:sub\s*-?\s*total|total|tax|hst|gst|pst|vat|balance|change|amount\s+due|tender(?:ed)?|cash|visa|mastercard|amex|debit|credit)\b");

/// Runs an [`OcrBackend`] and reads one item from every priced line of the
/// transcript, skipping totals, taxes and payment lines.
///
/// Recognition is blocking, so it runs on tokio's blocking pool and the
/// returned future stays cancellable (e.g. by a deadline) while it works.
pub struct TextItemExtractor<R: OcrBackend> {
    recognizer: Arc<R>,
}

impl<R: OcrBackend + 'static> TextItemExtractor<R> {
    pub fn new(recognizer: R) -> Self {
        Self { recognizer: Arc::new(recognizer) }
    }
}

#[async_trait]
impl<R: OcrBackend + 'static> ItemExtractor for TextItemExtractor<R> {
    async fn extract(&self, png: &[u8]) -> Result<Vec<ItemTuple>, ExtractionError> {
        let recognizer = Arc::clone(&self.recognizer);
        let png = png.to_vec();
        let text = tokio::task::spawn_blocking(move || recognizer.recognize(&png))
            .await
            .map_err(|e| ExtractionError::Engine(format!("recognizer task failed: {e}")))??;
        let items = parse_line_items(&text);
        tracing::debug!(lines = text.lines().count(), items = items.len(), "parsed receipt transcript");
        Ok(items)
    }
}

/// Every priced, non-summary line of `text`, in reading order.
pub fn parse_line_items(text: &str) -> Vec<ItemTuple> {
    text.lines()
        .filter(|line| !re_summary_line().is_match(line))
        .filter_map(|line| {
            let caps = re_priced_line().captures(line)?;
            let name = caps.name("name")?.as_str().trim().trim_end_matches(['.', '$']).trim();
            let price: Money = caps.name("price")?.as_str().parse().ok()?;
            (!name.is_empty()).then(|| ItemTuple::new(name, price))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::TranscriptRecognizer;
    use std::sync::{Condvar, Mutex};

    fn names(items: &[ItemTuple]) -> Vec<&str> {
        items.iter().map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn parses_name_and_price_in_order() {
        let items = parse_line_items("Milk 3.50\nBread $2.25\n");
        assert_eq!(
            items,
            vec![
                ItemTuple::new("Milk", Money::from_cents(350)),
                ItemTuple::new("Bread", Money::from_cents(225)),
            ]
        );
    }

    #[test]
    fn skips_summary_and_payment_lines() {
        let text = "FRESH MART\n\
                    BANANAS 1.29\n\
                    OLIVE OIL 8.99 F\n\
                    SUBTOTAL 10.28\n\
                    TAX 0.82\n\
                    TOTAL $11.10\n\
                    VISA 11.10\n\
                    CHANGE 0.00";
        let items = parse_line_items(text);
        assert_eq!(names(&items), vec!["BANANAS", "OLIVE OIL"]);
        assert_eq!(items[1].price, Money::from_cents(899));
    }

    #[test]
    fn skips_lines_without_price_or_name() {
        let items = parse_line_items("STORE #42\n2024-01-15\n12.00\n(555) 123-4567");
        assert!(items.is_empty());
    }

    #[test]
    fn dot_leaders_and_thousands() {
        let items = parse_line_items("TV STAND........1,299.00\nCABLE .... 9.99");
        assert_eq!(names(&items), vec!["TV STAND", "CABLE"]);
        assert_eq!(items[0].price, Money::from_cents(129900));
    }

    #[test]
    fn negative_price_for_discount_line() {
        let items = parse_line_items("COUPON -1.00");
        assert_eq!(items, vec![ItemTuple::new("COUPON", Money::from_cents(-100))]);
    }

    #[test]
    fn no_panic_on_garbage_input() {
        let _ = parse_line_items("!@#$%^&*()\n\0\x01\x02 9.99");
    }

    #[tokio::test]
    async fn text_extractor_uses_recognizer_output() {
        let extractor = TextItemExtractor::new(TranscriptRecognizer::new("EGGS 4.00\nTOTAL 4.00"));
        let items = extractor.extract(b"png").await.unwrap();
        assert_eq!(items, vec![ItemTuple::new("EGGS", Money::from_cents(400))]);
    }

    #[tokio::test]
    async fn empty_transcript_yields_no_items() {
        let extractor = TextItemExtractor::new(TranscriptRecognizer::new(""));
        assert!(extractor.extract(b"png").await.unwrap().is_empty());
    }

    /// Blocks inside `recognize` until opened, or for at most `limit`.
    #[derive(Clone)]
    struct StalledEngine {
        gate: Arc<(Mutex<bool>, Condvar)>,
        limit: Duration,
    }

    impl StalledEngine {
        fn new(limit: Duration) -> Self {
            Self { gate: Arc::new((Mutex::new(false), Condvar::new())), limit }
        }

        fn release(&self) {
            *self.gate.0.lock().unwrap() = true;
            self.gate.1.notify_all();
        }
    }

    impl OcrBackend for StalledEngine {
        fn recognize(&self, _png: &[u8]) -> Result<String, OcrError> {
            let (lock, cvar) = &*self.gate;
            let guard = lock.lock().unwrap();
            let _ = cvar.wait_timeout_while(guard, self.limit, |open| !*open).unwrap();
            Ok("MILK 3.50".into())
        }
    }

    struct CrashingEngine;

    impl OcrBackend for CrashingEngine {
        fn recognize(&self, _png: &[u8]) -> Result<String, OcrError> {
            panic!("engine segfaulted");
        }
    }

    #[tokio::test]
    async fn blocking_recognizer_can_be_timed_out() {
        let engine = StalledEngine::new(Duration::from_secs(10));
        let extractor = TextItemExtractor::new(engine.clone());

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(Duration::from_millis(100), extractor.extract(b"png")).await;
        engine.release();

        assert!(outcome.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn blocking_recognizer_result_arrives_when_it_finishes() {
        let engine = StalledEngine::new(Duration::from_millis(20));
        let items = TextItemExtractor::new(engine).extract(b"png").await.unwrap();
        assert_eq!(items, vec![ItemTuple::new("MILK", Money::from_cents(350))]);
    }

    #[tokio::test]
    async fn recognizer_panic_is_an_engine_error() {
        let err = TextItemExtractor::new(CrashingEngine).extract(b"png").await.unwrap_err();
        assert!(matches!(err, ExtractionError::Engine(_)));
    }
}
