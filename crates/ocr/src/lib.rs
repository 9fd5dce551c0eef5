pub mod extract;
pub mod preprocess;
pub mod recognizer;
pub mod region;

pub use extract::{parse_line_items, ExtractionError, ItemExtractor, TextItemExtractor};
pub use preprocess::{compute_threshold, normalize, BinarizedImage, PreprocessError, INK, PAPER};
pub use recognizer::{OcrBackend, OcrError, TranscriptRecognizer};
pub use region::{AcquireError, CropRect, CroppedRegion, InvalidRegion, RawImage};
