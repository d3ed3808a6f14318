//! Deterministic synthetic OCR engine
//!
//! Recognizes text "stamped" into a pixel buffer as marker pixels, one per
//! character cell. This gives the session layer a real engine to drive
//! without any native OCR dependency: recognition walks the image band by
//! band, takes configurable wall time per band, reports progress after each
//! band and honors a cooperative stop request between bands.
//!
//! Decoding is only meaningful for pages produced by [`stamp_text`] or
//! [`text_image`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::buffer::ImageBuffer;
use crate::config::{SegmentationMode, SessionConfig};
use crate::engine::{OcrEngine, Word};
use crate::geometry::Rect;
use crate::progress::ProgressUpdate;

/// Width of one character cell in stamped pages
pub const GLYPH_WIDTH: u32 = 8;
/// Height of one character cell in stamped pages
pub const GLYPH_HEIGHT: u32 = 12;
/// Vertical distance between lines in [`text_image`] pages
const LINE_STRIDE: u32 = 20;
/// Top-left margin of [`text_image`] pages
const MARGIN: u32 = 10;
/// Rows scanned per progress tick
const BAND_HEIGHT: u32 = 16;
/// Confidence reported for every decoded word
const WORD_CONFIDENCE: f32 = 95.0;

/// Stamp `text` into a 32-bit buffer, one marker pixel per character.
///
/// Characters are placed in [`GLYPH_WIDTH`]-wide cells starting at `(x, y)`;
/// spaces leave their cell blank, which is what separates words.
pub fn stamp_text(image: &ImageBuffer, x: u32, y: u32, text: &str) -> Result<()> {
    if image.depth() != 32 {
        bail!("marker text needs a 32-bit buffer");
    }
    for (i, c) in text.chars().enumerate() {
        if c == ' ' {
            continue;
        }
        image.set_pixel(x + (i as u32) * GLYPH_WIDTH, y, 0xFF00_0000 | (c as u32))?;
    }
    Ok(())
}

/// Build a page of the given size with one stamped line per entry
pub fn text_image(width: u32, height: u32, lines: &[&str]) -> Result<ImageBuffer> {
    let image = ImageBuffer::new(width, height, 32)?;
    for (i, line) in lines.iter().enumerate() {
        stamp_text(&image, MARGIN, MARGIN + (i as u32) * LINE_STRIDE, line)?;
    }
    Ok(image)
}

fn marker_char(pixel: u32) -> Option<char> {
    if pixel & 0xFF00_0000 != 0xFF00_0000 {
        return None;
    }
    char::from_u32(pixel & 0x00FF_FFFF).filter(|c| !c.is_control() && *c != ' ')
}

/// Group row-ordered markers into words; adjacent cells on one row join up
fn group_words(markers: &[(u32, u32, char)]) -> Vec<Word> {
    let mut sorted = markers.to_vec();
    sorted.sort_by_key(|&(x, y, _)| (y, x));

    let mut words = Vec::new();
    let mut current: Option<(String, u32, u32, u32)> = None;
    for (x, y, c) in sorted {
        current = match current.take() {
            Some((mut text, x0, wy, last_x)) if y == wy && x == last_x + GLYPH_WIDTH => {
                text.push(c);
                Some((text, x0, wy, x))
            }
            prev => {
                if let Some(parts) = prev {
                    words.push(finish_word(parts));
                }
                Some((c.to_string(), x, y, x))
            }
        };
    }
    if let Some(parts) = current {
        words.push(finish_word(parts));
    }
    words
}

fn finish_word((text, x0, y, last_x): (String, u32, u32, u32)) -> Word {
    Word {
        text,
        bounds: Rect::new(x0, y, last_x + GLYPH_WIDTH - x0, GLYPH_HEIGHT),
        confidence: WORD_CONFIDENCE,
    }
}

/// Join words with spaces within a row and newlines between rows
fn assemble_text(words: &[Word]) -> String {
    let mut text = String::new();
    let mut last_y = None;
    for word in words {
        match last_y {
            None => {}
            Some(y) if y == word.bounds.y => text.push(' '),
            Some(_) => text.push('\n'),
        }
        text.push_str(&word.text);
        last_y = Some(word.bounds.y);
    }
    text
}

#[derive(Debug, Clone)]
struct Recognition {
    text: String,
    words: Vec<Word>,
}

#[derive(Default)]
struct EngineState {
    initialized: bool,
    language: String,
    variables: std::collections::BTreeMap<String, String>,
    segmentation: SegmentationMode,
    image: Option<ImageBuffer>,
    active_rect: Option<Rect>,
    result: Option<Recognition>,
}

struct Inner {
    state: Mutex<EngineState>,
    stop: AtomicBool,
    released: AtomicBool,
    tick_delay: Duration,
    recognize_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    release_calls: AtomicUsize,
}

/// Marker-pixel OCR engine.
///
/// Cloning yields another handle to the same engine, which lets a test keep
/// observing counters after the engine has been boxed into a session.
#[derive(Clone)]
pub struct SyntheticEngine {
    inner: Arc<Inner>,
}

impl SyntheticEngine {
    /// Engine that recognizes at full speed
    pub fn new() -> Self {
        Self::with_tick_delay(Duration::ZERO)
    }

    /// Engine that sleeps for `tick_delay` before each scan band, making
    /// multi-tick runs take real wall time
    pub fn with_tick_delay(tick_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(EngineState::default()),
                stop: AtomicBool::new(false),
                released: AtomicBool::new(false),
                tick_delay,
                recognize_calls: AtomicUsize::new(0),
                stop_calls: AtomicUsize::new(0),
                release_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Whether `release` has been called
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Number of `recognize` calls so far
    pub fn recognize_calls(&self) -> usize {
        self.inner.recognize_calls.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls so far
    pub fn stop_calls(&self) -> usize {
        self.inner.stop_calls.load(Ordering::SeqCst)
    }

    /// Number of `release` calls so far
    pub fn release_calls(&self) -> usize {
        self.inner.release_calls.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrEngine for SyntheticEngine {
    fn init(&self, config: &SessionConfig) -> Result<()> {
        if self.inner.released.load(Ordering::SeqCst) {
            bail!("engine has been released");
        }

        info!(
            "Initializing synthetic OCR engine with language: {}",
            config.language
        );

        let tessdata = config.data_path.join("tessdata");
        for lang in config.languages() {
            let model = tessdata.join(format!("{lang}.traineddata"));
            if !model.is_file() {
                bail!("missing model file {}", model.display());
            }
        }

        let mut state = self.inner.state.lock();
        state.initialized = true;
        state.language = config.language.clone();
        state.variables = config.variables.clone();
        state.segmentation = config.segmentation_mode;
        state.image = None;
        state.active_rect = None;
        state.result = None;
        Ok(())
    }

    fn version(&self) -> String {
        format!("synthetic {}", env!("CARGO_PKG_VERSION"))
    }

    fn set_image(&self, image: &ImageBuffer) -> Result<()> {
        if self.inner.released.load(Ordering::SeqCst) {
            bail!("engine has been released");
        }
        {
            let mut state = self.inner.state.lock();
            if !state.initialized {
                bail!("engine is not initialized");
            }
            debug!("Binding {}x{} input image", image.width(), image.height());
            state.image = Some(image.clone());
            state.active_rect = None;
            state.result = None;
        }
        // A stop aimed at the previous input must not leak into this one.
        self.inner.stop.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_source_file(&self, path: &Path) -> Result<()> {
        let image = ImageBuffer::open(path)
            .with_context(|| format!("Failed to read input file {}", path.display()))?;
        self.set_image(&image)
    }

    fn set_rectangle(&self, rect: Rect) -> Result<()> {
        if self.inner.released.load(Ordering::SeqCst) {
            bail!("engine has been released");
        }
        let mut state = self.inner.state.lock();
        let image = state.image.as_ref().context("no image bound")?;
        if rect.is_empty() || !image.bounds().contains_rect(&rect) {
            bail!(
                "rectangle {}x{} at ({}, {}) outside image bounds",
                rect.width,
                rect.height,
                rect.x,
                rect.y
            );
        }
        state.active_rect = Some(rect);
        state.result = None;
        Ok(())
    }

    fn set_segmentation_mode(&self, mode: SegmentationMode) {
        self.inner.state.lock().segmentation = mode;
    }

    fn set_variable(&self, key: &str, value: &str) -> Result<()> {
        if self.inner.released.load(Ordering::SeqCst) {
            bail!("engine has been released");
        }
        self.inner
            .state
            .lock()
            .variables
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn variable(&self, key: &str) -> Option<String> {
        self.inner.state.lock().variables.get(key).cloned()
    }

    fn recognize(&self, sink: &mut dyn FnMut(ProgressUpdate)) -> Result<Option<String>> {
        if self.inner.released.load(Ordering::SeqCst) {
            bail!("engine has been released");
        }
        self.inner.recognize_calls.fetch_add(1, Ordering::SeqCst);

        let (image, region, segmentation) = {
            let state = self.inner.state.lock();
            if !state.initialized {
                bail!("engine is not initialized");
            }
            let image = state.image.clone().context("no image bound")?;
            let region = state.active_rect.unwrap_or_else(|| image.bounds());
            (image, region, state.segmentation)
        };

        debug!(
            "Recognizing {}x{} region at ({}, {})",
            region.width, region.height, region.x, region.y
        );

        let bands = region.height.div_ceil(BAND_HEIGHT);
        let mut markers = Vec::new();
        let mut last_marker: Option<(u32, u32)> = None;

        for band in 0..bands {
            // The stop latch is consumed on observation.
            if self.inner.stop.swap(false, Ordering::SeqCst) {
                debug!("Stop observed after {} of {} bands", band, bands);
                self.inner.state.lock().result = None;
                return Ok(None);
            }
            if !self.inner.tick_delay.is_zero() {
                std::thread::sleep(self.inner.tick_delay);
            }

            let band_y = region.y + band * BAND_HEIGHT;
            let band_rect = Rect::new(
                region.x,
                band_y,
                region.width,
                BAND_HEIGHT.min(region.bottom() - band_y),
            );
            for y in band_rect.y..band_rect.bottom() {
                for x in band_rect.x..band_rect.right() {
                    if let Ok(pixel) = image.pixel(x, y) {
                        if let Some(c) = marker_char(pixel) {
                            markers.push((x, y, c));
                            last_marker = Some((x, y));
                        }
                    }
                }
            }

            sink(ProgressUpdate {
                percent: ((band + 1) * 100 / bands) as u8,
                scan_rect: band_rect,
                word_rect: last_marker.map(|(x, y)| Rect::new(x, y, GLYPH_WIDTH, GLYPH_HEIGHT)),
            });
        }

        let mut words = group_words(&markers);
        match segmentation {
            SegmentationMode::SingleWord => words.truncate(1),
            SegmentationMode::SingleLine => {
                if let Some(first_y) = words.first().map(|w| w.bounds.y) {
                    words.retain(|w| w.bounds.y == first_y);
                }
            }
            _ => {}
        }
        let text = assemble_text(&words);
        debug!("Recognized {} words over {} bands", words.len(), bands);

        let mut state = self.inner.state.lock();
        state.result = Some(Recognition {
            text: text.clone(),
            words,
        });

        Ok(Some(text))
    }

    fn stop(&self) {
        self.inner.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.stop.store(true, Ordering::SeqCst);
    }

    fn mean_confidence(&self) -> f32 {
        let state = self.inner.state.lock();
        match &state.result {
            Some(r) if !r.words.is_empty() => {
                r.words.iter().map(|w| w.confidence).sum::<f32>() / r.words.len() as f32
            }
            _ => 0.0,
        }
    }

    fn word_confidences(&self) -> Vec<f32> {
        let state = self.inner.state.lock();
        state
            .result
            .as_ref()
            .map(|r| r.words.iter().map(|w| w.confidence).collect())
            .unwrap_or_default()
    }

    fn words(&self) -> Vec<Word> {
        let state = self.inner.state.lock();
        state
            .result
            .as_ref()
            .map(|r| r.words.clone())
            .unwrap_or_default()
    }

    fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.image = None;
        state.active_rect = None;
        state.result = None;
    }

    fn release(&self) -> Result<()> {
        self.inner.release_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.released.store(true, Ordering::SeqCst);
        *self.inner.state.lock() = EngineState::default();
        info!("Synthetic OCR engine released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn staged_data_dir(languages: &[&str]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let tessdata = dir.path().join("tessdata");
        std::fs::create_dir(&tessdata).unwrap();
        for lang in languages {
            std::fs::write(tessdata.join(format!("{lang}.traineddata")), b"model").unwrap();
        }
        dir
    }

    fn test_config(dir: &TempDir) -> SessionConfig {
        SessionConfig {
            data_path: dir.path().to_path_buf(),
            ..SessionConfig::default()
        }
    }

    fn ready_engine(dir: &TempDir) -> SyntheticEngine {
        let engine = SyntheticEngine::new();
        engine.init(&test_config(dir)).unwrap();
        engine
    }

    fn recognize_text(engine: &SyntheticEngine) -> Option<String> {
        engine.recognize(&mut |_| {}).unwrap()
    }

    #[test]
    fn test_stamp_and_recognize_round_trip() {
        let dir = staged_data_dir(&["eng"]);
        let engine = ready_engine(&dir);

        let page = text_image(200, 60, &["hello world"]).unwrap();
        engine.set_image(&page).unwrap();

        let text = recognize_text(&engine).unwrap();
        assert_eq!(text, "hello world");

        let words = engine.words();
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "hello");
        assert_eq!(words[0].bounds, Rect::new(10, 10, 5 * GLYPH_WIDTH, GLYPH_HEIGHT));
        assert_eq!(words[1].text, "world");
        assert_eq!(words[1].bounds.x, 10 + 6 * GLYPH_WIDTH);
    }

    #[test]
    fn test_multi_line_text_in_reading_order() {
        let dir = staged_data_dir(&["eng"]);
        let engine = ready_engine(&dir);

        let page = text_image(200, 80, &["first line", "second"]).unwrap();
        engine.set_image(&page).unwrap();

        assert_eq!(recognize_text(&engine).unwrap(), "first line\nsecond");
    }

    #[test]
    fn test_progress_ticks_cover_the_region() {
        let dir = staged_data_dir(&["eng"]);
        let engine = ready_engine(&dir);

        let page = text_image(120, 200, &["tick"]).unwrap();
        engine.set_image(&page).unwrap();

        let mut updates = Vec::new();
        engine.recognize(&mut |u| updates.push(u)).unwrap();

        assert!(!updates.is_empty());
        let bounds = page.bounds();
        for update in &updates {
            assert!(update.percent <= 100);
            assert!(bounds.contains_rect(&update.scan_rect));
        }
        assert!(updates.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(updates.last().unwrap().percent, 100);
    }

    #[test]
    fn test_word_rect_absent_until_first_word() {
        let dir = staged_data_dir(&["eng"]);
        let engine = ready_engine(&dir);

        // Text sits low on the page, so early bands see nothing.
        let page = ImageBuffer::new(120, 200, 32).unwrap();
        stamp_text(&page, 10, 150, "low").unwrap();
        engine.set_image(&page).unwrap();

        let mut updates = Vec::new();
        engine.recognize(&mut |u| updates.push(u)).unwrap();

        assert!(updates.first().unwrap().word_rect.is_none());
        assert!(updates.last().unwrap().word_rect.is_some());
    }

    #[test]
    fn test_stop_between_bands_returns_none() {
        let dir = staged_data_dir(&["eng"]);
        let engine = ready_engine(&dir);

        let page = text_image(200, 400, &["long page"]).unwrap();
        engine.set_image(&page).unwrap();

        // Request the stop from inside the progress callback, which runs
        // between scan bands.
        let stopper = engine.clone();
        let mut ticks = 0;
        let result = engine
            .recognize(&mut |_| {
                ticks += 1;
                if ticks == 1 {
                    stopper.stop();
                }
            })
            .unwrap();

        assert_eq!(result, None);
        assert_eq!(ticks, 1);
        assert!(engine.words().is_empty());
    }

    #[test]
    fn test_stop_latch_is_consumed_on_observe() {
        let dir = staged_data_dir(&["eng"]);
        let engine = ready_engine(&dir);

        let page = text_image(120, 40, &["again"]).unwrap();
        engine.set_image(&page).unwrap();

        engine.stop();
        assert_eq!(recognize_text(&engine), None);
        // The latch was consumed, so the next run completes.
        assert_eq!(recognize_text(&engine).unwrap(), "again");
    }

    #[test]
    fn test_stop_latch_reset_when_input_rebinds() {
        let dir = staged_data_dir(&["eng"]);
        let engine = ready_engine(&dir);

        let page = text_image(120, 40, &["fresh"]).unwrap();
        engine.set_image(&page).unwrap();
        engine.stop();

        // Binding a new input discards the stale stop request.
        engine.set_image(&page).unwrap();
        assert_eq!(recognize_text(&engine).unwrap(), "fresh");
    }

    #[test]
    fn test_rectangle_limits_recognition() {
        let dir = staged_data_dir(&["eng"]);
        let engine = ready_engine(&dir);

        let page = ImageBuffer::new(200, 40, 32).unwrap();
        stamp_text(&page, 10, 10, "A").unwrap();
        stamp_text(&page, 110, 10, "B").unwrap();
        engine.set_image(&page).unwrap();

        engine.set_rectangle(Rect::new(0, 0, 100, 40)).unwrap();
        assert_eq!(recognize_text(&engine).unwrap(), "A");

        engine.set_rectangle(Rect::new(100, 0, 100, 40)).unwrap();
        assert_eq!(recognize_text(&engine).unwrap(), "B");
    }

    #[test]
    fn test_rectangle_outside_bounds_rejected() {
        let dir = staged_data_dir(&["eng"]);
        let engine = ready_engine(&dir);

        let page = text_image(100, 40, &["x"]).unwrap();
        engine.set_image(&page).unwrap();

        assert!(engine.set_rectangle(Rect::new(50, 0, 60, 40)).is_err());
        assert!(engine.set_rectangle(Rect::new(0, 0, 0, 40)).is_err());
    }

    #[test]
    fn test_init_requires_model_files() {
        let dir = staged_data_dir(&["eng"]);
        let engine = SyntheticEngine::new();

        let mut config = test_config(&dir);
        config.language = "eng+deu".to_string();
        assert!(engine.init(&config).is_err());

        std::fs::write(
            dir.path().join("tessdata").join("deu.traineddata"),
            b"model",
        )
        .unwrap();
        assert!(engine.init(&config).is_ok());
    }

    #[test]
    fn test_variables_applied_at_init_and_overridable() {
        let dir = staged_data_dir(&["eng"]);
        let engine = SyntheticEngine::new();

        let mut config = test_config(&dir);
        config
            .variables
            .insert("tessedit_char_whitelist".to_string(), "abc".to_string());
        engine.init(&config).unwrap();

        assert_eq!(
            engine.variable("tessedit_char_whitelist"),
            Some("abc".to_string())
        );
        assert_eq!(engine.variable("no_such_variable"), None);

        engine.set_variable("tessedit_char_whitelist", "xyz").unwrap();
        assert_eq!(
            engine.variable("tessedit_char_whitelist"),
            Some("xyz".to_string())
        );
    }

    #[test]
    fn test_segmentation_modes_shape_the_result() {
        let dir = staged_data_dir(&["eng"]);
        let engine = ready_engine(&dir);

        let page = text_image(200, 80, &["one two", "three"]).unwrap();
        engine.set_image(&page).unwrap();

        engine.set_segmentation_mode(SegmentationMode::SingleWord);
        assert_eq!(recognize_text(&engine).unwrap(), "one");

        engine.set_segmentation_mode(SegmentationMode::SingleLine);
        assert_eq!(recognize_text(&engine).unwrap(), "one two");

        engine.set_segmentation_mode(SegmentationMode::SingleBlock);
        assert_eq!(recognize_text(&engine).unwrap(), "one two\nthree");
    }

    #[test]
    fn test_confidences_after_a_run() {
        let dir = staged_data_dir(&["eng"]);
        let engine = ready_engine(&dir);

        assert_eq!(engine.mean_confidence(), 0.0);

        let page = text_image(200, 40, &["two words"]).unwrap();
        engine.set_image(&page).unwrap();
        recognize_text(&engine).unwrap();

        assert_eq!(engine.word_confidences(), vec![WORD_CONFIDENCE; 2]);
        assert!((engine.mean_confidence() - WORD_CONFIDENCE).abs() < f32::EPSILON);
    }

    #[test]
    fn test_clear_keeps_models_and_variables() {
        let dir = staged_data_dir(&["eng"]);
        let engine = ready_engine(&dir);
        engine.set_variable("keep_me", "1").unwrap();

        let page = text_image(120, 40, &["gone"]).unwrap();
        engine.set_image(&page).unwrap();
        recognize_text(&engine).unwrap();
        assert!(!engine.words().is_empty());

        engine.clear();
        assert!(engine.words().is_empty());
        assert_eq!(engine.mean_confidence(), 0.0);
        assert_eq!(engine.variable("keep_me"), Some("1".to_string()));
        assert!(engine.recognize(&mut |_| {}).is_err());
    }

    #[test]
    fn test_release_blocks_further_use() {
        let dir = staged_data_dir(&["eng"]);
        let engine = ready_engine(&dir);

        engine.release().unwrap();
        assert!(engine.is_released());
        assert_eq!(engine.release_calls(), 1);

        assert!(engine.init(&test_config(&dir)).is_err());
        assert!(engine.recognize(&mut |_| {}).is_err());
        assert!(engine.words().is_empty());
    }

    #[test]
    fn test_source_file_round_trip() {
        let dir = staged_data_dir(&["eng"]);
        let engine = ready_engine(&dir);

        let page = text_image(200, 40, &["from disk"]).unwrap();
        let path = dir.path().join("page.png");
        page.to_rgba().save(&path).unwrap();

        engine.set_source_file(&path).unwrap();
        assert_eq!(recognize_text(&engine).unwrap(), "from disk");
    }

    #[test]
    fn test_call_counters() {
        let dir = staged_data_dir(&["eng"]);
        let engine = ready_engine(&dir);

        let page = text_image(120, 40, &["n"]).unwrap();
        engine.set_image(&page).unwrap();

        recognize_text(&engine);
        recognize_text(&engine);
        engine.stop();

        assert_eq!(engine.recognize_calls(), 2);
        assert_eq!(engine.stop_calls(), 1);
        assert_eq!(engine.release_calls(), 0);
    }
}
