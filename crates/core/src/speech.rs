//! Read-aloud of annotation text
//!
//! Speech is fire-and-forget: the caller hands over plain text and never
//! waits for playback. Backends that cannot speak simply log what they were
//! asked to say.

use std::sync::{Mutex, PoisonError};

use doc_model::{Annotation, AnnotationKind};

use crate::rich_text;

pub trait SpeechService: Send + Sync {
    fn speak(&self, text: &str, language: Option<&str>);
    fn stop(&self);
}

/// Speech backend that only records and logs utterances
#[derive(Debug, Default)]
pub struct LoggingSpeech {
    spoken: Mutex<Vec<String>>,
}

impl LoggingSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything passed to [`SpeechService::speak`] so far
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl SpeechService for LoggingSpeech {
    fn speak(&self, text: &str, language: Option<&str>) {
        log::info!("speak ({}): {text}", language.unwrap_or("default"));
        self.spoken.lock().unwrap_or_else(PoisonError::into_inner).push(text.to_owned());
    }

    fn stop(&self) {
        log::debug!("speech stopped");
    }
}

/// Plain text to read for an annotation, if it carries any.
pub fn speakable_text(annotation: &Annotation) -> Option<String> {
    let text = match annotation.kind() {
        AnnotationKind::Text(mark) => rich_text::strip_html(&mark.content),
        AnnotationKind::Comment(mark) => rich_text::strip_html(&mark.content),
        AnnotationKind::OcrText(mark) => mark.text.clone(),
        AnnotationKind::Math(mark) => mark.source.clone(),
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_owned())
}

/// Stop any current utterance and read `annotation`. Returns `false` when
/// there was nothing to read.
pub fn speak_annotation(service: &dyn SpeechService, annotation: &Annotation, language: Option<&str>) -> bool {
    let Some(text) = speakable_text(annotation) else {
        return false;
    };
    service.stop();
    service.speak(&text, language);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_model::{Color, CommentMark, Frame, Point, ShapeMark};

    #[test]
    fn comment_is_read_without_markup() {
        let speech = LoggingSpeech::new();
        let comment = Annotation::new(
            0,
            AnnotationKind::Comment(CommentMark {
                anchor: Point::new(1.0, 1.0),
                content: "<p>Fix <b>this</b> &amp; that</p>".to_owned(),
                color: Color::YELLOW,
            }),
        );

        assert!(speak_annotation(&speech, &comment, Some("en")));
        assert_eq!(speech.spoken(), vec!["Fix this & that".to_owned()]);
    }

    #[test]
    fn shapes_have_nothing_to_say() {
        let speech = LoggingSpeech::new();
        let rect = Annotation::new(
            0,
            AnnotationKind::Rect(ShapeMark {
                frame: Frame::new(0.0, 0.0, 1.0, 1.0),
                color: Color::RED,
                fill_color: None,
                stroke_width: 1.0,
                opacity: 1.0,
            }),
        );

        assert!(!speak_annotation(&speech, &rect, None));
        assert!(speech.spoken().is_empty());
    }
}
