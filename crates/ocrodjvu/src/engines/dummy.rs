//! An engine that recognizes nothing.
//!
//! Useful for exercising the pipeline and the savers without an OCR engine
//! installed. Hidden from engine listings.

use super::{EngineDescriptor, EngineOutput, EngineProperties, ImageFormat, OcrEngine, OutputKind, PageImage, RecognizeOptions};
use crate::core::config::ExtractSettings;
use crate::error::Result;
use crate::text_zones::{BBox, Zone, ZoneType};
use async_trait::async_trait;

pub const NAME: &str = "_dummy";

#[derive(Debug, Default)]
pub struct DummyEngine;

impl DummyEngine {
    pub fn new(properties: EngineProperties) -> Result<Self> {
        properties.finish(NAME)?;
        Ok(Self)
    }
}

#[async_trait]
impl OcrEngine for DummyEngine {
    fn name(&self) -> &str {
        NAME
    }

    fn descriptor(&self) -> EngineDescriptor {
        EngineDescriptor {
            name: NAME.to_string(),
            image_format: ImageFormat::Pnm,
            output_kind: OutputKind::Native,
            needs_utf8_fix: false,
        }
    }

    fn default_language(&self) -> &str {
        "eng"
    }

    async fn list_languages(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn check_language(&self, _language: &str) -> Result<()> {
        Ok(())
    }

    async fn recognize(&self, image: &PageImage, _options: &RecognizeOptions) -> Result<EngineOutput> {
        tracing::debug!("{}: ignoring {}", NAME, image.path.display());
        Ok(EngineOutput::new(Vec::new(), "dummy"))
    }

    fn extract_text(&self, _output: &EngineOutput, _settings: &ExtractSettings) -> Result<Vec<Zone>> {
        Ok(vec![Zone::new(ZoneType::Page, BBox::new(0, 0, 0, 0), Vec::new())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_dummy_engine_yields_empty_page() {
        let engine = DummyEngine::new(EngineProperties::new()).unwrap();
        assert!(engine.list_languages().await.unwrap().is_empty());
        assert!(engine.check_language("xyz").await.is_ok());

        let image = PageImage {
            path: PathBuf::from("page.pbm"),
            size: (10, 10),
            format: ImageFormat::Pnm,
            bits_per_pixel: 1,
        };
        let output = engine.recognize(&image, &RecognizeOptions::new("eng")).await.unwrap();
        assert_eq!(output.extension, "dummy");
        assert!(output.data.is_empty());

        let zones = engine.extract_text(&output, &ExtractSettings::default()).unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].to_string(), r#"(page 0 0 0 0 "")"#);
    }

    #[test]
    fn test_dummy_engine_has_no_properties() {
        let properties: EngineProperties = [("executable", "x")].into_iter().collect();
        assert!(DummyEngine::new(properties).is_err());
    }
}
